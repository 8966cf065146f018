//! Identificadores deterministas para objetos y vistas.
//!
//! UUID versión 5 sobre el espacio de nombres DNS, el mismo esquema que usa
//! el cliente de Weaviate (`generate_uuid5`), de modo que los ids coinciden
//! entre procesos, ejecuciones y lenguajes.

use uuid::Uuid;

/// Deriva el identificador estable de una clave de catálogo o de vista.
pub fn derive_id(key: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, key.as_bytes())
}

/// Clave de una vista: `{catalog_key}_{file_name}`.
pub fn view_key(catalog_key: &str, file_name: &str) -> String {
    format!("{catalog_key}_{file_name}")
}
