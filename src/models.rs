//! Modelos de dominio (objetos del catálogo, vistas y registros persistidos).

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::DimensionGuard;
use crate::error::ValidationError;
use crate::ids::{derive_id, view_key};

/// Un objeto físico del catálogo: una carpeta con sus vistas renderizadas.
#[derive(Debug, Clone)]
pub struct DatasetObject {
    /// Posición del objeto en el recorrido del catálogo.
    pub index: usize,
    pub catalog_key: String,
    pub object_id: Uuid,
    /// Vistas ordenadas por nombre de fichero.
    pub views: Vec<ViewImage>,
}

impl DatasetObject {
    pub fn new(index: usize, catalog_key: impl Into<String>, views: Vec<ViewImage>) -> Self {
        let catalog_key = catalog_key.into();
        Self {
            index,
            object_id: derive_id(&catalog_key),
            catalog_key,
            views,
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            index: self.index,
            catalog_key: self.catalog_key.clone(),
        }
    }
}

/// Referencia ligera al objeto propietario de un registro en el buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub index: usize,
    pub catalog_key: String,
}

/// Una vista renderizada de un objeto.
#[derive(Debug, Clone)]
pub struct ViewImage {
    pub file_name: String,
    pub path: PathBuf,
    /// `{catalog_key}_{file_name}`, único en el catálogo.
    pub view_key: String,
    pub image_id: Uuid,
}

impl ViewImage {
    pub fn new(catalog_key: &str, path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let view_key = view_key(catalog_key, &file_name);
        Self {
            image_id: derive_id(&view_key),
            view_key,
            file_name,
            path: path.to_path_buf(),
        }
    }

    /// Lee el fichero y lo codifica en base64 (formato `blob` de Weaviate).
    pub fn read_base64(&self) -> std::io::Result<String> {
        let bytes = std::fs::read(&self.path)?;
        Ok(STANDARD.encode(bytes))
    }
}

/// Registro intermedio de una vista para la colección de subida.
#[derive(Debug, Clone)]
pub struct ViewRecord {
    pub image_id: Uuid,
    /// Bytes de la imagen en base64.
    pub image: String,
    pub description: String,
    /// Clave de la vista.
    pub dataset_uid: String,
}

impl ViewRecord {
    pub fn from_view(view: &ViewImage, description: &str) -> std::io::Result<Self> {
        Ok(Self {
            image_id: view.image_id,
            image: view.read_base64()?,
            description: description.to_string(),
            dataset_uid: view.view_key.clone(),
        })
    }
}

/// Registro agregado que se persiste en la colección principal.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    pub object_id: Uuid,
    pub description: String,
    pub vector: Vec<f32>,
}

impl AggregateRecord {
    /// Construye el registro validando la dimensionalidad contra el store.
    pub fn new(
        object_id: Uuid,
        description: String,
        vector: Vec<f32>,
        guard: &mut DimensionGuard,
    ) -> Result<Self, ValidationError> {
        guard.check(vector.len())?;
        Ok(Self {
            object_id,
            description,
            vector,
        })
    }
}

/// Fallo a nivel de objeto, registrado para una re-ejecución posterior.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub object_index: usize,
    pub catalog_key: String,
    pub reason: String,
}
