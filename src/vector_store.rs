//! Interfaz con el vector store y traducción de los registros tipados al
//! formato de objetos del store.
//!
//! API pública:
//!   - trait `VectorStore` (implementado por `weaviate_client::WeaviateClient`)
//!   - `ensure_collections(&dyn VectorStore, &AppConfig)`
//!   - `primary_collection(..)` / `upload_collection(..)`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::models::{AggregateRecord, ViewRecord};

/// Objeto tal como viaja al store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreObject {
    pub id: Uuid,
    pub properties: Map<String, Value>,
    pub vector: Option<Vec<f32>>,
}

impl From<&AggregateRecord> for StoreObject {
    fn from(record: &AggregateRecord) -> Self {
        let mut properties = Map::new();
        properties.insert("description".into(), Value::String(record.description.clone()));
        properties.insert("datasetUID".into(), Value::String(record.object_id.to_string()));
        Self {
            id: record.object_id,
            properties,
            vector: Some(record.vector.clone()),
        }
    }
}

impl From<&ViewRecord> for StoreObject {
    fn from(record: &ViewRecord) -> Self {
        let mut properties = Map::new();
        properties.insert("image".into(), Value::String(record.image.clone()));
        properties.insert("description".into(), Value::String(record.description.clone()));
        properties.insert("datasetUID".into(), Value::String(record.dataset_uid.clone()));
        Self {
            id: record.image_id,
            properties,
            vector: None,
        }
    }
}

/// Resultado de una inserción por lotes aceptada por el store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    pub succeeded: usize,
    /// Elementos rechazados: id y mensaje del store.
    pub failures: Vec<(Uuid, String)>,
}

/// Objeto leído del store.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedObject {
    pub id: Uuid,
    pub properties: Map<String, Value>,
    pub vector: Option<Vec<f32>>,
}

/// Resultado de una búsqueda por similitud.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: Option<Uuid>,
    pub properties: Map<String, Value>,
    pub distance: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Text,
    Blob,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub name: String,
    pub data_type: DataType,
    pub description: String,
}

/// Vectorizador del lado del servidor.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorizerSpec {
    /// Vectores suministrados por el cliente.
    None,
    /// Imagen + texto con pesos por campo.
    Multi2VecClip {
        image_fields: Vec<(String, f32)>,
        text_fields: Vec<(String, f32)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub name: String,
    pub description: String,
    pub properties: Vec<PropertySpec>,
    pub vectorizer: VectorizerSpec,
}

fn property(name: &str, data_type: DataType, description: &str) -> PropertySpec {
    PropertySpec {
        name: name.to_string(),
        data_type,
        description: description.to_string(),
    }
}

/// Colección principal: un vector agregado por objeto, sin vectorizador.
pub fn primary_collection(name: &str) -> CollectionSpec {
    CollectionSpec {
        name: name.to_string(),
        description: "A vector-only Cap3D collection for multi2vec-clip".to_string(),
        properties: vec![
            property("description", DataType::Text, "Description of image"),
            property(
                "datasetUID",
                DataType::Text,
                "A concatenation of the Unique ID and the name of the image from dataset",
            ),
        ],
        vectorizer: VectorizerSpec::None,
    }
}

/// Colección de subida: una imagen por vista, vectorizada en el servidor
/// (90 % imagen, 10 % descripción).
pub fn upload_collection(name: &str) -> CollectionSpec {
    CollectionSpec {
        name: name.to_string(),
        description: "A data upload Cap3D collection for multi2vec-clip".to_string(),
        properties: vec![
            property("image", DataType::Blob, "Image"),
            property("description", DataType::Text, "Description of image"),
            property(
                "datasetUID",
                DataType::Text,
                "A concatenation of the Unique ID and the name of the image from dataset",
            ),
        ],
        vectorizer: VectorizerSpec::Multi2VecClip {
            image_fields: vec![("image".to_string(), 0.9)],
            text_fields: vec![("description".to_string(), 0.1)],
        },
    }
}

/// Cliente del vector store. Todas las llamadas pueden bloquear en E/S; los
/// reintentos, si los hay, son cosa del transporte.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn is_live(&self) -> Result<bool, StoreError>;

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError>;

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Inserta (o sobrescribe por id) un lote. Los rechazos individuales
    /// vuelven en `InsertOutcome`; un `Err` significa que el lote entero falló.
    async fn insert_many(
        &self,
        collection: &str,
        objects: &[StoreObject],
    ) -> Result<InsertOutcome, StoreError>;

    async fn fetch_by_id(
        &self,
        collection: &str,
        id: Uuid,
        include_vector: bool,
    ) -> Result<Option<FetchedObject>, StoreError>;

    /// Devuelve cuántos objetos se borraron.
    async fn delete_many(&self, collection: &str, ids: &[Uuid]) -> Result<usize, StoreError>;

    async fn count(&self, collection: &str) -> Result<u64, StoreError>;

    async fn near_vector(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        properties: &[&str],
    ) -> Result<Vec<SearchHit>, StoreError>;
}

/// Garantiza que existan las dos colecciones. Con `recreate_collections` las
/// borra y las vuelve a crear vacías.
pub async fn ensure_collections(
    store: &dyn VectorStore,
    cfg: &AppConfig,
) -> Result<(), StoreError> {
    let specs = [
        primary_collection(&cfg.collection_name),
        upload_collection(&cfg.upload_collection_name),
    ];

    for spec in &specs {
        let exists = store.collection_exists(&spec.name).await?;
        if exists && cfg.recreate_collections {
            store.delete_collection(&spec.name).await?;
            info!("Colección '{}' borrada para recrearla.", spec.name);
        } else if exists {
            info!("Colección '{}' ya existe.", spec.name);
            continue;
        }
        store.create_collection(spec).await?;
        info!("Colección '{}' creada.", spec.name);
    }

    Ok(())
}
