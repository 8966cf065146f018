#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cap3d_ingest::config::AppConfig;
use cap3d_ingest::embedder::Embedder;
use cap3d_ingest::error::{IngestError, StoreError};
use cap3d_ingest::models::ViewImage;
use cap3d_ingest::vector_store::{
    CollectionSpec, FetchedObject, InsertOutcome, SearchHit, StoreObject, VectorStore,
    VectorizerSpec,
};
use serde_json::Value;
use uuid::Uuid;

/// Las "imágenes" de los tests son texto con floats separados por comas; el
/// vectorizador falso las convierte directamente en el vector.
/// Un fichero vacío produce un embedding de dimensión 0.
pub fn parse_vector(text: &str) -> Option<Vec<f32>> {
    if text.trim().is_empty() {
        return Some(Vec::new());
    }
    text.split(',')
        .map(|v| v.trim().parse::<f32>().ok())
        .collect()
}

/// Vector store en memoria con vectorizador del lado del servidor simulado.
#[derive(Default)]
pub struct FakeStore {
    collections: Mutex<HashMap<String, BTreeMap<Uuid, FetchedObject>>>,
    vectorized: Mutex<HashSet<String>>,
    pub insert_calls: AtomicUsize,
    pub batch_sizes: Mutex<Vec<usize>>,
    pub deleted: AtomicUsize,
    /// Colecciones cuyos lotes fallan a nivel de transporte.
    transport_failures: Mutex<HashSet<String>>,
    /// Ids que el store rechaza individualmente.
    rejected: Mutex<HashMap<Uuid, String>>,
    /// Ids aceptados que luego no aparecen al leerlos.
    vanishing: Mutex<HashSet<Uuid>>,
    pub offline: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marca una colección como vectorizada sin pasar por `create_collection`.
    pub fn vectorize(&self, collection: &str) {
        self.vectorized.lock().unwrap().insert(collection.to_string());
    }

    pub fn fail_transport_for(&self, collection: &str) {
        self.transport_failures
            .lock()
            .unwrap()
            .insert(collection.to_string());
    }

    pub fn reject(&self, id: Uuid, reason: &str) {
        self.rejected.lock().unwrap().insert(id, reason.to_string());
    }

    pub fn vanish(&self, id: Uuid) {
        self.vanishing.lock().unwrap().insert(id);
    }

    pub fn ids(&self, collection: &str) -> Vec<Uuid> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|objects| objects.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: Uuid) -> Option<FetchedObject> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|objects| objects.get(&id).cloned())
    }

    pub fn inserts(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    fn server_vector(object: &StoreObject) -> Result<Vec<f32>, String> {
        let image = object
            .properties
            .get("image")
            .and_then(Value::as_str)
            .ok_or("missing image")?;
        let bytes = STANDARD.decode(image).map_err(|e| e.to_string())?;
        let text = String::from_utf8(bytes).map_err(|e| e.to_string())?;
        parse_vector(&text).ok_or_else(|| "invalid image".to_string())
    }
}

#[async_trait]
impl VectorStore for FakeStore {
    async fn is_live(&self) -> Result<bool, StoreError> {
        Ok(!self.offline.load(Ordering::SeqCst))
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.collections.lock().unwrap().contains_key(name))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        if matches!(spec.vectorizer, VectorizerSpec::Multi2VecClip { .. }) {
            self.vectorize(&spec.name);
        }
        self.collections
            .lock()
            .unwrap()
            .entry(spec.name.clone())
            .or_default();
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.collections.lock().unwrap().remove(name);
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &str,
        objects: &[StoreObject],
    ) -> Result<InsertOutcome, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(objects.len());

        if self.offline.load(Ordering::SeqCst)
            || self.transport_failures.lock().unwrap().contains(collection)
        {
            return Err(StoreError::Transport("connection refused".to_string()));
        }

        let vectorized = self.vectorized.lock().unwrap().contains(collection);
        let rejected = self.rejected.lock().unwrap().clone();
        let vanishing = self.vanishing.lock().unwrap().clone();

        let mut outcome = InsertOutcome::default();
        let mut collections = self.collections.lock().unwrap();
        let stored = collections.entry(collection.to_string()).or_default();

        for object in objects {
            if let Some(reason) = rejected.get(&object.id) {
                outcome.failures.push((object.id, reason.clone()));
                continue;
            }
            let vector = if vectorized {
                match Self::server_vector(object) {
                    Ok(vector) => Some(vector),
                    Err(reason) => {
                        outcome.failures.push((object.id, reason));
                        continue;
                    }
                }
            } else {
                object.vector.clone()
            };

            outcome.succeeded += 1;
            if vanishing.contains(&object.id) {
                continue;
            }
            stored.insert(
                object.id,
                FetchedObject {
                    id: object.id,
                    properties: object.properties.clone(),
                    vector,
                },
            );
        }
        Ok(outcome)
    }

    async fn fetch_by_id(
        &self,
        collection: &str,
        id: Uuid,
        include_vector: bool,
    ) -> Result<Option<FetchedObject>, StoreError> {
        Ok(self.get(collection, id).map(|mut object| {
            if !include_vector {
                object.vector = None;
            }
            object
        }))
    }

    async fn delete_many(&self, collection: &str, ids: &[Uuid]) -> Result<usize, StoreError> {
        let mut collections = self.collections.lock().unwrap();
        let Some(objects) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let deleted = ids.iter().filter(|id| objects.remove(id).is_some()).count();
        self.deleted.fetch_add(deleted, Ordering::SeqCst);
        Ok(deleted)
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        Ok(self.ids(collection).len() as u64)
    }

    async fn near_vector(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        properties: &[&str],
    ) -> Result<Vec<SearchHit>, StoreError> {
        let collections = self.collections.lock().unwrap();
        let Some(objects) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = objects
            .values()
            .filter_map(|object| {
                let stored = object.vector.as_ref()?;
                let properties = object
                    .properties
                    .iter()
                    .filter(|(key, _)| properties.contains(&key.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(SearchHit {
                    id: Some(object.id),
                    properties,
                    distance: Some(cosine_distance(vector, stored)),
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        hits.truncate(limit);
        Ok(hits)
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    1.0 - dot / (norm(a) * norm(b))
}

/// Modelo local falso: lee la vista como texto y la interpreta como vector.
pub struct FakeEmbedder {
    pub text_vector: Vec<f32>,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn encode(&self, views: &[ViewImage]) -> Result<Vec<Vec<f32>>, IngestError> {
        views
            .iter()
            .map(|view| {
                let text = std::fs::read_to_string(&view.path).map_err(|source| {
                    IngestError::ReadView {
                        path: view.path.clone(),
                        source,
                    }
                })?;
                parse_vector(&text).ok_or_else(|| IngestError::Embedding("invalid image".into()))
            })
            .collect()
    }

    async fn encode_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        Ok(texts.iter().map(|_| self.text_vector.clone()).collect())
    }
}

/// Crea `root/key/` con las vistas dadas (nombre, contenido).
pub fn write_object(root: &Path, key: &str, views: &[(&str, &str)]) {
    let dir = root.join(key);
    std::fs::create_dir_all(&dir).unwrap();
    for (name, content) in views {
        std::fs::write(dir.join(name), content).unwrap();
    }
}

/// Configuración de test con los valores por defecto más `overrides`.
pub fn test_config(dataset: &Path, overrides: &[(&str, &str)]) -> AppConfig {
    let mut vars: HashMap<String, String> = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    vars.entry("DATASET_PATH".to_string())
        .or_insert_with(|| dataset.to_string_lossy().to_string());
    AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}
