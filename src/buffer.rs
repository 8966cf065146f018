//! Buffer de inserción por lotes, con una cola por colección destino.
//!
//! `add` vuelca automáticamente al alcanzar la capacidad. Un volcado envía
//! la cola completa en una sola llamada y la vacía pase lo que pase: los
//! fallos no se reintentan aquí, se devuelven en el `FlushResult` con el
//! registro original para poder reenviarlo en otra ejecución.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::ObjectRef;
use crate::vector_store::{StoreObject, VectorStore};

/// Motivo asignado a cada elemento cuando falla el lote entero.
pub const TRANSPORT_ERROR_REASON: &str = "transport error";

/// Registro pendiente junto con el objeto del catálogo al que pertenece.
#[derive(Debug, Clone)]
pub struct BufferedItem {
    pub origin: ObjectRef,
    pub object: StoreObject,
}

/// Elemento rechazado en un volcado.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushFailure {
    pub origin: ObjectRef,
    pub object: StoreObject,
    pub reason: String,
}

impl FlushFailure {
    pub fn id(&self) -> Uuid {
        self.object.id
    }
}

/// Resultado de un volcado.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushResult {
    pub collection: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<FlushFailure>,
    /// Ids aceptados por el store.
    pub succeeded_ids: Vec<Uuid>,
}

impl FlushResult {
    fn empty(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            ..Self::default()
        }
    }

    /// Hubo elementos y el store no aceptó ninguno.
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.succeeded == 0
    }

    /// Objetos del catálogo afectados por los fallos, sin repetir y en orden
    /// de aparición.
    pub fn failed_origins(&self) -> Vec<(ObjectRef, String)> {
        let mut seen = HashSet::new();
        self.failures
            .iter()
            .filter(|failure| seen.insert(failure.origin.clone()))
            .map(|failure| (failure.origin.clone(), failure.reason.clone()))
            .collect()
    }

    /// Acumula otro resultado de la misma colección.
    pub fn merge(&mut self, other: FlushResult) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
        self.succeeded_ids.extend(other.succeeded_ids);
    }
}

/// Contadores acumulados de todos los volcados.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub flushes: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct IngestionBuffer {
    store: Arc<dyn VectorStore>,
    capacity: usize,
    capacity_overrides: HashMap<String, usize>,
    pending: BTreeMap<String, Vec<BufferedItem>>,
    stats: BufferStats,
}

impl IngestionBuffer {
    /// `capacity` se fuerza a un mínimo de 1.
    pub fn new(store: Arc<dyn VectorStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            capacity_overrides: HashMap::new(),
            pending: BTreeMap::new(),
            stats: BufferStats::default(),
        }
    }

    /// Capacidad distinta para una colección concreta.
    pub fn with_collection_capacity(mut self, collection: &str, capacity: usize) -> Self {
        self.capacity_overrides
            .insert(collection.to_string(), capacity.max(1));
        self
    }

    pub fn capacity_for(&self, collection: &str) -> usize {
        self.capacity_overrides
            .get(collection)
            .copied()
            .unwrap_or(self.capacity)
    }

    pub fn pending_len(&self, collection: &str) -> usize {
        self.pending.get(collection).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(Vec::is_empty)
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Encola un registro. Si la cola llega a su capacidad se vuelca antes de
    /// volver y se devuelve el resultado.
    pub async fn add(
        &mut self,
        collection: &str,
        origin: ObjectRef,
        object: StoreObject,
    ) -> Option<FlushResult> {
        let capacity = self.capacity_for(collection);
        let queue = self.pending.entry(collection.to_string()).or_default();
        queue.push(BufferedItem { origin, object });

        if queue.len() >= capacity {
            Some(self.flush(collection).await)
        } else {
            None
        }
    }

    /// Envía la cola de `collection` en un único lote y la vacía.
    pub async fn flush(&mut self, collection: &str) -> FlushResult {
        let items = self
            .pending
            .get_mut(collection)
            .map(std::mem::take)
            .unwrap_or_default();
        if items.is_empty() {
            return FlushResult::empty(collection);
        }

        let objects: Vec<StoreObject> = items.iter().map(|item| item.object.clone()).collect();
        let result = match self.store.insert_many(collection, &objects).await {
            Ok(outcome) => {
                let rejected: HashMap<Uuid, String> = outcome.failures.into_iter().collect();
                let mut result = FlushResult::empty(collection);
                result.attempted = items.len();
                for item in items {
                    match rejected.get(&item.object.id) {
                        Some(reason) => result.failures.push(FlushFailure {
                            origin: item.origin,
                            object: item.object,
                            reason: reason.clone(),
                        }),
                        None => {
                            result.succeeded += 1;
                            result.succeeded_ids.push(item.object.id);
                        }
                    }
                }
                result
            }
            Err(e) => {
                error!(
                    "El lote de {} registros para '{collection}' falló por completo: {e}",
                    items.len()
                );
                let mut result = FlushResult::empty(collection);
                result.attempted = items.len();
                result.failures = items
                    .into_iter()
                    .map(|item| FlushFailure {
                        origin: item.origin,
                        object: item.object,
                        reason: TRANSPORT_ERROR_REASON.to_string(),
                    })
                    .collect();
                result
            }
        };

        self.stats.flushes += 1;
        self.stats.attempted += result.attempted;
        self.stats.succeeded += result.succeeded;
        self.stats.failed += result.failures.len();

        if result.failures.is_empty() {
            info!("Volcados {} registros en '{collection}'", result.succeeded);
        } else {
            warn!(
                "Volcado en '{collection}': {} de {} registros rechazados",
                result.failures.len(),
                result.attempted
            );
        }
        result
    }

    /// Vacía todas las colecciones con registros pendientes. Debe llamarse al
    /// final de la ejecución por cualquier camino de salida.
    pub async fn force_flush_all(&mut self) -> Vec<FlushResult> {
        let collections: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(name, _)| name.clone())
            .collect();

        let mut results = Vec::with_capacity(collections.len());
        for collection in collections {
            results.push(self.flush(&collection).await);
        }
        results
    }
}

impl Drop for IngestionBuffer {
    fn drop(&mut self) {
        let unflushed: usize = self.pending.values().map(Vec::len).sum();
        if unflushed > 0 {
            error!("Se descartan {unflushed} registros sin volcar: falta force_flush_all");
        }
    }
}
