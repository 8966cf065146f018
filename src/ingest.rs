//! Ingesta del catálogo en las dos colecciones de Weaviate: las vistas van a
//! la colección de subida, donde el vectorizador del store calcula sus
//! embeddings; se recuperan, se promedian y el vector del objeto se escribe
//! en la colección principal.
//!
//! Cada objeto pasa por las etapas de `ObjectStage`. Un fallo en cualquiera
//! de ellas se convierte en un `FailureRecord` y la ejecución sigue con el
//! siguiente objeto.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregate::{aggregate_images, mean_vector, DimensionGuard};
use crate::buffer::{FlushResult, IngestionBuffer};
use crate::config::{AppConfig, EmbeddingMode};
use crate::descriptions::{get_latest_descriptions, DescriptionResolver};
use crate::embedder::{ClipEmbedder, Embedder};
use crate::error::{AggregationError, IngestError, PartialInsertError, ScanError};
use crate::failures::FailureTracker;
use crate::models::{AggregateRecord, DatasetObject, ViewRecord};
use crate::scanner::{scan, CatalogScan};
use crate::vector_store::{ensure_collections, StoreObject, VectorStore};

/// Resumen de los resultados de una ejecución.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub objects_scanned: usize,
    /// Objetos cuyo agregado no ha sido rechazado por el store.
    pub objects_ingested: usize,
    pub failures_recorded: usize,
    pub views_uploaded: usize,
    pub records_flushed: usize,
    pub views_purged: usize,
    pub descriptions_missing: usize,
    pub interrupted: bool,
}

impl fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resumen: {} objetos escaneados, {} ingeridos, {} fallidos. {} vistas subidas, {} registros volcados, {} vistas purgadas, {} objetos sin descripción.",
            self.objects_scanned,
            self.objects_ingested,
            self.failures_recorded,
            self.views_uploaded,
            self.records_flushed,
            self.views_purged,
            self.descriptions_missing
        )?;
        if self.interrupted {
            write!(f, " (interrumpida)")?;
        }
        Ok(())
    }
}

/// Etapas del procesamiento de un objeto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStage {
    ScanningViews,
    UploadingViews,
    FetchingVectors,
    Aggregating,
    BufferingObject,
    PurgingViews,
}

impl fmt::Display for ObjectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ScanningViews => "SCANNING_VIEWS",
            Self::UploadingViews => "UPLOADING_VIEWS",
            Self::FetchingVectors => "FETCHING_VECTORS",
            Self::Aggregating => "AGGREGATING",
            Self::BufferingObject => "BUFFERING_OBJECT",
            Self::PurgingViews => "PURGING_VIEWS",
        };
        f.write_str(name)
    }
}

/// Estado `FAILED`: etapa en la que falló el objeto y motivo.
#[derive(Debug)]
pub struct StageError {
    pub stage: ObjectStage,
    pub error: IngestError,
}

fn at<E: Into<IngestError>>(stage: ObjectStage) -> impl FnOnce(E) -> StageError {
    move |error| StageError {
        stage,
        error: error.into(),
    }
}

/// Orquestador de la ingesta. Mantiene el buffer, el registro de fallos y
/// la dimensionalidad de la colección durante toda la ejecución.
pub struct Orchestrator {
    store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn Embedder>>,
    descriptions: DescriptionResolver,
    buffer: IngestionBuffer,
    failures: FailureTracker,
    guard: DimensionGuard,
    collection: String,
    upload_collection: String,
    mode: EmbeddingMode,
    delete_on_upload: bool,
    fetch_concurrency: usize,
    /// Vistas de cada objeto pendientes de purgar cuando su agregado se vuelque.
    pending_purges: HashMap<Uuid, Vec<Uuid>>,
    summary: IngestionSummary,
}

impl Orchestrator {
    pub fn new(
        cfg: &AppConfig,
        store: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn Embedder>>,
        descriptions: DescriptionResolver,
    ) -> Self {
        let buffer = IngestionBuffer::new(Arc::clone(&store), cfg.buffer_size)
            .with_collection_capacity(&cfg.upload_collection_name, cfg.upload_batch_size);
        Self {
            store,
            embedder,
            descriptions,
            buffer,
            failures: FailureTracker::new(),
            guard: DimensionGuard::new(cfg.vector_dimensions),
            collection: cfg.collection_name.clone(),
            upload_collection: cfg.upload_collection_name.clone(),
            mode: cfg.embedding_mode.clone(),
            delete_on_upload: cfg.delete_on_upload,
            fetch_concurrency: cfg.vector_fetch_concurrency.max(1),
            pending_purges: HashMap::new(),
            summary: IngestionSummary::default(),
        }
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    pub fn summary(&self) -> &IngestionSummary {
        &self.summary
    }

    /// Recorre el catálogo objeto a objeto. `shutdown` se consulta entre
    /// objetos; al activarse se deja de leer el catálogo pero los registros
    /// pendientes se vuelcan igualmente antes de volver.
    pub async fn run(&mut self, catalog: CatalogScan, shutdown: &AtomicBool) -> IngestionSummary {
        let total = catalog.len();

        for item in catalog {
            if shutdown.load(Ordering::SeqCst) {
                warn!("Interrupción recibida: se detiene el recorrido del catálogo");
                self.summary.interrupted = true;
                break;
            }
            self.summary.objects_scanned += 1;

            match item {
                Ok(object) => {
                    info!(
                        "[{}/{}] Procesando: {} ({} vistas)",
                        object.index + 1,
                        total,
                        object.catalog_key,
                        object.views.len()
                    );
                    self.process_object(&object).await;
                }
                Err(err) => self.record_scan_error(self.summary.objects_scanned - 1, err),
            }
        }

        self.finish().await;
        self.summary.clone()
    }

    /// Procesa un objeto completo. Devuelve `true` si su agregado quedó en el
    /// buffer de la colección principal.
    pub async fn process_object(&mut self, object: &DatasetObject) -> bool {
        let description = self.descriptions.resolve(&object.catalog_key);

        let outcome = match self.mode {
            EmbeddingMode::Store => self.ingest_via_store(object, description).await,
            EmbeddingMode::Clip => self.ingest_via_model(object, description).await,
        };

        match outcome {
            Ok(()) => {
                self.summary.objects_ingested += 1;
                true
            }
            Err(StageError { stage, error }) => {
                warn!("{} falló en {stage}", object.catalog_key);
                self.failures
                    .record(object.index, &object.catalog_key, error.to_string());
                false
            }
        }
    }

    /// Vuelca todo lo pendiente. Se llama al final de `run` por cualquier
    /// camino; si se usa `process_object` directamente hay que llamarlo a mano.
    pub async fn finish(&mut self) {
        for result in self.buffer.force_flush_all().await {
            if result.collection == self.collection {
                self.handle_primary_flush(result).await;
            } else {
                self.failures.record_flush(&result);
            }
        }
        self.summary.failures_recorded = self.failures.len();
        self.summary.descriptions_missing = self.descriptions.misses();
    }

    async fn ingest_via_store(
        &mut self,
        object: &DatasetObject,
        description: String,
    ) -> Result<(), StageError> {
        let origin = object.object_ref();

        // SCANNING_VIEWS
        if object.views.is_empty() {
            return Err(at(ObjectStage::ScanningViews)(AggregationError::NoViews));
        }
        let records = object
            .views
            .iter()
            .map(|view| {
                ViewRecord::from_view(view, &description).map_err(|source| IngestError::ReadView {
                    path: view.path.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(at(ObjectStage::ScanningViews))?;

        // UPLOADING_VIEWS: todas las vistas del objeto en un único lote.
        let mut upload = FlushResult::default();
        for record in &records {
            if let Some(flushed) = self
                .buffer
                .add(&self.upload_collection, origin.clone(), StoreObject::from(record))
                .await
            {
                upload.merge(flushed);
            }
        }
        upload.merge(self.buffer.flush(&self.upload_collection).await);

        if upload.all_failed() {
            if let Some(first) = upload.failures.first() {
                warn!("Lote de vistas de {} rechazado: {}", origin.catalog_key, first.reason);
            }
            return Err(at(ObjectStage::UploadingViews)(IngestError::BatchRejected));
        }
        if !upload.failures.is_empty() {
            return Err(at(ObjectStage::UploadingViews)(PartialInsertError {
                attempted: upload.attempted,
                failed: upload.failures.len(),
            }));
        }
        self.summary.views_uploaded += upload.succeeded;

        // FETCHING_VECTORS: concurrencia acotada, orden preservado.
        let view_ids: Vec<Uuid> = records.iter().map(|r| r.image_id).collect();
        let store = Arc::clone(&self.store);
        let collection = self.upload_collection.clone();
        let fetched: Vec<_> = stream::iter(view_ids.iter().copied())
            .map(|id| {
                let store = Arc::clone(&store);
                let collection = collection.clone();
                async move { store.fetch_by_id(&collection, id, true).await }
            })
            .buffered(self.fetch_concurrency)
            .collect()
            .await;

        let mut vectors = Vec::with_capacity(view_ids.len());
        for result in fetched {
            let found = result.map_err(at(ObjectStage::FetchingVectors))?;
            if let Some(vector) = found.and_then(|object| object.vector) {
                vectors.push(vector);
            }
        }
        if vectors.len() < view_ids.len() {
            return Err(at(ObjectStage::FetchingVectors)(IngestError::MissingVectors {
                expected: view_ids.len(),
                found: vectors.len(),
            }));
        }
        debug!("{} vectores recuperados para {}", vectors.len(), origin.catalog_key);

        // AGGREGATING
        let vector = mean_vector(&vectors).map_err(at(ObjectStage::Aggregating))?;

        // BUFFERING_OBJECT (PURGING_VIEWS se hace al volcar el agregado)
        self.buffer_aggregate(object, description, vector, view_ids)
            .await
            .map_err(at(ObjectStage::BufferingObject))
    }

    async fn ingest_via_model(
        &mut self,
        object: &DatasetObject,
        description: String,
    ) -> Result<(), StageError> {
        if object.views.is_empty() {
            return Err(at(ObjectStage::ScanningViews)(AggregationError::NoViews));
        }

        let embedder = self.embedder.clone().ok_or_else(|| {
            at(ObjectStage::Aggregating)(IngestError::Embedding(
                "no hay modelo de embedding configurado".to_string(),
            ))
        })?;
        let vector = aggregate_images(embedder.as_ref(), &object.views)
            .await
            .map_err(at(ObjectStage::Aggregating))?;

        self.buffer_aggregate(object, description, vector, Vec::new())
            .await
            .map_err(at(ObjectStage::BufferingObject))
    }

    async fn buffer_aggregate(
        &mut self,
        object: &DatasetObject,
        description: String,
        vector: Vec<f32>,
        view_ids: Vec<Uuid>,
    ) -> Result<(), IngestError> {
        let record = AggregateRecord::new(object.object_id, description, vector, &mut self.guard)?;

        if self.delete_on_upload && !view_ids.is_empty() {
            self.pending_purges.insert(record.object_id, view_ids);
        }

        if let Some(flushed) = self
            .buffer
            .add(&self.collection, object.object_ref(), StoreObject::from(&record))
            .await
        {
            self.handle_primary_flush(flushed).await;
        }
        Ok(())
    }

    async fn handle_primary_flush(&mut self, result: FlushResult) {
        self.summary.records_flushed += result.succeeded;
        let rejected = self.failures.record_flush(&result);
        self.summary.objects_ingested = self.summary.objects_ingested.saturating_sub(rejected);

        // Sin agregado durable no se purgan sus vistas.
        for failure in &result.failures {
            self.pending_purges.remove(&failure.id());
        }
        if !self.delete_on_upload {
            return;
        }

        let purge: Vec<Uuid> = result
            .succeeded_ids
            .iter()
            .filter_map(|id| self.pending_purges.remove(id))
            .flatten()
            .collect();
        if purge.is_empty() {
            return;
        }

        debug!("{}: purgando {} vistas", ObjectStage::PurgingViews, purge.len());
        match self.store.delete_many(&self.upload_collection, &purge).await {
            Ok(deleted) => self.summary.views_purged += deleted,
            Err(e) => warn!(
                "No se pudieron purgar {} vistas de '{}': {e}",
                purge.len(),
                self.upload_collection
            ),
        }
    }

    fn record_scan_error(&mut self, index: usize, err: ScanError) {
        let catalog_key = match &err {
            ScanError::Io { path, .. }
            | ScanError::NotFound(path)
            | ScanError::NotADirectory(path) => path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        self.failures.record(index, &catalog_key, err.to_string());
    }
}

/// Espera interrupciones. La primera activa `shutdown` para que la ejecución
/// termine de forma ordenada; devuelve `true` al recibir la segunda, y
/// `false` si no se pudo escuchar la señal.
pub async fn watch_interrupts<F, Fut>(mut next_signal: F, shutdown: &AtomicBool) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_signal().await.is_err() {
        return false;
    }
    warn!("Ctrl-C recibido: se termina el objeto en curso (otro Ctrl-C aborta)");
    shutdown.store(true, Ordering::SeqCst);
    next_signal().await.is_ok()
}

/// Ejecución completa: colecciones, descripciones, recorrido del catálogo,
/// volcado final e informe de fallos.
pub async fn run_ingestion(
    cfg: &AppConfig,
    store: Arc<dyn VectorStore>,
) -> Result<IngestionSummary> {
    ensure_collections(store.as_ref(), cfg).await?;

    let descriptions = get_latest_descriptions(cfg).await?;
    let catalog = scan(&cfg.dataset_path, cfg.scan_policy())?;
    info!(
        "{} objetos encontrados en {}",
        catalog.len(),
        cfg.dataset_path.display()
    );

    let embedder: Option<Arc<dyn Embedder>> = match cfg.embedding_mode {
        EmbeddingMode::Clip => Some(Arc::new(ClipEmbedder::from_config(cfg)?)),
        EmbeddingMode::Store => None,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let listener = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if watch_interrupts(tokio::signal::ctrl_c, &shutdown).await {
                error!("Segundo Ctrl-C: se aborta sin terminar el volcado");
                std::process::exit(130);
            }
        })
    };

    let mut orchestrator = Orchestrator::new(cfg, store, embedder, descriptions);
    let summary = orchestrator.run(catalog, &shutdown).await;
    listener.abort();

    orchestrator
        .failures()
        .write_report(&cfg.failure_report_path)?;
    info!("{summary}");

    Ok(summary)
}
