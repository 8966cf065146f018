//! Monitorización de las colecciones: recuentos, una consulta de similitud
//! de ejemplo y lectura de objetos concretos con su vector.
//!
//! Flujo:
//!   1. Recuento de objetos de la colección principal y de la de subida.
//!   2. Vectorización del texto de consulta con el mismo modelo CLIP.
//!   3. Búsqueda `nearVector` sobre la colección principal.
//!   4. Lectura con vector de los ids de muestra configurados.

use std::fmt;

use anyhow::{anyhow, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::embedder::Embedder;
use crate::vector_store::{SearchHit, VectorStore};

/// Resultado de la lectura de un id de muestra.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFetch {
    pub id: Uuid,
    /// Dimensiones del vector; `None` si el objeto no existe.
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub collection: String,
    pub collection_count: u64,
    pub upload_collection: String,
    pub upload_count: u64,
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub samples: Vec<SampleFetch>,
}

impl fmt::Display for MonitorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Número de objetos en la colección {}: {}",
            self.collection, self.collection_count
        )?;
        writeln!(
            f,
            "Número de objetos en la colección {}: {}",
            self.upload_collection, self.upload_count
        )?;
        writeln!(f, "\nConsulta: \"{}\"", self.query)?;
        for hit in &self.hits {
            let text = |key: &str| {
                hit.properties
                    .get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            writeln!(f, "{} {}", text("description"), text("datasetUID"))?;
            if let Some(distance) = hit.distance {
                writeln!(f, "Distancia a la consulta: {distance:.3}\n")?;
            }
        }
        for sample in &self.samples {
            match sample.dimensions {
                Some(dims) => writeln!(f, "Objeto {}: {dims} dimensiones", sample.id)?,
                None => writeln!(f, "Objeto {}: no encontrado", sample.id)?,
            }
        }
        Ok(())
    }
}

pub async fn run_monitor(
    cfg: &AppConfig,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
) -> Result<MonitorReport> {
    // 1) Recuentos
    let collection_count = store.count(&cfg.collection_name).await?;
    let upload_count = store.count(&cfg.upload_collection_name).await?;
    info!(
        "Recuentos: {}={collection_count}, {}={upload_count}",
        cfg.collection_name, cfg.upload_collection_name
    );

    // 2) Embedding de la consulta
    let query_vectors = embedder
        .encode_texts(&[cfg.monitor_query.clone()])
        .await?;
    let query_vector = query_vectors
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No se pudo generar el embedding de la consulta"))?;

    // 3) Búsqueda por similitud
    let hits = store
        .near_vector(
            &cfg.collection_name,
            &query_vector,
            cfg.monitor_limit,
            &["description", "datasetUID"],
        )
        .await?;

    // 4) Ids de muestra
    let mut samples = Vec::new();
    for raw in &cfg.monitor_sample_ids {
        let Ok(id) = Uuid::parse_str(raw) else {
            warn!("Id de muestra inválido: {raw}");
            continue;
        };
        let fetched = store.fetch_by_id(&cfg.collection_name, id, true).await?;
        samples.push(SampleFetch {
            id,
            dimensions: fetched.map(|o| o.vector.map_or(0, |v| v.len())),
        });
    }

    Ok(MonitorReport {
        collection: cfg.collection_name.clone(),
        collection_count,
        upload_collection: cfg.upload_collection_name.clone(),
        upload_count,
        query: cfg.monitor_query.clone(),
        hits,
        samples,
    })
}
