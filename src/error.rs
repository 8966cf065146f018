//! Taxonomía de errores de la ingesta.
//!
//! Los componentes de la librería devuelven estos tipos; el orquestador los
//! convierte en `FailureRecord` y los bordes de la aplicación (`main`,
//! configuración, monitor) trabajan con `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// La raíz del catálogo no se puede recorrer.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("la ruta del dataset no existe: {0}")]
    NotFound(PathBuf),
    #[error("la ruta del dataset no es un directorio: {0}")]
    NotADirectory(PathBuf),
    #[error("error leyendo {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fallos al combinar los embeddings de las vistas de un objeto.
#[derive(Debug, Error, PartialEq)]
pub enum AggregationError {
    #[error("no qualifying views")]
    NoViews,
    #[error("los embeddings de las vistas tienen dimensión 0")]
    ZeroDimensional,
    #[error("dimensionalidad inconsistente: la vista {index} tiene {found} dimensiones, se esperaban {expected}")]
    ShapeMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("el vector medio contiene valores no finitos en la dimensión {dimension}")]
    NonFinite { dimension: usize },
}

/// El vector no encaja con la dimensionalidad de la colección.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("el vector tiene {found} dimensiones, el store espera {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("vector vacío: el store no admite dimensión 0")]
    Empty,
}

/// Errores del cliente del vector store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// El store no responde o la llamada ha fallado a nivel de transporte.
    #[error("transport error: {0}")]
    Transport(String),
    /// El store ha respondido, pero con un estado o cuerpo inesperado.
    #[error("respuesta inesperada del store ({status}): {body}")]
    Unexpected { status: u16, body: String },
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Lote aceptado con fallos en algunos elementos.
#[derive(Debug, Error, PartialEq)]
#[error("{failed} de {attempted} registros rechazados por el store")]
pub struct PartialInsertError {
    pub attempted: usize,
    pub failed: usize,
}

/// Error de procesamiento de un objeto; su `Display` es el motivo que acaba
/// en el `FailureRecord`.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("batch insert rejected")]
    BatchRejected,
    #[error("missing vectors: {found} de {expected}")]
    MissingVectors { expected: usize, found: usize },
    #[error("no se pudo leer la vista {path}: {source}")]
    ReadView {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    PartialInsert(#[from] PartialInsertError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("embedding: {0}")]
    Embedding(String),
}
