//! Carga y gestión de configuración de la ingesta (Weaviate + dataset + CLIP).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::scanner::ScanPolicy;

const DEFAULT_DESCRIPTIONS_URL: &str =
    "https://huggingface.co/datasets/tiange/Cap3D/resolve/main/Cap3D_automated_Objaverse_full.csv";

/// Camino usado para obtener el embedding de cada vista.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingMode {
    /// Ida y vuelta por la colección de subida (vectorizador del store).
    Store,
    /// Modelo CLIP invocado directamente.
    Clip,
}

impl EmbeddingMode {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "store" => Ok(Self::Store),
            "clip" => Ok(Self::Clip),
            other => Err(anyhow!("Modo de embedding no soportado: {other}")),
        }
    }
}

/// Configuración completa de la ingesta.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub weaviate_url: Url,
    pub init_timeout: Duration,
    pub query_timeout: Duration,
    pub insert_timeout: Duration,

    pub collection_name: String,
    pub upload_collection_name: String,
    pub buffer_size: usize,
    pub upload_batch_size: usize,
    pub recreate_collections: bool,
    pub delete_on_upload: bool,

    pub dataset_path: PathBuf,
    pub image_extension: String,
    pub image_delimiter: String,

    pub embedding_mode: EmbeddingMode,
    pub clip_inference_url: Url,
    pub vector_dimensions: Option<usize>,
    pub vector_fetch_concurrency: usize,

    pub descriptions_file: PathBuf,
    pub descriptions_url: String,
    pub performing_checksum: bool,
    pub requests_timeout: Duration,

    pub failure_report_path: PathBuf,

    pub monitor_query: String,
    pub monitor_limit: usize,
    pub monitor_sample_ids: Vec<String>,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de claves.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let weaviate_url = Url::parse(&get("WEAVIATE_URL", "http://localhost:8080"))
            .context("WEAVIATE_URL no es una URL válida")?;
        let clip_inference_url = Url::parse(&get("CLIP_INFERENCE_URL", "http://localhost:8081"))
            .context("CLIP_INFERENCE_URL no es una URL válida")?;

        let buffer_size: usize = parse(&lookup, "BUFFER_SIZE", 500)?;
        let upload_batch_size: usize = parse(&lookup, "UPLOAD_BATCH_SIZE", 500)?;
        if buffer_size == 0 || upload_batch_size == 0 {
            return Err(anyhow!("BUFFER_SIZE y UPLOAD_BATCH_SIZE deben ser positivos"));
        }

        let vector_dimensions = match lookup("VECTOR_DIMENSIONS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<usize>()
                    .map_err(|e| anyhow!("VECTOR_DIMENSIONS inválido ({raw}): {e}"))?,
            ),
            None => None,
        };

        let monitor_sample_ids = get("MONITOR_SAMPLE_IDS", "")
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            weaviate_url,
            init_timeout: Duration::from_secs(parse(&lookup, "WEAVIATE_INIT_TIMEOUT_S", 2)?),
            query_timeout: Duration::from_secs(parse(&lookup, "WEAVIATE_QUERY_TIMEOUT_S", 45)?),
            insert_timeout: Duration::from_secs(parse(&lookup, "WEAVIATE_INSERT_TIMEOUT_S", 120)?),

            collection_name: get("COLLECTION_NAME", "Cap3DMM"),
            upload_collection_name: get("UPLOAD_COLLECTION_NAME", "UploadCap3DMM"),
            buffer_size,
            upload_batch_size,
            recreate_collections: parse_bool(&lookup, "RECREATE_COLLECTIONS", false)?,
            delete_on_upload: parse_bool(&lookup, "DELETE_ON_UPLOAD", false)?,

            dataset_path: PathBuf::from(get("DATASET_PATH", "./Cap3D_Objaverse_renderimgs")),
            image_extension: get("IMAGE_FILE_EXTENSION", ".png"),
            image_delimiter: get("IMAGE_FILE_DELIMITER", "_"),

            embedding_mode: EmbeddingMode::from_str(&get("EMBEDDING_MODE", "store"))?,
            clip_inference_url,
            vector_dimensions,
            vector_fetch_concurrency: parse::<usize, _>(&lookup, "VECTOR_FETCH_CONCURRENCY", 4)?
                .max(1),

            descriptions_file: PathBuf::from(get(
                "DESCRIPTIONS_FILE",
                "Cap3D_automated_Objaverse_full.csv",
            )),
            descriptions_url: get("DESCRIPTIONS_URL", DEFAULT_DESCRIPTIONS_URL),
            performing_checksum: parse_bool(&lookup, "PERFORMING_CHECKSUM", true)?,
            requests_timeout: Duration::from_secs(parse(&lookup, "REQUESTS_TIMEOUT_S", 60)?),

            failure_report_path: PathBuf::from(get("FAILURE_REPORT_PATH", "failed_objects.json")),

            monitor_query: get("MONITOR_QUERY", "a chair"),
            monitor_limit: parse(&lookup, "MONITOR_LIMIT", 5)?,
            monitor_sample_ids,
        })
    }

    pub fn scan_policy(&self) -> ScanPolicy {
        ScanPolicy {
            extension: self.image_extension.clone(),
            delimiter: self.image_delimiter.clone(),
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Valor inválido para {key} ({raw}): {e}")),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(anyhow!("Valor booleano inválido para {key}: {other}")),
    }
}
