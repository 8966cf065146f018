//! Función de embedding externa (camino directo, sin el vectorizador del store).
//!
//! Se habla con el contenedor de inferencia CLIP que también usa el módulo
//! `multi2vec-clip` de Weaviate, así que los vectores locales y los calculados
//! por el store viven en el mismo espacio.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{IngestError, StoreError};
use crate::models::ViewImage;

/// Modelo caja negra imagen → vector, determinista por versión del modelo.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Un embedding por vista, en el mismo orden.
    async fn encode(&self, views: &[ViewImage]) -> Result<Vec<Vec<f32>>, IngestError>;

    /// Embeddings de texto en el mismo espacio (consultas del monitor).
    async fn encode_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError>;
}

/// Cliente del servicio de inferencia CLIP (`POST /vectorize`).
#[derive(Debug, Clone)]
pub struct ClipEmbedder {
    client: Client,
    endpoint: String,
}

impl ClipEmbedder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("no se pudo construir el cliente HTTP de CLIP")?;
        Ok(Self {
            client,
            endpoint: format!("{}/vectorize", base_url.trim_end_matches('/')),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Self::new(cfg.clip_inference_url.as_str(), cfg.query_timeout)
    }

    async fn vectorize(
        &self,
        request: &VectorizeRequest,
    ) -> Result<VectorizeResponse, IngestError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(StoreError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Embedding(format!(
                "la inferencia CLIP respondió {status}: {body}"
            )));
        }

        let payload: VectorizeResponse = response.json().await.map_err(StoreError::from)?;
        if let Some(error) = payload.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(IngestError::Embedding(error.to_string()));
        }
        Ok(payload)
    }
}

#[async_trait]
impl Embedder for ClipEmbedder {
    async fn encode(&self, views: &[ViewImage]) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut images = Vec::with_capacity(views.len());
        for view in views {
            let encoded = view.read_base64().map_err(|source| IngestError::ReadView {
                path: view.path.clone(),
                source,
            })?;
            images.push(encoded);
        }

        debug!("Vectorizando {} imágenes con CLIP", images.len());
        let response = self
            .vectorize(&VectorizeRequest {
                texts: Vec::new(),
                images,
            })
            .await?;
        Ok(response.image_vectors)
    }

    async fn encode_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let response = self
            .vectorize(&VectorizeRequest {
                texts: texts.to_vec(),
                images: Vec::new(),
            })
            .await?;
        Ok(response.text_vectors)
    }
}

#[derive(Debug, Serialize)]
struct VectorizeRequest {
    texts: Vec<String>,
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VectorizeResponse {
    #[serde(default)]
    text_vectors: Vec<Vec<f32>>,
    #[serde(default)]
    image_vectors: Vec<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}
