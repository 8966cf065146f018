//! Cliente REST de Weaviate: implementación de `VectorStore`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::vector_store::{
    CollectionSpec, DataType, FetchedObject, InsertOutcome, SearchHit, StoreObject, VectorStore,
    VectorizerSpec,
};

/// Conexión con un nodo de Weaviate. Se abre una vez por ejecución.
#[derive(Debug, Clone)]
pub struct WeaviateClient {
    client: Client,
    base: Url,
    query_timeout: std::time::Duration,
    insert_timeout: std::time::Duration,
}

/// Conecta y comprueba que el nodo esté vivo; si no lo está, no hay nada que
/// hacer y la ejecución aborta.
pub async fn connect_from_config(cfg: &AppConfig) -> Result<WeaviateClient> {
    info!("Conectando a Weaviate en {}...", cfg.weaviate_url);
    let client = Client::builder()
        .connect_timeout(cfg.init_timeout)
        .build()?;
    let weaviate = WeaviateClient {
        client,
        base: cfg.weaviate_url.clone(),
        query_timeout: cfg.query_timeout,
        insert_timeout: cfg.insert_timeout,
    };

    match weaviate.is_live().await {
        Ok(true) => {
            info!("Conexión a Weaviate OK");
            Ok(weaviate)
        }
        Ok(false) => Err(anyhow!("Weaviate client is not live")),
        Err(e) => Err(anyhow!("Weaviate no responde: {e}")),
    }
}

impl WeaviateClient {
    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.base
            .join(path)
            .map_err(|e| StoreError::Transport(format!("URL inválida para {path}: {e}")))
    }

    async fn graphql(&self, query: String) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(self.endpoint("/v1/graphql")?)
            .timeout(self.query_timeout)
            .json(&json!({ "query": query }))
            .send()
            .await?;
        let body: Value = expect_success(response).await?.json().await?;

        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            return Err(StoreError::Unexpected {
                status: 200,
                body: errors.to_string(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl VectorStore for WeaviateClient {
    async fn is_live(&self) -> Result<bool, StoreError> {
        let response = self
            .client
            .get(self.endpoint("/v1/.well-known/live")?)
            .timeout(self.query_timeout)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/v1/schema/{name}"))?)
            .timeout(self.query_timeout)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response).await?;
        Ok(true)
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.endpoint("/v1/schema")?)
            .timeout(self.query_timeout)
            .json(&class_definition(spec))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.endpoint(&format!("/v1/schema/{name}"))?)
            .timeout(self.query_timeout)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response).await?;
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &str,
        objects: &[StoreObject],
    ) -> Result<InsertOutcome, StoreError> {
        if objects.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let payload: Vec<Value> = objects
            .iter()
            .map(|object| {
                let mut body = json!({
                    "class": collection,
                    "id": object.id,
                    "properties": object.properties,
                });
                if let Some(vector) = &object.vector {
                    body["vector"] = json!(vector);
                }
                body
            })
            .collect();

        debug!("Enviando lote de {} objetos a '{collection}'", objects.len());
        let response = self
            .client
            .post(self.endpoint("/v1/batch/objects")?)
            .timeout(self.insert_timeout)
            .json(&json!({ "objects": payload }))
            .send()
            .await?;
        let items: Vec<BatchItem> = expect_success(response).await?.json().await?;

        Ok(batch_outcome(objects, &items))
    }

    async fn fetch_by_id(
        &self,
        collection: &str,
        id: Uuid,
        include_vector: bool,
    ) -> Result<Option<FetchedObject>, StoreError> {
        let mut url = self.endpoint(&format!("/v1/objects/{collection}/{id}"))?;
        if include_vector {
            url.set_query(Some("include=vector"));
        }

        let response = self
            .client
            .get(url)
            .timeout(self.query_timeout)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let object: ObjectResponse = expect_success(response).await?.json().await?;
        Ok(Some(object.into_fetched(id)))
    }

    async fn delete_many(&self, collection: &str, ids: &[Uuid]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let response = self
            .client
            .delete(self.endpoint("/v1/batch/objects")?)
            .timeout(self.insert_timeout)
            .json(&json!({
                "match": {
                    "class": collection,
                    "where": {
                        "path": ["id"],
                        "operator": "ContainsAny",
                        "valueTextArray": ids,
                    },
                },
                "output": "minimal",
            }))
            .send()
            .await?;
        let body: DeleteResponse = expect_success(response).await?.json().await?;
        Ok(body.results.successful)
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        let body = self
            .graphql(format!("{{ Aggregate {{ {collection} {{ meta {{ count }} }} }} }}"))
            .await?;
        parse_count(&body, collection)
    }

    async fn near_vector(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        properties: &[&str],
    ) -> Result<Vec<SearchHit>, StoreError> {
        let vector =
            serde_json::to_string(vector).map_err(|e| StoreError::Transport(e.to_string()))?;
        let fields = properties.join(" ");
        let body = self
            .graphql(format!(
                "{{ Get {{ {collection}(nearVector: {{vector: {vector}}}, limit: {limit}) \
                 {{ {fields} _additional {{ id distance }} }} }} }}"
            ))
            .await?;
        Ok(parse_hits(&body, collection))
    }
}

async fn expect_success(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<cuerpo no disponible>".to_string());
    Err(StoreError::Unexpected {
        status: status.as_u16(),
        body,
    })
}

/// Traduce la especificación de colección a una clase del esquema de Weaviate.
fn class_definition(spec: &CollectionSpec) -> Value {
    let properties: Vec<Value> = spec
        .properties
        .iter()
        .map(|p| {
            let data_type = match p.data_type {
                DataType::Text => "text",
                DataType::Blob => "blob",
            };
            json!({
                "name": p.name,
                "dataType": [data_type],
                "description": p.description,
            })
        })
        .collect();

    let mut class = json!({
        "class": spec.name,
        "description": spec.description,
        "properties": properties,
        "vectorIndexType": "hnsw",
        "vectorIndexConfig": { "distance": "cosine" },
    });

    match &spec.vectorizer {
        VectorizerSpec::None => {
            class["vectorizer"] = json!("none");
        }
        VectorizerSpec::Multi2VecClip {
            image_fields,
            text_fields,
        } => {
            let names = |fields: &[(String, f32)]| {
                fields.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>()
            };
            let weights = |fields: &[(String, f32)]| {
                fields.iter().map(|(_, w)| *w).collect::<Vec<_>>()
            };
            class["vectorizer"] = json!("multi2vec-clip");
            class["moduleConfig"] = json!({
                "multi2vec-clip": {
                    "imageFields": names(image_fields.as_slice()),
                    "textFields": names(text_fields.as_slice()),
                    "weights": {
                        "imageFields": weights(image_fields.as_slice()),
                        "textFields": weights(text_fields.as_slice()),
                    },
                },
            });
        }
    }

    class
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    result: Option<BatchItemResult>,
}

#[derive(Debug, Deserialize)]
struct BatchItemResult {
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    error: Vec<BatchErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct BatchErrorMessage {
    message: String,
}

/// Cuenta éxitos y recoge los rechazos de la respuesta de `/v1/batch/objects`.
/// Los elementos que no aparecen en la respuesta se dan por rechazados.
fn batch_outcome(objects: &[StoreObject], items: &[BatchItem]) -> InsertOutcome {
    let mut outcome = InsertOutcome::default();

    for (position, object) in objects.iter().enumerate() {
        let item = items
            .iter()
            .find(|item| item.id == Some(object.id))
            .or_else(|| items.get(position).filter(|item| item.id.is_none()));

        let Some(item) = item else {
            outcome
                .failures
                .push((object.id, "sin respuesta del store para el objeto".to_string()));
            continue;
        };

        let messages: Vec<&str> = item
            .result
            .as_ref()
            .and_then(|r| r.errors.as_ref())
            .map(|e| e.error.iter().map(|m| m.message.as_str()).collect())
            .unwrap_or_default();

        if messages.is_empty() {
            outcome.succeeded += 1;
        } else {
            outcome.failures.push((object.id, messages.join("; ")));
        }
    }

    outcome
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
    #[serde(default)]
    vectors: Option<std::collections::HashMap<String, Vec<f32>>>,
}

impl ObjectResponse {
    fn into_fetched(self, requested: Uuid) -> FetchedObject {
        // Con vectores con nombre el vector por defecto se llama "default".
        let vector = self
            .vector
            .filter(|v| !v.is_empty())
            .or_else(|| self.vectors.and_then(|mut named| named.remove("default")));
        FetchedObject {
            id: self.id.unwrap_or(requested),
            properties: self.properties,
            vector,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    results: DeleteResults,
}

#[derive(Debug, Deserialize)]
struct DeleteResults {
    #[serde(default)]
    successful: usize,
}

fn parse_count(body: &Value, collection: &str) -> Result<u64, StoreError> {
    body.pointer(&format!("/data/Aggregate/{collection}/0/meta/count"))
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::Unexpected {
            status: 200,
            body: body.to_string(),
        })
}

fn parse_hits(body: &Value, collection: &str) -> Vec<SearchHit> {
    let Some(rows) = body
        .pointer(&format!("/data/Get/{collection}"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(Value::as_object)
        .map(|row| {
            let mut properties = row.clone();
            let additional = properties.remove("_additional");
            let id = additional
                .as_ref()
                .and_then(|a| a.get("id"))
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok());
            let distance = additional
                .as_ref()
                .and_then(|a| a.get("distance"))
                .and_then(Value::as_f64)
                .map(|d| d as f32);
            SearchHit {
                id,
                properties,
                distance,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::derive_id;
    use crate::vector_store::{primary_collection, upload_collection};

    fn object(key: &str) -> StoreObject {
        StoreObject {
            id: derive_id(key),
            properties: Map::new(),
            vector: None,
        }
    }

    #[test]
    fn primary_class_has_no_vectorizer() {
        let class = class_definition(&primary_collection("Cap3DMM"));
        assert_eq!(class["class"], "Cap3DMM");
        assert_eq!(class["vectorizer"], "none");
        assert_eq!(class["vectorIndexConfig"]["distance"], "cosine");
        assert_eq!(class["properties"][1]["name"], "datasetUID");
        assert!(class.get("moduleConfig").is_none());
    }

    #[test]
    fn upload_class_configures_multi2vec_clip() {
        let class = class_definition(&upload_collection("UploadCap3DMM"));
        assert_eq!(class["vectorizer"], "multi2vec-clip");
        let module = &class["moduleConfig"]["multi2vec-clip"];
        assert_eq!(module["imageFields"], json!(["image"]));
        assert_eq!(module["textFields"], json!(["description"]));
        assert_eq!(module["weights"]["imageFields"][0].as_f64().map(|w| (w * 10.0).round()), Some(9.0));
        assert_eq!(class["properties"][0]["dataType"], json!(["blob"]));
    }

    #[test]
    fn batch_outcome_collects_item_errors() {
        let objects = vec![object("a"), object("b"), object("c")];
        let raw = json!([
            { "id": derive_id("a"), "result": {} },
            { "id": derive_id("b"), "result": { "errors": { "error": [ { "message": "vector lengths don't match" } ] } } },
        ]);
        let items: Vec<BatchItem> = serde_json::from_value(raw).unwrap();

        let outcome = batch_outcome(&objects, &items);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0], (derive_id("b"), "vector lengths don't match".to_string()));
        assert_eq!(outcome.failures[1].0, derive_id("c"));
    }

    #[test]
    fn fetched_object_prefers_default_named_vector_when_plain_is_absent() {
        let raw = json!({
            "id": derive_id("a"),
            "properties": { "datasetUID": "a" },
            "vectors": { "default": [0.5, 1.5] },
        });
        let parsed: ObjectResponse = serde_json::from_value(raw).unwrap();
        let fetched = parsed.into_fetched(derive_id("a"));
        assert_eq!(fetched.vector, Some(vec![0.5, 1.5]));
        assert_eq!(fetched.properties["datasetUID"], "a");
    }

    #[test]
    fn parses_aggregate_count() {
        let body = json!({ "data": { "Aggregate": { "Cap3DMM": [ { "meta": { "count": 42 } } ] } } });
        assert_eq!(parse_count(&body, "Cap3DMM").unwrap(), 42);
        assert!(parse_count(&json!({ "data": {} }), "Cap3DMM").is_err());
    }

    #[test]
    fn parses_search_hits() {
        let id = derive_id("obj1");
        let body = json!({ "data": { "Get": { "Cap3DMM": [
            { "description": "a red chair", "datasetUID": id, "_additional": { "id": id, "distance": 0.125 } }
        ] } } });
        let hits = parse_hits(&body, "Cap3DMM");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, Some(id));
        assert_eq!(hits[0].distance, Some(0.125));
        assert_eq!(hits[0].properties["description"], "a red chair");
        assert!(hits[0].properties.get("_additional").is_none());
    }
}
