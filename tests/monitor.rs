mod common;

use cap3d_ingest::ids::derive_id;
use cap3d_ingest::monitor::run_monitor;
use cap3d_ingest::vector_store::{ensure_collections, StoreObject, VectorStore};
use common::{test_config, FakeEmbedder, FakeStore};
use serde_json::{Map, Value};
use tempfile::tempdir;

fn aggregate(key: &str, description: &str, vector: Vec<f32>) -> StoreObject {
    let mut properties = Map::new();
    properties.insert("description".into(), Value::String(description.into()));
    properties.insert("datasetUID".into(), Value::String(derive_id(key).to_string()));
    StoreObject {
        id: derive_id(key),
        properties,
        vector: Some(vector),
    }
}

#[tokio::test]
async fn report_counts_searches_and_reads_samples() {
    let dataset = tempdir().unwrap();
    let sample = derive_id("chair").to_string();
    let missing = derive_id("nope").to_string();
    let samples = format!("{sample}, {missing}, not-a-uuid");
    let cfg = test_config(
        dataset.path(),
        &[("MONITOR_LIMIT", "1"), ("MONITOR_SAMPLE_IDS", samples.as_str())],
    );

    let store = FakeStore::new();
    ensure_collections(store.as_ref(), &cfg).await.unwrap();
    store
        .insert_many(
            "Cap3DMM",
            &[
                aggregate("chair", "a red chair", vec![1.0, 0.0, 0.0]),
                aggregate("lamp", "a desk lamp", vec![0.0, 1.0, 0.0]),
            ],
        )
        .await
        .unwrap();
    let embedder = FakeEmbedder {
        text_vector: vec![0.9, 0.1, 0.0],
    };

    let report = run_monitor(&cfg, store.as_ref(), &embedder).await.unwrap();

    assert_eq!(report.collection_count, 2);
    assert_eq!(report.upload_count, 0);
    assert_eq!(report.query, "a chair");
    assert_eq!(report.hits.len(), 1);
    assert_eq!(report.hits[0].properties["description"], "a red chair");

    // El id inválido se descarta; el inexistente se informa sin dimensiones.
    assert_eq!(report.samples.len(), 2);
    assert_eq!(report.samples[0].dimensions, Some(3));
    assert_eq!(report.samples[1].dimensions, None);

    let text = report.to_string();
    assert!(text.contains("Número de objetos en la colección Cap3DMM: 2"));
    assert!(text.contains("a red chair"));
}
