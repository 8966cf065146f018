//! Ingesta del dataset multivista Cap3D/Objaverse en Weaviate: un vector
//! agregado por objeto a partir de los embeddings de sus vistas.

// Módulos de la librería
pub mod aggregate;
pub mod buffer;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod descriptions;
pub mod embedder;
pub mod error;
pub mod failures;
pub mod ids;
pub mod ingest;
pub mod models;
pub mod monitor;
pub mod scanner;
pub mod vector_store;
pub mod weaviate_client;
