use std::sync::Arc;

use anyhow::Result;
use cap3d_ingest::cli::{Cli, Mode};
use cap3d_ingest::{config, embedder::ClipEmbedder, ingest, monitor, weaviate_client};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env()?;

    // 3. Conectar a Weaviate; si no está vivo no hay nada que hacer
    let store = Arc::new(weaviate_client::connect_from_config(&cfg).await?);

    // 4. Ejecutar el modo pedido
    match cli.mode {
        Mode::Ingest => {
            let summary = ingest::run_ingestion(&cfg, store).await?;
            println!("{summary}");
        }
        Mode::Monitor => {
            let embedder = ClipEmbedder::from_config(&cfg)?;
            let report = monitor::run_monitor(&cfg, store.as_ref(), &embedder).await?;
            println!("{report}");
        }
    }

    info!("✅ Conexión con Weaviate cerrada.");
    Ok(())
}
