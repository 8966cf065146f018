//! Descripciones de los objetos (CSV de Cap3D): descarga, verificación y
//! resolución por clave de catálogo.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::checksum::{perform_checksum, pointer_url_for};
use crate::config::AppConfig;

/// Mapa clave de catálogo → descripción. Un objeto sin descripción se ingiere
/// con descripción vacía; sólo se cuenta.
#[derive(Debug, Default)]
pub struct DescriptionResolver {
    descriptions: HashMap<String, String>,
    misses: AtomicUsize,
}

impl DescriptionResolver {
    pub fn new(descriptions: HashMap<String, String>) -> Self {
        Self {
            descriptions,
            misses: AtomicUsize::new(0),
        }
    }

    pub fn resolve(&self, catalog_key: &str) -> String {
        match self.descriptions.get(catalog_key) {
            Some(description) => description.clone(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Sin descripción para {catalog_key}");
                String::new()
            }
        }
    }

    /// Número de búsquedas sin descripción hasta el momento.
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }
}

/// Lee el CSV sin cabecera `datasetUID,description`; ante duplicados se
/// queda con la primera aparición.
pub fn load_descriptions(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("no se pudo abrir {}", path.display()))?;

    let mut descriptions = HashMap::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("CSV mal formado en {}", path.display()))?;
        let (Some(uid), Some(description)) = (record.get(0), record.get(1)) else {
            continue;
        };
        descriptions
            .entry(uid.to_string())
            .or_insert_with(|| description.to_string());
    }
    Ok(descriptions)
}

/// Devuelve el mapa de descripciones, descargando el CSV si no existe en
/// disco o si su checksum no coincide con el publicado.
pub async fn get_latest_descriptions(cfg: &AppConfig) -> Result<DescriptionResolver> {
    let path = cfg.descriptions_file.as_path();
    info!("Obteniendo descripciones desde {}", path.display());

    let client = Client::builder()
        .timeout(cfg.requests_timeout)
        .build()
        .context("no se pudo construir el cliente HTTP")?;

    let needs_download = if !path.exists() {
        info!("El fichero de descripciones no existe, descargando");
        true
    } else if cfg.performing_checksum {
        let pointer_url = pointer_url_for(&cfg.descriptions_url);
        match perform_checksum(&client, path, &pointer_url).await {
            Ok(true) => false,
            Ok(false) => {
                info!("Hay una versión más reciente del fichero de descripciones, descargando");
                true
            }
            Err(e) => {
                warn!("No se pudo verificar el checksum ({e}); se usa el fichero local");
                false
            }
        }
    } else {
        false
    };

    if needs_download {
        if let Err(e) = download_file(&client, &cfg.descriptions_url, path).await {
            if !path.exists() {
                return Err(e);
            }
            warn!("Descarga fallida ({e:#}); se usa el fichero local existente");
        }
    }

    let descriptions = load_descriptions(path)?;
    info!("{} descripciones cargadas", descriptions.len());
    Ok(DescriptionResolver::new(descriptions))
}

/// Descarga por bloques a un fichero temporal y lo renombra al terminar.
async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let mut response = client.get(url).send().await?.error_for_status()?;

    let partial = partial_path(dest);
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("no se pudo crear {}", partial.display()))?;

    let mut written = 0usize;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len();
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, dest).await?;
    info!("Descargados {written} bytes en {}", dest.display());
    Ok(())
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_known_keys_and_counts_misses() {
        let resolver = DescriptionResolver::new(HashMap::from([(
            "obj1".to_string(),
            "a red chair".to_string(),
        )]));
        assert_eq!(resolver.resolve("obj1"), "a red chair");
        assert_eq!(resolver.resolve("obj2"), "");
        assert_eq!(resolver.resolve("obj3"), "");
        assert_eq!(resolver.misses(), 2);
    }

    #[test]
    fn csv_keeps_first_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captions.csv");
        fs::write(
            &path,
            "obj1,a red chair\nobj2,\"a table, wooden\"\nobj1,a blue chair\nlonely\n",
        )
        .unwrap();

        let descriptions = load_descriptions(&path).unwrap();
        assert_eq!(descriptions.len(), 2);
        assert_eq!(descriptions["obj1"], "a red chair");
        assert_eq!(descriptions["obj2"], "a table, wooden");
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/captions.csv")),
            PathBuf::from("/tmp/captions.csv.part")
        );
    }

    #[tokio::test]
    async fn local_file_is_used_without_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captions.csv");
        fs::write(&path, "obj1,a red chair\n").unwrap();

        let path_str = path.to_string_lossy().to_string();
        let cfg = AppConfig::from_lookup(|key| match key {
            "DESCRIPTIONS_FILE" => Some(path_str.clone()),
            "PERFORMING_CHECKSUM" => Some("false".to_string()),
            _ => None,
        })
        .unwrap();

        let resolver = tokio_test::assert_ok!(get_latest_descriptions(&cfg).await);
        assert_eq!(resolver.len(), 1);
        assert_eq!(resolver.resolve("obj1"), "a red chair");
    }
}
