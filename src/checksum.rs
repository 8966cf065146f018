//! Verificación SHA-256 de ficheros descargados contra un fichero puntero
//! remoto (formato LFS: una línea `oid sha256:<hex>`).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Hash SHA-256 en hexadecimal.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Extrae el hash de la primera línea `oid sha256:` del fichero puntero.
pub fn extract_sha256_from_pointer(pointer: &str) -> Option<String> {
    pointer
        .lines()
        .find(|line| line.to_lowercase().starts_with("oid sha256:"))
        .and_then(|line| line.split_once("sha256:"))
        .map(|(_, hash)| hash.trim().to_string())
}

/// Hash SHA-256 de un fichero, leído por bloques.
pub fn file_sha256(path: &Path) -> Result<String> {
    debug!("Calculando checksum de {}", path.display());
    let file = File::open(path).with_context(|| format!("no se pudo abrir {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// URL del fichero puntero a partir de la URL de descarga de HuggingFace.
pub fn pointer_url_for(download_url: &str) -> String {
    let without_query = download_url.split('?').next().unwrap_or(download_url);
    without_query.replacen("resolve", "raw", 1)
}

/// Compara el hash del fichero local con el publicado en el puntero remoto.
pub async fn perform_checksum(client: &Client, path: &Path, pointer_url: &str) -> Result<bool> {
    let file_hash = file_sha256(path)?;
    info!("Checksum local de {}: {file_hash}", path.display());

    info!("Solicitando fichero puntero: {pointer_url}");
    let pointer = client
        .get(pointer_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let expected = extract_sha256_from_pointer(&pointer);
    info!("Checksum esperado según el puntero: {:?}", expected);

    Ok(expected.as_deref() == Some(file_hash.as_str()))
}
