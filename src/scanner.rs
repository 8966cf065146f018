//! Recorrido del catálogo: una carpeta por objeto, con sus vistas renderizadas.
//!
//! Tanto los objetos como las vistas se devuelven ordenados por nombre para
//! que la agregación, los lotes y los ids sean reproducibles entre ejecuciones.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::ScanError;
use crate::models::{DatasetObject, ViewImage};

/// Qué ficheros cuentan como vista de un objeto.
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    /// Extensión con punto, p. ej. `.png`.
    pub extension: String,
    /// Los renders auxiliares (profundidad, normales) llevan este delimitador.
    pub delimiter: String,
}

impl ScanPolicy {
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let suffix = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        suffix == self.extension && !name.contains(self.delimiter.as_str())
    }
}

/// Secuencia perezosa de objetos del catálogo. Las carpetas se enumeran al
/// crearla; las vistas de cada objeto se leen al avanzar.
#[derive(Debug)]
pub struct CatalogScan {
    policy: ScanPolicy,
    folders: Vec<PathBuf>,
    cursor: usize,
}

/// Enumera los objetos bajo `root`.
pub fn scan(root: &Path, policy: ScanPolicy) -> Result<CatalogScan, ScanError> {
    if !root.exists() {
        return Err(ScanError::NotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut folders = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_dir() {
            folders.push(entry.into_path());
        }
    }

    Ok(CatalogScan {
        policy,
        folders,
        cursor: 0,
    })
}

impl CatalogScan {
    /// Número total de objetos del catálogo.
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

impl Iterator for CatalogScan {
    type Item = Result<DatasetObject, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        let folder = self.folders.get(self.cursor)?;
        let index = self.cursor;
        self.cursor += 1;
        Some(scan_object(index, folder, &self.policy))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.folders.len() - self.cursor;
        (remaining, Some(remaining))
    }
}

fn scan_object(
    index: usize,
    folder: &Path,
    policy: &ScanPolicy,
) -> Result<DatasetObject, ScanError> {
    let catalog_key = folder
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut views = Vec::new();
    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| walk_error(folder, e))?;
        if entry.file_type().is_file() && policy.accepts(entry.path()) {
            views.push(ViewImage::new(&catalog_key, entry.path()));
        }
    }

    Ok(DatasetObject::new(index, catalog_key, views))
}

/// El error se atribuye a la carpeta que se estaba recorriendo, de modo que
/// su nombre identifica al objeto afectado.
fn walk_error(path: &Path, err: walkdir::Error) -> ScanError {
    let source = err.into_io_error().unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "bucle de enlaces simbólicos")
    });
    ScanError::Io {
        path: path.to_path_buf(),
        source,
    }
}
