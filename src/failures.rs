//! Registro de objetos que no se pudieron procesar.
//!
//! Sólo se añade; al final de la ejecución se vuelca como informe JSON. Los
//! reintentos son una re-ejecución manual: los ids deterministas hacen que
//! reprocesar el subconjunto fallido sea seguro.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::buffer::FlushResult;
use crate::models::{FailureRecord, ObjectRef};

#[derive(Debug, Default)]
pub struct FailureTracker {
    records: Vec<FailureRecord>,
}

#[derive(Serialize)]
struct FailureReport<'a> {
    generated_at: DateTime<Utc>,
    total: usize,
    failures: &'a [FailureRecord],
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, object_index: usize, catalog_key: &str, reason: impl Into<String>) {
        let record = FailureRecord {
            object_index,
            catalog_key: catalog_key.to_string(),
            reason: reason.into(),
        };
        error!(
            "Objeto fallido ({}, {}): {}",
            record.object_index, record.catalog_key, record.reason
        );
        self.records.push(record);
    }

    pub fn record_ref(&mut self, origin: &ObjectRef, reason: impl Into<String>) {
        self.record(origin.index, &origin.catalog_key, reason);
    }

    /// Un registro por objeto afectado por el volcado, no uno por elemento.
    /// Devuelve cuántos objetos se han registrado.
    pub fn record_flush(&mut self, result: &FlushResult) -> usize {
        let origins = result.failed_origins();
        for (origin, reason) in &origins {
            self.record_ref(origin, format!("flush to '{}' failed: {reason}", result.collection));
        }
        origins.len()
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Escribe el informe en JSON.
    pub fn write_report(&self, path: &Path) -> Result<()> {
        let report = FailureReport {
            generated_at: Utc::now(),
            total: self.records.len(),
            failures: &self.records,
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("no se pudo escribir el informe en {}", path.display()))?;
        info!(
            "Informe de fallos ({} objetos) escrito en {}",
            self.records.len(),
            path.display()
        );
        Ok(())
    }
}
