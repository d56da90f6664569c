use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use ingest_core::ManifestRecord;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ManifestStoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait ManifestStore: Send + Sync {
    fn load(&self) -> Result<Vec<ManifestRecord>, ManifestStoreError>;
    fn save(&self, records: &[ManifestRecord]) -> Result<(), ManifestStoreError>;
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ManifestSnapshot {
    version: u32,
    records: Vec<ManifestRecord>,
}

/// Manifest persisted as one JSON document, replaced atomically on every save.
pub struct JsonManifestStore {
    path: Utf8PathBuf,
}

impl JsonManifestStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> ManifestStoreError {
        ManifestStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ManifestStore for JsonManifestStore {
    fn load(&self) -> Result<Vec<ManifestRecord>, ManifestStoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        match serde_json::from_str::<ManifestSnapshot>(&data) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => Ok(snapshot.records),
            Ok(snapshot) => {
                warn!(
                    "manifest {} has unsupported version {}",
                    self.path, snapshot.version
                );
                quarantine(&self.path).map_err(|e| self.io_err(e))?;
                Ok(Vec::new())
            }
            Err(e) => {
                warn!("manifest {} is unreadable: {e}", self.path);
                quarantine(&self.path).map_err(|e| self.io_err(e))?;
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, records: &[ManifestRecord]) -> Result<(), ManifestStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let snapshot = ManifestSnapshot {
            version: SNAPSHOT_VERSION,
            records: records.to_vec(),
        };
        let data = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

fn quarantine(path: &Utf8Path) -> std::io::Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let ts = Utc::now().format("%Y%m%dT%H%M%S%.f").to_string();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let new_name = format!(
        "{}.corrupt.{ts}.{n}",
        path.file_name().unwrap_or("manifest.json")
    );
    let new_path = path.with_file_name(new_name);
    warn!("quarantining manifest to {new_path}");
    std::fs::rename(path, &new_path)
}
