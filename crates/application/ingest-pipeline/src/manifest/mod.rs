use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8PathBuf;
use chrono::Utc;
use ingest_core::ManifestRecord;
use tracing::{debug, error};

mod store;

pub use store::{JsonManifestStore, ManifestStore, ManifestStoreError};

/// Names already synchronized to the staging directory.
///
/// The map lock is held for a single read or write only. When a durable store
/// is attached, every change is persisted as a full snapshot under a separate
/// lock so snapshots are written in order.
#[derive(Default)]
pub struct LocalManifest {
    records: Mutex<HashMap<String, ManifestRecord>>,
    store: Option<Arc<dyn ManifestStore>>,
    persist_lock: Mutex<()>,
}

impl LocalManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the records persisted by `store` and keep it updated from now on.
    pub fn with_store(store: Arc<dyn ManifestStore>) -> Result<Self, ManifestStoreError> {
        let loaded = store.load()?;
        debug!("loaded {} manifest records", loaded.len());
        let records = loaded.into_iter().map(|r| (r.name.clone(), r)).collect();
        Ok(Self {
            records: Mutex::new(records),
            store: Some(store),
            persist_lock: Mutex::new(()),
        })
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, ManifestRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.map().contains_key(name)
    }

    pub fn record(&self, name: &str) -> Option<ManifestRecord> {
        self.map().get(name).cloned()
    }

    /// Returns `false` when `name` was already recorded; the existing record is kept.
    pub fn mark_fetched(&self, name: &str, local_path: impl Into<Utf8PathBuf>) -> bool {
        let inserted = {
            let mut map = self.map();
            if map.contains_key(name) {
                false
            } else {
                map.insert(
                    name.to_string(),
                    ManifestRecord {
                        name: name.to_string(),
                        local_path: local_path.into(),
                        fetched_at: Utc::now(),
                    },
                );
                true
            }
        };
        if inserted {
            self.persist();
        }
        inserted
    }

    /// Forget `name` so a later cycle fetches it again.
    pub fn reset(&self, name: &str) -> bool {
        let removed = self.map().remove(name).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    pub fn reset_all(&self) {
        self.map().clear();
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Snapshot of all records, sorted by name.
    pub fn records(&self) -> Vec<ManifestRecord> {
        let mut out: Vec<ManifestRecord> = self.map().values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _ordered = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.records();
        if let Err(e) = store.save(&snapshot) {
            error!("failed to persist manifest ({} records): {e}", snapshot.len());
        }
    }
}
