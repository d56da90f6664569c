use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ingest_core::{EntryName, FailedEntry, PollCycleResult};
use ingest_infra::{RemoteSession, RemoteStoreClient};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::io_utils::sweep_partials;
use crate::manifest::LocalManifest;
use crate::sync::transfer::{fetch_entry, FetchError};
use crate::sync::{SyncError, SyncOptions};

/// Runs list → filter → diff → download cycles against one remote directory.
pub struct Synchronizer {
    client: Arc<dyn RemoteStoreClient>,
    manifest: Arc<LocalManifest>,
    options: SyncOptions,
    in_flight: InFlight,
    swept: AtomicBool,
    /// Unsafe names already reported, so each is warned about once.
    rejected: Mutex<HashSet<String>>,
}

impl Synchronizer {
    pub fn new(
        client: Arc<dyn RemoteStoreClient>,
        manifest: Arc<LocalManifest>,
        options: SyncOptions,
    ) -> Self {
        Self {
            client,
            manifest,
            options,
            in_flight: InFlight::default(),
            swept: AtomicBool::new(false),
            rejected: Mutex::new(HashSet::new()),
        }
    }

    pub fn manifest(&self) -> &Arc<LocalManifest> {
        &self.manifest
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run one full cycle.
    pub async fn run_cycle(&self) -> Result<PollCycleResult, SyncError> {
        self.run_cycle_until(&CancellationToken::new()).await
    }

    /// Run one cycle; once `cancel` fires, the entry being transferred completes
    /// and no further entries are started.
    pub async fn run_cycle_until(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PollCycleResult, SyncError> {
        self.prepare_staging().await?;

        let mut session = self
            .client
            .connect()
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))?;

        let outcome = self.sync_session(session.as_mut(), cancel).await;

        if let Err(e) = session.close().await {
            warn!("closing remote session failed: {e}");
        }
        outcome
    }

    async fn prepare_staging(&self) -> Result<(), SyncError> {
        let staging = &self.options.staging_dir;
        tokio::fs::create_dir_all(staging.as_std_path())
            .await
            .map_err(|e| SyncError::LocalIo(format!("create staging dir {staging}: {e}")))?;

        if !self.swept.swap(true, Ordering::SeqCst) {
            let removed = sweep_partials(staging, |partial| self.in_flight.holds_partial(partial))
                .map_err(|e| {
                    self.swept.store(false, Ordering::SeqCst);
                    SyncError::LocalIo(format!("sweep staging dir {staging}: {e}"))
                })?;
            if removed > 0 {
                info!("removed {removed} stale partial downloads from {staging}");
            }
        }
        Ok(())
    }

    async fn sync_session(
        &self,
        session: &mut dyn RemoteSession,
        cancel: &CancellationToken,
    ) -> Result<PollCycleResult, SyncError> {
        let opts = &self.options;
        let entries = session
            .list(&opts.remote_dir)
            .await
            .map_err(|e| SyncError::List(e.to_string()))?;

        let mut result = PollCycleResult::default();

        for entry in entries {
            if !opts.filter.matches(&entry.name) {
                debug!("{} does not match {}", entry.name, opts.filter.pattern());
                continue;
            }
            if self.manifest.is_known(&entry.name) {
                result.skipped_known += 1;
                continue;
            }
            if let Err(reason) = EntryName::verify_safe(&entry.name) {
                self.reject(&entry.name, &reason);
                result.failed.push(FailedEntry {
                    name: entry.name.clone(),
                    error: format!("Security: {reason}"),
                });
                continue;
            }
            if result.local_io_error.is_some() {
                result.deferred += 1;
                continue;
            }
            if cancel.is_cancelled() {
                result.interrupted = true;
                result.deferred += 1;
                continue;
            }
            if opts
                .max_fetch_per_cycle
                .is_some_and(|cap| result.attempted >= cap)
            {
                result.deferred += 1;
                continue;
            }

            let Some(_claim) = self.in_flight.claim(&entry.name) else {
                debug!("{} is already being fetched by another cycle", entry.name);
                result.deferred += 1;
                continue;
            };
            // Another cycle may have finished it between the first check and the claim.
            if self.manifest.is_known(&entry.name) {
                result.skipped_known += 1;
                continue;
            }

            result.attempted += 1;
            match fetch_entry(session, opts, &entry).await {
                Ok(fetched) => {
                    self.manifest
                        .mark_fetched(&entry.name, fetched.staged.local_path.clone());
                    info!(
                        file = %entry.name,
                        bytes = fetched.bytes,
                        "downloaded {}",
                        entry.name
                    );
                    result.staged.push(fetched.staged);
                }
                Err(FetchError::Transfer(msg)) => {
                    warn!(file = %entry.name, "transfer failed: {msg}");
                    result.failed.push(FailedEntry {
                        name: entry.name.clone(),
                        error: msg,
                    });
                }
                Err(FetchError::Local(msg)) => {
                    error!(file = %entry.name, "staging directory failure: {msg}");
                    result.failed.push(FailedEntry {
                        name: entry.name.clone(),
                        error: msg.clone(),
                    });
                    result.local_io_error = Some(msg);
                }
            }
        }

        Ok(result)
    }

    fn reject(&self, name: &str, reason: &str) {
        let first = self
            .rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        if first {
            warn!(file = %name, "Security: {reason}; entry will be skipped");
        } else {
            debug!(file = %name, "skipping unsafe entry name");
        }
    }
}

/// Remote names with a download in progress, across all cycles of one synchronizer.
#[derive(Default)]
struct InFlight {
    names: Mutex<HashSet<String>>,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, name: &str) -> Option<InFlightClaim<'_>> {
        if self.lock().insert(name.to_string()) {
            Some(InFlightClaim {
                owner: self,
                name: name.to_string(),
            })
        } else {
            None
        }
    }

    fn holds_partial(&self, partial: &str) -> bool {
        self.lock()
            .iter()
            .any(|name| EntryName::partial(name) == partial)
    }
}

struct InFlightClaim<'a> {
    owner: &'a InFlight,
    name: String,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.name);
    }
}
