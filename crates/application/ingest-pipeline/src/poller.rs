use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ingest_core::PollCycleResult;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dispatch::{DispatchError, DispatchSender};
use crate::manifest::LocalManifest;
use crate::metrics::IngestCounters;
use crate::sync::{SyncError, Synchronizer};

#[derive(Debug, Clone)]
pub struct PollerOptions {
    /// Delay between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Stop after this many consecutive cycles hit a staging directory failure. 0 never stops.
    pub max_consecutive_local_failures: u32,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_consecutive_local_failures: 5,
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    Completed(PollCycleResult),
    Aborted(SyncError),
    /// Another cycle was still running; this tick was dropped.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("staging directory unavailable for {failures} consecutive cycles: {last_error}")]
    LocalStorageUnavailable { failures: u32, last_error: String },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Drives the synchronizer on a fixed delay and forwards staged files to the
/// dispatcher. Clones share one single-flight guard, so at most one cycle
/// (including the dispatch of its files) runs at a time.
#[derive(Clone)]
pub struct Poller {
    sync: Arc<Synchronizer>,
    outbox: DispatchSender,
    options: PollerOptions,
    guard: Arc<Semaphore>,
    counters: Arc<IngestCounters>,
}

impl Poller {
    pub fn new(sync: Arc<Synchronizer>, outbox: DispatchSender, options: PollerOptions) -> Self {
        Self {
            sync,
            outbox,
            options,
            guard: Arc::new(Semaphore::new(1)),
            counters: Arc::new(IngestCounters::new()),
        }
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        self.counters.clone()
    }

    pub fn is_cycle_running(&self) -> bool {
        self.guard.available_permits() == 0
    }

    /// Run one cycle now unless one is already running.
    pub async fn poll_now(&self, cancel: &CancellationToken) -> Result<TickOutcome, PollerError> {
        let Ok(_permit) = self.guard.try_acquire() else {
            self.counters.record_skip();
            debug!("poll cycle still running; tick dropped");
            return Ok(TickOutcome::Skipped);
        };

        let cycle_id = Uuid::new_v4();
        let span = info_span!("poll_cycle", %cycle_id);
        self.cycle(cancel).instrument(span).await
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<TickOutcome, PollerError> {
        let started = Instant::now();
        let result = match self.sync.run_cycle_until(cancel).await {
            Ok(result) => result,
            Err(e) => {
                self.counters.record_abort(&e, started);
                if e.is_transient() {
                    warn!("poll cycle aborted: {e}");
                } else {
                    error!("poll cycle aborted: {e}");
                }
                return Ok(TickOutcome::Aborted(e));
            }
        };

        self.counters.record_cycle(&result, started);
        if result.attempted > 0 || result.deferred > 0 {
            info!(
                attempted = result.attempted,
                downloaded = result.downloaded(),
                failed = result.failed.len(),
                deferred = result.deferred,
                "poll cycle finished"
            );
        } else {
            debug!(known = result.skipped_known, "poll cycle found nothing new");
        }

        let mut unqueued = Unqueued::new(self.sync.manifest(), &self.counters, &result);
        for staged in &result.staged {
            self.outbox.send(staged.clone()).await?;
            unqueued.queued();
            self.counters.record_dispatch();
        }
        drop(unqueued);
        Ok(TickOutcome::Completed(result))
    }

    /// Poll until `cancel` fires. The first cycle starts immediately. A cycle
    /// in progress when `cancel` fires finishes its current entry and
    /// dispatches what it staged before this returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PollerError> {
        info!(
            interval_ms = self.options.interval.as_millis() as u64,
            remote_dir = %self.sync.options().remote_dir,
            pattern = %self.sync.options().filter.pattern(),
            "poller started"
        );
        let limit = self.options.max_consecutive_local_failures;
        let mut consecutive_local = 0u32;

        while !cancel.is_cancelled() {
            let local_failure = match self.poll_now(&cancel).await? {
                TickOutcome::Completed(result) => Some(result.local_io_error),
                TickOutcome::Aborted(e) if !e.is_transient() => Some(Some(e.to_string())),
                TickOutcome::Aborted(_) => Some(None),
                TickOutcome::Skipped => None,
            };

            match local_failure {
                Some(Some(last_error)) => {
                    consecutive_local += 1;
                    if limit > 0 && consecutive_local >= limit {
                        error!(
                            failures = consecutive_local,
                            "giving up: staging directory keeps failing"
                        );
                        return Err(PollerError::LocalStorageUnavailable {
                            failures: consecutive_local,
                            last_error,
                        });
                    }
                }
                Some(None) => consecutive_local = 0,
                None => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }

        info!("poller stopped");
        Ok(())
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<(), PollerError>> {
        tokio::spawn(self.run(cancel))
    }
}

/// Staged files of the current cycle not yet accepted by the dispatch queue.
/// Whatever is left on drop (a send failed, or the cycle was abandoned) is
/// forgotten by the manifest so a later cycle fetches it again.
struct Unqueued<'a> {
    manifest: &'a LocalManifest,
    counters: &'a IngestCounters,
    names: VecDeque<String>,
}

impl<'a> Unqueued<'a> {
    fn new(
        manifest: &'a LocalManifest,
        counters: &'a IngestCounters,
        result: &PollCycleResult,
    ) -> Self {
        Self {
            manifest,
            counters,
            names: result.staged.iter().map(|f| f.original_name.clone()).collect(),
        }
    }

    fn queued(&mut self) {
        self.names.pop_front();
    }
}

impl Drop for Unqueued<'_> {
    fn drop(&mut self) {
        if self.names.is_empty() {
            return;
        }
        for name in &self.names {
            self.manifest.reset(name);
        }
        self.counters.record_abandoned(self.names.len());
        warn!(
            count = self.names.len(),
            "staged files were not queued for delivery; they will be fetched again"
        );
    }
}
