use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use ingest_core::PollCycleResult;
use serde::Serialize;

use crate::sync::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub cycles_completed: u64,
    pub cycles_aborted: u64,
    pub ticks_skipped: u64,
    pub entries_attempted: u64,
    pub entries_downloaded: u64,
    pub entries_failed: u64,
    pub files_dispatched: u64,
    /// Staged files never queued because their cycle failed or was abandoned.
    pub files_abandoned: u64,
    pub local_io_failures: u64,
    pub last_cycle_ms: u64,
}

/// Monotonic counters over the poller's lifetime, suitable for export.
#[derive(Debug, Default)]
pub struct IngestCounters {
    cycles_completed: AtomicU64,
    cycles_aborted: AtomicU64,
    ticks_skipped: AtomicU64,
    entries_attempted: AtomicU64,
    entries_downloaded: AtomicU64,
    entries_failed: AtomicU64,
    files_dispatched: AtomicU64,
    files_abandoned: AtomicU64,
    local_io_failures: AtomicU64,
    last_cycle_ms: AtomicU64,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cycle(&self, result: &PollCycleResult, started: Instant) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.entries_attempted
            .fetch_add(result.attempted as u64, Ordering::Relaxed);
        self.entries_downloaded
            .fetch_add(result.downloaded() as u64, Ordering::Relaxed);
        self.entries_failed
            .fetch_add(result.failed.len() as u64, Ordering::Relaxed);
        if result.local_io_error.is_some() {
            self.local_io_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.record_elapsed(started);
    }

    pub(crate) fn record_abort(&self, error: &SyncError, started: Instant) {
        self.cycles_aborted.fetch_add(1, Ordering::Relaxed);
        if !error.is_transient() {
            self.local_io_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.record_elapsed(started);
    }

    pub(crate) fn record_skip(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.files_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self, count: usize) {
        self.files_abandoned
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_elapsed(&self, started: Instant) {
        let ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_cycle_ms.store(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_aborted: self.cycles_aborted.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            entries_attempted: self.entries_attempted.load(Ordering::Relaxed),
            entries_downloaded: self.entries_downloaded.load(Ordering::Relaxed),
            entries_failed: self.entries_failed.load(Ordering::Relaxed),
            files_dispatched: self.files_dispatched.load(Ordering::Relaxed),
            files_abandoned: self.files_abandoned.load(Ordering::Relaxed),
            local_io_failures: self.local_io_failures.load(Ordering::Relaxed),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
        }
    }
}
