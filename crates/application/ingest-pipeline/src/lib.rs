mod io_utils;
pub mod dispatch;
pub mod manifest;
pub mod metrics;
pub mod poller;
pub mod sync;

pub use dispatch::{ConsumerHandler, DispatchError, DispatchSender, DispatchStats, Dispatcher};
pub use manifest::{JsonManifestStore, LocalManifest, ManifestStore, ManifestStoreError};
pub use metrics::{CounterSnapshot, IngestCounters};
pub use poller::{Poller, PollerError, PollerOptions, TickOutcome};
pub use sync::{SyncError, SyncErrorKind, SyncOptions, Synchronizer};

// Re-export domain types often needed by consumers
pub use ingest_core::{FailedEntry, FilenameFilter, ManifestRecord, PollCycleResult, StagedFile};
