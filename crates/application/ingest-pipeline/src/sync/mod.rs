use camino::Utf8PathBuf;
use ingest_core::FilenameFilter;

pub mod engine;
mod transfer;

pub use engine::Synchronizer;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub remote_dir: String,
    pub staging_dir: Utf8PathBuf,
    pub filter: FilenameFilter,
    /// Cap on downloads attempted per cycle; `None` is unlimited.
    pub max_fetch_per_cycle: Option<usize>,
    /// Copy the remote modification time onto the staged file.
    pub preserve_timestamp: bool,
}

impl SyncOptions {
    pub fn new(
        remote_dir: impl Into<String>,
        staging_dir: impl Into<Utf8PathBuf>,
        pattern: &str,
    ) -> Self {
        Self {
            remote_dir: remote_dir.into(),
            staging_dir: staging_dir.into(),
            filter: FilenameFilter::new(pattern),
            max_fetch_per_cycle: None,
            preserve_timestamp: true,
        }
    }
}

/// Cycle-level failures. Per-entry transfer failures are reported in
/// `PollCycleResult::failed` instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Remote listing error: {0}")]
    List(String),
    #[error("Transfer error: {0}")]
    Transfer(String),
    #[error("Local storage error: {0}")]
    LocalIo(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    Connection,
    List,
    Transfer,
    LocalIo,
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::Connection(_) => SyncErrorKind::Connection,
            SyncError::List(_) => SyncErrorKind::List,
            SyncError::Transfer(_) => SyncErrorKind::Transfer,
            SyncError::LocalIo(_) => SyncErrorKind::LocalIo,
        }
    }

    /// Retried on the next tick without operator action.
    pub fn is_transient(&self) -> bool {
        !matches!(self, SyncError::LocalIo(_))
    }
}
