use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod filter;
pub mod path_utils;

pub use filter::FilenameFilter;
pub use path_utils::EntryName;

/// One entry of a remote directory listing. Identity is `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub size: Option<u64>,
    /// Remote modification time, seconds since the unix epoch.
    pub modified: Option<u64>,
}

impl RemoteEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            modified: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    pub name: String,
    pub local_path: Utf8PathBuf,
    pub fetched_at: DateTime<Utc>,
}

/// A file fully materialized under its final name in the staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedFile {
    pub local_path: Utf8PathBuf,
    pub original_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct PollCycleResult {
    /// Entries that passed the filter and were not yet in the manifest.
    pub attempted: usize,
    /// Newly staged files, in listing order.
    pub staged: Vec<StagedFile>,
    pub failed: Vec<FailedEntry>,
    /// Matching entries skipped because the manifest already knows them.
    pub skipped_known: usize,
    /// New entries left for a later cycle by the per-cycle cap or a shutdown request.
    pub deferred: usize,
    /// A shutdown request stopped the cycle before its remaining entries.
    pub interrupted: bool,
    /// The staging directory failed mid-cycle; the remaining entries were not attempted.
    pub local_io_error: Option<String>,
}

impl PollCycleResult {
    pub fn downloaded(&self) -> usize {
        self.staged.len()
    }

    pub fn staged_names(&self) -> Vec<&str> {
        self.staged
            .iter()
            .map(|f| f.original_name.as_str())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.interrupted && self.local_io_error.is_none()
    }
}
