//! Configuration file model, defaults and limits.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Default SFTP port.
pub const DEFAULT_PORT: u16 = 22;

/// Default connect and authentication timeout (milliseconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default remote filename pattern.
pub const DEFAULT_PATTERN: &str = "*_data.csv";

/// Default delay between polling cycles (milliseconds).
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1_000;

/// Shortest accepted polling delay (milliseconds).
pub const MIN_POLLING_INTERVAL_MS: u64 = 10;

/// Default dispatch queue capacity.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 1_024;

/// Largest accepted dispatch queue capacity.
pub const MAX_DISPATCH_CAPACITY: usize = 65_536;

/// Default time allowed for draining the dispatch queue on shutdown (milliseconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Consecutive staging failures tolerated before polling stops. 0 never stops.
pub const DEFAULT_MAX_CONSECUTIVE_LOCAL_FAILURES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Missing fields and sections take their defaults; required values are
/// reported by [`IngestConfig::validate`] so every problem surfaces at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    #[serde(default)]
    pub sftp: SftpConfig,
    #[serde(default)]
    pub synchronizer: SynchronizerConfig,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_passphrase: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Accepted host key fingerprints (`SHA256:...`). Empty accepts any key.
    #[serde(default)]
    pub known_fingerprints: Vec<String>,
}

impl std::fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field(
                "private_key_passphrase",
                &self.private_key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("known_fingerprints", &self.known_fingerprints)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizerConfig {
    /// Remote directory to poll.
    #[serde(default)]
    pub folder: String,
    /// Local staging directory.
    #[serde(default)]
    pub local_directory: Utf8PathBuf,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fetch_size: Option<usize>,
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_max_consecutive_local_failures")]
    pub max_consecutive_local_failures: u32,
    #[serde(default = "default_true")]
    pub preserve_timestamp: bool,
    /// Persist the manifest here; without it the manifest lives in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<Utf8PathBuf>,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: None,
            private_key_path: None,
            private_key_passphrase: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            known_fingerprints: Vec::new(),
        }
    }
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            folder: String::new(),
            local_directory: Utf8PathBuf::new(),
            pattern: default_pattern(),
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            max_fetch_size: None,
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            max_consecutive_local_failures: DEFAULT_MAX_CONSECUTIVE_LOCAL_FAILURES,
            preserve_timestamp: true,
            manifest_path: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_pattern() -> String {
    DEFAULT_PATTERN.to_string()
}

fn default_polling_interval_ms() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}

fn default_dispatch_capacity() -> usize {
    DEFAULT_DISPATCH_CAPACITY
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

fn default_max_consecutive_local_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_LOCAL_FAILURES
}

fn default_true() -> bool {
    true
}

impl IngestConfig {
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_std_path()).map_err(|source| {
            ConfigError::Read {
                path: path.to_owned(),
                source,
            }
        })?;
        Self::from_json(path, &raw)
    }

    fn from_json(path: &Utf8Path, raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Collects every violation rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let sftp = &self.sftp;
        let sync = &self.synchronizer;

        if sftp.host.trim().is_empty() {
            problems.push("sftp.host is required".to_string());
        }
        if sftp.port == 0 {
            problems.push("sftp.port must not be 0".to_string());
        }
        if sftp.username.trim().is_empty() {
            problems.push("sftp.username is required".to_string());
        }
        match (&sftp.password, &sftp.private_key_path) {
            (None, None) => {
                problems.push("one of sftp.password or sftp.privateKeyPath is required".into())
            }
            (Some(_), Some(_)) => problems
                .push("sftp.password and sftp.privateKeyPath are mutually exclusive".into()),
            _ => {}
        }
        if sftp.connect_timeout_ms == 0 {
            problems.push("sftp.connectTimeoutMs must be greater than 0".to_string());
        }

        if sync.folder.trim().is_empty() {
            problems.push("synchronizer.folder is required".to_string());
        }
        if sync.local_directory.as_str().trim().is_empty() {
            problems.push("synchronizer.localDirectory is required".to_string());
        }
        if sync.pattern.is_empty() {
            problems.push("synchronizer.pattern must not be empty".to_string());
        }
        if sync.polling_interval_ms < MIN_POLLING_INTERVAL_MS {
            problems.push(format!(
                "synchronizer.pollingIntervalMs must be at least {MIN_POLLING_INTERVAL_MS}"
            ));
        }
        if sync.max_fetch_size == Some(0) {
            problems.push("synchronizer.maxFetchSize must be greater than 0 when set".to_string());
        }
        if !(1..=MAX_DISPATCH_CAPACITY).contains(&sync.dispatch_capacity) {
            problems.push(format!(
                "synchronizer.dispatchCapacity must be between 1 and {MAX_DISPATCH_CAPACITY}"
            ));
        }
        if sync.manifest_path.as_deref() == Some(sync.local_directory.as_path()) {
            problems.push("synchronizer.manifestPath must be a file, not the staging directory".into());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

impl SftpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl SynchronizerConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "sftp": { "host": "sftp.example.org", "username": "ingest", "password": "s3cret" },
        "synchronizer": { "folder": "/outbox", "localDirectory": "/var/lib/ingest/staging" }
    }"#;

    fn minimal() -> IngestConfig {
        IngestConfig::from_json(Utf8Path::new("test.json"), MINIMAL).unwrap()
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg = minimal();
        assert_eq!(cfg.sftp.port, 22);
        assert_eq!(cfg.sftp.connect_timeout(), Duration::from_secs(30));
        assert!(cfg.sftp.known_fingerprints.is_empty());
        assert_eq!(cfg.synchronizer.pattern, "*_data.csv");
        assert_eq!(cfg.synchronizer.polling_interval(), Duration::from_secs(1));
        assert_eq!(cfg.synchronizer.dispatch_capacity, DEFAULT_DISPATCH_CAPACITY);
        assert_eq!(cfg.synchronizer.max_fetch_size, None);
        assert!(cfg.synchronizer.preserve_timestamp);
        assert!(cfg.synchronizer.manifest_path.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn every_violation_is_reported() {
        let mut cfg = minimal();
        cfg.sftp.host = " ".into();
        cfg.sftp.password = None;
        cfg.synchronizer.polling_interval_ms = 0;
        cfg.synchronizer.dispatch_capacity = 0;
        cfg.synchronizer.max_fetch_size = Some(0);

        match cfg.validate() {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(problems.len(), 5, "{problems:?}");
                assert!(problems.iter().any(|p| p.contains("sftp.host")));
                assert!(problems.iter().any(|p| p.contains("privateKeyPath")));
                assert!(problems.iter().any(|p| p.contains("pollingIntervalMs")));
            }
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_fields_are_reported_together() {
        for raw in [r#"{"sftp":{},"synchronizer":{}}"#, "{}"] {
            let cfg = IngestConfig::from_json(Utf8Path::new("empty.json"), raw).unwrap();
            assert_eq!(cfg.sftp.port, DEFAULT_PORT);
            assert_eq!(cfg.synchronizer.pattern, DEFAULT_PATTERN);

            let msg = cfg.validate().unwrap_err().to_string();
            for field in [
                "sftp.host",
                "sftp.username",
                "synchronizer.folder",
                "synchronizer.localDirectory",
            ] {
                assert!(msg.contains(field), "{field} missing from: {msg}");
            }
        }
    }

    #[test]
    fn password_and_key_are_exclusive() {
        let mut cfg = minimal();
        cfg.sftp.private_key_path = Some("/home/ingest/.ssh/id_ed25519".into());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let printed = format!("{:?}", minimal().sftp);
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn load_reports_path_on_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("ingest.json")).unwrap();

        let missing = IngestConfig::load(&path).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        std::fs::write(path.as_std_path(), "{ not json").unwrap();
        let broken = IngestConfig::load(&path).unwrap_err();
        assert!(matches!(broken, ConfigError::Parse { .. }));
        assert!(broken.to_string().contains("ingest.json"));

        std::fs::write(path.as_std_path(), MINIMAL).unwrap();
        assert_eq!(IngestConfig::load(&path).unwrap(), minimal());
    }
}
