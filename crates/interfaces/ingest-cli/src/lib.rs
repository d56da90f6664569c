pub mod commands;
pub mod consumer;

use camino::Utf8PathBuf;
use directories::ProjectDirs;

pub use consumer::LoggingConsumer;

const QUALIFIER: &str = "org";
const ORG: &str = "ingest";
const APP: &str = "sftp-ingest";

/// `<config dir>/ingest.json` for the current user, if a home directory exists.
pub fn default_config_path() -> Option<Utf8PathBuf> {
    let dirs = ProjectDirs::from(QUALIFIER, ORG, APP)?;
    Utf8PathBuf::from_path_buf(dirs.config_dir().join("ingest.json")).ok()
}
