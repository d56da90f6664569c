use std::time::Duration;

use async_trait::async_trait;
use ingest_core::RemoteEntry;
use tokio::io::AsyncRead;

pub mod memory;
pub mod sftp;
mod ssh_client;

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("remote io error: {0}")]
    Io(String),
}

/// Opens authenticated sessions against a remote file store.
/// Endpoint and credentials are bound when the client is built.
#[async_trait]
pub trait RemoteStoreClient: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

#[async_trait]
pub trait RemoteSession: Send {
    /// Regular files directly inside `path`, in server order.
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;
    async fn open_read(&mut self, path: &str) -> Result<RemoteReader, RemoteError>;
    async fn close(self: Box<Self>) -> Result<(), RemoteError>;
}
