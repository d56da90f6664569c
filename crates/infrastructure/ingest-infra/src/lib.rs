pub mod remote;

// Re-exports for convenience
pub use remote::memory::MemoryStore;
pub use remote::sftp::{Credentials, SftpEndpoint, SftpStoreClient};
pub use remote::{RemoteError, RemoteReader, RemoteSession, RemoteStoreClient};
