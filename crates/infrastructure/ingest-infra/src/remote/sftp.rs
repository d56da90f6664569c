use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use ingest_core::RemoteEntry;
use russh::client::{self, AuthResult, Handle};
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg};
use russh::Disconnect;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tracing::{debug, info};

use super::ssh_client::HostKeyCheck;
use super::{RemoteError, RemoteReader, RemoteSession, RemoteStoreClient};

#[derive(Clone)]
pub enum Credentials {
    Password(String),
    PrivateKey {
        path: Utf8PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::PrivateKey { path, .. } => {
                f.debug_struct("PrivateKey").field("path", path).finish()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SftpEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
    pub connect_timeout: Duration,
    pub known_fingerprints: Vec<String>,
}

/// SFTP over russh. Every `connect` opens a fresh SSH connection and subsystem channel.
pub struct SftpStoreClient {
    endpoint: SftpEndpoint,
}

impl SftpStoreClient {
    pub fn new(endpoint: SftpEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &SftpEndpoint {
        &self.endpoint
    }

    async fn open(&self) -> Result<SftpStoreSession, RemoteError> {
        let ep = &self.endpoint;
        let config = client::Config {
            inactivity_timeout: Some(ep.connect_timeout.max(Duration::from_secs(30))),
            ..Default::default()
        };
        let handler = HostKeyCheck {
            allowed_fingerprints: ep.known_fingerprints.clone(),
        };

        let mut handle = client::connect(Arc::new(config), (ep.host.as_str(), ep.port), handler)
            .await
            .map_err(|e| RemoteError::Network(format!("connect {}:{}: {e}", ep.host, ep.port)))?;

        let auth = match &ep.credentials {
            Credentials::Password(password) => handle
                .authenticate_password(ep.username.as_str(), password.as_str())
                .await
                .map_err(|e| RemoteError::Network(format!("password auth: {e}")))?,
            Credentials::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path.as_std_path(), passphrase.as_deref())
                    .map_err(|e| RemoteError::Auth(format!("load key {path}: {e}")))?;
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| RemoteError::Network(format!("negotiate key hash: {e}")))?
                    .flatten();
                handle
                    .authenticate_publickey(
                        ep.username.as_str(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(|e| RemoteError::Network(format!("public key auth: {e}")))?
            }
        };

        if let AuthResult::Failure {
            remaining_methods,
            partial_success,
        } = auth
        {
            return Err(RemoteError::Auth(format!(
                "user {} rejected, remaining_methods: {:?}, partial_success: {}",
                ep.username, remaining_methods, partial_success
            )));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Network(format!("open channel: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| RemoteError::Network(format!("request sftp subsystem: {e}")))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| RemoteError::Network(format!("sftp handshake: {e}")))?;

        info!("sftp session opened to {}@{}:{}", ep.username, ep.host, ep.port);
        Ok(SftpStoreSession { handle, sftp })
    }
}

#[async_trait]
impl RemoteStoreClient for SftpStoreClient {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let timeout = self.endpoint.connect_timeout;
        match tokio::time::timeout(timeout, self.open()).await {
            Ok(res) => Ok(Box::new(res?)),
            Err(_) => Err(RemoteError::Timeout(timeout)),
        }
    }
}

struct SftpStoreSession {
    handle: Handle<HostKeyCheck>,
    sftp: SftpSession,
}

fn map_sftp_error(path: &str, e: SftpError) -> RemoteError {
    match &e {
        SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile => {
            RemoteError::NotFound(path.to_string())
        }
        _ => RemoteError::Io(format!("{path}: {e}")),
    }
}

#[async_trait]
impl RemoteSession for SftpStoreSession {
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| map_sftp_error(path, e))?;

        let mut out = Vec::new();
        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let attrs = entry.metadata();
            if attrs.is_dir() {
                continue;
            }
            out.push(RemoteEntry {
                name,
                size: attrs.size,
                modified: attrs.mtime.map(u64::from),
            });
        }
        debug!("listed {} entries in {path}", out.len());
        Ok(out)
    }

    async fn open_read(&mut self, path: &str) -> Result<RemoteReader, RemoteError> {
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|e| map_sftp_error(path, e))?;
        Ok(Box::new(file))
    }

    async fn close(self: Box<Self>) -> Result<(), RemoteError> {
        let this = *self;
        let sftp_res = this.sftp.close().await;
        this.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| RemoteError::Network(format!("disconnect: {e}")))?;
        sftp_res.map_err(|e| RemoteError::Io(format!("close sftp session: {e}")))
    }
}
