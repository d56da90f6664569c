use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use ingest_core::RemoteEntry;
use tokio::io::{AsyncRead, ReadBuf};

use super::{RemoteError, RemoteReader, RemoteSession, RemoteStoreClient};

/// In-process remote store with fault injection, used in place of a live SFTP server.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connects: u64,
    pub closes: u64,
    pub lists: u64,
    /// Successful `open_read` calls keyed by remote path.
    pub reads: HashMap<String, u64>,
}

impl MemoryStats {
    pub fn reads_of(&self, path: &str) -> u64 {
        self.reads.get(path).copied().unwrap_or(0)
    }
}

#[derive(Default)]
struct MemoryState {
    dirs: HashMap<String, Vec<MemoryFile>>,
    connect_error: Option<RemoteError>,
    list_error: Option<RemoteError>,
    /// Remote path -> number of bytes served before the stream breaks.
    interrupt_after: HashMap<String, usize>,
    read_delay: Option<Duration>,
    stats: MemoryStats,
}

#[derive(Clone)]
struct MemoryFile {
    name: String,
    data: Arc<Vec<u8>>,
    modified: Option<u64>,
}

fn normalize_dir(dir: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn split_path(path: &str) -> (String, &str) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (normalize_dir(dir), name),
        None => (".".to_string(), path),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a file. New names are listed after existing ones.
    pub fn put(&self, dir: &str, name: &str, data: impl Into<Vec<u8>>) {
        self.put_with_mtime(dir, name, data, None);
    }

    pub fn put_with_mtime(
        &self,
        dir: &str,
        name: &str,
        data: impl Into<Vec<u8>>,
        modified: Option<u64>,
    ) {
        let file = MemoryFile {
            name: name.to_string(),
            data: Arc::new(data.into()),
            modified,
        };
        let mut state = self.state();
        let files = state.dirs.entry(normalize_dir(dir)).or_default();
        match files.iter_mut().find(|f| f.name == name) {
            Some(existing) => *existing = file,
            None => files.push(file),
        }
    }

    pub fn remove(&self, dir: &str, name: &str) {
        if let Some(files) = self.state().dirs.get_mut(&normalize_dir(dir)) {
            files.retain(|f| f.name != name);
        }
    }

    pub fn fail_connect(&self, error: Option<RemoteError>) {
        self.state().connect_error = error;
    }

    pub fn fail_list(&self, error: Option<RemoteError>) {
        self.state().list_error = error;
    }

    /// Break the read stream of `path` after `bytes` bytes, on every open.
    pub fn interrupt_read(&self, path: &str, bytes: usize) {
        self.state().interrupt_after.insert(path.to_string(), bytes);
    }

    pub fn clear_interrupts(&self) {
        self.state().interrupt_after.clear();
    }

    /// Delay every `open_read`, to hold a transfer in flight.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.state().read_delay = delay;
    }

    pub fn stats(&self) -> MemoryStats {
        self.state().stats.clone()
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> u64 {
        let state = self.state();
        state.stats.connects - state.stats.closes
    }
}

#[async_trait]
impl RemoteStoreClient for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let mut state = self.state();
        if let Some(err) = state.connect_error.clone() {
            return Err(err);
        }
        state.stats.connects += 1;
        Ok(Box::new(MemorySession {
            store: self.clone(),
        }))
    }
}

struct MemorySession {
    store: MemoryStore,
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut state = self.store.state();
        if let Some(err) = state.list_error.clone() {
            return Err(err);
        }
        state.stats.lists += 1;
        let files = state
            .dirs
            .get(&normalize_dir(path))
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        Ok(files
            .iter()
            .map(|f| RemoteEntry {
                name: f.name.clone(),
                size: Some(f.data.len() as u64),
                modified: f.modified,
            })
            .collect())
    }

    async fn open_read(&mut self, path: &str) -> Result<RemoteReader, RemoteError> {
        let delay = self.store.state().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.store.state();
        let (dir, name) = split_path(path);
        let data = state
            .dirs
            .get(&dir)
            .and_then(|files| files.iter().find(|f| f.name == name))
            .map(|f| f.data.clone())
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        let fail_at = state.interrupt_after.get(path).copied();
        *state.stats.reads.entry(path.to_string()).or_default() += 1;

        Ok(Box::new(MemoryReader {
            data,
            pos: 0,
            fail_at,
        }))
    }

    async fn close(self: Box<Self>) -> Result<(), RemoteError> {
        self.store.state().stats.closes += 1;
        Ok(())
    }
}

const CHUNK: usize = 4;

/// Serves the file in small chunks so a fault lands mid-stream.
struct MemoryReader {
    data: Arc<Vec<u8>>,
    pos: usize,
    fail_at: Option<usize>,
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let end = self.fail_at.unwrap_or(usize::MAX).min(self.data.len());
        if self.pos >= end {
            if self.fail_at.is_some_and(|at| at < self.data.len()) {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "remote stream interrupted",
                )));
            }
            return Poll::Ready(Ok(()));
        }
        let n = CHUNK.min(end - self.pos).min(buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}
