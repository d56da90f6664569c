use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use ingest_core::StagedFile;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Downstream consumer of staged files. Delivery is at-least-once, so
/// implementations must tolerate seeing the same file again.
#[async_trait::async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn handle(&self, file: StagedFile) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch capacity must be at least 1")]
    InvalidCapacity,
    #[error("dispatcher is closed; {0} was not enqueued")]
    Closed(String),
    #[error("{count} staged files were not delivered before the shutdown timeout")]
    Undelivered { count: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub handler_failures: u64,
}

impl DispatchStats {
    pub fn pending(&self) -> u64 {
        self.enqueued.saturating_sub(self.delivered)
    }
}

#[derive(Default)]
struct DispatchState {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

impl DispatchState {
    fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::SeqCst),
            delivered: self.delivered.load(Ordering::SeqCst),
            handler_failures: self.handler_failures.load(Ordering::SeqCst),
        }
    }
}

/// Producer side of the dispatch queue. `send` waits while the queue is full.
#[derive(Clone)]
pub struct DispatchSender {
    tx: mpsc::Sender<StagedFile>,
    state: Arc<DispatchState>,
}

impl DispatchSender {
    pub async fn send(&self, file: StagedFile) -> Result<(), DispatchError> {
        // Waiting for the permit is cancel-safe; the count only moves once the file is queued.
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| DispatchError::Closed(file.original_name.clone()))?;
        self.state.enqueued.fetch_add(1, Ordering::SeqCst);
        permit.send(file);
        Ok(())
    }

    /// Free slots in the queue right now.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Bounded FIFO queue drained by a single worker task that calls the handler
/// one file at a time.
pub struct Dispatcher {
    sender: DispatchSender,
    state: Arc<DispatchState>,
    closing: CancellationToken,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn(
        capacity: usize,
        handler: Arc<dyn ConsumerHandler>,
    ) -> Result<Self, DispatchError> {
        if capacity == 0 {
            return Err(DispatchError::InvalidCapacity);
        }
        let (tx, rx) = mpsc::channel(capacity);
        let state = Arc::new(DispatchState::default());
        let closing = CancellationToken::new();
        let worker = tokio::spawn(run_worker(rx, handler, state.clone(), closing.clone()));
        Ok(Self {
            sender: DispatchSender {
                tx,
                state: state.clone(),
            },
            state,
            closing,
            worker,
        })
    }

    pub fn sender(&self) -> DispatchSender {
        self.sender.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        self.state.stats()
    }

    /// Stop accepting files, deliver what is queued, and wait up to `timeout`.
    /// Whatever is still undelivered after that is reported as an error.
    pub async fn shutdown(self, timeout: Duration) -> Result<DispatchStats, DispatchError> {
        let Dispatcher {
            sender,
            state,
            closing,
            mut worker,
        } = self;
        drop(sender);
        closing.cancel();

        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("dispatch worker ended abnormally: {e}"),
            Err(_) => {
                worker.abort();
                let _ = worker.await;
            }
        }

        let stats = state.stats();
        if stats.pending() > 0 {
            error!(
                undelivered = stats.pending(),
                "dispatcher stopped with undelivered files"
            );
            return Err(DispatchError::Undelivered {
                count: stats.pending(),
            });
        }
        info!(delivered = stats.delivered, "dispatcher drained");
        Ok(stats)
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<StagedFile>,
    handler: Arc<dyn ConsumerHandler>,
    state: Arc<DispatchState>,
    closing: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            file = rx.recv() => file,
            _ = closing.cancelled() => {
                // No new sends; buffered files are still drained.
                rx.close();
                rx.recv().await
            }
        };
        let Some(file) = next else {
            break;
        };

        let name = file.original_name.clone();
        debug!(file = %name, "dispatching");
        let outcome = AssertUnwindSafe(handler.handle(file)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                state.handler_failures.fetch_add(1, Ordering::SeqCst);
                error!(file = %name, "consumer failed: {e:#}");
            }
            Err(_) => {
                state.handler_failures.fetch_add(1, Ordering::SeqCst);
                error!(file = %name, "consumer panicked");
            }
        }
        state.delivered.fetch_add(1, Ordering::SeqCst);
    }
    debug!("dispatch worker stopped");
}
