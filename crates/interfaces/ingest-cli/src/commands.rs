use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8Path;
use ingest_config::{IngestConfig, SftpConfig, SynchronizerConfig};
use ingest_infra::{Credentials, RemoteStoreClient, SftpEndpoint, SftpStoreClient};
use ingest_pipeline::{
    ConsumerHandler, CounterSnapshot, DispatchError, DispatchStats, Dispatcher, JsonManifestStore,
    LocalManifest, PollCycleResult, Poller, PollerOptions, SyncOptions, Synchronizer,
    TickOutcome,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::LoggingConsumer;

/// Load and validate the config file. A password given on the command line or
/// in the environment replaces the one in the file.
pub fn load_config(path: &Utf8Path, password_override: Option<String>) -> Result<IngestConfig> {
    let mut cfg = IngestConfig::load(path)?;
    if let Some(password) = password_override {
        cfg.sftp.password = Some(password);
    }
    cfg.validate()?;
    Ok(cfg)
}

pub fn endpoint_from(cfg: &SftpConfig) -> Result<SftpEndpoint> {
    let credentials = match (&cfg.password, &cfg.private_key_path) {
        (_, Some(path)) => Credentials::PrivateKey {
            path: path.clone(),
            passphrase: cfg.private_key_passphrase.clone(),
        },
        (Some(password), None) => Credentials::Password(password.clone()),
        (None, None) => anyhow::bail!("no SFTP credentials configured"),
    };
    Ok(SftpEndpoint {
        host: cfg.host.clone(),
        port: cfg.port,
        username: cfg.username.clone(),
        credentials,
        connect_timeout: cfg.connect_timeout(),
        known_fingerprints: cfg.known_fingerprints.clone(),
    })
}

pub fn sync_options_from(cfg: &SynchronizerConfig) -> SyncOptions {
    let mut options = SyncOptions::new(
        cfg.folder.clone(),
        cfg.local_directory.clone(),
        &cfg.pattern,
    );
    options.max_fetch_per_cycle = cfg.max_fetch_size;
    options.preserve_timestamp = cfg.preserve_timestamp;
    options
}

pub fn manifest_from(cfg: &SynchronizerConfig) -> Result<LocalManifest> {
    match &cfg.manifest_path {
        Some(path) => {
            let store = JsonManifestStore::new(path.clone());
            let manifest = LocalManifest::with_store(Arc::new(store))
                .with_context(|| format!("loading manifest {path}"))?;
            info!(known = manifest.len(), "manifest loaded from {path}");
            Ok(manifest)
        }
        None => Ok(LocalManifest::new()),
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub dispatch: DispatchStats,
    pub counters: CounterSnapshot,
}

struct Service {
    poller: Poller,
    dispatcher: Dispatcher,
}

fn build_service(
    client: Arc<dyn RemoteStoreClient>,
    cfg: &IngestConfig,
    handler: Arc<dyn ConsumerHandler>,
) -> Result<Service> {
    let sync_cfg = &cfg.synchronizer;
    let manifest = Arc::new(manifest_from(sync_cfg)?);
    let sync = Synchronizer::new(client, manifest, sync_options_from(sync_cfg));
    let dispatcher = Dispatcher::spawn(sync_cfg.dispatch_capacity, handler)?;
    let poller = Poller::new(
        Arc::new(sync),
        dispatcher.sender(),
        PollerOptions {
            interval: sync_cfg.polling_interval(),
            max_consecutive_local_failures: sync_cfg.max_consecutive_local_failures,
        },
    );
    Ok(Service { poller, dispatcher })
}

/// Poll until `shutdown` fires or polling gives up, then drain the dispatch queue.
pub async fn run_service(
    client: Arc<dyn RemoteStoreClient>,
    cfg: &IngestConfig,
    handler: Arc<dyn ConsumerHandler>,
    shutdown: CancellationToken,
) -> Result<RunSummary> {
    let Service { poller, dispatcher } = build_service(client, cfg, handler)?;
    let counters = poller.counters();
    let timeout = cfg.synchronizer.shutdown_timeout();

    let mut polling = poller.spawn(shutdown.clone());
    let finished = tokio::select! {
        res = &mut polling => Some(res),
        _ = shutdown.cancelled() => None,
    };
    let polled = match finished {
        Some(res) => res.context("poller task failed"),
        None => {
            info!("shutdown requested; finishing the current cycle");
            match tokio::time::timeout(timeout, &mut polling).await {
                Ok(res) => res.context("poller task failed"),
                Err(_) => {
                    warn!("poll cycle did not finish within {timeout:?}; abandoning it");
                    polling.abort();
                    // Wait for the aborted cycle to be dropped so its unqueued files are counted.
                    let _ = polling.await;
                    Ok(Ok(()))
                }
            }
        }
    };

    let drained = dispatcher.shutdown(timeout).await;
    let snapshot = counters.snapshot();
    polled??;
    let abandoned = snapshot.files_abandoned;
    let dispatch = match drained {
        Ok(stats) if abandoned == 0 => stats,
        Ok(_) => return Err(DispatchError::Undelivered { count: abandoned }.into()),
        Err(DispatchError::Undelivered { count }) => {
            return Err(DispatchError::Undelivered {
                count: count + abandoned,
            }
            .into())
        }
        Err(e) => return Err(e.into()),
    };
    Ok(RunSummary {
        dispatch,
        counters: snapshot,
    })
}

/// Run a single cycle and deliver its files.
pub async fn run_once(
    client: Arc<dyn RemoteStoreClient>,
    cfg: &IngestConfig,
    handler: Arc<dyn ConsumerHandler>,
) -> Result<PollCycleResult> {
    let Service { poller, dispatcher } = build_service(client, cfg, handler)?;
    let outcome = poller.poll_now(&CancellationToken::new()).await;
    drop(poller);
    let drained = dispatcher.shutdown(cfg.synchronizer.shutdown_timeout()).await;

    let result = match outcome? {
        TickOutcome::Completed(result) => result,
        TickOutcome::Aborted(e) => return Err(e.into()),
        TickOutcome::Skipped => anyhow::bail!("a poll cycle was already running"),
    };
    drained?;
    Ok(result)
}

pub async fn cmd_run(cfg: IngestConfig) -> Result<()> {
    let client = Arc::new(SftpStoreClient::new(endpoint_from(&cfg.sftp)?));
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received"),
                Err(e) => warn!("cannot listen for interrupts: {e}"),
            }
            shutdown.cancel();
        });
    }

    println!(
        ":: Polling {}:{} every {} ms",
        cfg.sftp.host, cfg.synchronizer.folder, cfg.synchronizer.polling_interval_ms
    );
    let summary = run_service(client, &cfg, Arc::new(LoggingConsumer), shutdown).await?;
    println!(
        ":: Stopped after {} cycles, {} files delivered, {} consumer failures",
        summary.counters.cycles_completed,
        summary.dispatch.delivered,
        summary.dispatch.handler_failures
    );
    Ok(())
}

pub async fn cmd_once(cfg: IngestConfig) -> Result<()> {
    let client = Arc::new(SftpStoreClient::new(endpoint_from(&cfg.sftp)?));
    let result = run_once(client, &cfg, Arc::new(LoggingConsumer)).await?;

    println!(
        ":: Downloaded {} of {} new files ({} already known, {} deferred)",
        result.downloaded(),
        result.attempted,
        result.skipped_known,
        result.deferred
    );
    for staged in &result.staged {
        println!("   + {}", staged.local_path);
    }
    for failed in &result.failed {
        println!("   ! {}: {}", failed.name, failed.error);
    }
    if let Some(e) = &result.local_io_error {
        anyhow::bail!("staging directory failed: {e}");
    }
    Ok(())
}

pub fn cmd_check_config(path: &Utf8Path, cfg: &IngestConfig) -> Result<()> {
    println!(":: {path} is valid");
    println!("   Server:   {}@{}:{}", cfg.sftp.username, cfg.sftp.host, cfg.sftp.port);
    println!("   Folder:   {}", cfg.synchronizer.folder);
    println!("   Staging:  {}", cfg.synchronizer.local_directory);
    println!("   Pattern:  {}", cfg.synchronizer.pattern);
    println!("   Interval: {} ms", cfg.synchronizer.polling_interval_ms);
    match &cfg.synchronizer.manifest_path {
        Some(p) => println!("   Manifest: {p}"),
        None => println!("   Manifest: in memory"),
    }
    Ok(())
}
