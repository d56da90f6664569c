use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ingest_cli::commands;
use ingest_config::IngestConfig;
use ingest_infra::{Credentials, MemoryStore, RemoteError};
use ingest_pipeline::{ConsumerHandler, StagedFile};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

/// Accepts a delivery and never finishes it.
struct Stuck;

#[async_trait::async_trait]
impl ConsumerHandler for Stuck {
    async fn handle(&self, _file: StagedFile) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ConsumerHandler for Recorder {
    async fn handle(&self, file: StagedFile) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(file.original_name);
        Ok(())
    }
}

fn write_config(root: &Utf8Path, extra_sync: &str) -> Utf8PathBuf {
    write_config_with_timeout(root, extra_sync, 2000)
}

fn write_config_with_timeout(root: &Utf8Path, extra_sync: &str, shutdown_ms: u64) -> Utf8PathBuf {
    let path = root.join("ingest.json");
    let json = format!(
        r#"{{
  "sftp": {{ "host": "127.0.0.1", "port": 2222, "username": "ingest", "password": "from-file" }},
  "synchronizer": {{
    "folder": "/outbox",
    "localDirectory": "{staging}",
    "pollingIntervalMs": 20,
    "shutdownTimeoutMs": {shutdown_ms}{extra_sync}
  }}
}}"#,
        staging = root.join("staging")
    );
    std::fs::write(path.as_std_path(), json).unwrap();
    path
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

#[test]
fn password_override_replaces_the_file_value() {
    let (_dir, root) = temp_root();
    let path = write_config(&root, "");

    let cfg = commands::load_config(&path, Some("from-env".into())).unwrap();
    let endpoint = commands::endpoint_from(&cfg.sftp).unwrap();
    assert_eq!(endpoint.port, 2222);
    assert_eq!(endpoint.connect_timeout, Duration::from_secs(30));
    match endpoint.credentials {
        Credentials::Password(p) => assert_eq!(p, "from-env"),
        other => panic!("expected password credentials, got {other:?}"),
    }
}

#[test]
fn invalid_config_is_rejected_with_every_problem() {
    let (_dir, root) = temp_root();
    let path = write_config(&root, r#", "dispatchCapacity": 0, "pattern": """#);

    let err = commands::load_config(&path, None).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("dispatchCapacity"), "{msg}");
    assert!(msg.contains("pattern"), "{msg}");
}

#[test]
fn sync_options_follow_the_config() {
    let (_dir, root) = temp_root();
    let path = write_config(&root, r#", "maxFetchSize": 7, "preserveTimestamp": false"#);
    let cfg = commands::load_config(&path, None).unwrap();

    let options = commands::sync_options_from(&cfg.synchronizer);
    assert_eq!(options.remote_dir, "/outbox");
    assert_eq!(options.staging_dir, root.join("staging"));
    assert_eq!(options.max_fetch_per_cycle, Some(7));
    assert!(!options.preserve_timestamp);
    assert!(options.filter.matches("File1_data.csv"));
}

#[tokio::test]
async fn once_stages_and_delivers_matching_files() {
    let (_dir, root) = temp_root();
    let cfg: IngestConfig = commands::load_config(&write_config(&root, ""), None).unwrap();
    let store = MemoryStore::new();
    store.put("/outbox", "File1_data.csv", "1");
    store.put("/outbox", "notes.txt", "skip");
    store.put("/outbox", "File2_data.csv", "2");
    let recorder = Arc::new(Recorder::default());

    let result = commands::run_once(Arc::new(store.clone()), &cfg, recorder.clone())
        .await
        .unwrap();

    assert_eq!(result.staged_names(), ["File1_data.csv", "File2_data.csv"]);
    assert_eq!(
        *recorder.seen.lock().unwrap(),
        ["File1_data.csv", "File2_data.csv"]
    );
    assert!(root.join("staging/File2_data.csv").is_file());
    assert!(!root.join("staging/notes.txt").exists());
}

#[tokio::test]
async fn once_reports_an_unreachable_server() {
    let (_dir, root) = temp_root();
    let cfg = commands::load_config(&write_config(&root, ""), None).unwrap();
    let store = MemoryStore::new();
    store.fail_connect(Some(RemoteError::Network("connection refused".into())));

    let err = commands::run_once(Arc::new(store), &cfg, Arc::new(Recorder::default()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn service_stops_cleanly_on_shutdown() {
    let (_dir, root) = temp_root();
    let manifest = root.join("manifest.json");
    let cfg = commands::load_config(
        &write_config(&root, &format!(r#", "manifestPath": "{manifest}""#)),
        None,
    )
    .unwrap();
    let store = MemoryStore::new();
    store.put("/outbox", "File1_data.csv", "1");
    let recorder = Arc::new(Recorder::default());

    let shutdown = CancellationToken::new();
    let service = {
        let store = store.clone();
        let shutdown = shutdown.clone();
        let recorder = recorder.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move {
            commands::run_service(Arc::new(store), &cfg, recorder, shutdown).await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    store.put("/outbox", "File2_data.csv", "2");
    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown.cancel();

    let summary = service.await.unwrap().unwrap();
    assert_eq!(summary.dispatch.delivered, 2);
    assert_eq!(summary.counters.files_dispatched, 2);
    assert!(summary.counters.cycles_completed >= 2);
    assert_eq!(
        *recorder.seen.lock().unwrap(),
        ["File1_data.csv", "File2_data.csv"]
    );
    assert_eq!(store.open_sessions(), 0);
    assert!(manifest.is_file(), "durable manifest written");
}

#[tokio::test]
async fn service_gives_up_when_staging_is_unusable() {
    let (_dir, root) = temp_root();
    std::fs::write(root.join("staging"), b"file in the way").unwrap();
    let cfg = commands::load_config(
        &write_config(&root, r#", "maxConsecutiveLocalFailures": 2"#),
        None,
    )
    .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        commands::run_service(
            Arc::new(MemoryStore::new()),
            &cfg,
            Arc::new(Recorder::default()),
            CancellationToken::new(),
        ),
    )
    .await
    .expect("service stops by itself");

    let err = outcome.unwrap_err();
    assert!(err.to_string().contains("2 consecutive cycles"), "{err}");
}

#[tokio::test]
async fn stuck_consumer_reports_every_undelivered_file() {
    let (_dir, root) = temp_root();
    let manifest = root.join("manifest.json");
    let extra = format!(r#", "dispatchCapacity": 1, "manifestPath": "{manifest}""#);
    let cfg = commands::load_config(&write_config_with_timeout(&root, &extra, 300), None).unwrap();
    let store = MemoryStore::new();
    for name in ["A_data.csv", "B_data.csv", "C_data.csv"] {
        store.put("/outbox", name, name);
    }

    let shutdown = CancellationToken::new();
    let service = {
        let store = store.clone();
        let shutdown = shutdown.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move {
            commands::run_service(Arc::new(store), &cfg, Arc::new(Stuck), shutdown).await
        })
    };
    // A is with the consumer, B fills the queue, C waits for a slot.
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), service)
        .await
        .expect("shutdown is bounded")
        .unwrap()
        .unwrap_err();
    assert!(
        err.to_string().contains("3 staged files were not delivered"),
        "{err}"
    );

    let reloaded = commands::manifest_from(&cfg.synchronizer).unwrap();
    assert!(
        !reloaded.is_known("C_data.csv"),
        "a file that never reached the queue is fetched again on the next run"
    );
}
