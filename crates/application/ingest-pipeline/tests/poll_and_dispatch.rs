use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;
use ingest_infra::MemoryStore;
use ingest_pipeline::{
    ConsumerHandler, Dispatcher, LocalManifest, Poller, PollerOptions, StagedFile, SyncOptions,
    Synchronizer, TickOutcome,
};
use tempfile::tempdir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const OUTBOX: &str = "/outbox";

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<StagedFile>>,
}

impl Recorder {
    fn names(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.original_name.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl ConsumerHandler for Recorder {
    async fn handle(&self, file: StagedFile) -> anyhow::Result<()> {
        assert!(file.local_path.is_file(), "delivered file must exist");
        self.seen.lock().unwrap().push(file);
        Ok(())
    }
}

/// Holds every delivery until the test releases a permit.
struct Gate {
    permits: Arc<Semaphore>,
    inner: Recorder,
}

#[async_trait::async_trait]
impl ConsumerHandler for Gate {
    async fn handle(&self, file: StagedFile) -> anyhow::Result<()> {
        self.permits.acquire().await?.forget();
        self.inner.handle(file).await
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    staging: Utf8PathBuf,
    store: MemoryStore,
    manifest: Arc<LocalManifest>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let staging = Utf8PathBuf::from_path_buf(dir.path().join("staging")).unwrap();
        Self {
            _dir: dir,
            staging,
            store: MemoryStore::new(),
            manifest: Arc::new(LocalManifest::new()),
        }
    }

    fn poller(&self, dispatcher: &Dispatcher, interval: Duration) -> Poller {
        let sync = Synchronizer::new(
            Arc::new(self.store.clone()),
            self.manifest.clone(),
            SyncOptions::new(OUTBOX, self.staging.clone(), "*_data.csv"),
        );
        Poller::new(
            Arc::new(sync),
            dispatcher.sender(),
            PollerOptions {
                interval,
                max_consecutive_local_failures: 5,
            },
        )
    }

    fn staged_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.staging.as_std_path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

#[tokio::test]
async fn new_files_reach_the_consumer_once_in_order() {
    let h = Harness::new();
    h.store.put(OUTBOX, "File1_data.csv", "a,b\n1,2\n");
    h.store.put(OUTBOX, "File2_data.csv", "a,b\n3,4\n");
    h.store.put(OUTBOX, "notes.txt", "not for us");

    let recorder = Arc::new(Recorder::default());
    let dispatcher = Dispatcher::spawn(16, recorder.clone()).unwrap();
    let poller = h.poller(&dispatcher, Duration::from_millis(10));
    let counters = poller.counters();

    let cancel = CancellationToken::new();
    let running = poller.spawn(cancel.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    running.await.unwrap().unwrap();

    let stats = dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.handler_failures, 0);
    assert_eq!(recorder.names(), ["File1_data.csv", "File2_data.csv"]);
    assert_eq!(h.staged_files(), ["File1_data.csv", "File2_data.csv"]);
    assert_eq!(h.manifest.len(), 2);

    let snap = counters.snapshot();
    assert!(snap.cycles_completed >= 2, "polling continued after the first cycle");
    assert_eq!(snap.files_dispatched, 2);
    assert_eq!(h.store.stats().reads_of("/outbox/File1_data.csv"), 1);
}

#[tokio::test]
async fn files_added_later_are_picked_up_by_a_later_cycle() {
    let h = Harness::new();
    h.store.put(OUTBOX, "First_data.csv", "1");
    let recorder = Arc::new(Recorder::default());
    let dispatcher = Dispatcher::spawn(4, recorder.clone()).unwrap();
    let poller = h.poller(&dispatcher, Duration::from_secs(60));
    let cancel = CancellationToken::new();

    poller.poll_now(&cancel).await.unwrap();
    h.store.put(OUTBOX, "Second_data.csv", "2");
    match poller.poll_now(&cancel).await.unwrap() {
        TickOutcome::Completed(result) => {
            assert_eq!(result.staged_names(), ["Second_data.csv"]);
            assert_eq!(result.skipped_known, 1);
        }
        other => panic!("expected a completed cycle, got {other:?}"),
    }

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(recorder.names(), ["First_data.csv", "Second_data.csv"]);
}

#[tokio::test]
async fn slow_consumer_holds_the_cycle_without_losing_files() {
    let h = Harness::new();
    for name in ["A_data.csv", "B_data.csv", "C_data.csv"] {
        h.store.put(OUTBOX, name, name);
    }
    let permits = Arc::new(Semaphore::new(0));
    let gate = Arc::new(Gate {
        permits: permits.clone(),
        inner: Recorder::default(),
    });
    let dispatcher = Dispatcher::spawn(1, gate.clone()).unwrap();
    let poller = h.poller(&dispatcher, Duration::from_secs(60));

    let cycle = {
        let poller = poller.clone();
        tokio::spawn(async move { poller.poll_now(&CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!cycle.is_finished(), "cycle waits for queue space");
    assert_eq!(
        h.staged_files(),
        ["A_data.csv", "B_data.csv", "C_data.csv"],
        "all files are staged before dispatch"
    );
    assert!(matches!(
        poller.poll_now(&CancellationToken::new()).await.unwrap(),
        TickOutcome::Skipped
    ));

    permits.add_permits(3);
    assert!(matches!(cycle.await.unwrap().unwrap(), TickOutcome::Completed(_)));
    let stats = dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(stats.delivered, 3);
    assert_eq!(gate.inner.names(), ["A_data.csv", "B_data.csv", "C_data.csv"]);
}

#[tokio::test]
async fn shutdown_drains_files_staged_by_the_last_cycle() {
    let h = Harness::new();
    for name in ["A_data.csv", "B_data.csv", "C_data.csv"] {
        h.store.put(OUTBOX, name, name);
    }
    h.store.set_read_delay(Some(Duration::from_millis(150)));
    let recorder = Arc::new(Recorder::default());
    let dispatcher = Dispatcher::spawn(8, recorder.clone()).unwrap();
    let poller = h.poller(&dispatcher, Duration::from_secs(60));

    let cancel = CancellationToken::new();
    let running = poller.spawn(cancel.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    running.await.unwrap().unwrap();

    let stats = dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(stats.delivered, 1);
    assert_eq!(recorder.names(), ["A_data.csv"]);
    assert!(!h.manifest.is_known("B_data.csv"));
    assert_eq!(h.store.open_sessions(), 0);
}
