//! End-to-end behaviour of the watch against in-process test doubles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

use regwatch_core::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore, Stage};
use regwatch_core::progress::{MemoryMetrics, SEQUENCE_CURRENT, SEQUENCE_TOTAL};
use regwatch_core::{
    ChangeEvent, ChangesPage, ChangesTransport, CheckpointMode, Cursor, DownstreamIndexer,
    ForwardingQueue, MemoryReporter, QueuedChange, TransportErrorPolicy, Watch, WatchBuilder,
    WatchConfig, WatchError, WatchState,
};

// ─── Test doubles ─────────────────────────────────────────────────────────────

/// Serves scripted pages in order, then long-polls forever.
struct ScriptedFeed {
    pages: Mutex<VecDeque<Result<ChangesPage, WatchError>>>,
    calls: Mutex<Vec<Cursor>>,
    head: Cursor,
}

impl ScriptedFeed {
    fn new(pages: Vec<Result<ChangesPage, WatchError>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            calls: Mutex::new(vec![]),
            head: Cursor::from("200"),
        })
    }

    fn since_calls(&self) -> Vec<Cursor> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangesTransport for ScriptedFeed {
    async fn changes(&self, since: &Cursor, _: u32, _: bool) -> Result<ChangesPage, WatchError> {
        self.calls.lock().unwrap().push(since.clone());
        let next = self.pages.lock().unwrap().pop_front();
        match next {
            Some(page) => page,
            None => std::future::pending().await,
        }
    }

    async fn head(&self) -> Result<Cursor, WatchError> {
        Ok(self.head.clone())
    }
}

fn page(changes: Vec<ChangeEvent>) -> Result<ChangesPage, WatchError> {
    let last_cursor = changes.last().map(|c| c.cursor.clone());
    Ok(ChangesPage { changes, last_cursor })
}

fn pkgs(cursors: &[u64]) -> Result<ChangesPage, WatchError> {
    page(
        cursors
            .iter()
            .map(|c| ChangeEvent::new(format!("pkg-{c}"), *c))
            .collect(),
    )
}

/// Announces every write attempt, then waits for a permit before accepting it.
struct GatedQueue {
    gate: Semaphore,
    attempts: mpsc::UnboundedSender<QueuedChange>,
    fail: bool,
}

impl GatedQueue {
    fn new(permits: usize, fail: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<QueuedChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self { gate: Semaphore::new(permits), attempts: tx, fail };
        (Arc::new(queue), rx)
    }

    fn open() -> (Arc<Self>, mpsc::UnboundedReceiver<QueuedChange>) {
        Self::new(Semaphore::MAX_PERMITS, false)
    }

    fn closed() -> (Arc<Self>, mpsc::UnboundedReceiver<QueuedChange>) {
        Self::new(0, false)
    }

    fn failing() -> (Arc<Self>, mpsc::UnboundedReceiver<QueuedChange>) {
        Self::new(Semaphore::MAX_PERMITS, true)
    }
}

#[async_trait]
impl ForwardingQueue for GatedQueue {
    async fn save_object(&self, record: &QueuedChange) -> Result<(), WatchError> {
        let _ = self.attempts.send(record.clone());
        if self.fail {
            return Err(WatchError::Forward {
                id: record.object_id.clone(),
                reason: "queue unavailable".into(),
            });
        }
        self.gate
            .acquire()
            .await
            .map_err(|_| WatchError::Other("gate closed".into()))?
            .forget();
        Ok(())
    }
}

/// Memory store that announces every cursor save.
struct NotifyingStore {
    inner: MemoryCheckpointStore,
    saves: mpsc::UnboundedSender<Cursor>,
}

impl NotifyingStore {
    fn new(inner: MemoryCheckpointStore) -> (Arc<Self>, mpsc::UnboundedReceiver<Cursor>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { inner, saves: tx }), rx)
    }
}

#[async_trait]
impl CheckpointStore for NotifyingStore {
    async fn load(&self) -> Result<Option<Checkpoint>, WatchError> {
        self.inner.load().await
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), WatchError> {
        self.inner.save_cursor(cursor).await?;
        let _ = self.saves.send(cursor.clone());
        Ok(())
    }

    async fn save_stage(&self, stage: Stage) -> Result<(), WatchError> {
        self.inner.save_stage(stage).await
    }
}

struct StubIndexer {
    name: String,
    fail_stop: bool,
    runs: AtomicUsize,
    stops: AtomicUsize,
}

impl StubIndexer {
    fn new(name: &str, fail_stop: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail_stop,
            runs: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DownstreamIndexer for StubIndexer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<(), WatchError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), WatchError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(WatchError::Indexer {
                name: self.name.clone(),
                reason: "still draining".into(),
            });
        }
        Ok(())
    }
}

fn watch_with(
    feed: Arc<ScriptedFeed>,
    queue: Arc<GatedQueue>,
    store: Arc<dyn CheckpointStore>,
    config: WatchConfig,
) -> WatchBuilder {
    WatchBuilder::new(feed, queue, store).config(config)
}

async fn next_attempt(rx: &mut mpsc::UnboundedReceiver<QueuedChange>) -> QueuedChange {
    timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for a forward attempt")
        .expect("queue dropped")
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn resumes_strictly_after_stored_checkpoint() {
    let feed = ScriptedFeed::new(vec![pkgs(&[100, 101])]);
    let (queue, mut attempts) = GatedQueue::open();
    let store = Arc::new(MemoryCheckpointStore::with_cursor("100"));
    let watch = watch_with(feed.clone(), queue, store, WatchConfig::default())
        .build()
        .unwrap();

    watch.start().await.unwrap();
    let first = next_attempt(&mut attempts).await;

    assert_eq!(feed.since_calls()[0], Cursor::from("100"));
    assert_eq!(first.change["seq"], "101");
    assert_eq!(first.object_id, "pkg-101");
    watch.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn fresh_start_begins_at_origin_and_marks_stage() {
    let feed = ScriptedFeed::new(vec![]);
    let (queue, _attempts) = GatedQueue::open();
    let store = Arc::new(MemoryCheckpointStore::new());
    let watch = watch_with(feed.clone(), queue, store.clone(), WatchConfig::default())
        .build()
        .unwrap();

    watch.start().await.unwrap();
    assert_eq!(watch.state(), WatchState::Running);
    assert_eq!(store.snapshot().unwrap().stage, Some(Stage::Watch));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(feed.since_calls(), vec![Cursor::origin()]);
    watch.stop().await.unwrap();
    assert_eq!(watch.state(), WatchState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn next_change_waits_for_forward_to_settle() {
    let feed = ScriptedFeed::new(vec![pkgs(&[1, 2])]);
    let (queue, mut attempts) = GatedQueue::closed();
    let watch = watch_with(feed, queue.clone(), Arc::new(MemoryCheckpointStore::new()), WatchConfig::default())
        .build()
        .unwrap();

    watch.start().await.unwrap();
    assert_eq!(next_attempt(&mut attempts).await.object_id, "pkg-1");

    let early = timeout(Duration::from_secs(60), attempts.recv()).await;
    assert!(early.is_err(), "pkg-2 must not be forwarded while pkg-1 is in flight");

    queue.gate.add_permits(1);
    assert_eq!(next_attempt(&mut attempts).await.object_id, "pkg-2");
    watch.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn fast_mode_saves_checkpoint_while_forward_is_pending() {
    let feed = ScriptedFeed::new(vec![pkgs(&[1])]);
    let (queue, mut attempts) = GatedQueue::closed();
    let (store, mut saves) = NotifyingStore::new(MemoryCheckpointStore::new());
    let watch = watch_with(feed, queue, store, WatchConfig::default()).build().unwrap();

    watch.start().await.unwrap();
    next_attempt(&mut attempts).await;

    let saved = timeout(Duration::from_secs(10), saves.recv())
        .await
        .expect("checkpoint save must not wait for the forward");
    assert_eq!(saved, Some(Cursor::from("1")));

    // the forward never resolves; stop must still return
    watch.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn safe_mode_saves_checkpoint_after_forward() {
    let feed = ScriptedFeed::new(vec![pkgs(&[1])]);
    let (queue, mut attempts) = GatedQueue::closed();
    let (store, mut saves) = NotifyingStore::new(MemoryCheckpointStore::new());
    let config = WatchConfig { checkpoint_mode: CheckpointMode::Safe, ..WatchConfig::default() };
    let watch = watch_with(feed, queue.clone(), store, config).build().unwrap();

    watch.start().await.unwrap();
    next_attempt(&mut attempts).await;
    assert!(timeout(Duration::from_secs(30), saves.recv()).await.is_err());

    queue.gate.add_permits(1);
    let saved = timeout(Duration::from_secs(10), saves.recv()).await.unwrap();
    assert_eq!(saved, Some(Cursor::from("1")));
    watch.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn changes_without_id_are_skipped_entirely() {
    let feed = ScriptedFeed::new(vec![page(vec![
        ChangeEvent::new("", 1u64),
        ChangeEvent::new("react", 2u64),
    ])]);
    let (queue, mut attempts) = GatedQueue::open();
    let (store, mut saves) = NotifyingStore::new(MemoryCheckpointStore::new());
    let watch = watch_with(feed, queue, store, WatchConfig::default()).build().unwrap();

    watch.start().await.unwrap();
    assert_eq!(next_attempt(&mut attempts).await.object_id, "react");
    let saved = timeout(Duration::from_secs(10), saves.recv()).await.unwrap();
    assert_eq!(saved, Some(Cursor::from("2")));
    watch.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn queued_record_always_has_zero_retries() {
    let feed = ScriptedFeed::new(vec![pkgs(&[3])]);
    let (queue, mut attempts) = GatedQueue::failing();
    let watch = watch_with(feed, queue, Arc::new(MemoryCheckpointStore::new()), WatchConfig::default())
        .build()
        .unwrap();

    watch.start().await.unwrap();
    for _ in 0..3 {
        let record = next_attempt(&mut attempts).await;
        assert_eq!(record.retries, 0);
        assert_eq!(record.object_id, "pkg-3");
    }
    watch.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_in_flight_retry_loop() {
    let feed = ScriptedFeed::new(vec![pkgs(&[1])]);
    let (queue, mut attempts) = GatedQueue::failing();
    let reporter = Arc::new(MemoryReporter::new());
    let watch = watch_with(feed, queue, Arc::new(MemoryCheckpointStore::new()), WatchConfig::default())
        .reporter(reporter.clone())
        .build()
        .unwrap();

    watch.start().await.unwrap();
    next_attempt(&mut attempts).await;
    next_attempt(&mut attempts).await;

    watch.stop().await.unwrap();
    while attempts.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(attempts.try_recv().is_err(), "no attempts after stop");
    assert!(reporter.reports().iter().all(|r| r.get("id") == Some("pkg-1")));
}

#[tokio::test(start_paused = true)]
async fn shutdown_attempts_every_indexer_and_aggregates_failures() {
    let feed = ScriptedFeed::new(vec![]);
    let (queue, _attempts) = GatedQueue::open();
    let reporter = Arc::new(MemoryReporter::new());
    let drain = StubIndexer::new("queue-drain", true);
    let periodic = StubIndexer::new("periodic", false);
    let once = StubIndexer::new("one-time", false);

    let watch = watch_with(feed, queue, Arc::new(MemoryCheckpointStore::new()), WatchConfig::default())
        .indexer(drain.clone())
        .indexer(periodic.clone())
        .indexer(once.clone())
        .reporter(reporter.clone())
        .build()
        .unwrap();

    watch.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    for ix in [&drain, &periodic, &once] {
        assert_eq!(ix.runs.load(Ordering::SeqCst), 1, "{} not started", ix.name);
    }

    let err = watch.stop().await.unwrap_err();
    match err {
        WatchError::Shutdown { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].to_string().contains("queue-drain"));
        }
        other => panic!("expected shutdown error, got {other:?}"),
    }
    for ix in [&drain, &periodic, &once] {
        assert_eq!(ix.stops.load(Ordering::SeqCst), 1, "{} not stopped", ix.name);
    }

    let reports = reporter.reports();
    assert!(reports
        .iter()
        .any(|r| r.get("indexer") == Some("queue-drain") && r.get("phase") == Some("shutdown")));
    assert_eq!(watch.state(), WatchState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn transport_error_is_reported_and_feed_reconnects() {
    let feed = ScriptedFeed::new(vec![
        Err(WatchError::Transport("socket hang up".into())),
        pkgs(&[11]),
    ]);
    let (queue, mut attempts) = GatedQueue::open();
    let reporter = Arc::new(MemoryReporter::new());
    let watch = watch_with(feed.clone(), queue, Arc::new(MemoryCheckpointStore::with_cursor("10")), WatchConfig::default())
        .reporter(reporter.clone())
        .build()
        .unwrap();

    watch.start().await.unwrap();
    assert_eq!(next_attempt(&mut attempts).await.object_id, "pkg-11");

    let reports = reporter.reports();
    assert!(reports
        .iter()
        .any(|r| r.get("source") == Some("changes") && r.get("transient") == Some("true")));
    assert_eq!(feed.since_calls()[..2], [Cursor::from("10"), Cursor::from("10")]);
    watch.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn terminate_policy_closes_the_watch_stream() {
    let feed = ScriptedFeed::new(vec![Err(WatchError::Transport("410 gone".into()))]);
    let (queue, _attempts) = GatedQueue::open();
    let config = WatchConfig {
        transport_error_policy: TransportErrorPolicy::Terminate,
        ..WatchConfig::default()
    };
    let watch = watch_with(feed, queue, Arc::new(MemoryCheckpointStore::new()), config)
        .build()
        .unwrap();

    watch.start().await.unwrap();
    timeout(Duration::from_secs(10), watch.closed())
        .await
        .expect("stream should close after a terminal transport error");

    // the lifecycle is only left through stop()
    assert_eq!(watch.state(), WatchState::Running);
    watch.stop().await.unwrap();
    assert_eq!(watch.state(), WatchState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn progress_gauges_track_processed_cursor() {
    let feed = ScriptedFeed::new(vec![pkgs(&[50])]);
    let (queue, mut attempts) = GatedQueue::open();
    let metrics = Arc::new(MemoryMetrics::new());
    let watch = watch_with(feed, queue, Arc::new(MemoryCheckpointStore::new()), WatchConfig::default())
        .metrics(metrics.clone())
        .build()
        .unwrap();

    watch.start().await.unwrap();
    next_attempt(&mut attempts).await;

    for _ in 0..50 {
        if metrics.last(SEQUENCE_CURRENT).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(metrics.last(SEQUENCE_CURRENT), Some(50.0));
    assert_eq!(metrics.last(SEQUENCE_TOTAL), Some(200.0));
    watch.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn start_while_running_is_rejected() {
    let feed = ScriptedFeed::new(vec![]);
    let (queue, _attempts) = GatedQueue::open();
    let watch: Watch = watch_with(feed, queue, Arc::new(MemoryCheckpointStore::new()), WatchConfig::default())
        .build()
        .unwrap();

    watch.start().await.unwrap();
    assert!(matches!(
        watch.start().await,
        Err(WatchError::InvalidState { state: WatchState::Running, .. })
    ));
    watch.stop().await.unwrap();
    // a stopped watch stops again as a no-op and can restart
    watch.stop().await.unwrap();
    watch.start().await.unwrap();
    watch.stop().await.unwrap();
}
