//! The watch: supervises the change feed and everything hanging off it.
//!
//! # Per-change flow
//!
//! ```text
//! ChangeStream ─▶ pause ─▶ RetryingForwarder ─▶ resume ─▶ ProgressReporter
//!                   │
//!                   └─▶ CheckpointManager::spawn_save   (fast mode, detached)
//! ```
//!
//! At most one change is being forwarded at any time. In fast mode the
//! checkpoint save starts alongside the forward, so a crash can leave the
//! checkpoint ahead of a change that never reached the queue; the periodic
//! and one-time re-indexers are the backstop for that window. Safe mode
//! saves only after the forward succeeds.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::checkpoint::{CheckpointManager, Stage};
use crate::config::{CheckpointMode, WatchConfig, WatchState};
use crate::error::WatchError;
use crate::feed::{ChangeStream, ChangesTransport, FeedControl, FeedOptions, FeedSource};
use crate::forwarder::RetryingForwarder;
use crate::indexer::DownstreamIndexer;
use crate::progress::{MetricsSink, ProgressReporter, QueueBacklog};
use crate::report::ErrorReporter;
use crate::tracker::SequenceTracker;
use crate::types::{ChangeEvent, FeedEvent};

/// Handles owned while the watch is running.
pub(crate) struct Running {
    control: FeedControl,
    shutdown: watch::Sender<bool>,
    consumer: JoinHandle<()>,
    tracker: JoinHandle<()>,
}

/// Supervisor for the change feed, forwarding, checkpointing and the
/// downstream indexers' lifecycle.
///
/// Build one with [`WatchBuilder`](crate::builder::WatchBuilder).
pub struct Watch {
    pub(crate) config: WatchConfig,
    pub(crate) transport: Arc<dyn ChangesTransport>,
    pub(crate) forwarder: Arc<RetryingForwarder>,
    pub(crate) checkpoints: CheckpointManager,
    pub(crate) indexers: Vec<Arc<dyn DownstreamIndexer>>,
    pub(crate) backlog: Option<Arc<dyn QueueBacklog>>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) state: watch::Sender<WatchState>,
    pub(crate) stream_open: Arc<watch::Sender<bool>>,
    pub(crate) running: Mutex<Option<Running>>,
}

impl Watch {
    /// Current lifecycle state.
    ///
    /// This tracks `start()`/`stop()` only. A feed that ends on its own
    /// (the `terminate` transport policy) leaves the watch `Running` until
    /// `stop()` is called; use [`closed`](Self::closed) to observe that.
    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    /// Resolves once the change stream has ended, whether through
    /// [`stop`](Self::stop) or because the feed terminated on its own.
    pub async fn closed(&self) {
        let mut open = self.stream_open.subscribe();
        let _ = open.wait_for(|open| !*open).await;
    }

    /// Start following the feed from the stored checkpoint.
    pub async fn start(&self) -> Result<(), WatchError> {
        let mut running = self.running.lock().await;
        let state = self.state();
        if running.is_some() || state != WatchState::Stopped {
            return Err(WatchError::InvalidState { state, action: "start" });
        }
        self.state.send_replace(WatchState::Starting);
        tracing::info!("starting watch");

        if let Err(e) = self.checkpoints.mark_stage(Stage::Watch).await {
            self.state.send_replace(WatchState::Stopped);
            return Err(e);
        }

        let tracker = SequenceTracker::new(Arc::clone(&self.transport), self.config.sequence_refresh());
        let head = tracker.subscribe();
        let tracker_task = tracker.spawn();

        for indexer in &self.indexers {
            self.launch(indexer);
        }

        let since = match self.checkpoints.resume_cursor().await {
            Ok(cursor) => cursor,
            Err(e) => {
                tracker_task.abort();
                self.stop_indexers().await;
                self.state.send_replace(WatchState::Stopped);
                return Err(e);
            }
        };

        let stream = FeedSource::new(Arc::clone(&self.transport)).start(FeedOptions {
            since,
            batch_size: self.config.batch_size,
            include_documents: self.config.include_documents,
            error_policy: self.config.transport_error_policy,
            reconnect_backoff: self.config.backoff(),
        });
        let control = stream.control();

        let pipeline = Pipeline {
            forwarder: Arc::clone(&self.forwarder),
            checkpoints: self.checkpoints.clone(),
            progress: Arc::new(ProgressReporter::new(
                Arc::clone(&self.metrics),
                self.backlog.clone(),
                head,
            )),
            reporter: Arc::clone(&self.reporter),
            mode: self.config.checkpoint_mode,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.stream_open.send_replace(true);
        let consumer = tokio::spawn(consume(
            stream,
            pipeline,
            shutdown_rx,
            Arc::clone(&self.stream_open),
        ));

        *running = Some(Running {
            control,
            shutdown: shutdown_tx,
            consumer,
            tracker: tracker_task,
        });
        self.state.send_replace(WatchState::Running);
        tracing::info!(mode = ?self.config.checkpoint_mode, "watch running");
        Ok(())
    }

    /// Stop the feed, cancel any in-flight forward, and stop every
    /// downstream indexer.
    ///
    /// Each indexer is stopped independently; all failures are reported
    /// and returned together as [`WatchError::Shutdown`]. Stopping a watch
    /// that is not running is a no-op.
    pub async fn stop(&self) -> Result<(), WatchError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        self.state.send_replace(WatchState::Stopping);
        tracing::info!("stopping watch");

        running.control.stop();
        let _ = running.shutdown.send(true);
        running.tracker.abort();

        let failures = self.stop_indexers().await;

        if let Err(e) = running.consumer.await {
            if e.is_panic() {
                tracing::error!(error = %e, "change consumer panicked");
            }
        }
        self.stream_open.send_replace(false);
        self.state.send_replace(WatchState::Stopped);

        if failures.is_empty() {
            tracing::info!("watch stopped");
            Ok(())
        } else {
            tracing::warn!(failed = failures.len(), "watch stopped with shutdown failures");
            Err(WatchError::Shutdown { failures })
        }
    }

    /// Fire-and-forget start of one downstream indexer.
    fn launch(&self, indexer: &Arc<dyn DownstreamIndexer>) {
        let indexer = Arc::clone(indexer);
        let reporter = Arc::clone(&self.reporter);
        tokio::spawn(async move {
            tracing::info!(indexer = indexer.name(), "starting indexer");
            if let Err(e) = indexer.run().await {
                reporter.report(&e, &[("indexer", indexer.name().to_string())]);
            }
        });
    }

    async fn stop_indexers(&self) -> Vec<WatchError> {
        let results = futures::future::join_all(self.indexers.iter().map(|ix| ix.stop())).await;

        let mut failures = Vec::new();
        for (indexer, result) in self.indexers.iter().zip(results) {
            match result {
                Ok(()) => tracing::debug!(indexer = indexer.name(), "indexer stopped"),
                Err(e) => {
                    self.reporter.report(
                        &e,
                        &[("indexer", indexer.name().to_string()), ("phase", "shutdown".into())],
                    );
                    failures.push(e);
                }
            }
        }
        failures
    }
}

/// Everything the consumer task needs per change.
struct Pipeline {
    forwarder: Arc<RetryingForwarder>,
    checkpoints: CheckpointManager,
    progress: Arc<ProgressReporter>,
    reporter: Arc<dyn ErrorReporter>,
    mode: CheckpointMode,
}

impl Pipeline {
    /// Forward one change and checkpoint it. `false` if shutdown cut the
    /// forward short.
    async fn process(&self, change: &ChangeEvent, shutdown: &mut watch::Receiver<bool>) -> bool {
        tracing::debug!(id = %change.id, cursor = %change.cursor, "processing change");

        let outcome = match self.mode {
            CheckpointMode::Fast => {
                // detached: the save is not ordered after the forward
                let _save = self.checkpoints.spawn_save(change.cursor.clone());
                self.forwarder.forward_until(change, shutdown).await
            }
            CheckpointMode::Safe => {
                let outcome = self.forwarder.forward_until(change, shutdown).await;
                if outcome.is_forwarded() {
                    self.checkpoints.save(&change.cursor).await;
                }
                outcome
            }
        };

        if !outcome.is_forwarded() {
            tracing::info!(id = %change.id, cursor = %change.cursor, "forward cancelled by shutdown");
            return false;
        }

        self.progress.spawn_record(change.cursor.clone());
        true
    }
}

async fn consume(
    mut stream: ChangeStream,
    pipeline: Pipeline,
    mut shutdown: watch::Receiver<bool>,
    open: Arc<watch::Sender<bool>>,
) {
    while let Some(event) = stream.next().await {
        match event {
            FeedEvent::Error(err) => {
                pipeline.reporter.report(
                    &err,
                    &[
                        ("source", "changes".into()),
                        ("transient", err.is_transient().to_string()),
                    ],
                );
            }
            FeedEvent::Change(change) => {
                if !change.has_id() {
                    tracing::debug!(cursor = %change.cursor, "skipping change without id");
                    continue;
                }
                stream.pause();
                if !pipeline.process(&change, &mut shutdown).await {
                    break;
                }
                stream.resume();
            }
        }
    }

    open.send_replace(false);
    tracing::debug!("change consumer finished");
}
