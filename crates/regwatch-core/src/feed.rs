//! Feed source: a resumable long-poll consumer with pause/resume flow control.
//!
//! # Flow
//!
//! ```text
//! ChangesTransport ──long-poll──▶ pump task ──mpsc(1)──▶ ChangeStream::next()
//!                                    ▲                        │
//!                                    └────── FeedControl ◀────┘
//!                                       (pause / resume / stop)
//! ```
//!
//! The pump does not start a new read while paused, and `ChangeStream`
//! holds back any event that arrived after `pause()` until `resume()`.
//! Between the two, at most one change is buffered.
//!
//! Cursors are opaque: the next `since` is always the last delivered
//! cursor, or the page's own `last_cursor` when the transport reports one.
//! The only change ever dropped is one whose cursor equals the current
//! `since`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::backoff::BackoffPolicy;
use crate::config::TransportErrorPolicy;
use crate::cursor::Cursor;
use crate::error::WatchError;
use crate::types::{ChangeEvent, FeedEvent};

/// One long-poll response.
#[derive(Debug, Clone, Default)]
pub struct ChangesPage {
    pub changes: Vec<ChangeEvent>,
    /// The feed's own "next since" value, when it reports one.
    pub last_cursor: Option<Cursor>,
}

/// Remote change-feed transport.
#[async_trait]
pub trait ChangesTransport: Send + Sync + 'static {
    /// Long-poll for up to `batch_size` changes after `since`.
    async fn changes(
        &self,
        since: &Cursor,
        batch_size: u32,
        include_documents: bool,
    ) -> Result<ChangesPage, WatchError>;

    /// The feed's current head position.
    async fn head(&self) -> Result<Cursor, WatchError>;
}

/// Parameters for [`FeedSource::start`].
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Resume after this cursor.
    pub since: Cursor,
    pub batch_size: u32,
    pub include_documents: bool,
    pub error_policy: TransportErrorPolicy,
    /// Delay between reconnects under [`TransportErrorPolicy::Reconnect`].
    pub reconnect_backoff: BackoffPolicy,
}

impl FeedOptions {
    pub fn since(cursor: impl Into<Cursor>) -> Self {
        Self {
            since: cursor.into(),
            batch_size: 1,
            include_documents: false,
            error_policy: TransportErrorPolicy::default(),
            reconnect_backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Running,
    Paused,
    Stopped,
}

/// Cloneable handle for pausing, resuming and stopping a feed.
#[derive(Clone)]
pub struct FeedControl {
    flow: Arc<watch::Sender<Flow>>,
}

impl FeedControl {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(Flow::Running);
        Self { flow: Arc::new(tx) }
    }

    /// Stop delivering events until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.flow.send_if_modified(|flow| {
            let running = *flow == Flow::Running;
            if running {
                *flow = Flow::Paused;
            }
            running
        });
    }

    pub fn resume(&self) {
        self.flow.send_if_modified(|flow| {
            let paused = *flow == Flow::Paused;
            if paused {
                *flow = Flow::Running;
            }
            paused
        });
    }

    /// Terminate the feed. Idempotent.
    pub fn stop(&self) {
        self.flow.send_if_modified(|flow| {
            let changed = *flow != Flow::Stopped;
            *flow = Flow::Stopped;
            changed
        });
    }

    pub fn is_stopped(&self) -> bool {
        *self.flow.borrow() == Flow::Stopped
    }

    fn subscribe(&self) -> watch::Receiver<Flow> {
        self.flow.subscribe()
    }
}

/// Resumable change feed over a [`ChangesTransport`].
#[derive(Clone)]
pub struct FeedSource {
    transport: Arc<dyn ChangesTransport>,
}

impl FeedSource {
    pub fn new(transport: Arc<dyn ChangesTransport>) -> Self {
        Self { transport }
    }

    /// Start long-polling after `options.since`.
    pub fn start(&self, options: FeedOptions) -> ChangeStream {
        let control = FeedControl::new();
        let (tx, rx) = mpsc::channel(1);

        tracing::info!(
            since = %options.since,
            batch_size = options.batch_size,
            include_documents = options.include_documents,
            "starting change feed"
        );

        tokio::spawn(pump(
            Arc::clone(&self.transport),
            options,
            tx,
            control.subscribe(),
        ));

        ChangeStream {
            rx,
            flow: control.subscribe(),
            control,
            held: None,
        }
    }
}

/// Consumer side of a started feed.
///
/// Dropping the stream stops the feed.
pub struct ChangeStream {
    rx: mpsc::Receiver<FeedEvent>,
    flow: watch::Receiver<Flow>,
    control: FeedControl,
    held: Option<FeedEvent>,
}

impl ChangeStream {
    /// Next event, waiting out any pause. `None` once the feed is stopped
    /// or the transport task has ended.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        loop {
            if !until_running(&mut self.flow).await {
                return None;
            }
            if let Some(event) = self.held.take() {
                return Some(event);
            }

            let mut flow = self.flow.clone();
            tokio::select! {
                event = self.rx.recv() => match event {
                    // re-check the gate: a pause may have landed while waiting
                    Some(event) => self.held = Some(event),
                    None => {
                        self.control.stop();
                        return None;
                    }
                },
                _ = stopped(&mut flow) => return None,
            }
        }
    }

    pub fn control(&self) -> FeedControl {
        self.control.clone()
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn stop(&self) {
        self.control.stop();
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.control.stop();
    }
}

async fn stopped(flow: &mut watch::Receiver<Flow>) {
    let _ = flow.wait_for(|f| *f == Flow::Stopped).await;
}

/// Wait while paused; `false` once stopped.
async fn until_running(flow: &mut watch::Receiver<Flow>) -> bool {
    matches!(
        flow.wait_for(|f| *f != Flow::Paused).await.map(|f| *f),
        Ok(Flow::Running)
    )
}

async fn pump(
    transport: Arc<dyn ChangesTransport>,
    options: FeedOptions,
    tx: mpsc::Sender<FeedEvent>,
    mut flow: watch::Receiver<Flow>,
) {
    let mut since = options.since.clone();
    let mut consecutive_errors = 0u32;

    loop {
        if !until_running(&mut flow).await {
            break;
        }

        let page = tokio::select! {
            page = transport.changes(&since, options.batch_size, options.include_documents) => page,
            _ = stopped(&mut flow) => break,
        };

        match page {
            Ok(page) => {
                consecutive_errors = 0;
                for change in page.changes {
                    // an inclusive transport may hand back the resume position itself
                    if change.cursor == since {
                        tracing::debug!(cursor = %change.cursor, "dropping already-seen change");
                        continue;
                    }
                    since = change.cursor.clone();
                    tokio::select! {
                        sent = tx.send(FeedEvent::Change(change)) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                        _ = stopped(&mut flow) => return,
                    }
                }
                if let Some(last) = page.last_cursor {
                    since = last;
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    transient = err.is_transient(),
                    since = %since,
                    "change feed transport error"
                );
                tokio::select! {
                    sent = tx.send(FeedEvent::Error(err)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                    _ = stopped(&mut flow) => return,
                }

                match options.error_policy {
                    TransportErrorPolicy::Terminate => {
                        // closing the channel lets the consumer drain the error first
                        tracing::warn!("terminating change feed after transport error");
                        break;
                    }
                    TransportErrorPolicy::Reconnect => {
                        let wait = options.reconnect_backoff.delay(consecutive_errors);
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        tracing::info!(delay_ms = wait.as_millis() as u64, since = %since, "reconnecting change feed");
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = stopped(&mut flow) => break,
                        }
                    }
                }
            }
        }
    }

    tracing::debug!(since = %since, "change feed stopped");
}
