//! Sequence tracker: periodically refreshes the feed head for lag display.
//!
//! The head value is informational only; resumption always uses the
//! checkpoint. The tracker task is the single writer; readers hold an
//! [`AggregateSequence`] handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cursor::Cursor;
use crate::error::WatchError;
use crate::feed::ChangesTransport;

/// Read handle for the latest known feed head.
#[derive(Clone)]
pub struct AggregateSequence {
    rx: watch::Receiver<Option<Cursor>>,
}

impl AggregateSequence {
    /// A handle that never changes; useful when no tracker runs.
    pub fn fixed(head: Option<Cursor>) -> Self {
        let (_tx, rx) = watch::channel(head);
        Self { rx }
    }

    pub fn current(&self) -> Option<Cursor> {
        self.rx.borrow().clone()
    }

    /// The head's numeric position, when known.
    pub fn position(&self) -> Option<u64> {
        self.rx.borrow().as_ref().and_then(Cursor::position)
    }
}

pub struct SequenceTracker {
    transport: Arc<dyn ChangesTransport>,
    interval: Duration,
    head: watch::Sender<Option<Cursor>>,
}

impl SequenceTracker {
    pub fn new(transport: Arc<dyn ChangesTransport>, interval: Duration) -> Self {
        let (head, _rx) = watch::channel(None);
        Self { transport, interval, head }
    }

    pub fn subscribe(&self) -> AggregateSequence {
        AggregateSequence { rx: self.head.subscribe() }
    }

    /// Query the head once. On failure the previous value is kept.
    pub async fn refresh(&self) -> Result<Cursor, WatchError> {
        let head = self.transport.head().await?;
        self.head.send_replace(Some(head.clone()));
        Ok(head)
    }

    /// Refresh immediately and then every `interval` until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.refresh().await {
                    Ok(head) => tracing::trace!(head = %head, "feed head refreshed"),
                    Err(e) => tracing::warn!(error = %e, "failed to refresh feed head"),
                }
            }
        })
    }
}
