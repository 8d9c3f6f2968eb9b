//! Retrying forwarder: pushes one change into the forwarding queue.
//!
//! There is no retry ceiling: a failing write is retried with
//! [`BackoffPolicy`] delays until it succeeds or the caller's shutdown
//! signal fires. The retry count is never persisted.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::backoff::BackoffPolicy;
use crate::error::WatchError;
use crate::report::ErrorReporter;
use crate::types::{ChangeEvent, QueuedChange};

/// The downstream write target for changes.
#[async_trait]
pub trait ForwardingQueue: Send + Sync {
    /// Upsert `record` keyed by its `object_id`. Any error is a failed attempt.
    async fn save_object(&self, record: &QueuedChange) -> Result<(), WatchError>;
}

/// How a forward ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The queue accepted the record after `attempts` tries.
    Forwarded { attempts: u32 },
    /// Shutdown was signalled before the queue accepted the record.
    Cancelled { attempts: u32 },
}

impl ForwardOutcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded { .. })
    }
}

pub struct RetryingForwarder {
    queue: Arc<dyn ForwardingQueue>,
    backoff: BackoffPolicy,
    reporter: Arc<dyn ErrorReporter>,
}

impl RetryingForwarder {
    pub fn new(
        queue: Arc<dyn ForwardingQueue>,
        backoff: BackoffPolicy,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self { queue, backoff, reporter }
    }

    /// Forward `change`, retrying until the queue accepts it.
    ///
    /// Returns the number of attempts made.
    pub async fn forward(&self, change: &ChangeEvent) -> u32 {
        let (_keep, mut never) = watch::channel(false);
        match self.forward_until(change, &mut never).await {
            ForwardOutcome::Forwarded { attempts } | ForwardOutcome::Cancelled { attempts } => {
                attempts
            }
        }
    }

    /// Forward `change`, giving up once `shutdown` becomes `true`.
    ///
    /// Shutdown is observed both during a write and during the backoff wait.
    pub async fn forward_until(
        &self,
        change: &ChangeEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ForwardOutcome {
        let record = QueuedChange::new(change);
        let mut attempt = 0u32;

        loop {
            let result = tokio::select! {
                result = self.queue.save_object(&record) => result,
                _ = cancelled(shutdown) => {
                    return ForwardOutcome::Cancelled { attempts: attempt };
                }
            };

            let err = match result {
                Ok(()) => {
                    tracing::debug!(id = %change.id, cursor = %change.cursor, attempt, "change forwarded");
                    return ForwardOutcome::Forwarded { attempts: attempt + 1 };
                }
                Err(err) => err,
            };

            let wait = self.backoff.delay(attempt);
            tracing::warn!(
                id = %change.id,
                cursor = %change.cursor,
                attempt,
                delay_ms = wait.as_millis() as u64,
                transient = err.is_transient(),
                error = %err,
                "forward failed, retrying"
            );
            self.reporter.report(
                &err,
                &[
                    ("id", change.id.clone()),
                    ("cursor", change.cursor.to_string()),
                    ("attempt", attempt.to_string()),
                    ("transient", err.is_transient().to_string()),
                ],
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancelled(shutdown) => {
                    return ForwardOutcome::Cancelled { attempts: attempt + 1 };
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }
}

/// Resolves once `shutdown` is `true`; never resolves if its sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
