//! Progress reporting: lag gauges and a human-readable status line per change.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::cursor::Cursor;
use crate::error::WatchError;
use crate::tracker::AggregateSequence;

/// Gauge name for the feed head position.
pub const SEQUENCE_TOTAL: &str = "sequence.total";
/// Gauge name for the last processed position.
pub const SEQUENCE_CURRENT: &str = "sequence.current";

/// Destination for numeric gauges.
pub trait MetricsSink: Send + Sync {
    fn gauge(&self, name: &str, value: f64);
}

/// Emits gauges as `debug` events on the `regwatch::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn gauge(&self, name: &str, value: f64) {
        tracing::debug!(target: "regwatch::metrics", gauge = name, value, "gauge");
    }
}

/// Source of the downstream queue's backlog length.
#[async_trait]
pub trait QueueBacklog: Send + Sync {
    async fn queue_length(&self) -> Result<u64, WatchError>;
}

/// Position of the watch relative to the feed head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(current: u64, total: u64) -> Self {
        Self { current, total }
    }

    /// `max(current, 1) / total * 100` to two decimals; `"0.00"` while the
    /// head is unknown (`total == 0`).
    pub fn percent(&self) -> String {
        if self.total == 0 {
            return "0.00".into();
        }
        let pct = self.current.max(1) as f64 / self.total as f64 * 100.0;
        format!("{pct:.2}")
    }

    /// Changes between the processed position and the head.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.current)
    }
}

pub struct ProgressReporter {
    metrics: Arc<dyn MetricsSink>,
    backlog: Option<Arc<dyn QueueBacklog>>,
    head: AggregateSequence,
}

impl ProgressReporter {
    pub fn new(
        metrics: Arc<dyn MetricsSink>,
        backlog: Option<Arc<dyn QueueBacklog>>,
        head: AggregateSequence,
    ) -> Self {
        Self { metrics, backlog, head }
    }

    /// Emit gauges and log a status line for a processed `cursor`.
    ///
    /// Returns the computed progress, or `None` when the cursor has no
    /// numeric position.
    pub async fn record(&self, cursor: &Cursor) -> Option<Progress> {
        let Some(current) = cursor.position() else {
            tracing::debug!(cursor = %cursor, "cursor has no numeric position, skipping progress");
            return None;
        };
        let total = self.head.position().unwrap_or(0);
        let progress = Progress::new(current, total);

        self.metrics.gauge(SEQUENCE_TOTAL, total as f64);
        self.metrics.gauge(SEQUENCE_CURRENT, current as f64);

        let backlog = match &self.backlog {
            Some(source) => match source.queue_length().await {
                Ok(len) => Some(len),
                Err(e) => {
                    tracing::debug!(error = %e, "failed to fetch queue length");
                    None
                }
            },
            None => None,
        };

        tracing::info!(
            current,
            total,
            percent = %progress.percent(),
            remaining = progress.remaining(),
            backlog = ?backlog,
            "watch progress"
        );
        Some(progress)
    }

    /// [`record`](Self::record) on a detached task, off the processing path.
    pub fn spawn_record(self: &Arc<Self>, cursor: Cursor) -> JoinHandle<()> {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            reporter.record(&cursor).await;
        })
    }
}

// ─── In-memory sink (for testing) ─────────────────────────────────────────────

use std::sync::Mutex;

/// Records every gauge call.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    gauges: Mutex<Vec<(String, f64)>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gauges(&self) -> Vec<(String, f64)> {
        self.gauges.lock().unwrap().clone()
    }

    /// Most recent value recorded for `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.gauges
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

impl MetricsSink for MemoryMetrics {
    fn gauge(&self, name: &str, value: f64) {
        self.gauges.lock().unwrap().push((name.to_string(), value));
    }
}
