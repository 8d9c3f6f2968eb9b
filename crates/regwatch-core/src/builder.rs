//! Fluent builder API for creating a [`Watch`].
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use regwatch_core::{CheckpointMode, WatchBuilder, WatchConfig};
//! # fn example(
//! #     transport: Arc<dyn regwatch_core::ChangesTransport>,
//! #     queue: Arc<dyn regwatch_core::ForwardingQueue>,
//! #     store: Arc<dyn regwatch_core::CheckpointStore>,
//! # ) -> Result<(), regwatch_core::WatchError> {
//! let watch = WatchBuilder::new(transport, queue, store)
//!     .config(WatchConfig {
//!         checkpoint_mode: CheckpointMode::Safe,
//!         ..WatchConfig::default()
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::checkpoint::{CheckpointManager, CheckpointStore};
use crate::config::{WatchConfig, WatchState};
use crate::error::WatchError;
use crate::feed::ChangesTransport;
use crate::forwarder::{ForwardingQueue, RetryingForwarder};
use crate::indexer::DownstreamIndexer;
use crate::progress::{MetricsSink, QueueBacklog, TracingMetrics};
use crate::report::{ErrorReporter, TracingReporter};
use crate::supervisor::Watch;

/// Fluent builder for [`Watch`].
pub struct WatchBuilder {
    config: WatchConfig,
    transport: Arc<dyn ChangesTransport>,
    queue: Arc<dyn ForwardingQueue>,
    store: Arc<dyn CheckpointStore>,
    indexers: Vec<Arc<dyn DownstreamIndexer>>,
    backlog: Option<Arc<dyn QueueBacklog>>,
    metrics: Arc<dyn MetricsSink>,
    reporter: Arc<dyn ErrorReporter>,
}

impl WatchBuilder {
    pub fn new(
        transport: Arc<dyn ChangesTransport>,
        queue: Arc<dyn ForwardingQueue>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config: WatchConfig::default(),
            transport,
            queue,
            store,
            indexers: vec![],
            backlog: None,
            metrics: Arc::new(TracingMetrics),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Supervise a downstream indexer's lifecycle.
    pub fn indexer(mut self, indexer: Arc<dyn DownstreamIndexer>) -> Self {
        self.indexers.push(indexer);
        self
    }

    /// Source of the queue backlog shown in progress lines.
    pub fn backlog(mut self, backlog: Arc<dyn QueueBacklog>) -> Self {
        self.backlog = Some(backlog);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Validate the configuration and build the watch.
    pub fn build(self) -> Result<Watch, WatchError> {
        validate(&self.config)?;

        let forwarder = RetryingForwarder::new(
            self.queue,
            self.config.backoff(),
            Arc::clone(&self.reporter),
        );
        let checkpoints = CheckpointManager::new(self.store, Arc::clone(&self.reporter));
        let (state, _) = watch::channel(WatchState::Stopped);
        let (stream_open, _) = watch::channel(false);

        Ok(Watch {
            config: self.config,
            transport: self.transport,
            forwarder: Arc::new(forwarder),
            checkpoints,
            indexers: self.indexers,
            backlog: self.backlog,
            metrics: self.metrics,
            reporter: self.reporter,
            state,
            stream_open: Arc::new(stream_open),
            running: Mutex::new(None),
        })
    }
}

fn validate(config: &WatchConfig) -> Result<(), WatchError> {
    if config.batch_size == 0 {
        return Err(WatchError::Config("batch_size must be at least 1".into()));
    }
    if !(config.backoff_exponent.is_finite() && config.backoff_exponent > 0.0) {
        return Err(WatchError::Config("backoff_exponent must be a positive number".into()));
    }
    if config.backoff_cap_ms == 0 {
        return Err(WatchError::Config("backoff_cap_ms must be positive".into()));
    }
    if config.sequence_refresh_ms == 0 {
        return Err(WatchError::Config("sequence_refresh_ms must be positive".into()));
    }
    Ok(())
}
