//! regwatch-core: follow a registry change feed into a search-index queue.
//!
//! # Architecture
//!
//! ```text
//! WatchBuilder → Watch (supervisor)
//!                  ├── FeedSource         (long-poll, pause/resume/stop)
//!                  ├── RetryingForwarder  (unbounded retry, BackoffPolicy)
//!                  ├── CheckpointManager  (resume cursor, stage marker)
//!                  ├── SequenceTracker    (feed head, every 5s)
//!                  ├── ProgressReporter   (gauges + status line)
//!                  └── DownstreamIndexers (lifecycle only)
//! ```
//!
//! Delivery is at-least-once: a change may be forwarded more than once
//! after a restart, and in the default fast checkpoint mode a crash can
//! skip one change.

pub mod backoff;
pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod error;
pub mod feed;
pub mod forwarder;
pub mod indexer;
pub mod progress;
pub mod report;
pub mod supervisor;
pub mod tracker;
pub mod types;

pub use backoff::BackoffPolicy;
pub use builder::WatchBuilder;
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore, Stage};
pub use config::{CheckpointMode, TransportErrorPolicy, WatchConfig, WatchState};
pub use cursor::Cursor;
pub use error::WatchError;
pub use feed::{ChangeStream, ChangesPage, ChangesTransport, FeedControl, FeedOptions, FeedSource};
pub use forwarder::{ForwardOutcome, ForwardingQueue, RetryingForwarder};
pub use indexer::DownstreamIndexer;
pub use progress::{MetricsSink, Progress, ProgressReporter, QueueBacklog, TracingMetrics};
pub use report::{ErrorReporter, MemoryReporter, TracingReporter};
pub use supervisor::Watch;
pub use tracker::{AggregateSequence, SequenceTracker};
pub use types::{ChangeEvent, FeedEvent, QueuedChange};
