//! Watch configuration and lifecycle state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

/// When the cursor of a processed change is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Save concurrently with the forward. A crash between the save and the
    /// forward's completion can skip that change on restart.
    #[default]
    Fast,
    /// Save only after the forward has been accepted by the queue.
    Safe,
}

/// What the feed does after a transport-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorPolicy {
    /// Report, wait out the backoff, and re-issue the long-poll from the
    /// last delivered cursor.
    #[default]
    Reconnect,
    /// Report and stop the feed.
    Terminate,
}

/// Configuration for a [`Watch`](crate::supervisor::Watch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Changes requested per long-poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Ask the feed to inline full documents.
    #[serde(default)]
    pub include_documents: bool,
    #[serde(default = "default_backoff_exponent")]
    pub backoff_exponent: f64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// How often the feed head is refreshed for progress reporting.
    #[serde(default = "default_sequence_refresh_ms")]
    pub sequence_refresh_ms: u64,
    #[serde(default)]
    pub checkpoint_mode: CheckpointMode,
    #[serde(default)]
    pub transport_error_policy: TransportErrorPolicy,
    /// Server-side long-poll timeout.
    #[serde(default = "default_longpoll_timeout_ms")]
    pub longpoll_timeout_ms: u64,
}

fn default_batch_size() -> u32 { 1 }
fn default_backoff_exponent() -> f64 { 2.0 }
fn default_backoff_cap_ms() -> u64 { 30_000 }
fn default_sequence_refresh_ms() -> u64 { 5_000 }
fn default_longpoll_timeout_ms() -> u64 { 60_000 }

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            include_documents: false,
            backoff_exponent: default_backoff_exponent(),
            backoff_cap_ms: default_backoff_cap_ms(),
            sequence_refresh_ms: default_sequence_refresh_ms(),
            checkpoint_mode: CheckpointMode::default(),
            transport_error_policy: TransportErrorPolicy::default(),
            longpoll_timeout_ms: default_longpoll_timeout_ms(),
        }
    }
}

impl WatchConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_exponent, Duration::from_millis(self.backoff_cap_ms))
    }

    pub fn sequence_refresh(&self) -> Duration {
        Duration::from_millis(self.sequence_refresh_ms)
    }

    pub fn longpoll_timeout(&self) -> Duration {
        Duration::from_millis(self.longpoll_timeout_ms)
    }
}

/// Lifecycle state of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}
