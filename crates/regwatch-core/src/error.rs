//! Error types for the regwatch pipeline.

use thiserror::Error;

use crate::config::WatchState;

/// Errors that can occur while following the change feed.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Forward error for '{id}': {reason}")]
    Forward { id: String, reason: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Indexer '{name}' failed: {reason}")]
    Indexer { name: String, reason: String },

    #[error("Shutdown failed for {} component(s)", .failures.len())]
    Shutdown { failures: Vec<WatchError> },

    #[error("Watch is {state}, cannot {action}")]
    InvalidState { state: WatchState, action: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl WatchError {
    /// Returns `true` for failures that are expected to clear on their own
    /// (network blips, a busy queue, a slow checkpoint store).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Forward { .. } | Self::Checkpoint(_)
        )
    }
}
