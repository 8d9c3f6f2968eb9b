//! regwatch-http: HTTP collaborators for the regwatch pipeline.
//!
//! - [`CouchChangesClient`]: CouchDB `_changes` long-poll transport and
//!   head-sequence lookup
//! - [`SearchQueueClient`]: search-index queue writes and backlog length

pub mod changes;
pub mod queue;

pub use changes::{cursor_from_json, parse_changes, CouchChangesClient};
pub use queue::{SearchQueueClient, SearchQueueConfig};

use regwatch_core::WatchError;
use serde::de::DeserializeOwned;

/// Read a JSON body, turning non-2xx statuses into transport errors.
pub(crate) async fn read_json<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, WatchError> {
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(WatchError::Transport(format!("HTTP {status}: {body}")));
    }

    resp.json::<T>()
        .await
        .map_err(|e| WatchError::Transport(e.to_string()))
}

pub(crate) fn invalid_url(e: impl std::fmt::Display) -> WatchError {
    WatchError::Config(format!("invalid url: {e}"))
}
