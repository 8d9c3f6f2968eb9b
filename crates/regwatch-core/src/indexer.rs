//! Downstream indexers supervised by the watch.
//!
//! The watch owns only their lifecycle: it starts each one when it starts
//! and stops each one when it stops. What they index is their own business.

use async_trait::async_trait;

use crate::error::WatchError;

/// A sibling indexing component (queue drain, periodic or one-time re-index).
#[async_trait]
pub trait DownstreamIndexer: Send + Sync {
    /// Name used in logs and error reports.
    fn name(&self) -> &str;

    /// Start the indexer's own loop. Must return promptly; the indexer keeps
    /// running in the background.
    async fn run(&self) -> Result<(), WatchError>;

    /// Stop the indexer, resolving once it has stopped.
    async fn stop(&self) -> Result<(), WatchError> {
        Ok(())
    }
}
