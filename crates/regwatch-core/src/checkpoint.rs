//! Checkpoint manager: persists the watch's feed position for restarts.
//!
//! The checkpoint records the cursor of the last processed change plus a
//! coarse stage marker for external observers. On restart the feed resumes
//! strictly after the stored cursor.
//!
//! Saves are best-effort: a failed save is reported and superseded by the
//! next one, never retried or rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::cursor::Cursor;
use crate::error::WatchError;
use crate::report::ErrorReporter;

/// Coarse state-machine breadcrumb stored next to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// A one-time bulk index is populating the search index.
    Bootstrap,
    /// Following the live change feed.
    Watch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Watch => write!(f, "watch"),
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bootstrap" => Ok(Self::Bootstrap),
            "watch" => Ok(Self::Watch),
            other => Err(WatchError::Checkpoint(format!("unknown stage '{other}'"))),
        }
    }
}

/// A persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Cursor of the last processed change.
    pub cursor: Option<Cursor>,
    pub stage: Option<Stage>,
    /// Unix timestamp of the last write.
    pub updated_at: i64,
}

/// Trait for storing and loading the checkpoint.
///
/// Implementations include `MemoryCheckpointStore` here and the file and
/// SQLite stores in `regwatch-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Option<Checkpoint>, WatchError>;

    /// Upsert the cursor, keeping the stage.
    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), WatchError>;

    /// Upsert the stage, keeping the cursor.
    async fn save_stage(&self, stage: Stage) -> Result<(), WatchError>;
}

/// Manages checkpoint reads/writes for a watch.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    reporter: Arc<dyn ErrorReporter>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { store, reporter }
    }

    /// The cursor to resume after, or the feed origin when nothing is stored.
    pub async fn resume_cursor(&self) -> Result<Cursor, WatchError> {
        let cursor = self.store.load().await?.and_then(|cp| cp.cursor);
        Ok(cursor.unwrap_or_else(Cursor::origin))
    }

    pub async fn mark_stage(&self, stage: Stage) -> Result<(), WatchError> {
        self.store.save_stage(stage).await
    }

    /// Persist `cursor`, reporting (not returning) a failure.
    pub async fn save(&self, cursor: &Cursor) {
        match self.store.save_cursor(cursor).await {
            Ok(()) => tracing::trace!(cursor = %cursor, "checkpoint saved"),
            Err(e) => self.reporter.report(&e, &[("cursor", cursor.to_string())]),
        }
    }

    /// Persist `cursor` on a detached task.
    ///
    /// The returned handle may be dropped; the save still runs.
    pub fn spawn_save(&self, cursor: Cursor) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move { manager.save(&cursor).await })
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral watches.
///
/// Keeps every saved cursor in order so tests can inspect the save history.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<Option<Checkpoint>>,
    history: Mutex<Vec<Cursor>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `cursor`.
    pub fn with_cursor(cursor: impl Into<Cursor>) -> Self {
        let store = Self::default();
        *store.data.lock().unwrap() = Some(Checkpoint {
            cursor: Some(cursor.into()),
            stage: None,
            updated_at: 0,
        });
        store
    }

    /// Every cursor passed to `save_cursor`, oldest first.
    pub fn history(&self) -> Vec<Cursor> {
        self.history.lock().unwrap().clone()
    }

    pub fn snapshot(&self) -> Option<Checkpoint> {
        self.data.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, WatchError> {
        Ok(self.data.lock().unwrap().clone())
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), WatchError> {
        let now = chrono::Utc::now().timestamp();
        let mut data = self.data.lock().unwrap();
        let cp = data.get_or_insert(Checkpoint { cursor: None, stage: None, updated_at: now });
        cp.cursor = Some(cursor.clone());
        cp.updated_at = now;
        self.history.lock().unwrap().push(cursor.clone());
        Ok(())
    }

    async fn save_stage(&self, stage: Stage) -> Result<(), WatchError> {
        let now = chrono::Utc::now().timestamp();
        let mut data = self.data.lock().unwrap();
        let cp = data.get_or_insert(Checkpoint { cursor: None, stage: None, updated_at: now });
        cp.stage = Some(stage);
        cp.updated_at = now;
        Ok(())
    }
}
