//! JSON-file checkpoint store.
//!
//! The checkpoint is a single JSON document. Each save writes a sibling
//! temp file and renames it over the original, so readers never observe a
//! half-written checkpoint.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use regwatch_core::checkpoint::{Checkpoint, CheckpointStore, Stage};
use regwatch_core::{Cursor, WatchError};

/// Checkpoint persisted as a JSON file.
pub struct JsonFileCheckpointStore {
    path: PathBuf,
    // serialises read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl JsonFileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<Checkpoint>, WatchError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(&self.path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| storage_err(&self.path, e))
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), WatchError> {
        let body = serde_json::to_vec_pretty(checkpoint).map_err(|e| storage_err(&self.path, e))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| storage_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_err(&self.path, e))
    }

    async fn update(&self, apply: impl FnOnce(&mut Checkpoint)) -> Result<(), WatchError> {
        let _guard = self.lock.lock().await;
        let now = chrono::Utc::now().timestamp();
        let mut checkpoint = self
            .read()
            .await?
            .unwrap_or(Checkpoint { cursor: None, stage: None, updated_at: now });
        apply(&mut checkpoint);
        checkpoint.updated_at = now;
        self.write(&checkpoint).await
    }
}

fn storage_err(path: &Path, e: impl std::fmt::Display) -> WatchError {
    WatchError::Checkpoint(format!("{}: {e}", path.display()))
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, WatchError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), WatchError> {
        self.update(|cp| cp.cursor = Some(cursor.clone())).await?;
        debug!(%cursor, path = %self.path.display(), "checkpoint saved");
        Ok(())
    }

    async fn save_stage(&self, stage: Stage) -> Result<(), WatchError> {
        self.update(|cp| cp.stage = Some(stage)).await?;
        debug!(%stage, path = %self.path.display(), "stage saved");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
