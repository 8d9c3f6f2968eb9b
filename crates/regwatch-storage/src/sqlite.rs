//! SQLite checkpoint store.
//!
//! One row per watcher id in `watch_checkpoints`; the cursor and the stage
//! marker are upserted independently. Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use regwatch_storage::sqlite::SqliteCheckpointStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCheckpointStore::open("./regwatch.db", "npm").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCheckpointStore::in_memory("npm").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use regwatch_core::checkpoint::{Checkpoint, CheckpointStore, Stage};
use regwatch_core::{Cursor, WatchError};

/// SQLite-backed checkpoint for one watcher.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    watcher_id: String,
}

fn db_err(e: sqlx::Error) -> WatchError {
    WatchError::Checkpoint(e.to_string())
}

impl SqliteCheckpointStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./regwatch.db"`) or a full
    /// SQLite URL (`"sqlite:./regwatch.db?mode=rwc"`).
    pub async fn open(path: &str, watcher_id: impl Into<String>) -> Result<Self, WatchError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let store = Self { pool, watcher_id: watcher_id.into() };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database. Data is lost when the pool is dropped.
    pub async fn in_memory(watcher_id: impl Into<String>) -> Result<Self, WatchError> {
        let pool = SqlitePool::connect("sqlite::memory:").await.map_err(db_err)?;
        let store = Self { pool, watcher_id: watcher_id.into() };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn watcher_id(&self) -> &str {
        &self.watcher_id
    }

    async fn init_schema(&self) -> Result<(), WatchError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS watch_checkpoints (
                watcher_id TEXT    NOT NULL PRIMARY KEY,
                cursor     TEXT,
                stage      TEXT,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Remove this watcher's checkpoint; the next start begins at the origin.
    pub async fn reset(&self) -> Result<(), WatchError> {
        sqlx::query("DELETE FROM watch_checkpoints WHERE watcher_id = ?")
            .bind(&self.watcher_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, WatchError> {
        let row = sqlx::query(
            "SELECT cursor, stage, updated_at FROM watch_checkpoints WHERE watcher_id = ?",
        )
        .bind(&self.watcher_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else { return Ok(None) };
        let stage = row
            .get::<Option<String>, _>("stage")
            .map(|s| s.parse::<Stage>())
            .transpose()?;

        Ok(Some(Checkpoint {
            cursor: row.get::<Option<String>, _>("cursor").map(Cursor::new),
            stage,
            updated_at: row.get("updated_at"),
        }))
    }

    async fn save_cursor(&self, cursor: &Cursor) -> Result<(), WatchError> {
        sqlx::query(
            "INSERT INTO watch_checkpoints (watcher_id, cursor, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (watcher_id) DO UPDATE
             SET cursor = excluded.cursor, updated_at = excluded.updated_at",
        )
        .bind(&self.watcher_id)
        .bind(cursor.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(watcher_id = %self.watcher_id, %cursor, "checkpoint saved");
        Ok(())
    }

    async fn save_stage(&self, stage: Stage) -> Result<(), WatchError> {
        sqlx::query(
            "INSERT INTO watch_checkpoints (watcher_id, stage, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (watcher_id) DO UPDATE
             SET stage = excluded.stage, updated_at = excluded.updated_at",
        )
        .bind(&self.watcher_id)
        .bind(stage.to_string())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(watcher_id = %self.watcher_id, %stage, "stage saved");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
