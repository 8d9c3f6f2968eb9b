//! regwatch-storage: durable checkpoint stores for regwatch.
//!
//! Backends:
//! - [`file`]: one JSON document, replaced atomically on every save
//! - [`sqlite`]: SQLite via `sqlx`, one row per watcher (feature `sqlite`)
//!
//! The in-memory store lives in `regwatch_core::checkpoint`.

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "file")]
pub use file::JsonFileCheckpointStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointStore;
