//! Shared types for the change-stream pipeline.

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::WatchError;

// ─── ChangeEvent ──────────────────────────────────────────────────────────────

/// A single mutation reported by the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Identifier of the changed registry entry (package name).
    pub id: String,
    /// Feed position of this change.
    #[serde(rename = "seq")]
    pub cursor: Cursor,
    /// The raw change row as delivered by the transport.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new(id: impl Into<String>, cursor: impl Into<Cursor>) -> Self {
        Self {
            id: id.into(),
            cursor: cursor.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Attach the raw transport payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Changes without an entry id carry nothing to index.
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// The change row as forwarded downstream: the transport's raw row,
    /// with `id` and `seq` filled in when the row lacks them.
    pub fn to_row(&self) -> serde_json::Value {
        let mut row = match &self.payload {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        row.entry("id")
            .or_insert_with(|| serde_json::Value::String(self.id.clone()));
        row.entry("seq")
            .or_insert_with(|| serde_json::Value::String(self.cursor.to_string()));
        serde_json::Value::Object(row)
    }
}

// ─── FeedEvent ────────────────────────────────────────────────────────────────

/// What the feed hands to its consumer.
#[derive(Debug)]
pub enum FeedEvent {
    Change(ChangeEvent),
    Error(WatchError),
}

// ─── QueuedChange ─────────────────────────────────────────────────────────────

/// The record written to the forwarding queue for one change.
///
/// `retries` is always written as `0`: the queue-draining indexer owns the
/// retry counter for its own processing, not for the forward itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedChange {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub retries: u32,
    /// The raw change row.
    pub change: serde_json::Value,
}

impl QueuedChange {
    pub fn new(change: &ChangeEvent) -> Self {
        Self {
            object_id: change.id.clone(),
            retries: 0,
            change: change.to_row(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
