//! Feed cursor: an opaque position in the change feed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in the change feed, in the transport's string form.
///
/// Only the transport knows how its cursors order, so a `Cursor` supports
/// equality and nothing else. CouchDB-style sequences usually carry a
/// leading integer (`"4213"`, `"4213-g1AAAA…"`) that [`position`](Self::position)
/// exposes for progress display; on clustered databases it is approximate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The start of the feed (`since=0`).
    pub fn origin() -> Self {
        Self("0".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The leading decimal position, if the cursor has one.
    pub fn position(&self) -> Option<u64> {
        let end = self
            .0
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.0.len());
        if end == 0 {
            return None;
        }
        self.0[..end].parse().ok()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for Cursor {
    fn from(seq: u64) -> Self {
        Self(seq.to_string())
    }
}

impl From<&str> for Cursor {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for Cursor {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
