//! CouchDB `_changes` long-poll transport.
//!
//! ```text
//! GET {db}/_changes?feed=longpoll&since=…&limit=…&include_docs=…&timeout=…
//! GET {db}                                   → { "update_seq": … }
//! ```
//!
//! CouchDB 1.x reports sequences as integers, 2.x+ as opaque strings
//! (`"123-g1AAAA…"`); both become a [`Cursor`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use regwatch_core::{ChangeEvent, ChangesPage, ChangesTransport, Cursor, WatchError};

use crate::{invalid_url, read_json};

/// Extra time the HTTP request may take beyond the server-side long-poll
/// timeout before the client gives up.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

/// Long-poll client for one CouchDB database.
pub struct CouchChangesClient {
    db: Url,
    http: reqwest::Client,
    longpoll_timeout: Duration,
}

impl CouchChangesClient {
    /// Client for the database at `db_url` (e.g. `https://replicate.example.com/registry`).
    pub fn new(db_url: &str, longpoll_timeout: Duration) -> Result<Self, WatchError> {
        let db = Url::parse(db_url).map_err(invalid_url)?;
        if db.cannot_be_a_base() {
            return Err(invalid_url(format!("{db_url} cannot be a base url")));
        }
        let http = reqwest::Client::builder()
            .timeout(longpoll_timeout + TIMEOUT_MARGIN)
            .user_agent(concat!("regwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WatchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { db, http, longpoll_timeout })
    }

    pub fn db_url(&self) -> &Url {
        &self.db
    }

    /// The `_changes` URL for one long-poll request.
    pub fn changes_url(&self, since: &Cursor, batch_size: u32, include_documents: bool) -> Url {
        let mut url = self.db.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("_changes");
        }
        url.query_pairs_mut()
            .append_pair("feed", "longpoll")
            .append_pair("since", since.as_str())
            .append_pair("limit", &batch_size.to_string())
            .append_pair("include_docs", if include_documents { "true" } else { "false" })
            .append_pair("timeout", &self.longpoll_timeout.as_millis().to_string());
        url
    }
}

#[async_trait]
impl ChangesTransport for CouchChangesClient {
    async fn changes(
        &self,
        since: &Cursor,
        batch_size: u32,
        include_documents: bool,
    ) -> Result<ChangesPage, WatchError> {
        let url = self.changes_url(since, batch_size, include_documents);
        tracing::trace!(%since, batch_size, "polling changes");

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| WatchError::Transport(e.to_string()))?;
        let body: Value = read_json(resp).await?;
        parse_changes(&body)
    }

    async fn head(&self) -> Result<Cursor, WatchError> {
        let resp = self
            .http
            .get(self.db.clone())
            .send()
            .await
            .map_err(|e| WatchError::Transport(e.to_string()))?;
        let body: Value = read_json(resp).await?;
        let seq = body
            .get("update_seq")
            .ok_or_else(|| WatchError::Transport("database info has no update_seq".into()))?;
        cursor_from_json(seq)
    }
}

/// Normalise a CouchDB sequence value into a [`Cursor`].
pub fn cursor_from_json(seq: &Value) -> Result<Cursor, WatchError> {
    match seq {
        Value::String(s) => Ok(Cursor::new(s.clone())),
        Value::Number(n) => Ok(Cursor::new(n.to_string())),
        other => Err(WatchError::Transport(format!("unsupported sequence value: {other}"))),
    }
}

/// Parse one `_changes` response body.
///
/// Each row becomes a [`ChangeEvent`] whose payload is the row itself
/// (`seq`, `id`, `changes`, `deleted`, and `doc` when documents were
/// requested). Rows without an `id` keep an empty id and are skipped
/// downstream.
pub fn parse_changes(body: &Value) -> Result<ChangesPage, WatchError> {
    let rows = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| WatchError::Transport("changes response has no results array".into()))?;

    let changes = rows
        .iter()
        .map(|row| -> Result<ChangeEvent, WatchError> {
            let seq = row
                .get("seq")
                .ok_or_else(|| WatchError::Transport("change row has no seq".into()))?;
            let id = row.get("id").and_then(Value::as_str).unwrap_or_default();
            Ok(ChangeEvent::new(id, cursor_from_json(seq)?).with_payload(row.clone()))
        })
        .collect::<Result<Vec<_>, WatchError>>()?;

    let last_cursor = body.get("last_seq").map(cursor_from_json).transpose()?;
    Ok(ChangesPage { changes, last_cursor })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(url: &str) -> CouchChangesClient {
        CouchChangesClient::new(url, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn changes_url_carries_longpoll_params() {
        let url = client("https://replicate.example.com/registry").changes_url(
            &Cursor::from("42"),
            1,
            true,
        );
        assert_eq!(url.path(), "/registry/_changes");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("feed".into(), "longpoll".into()),
                ("since".into(), "42".into()),
                ("limit".into(), "1".into()),
                ("include_docs".into(), "true".into()),
                ("timeout".into(), "60000".into()),
            ]
        );
    }

    #[test]
    fn changes_url_tolerates_trailing_slash() {
        let url = client("http://localhost:5984/registry/").changes_url(&Cursor::origin(), 5, false);
        assert_eq!(url.path(), "/registry/_changes");
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(matches!(
            CouchChangesClient::new("not a url", Duration::from_secs(1)),
            Err(WatchError::Config(_))
        ));
    }

    #[test]
    fn parses_integer_sequences() {
        let body = json!({
            "results": [
                { "seq": 7, "id": "lodash", "changes": [{ "rev": "3-abc" }] },
                { "seq": 8, "id": "left-pad", "deleted": true, "changes": [{ "rev": "9-def" }] }
            ],
            "last_seq": 8
        });
        let page = parse_changes(&body).unwrap();
        assert_eq!(page.changes.len(), 2);
        assert_eq!(page.changes[0].id, "lodash");
        assert_eq!(page.changes[0].cursor, Cursor::from("7"));
        assert_eq!(page.changes[1].payload["deleted"], json!(true));
        assert_eq!(page.last_cursor, Some(Cursor::from("8")));
    }

    #[test]
    fn parses_opaque_string_sequences() {
        let body = json!({
            "results": [{ "seq": "120-g1AAAAB", "id": "react", "doc": { "name": "react" } }],
            "last_seq": "120-g1AAAAB"
        });
        let page = parse_changes(&body).unwrap();
        assert_eq!(page.changes[0].cursor.position(), Some(120));
        assert_eq!(page.changes[0].payload["doc"]["name"], "react");
    }

    #[test]
    fn row_without_id_keeps_empty_id() {
        let page = parse_changes(&json!({ "results": [{ "seq": 3 }] })).unwrap();
        assert!(!page.changes[0].has_id());
        assert_eq!(page.last_cursor, None);
    }

    #[test]
    fn malformed_bodies_are_transport_errors() {
        assert!(matches!(parse_changes(&json!({})), Err(WatchError::Transport(_))));
        assert!(matches!(
            parse_changes(&json!({ "results": [{ "id": "x" }] })),
            Err(WatchError::Transport(_))
        ));
        assert!(cursor_from_json(&json!(null)).is_err());
    }
}
