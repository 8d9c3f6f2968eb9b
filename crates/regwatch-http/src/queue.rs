//! Search-index queue client.
//!
//! Changes are upserted into a dedicated queue index of a hosted search
//! service; a separate indexer drains that index. The service speaks a
//! small REST dialect:
//!
//! ```text
//! PUT {base}/1/indexes/{index}/{objectID}     body: QueuedChange
//! GET {base}/1/indexes/{index}?hitsPerPage=0  → { "nbHits": … }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

use regwatch_core::{ForwardingQueue, QueueBacklog, QueuedChange, WatchError};

use crate::{invalid_url, read_json};

const APP_ID_HEADER: &str = "x-algolia-application-id";
const API_KEY_HEADER: &str = "x-algolia-api-key";

/// Connection settings for [`SearchQueueClient`].
#[derive(Debug, Clone)]
pub struct SearchQueueConfig {
    /// Base URL of the search service, e.g. `https://APPID.algolia.net`.
    pub base_url: String,
    pub app_id: String,
    pub api_key: String,
    /// Name of the queue index.
    pub index: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct IndexStats {
    #[serde(rename = "nbHits")]
    nb_hits: u64,
}

/// Writes queued changes into the search service's queue index.
pub struct SearchQueueClient {
    index_url: Url,
    http: reqwest::Client,
}

impl SearchQueueClient {
    pub fn new(config: SearchQueueConfig) -> Result<Self, WatchError> {
        let mut index_url = Url::parse(&config.base_url).map_err(invalid_url)?;
        index_url
            .path_segments_mut()
            .map_err(|_| invalid_url(format!("{} cannot be a base url", config.base_url)))?
            .pop_if_empty()
            .extend(["1", "indexes", config.index.as_str()]);

        let mut headers = HeaderMap::new();
        headers.insert(APP_ID_HEADER, header_value(&config.app_id)?);
        let mut key = header_value(&config.api_key)?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| WatchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { index_url, http })
    }

    pub fn index_url(&self) -> &Url {
        &self.index_url
    }

    /// URL of one queued object. The id is percent-encoded as a single
    /// path segment, so scoped names like `@scope/pkg` stay intact.
    pub fn object_url(&self, object_id: &str) -> Url {
        let mut url = self.index_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(object_id);
        }
        url
    }

    fn stats_url(&self) -> Url {
        let mut url = self.index_url.clone();
        url.query_pairs_mut().append_pair("hitsPerPage", "0");
        url
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, WatchError> {
    HeaderValue::from_str(raw)
        .map_err(|e| WatchError::Config(format!("invalid header value: {e}")))
}

#[async_trait]
impl ForwardingQueue for SearchQueueClient {
    async fn save_object(&self, record: &QueuedChange) -> Result<(), WatchError> {
        let resp = self
            .http
            .put(self.object_url(&record.object_id))
            .json(record)
            .send()
            .await
            .map_err(|e| WatchError::Forward {
                id: record.object_id.clone(),
                reason: e.to_string(),
            })?;

        read_json::<serde_json::Value>(resp)
            .await
            .map(|_| ())
            .map_err(|e| WatchError::Forward {
                id: record.object_id.clone(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl QueueBacklog for SearchQueueClient {
    async fn queue_length(&self) -> Result<u64, WatchError> {
        let resp = self
            .http
            .get(self.stats_url())
            .send()
            .await
            .map_err(|e| WatchError::Transport(e.to_string()))?;
        let stats: IndexStats = read_json(resp).await?;
        Ok(stats.nb_hits)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
