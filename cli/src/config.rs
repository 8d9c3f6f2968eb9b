//! `regwatch.json`: the binary's configuration file.
//!
//! ```json
//! {
//!   "watch":      { "checkpoint_mode": "safe" },
//!   "log":        { "level": "info" },
//!   "feed":       { "url": "https://replicate.npmjs.com/registry" },
//!   "queue":      { "url": "https://APPID.algolia.net", "app_id": "APPID", "index": "npm-queue" },
//!   "checkpoint": { "path": "./regwatch.db" }
//! }
//! ```
//!
//! The queue API key is read from `REGWATCH_QUEUE_API_KEY` and never from
//! the file.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use regwatch_core::WatchConfig;
use regwatch_http::SearchQueueConfig;

use crate::logging::LogConfig;

pub const API_KEY_ENV: &str = "REGWATCH_QUEUE_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub log: LogConfig,
    pub feed: FeedSection,
    pub queue: QueueSection,
    #[serde(default)]
    pub checkpoint: CheckpointSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
    /// Database URL; `_changes` is appended per request.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    pub url: String,
    pub app_id: String,
    pub index: String,
    #[serde(default = "default_queue_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSection {
    #[serde(default = "default_checkpoint_path")]
    pub path: String,
    /// Row key inside the checkpoint database.
    #[serde(default = "default_watcher_id")]
    pub watcher_id: String,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self { path: default_checkpoint_path(), watcher_id: default_watcher_id() }
    }
}

fn default_queue_timeout_ms() -> u64 {
    30_000
}

fn default_checkpoint_path() -> String {
    "./regwatch.db".into()
}

fn default_watcher_id() -> String {
    "regwatch".into()
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Queue connection settings, with the API key taken from `api_key`.
    pub fn queue_config(&self, api_key: Option<String>) -> Result<SearchQueueConfig> {
        let Some(api_key) = api_key.filter(|k| !k.is_empty()) else {
            bail!("{API_KEY_ENV} is not set");
        };
        Ok(SearchQueueConfig {
            base_url: self.queue.url.clone(),
            app_id: self.queue.app_id.clone(),
            api_key,
            index: self.queue.index.clone(),
            request_timeout: Duration::from_millis(self.queue.timeout_ms),
        })
    }
}
