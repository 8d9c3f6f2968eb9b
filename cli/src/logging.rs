//! Tracing initialisation for the binary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The `log` section of `regwatch.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base filter for every crate, e.g. `"warn"`.
    pub level: String,
    /// Targets that log at their own level. Keys are crate names
    /// (`"regwatch-http"`) or tracing targets (`"regwatch::metrics"` shows
    /// the progress gauges at `debug`).
    pub components: HashMap<String, String>,
    /// One JSON object per line instead of the pretty console format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directives: `"info,regwatch_core=debug"` etc.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();

        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, wins over the config.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_normalise_crate_names() {
        let config = LogConfig {
            level: "warn".into(),
            components: HashMap::from([
                ("regwatch-http".to_string(), "trace".to_string()),
                ("regwatch-core".to_string(), "debug".to_string()),
            ]),
            json: false,
        };
        assert_eq!(config.directives(), "warn,regwatch_core=debug,regwatch_http=trace");
    }

    #[test]
    fn partial_section_keeps_default_level() {
        let config: LogConfig =
            serde_json::from_str(r#"{ "json": true, "components": { "regwatch::metrics": "debug" } }"#)
                .unwrap();
        assert!(config.json);
        assert_eq!(config.directives(), "info,regwatch::metrics=debug");
    }

    #[test]
    fn defaults_to_info() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.directives(), "info");
        assert!(!config.json);
    }
}
