//! Error-reporting sink.
//!
//! Every non-fatal failure in the pipeline (transport errors, forward
//! retries, checkpoint writes, shutdown) is handed to an [`ErrorReporter`]
//! together with the identifying fields of whatever was being processed.

use std::sync::Mutex;

use crate::error::WatchError;

/// Destination for reported errors (error tracker, log, test recorder).
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &WatchError, context: &[(&str, String)]);
}

/// Logs every report at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &WatchError, context: &[(&str, String)]) {
        let context = context
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::error!(error = %error, context = %context, "reported error");
    }
}

/// A single captured report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub message: String,
    pub context: Vec<(String, String)>,
}

impl Report {
    /// Look up a context value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// In-memory reporter for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<Report>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorReporter for MemoryReporter {
    fn report(&self, error: &WatchError, context: &[(&str, String)]) {
        self.reports.lock().unwrap().push(Report {
            message: error.to_string(),
            context: context
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reporter_keeps_context() {
        let reporter = MemoryReporter::new();
        reporter.report(
            &WatchError::Checkpoint("disk full".into()),
            &[("cursor", "12".into())],
        );
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].message, "Checkpoint error: disk full");
        assert_eq!(reports[0].get("cursor"), Some("12"));
        assert_eq!(reports[0].get("id"), None);
    }
}
