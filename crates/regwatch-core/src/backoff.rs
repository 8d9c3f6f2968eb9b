//! Polynomial backoff used between forward attempts and feed reconnects.

use std::time::Duration;

/// Deterministic backoff: `min((attempt + 1) ^ exponent * 1s, cap)`.
///
/// No jitter. `attempt` is `0` for the first failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub exponent: f64,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn new(exponent: f64, cap: Duration) -> Self {
        Self { exponent, cap }
    }

    /// Wait before the retry that follows failure number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        delay(attempt, self.exponent, self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            exponent: 2.0,
            cap: Duration::from_secs(30),
        }
    }
}

/// Free-function form of [`BackoffPolicy::delay`].
///
/// Fractional milliseconds are truncated.
pub fn delay(attempt: u32, exponent: f64, cap: Duration) -> Duration {
    let base_ms = (f64::from(attempt) + 1.0).powf(exponent) * 1000.0;
    let cap_ms = cap.as_millis() as f64;
    Duration::from_millis(base_ms.min(cap_ms) as u64)
}
