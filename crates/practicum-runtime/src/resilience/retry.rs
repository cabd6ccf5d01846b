//! Retry policy: bounded attempts, exponential backoff, jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy for retriable failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first call
    pub max_attempts: u32,

    /// Backoff seed for the first retry (in seconds)
    #[serde(with = "crate::config::duration_secs")]
    pub initial_delay: Duration,

    /// Ceiling for computed backoff (in seconds)
    #[serde(with = "crate::config::duration_secs")]
    pub max_delay: Duration,

    /// Ceiling for provider-supplied retry-after hints (in seconds)
    #[serde(with = "crate::config::duration_secs")]
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, after `attempt` failed calls
    /// (1-based).
    ///
    /// A provider retry-after hint replaces the computed backoff, capped at
    /// `max_retry_after`. Computed backoff doubles per attempt up to
    /// `max_delay`, with equal jitter (half fixed, half random) so
    /// synchronized callers spread out.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_retry_after);
        }

        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let half = backoff / 2;
        half + half.mul_f64(rand::thread_rng().gen::<f64>())
    }
}
