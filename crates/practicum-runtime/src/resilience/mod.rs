//! Resilience wrapper around every external call.
//!
//! This module provides:
//! - Circuit breaker per named circuit, to stop hammering a failing service
//! - Bounded retry with exponential backoff, jitter, and retry-after hints
//! - Per-key cooldown once retries are exhausted
//!
//! Policies are explicit values composed by [`ResilienceLayer`], and every
//! wrapped operation returns the same [`CallError`] taxonomy, so callers can
//! tell "the submission is wrong" apart from "try again later" without
//! inspecting provider-specific errors.

mod circuit_breaker;
mod cooldown;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use cooldown::{CooldownConfig, CooldownTracker};
pub use retry::RetryPolicy;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure taxonomy for wrapped external calls.
#[derive(Debug, Error)]
pub enum CallError {
    /// Network-level failure: connect, DNS, body read, or a 5xx answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service asked us to slow down (429).
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Definitive rejection (4xx): retrying cannot help.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The call exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Failed fast: the circuit is open.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    /// Failed fast: the key is cooling down.
    #[error("cooldown active for '{0}'")]
    CooldownActive(String),
}

impl CallError {
    /// Whether a retry can change the outcome.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CallError::Transport(_) | CallError::RateLimited { .. } | CallError::Timeout(_)
        )
    }

    /// The provider's retry-after hint, if it sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CallError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Retry, circuit-breaker, and cooldown policy around an operation.
///
/// One layer instance is shared by the GitHub client, the grading engine,
/// and the deployment probe; circuits are distinguished by name and
/// cooldowns by key, so the shared state never couples unrelated paths.
pub struct ResilienceLayer {
    circuits: CircuitBreaker,
    retry: RetryPolicy,
    cooldowns: CooldownTracker,
}

impl ResilienceLayer {
    /// Compose a layer from its three policies.
    pub fn new(circuit: CircuitBreakerConfig, retry: RetryPolicy, cooldown: CooldownConfig) -> Self {
        Self {
            circuits: CircuitBreaker::new(circuit),
            retry,
            cooldowns: CooldownTracker::new(cooldown),
        }
    }

    /// Run `op` under this layer's policies.
    ///
    /// `circuit` names the logical dependency (e.g. `github:pull`);
    /// `cooldown_key` identifies who pays for exhausted retries (a learner
    /// or repository owner), or `None` for paths without per-key cost.
    /// The checks run in order: cooldown, circuit, then the retry loop.
    /// `CircuitOpen` and `CooldownActive` are returned without calling
    /// `op` at all.
    pub async fn call<T, F, Fut>(
        &self,
        circuit: &str,
        cooldown_key: Option<&str>,
        op: F,
    ) -> Result<T, CallError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        if let Some(key) = cooldown_key {
            if self.cooldowns.is_active(key).await {
                debug!(circuit, key, "short-circuiting: cooldown active");
                return Err(CallError::CooldownActive(key.to_string()));
            }
        }
        if self.circuits.is_open(circuit) {
            warn!(circuit, "short-circuiting: circuit open");
            return Err(CallError::CircuitOpen(circuit.to_string()));
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    self.circuits.record_success(circuit);
                    return Ok(value);
                }
                Err(error) if error.is_retriable() => {
                    self.circuits.record_failure(circuit);
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            circuit,
                            attempts = attempt,
                            error = %error,
                            "retries exhausted"
                        );
                        if let Some(key) = cooldown_key {
                            self.cooldowns.begin(key).await;
                        }
                        return Err(error);
                    }
                    let delay = self.retry.delay_for(attempt, error.retry_after());
                    debug!(
                        circuit,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    // A concurrent caller may have opened the circuit
                    // while we slept.
                    if self.circuits.is_open(circuit) {
                        return Err(CallError::CircuitOpen(circuit.to_string()));
                    }
                }
                Err(error) => {
                    // The dependency answered; a definitive rejection ends
                    // any failure streak.
                    self.circuits.record_success(circuit);
                    return Err(error);
                }
            }
        }
    }

    /// Current state of a named circuit.
    pub fn circuit_state(&self, circuit: &str) -> CircuitState {
        self.circuits.state(circuit)
    }

    /// Whether a key is currently cooling down.
    pub async fn cooldown_active(&self, key: &str) -> bool {
        self.cooldowns.is_active(key).await
    }

    /// Reset circuits and cooldowns. Test and ops escape hatch.
    pub fn reset(&self) {
        self.circuits.reset();
        self.cooldowns.invalidate_all();
    }
}

impl Default for ResilienceLayer {
    fn default() -> Self {
        Self::new(
            CircuitBreakerConfig::default(),
            RetryPolicy::default(),
            CooldownConfig::default(),
        )
    }
}
