//! Per-dependency circuit breaking.
//!
//! Every named circuit ("github:repo", "grader:grade") carries its own
//! failure streak. When the streak hits the threshold the circuit opens
//! and calls fail fast without touching the network, until the recovery
//! window passes and a trial call decides between closing and reopening.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Thresholds shared by every circuit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a circuit
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls (in seconds)
    #[serde(with = "crate::config::duration_secs")]
    pub recovery_timeout: Duration,

    /// Trial successes that close a half-open circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

/// Observable state of one circuit.
#[derive(Debug, Clone, Copy)]
pub enum CircuitState {
    /// Calls flow; `failures` is the current streak.
    Closed { failures: u32 },

    /// Calls fail fast until the recovery window passes.
    Open { opened_at: Instant },

    /// Trial traffic is deciding whether the dependency recovered.
    HalfOpen { successes: u32 },
}

impl CircuitState {
    fn start() -> Self {
        CircuitState::Closed { failures: 0 }
    }

    /// The state after one successful call.
    fn on_success(self, config: &CircuitBreakerConfig) -> Self {
        match self {
            CircuitState::HalfOpen { successes } if successes + 1 >= config.success_threshold => {
                CircuitState::start()
            }
            CircuitState::HalfOpen { successes } => CircuitState::HalfOpen {
                successes: successes + 1,
            },
            CircuitState::Closed { .. } => CircuitState::start(),
            open => open,
        }
    }

    /// The state after one failed call.
    fn on_failure(self, config: &CircuitBreakerConfig) -> Self {
        match self {
            CircuitState::Closed { failures } if failures + 1 >= config.failure_threshold => {
                CircuitState::Open {
                    opened_at: Instant::now(),
                }
            }
            CircuitState::Closed { failures } => CircuitState::Closed {
                failures: failures + 1,
            },
            CircuitState::HalfOpen { .. } => CircuitState::Open {
                opened_at: Instant::now(),
            },
            open => open,
        }
    }
}

/// Failure tracking for every named circuit.
///
/// Circuits are independent: a broken raw-content endpoint must not take
/// profile checks down with it.
pub struct CircuitBreaker {
    circuits: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls through this circuit should fail fast right now.
    ///
    /// An open circuit past its recovery window flips to half-open here,
    /// admitting the caller as the trial.
    pub fn is_open(&self, circuit: &str) -> bool {
        let window_elapsed = match self.circuits.read().get(circuit) {
            Some(CircuitState::Open { opened_at }) => {
                opened_at.elapsed() >= self.config.recovery_timeout
            }
            _ => return false,
        };
        if !window_elapsed {
            return true;
        }

        let mut circuits = self.circuits.write();
        // Another caller may have flipped it between the locks.
        if let Some(state) = circuits.get_mut(circuit) {
            if matches!(*state, CircuitState::Open { .. }) {
                *state = CircuitState::HalfOpen { successes: 0 };
                tracing::info!(circuit, "circuit half-open, trial call admitted");
            }
        }
        false
    }

    /// Feed one successful call into the circuit.
    pub fn record_success(&self, circuit: &str) {
        let mut circuits = self.circuits.write();
        let Some(state) = circuits.get_mut(circuit) else {
            return;
        };
        let before = *state;
        *state = before.on_success(&self.config);
        if matches!(before, CircuitState::HalfOpen { .. })
            && matches!(*state, CircuitState::Closed { .. })
        {
            tracing::info!(circuit, "circuit closed, dependency recovered");
        }
    }

    /// Feed one failed call into the circuit.
    pub fn record_failure(&self, circuit: &str) {
        let mut circuits = self.circuits.write();
        let state = circuits
            .entry(circuit.to_string())
            .or_insert_with(CircuitState::start);
        let before = *state;
        *state = before.on_failure(&self.config);
        match (before, *state) {
            (CircuitState::Closed { failures }, CircuitState::Open { .. }) => {
                tracing::warn!(circuit, failures = failures + 1, "circuit opened");
            }
            (CircuitState::HalfOpen { .. }, CircuitState::Open { .. }) => {
                tracing::warn!(circuit, "trial call failed, circuit reopened");
            }
            _ => {}
        }
    }

    /// Current state of a circuit. Unknown circuits read as closed.
    pub fn state(&self, circuit: &str) -> CircuitState {
        self.circuits
            .read()
            .get(circuit)
            .copied()
            .unwrap_or_else(CircuitState::start)
    }

    /// Close every circuit and forget every streak.
    pub fn reset(&self) {
        self.circuits.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            ..Default::default()
        })
    }

    #[test]
    fn test_unknown_circuit_is_closed() {
        let breaker = CircuitBreaker::default();
        assert!(!breaker.is_open("github:repo"));
        assert!(matches!(
            breaker.state("github:repo"),
            CircuitState::Closed { failures: 0 }
        ));
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = breaker(2);

        breaker.record_failure("github:repo");
        assert!(!breaker.is_open("github:repo"));

        breaker.record_failure("github:repo");
        assert!(breaker.is_open("github:repo"));
    }

    #[test]
    fn test_first_failure_opens_when_threshold_is_one() {
        let breaker = breaker(1);
        breaker.record_failure("github:raw");
        assert!(breaker.is_open("github:raw"));
    }

    #[test]
    fn test_success_interrupts_the_streak() {
        let breaker = breaker(3);

        breaker.record_failure("grader:analyze");
        breaker.record_failure("grader:analyze");
        breaker.record_success("grader:analyze");

        breaker.record_failure("grader:analyze");
        breaker.record_failure("grader:analyze");
        assert!(!breaker.is_open("grader:analyze"));
    }

    #[test]
    fn test_circuits_do_not_share_failures() {
        let breaker = breaker(2);

        breaker.record_failure("github:raw");
        breaker.record_failure("github:raw");

        assert!(breaker.is_open("github:raw"));
        assert!(!breaker.is_open("github:profile"));
    }

    #[test]
    fn test_open_circuit_admits_trial_after_window() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
            success_threshold: 1,
        });

        breaker.record_failure("github:pull");
        assert!(breaker.is_open("github:pull"));

        std::thread::sleep(Duration::from_millis(15));

        // Window elapsed: the next check admits a trial call.
        assert!(!breaker.is_open("github:pull"));
        assert!(matches!(
            breaker.state("github:pull"),
            CircuitState::HalfOpen { .. }
        ));

        // Trial fails: straight back to open.
        breaker.record_failure("github:pull");
        assert!(breaker.is_open("github:pull"));
    }

    #[test]
    fn test_trial_successes_close_at_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
            success_threshold: 2,
        });

        breaker.record_failure("grader:grade");
        std::thread::sleep(Duration::from_millis(15));
        assert!(!breaker.is_open("grader:grade"));

        breaker.record_success("grader:grade");
        assert!(matches!(
            breaker.state("grader:grade"),
            CircuitState::HalfOpen { successes: 1 }
        ));

        breaker.record_success("grader:grade");
        assert!(matches!(
            breaker.state("grader:grade"),
            CircuitState::Closed { failures: 0 }
        ));
    }

    #[test]
    fn test_reset_forgets_every_streak() {
        let breaker = breaker(1);
        breaker.record_failure("github:fork");
        assert!(breaker.is_open("github:fork"));

        breaker.reset();
        assert!(!breaker.is_open("github:fork"));
    }
}
