//! Runtime configuration for the verification pipeline.
//!
//! All tunables are plain serde structs with production reference values as
//! defaults, so a config file only states what it changes. Secrets are never
//! part of these structs; they are loaded separately (see
//! [`crate::providers::credentials`]) so a serialized config can be logged
//! or diffed safely.

use std::str::FromStr;
use std::time::Duration;

use practicum_core::types::Environment;
use serde::{Deserialize, Serialize};

use crate::github::GithubConfig;
use crate::grader::GraderConfig;
use crate::resilience::{CircuitBreakerConfig, CooldownConfig, RetryPolicy};

/// (De)serialize a `Duration` as whole seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Complete configuration for the verification pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deployment environment. Gates placeholder-secret tolerance.
    #[serde(default)]
    pub environment: Environment,

    /// Circuit-breaker thresholds shared by every circuit.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry/backoff policy for retriable failures.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-key cooldown after exhausted retries.
    #[serde(default)]
    pub cooldown: CooldownConfig,

    /// GitHub client settings.
    #[serde(default)]
    pub github: GithubConfig,

    /// Grading engine settings.
    #[serde(default)]
    pub grader: GraderConfig,
}

impl PipelineConfig {
    /// Build a config from environment variables, keeping defaults for
    /// anything unset or unparseable (unparseable values are logged).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("PRACTICUM_ENV") {
            match value.to_lowercase().as_str() {
                "production" | "prod" => config.environment = Environment::Production,
                "development" | "dev" => config.environment = Environment::Development,
                other => {
                    tracing::warn!(value = other, "unrecognized PRACTICUM_ENV, keeping default")
                }
            }
        }

        if let Some(n) = env_parsed("PRACTICUM_CIRCUIT_THRESHOLD") {
            config.circuit_breaker.failure_threshold = n;
        }
        if let Some(d) = env_duration("PRACTICUM_CIRCUIT_RECOVERY") {
            config.circuit_breaker.recovery_timeout = d;
        }
        if let Some(n) = env_parsed("PRACTICUM_RETRY_ATTEMPTS") {
            config.retry.max_attempts = n;
        }
        if let Some(d) = env_duration("PRACTICUM_RETRY_INITIAL_DELAY") {
            config.retry.initial_delay = d;
        }
        if let Some(d) = env_duration("PRACTICUM_COOLDOWN_TTL") {
            config.cooldown.ttl = d;
        }
        if let Some(n) = env_parsed("PRACTICUM_COOLDOWN_CAPACITY") {
            config.cooldown.max_entries = n;
        }
        if let Some(d) = env_duration("PRACTICUM_GITHUB_TIMEOUT") {
            config.github.request_timeout = d;
        }
        if let Ok(model) = std::env::var("PRACTICUM_GRADER_MODEL") {
            config.grader.model = model;
        }
        if let Some(d) = env_duration("PRACTICUM_GRADER_TIMEOUT") {
            config.grader.call_timeout = d;
        }
        if let Some(n) = env_parsed("PRACTICUM_GRADER_CONCURRENCY") {
            config.grader.max_concurrent = n;
        }

        config
    }
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable value");
            None
        }
    }
}

fn env_duration(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match humantime::parse_duration(&raw) {
        Ok(duration) => Some(duration),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable duration");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_values() {
        let config = PipelineConfig::default();
        assert!(config.environment.is_development());
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.grader.max_concurrent, 10);
        assert_eq!(config.grader.call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"circuit_breaker": {"failure_threshold": 2}}"#).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        // Everything unstated stays at the default.
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("PRACTICUM_ENV", "production");
        std::env::set_var("PRACTICUM_CIRCUIT_RECOVERY", "2m");
        std::env::set_var("PRACTICUM_GRADER_CONCURRENCY", "4");

        let config = PipelineConfig::from_env();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(120));
        assert_eq!(config.grader.max_concurrent, 4);

        std::env::remove_var("PRACTICUM_ENV");
        std::env::remove_var("PRACTICUM_CIRCUIT_RECOVERY");
        std::env::remove_var("PRACTICUM_GRADER_CONCURRENCY");
    }

    #[test]
    fn test_unparseable_env_value_keeps_default() {
        std::env::set_var("PRACTICUM_RETRY_ATTEMPTS", "many");
        let config = PipelineConfig::from_env();
        assert_eq!(config.retry.max_attempts, 3);
        std::env::remove_var("PRACTICUM_RETRY_ATTEMPTS");
    }
}
