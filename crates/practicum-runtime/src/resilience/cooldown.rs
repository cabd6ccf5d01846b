//! Per-key cooldown after exhausted retries.
//!
//! When retries run out for a key (a learner on the grading path, a
//! repository owner on the evidence path), the key enters a cooldown and
//! later calls for it short-circuit without touching the network. The map
//! is a bounded TTL cache, so a flood of distinct keys evicts old entries
//! instead of growing without limit.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Cooldown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// How long a key stays in cooldown (in seconds)
    #[serde(with = "crate::config::duration_secs")]
    pub ttl: Duration,

    /// Capacity ceiling for the cooldown map
    pub max_entries: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 10_000,
        }
    }
}

/// Tracks which keys are currently cooling down.
pub struct CooldownTracker {
    cache: Cache<String, Instant>,
}

impl CooldownTracker {
    /// Create a tracker with the given bounds.
    pub fn new(config: CooldownConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();

        Self { cache }
    }

    /// Whether this key is currently in cooldown.
    pub async fn is_active(&self, key: &str) -> bool {
        self.cache.get(key).await.is_some()
    }

    /// Put a key into cooldown. Re-entering refreshes the expiry.
    pub async fn begin(&self, key: &str) {
        self.cache.insert(key.to_string(), Instant::now()).await;
        tracing::info!(key, "cooldown started");
    }

    /// Drop all cooldowns.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(CooldownConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_key_is_not_cooling() {
        let tracker = CooldownTracker::default();
        assert!(!tracker.is_active("alice").await);
    }

    #[tokio::test]
    async fn test_begin_activates_key() {
        let tracker = CooldownTracker::default();
        tracker.begin("alice").await;
        assert!(tracker.is_active("alice").await);
        assert!(!tracker.is_active("bob").await);
    }

    #[tokio::test]
    async fn test_cooldown_expires() {
        let tracker = CooldownTracker::new(CooldownConfig {
            ttl: Duration::from_millis(50),
            max_entries: 100,
        });
        tracker.begin("alice").await;
        assert!(tracker.is_active("alice").await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!tracker.is_active("alice").await);
    }

    #[tokio::test]
    async fn test_invalidate_all_clears_cooldowns() {
        let tracker = CooldownTracker::default();
        tracker.begin("alice").await;
        tracker.begin("bob").await;
        tracker.invalidate_all();
        assert!(!tracker.is_active("alice").await);
        assert!(!tracker.is_active("bob").await);
    }
}
