//! Per-key failure tracking
//!
//! Protects a single failing endpoint independently of the global circuit: a
//! key that failed more than `threshold` times within `window` is blocked
//! until `cooldown` has elapsed since its last failed attempt.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::CacheKey;
use crate::error::ResilienceError;

/// Failure tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureConfig {
    /// Failures tolerated within the window; one more blocks the key
    pub threshold: u32,

    /// Window in which failures accumulate
    #[serde(with = "crate::duration_millis")]
    pub window: Duration,

    /// How long a blocked key stays blocked after its last failure
    #[serde(with = "crate::duration_millis")]
    pub cooldown: Duration,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

impl FailureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    first_failure: Instant,
    last_attempt: Instant,
}

/// Failure counts per cache key
pub struct FailureTracker {
    config: FailureConfig,
    records: Mutex<HashMap<CacheKey, FailureRecord>>,
}

impl FailureTracker {
    pub fn new(config: FailureConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FailureConfig {
        &self.config
    }

    /// Fail with [`ResilienceError::Blocked`] if the key is cooling down
    ///
    /// A record whose cool-down has elapsed is cleared.
    pub fn check(&self, key: &CacheKey) -> Result<(), ResilienceError> {
        let mut records = self.records.lock();
        let Some(record) = records.get(key).copied() else {
            return Ok(());
        };
        if record.count <= self.config.threshold {
            return Ok(());
        }

        let elapsed = record.last_attempt.elapsed();
        if elapsed >= self.config.cooldown {
            debug!(key = %key, "Failure cool-down elapsed, unblocking key");
            records.remove(key);
            return Ok(());
        }

        Err(ResilienceError::Blocked {
            key: key.to_string(),
            retry_after: self.config.cooldown - elapsed,
        })
    }

    /// Record a failed fetch; returns the failure count within the window
    pub fn record_failure(&self, key: &CacheKey) -> u32 {
        let now = Instant::now();
        let mut records = self.records.lock();
        let record = records.entry(key.clone()).or_insert(FailureRecord {
            count: 0,
            first_failure: now,
            last_attempt: now,
        });

        if now.saturating_duration_since(record.first_failure) > self.config.window {
            record.count = 0;
            record.first_failure = now;
        }
        record.count = record.count.saturating_add(1);
        record.last_attempt = now;

        if self.config.threshold.checked_add(1) == Some(record.count) {
            warn!(
                key = %key,
                failures = record.count,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Key blocked after repeated failures"
            );
        }
        record.count
    }

    /// Clear the key's record after a successful fetch
    pub fn record_success(&self, key: &CacheKey) {
        self.records.lock().remove(key);
    }

    /// Failures recorded for the key in the current window
    pub fn failure_count(&self, key: &CacheKey) -> u32 {
        self.records.lock().get(key).map_or(0, |r| r.count)
    }

    /// Forget every record
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(FailureConfig::default())
    }
}
