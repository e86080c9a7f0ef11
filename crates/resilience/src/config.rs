//! Coordinator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::TtlConfig;
use crate::failures::FailureConfig;
use crate::reliability::{ConnectivityConfig, RetryPolicy};

/// Configuration for [`Coordinator`](crate::Coordinator)
///
/// # Example
///
/// ```
/// use orator_resilience::{CoordinatorConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let config = CoordinatorConfig::default()
///     .with_retry(RetryPolicy::exponential().with_max_retries(2))
///     .with_debounce_window(Duration::from_millis(250));
/// assert_eq!(config.retry.max_retries, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub retry: RetryPolicy,
    pub connectivity: ConnectivityConfig,
    pub failures: FailureConfig,
    pub ttl: TtlConfig,
    #[serde(with = "crate::duration_millis", default = "default_debounce_window")]
    pub debounce_window: Duration,
}

fn default_debounce_window() -> Duration {
    Duration::from_millis(500)
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connectivity: ConnectivityConfig::default(),
            failures: FailureConfig::default(),
            ttl: TtlConfig::default(),
            debounce_window: default_debounce_window(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables (all optional, durations in milliseconds):
    /// - `ORATOR_RETRY_MAX`: retries after the first attempt (default: 5)
    /// - `ORATOR_RETRY_INITIAL_DELAY_MS`: first backoff delay (default: 300)
    /// - `ORATOR_REQUEST_TIMEOUT_MS`: per-attempt timeout, 0 disables (default: 10000)
    /// - `ORATOR_CHECK_INTERVAL_MS`: probe interval while offline (default: 30000)
    /// - `ORATOR_FAILURE_THRESHOLD`: tolerated failures per key (default: 3)
    /// - `ORATOR_FAILURE_COOLDOWN_MS`: blocked-key cool-down (default: 30000)
    /// - `ORATOR_DEBOUNCE_MS`: debounce window (default: 500)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        // Counts that do not fit a u32 are ignored like unparseable ones
        let count = |key: &str| number(key).and_then(|n| u32::try_from(n).ok());
        let millis = |key: &str| number(key).map(Duration::from_millis);
        let defaults = Self::default();

        let mut retry = defaults.retry;
        if let Some(max) = count("ORATOR_RETRY_MAX") {
            retry.max_retries = max;
        }
        if let Some(delay) = millis("ORATOR_RETRY_INITIAL_DELAY_MS") {
            retry.initial_delay = delay;
        }
        if let Some(timeout) = millis("ORATOR_REQUEST_TIMEOUT_MS") {
            retry.timeout = (!timeout.is_zero()).then_some(timeout);
        }

        let mut connectivity = defaults.connectivity;
        if let Some(interval) = millis("ORATOR_CHECK_INTERVAL_MS") {
            connectivity.check_interval = interval;
        }

        let mut failures = defaults.failures;
        if let Some(threshold) = count("ORATOR_FAILURE_THRESHOLD") {
            failures.threshold = threshold;
        }
        if let Some(cooldown) = millis("ORATOR_FAILURE_COOLDOWN_MS") {
            failures.cooldown = cooldown;
        }

        Self {
            retry,
            connectivity,
            failures,
            ttl: defaults.ttl,
            debounce_window: millis("ORATOR_DEBOUNCE_MS").unwrap_or(defaults.debounce_window),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connectivity(mut self, connectivity: ConnectivityConfig) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_failures(mut self, failures: FailureConfig) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_ttl(mut self, ttl: TtlConfig) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }
}
