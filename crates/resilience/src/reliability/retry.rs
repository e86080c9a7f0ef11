//! Retry policy and the retry-with-backoff primitive

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ResilienceError;

/// Configuration for request retries
///
/// Exponential backoff with additive jitter to avoid synchronized retry storms.
///
/// # Example
///
/// ```
/// use orator_resilience::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_retries(3)
///     .with_initial_delay(Duration::from_millis(100))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
/// assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
/// assert_eq!(policy.delay_for_retry(3), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "crate::duration_millis")]
    pub initial_delay: Duration,

    /// Upper bound for the backoff delay (before jitter)
    #[serde(with = "crate::duration_millis")]
    pub max_delay: Duration,

    /// Backoff multiplier (2.0 doubles the delay on every retry)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); adds up to `jitter × delay` on top of the delay
    pub jitter: f64,

    /// Per-attempt deadline
    #[serde(with = "crate::duration_millis::option", default)]
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with the data-service defaults
    ///
    /// - 5 retries
    /// - 300ms initial delay, doubling, capped at 10s
    /// - 10% jitter
    /// - 10s per-attempt timeout
    pub fn exponential() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            timeout: Some(Duration::from_secs(10)),
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            timeout: None,
        }
    }

    /// Fixed delay between retries
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            timeout: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor (clamped to 0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set or clear the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before the given retry (1-based)
    ///
    /// Fields set directly or deserialized are sanitized here: a negative or
    /// non-finite coefficient counts as 1.0 (constant delay), and jitter is
    /// clamped to 0.0-1.0 with non-finite values counting as 0.0.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let coefficient =
            if self.backoff_coefficient.is_finite() && self.backoff_coefficient >= 0.0 {
                self.backoff_coefficient
            } else {
                1.0
            };
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * coefficient.powi(exponent);
        // 0 × ∞ with a zero initial delay
        let base = if base.is_nan() { 0.0 } else { base };
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * jitter;
            capped + rand::thread_rng().gen_range(0.0..jitter_range)
        } else {
            capped
        };

        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_delay)
    }

    /// Check if another retry is allowed after `retries_done` retries
    pub fn has_retries_remaining(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

/// Run `operation` with retries according to `policy`
///
/// `is_offline` is consulted before every attempt, including the first; when
/// it returns true the call fails with [`ResilienceError::OfflineMode`]
/// without consuming a retry. Only [`ResilienceError::is_retryable`] errors
/// are retried.
pub async fn retry_with_backoff<T, F, Fut, O>(
    policy: &RetryPolicy,
    is_offline: O,
    mut operation: F,
) -> Result<T, ResilienceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ResilienceError>>,
    O: Fn() -> bool,
{
    let mut retries = 0;
    loop {
        if is_offline() {
            return Err(ResilienceError::OfflineMode);
        }

        let result = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ResilienceError::Timeout { limit }),
            },
            None => operation().await,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && policy.has_retries_remaining(retries) => {
                retries += 1;
                let delay = policy.delay_for_retry(retries);
                debug!(
                    retry = retries,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
