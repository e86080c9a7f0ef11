//! Error taxonomy for the resilience layer

use std::time::Duration;

use orator_core::RemoteError;
use thiserror::Error;

/// Errors surfaced by the coordinator and its building blocks
///
/// The type is `Clone` because one coalesced fetch fans its result out to
/// every waiting caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    /// The connectivity circuit is open; no network attempt was made
    #[error("offline mode: remote data service is unreachable")]
    OfflineMode,

    /// A single attempt exceeded its deadline
    #[error("operation timed out after {limit:?}")]
    Timeout { limit: Duration },

    /// The key failed too often recently and is cooling down
    #[error("requests for '{key}' are blocked after repeated failures (retry in {retry_after:?})")]
    Blocked { key: String, retry_after: Duration },

    /// Error reported by the remote data service
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A row could not be decoded into the requested type
    #[error("failed to decode row: {0}")]
    Decode(String),

    /// Anything uncategorized
    #[error("{0}")]
    Unknown(String),
}

impl ResilienceError {
    /// Create an uncategorized error
    pub fn unknown(msg: impl Into<String>) -> Self {
        ResilienceError::Unknown(msg.into())
    }

    /// Whether retrying with backoff can help
    ///
    /// `OfflineMode` and `Blocked` are answered from cache or fallback data
    /// instead; decode failures are deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResilienceError::Timeout { .. } | ResilienceError::Remote(_) | ResilienceError::Unknown(_)
        )
    }

    /// Short machine-readable kind, used as a tracing field
    pub fn kind(&self) -> &'static str {
        match self {
            ResilienceError::OfflineMode => "offline_mode",
            ResilienceError::Timeout { .. } => "timeout",
            ResilienceError::Blocked { .. } => "blocked",
            ResilienceError::Remote(_) => "remote",
            ResilienceError::Decode(_) => "decode",
            ResilienceError::Unknown(_) => "unknown",
        }
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        ResilienceError::Decode(err.to_string())
    }
}

/// Result type for resilience operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ResilienceError::Timeout {
            limit: Duration::from_secs(10)
        }
        .is_retryable());
        assert!(ResilienceError::Remote(RemoteError::new("boom")).is_retryable());
        assert!(ResilienceError::unknown("socket hang up").is_retryable());

        assert!(!ResilienceError::OfflineMode.is_retryable());
        assert!(!ResilienceError::Blocked {
            key: "npcs:c1:*".into(),
            retry_after: Duration::from_secs(30)
        }
        .is_retryable());
        assert!(!ResilienceError::Decode("missing field".into()).is_retryable());
    }

    #[test]
    fn test_remote_error_conversion() {
        let err: ResilienceError = RemoteError::new("permission denied").with_code("42501").into();
        assert_eq!(err.kind(), "remote");
        assert_eq!(err.to_string(), "remote error: permission denied");
    }
}
