// Error types shared by the collaborator interfaces

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error reported by the remote data service
///
/// Mirrors the shape the hosted database returns: a machine-readable code,
/// a message and optional details/hint for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RemoteError {
    pub code: Option<String>,
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl RemoteError {
    /// Create a remote error with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Set the hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Errors raised by AI-completion and speech providers
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider exists but has no credentials or is disabled
    #[error("Provider '{0}' is not configured")]
    NotConfigured(String),

    /// No provider in the preference order is available
    #[error("No provider available. Configure at least one provider API key.")]
    NoProviderAvailable,

    /// The provider rejected or failed the request
    #[error("Provider request failed: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ProviderError {
    /// Create a request error
    pub fn request(msg: impl Into<String>) -> Self {
        ProviderError::Request(msg.into())
    }

    /// Create a not-configured error
    pub fn not_configured(name: impl Into<String>) -> Self {
        ProviderError::NotConfigured(name.into())
    }
}
