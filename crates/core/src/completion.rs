// AI-Completion Driver Abstractions
//
// This module encapsulates what the core needs from AI-completion providers:
// - CompletionDriver trait for provider-agnostic chat completion
// - CompletionRegistry ranking drivers by preference, with availability checks
// - EchoDriver, a deterministic driver for tests and offline demos
//
// Design: provider crates implement CompletionDriver and register themselves at
// startup. The registry only knows names, preference order and availability.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{field, info_span, warn, Instrument};

use crate::error::ProviderError;
use crate::selection::{RankedChain, Selection};
use crate::telemetry::gen_ai;

// ============================================================================
// Message Types
// ============================================================================

/// Message role for completion calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionRole {
    System,
    User,
    Assistant,
}

/// Message format for completion calls (provider-agnostic)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: CompletionRole,
    pub content: String,
}

impl CompletionMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: CompletionRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: CompletionRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: CompletionRole::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Configuration and Response Types
// ============================================================================

/// Options for a completion call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionOptions {
    /// Create default options (provider picks the model)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// Token accounting for a completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Response from a completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
    /// Name of the driver that produced the completion
    pub provider: String,
}

// ============================================================================
// CompletionDriver Trait
// ============================================================================

/// Trait for AI-completion drivers
///
/// Implementations handle provider-specific API calls and response parsing.
#[async_trait]
pub trait CompletionDriver: Send + Sync {
    /// Stable provider name used for selection (e.g. "claude", "openai")
    fn name(&self) -> &str;

    /// Whether the driver can currently serve requests (e.g. has an API key)
    fn is_available(&self) -> bool {
        true
    }

    /// Run a chat completion
    async fn complete(
        &self,
        messages: Vec<CompletionMessage>,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError>;
}

/// Shared completion driver for dynamic dispatch
pub type SharedCompletionDriver = Arc<dyn CompletionDriver>;

// ============================================================================
// Completion Registry
// ============================================================================

/// Registry of completion drivers in preference order
///
/// The first registered driver is the default; later ones are fallbacks.
/// `complete` honours an explicitly requested provider when it is available
/// and otherwise falls back along the preference order.
///
/// # Example
///
/// ```
/// use orator_core::completion::{CompletionRegistry, EchoDriver};
///
/// let registry = CompletionRegistry::new();
/// registry.register(EchoDriver::new("claude").unavailable());
/// registry.register(EchoDriver::new("openai"));
///
/// let selection = registry.select(Some("claude"));
/// assert_eq!(selection.name(), Some("openai"));
/// ```
#[derive(Default)]
pub struct CompletionRegistry {
    drivers: RwLock<RankedChain<SharedCompletionDriver>>,
}

impl CompletionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver at the lowest preference
    pub fn register<D>(&self, driver: D)
    where
        D: CompletionDriver + 'static,
    {
        self.register_shared(Arc::new(driver));
    }

    /// Register an already shared driver at the lowest preference
    pub fn register_shared(&self, driver: SharedCompletionDriver) {
        let name = driver.name().to_string();
        self.drivers.write().push(name, driver);
    }

    /// Make a provider the default
    pub fn prefer(&self, name: &str) -> bool {
        self.drivers.write().prefer(name)
    }

    /// Check if a driver is registered under this name
    pub fn has_driver(&self, name: &str) -> bool {
        self.drivers.read().contains(name)
    }

    /// Registered provider names in preference order
    pub fn registered_providers(&self) -> Vec<String> {
        self.drivers.read().names()
    }

    /// Select the best available driver
    pub fn select(&self, requested: Option<&str>) -> Selection<SharedCompletionDriver> {
        self.drivers
            .read()
            .select(requested, |driver| driver.is_available())
    }

    /// Run a completion on the best available driver
    pub async fn complete(
        &self,
        requested: Option<&str>,
        messages: Vec<CompletionMessage>,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let (name, driver) = match self.select(requested) {
            Selection::Found {
                name,
                item,
                substituted,
            } => {
                if substituted {
                    warn!(
                        requested = requested.unwrap_or_default(),
                        using = %name,
                        "Requested completion provider unavailable, falling back"
                    );
                }
                (name, item)
            }
            Selection::NotFound { .. } => return Err(ProviderError::NoProviderAvailable),
        };

        let span = info_span!(
            "gen_ai.chat",
            gen_ai.operation.name = gen_ai::operation::CHAT,
            gen_ai.provider.name = %name,
            gen_ai.request.model = field::Empty,
            gen_ai.usage.input_tokens = field::Empty,
            gen_ai.usage.output_tokens = field::Empty,
        );
        if let Some(model) = &options.model {
            span.record(gen_ai::REQUEST_MODEL, model.as_str());
        }

        let completion = driver
            .complete(messages, options)
            .instrument(span.clone())
            .await?;

        span.record(gen_ai::USAGE_INPUT_TOKENS, completion.usage.prompt_tokens);
        span.record(gen_ai::USAGE_OUTPUT_TOKENS, completion.usage.completion_tokens);
        Ok(completion)
    }
}

// ============================================================================
// Echo Driver
// ============================================================================

/// Deterministic driver that echoes the last user message
///
/// Used in tests and when running without provider credentials.
pub struct EchoDriver {
    name: String,
    available: bool,
}

impl EchoDriver {
    /// Create an available echo driver
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
        }
    }

    /// Mark the driver as unavailable (builder form)
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

#[async_trait]
impl CompletionDriver for EchoDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn complete(
        &self,
        messages: Vec<CompletionMessage>,
        _options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        if !self.available {
            return Err(ProviderError::not_configured(&self.name));
        }

        let prompt_tokens = messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u32)
            .sum();
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == CompletionRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let content = format!("[{}] {}", self.name, last_user);
        let completion_tokens = content.split_whitespace().count() as u32;

        Ok(Completion {
            content,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
            },
            provider: self.name.clone(),
        })
    }
}
