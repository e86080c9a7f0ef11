// Agent abstraction
//
// An agent turns an input into a completion-backed response. Capability
// agents (dm, dialogue, npc, session) are stateless wrappers around a system
// prompt; NPC agents (see npc.rs) carry per-character state.

use std::sync::Arc;

use async_trait::async_trait;
use orator_core::telemetry::{agent_span_name, gen_ai};
use orator_core::{
    CompletionMessage, CompletionOptions, CompletionRegistry, ProviderError, TokenUsage,
};
use orator_resilience::ResilienceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{field, info_span, Instrument};

/// Who the agent is working for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    pub campaign_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

impl AgentContext {
    pub fn new(campaign_id: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// A unit of work for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentInput {
    /// Free-form request
    Prompt { content: String },
    /// Contribute ideas on a topic
    Brainstorm { topic: String, rules_version: String },
}

impl AgentInput {
    pub fn prompt(content: impl Into<String>) -> Self {
        AgentInput::Prompt {
            content: content.into(),
        }
    }

    fn to_user_message(&self) -> String {
        match self {
            AgentInput::Prompt { content } => content.clone(),
            AgentInput::Brainstorm {
                topic,
                rules_version,
            } => format!("Brainstorm ideas for: {topic} (rules: {rules_version})"),
        }
    }
}

/// An agent's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Agent that produced the response
    pub agent: String,
    pub content: String,
    /// Completion provider that served the request
    pub provider: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Data(#[from] ResilienceError),

    #[error("NPC '{0}' not found")]
    NpcNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Capability or character name
    fn name(&self) -> &str;

    /// Whether the agent can currently serve requests
    fn is_available(&self) -> bool {
        true
    }

    async fn process(&self, input: AgentInput) -> Result<AgentResponse, AgentError>;
}

pub type SharedAgent = Arc<dyn Agent>;

/// Agent defined by a system prompt over the completion registry
pub struct CompletionAgent {
    name: String,
    system_prompt: String,
    completions: Arc<CompletionRegistry>,
    provider: Option<String>,
    options: CompletionOptions,
    context: AgentContext,
}

impl CompletionAgent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        completions: Arc<CompletionRegistry>,
        context: AgentContext,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            completions,
            provider: None,
            options: CompletionOptions::default(),
            context,
        }
    }

    /// Prefer a specific completion provider
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }
}

#[async_trait]
impl Agent for CompletionAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.completions.select(self.provider.as_deref()).is_found()
    }

    async fn process(&self, input: AgentInput) -> Result<AgentResponse, AgentError> {
        let messages = vec![
            CompletionMessage::system(&self.system_prompt),
            CompletionMessage::user(input.to_user_message()),
        ];

        let completion = run_completion(
            &self.name,
            &self.completions,
            self.provider.as_deref(),
            messages,
            &self.options,
            self.context.session_id.as_deref(),
        )
        .await?;

        Ok(AgentResponse {
            agent: self.name.clone(),
            content: completion.content,
            provider: completion.provider,
            usage: completion.usage,
        })
    }
}

/// Run a completion inside an `invoke_agent` span
pub(crate) async fn run_completion(
    agent: &str,
    completions: &CompletionRegistry,
    provider: Option<&str>,
    messages: Vec<CompletionMessage>,
    options: &CompletionOptions,
    conversation_id: Option<&str>,
) -> Result<orator_core::Completion, ProviderError> {
    let span = info_span!(
        "invoke_agent",
        otel.name = %agent_span_name(agent),
        gen_ai.operation.name = gen_ai::operation::INVOKE_AGENT,
        gen_ai.agent.name = %agent,
        gen_ai.conversation.id = field::Empty,
    );
    if let Some(id) = conversation_id {
        span.record(gen_ai::CONVERSATION_ID, id);
    }

    completions
        .complete(provider, messages, options)
        .instrument(span)
        .await
}
