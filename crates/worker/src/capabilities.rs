//! Capability router
//!
//! A fixed set of named agents, one per capability, kept in preference
//! order. Every unit of work goes through the shared [`TaskQueue`] with the
//! caller's priority; the queue is the only admission control, including for
//! brainstorms that fan one topic out to several capabilities.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use orator_core::{CompletionRegistry, RankedChain, Selection};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::agent::{AgentContext, AgentError, AgentInput, AgentResponse, CompletionAgent, SharedAgent};
use crate::config::WorkerConfig;
use crate::queue::{QueueError, TaskQueue};

/// Built-in capabilities, in default preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Dm,
    Dialogue,
    Npc,
    Session,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Dm,
        Capability::Dialogue,
        Capability::Npc,
        Capability::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Dm => "dm",
            Capability::Dialogue => "dialogue",
            Capability::Npc => "npc",
            Capability::Session => "session",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Capability::Dm => "You assist the game master running a tabletop campaign.",
            Capability::Dialogue => "You write in-character dialogue for the campaign's characters.",
            Capability::Npc => "You create and flesh out non-player characters.",
            Capability::Session => "You plan game sessions: encounters, pacing and hooks.",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|capability| capability.as_str() == s)
            .ok_or_else(|| RouterError::NotEnabled(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("capability '{0}' is not enabled")]
    NotEnabled(String),

    #[error("no capability available")]
    NoneAvailable { requested: Option<String> },

    #[error("no enabled capabilities selected for brainstorming")]
    NothingToBrainstorm,

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Response of [`CapabilityRouter::dispatch_best`]
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    /// Capability that handled the work
    pub capability: String,
    /// True when it stood in for an unavailable requested capability
    pub substituted: bool,
    pub response: AgentResponse,
}

/// Routes work to capability agents through the shared queue
pub struct CapabilityRouter {
    agents: RwLock<RankedChain<SharedAgent>>,
    queue: TaskQueue,
    rules_version: RwLock<String>,
}

impl CapabilityRouter {
    /// Router with no agents
    pub fn new(queue: TaskQueue, rules_version: impl Into<String>) -> Self {
        Self {
            agents: RwLock::new(RankedChain::new()),
            queue,
            rules_version: RwLock::new(rules_version.into()),
        }
    }

    /// Router with one completion agent per built-in capability
    pub fn with_defaults(
        completions: Arc<CompletionRegistry>,
        context: AgentContext,
        queue: TaskQueue,
        config: &WorkerConfig,
    ) -> Self {
        let router = Self::new(queue, config.rules_version.clone());
        for capability in Capability::ALL {
            router.register(
                capability.as_str(),
                Arc::new(CompletionAgent::new(
                    capability.as_str(),
                    capability.system_prompt(),
                    Arc::clone(&completions),
                    context.clone(),
                )),
            );
        }
        info!(
            capabilities = ?router.enabled(),
            rules_version = %config.rules_version,
            "Capability router ready"
        );
        router
    }

    /// Register an agent at the lowest preference, or replace one in place
    pub fn register(&self, capability: impl Into<String>, agent: SharedAgent) {
        self.agents.write().push(capability, agent);
    }

    /// Move a capability to the front of the preference order
    pub fn prefer(&self, capability: &str) -> bool {
        self.agents.write().prefer(capability)
    }

    /// Enabled capabilities in preference order
    pub fn enabled(&self) -> Vec<String> {
        self.agents.read().names()
    }

    pub fn is_enabled(&self, capability: &str) -> bool {
        self.agents.read().contains(capability)
    }

    pub fn rules_version(&self) -> String {
        self.rules_version.read().clone()
    }

    pub fn set_rules_version(&self, version: impl Into<String>) {
        *self.rules_version.write() = version.into();
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// The requested capability if available, else the best available one
    pub fn best_available(&self, requested: Option<&str>) -> Selection<SharedAgent> {
        self.agents.read().select(requested, |agent| agent.is_available())
    }

    /// Run `input` on a specific capability
    pub async fn dispatch(
        &self,
        capability: &str,
        priority: i32,
        input: AgentInput,
    ) -> Result<AgentResponse, RouterError> {
        let agent = self
            .agents
            .read()
            .get(capability)
            .cloned()
            .ok_or_else(|| RouterError::NotEnabled(capability.to_string()))?;

        self.submit(capability, agent, priority, input).await
    }

    /// Run `input` on the requested capability, falling back along the
    /// preference order when it is unavailable
    pub async fn dispatch_best(
        &self,
        requested: Option<&str>,
        priority: i32,
        input: AgentInput,
    ) -> Result<Routed, RouterError> {
        match self.best_available(requested) {
            Selection::Found {
                name,
                item,
                substituted,
            } => {
                if substituted {
                    warn!(
                        requested = requested.unwrap_or_default(),
                        using = %name,
                        "Requested capability unavailable, falling back"
                    );
                }
                let response = self.submit(&name, item, priority, input).await?;
                Ok(Routed {
                    capability: name,
                    substituted,
                    response,
                })
            }
            Selection::NotFound { requested } => Err(RouterError::NoneAvailable { requested }),
        }
    }

    /// Ask several capabilities about one topic
    ///
    /// Unknown capabilities are skipped. All requests are submitted at once
    /// and admitted by the queue; responses come back in request order. The
    /// first failure is returned once every request has finished.
    pub async fn brainstorm(
        &self,
        topic: &str,
        capabilities: &[&str],
        priority: i32,
    ) -> Result<Vec<AgentResponse>, RouterError> {
        let selected: Vec<(String, SharedAgent)> = {
            let agents = self.agents.read();
            capabilities
                .iter()
                .filter_map(|name| agents.get(name).map(|agent| (name.to_string(), Arc::clone(agent))))
                .collect()
        };
        if selected.is_empty() {
            return Err(RouterError::NothingToBrainstorm);
        }

        let rules_version = self.rules_version();
        debug!(topic, capabilities = selected.len(), "Brainstorming");

        let handles: Vec<_> = selected
            .into_iter()
            .map(|(name, agent)| {
                let input = AgentInput::Brainstorm {
                    topic: topic.to_string(),
                    rules_version: rules_version.clone(),
                };
                self.queue
                    .submit(format!("brainstorm:{name}"), priority, move || async move {
                        agent.process(input).await
                    })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|outcome| -> Result<AgentResponse, RouterError> { Ok(outcome??) })
            .collect()
    }

    async fn submit(
        &self,
        capability: &str,
        agent: SharedAgent,
        priority: i32,
        input: AgentInput,
    ) -> Result<AgentResponse, RouterError> {
        let response = self
            .queue
            .submit(capability, priority, move || async move { agent.process(input).await })
            .await??;
        Ok(response)
    }
}
