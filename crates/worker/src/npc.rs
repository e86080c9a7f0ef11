//! Per-NPC agents and their pool
//!
//! Each live NPC agent holds the character's row, a personality profile
//! built from it, a resolved voice and a rolling memory of recent
//! interactions. Agents are created lazily by [`NpcPool`] (capacity-bounded,
//! oldest evicted first by default) and every completion they run goes
//! through the shared [`TaskQueue`].

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orator_core::{
    CompletionMessage, CompletionOptions, CompletionRegistry, Filter, Row, Synthesizer,
    Transcriber, VoiceGender, VoiceOptions, VoiceRegistry,
};
use orator_resilience::{Coordinator, ReadOptions, Resource};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{run_completion, AgentContext, AgentError, AgentResponse};
use crate::config::WorkerConfig;
use crate::pool::{PoolError, WorkerFactory, WorkerPool};
use crate::queue::{QueueError, TaskQueue};

const FALLBACK_REPLY: &str = "I'm not sure how to respond to that.";

/// Who said something in an NPC conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Player,
    Npc,
    System,
}

/// One line of an NPC conversation, as stored in `npc_interactions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcInteraction {
    pub id: String,
    pub npc_id: String,
    pub speaker_type: Speaker,
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_note: Option<String>,
}

/// Result of a voice exchange
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceReply {
    pub transcript: String,
    pub response: AgentResponse,
    pub audio: Vec<u8>,
}

// ============================================================================
// NpcAgent
// ============================================================================

/// Stateful agent speaking as one NPC
pub struct NpcAgent {
    npc_id: String,
    name: String,
    npc: Row,
    personality: String,
    voice: VoiceOptions,
    memory: Mutex<VecDeque<NpcInteraction>>,
    last_interaction: Mutex<DateTime<Utc>>,
    memory_limit: usize,
    context_window: usize,
    context: AgentContext,
    coordinator: Arc<Coordinator>,
    completions: Arc<CompletionRegistry>,
}

impl NpcAgent {
    pub fn npc_id(&self) -> &str {
        &self.npc_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The NPC row the agent was built from
    pub fn npc(&self) -> &Row {
        &self.npc
    }

    pub fn personality(&self) -> &str {
        &self.personality
    }

    pub fn voice(&self) -> &VoiceOptions {
        &self.voice
    }

    /// Remembered interactions, newest first
    pub fn memory(&self) -> Vec<NpcInteraction> {
        self.memory.lock().iter().cloned().collect()
    }

    pub fn last_interaction(&self) -> DateTime<Utc> {
        *self.last_interaction.lock()
    }

    /// Answer a player in character
    pub async fn respond(
        &self,
        input: &str,
        context_note: Option<&str>,
    ) -> Result<AgentResponse, AgentError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AgentError::InvalidInput("empty player input".to_string()));
        }

        let mut messages = vec![CompletionMessage::system(self.character_prompt(context_note))];
        {
            let memory = self.memory.lock();
            messages.extend(memory.iter().take(self.context_window).rev().map(|interaction| {
                match interaction.speaker_type {
                    Speaker::Npc => CompletionMessage::assistant(&interaction.content),
                    Speaker::Player | Speaker::System => CompletionMessage::user(&interaction.content),
                }
            }));
        }
        messages.push(CompletionMessage::user(input));

        self.remember(Speaker::Player, input, context_note).await;

        let completion = run_completion(
            &self.name,
            &self.completions,
            None,
            messages,
            &CompletionOptions::default(),
            self.context.session_id.as_deref(),
        )
        .await?;

        let content = if completion.content.trim().is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            completion.content
        };
        self.remember(Speaker::Npc, &content, context_note).await;

        Ok(AgentResponse {
            agent: self.name.clone(),
            content,
            provider: completion.provider,
            usage: completion.usage,
        })
    }

    /// Transcribe player audio, answer it and speak the answer in the NPC's voice
    pub async fn respond_to_voice(
        &self,
        audio: &[u8],
        transcriber: &dyn Transcriber,
        synthesizer: &dyn Synthesizer,
        context_note: Option<&str>,
    ) -> Result<VoiceReply, AgentError> {
        let transcript = transcriber.transcribe(audio).await?;
        let response = self.respond(&transcript, context_note).await?;
        let audio = synthesizer.synthesize(&response.content, &self.voice).await?;
        Ok(VoiceReply {
            transcript,
            response,
            audio,
        })
    }

    fn character_prompt(&self, context_note: Option<&str>) -> String {
        format!(
            "You are roleplaying as {name}, an NPC in a tabletop campaign.\n\n\
             {profile}\n\n\
             Current context: {note}\n\n\
             Stay in character as {name}. Only use knowledge {name} would have. \
             Keep replies conversational and short; they will be spoken aloud.",
            name = self.name,
            profile = self.personality,
            note = context_note.unwrap_or("Normal conversation with a player character."),
        )
    }

    /// Add an interaction to memory and persist it
    ///
    /// Persistence failures are logged; the conversation goes on.
    async fn remember(&self, speaker: Speaker, content: &str, context_note: Option<&str>) {
        let now = Utc::now();
        let interaction = NpcInteraction {
            id: Uuid::now_v7().to_string(),
            npc_id: self.npc_id.clone(),
            speaker_type: speaker,
            content: content.to_string(),
            session_id: self.context.session_id.clone(),
            created_at: now,
            context_note: context_note.map(str::to_string),
        };

        {
            let mut memory = self.memory.lock();
            memory.push_front(interaction.clone());
            memory.truncate(self.memory_limit);
        }
        *self.last_interaction.lock() = now;

        if let Err(err) = self
            .coordinator
            .create_as(
                Resource::NpcInteractions,
                Some(&self.context.campaign_id),
                &interaction,
            )
            .await
        {
            warn!(npc_id = %self.npc_id, error = %err, "Failed to save NPC interaction");
        }
    }
}

/// Character sheet text for the completion prompt
fn personality_profile(npc: &Row, location: Option<&Row>, faction: Option<&Row>) -> String {
    let text = |row: &Row, field: &str| -> Option<String> {
        row.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };
    let or = |value: Option<String>, missing: &str| value.unwrap_or_else(|| missing.to_string());

    let mut profile = vec![
        format!("Name: {}", or(text(npc, "name"), "Unknown")),
        format!("Description: {}", or(text(npc, "description"), "No description available.")),
        format!("Personality traits: {}", or(text(npc, "personality"), "No personality traits defined.")),
        format!("Goals: {}", or(text(npc, "goals"), "No specific goals defined.")),
        format!("Secrets: {}", or(text(npc, "secrets"), "No secrets defined.")),
        format!("Background: {}", or(text(npc, "history"), "No background information available.")),
        format!("Appearance: {}", or(text(npc, "appearance"), "No appearance details available.")),
    ];

    if let Some(faction) = faction {
        profile.push(format!("Faction: {}", or(text(faction, "name"), "No faction")));
        profile.push(format!(
            "Faction details: {}",
            or(text(faction, "description"), "No faction details available.")
        ));
    }
    if let Some(location) = location {
        profile.push(format!("Current location: {}", or(text(location, "name"), "Unknown location")));
        profile.push(format!(
            "Location details: {}",
            or(text(location, "description"), "No location details available.")
        ));
    }

    let tags: Vec<&str> = npc
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !tags.is_empty() {
        profile.push(format!("Tags: {}", tags.join(", ")));
    }
    if let Some(status) = text(npc, "status") {
        profile.push(format!("Current status: {status}"));
    }

    profile.join("\n")
}

// ============================================================================
// Factory and pool
// ============================================================================

/// Builds [`NpcAgent`]s from campaign data
pub struct NpcAgentFactory {
    coordinator: Arc<Coordinator>,
    completions: Arc<CompletionRegistry>,
    voices: Arc<VoiceRegistry>,
    context: AgentContext,
    history_limit: usize,
    context_window: usize,
}

impl NpcAgentFactory {
    pub fn new(
        coordinator: Arc<Coordinator>,
        completions: Arc<CompletionRegistry>,
        voices: Arc<VoiceRegistry>,
        context: AgentContext,
    ) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            coordinator,
            completions,
            voices,
            context,
            history_limit: defaults.npc_history_limit,
            context_window: defaults.npc_context_window,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = window;
        self
    }

    /// Load the NPC and its recent history and build the agent
    pub async fn build(&self, npc_id: &str) -> Result<NpcAgent, AgentError> {
        let npc = self
            .coordinator
            .get(Resource::Npcs, npc_id)
            .await?
            .data
            .ok_or_else(|| AgentError::NpcNotFound(npc_id.to_string()))?;

        let location = self.related(&npc, "location_id", Resource::Locations).await;
        let faction = self.related(&npc, "faction_id", Resource::Factions).await;

        let history_filter = Filter::new()
            .eq("npc_id", npc_id)
            .order_desc("created_at")
            .limit(self.history_limit);
        let history = self
            .coordinator
            .list_where(
                Resource::NpcInteractions,
                Some(&self.context.campaign_id),
                npc_id,
                history_filter,
                ReadOptions::default(),
            )
            .await?;
        let memory: VecDeque<NpcInteraction> = history
            .data
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(interaction) => Some(interaction),
                Err(err) => {
                    debug!(npc_id, error = %err, "Skipping malformed interaction row");
                    None
                }
            })
            .collect();

        let gender = VoiceGender::from_hint(npc.get("gender").and_then(Value::as_str));
        let voice = match (
            self.voices.voice_for(npc_id),
            npc.get("voice_id").and_then(Value::as_str),
        ) {
            (None, Some(voice_id)) => VoiceOptions::new(voice_id),
            _ => self.voices.options_for(npc_id, gender),
        };

        let name = npc
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(npc_id)
            .to_string();
        let personality = personality_profile(&npc, location.as_ref(), faction.as_ref());

        info!(
            npc_id,
            npc_name = %name,
            remembered = memory.len(),
            voice = %voice.voice_id,
            history_source = %history.source,
            "NPC agent created"
        );

        Ok(NpcAgent {
            npc_id: npc_id.to_string(),
            name,
            npc,
            personality,
            voice,
            memory: Mutex::new(memory),
            last_interaction: Mutex::new(Utc::now()),
            memory_limit: self.history_limit.max(1),
            context_window: self.context_window,
            context: self.context.clone(),
            coordinator: Arc::clone(&self.coordinator),
            completions: Arc::clone(&self.completions),
        })
    }

    /// Row referenced by `column`, if present and readable
    async fn related(&self, npc: &Row, column: &str, resource: Resource) -> Option<Row> {
        let id = npc.get(column).and_then(Value::as_str)?;
        match self.coordinator.get(resource, id).await {
            Ok(fetched) => fetched.data,
            Err(err) => {
                warn!(%resource, id, error = %err, "Could not load related row for NPC profile");
                None
            }
        }
    }
}

#[async_trait]
impl WorkerFactory<String> for NpcAgentFactory {
    type Worker = NpcAgent;

    async fn create(&self, npc_id: &String) -> anyhow::Result<NpcAgent> {
        Ok(self.build(npc_id).await?)
    }
}

/// Errors from [`NpcPool`] operations
#[derive(Debug, thiserror::Error)]
pub enum NpcPoolError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Capacity-bounded pool of NPC agents sharing one task queue
pub struct NpcPool {
    agents: WorkerPool<String, NpcAgentFactory>,
    queue: TaskQueue,
}

impl NpcPool {
    pub fn new(factory: NpcAgentFactory, queue: TaskQueue, config: &WorkerConfig) -> Self {
        let factory = factory
            .with_history_limit(config.npc_history_limit)
            .with_context_window(config.npc_context_window);
        Self {
            agents: WorkerPool::new(factory, config.npc_pool_capacity)
                .with_policy(config.npc_eviction),
            queue,
        }
    }

    /// The agent for an NPC, created on first use
    pub async fn acquire(&self, npc_id: &str) -> Result<Arc<NpcAgent>, PoolError> {
        self.agents.acquire(&npc_id.to_string()).await
    }

    /// Answer a player through the shared queue
    pub async fn respond(
        &self,
        npc_id: &str,
        input: impl Into<String>,
        context_note: Option<String>,
        priority: i32,
    ) -> Result<AgentResponse, NpcPoolError> {
        let agent = self.acquire(npc_id).await?;
        let input = input.into();
        let response = self
            .queue
            .submit(format!("npc:{npc_id}"), priority, move || async move {
                agent.respond(&input, context_note.as_deref()).await
            })
            .await??;
        Ok(response)
    }

    /// Voice exchange through the shared queue
    pub async fn respond_to_voice(
        &self,
        npc_id: &str,
        audio: Vec<u8>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        context_note: Option<String>,
        priority: i32,
    ) -> Result<VoiceReply, NpcPoolError> {
        let agent = self.acquire(npc_id).await?;
        let reply = self
            .queue
            .submit(format!("npc-voice:{npc_id}"), priority, move || async move {
                agent
                    .respond_to_voice(
                        &audio,
                        transcriber.as_ref(),
                        synthesizer.as_ref(),
                        context_note.as_deref(),
                    )
                    .await
            })
            .await??;
        Ok(reply)
    }

    pub fn release(&self, npc_id: &str) -> bool {
        self.agents.release(&npc_id.to_string())
    }

    pub fn release_all(&self) -> usize {
        self.agents.release_all()
    }

    pub fn active_count(&self) -> usize {
        self.agents.active_count()
    }

    pub fn capacity(&self) -> usize {
        self.agents.capacity()
    }

    /// Live NPC ids, oldest first
    pub fn active_npcs(&self) -> Vec<String> {
        self.agents.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_personality_profile_includes_related_rows() {
        let npc = json!({
            "name": "Vex",
            "personality": "Wry, suspicious",
            "tags": ["smuggler", "informant"],
            "status": "hiding"
        });
        let location = json!({"name": "Saltmarsh", "description": "A fishing town"});

        let profile = personality_profile(&npc, Some(&location), None);

        assert!(profile.starts_with("Name: Vex\n"));
        assert!(profile.contains("Personality traits: Wry, suspicious"));
        assert!(profile.contains("Goals: No specific goals defined."));
        assert!(profile.contains("Current location: Saltmarsh"));
        assert!(profile.contains("Tags: smuggler, informant"));
        assert!(profile.ends_with("Current status: hiding"));
        assert!(!profile.contains("Faction:"));
    }

    #[test]
    fn test_interaction_row_shape() {
        let row = json!({
            "id": "i1",
            "npc_id": "n1",
            "campaign_id": "c1",
            "speaker_type": "player",
            "content": "Hello",
            "created_at": "2024-05-01T12:00:00Z"
        });
        let interaction: NpcInteraction = serde_json::from_value(row).unwrap();
        assert_eq!(interaction.speaker_type, Speaker::Player);
        assert_eq!(interaction.session_id, None);
    }
}
