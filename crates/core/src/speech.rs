// Speech collaborators
//
// Speech-to-text and text-to-speech are external providers. The core only
// defines the seams plus the per-NPC voice assignment table.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Default voice for NPCs without an assignment
pub const DEFAULT_VOICE: &str = "premade/adam";
/// Default voice for female NPCs without an assignment
pub const DEFAULT_FEMALE_VOICE: &str = "premade/rachel";

/// Voice gender hint used to pick a default voice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceGender {
    Female,
    Male,
    #[default]
    Neutral,
}

impl VoiceGender {
    /// Parse a free-form gender field from an NPC row
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(|h| h.trim().to_ascii_lowercase()).as_deref() {
            Some("female" | "f" | "woman") => VoiceGender::Female,
            Some("male" | "m" | "man") => VoiceGender::Male,
            _ => VoiceGender::Neutral,
        }
    }
}

/// Options passed to a synthesizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceOptions {
    pub voice_id: String,
    /// Playback speed multiplier (1.0 = normal)
    pub speed: f32,
    pub stability: f32,
}

impl VoiceOptions {
    /// Options for a voice with default speed and stability
    pub fn new(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            speed: 1.0,
            stability: 0.5,
        }
    }

    /// Set speed (builder form)
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

/// Speech-to-text provider
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe recorded audio into text
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ProviderError>;
}

/// Text-to-speech provider
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render text as audio bytes
    async fn synthesize(&self, text: &str, options: &VoiceOptions) -> Result<Vec<u8>, ProviderError>;
}

/// Per-NPC voice assignments
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    assignments: RwLock<HashMap<String, String>>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a voice to an NPC, replacing any previous assignment
    pub fn assign(&self, npc_id: impl Into<String>, voice_id: impl Into<String>) {
        self.assignments
            .write()
            .insert(npc_id.into(), voice_id.into());
    }

    /// Remove an NPC's assignment
    pub fn unassign(&self, npc_id: &str) -> Option<String> {
        self.assignments.write().remove(npc_id)
    }

    /// Explicitly assigned voice, if any
    pub fn voice_for(&self, npc_id: &str) -> Option<String> {
        self.assignments.read().get(npc_id).cloned()
    }

    /// Assigned voice, or the default for the gender
    pub fn resolve(&self, npc_id: &str, gender: VoiceGender) -> String {
        self.voice_for(npc_id).unwrap_or_else(|| {
            match gender {
                VoiceGender::Female => DEFAULT_FEMALE_VOICE,
                VoiceGender::Male | VoiceGender::Neutral => DEFAULT_VOICE,
            }
            .to_string()
        })
    }

    /// Synthesizer options for an NPC
    pub fn options_for(&self, npc_id: &str, gender: VoiceGender) -> VoiceOptions {
        VoiceOptions::new(self.resolve(npc_id, gender))
    }
}
