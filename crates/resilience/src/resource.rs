//! Logical resources of the campaign tool

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::TtlClass;

/// A table-backed resource served through the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Campaigns,
    Npcs,
    Locations,
    Factions,
    Items,
    SessionPlans,
    StoryArcs,
    NpcInteractions,
    AgentLogs,
}

impl Resource {
    pub const ALL: [Resource; 9] = [
        Resource::Campaigns,
        Resource::Npcs,
        Resource::Locations,
        Resource::Factions,
        Resource::Items,
        Resource::SessionPlans,
        Resource::StoryArcs,
        Resource::NpcInteractions,
        Resource::AgentLogs,
    ];

    /// Members of the `all_entities` aggregate
    pub const ENTITIES: [Resource; 4] = [
        Resource::Npcs,
        Resource::Locations,
        Resource::Factions,
        Resource::Items,
    ];

    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            Resource::Campaigns => "campaigns",
            Resource::Npcs => "npcs",
            Resource::Locations => "locations",
            Resource::Factions => "factions",
            Resource::Items => "items",
            Resource::SessionPlans => "session_plans",
            Resource::StoryArcs => "story_arcs",
            Resource::NpcInteractions => "npc_interactions",
            Resource::AgentLogs => "agent_logs",
        }
    }

    /// Column scoping rows to a campaign; campaigns are not scoped
    pub fn campaign_column(&self) -> Option<&'static str> {
        match self {
            Resource::Campaigns => None,
            _ => Some("campaign_id"),
        }
    }

    /// How long list and item reads stay fresh
    pub fn default_ttl(&self) -> TtlClass {
        match self {
            Resource::Campaigns => TtlClass::Long,
            Resource::NpcInteractions | Resource::AgentLogs => TtlClass::Short,
            _ => TtlClass::Standard,
        }
    }

    /// Whether the resource is part of the `all_entities` aggregate
    pub fn is_entity(&self) -> bool {
        Self::ENTITIES.contains(self)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Error for an unrecognized resource name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource: {0}")]
pub struct UnknownResource(pub String);

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Resource::ALL
            .into_iter()
            .find(|r| r.table() == normalized)
            .ok_or(UnknownResource(s.to_string()))
    }
}
