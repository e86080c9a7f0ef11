// Worker configuration
// Decision: Environment variables only; no config files

use serde::{Deserialize, Serialize};

use crate::pool::EvictionPolicy;
use crate::queue::DEFAULT_MAX_CONCURRENT;

/// Default number of live NPC agents
pub const DEFAULT_NPC_POOL_CAPACITY: usize = 5;

/// Default rules edition passed to agents
pub const DEFAULT_RULES_VERSION: &str = "5.5E";

/// Configuration for the queue, the NPC pool and the capability router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrently running completion tasks
    pub max_concurrent: usize,
    /// Maximum live NPC agents
    pub npc_pool_capacity: usize,
    /// Which NPC agent to drop when the pool is full
    pub npc_eviction: EvictionPolicy,
    /// Interactions loaded when an NPC agent starts
    pub npc_history_limit: usize,
    /// Interactions replayed into each NPC prompt
    pub npc_context_window: usize,
    /// Rules edition the agents assume
    pub rules_version: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            npc_pool_capacity: DEFAULT_NPC_POOL_CAPACITY,
            npc_eviction: EvictionPolicy::default(),
            npc_history_limit: 20,
            npc_context_window: 5,
            rules_version: DEFAULT_RULES_VERSION.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// - `ORATOR_MAX_CONCURRENT` (default: 3)
    /// - `ORATOR_NPC_POOL_CAPACITY` (default: 5)
    /// - `ORATOR_NPC_EVICTION`: `oldest_inserted` or `least_recently_used`
    /// - `ORATOR_RULES_VERSION` (default: "5.5E")
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_concurrent = lookup("ORATOR_MAX_CONCURRENT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_concurrent);

        let npc_pool_capacity = lookup("ORATOR_NPC_POOL_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.npc_pool_capacity);

        let npc_eviction = lookup("ORATOR_NPC_EVICTION")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.npc_eviction);

        let rules_version = lookup("ORATOR_RULES_VERSION")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.rules_version);

        Self {
            max_concurrent,
            npc_pool_capacity,
            npc_eviction,
            rules_version,
            ..defaults
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_npc_pool_capacity(mut self, capacity: usize) -> Self {
        self.npc_pool_capacity = capacity.max(1);
        self
    }

    pub fn with_npc_eviction(mut self, policy: EvictionPolicy) -> Self {
        self.npc_eviction = policy;
        self
    }

    pub fn with_rules_version(mut self, version: impl Into<String>) -> Self {
        self.rules_version = version.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.npc_pool_capacity, 5);
        assert_eq!(config.npc_eviction, EvictionPolicy::OldestInserted);
        assert_eq!(config.npc_history_limit, 20);
        assert_eq!(config.rules_version, "5.5E");
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ORATOR_MAX_CONCURRENT", "1"),
            ("ORATOR_NPC_EVICTION", "lru"),
            ("ORATOR_RULES_VERSION", "2014"),
            ("ORATOR_NPC_POOL_CAPACITY", "lots"),
        ]
        .into_iter()
        .collect();

        let config = WorkerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.npc_eviction, EvictionPolicy::LeastRecentlyUsed);
        assert_eq!(config.rules_version, "2014");
        assert_eq!(config.npc_pool_capacity, 5);
    }
}
