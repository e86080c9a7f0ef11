//! Orator agent workers
//!
//! Admission control and pooling for AI-completion work:
//! - [`TaskQueue`]: bounded, priority-ordered execution of expensive tasks
//! - [`WorkerPool`]: capacity-bounded keyed pool with FIFO or LRU eviction
//! - [`NpcPool`]: per-NPC agents loaded through the resilience coordinator
//! - [`CapabilityRouter`]: dm/dialogue/npc/session agents with best-available selection

pub mod agent;
pub mod capabilities;
pub mod config;
pub mod npc;
pub mod pool;
pub mod queue;

pub use agent::{Agent, AgentContext, AgentError, AgentInput, AgentResponse, CompletionAgent, SharedAgent};
pub use capabilities::{Capability, CapabilityRouter, Routed, RouterError};
pub use config::WorkerConfig;
pub use npc::{NpcAgent, NpcAgentFactory, NpcInteraction, NpcPool, NpcPoolError, Speaker, VoiceReply};
pub use pool::{EvictionPolicy, PoolError, WorkerFactory, WorkerPool};
pub use queue::{QueueError, TaskHandle, TaskQueue};
