//! # Orator Resilience
//!
//! Fault-tolerant access to the hosted row store behind the campaign tool.
//!
//! ## Features
//!
//! - **Retry with backoff**: exponential delays with jitter and per-attempt timeouts
//! - **Connectivity circuit**: closed / open / half-open, driven by rate-limited probes
//! - **TTL cache**: per-resource freshness classes, stale reads for offline fallback
//! - **Request coalescing**: one in-flight fetch per key, optional debounce with fan-out
//! - **Failure tracking**: keys that keep failing are blocked for a cool-down
//! - **Coordinator**: composes all of the above behind list/get/create/update/delete
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use orator_core::InMemoryDataService;
//! use orator_resilience::prelude::*;
//!
//! # async fn example() -> orator_resilience::Result<()> {
//! let data = Arc::new(InMemoryDataService::new());
//! let coordinator = Coordinator::new(data, CoordinatorConfig::from_env());
//! let _watchdog = coordinator.connectivity().spawn_watchdog();
//!
//! let npcs = coordinator.list(Resource::Npcs, Some("campaign-1")).await?;
//! if npcs.is_degraded() {
//!     tracing::warn!(source = %npcs.source, "Showing possibly outdated NPCs");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod coalescer;
pub mod config;
pub mod coordinator;
pub(crate) mod duration_millis;
pub mod error;
pub mod failures;
pub mod reliability;
pub mod resource;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheKey, InvalidationPattern, TtlClass};
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::{AllEntities, Coordinator, DataSource, Fetched, ReadOptions};
    pub use crate::error::{ResilienceError, Result};
    pub use crate::reliability::{CircuitState, ConnectivityStatus, RetryPolicy};
    pub use crate::resource::Resource;
}

pub use cache::{CacheKey, CacheStore, InvalidationPattern, TtlClass, TtlConfig};
pub use coalescer::{CoalesceMode, RequestCoalescer};
pub use config::CoordinatorConfig;
pub use coordinator::{AllEntities, Coordinator, DataSource, Fetched, ReadOptions};
pub use error::{ResilienceError, Result};
pub use failures::{FailureConfig, FailureTracker};
pub use reliability::{
    retry_with_backoff, CircuitState, ConnectivityConfig, ConnectivityMonitor, ConnectivityStatus,
    RetryPolicy,
};
pub use resource::{Resource, UnknownResource};
