//! Reliability patterns for remote data access
//!
//! This module provides:
//! - [`RetryPolicy`] and [`retry_with_backoff`] - exponential backoff with jitter
//! - [`ConnectivityMonitor`] - three-state circuit driven by connectivity probes

mod connectivity;
mod retry;

pub use connectivity::{CircuitState, ConnectivityConfig, ConnectivityMonitor, ConnectivityStatus};
pub use retry::{retry_with_backoff, RetryPolicy};
