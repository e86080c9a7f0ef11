//! Connectivity circuit for the remote data service
//!
//! A three-state circuit driven by lightweight probes (`DataService::ping`):
//!
//! ```text
//!            probe failures >= threshold
//! ┌────────┐ ─────────────────────────► ┌──────┐  probe starts  ┌──────────┐
//! │ Closed │                            │ Open │ ─────────────► │ HalfOpen │
//! └────────┘ ◄─────────────────────┐    └──────┘ ◄───────────── └──────────┘
//!                                  │               probe fails        │
//!                                  └──────────────────────────────────┘
//!                                              probe succeeds
//! ```
//!
//! Probes are rate limited: never more than once per `min_probe_spacing`, and
//! while open at most once per `check_interval`. Request failures reported by
//! the coordinator trigger a probe subject to the same limits; `retry_now`
//! bypasses them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use orator_core::DataService;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Circuit states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests go to the network
    Closed,

    /// Probe failed - requests short-circuit to cache and fallbacks
    Open,

    /// A recovery probe is in flight - requests still short-circuit
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Connectivity monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectivityConfig {
    /// Consecutive probe failures required to open the circuit
    pub failure_threshold: u32,

    /// Minimum time between probes while the circuit is open
    #[serde(with = "crate::duration_millis")]
    pub check_interval: Duration,

    /// Minimum time between any two probes
    #[serde(with = "crate::duration_millis")]
    pub min_probe_spacing: Duration,

    /// Deadline for a single probe
    #[serde(with = "crate::duration_millis")]
    pub probe_timeout: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
            check_interval: Duration::from_secs(30),
            min_probe_spacing: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectivityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold to open the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the interval between probes while open
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the minimum spacing between probes
    pub fn with_min_probe_spacing(mut self, spacing: Duration) -> Self {
        self.min_probe_spacing = spacing;
        self
    }

    /// Set the probe deadline
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

/// Read-only snapshot for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityStatus {
    pub state: CircuitState,
    /// Consecutive failed probes
    pub consecutive_failures: u32,
    /// Failed data requests since the last recovery
    pub failed_requests: u64,
    #[serde(with = "crate::duration_millis::option")]
    pub since_last_success: Option<Duration>,
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::duration_millis::option")]
    pub last_probe_latency: Option<Duration>,
}

impl ConnectivityStatus {
    /// Whether requests currently go to the network
    pub fn is_online(&self) -> bool {
        self.state == CircuitState::Closed
    }
}

#[derive(Debug)]
struct MonitorState {
    state: CircuitState,
    consecutive_failures: u32,
    failed_requests: u64,
    probing: bool,
    last_probe: Option<Instant>,
    last_probe_latency: Option<Duration>,
    last_success: Option<Instant>,
    last_success_at: Option<DateTime<Utc>>,
}

impl MonitorState {
    fn probe_due(&self, config: &ConnectivityConfig, now: Instant) -> bool {
        if self.probing {
            return false;
        }
        let Some(last) = self.last_probe else {
            return true;
        };
        let elapsed = now.saturating_duration_since(last);
        let spacing = match self.state {
            CircuitState::Closed => config.min_probe_spacing,
            CircuitState::Open | CircuitState::HalfOpen => {
                config.check_interval.max(config.min_probe_spacing)
            }
        };
        elapsed >= spacing
    }

    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            info!(from = %self.state, to = %to, "Connectivity state changed");
            self.state = to;
        }
    }
}

/// Connectivity prober and circuit state holder
///
/// The only writer of [`CircuitState`]; every coordinator call reads it
/// before attempting network I/O.
pub struct ConnectivityMonitor {
    data: Arc<dyn DataService>,
    config: ConnectivityConfig,
    state: Mutex<MonitorState>,
}

impl ConnectivityMonitor {
    /// Create a monitor that assumes the service is reachable
    pub fn new(data: Arc<dyn DataService>, config: ConnectivityConfig) -> Self {
        Self {
            data,
            config,
            state: Mutex::new(MonitorState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                failed_requests: 0,
                probing: false,
                last_probe: None,
                last_probe_latency: None,
                last_success: None,
                last_success_at: None,
            }),
        }
    }

    pub fn config(&self) -> &ConnectivityConfig {
        &self.config
    }

    /// Current circuit state
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Whether requests must short-circuit (open or probing)
    pub fn is_offline(&self) -> bool {
        self.state() != CircuitState::Closed
    }

    /// Snapshot for status displays
    pub fn status(&self) -> ConnectivityStatus {
        let state = self.state.lock();
        ConnectivityStatus {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            failed_requests: state.failed_requests,
            since_last_success: state.last_success.map(|t| t.elapsed()),
            last_success_at: state.last_success_at,
            last_probe_latency: state.last_probe_latency,
        }
    }

    /// Record a successful data request
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.last_success = Some(Instant::now());
        state.last_success_at = Some(Utc::now());
    }

    /// Record a failed data request
    ///
    /// Returns true when a probe is due, i.e. the caller should run
    /// [`maybe_probe`](Self::maybe_probe).
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        state.failed_requests += 1;
        state.probe_due(&self.config, Instant::now())
    }

    /// Record a failed request and probe in the background if one is due
    pub fn request_failed(self: &Arc<Self>) {
        if self.record_failure() {
            let monitor = Arc::clone(self);
            tokio::spawn(async move {
                monitor.maybe_probe().await;
            });
        }
    }

    /// Probe if the rate limits allow it
    ///
    /// Returns the resulting state, or `None` when the probe was suppressed.
    pub async fn maybe_probe(&self) -> Option<CircuitState> {
        if !self.begin_probe(false) {
            debug!("Connectivity probe suppressed");
            return None;
        }
        Some(self.run_probe().await)
    }

    /// Manual reconnect: reset the interval and probe immediately
    ///
    /// If a probe is already in flight its outcome is left to that probe and
    /// the current state is returned.
    pub async fn retry_now(&self) -> CircuitState {
        if !self.begin_probe(true) {
            return self.state();
        }
        self.run_probe().await
    }

    /// Spawn a watchdog that probes while the circuit is not closed
    ///
    /// The task ticks at the smaller of `check_interval` and
    /// `min_probe_spacing` and stops once the monitor is dropped.
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self
            .config
            .check_interval
            .min(self.config.min_probe_spacing)
            .max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    debug!("Connectivity watchdog stopping");
                    break;
                };
                if monitor.is_offline() {
                    monitor.maybe_probe().await;
                }
            }
        })
    }

    fn begin_probe(&self, force: bool) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        if state.probing || (!force && !state.probe_due(&self.config, now)) {
            return false;
        }
        state.probing = true;
        state.last_probe = Some(now);
        if state.state == CircuitState::Open {
            state.transition(CircuitState::HalfOpen);
        }
        true
    }

    async fn run_probe(&self) -> CircuitState {
        let mut in_flight = InFlight {
            monitor: self,
            armed: true,
        };
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout, self.data.ping()).await;
        let latency = started.elapsed();
        in_flight.armed = false;

        let mut state = self.state.lock();
        state.probing = false;
        state.last_probe_latency = Some(latency);

        match outcome {
            Ok(Ok(())) => {
                state.consecutive_failures = 0;
                state.failed_requests = 0;
                state.last_success = Some(Instant::now());
                state.last_success_at = Some(Utc::now());
                state.transition(CircuitState::Closed);
                debug!(latency_ms = latency.as_millis() as u64, "Connectivity probe succeeded");
            }
            Ok(Err(err)) => {
                state.consecutive_failures += 1;
                warn!(
                    error = %err,
                    consecutive_failures = state.consecutive_failures,
                    "Connectivity probe failed"
                );
                Self::after_probe_failure(&mut state, &self.config);
            }
            Err(_) => {
                state.consecutive_failures += 1;
                warn!(
                    timeout_ms = self.config.probe_timeout.as_millis() as u64,
                    consecutive_failures = state.consecutive_failures,
                    "Connectivity probe timed out"
                );
                Self::after_probe_failure(&mut state, &self.config);
            }
        }
        state.state
    }

    fn after_probe_failure(state: &mut MonitorState, config: &ConnectivityConfig) {
        if state.state == CircuitState::HalfOpen
            || state.consecutive_failures >= config.failure_threshold
        {
            state.transition(CircuitState::Open);
        }
    }
}

/// Clears the in-flight flag when a check is dropped before the ping returns
///
/// A cancelled check has no outcome, so a circuit it moved to `HalfOpen`
/// goes back to `Open` and stays eligible for the next check.
struct InFlight<'a> {
    monitor: &'a ConnectivityMonitor,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.monitor.state.lock();
        state.probing = false;
        if state.state == CircuitState::HalfOpen {
            state.transition(CircuitState::Open);
        }
        debug!("Connectivity check cancelled before completion");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orator_core::InMemoryDataService;

    fn monitor(data: &Arc<InMemoryDataService>) -> ConnectivityMonitor {
        ConnectivityMonitor::new(data.clone(), ConnectivityConfig::default())
    }

    #[test]
    fn test_default_config() {
        let config = ConnectivityConfig::default();
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.min_probe_spacing, Duration::from_secs(5));
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_opens_circuit() {
        let data = Arc::new(InMemoryDataService::new());
        data.set_offline(true);
        let monitor = monitor(&data);

        assert_eq!(monitor.maybe_probe().await, Some(CircuitState::Open));
        assert!(monitor.is_offline());

        let status = monitor.status();
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_success_at.is_none());
        assert!(!status.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_are_spaced_while_open() {
        let data = Arc::new(InMemoryDataService::new());
        data.set_offline(true);
        let monitor = monitor(&data);
        monitor.maybe_probe().await;
        data.set_offline(false);

        // Within the check interval nothing reaches the network
        assert_eq!(monitor.maybe_probe().await, None);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(monitor.maybe_probe().await, None);
        assert_eq!(data.ping_count(), 1);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(monitor.maybe_probe().await, Some(CircuitState::Closed));
        assert_eq!(data.ping_count(), 2);
        assert_eq!(monitor.status().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_probes_respect_min_spacing() {
        let data = Arc::new(InMemoryDataService::new());
        let monitor = monitor(&data);

        assert_eq!(monitor.maybe_probe().await, Some(CircuitState::Closed));
        assert!(!monitor.record_failure());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(monitor.record_failure());
        assert_eq!(monitor.status().failed_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_now_bypasses_interval() {
        let data = Arc::new(InMemoryDataService::new());
        data.set_offline(true);
        let monitor = monitor(&data);
        monitor.maybe_probe().await;

        data.set_offline(false);
        assert_eq!(monitor.retry_now().await, CircuitState::Closed);
        assert_eq!(data.ping_count(), 2);
        assert!(monitor.status().last_success_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_above_one_needs_consecutive_failures() {
        let data = Arc::new(InMemoryDataService::new());
        data.set_offline(true);
        let monitor = ConnectivityMonitor::new(
            data.clone(),
            ConnectivityConfig::new()
                .with_failure_threshold(2)
                .with_min_probe_spacing(Duration::ZERO),
        );

        assert_eq!(monitor.maybe_probe().await, Some(CircuitState::Closed));
        assert_eq!(monitor.maybe_probe().await, Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_while_probe_in_flight() {
        let data = Arc::new(InMemoryDataService::new());
        data.set_offline(true);
        let monitor = Arc::new(monitor(&data));
        monitor.maybe_probe().await;

        data.set_offline(false);
        data.set_latency(Duration::from_secs(1));
        let probing = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.retry_now().await })
        };
        tokio::task::yield_now().await;

        assert_eq!(monitor.state(), CircuitState::HalfOpen);
        assert!(monitor.is_offline());
        // A second probe is not started while one is in flight
        assert_eq!(monitor.retry_now().await, CircuitState::HalfOpen);

        assert_eq!(probing.await.unwrap(), CircuitState::Closed);
        assert_eq!(data.ping_count(), 2);
        assert!(monitor.status().last_probe_latency >= Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_failure() {
        let data = Arc::new(InMemoryDataService::new());
        data.set_latency(Duration::from_secs(60));
        let monitor = monitor(&data);

        assert_eq!(monitor.maybe_probe().await, Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_check_does_not_wedge_circuit() {
        let data = Arc::new(InMemoryDataService::new());
        data.set_offline(true);
        let monitor = Arc::new(monitor(&data));
        monitor.maybe_probe().await;

        data.set_offline(false);
        data.set_latency(Duration::from_secs(2));
        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), monitor.retry_now()).await;
        assert!(abandoned.is_err());
        assert_eq!(monitor.state(), CircuitState::Open);

        // A forced reconnect is not refused as "already in flight"
        data.set_latency(Duration::ZERO);
        assert_eq!(monitor.retry_now().await, CircuitState::Closed);
        assert_eq!(data.ping_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_recovers_after_cancelled_check() {
        let data = Arc::new(InMemoryDataService::new());
        data.set_offline(true);
        let monitor = Arc::new(monitor(&data));
        monitor.maybe_probe().await;

        data.set_offline(false);
        data.set_latency(Duration::from_secs(2));
        let checking = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.retry_now().await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(monitor.state(), CircuitState::HalfOpen);
        checking.abort();
        assert!(checking.await.unwrap_err().is_cancelled());
        assert_eq!(monitor.state(), CircuitState::Open);

        data.set_latency(Duration::ZERO);
        let _watchdog = monitor.spawn_watchdog();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(monitor.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_recovers_circuit() {
        let data = Arc::new(InMemoryDataService::new());
        data.set_offline(true);
        let monitor = Arc::new(monitor(&data));
        monitor.maybe_probe().await;
        let watchdog = monitor.spawn_watchdog();

        data.set_offline(false);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(monitor.state(), CircuitState::Closed);

        drop(monitor);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(watchdog.is_finished());
    }
}
