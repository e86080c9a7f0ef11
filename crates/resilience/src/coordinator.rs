//! Resilience Coordinator
//!
//! The single entry point for data reads and writes. Every read goes through:
//!
//! ```text
//! fresh cache ──hit──► Cache
//!     │ miss
//! circuit open? ──yes──► stale cache ─► fallback ─► OfflineMode
//!     │ no
//! key blocked? ──yes──► stale cache ─► Blocked
//!     │ no
//! coalescer (dedup / debounce) ─► retry with backoff ─► DataService
//!     │
//! populate cache, clear failures ──► Network
//! ```
//!
//! Writes skip the cache, fail fast with `OfflineMode` while the circuit is
//! open, and invalidate every cache entry the write may have made stale.
//! Reads still in flight when a write lands keep their answer for the callers
//! already waiting, but never store it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use orator_core::{DataService, Filter, RemoteError, Row};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, CacheStore, InvalidationPattern, TtlClass};
use crate::coalescer::{CoalesceMode, RequestCoalescer};
use crate::config::CoordinatorConfig;
use crate::error::{ResilienceError, Result};
use crate::failures::FailureTracker;
use crate::reliability::{
    retry_with_backoff, CircuitState, ConnectivityMonitor, ConnectivityStatus,
};
use crate::resource::Resource;

// ============================================================================
// Result Provenance
// ============================================================================

/// Where the data of a successful read came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Fetched from the data service by this read (or a read it joined)
    Network,
    /// Fresh cache entry
    Cache,
    /// Expired cache entry served because the network could not be used
    StaleCache,
    /// Registered fallback dataset served while offline
    Fallback,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Cache => write!(f, "cache"),
            Self::StaleCache => write!(f, "stale_cache"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Data returned by a read, tagged with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub data: T,
    pub source: DataSource,
}

impl<T> Fetched<T> {
    /// True when the data may be outdated (stale cache or fallback)
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, DataSource::StaleCache | DataSource::Fallback)
    }

    /// Transform the data, keeping the provenance
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            data: f(self.data),
            source: self.source,
        }
    }

    fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<Fetched<U>> {
        Ok(Fetched {
            data: f(self.data)?,
            source: self.source,
        })
    }
}

/// Per-read options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Override the resource's TTL class
    pub ttl_class: Option<TtlClass>,
    /// Debounce instead of fetching immediately
    pub debounce: bool,
    /// Skip the fresh-cache lookup (the result is still cached)
    pub bypass_cache: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, class: TtlClass) -> Self {
        self.ttl_class = Some(class);
        self
    }

    pub fn debounced(mut self) -> Self {
        self.debounce = true;
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Entity rows of one campaign, read as a single aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllEntities {
    pub npcs: Vec<Row>,
    pub locations: Vec<Row>,
    pub factions: Vec<Row>,
    pub items: Vec<Row>,
}

impl AllEntities {
    fn rows_mut(&mut self, resource: Resource) -> Option<&mut Vec<Row>> {
        match resource {
            Resource::Npcs => Some(&mut self.npcs),
            Resource::Locations => Some(&mut self.locations),
            Resource::Factions => Some(&mut self.factions),
            Resource::Items => Some(&mut self.items),
            _ => None,
        }
    }

    /// Total number of rows
    pub fn len(&self) -> usize {
        self.npcs.len() + self.locations.len() + self.factions.len() + self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Coordinator
// ============================================================================

type RemoteFetch = Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<Value, RemoteError>> + Send + Sync>;

struct ReadPlan {
    key: CacheKey,
    ttl_class: TtlClass,
    mode: CoalesceMode,
    bypass_cache: bool,
}

/// Cache-aware, coalescing, circuit-guarded access to the data service
///
/// Create one per process and share it (`Arc<Coordinator>`); tests create a
/// fresh instance each.
pub struct Coordinator {
    data: Arc<dyn DataService>,
    config: CoordinatorConfig,
    connectivity: Arc<ConnectivityMonitor>,
    cache: Arc<CacheStore<Value>>,
    coalescer: RequestCoalescer<Value>,
    failures: Arc<FailureTracker>,
    fallbacks: RwLock<HashMap<Resource, Vec<Row>>>,
}

impl Coordinator {
    pub fn new(data: Arc<dyn DataService>, config: CoordinatorConfig) -> Self {
        info!(
            max_retries = config.retry.max_retries,
            check_interval_ms = config.connectivity.check_interval.as_millis() as u64,
            debounce_ms = config.debounce_window.as_millis() as u64,
            "Creating resilience coordinator"
        );
        Self {
            connectivity: Arc::new(ConnectivityMonitor::new(
                Arc::clone(&data),
                config.connectivity.clone(),
            )),
            cache: Arc::new(CacheStore::new(config.ttl)),
            coalescer: RequestCoalescer::new(config.debounce_window),
            failures: Arc::new(FailureTracker::new(config.failures.clone())),
            fallbacks: RwLock::new(HashMap::new()),
            data,
            config,
        }
    }

    /// Coordinator with default configuration
    pub fn with_defaults(data: Arc<dyn DataService>) -> Self {
        Self::new(data, CoordinatorConfig::default())
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The connectivity monitor (e.g. to spawn its watchdog)
    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// Read-only connectivity snapshot
    pub fn connectivity_status(&self) -> ConnectivityStatus {
        self.connectivity.status()
    }

    /// Manual reconnect
    ///
    /// Forces a probe. When the service is reachable again the cache and the
    /// failure records are dropped so the next reads refetch; otherwise the
    /// cache is kept for stale fallbacks.
    pub async fn retry_now(&self) -> CircuitState {
        let state = self.connectivity.retry_now().await;
        if state == CircuitState::Closed {
            self.cache.clear();
            self.failures.clear();
            info!("Reconnected, cache cleared");
        }
        state
    }

    /// Drop every cached entry
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop cached entries matching a pattern; returns the number removed
    ///
    /// Fetches already in flight for matching keys neither populate the
    /// cache nor take new callers.
    pub fn invalidate(&self, pattern: impl Into<InvalidationPattern>) -> usize {
        let pattern = pattern.into();
        let removed = self.cache.invalidate(&pattern);
        self.coalescer.detach(&pattern);
        removed
    }

    /// Register the dataset served for `resource` while offline
    pub fn register_fallback(&self, resource: Resource, rows: Vec<Row>) {
        self.fallbacks.write().insert(resource, rows);
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Rows of a resource, optionally scoped to a campaign
    pub async fn list(&self, resource: Resource, campaign: Option<&str>) -> Result<Fetched<Vec<Row>>> {
        self.list_with(resource, campaign, ReadOptions::default())
            .await
    }

    /// [`list`](Self::list) with explicit read options
    #[instrument(level = "debug", skip(self))]
    pub async fn list_with(
        &self,
        resource: Resource,
        campaign: Option<&str>,
        options: ReadOptions,
    ) -> Result<Fetched<Vec<Row>>> {
        let filter = campaign_filter(resource, campaign);
        let key = CacheKey::list(resource, campaign);
        self.read_rows(resource, key, filter, options).await
    }

    /// Rows of a resource matching `filter`, cached under `discriminator`
    ///
    /// The discriminator must identify the filter (e.g. an NPC id for "that
    /// NPC's recent interactions").
    #[instrument(level = "debug", skip(self, filter))]
    pub async fn list_where(
        &self,
        resource: Resource,
        campaign: Option<&str>,
        discriminator: &str,
        filter: Filter,
        options: ReadOptions,
    ) -> Result<Fetched<Vec<Row>>> {
        let mut scoped = campaign_filter(resource, campaign);
        scoped.eq.extend(filter.eq);
        scoped.order_by = filter.order_by;
        scoped.limit = filter.limit;

        let key = CacheKey::new(resource.table(), campaign, Some(discriminator));
        self.read_rows(resource, key, scoped, options).await
    }

    /// A single row by id
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, resource: Resource, id: &str) -> Result<Fetched<Option<Row>>> {
        let filter = Filter::new().eq("id", id).limit(1);
        let key = CacheKey::item(resource, id);
        let rows = self
            .read_rows(resource, key, filter, ReadOptions::default())
            .await?;
        Ok(rows.map(|rows| rows.into_iter().next()))
    }

    /// Entity rows of a campaign in one cached read
    #[instrument(level = "debug", skip(self))]
    pub async fn all_entities(&self, campaign: &str) -> Result<Fetched<AllEntities>> {
        let data = Arc::clone(&self.data);
        let campaign_owned = campaign.to_string();
        let fetch: RemoteFetch = Arc::new(move || {
            let data = Arc::clone(&data);
            let campaign = campaign_owned.clone();
            async move {
                let mut all = AllEntities::default();
                for resource in Resource::ENTITIES {
                    let rows = data
                        .select(resource.table(), &campaign_filter(resource, Some(&campaign)))
                        .await?;
                    if let Some(slot) = all.rows_mut(resource) {
                        *slot = rows;
                    }
                }
                serde_json::to_value(all).map_err(|e| RemoteError::new(e.to_string()))
            }
            .boxed()
        });

        let plan = ReadPlan {
            key: CacheKey::all_entities(campaign),
            ttl_class: TtlClass::Standard,
            mode: CoalesceMode::Dedup,
            bypass_cache: false,
        };

        let fallback = || {
            let fallbacks = self.fallbacks.read();
            let mut all = AllEntities::default();
            let mut found = false;
            for resource in Resource::ENTITIES {
                if let Some(rows) = fallbacks.get(&resource) {
                    found = true;
                    let filter = campaign_filter(resource, Some(campaign));
                    if let Some(slot) = all.rows_mut(resource) {
                        *slot = rows.iter().filter(|r| filter.matches(r)).cloned().collect();
                    }
                }
            }
            found.then(|| serde_json::to_value(all).ok()).flatten()
        };

        let fetched = self.read(plan, fetch, fallback).await?;
        fetched.try_map(|value| Ok(serde_json::from_value(value)?))
    }

    /// [`list`](Self::list) decoding rows into `T`
    pub async fn list_as<T: DeserializeOwned>(
        &self,
        resource: Resource,
        campaign: Option<&str>,
    ) -> Result<Fetched<Vec<T>>> {
        self.list(resource, campaign).await?.try_map(decode_rows)
    }

    /// [`get`](Self::get) decoding the row into `T`
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        resource: Resource,
        id: &str,
    ) -> Result<Fetched<Option<T>>> {
        self.get(resource, id)
            .await?
            .try_map(|row| row.map(decode_row).transpose())
    }

    async fn read_rows(
        &self,
        resource: Resource,
        key: CacheKey,
        filter: Filter,
        options: ReadOptions,
    ) -> Result<Fetched<Vec<Row>>> {
        let plan = ReadPlan {
            key,
            ttl_class: options.ttl_class.unwrap_or_else(|| resource.default_ttl()),
            mode: if options.debounce {
                CoalesceMode::Debounce
            } else {
                CoalesceMode::Dedup
            },
            bypass_cache: options.bypass_cache,
        };

        let fallback = || {
            self.fallbacks.read().get(&resource).map(|rows| {
                let mut matching: Vec<Row> =
                    rows.iter().filter(|r| filter.matches(r)).cloned().collect();
                if let Some(limit) = filter.limit {
                    matching.truncate(limit);
                }
                Value::Array(matching)
            })
        };

        let fetch = self.select_fetch(resource, filter.clone());
        let fetched = self.read(plan, fetch, fallback).await?;
        Ok(fetched.map(into_rows))
    }

    fn select_fetch(&self, resource: Resource, filter: Filter) -> RemoteFetch {
        let data = Arc::clone(&self.data);
        Arc::new(move || {
            let data = Arc::clone(&data);
            let filter = filter.clone();
            async move { data.select(resource.table(), &filter).await.map(Value::Array) }.boxed()
        })
    }

    async fn read<FB>(&self, plan: ReadPlan, fetch: RemoteFetch, fallback: FB) -> Result<Fetched<Value>>
    where
        FB: FnOnce() -> Option<Value>,
    {
        let key = plan.key;

        if !plan.bypass_cache {
            if let Some(data) = self.cache.get(&key) {
                debug!(key = %key, "Cache hit");
                return Ok(Fetched {
                    data,
                    source: DataSource::Cache,
                });
            }
        }

        if self.connectivity.is_offline() {
            return self.degraded(&key, ResilienceError::OfflineMode, fallback);
        }
        if let Err(blocked) = self.failures.check(&key) {
            return self.degraded(&key, blocked, fallback);
        }

        let policy = self.config.retry.clone();
        let connectivity = Arc::clone(&self.connectivity);
        let cache = Arc::clone(&self.cache);
        let failures = Arc::clone(&self.failures);
        let owned_key = key.clone();
        let ttl_class = plan.ttl_class;

        let shared = self.coalescer.run(&key, plan.mode, move || async move {
            let generation = cache.generation();
            let result = retry_with_backoff(
                &policy,
                || connectivity.is_offline(),
                || {
                    let attempt = fetch();
                    let connectivity = Arc::clone(&connectivity);
                    async move {
                        match attempt.await {
                            Ok(value) => {
                                connectivity.record_success();
                                Ok(value)
                            }
                            Err(err) => {
                                connectivity.request_failed();
                                Err(ResilienceError::Remote(err))
                            }
                        }
                    }
                },
            )
            .await;

            match &result {
                Ok(value) => {
                    failures.record_success(&owned_key);
                    // A write that landed while this fetch ran wins over its data
                    cache.insert_since(owned_key.clone(), value.clone(), ttl_class, generation);
                }
                Err(err) if err.is_retryable() => {
                    failures.record_failure(&owned_key);
                }
                Err(_) => {}
            }
            result
        });

        match shared.await {
            Ok(data) => Ok(Fetched {
                data,
                source: DataSource::Network,
            }),
            Err(err @ (ResilienceError::OfflineMode | ResilienceError::Blocked { .. })) => {
                self.degraded(&key, err, fallback)
            }
            Err(err) => {
                warn!(key = %key, kind = err.kind(), error = %err, "Read failed");
                Err(err)
            }
        }
    }

    /// Answer a short-circuited read from stale cache or fallback data
    fn degraded<FB>(&self, key: &CacheKey, err: ResilienceError, fallback: FB) -> Result<Fetched<Value>>
    where
        FB: FnOnce() -> Option<Value>,
    {
        if let Some(data) = self.cache.get_stale(key) {
            debug!(key = %key, reason = err.kind(), "Serving stale cache");
            return Ok(Fetched {
                data,
                source: DataSource::StaleCache,
            });
        }
        if err == ResilienceError::OfflineMode {
            if let Some(data) = fallback() {
                debug!(key = %key, "Serving fallback data");
                return Ok(Fetched {
                    data,
                    source: DataSource::Fallback,
                });
            }
        }
        Err(err)
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Insert a row; the campaign column is filled in when missing
    #[instrument(level = "debug", skip(self, row))]
    pub async fn create(&self, resource: Resource, campaign: Option<&str>, mut row: Row) -> Result<Row> {
        if let (Some(column), Some(campaign), Some(object)) =
            (resource.campaign_column(), campaign, row.as_object_mut())
        {
            object
                .entry(column)
                .or_insert_with(|| Value::String(campaign.to_string()));
        }

        let data = Arc::clone(&self.data);
        let rows = self
            .write(resource, campaign, move || {
                let data = Arc::clone(&data);
                let row = row.clone();
                async move { data.insert(resource.table(), row).await }.boxed()
            })
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| ResilienceError::unknown(format!("insert into {resource} returned no row")))
    }

    /// Merge `patch` into the row with `id`; `None` if no such row
    #[instrument(level = "debug", skip(self, patch))]
    pub async fn update(
        &self,
        resource: Resource,
        campaign: Option<&str>,
        id: &str,
        patch: Row,
    ) -> Result<Option<Row>> {
        let data = Arc::clone(&self.data);
        let filter = Filter::new().eq("id", id);
        let rows = self
            .write(resource, campaign, move || {
                let data = Arc::clone(&data);
                let filter = filter.clone();
                let patch = patch.clone();
                async move { data.update(resource.table(), &filter, patch).await }.boxed()
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Delete the row with `id`; returns whether a row was removed
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, resource: Resource, campaign: Option<&str>, id: &str) -> Result<bool> {
        let data = Arc::clone(&self.data);
        let filter = Filter::new().eq("id", id);
        let rows = self
            .write(resource, campaign, move || {
                let data = Arc::clone(&data);
                let filter = filter.clone();
                async move { data.delete(resource.table(), &filter).await }.boxed()
            })
            .await?;
        Ok(!rows.is_empty())
    }

    /// [`create`](Self::create) from and into a typed value
    pub async fn create_as<T>(&self, resource: Resource, campaign: Option<&str>, value: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let row = serde_json::to_value(value)?;
        decode_row(self.create(resource, campaign, row).await?)
    }

    /// [`update`](Self::update) with a typed patch and result
    pub async fn update_as<P, T>(
        &self,
        resource: Resource,
        campaign: Option<&str>,
        id: &str,
        patch: &P,
    ) -> Result<Option<T>>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let patch = serde_json::to_value(patch)?;
        self.update(resource, campaign, id, patch)
            .await?
            .map(decode_row)
            .transpose()
    }

    async fn write<F>(&self, resource: Resource, campaign: Option<&str>, op: F) -> Result<Vec<Row>>
    where
        F: Fn() -> BoxFuture<'static, std::result::Result<Vec<Row>, RemoteError>>,
    {
        let connectivity = &self.connectivity;
        let result = retry_with_backoff(
            &self.config.retry,
            || connectivity.is_offline(),
            || {
                let attempt = op();
                async move {
                    match attempt.await {
                        Ok(rows) => {
                            connectivity.record_success();
                            Ok(rows)
                        }
                        Err(err) => {
                            connectivity.request_failed();
                            Err(ResilienceError::Remote(err))
                        }
                    }
                }
            },
        )
        .await;

        match result {
            Ok(rows) => {
                let removed: usize = InvalidationPattern::for_write(resource, campaign)
                    .into_iter()
                    .map(|pattern| self.invalidate(pattern))
                    .sum();
                debug!(%resource, ?campaign, removed, "Write invalidated cache entries");
                Ok(rows)
            }
            Err(err) => {
                warn!(%resource, kind = err.kind(), error = %err, "Write failed");
                Err(err)
            }
        }
    }
}

fn campaign_filter(resource: Resource, campaign: Option<&str>) -> Filter {
    match (resource.campaign_column(), campaign) {
        (Some(column), Some(campaign)) => Filter::new().eq(column, campaign),
        _ => Filter::new(),
    }
}

fn into_rows(value: Value) -> Vec<Row> {
    match value {
        Value::Array(rows) => rows,
        Value::Null => vec![],
        other => vec![other],
    }
}

fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(row)?)
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter().map(decode_row).collect()
}
