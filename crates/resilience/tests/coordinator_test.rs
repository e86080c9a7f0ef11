//! Integration tests for the Coordinator against the in-memory data service
//!
//! Run with: cargo test -p orator-resilience --test coordinator_test
//!
//! All tests run on paused tokio time, so backoff delays, TTLs, debounce
//! windows and probe intervals elapse instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orator_core::{DataService, Filter, InMemoryDataService, RemoteError, Row};
use orator_resilience::prelude::*;
use orator_resilience::{FailureConfig, TtlConfig};
use serde_json::json;

fn campaign_data() -> Arc<InMemoryDataService> {
    Arc::new(
        InMemoryDataService::new()
            .with_rows(
                "npcs",
                vec![
                    json!({"id": "n1", "campaign_id": "c1", "name": "Vex"}),
                    json!({"id": "n2", "campaign_id": "c1", "name": "Orla"}),
                    json!({"id": "n3", "campaign_id": "c2", "name": "Brann"}),
                ],
            )
            .with_rows(
                "locations",
                vec![json!({"id": "l1", "campaign_id": "c1", "name": "Saltmarsh"})],
            ),
    )
}

fn no_retry() -> CoordinatorConfig {
    CoordinatorConfig::default().with_retry(RetryPolicy::no_retry())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn read_within_ttl_is_served_from_cache() {
    let data = campaign_data();
    let coordinator = Coordinator::with_defaults(data.clone());

    let first = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    tokio::time::advance(Duration::from_secs(4 * 60)).await;
    let second = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();

    assert_eq!(first.source, DataSource::Network);
    assert_eq!(second.source, DataSource::Cache);
    assert_eq!(first.data, second.data);
    assert_eq!(data.select_count(), 1);

    // Past the standard TTL the next read refetches
    tokio::time::advance(Duration::from_secs(2 * 60)).await;
    let third = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(third.source, DataSource::Network);
    assert_eq!(data.select_count(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn concurrent_reads_trigger_one_fetch() {
    let data = campaign_data();
    data.set_latency(Duration::from_millis(200));
    let coordinator = Coordinator::with_defaults(data.clone());

    let reads = (0..10).map(|_| coordinator.list(Resource::Npcs, Some("c1")));
    let results = futures::future::join_all(reads).await;

    assert_eq!(data.select_count(), 1);
    for result in results {
        let fetched = result.unwrap();
        assert_eq!(fetched.source, DataSource::Network);
        assert_eq!(fetched.data.len(), 2);
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn debounced_reads_fan_out_one_result() {
    let data = campaign_data();
    let coordinator = Coordinator::with_defaults(data.clone());
    let options = ReadOptions::new().debounced();

    let (a, b, c) = tokio::join!(
        coordinator.list_with(Resource::Npcs, Some("c1"), options),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            coordinator.list_with(Resource::Npcs, Some("c1"), options).await
        },
        async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            coordinator.list_with(Resource::Npcs, Some("c1"), options).await
        },
    );

    assert_eq!(data.select_count(), 1);
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a.source, DataSource::Network);
    assert_eq!(a, b);
    assert_eq!(b, c);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn write_invalidates_matching_entries() {
    let data = campaign_data();
    let coordinator = Coordinator::with_defaults(data.clone());

    coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    coordinator.list(Resource::Npcs, Some("c2")).await.unwrap();
    coordinator.list(Resource::Locations, Some("c1")).await.unwrap();
    coordinator.get(Resource::Npcs, "n1").await.unwrap();
    assert_eq!(data.select_count(), 4);

    coordinator
        .update(Resource::Npcs, Some("c1"), "n1", json!({"name": "Vex the Grey"}))
        .await
        .unwrap();

    let c1 = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(c1.source, DataSource::Network);
    assert!(c1.data.iter().any(|npc| npc["name"] == json!("Vex the Grey")));

    let by_id = coordinator.get(Resource::Npcs, "n1").await.unwrap();
    assert_eq!(by_id.source, DataSource::Network);

    // Other campaigns and other resources stay cached
    let c2 = coordinator.list(Resource::Npcs, Some("c2")).await.unwrap();
    assert_eq!(c2.source, DataSource::Cache);
    let locations = coordinator.list(Resource::Locations, Some("c1")).await.unwrap();
    assert_eq!(locations.source, DataSource::Cache);

    assert_eq!(data.select_count(), 6);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn circuit_opens_on_failed_probe_and_recovers_after_interval() {
    let data = campaign_data();
    let coordinator = Coordinator::with_defaults(data.clone());
    let monitor = coordinator.connectivity();

    data.set_offline(true);
    assert_eq!(monitor.maybe_probe().await, Some(CircuitState::Open));

    let status = coordinator.connectivity_status();
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.consecutive_failures, 1);
    assert!(!status.is_online());

    // Further probes are suppressed until the check interval elapses
    data.set_offline(false);
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(monitor.maybe_probe().await, None);
    assert!(monitor.is_offline());

    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(monitor.maybe_probe().await, Some(CircuitState::Closed));
    assert_eq!(coordinator.connectivity_status().consecutive_failures, 0);
    assert_eq!(data.ping_count(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn watchdog_restores_connectivity() {
    let data = campaign_data();
    let coordinator = Coordinator::with_defaults(data.clone());
    let watchdog = coordinator.connectivity().spawn_watchdog();

    data.set_offline(true);
    coordinator.connectivity().maybe_probe().await;
    assert!(coordinator.connectivity().is_offline());

    data.set_offline(false);
    tokio::time::sleep(Duration::from_secs(36)).await;
    assert_eq!(coordinator.connectivity().state(), CircuitState::Closed);

    watchdog.abort();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn offline_reads_prefer_stale_cache_then_fallback() {
    let data = campaign_data();
    let coordinator = Coordinator::with_defaults(data.clone());
    coordinator.register_fallback(
        Resource::Npcs,
        vec![
            json!({"id": "mock-1", "campaign_id": "c1", "name": "Mock Innkeeper"}),
            json!({"id": "mock-2", "campaign_id": "c9", "name": "Elsewhere"}),
        ],
    );

    coordinator.list(Resource::Locations, Some("c1")).await.unwrap();
    tokio::time::advance(Duration::from_secs(10 * 60)).await;

    data.set_offline(true);
    coordinator.connectivity().maybe_probe().await;
    let selects_before = data.select_count();

    let locations = coordinator.list(Resource::Locations, Some("c1")).await.unwrap();
    assert_eq!(locations.source, DataSource::StaleCache);
    assert!(locations.is_degraded());
    assert_eq!(locations.data.len(), 1);

    let npcs = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(npcs.source, DataSource::Fallback);
    assert_eq!(npcs.data, vec![json!({"id": "mock-1", "campaign_id": "c1", "name": "Mock Innkeeper"})]);

    let factions = coordinator.list(Resource::Factions, Some("c1")).await;
    assert_eq!(factions.unwrap_err(), ResilienceError::OfflineMode);

    // No network attempt while the circuit is open
    assert_eq!(data.select_count(), selects_before);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn failing_request_opens_circuit_and_stops_retrying() {
    let data = campaign_data();
    let coordinator = Coordinator::with_defaults(data.clone());
    data.set_offline(true);

    let result = coordinator.list(Resource::Npcs, Some("c1")).await;

    assert_eq!(result.unwrap_err(), ResilienceError::OfflineMode);
    assert_eq!(data.select_count(), 1);
    assert_eq!(coordinator.connectivity().state(), CircuitState::Open);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn attempts_time_out() {
    let data = campaign_data();
    data.set_latency(Duration::from_secs(20));
    let coordinator = Coordinator::new(
        data.clone(),
        CoordinatorConfig::default().with_retry(
            RetryPolicy::no_retry().with_timeout(Some(Duration::from_secs(1))),
        ),
    );

    let err = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap_err();
    assert_eq!(
        err,
        ResilienceError::Timeout {
            limit: Duration::from_secs(1)
        }
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn repeatedly_failing_key_is_blocked_until_cooldown() {
    let data = campaign_data();
    let coordinator = Coordinator::new(
        data.clone(),
        no_retry().with_failures(FailureConfig::default().with_cooldown(Duration::from_secs(30))),
    );

    // Prime the cache, then let it expire
    coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    tokio::time::advance(Duration::from_secs(6 * 60)).await;

    data.fail_next(4, RemoteError::new("upstream exploded").with_code("500"));
    for _ in 0..4 {
        let err = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap_err();
        assert!(matches!(err, ResilienceError::Remote(_)));
    }
    assert_eq!(data.select_count(), 5);

    // Blocked: served from the expired entry without touching the network
    let blocked = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(blocked.source, DataSource::StaleCache);
    assert_eq!(data.select_count(), 5);

    // A key with no cached data is rejected outright
    let key = CacheKey::list(Resource::Npcs, Some("c1"));
    coordinator.invalidate(key);
    let err = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap_err();
    assert!(matches!(err, ResilienceError::Blocked { .. }));

    // Other keys are unaffected
    let other = coordinator.list(Resource::Npcs, Some("c2")).await.unwrap();
    assert_eq!(other.source, DataSource::Network);

    tokio::time::advance(Duration::from_secs(30)).await;
    let recovered = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(recovered.source, DataSource::Network);
    assert_eq!(recovered.data.len(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn retry_now_reconnects_and_drops_cache() {
    let data = campaign_data();
    let coordinator = Coordinator::with_defaults(data.clone());
    coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();

    data.set_offline(true);
    assert_eq!(coordinator.retry_now().await, CircuitState::Open);
    // Still offline, so the cache is kept for fallbacks
    let cached = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(cached.source, DataSource::Cache);

    data.set_offline(false);
    assert_eq!(coordinator.retry_now().await, CircuitState::Closed);
    let fresh = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(fresh.source, DataSource::Network);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn all_entities_reads_every_entity_table() {
    let data = campaign_data();
    let coordinator = Coordinator::with_defaults(data.clone());

    let all = coordinator.all_entities("c1").await.unwrap();
    assert_eq!(all.source, DataSource::Network);
    assert_eq!(all.data.npcs.len(), 2);
    assert_eq!(all.data.locations.len(), 1);
    assert!(all.data.factions.is_empty());
    assert_eq!(data.select_count(), 4);

    let again = coordinator.all_entities("c1").await.unwrap();
    assert_eq!(again.source, DataSource::Cache);
    assert_eq!(data.select_count(), 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn ttl_classes_follow_resource() {
    let data = campaign_data();
    data.seed("campaigns", vec![json!({"id": "c1", "name": "Curse of the Tide"})]);
    data.seed(
        "npc_interactions",
        vec![json!({"id": "i1", "campaign_id": "c1", "npc_id": "n1"})],
    );
    let coordinator = Coordinator::new(data.clone(), CoordinatorConfig::default().with_ttl(TtlConfig::default()));

    coordinator.list(Resource::Campaigns, None).await.unwrap();
    coordinator.list(Resource::NpcInteractions, Some("c1")).await.unwrap();
    tokio::time::advance(Duration::from_secs(60)).await;

    let campaigns = coordinator.list(Resource::Campaigns, None).await.unwrap();
    let interactions = coordinator.list(Resource::NpcInteractions, Some("c1")).await.unwrap();
    assert_eq!(campaigns.source, DataSource::Cache);
    assert_eq!(interactions.source, DataSource::Network);
}

/// Takes its select snapshot immediately but answers `delay` later
struct LaggingReads {
    inner: Arc<InMemoryDataService>,
    delay: Duration,
}

#[async_trait]
impl DataService for LaggingReads {
    async fn select(&self, table: &str, filter: &Filter) -> std::result::Result<Vec<Row>, RemoteError> {
        let snapshot = self.inner.select(table, filter).await;
        tokio::time::sleep(self.delay).await;
        snapshot
    }

    async fn insert(&self, table: &str, row: Row) -> std::result::Result<Vec<Row>, RemoteError> {
        self.inner.insert(table, row).await
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Row,
    ) -> std::result::Result<Vec<Row>, RemoteError> {
        self.inner.update(table, filter, patch).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> std::result::Result<Vec<Row>, RemoteError> {
        self.inner.delete(table, filter).await
    }

    async fn ping(&self) -> std::result::Result<(), RemoteError> {
        self.inner.ping().await
    }
}

fn lagging(data: &Arc<InMemoryDataService>) -> Arc<Coordinator> {
    let lagging = Arc::new(LaggingReads {
        inner: Arc::clone(data),
        delay: Duration::from_secs(1),
    });
    Arc::new(Coordinator::new(lagging, no_retry()))
}

#[test_log::test(tokio::test(start_paused = true))]
async fn read_started_before_a_write_does_not_cache_old_rows() {
    let data = campaign_data();
    let coordinator = lagging(&data);

    let early = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.list(Resource::Npcs, Some("c1")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    coordinator
        .create(Resource::Npcs, Some("c1"), json!({"name": "Brann"}))
        .await
        .unwrap();

    // The early caller still gets the rows it asked for
    let early = early.await.unwrap().unwrap();
    assert_eq!(early.source, DataSource::Network);
    assert_eq!(early.data.len(), 2);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let after = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(after.source, DataSource::Network);
    assert_eq!(after.data.len(), 3);
    assert_eq!(data.select_count(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn read_after_a_write_does_not_join_an_older_fetch() {
    let data = campaign_data();
    let coordinator = lagging(&data);

    let early = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.list(Resource::Npcs, Some("c1")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    coordinator
        .create(Resource::Npcs, Some("c1"), json!({"name": "Brann"}))
        .await
        .unwrap();

    let late = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(late.source, DataSource::Network);
    assert_eq!(late.data.len(), 3);
    assert_eq!(early.await.unwrap().unwrap().data.len(), 2);

    // Only the fetch that started after the write filled the cache
    let cached = coordinator.list(Resource::Npcs, Some("c1")).await.unwrap();
    assert_eq!(cached.source, DataSource::Cache);
    assert_eq!(cached.data.len(), 3);
    assert_eq!(data.select_count(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn ids_differing_only_in_case_are_cached_apart() {
    let data = Arc::new(InMemoryDataService::new().with_rows(
        "npcs",
        vec![
            json!({"id": "AbC", "campaign_id": "c1", "name": "Upper"}),
            json!({"id": "abc", "campaign_id": "c1", "name": "Lower"}),
        ],
    ));
    let coordinator = Coordinator::with_defaults(data.clone());

    let upper = coordinator.get(Resource::Npcs, "AbC").await.unwrap();
    let lower = coordinator.get(Resource::Npcs, "abc").await.unwrap();

    assert_eq!(upper.data.unwrap()["name"], json!("Upper"));
    assert_eq!(lower.source, DataSource::Network);
    assert_eq!(lower.data.unwrap()["name"], json!("Lower"));
    assert_eq!(data.select_count(), 2);
}
