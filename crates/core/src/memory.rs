//! In-memory implementation of DataService for tests and demos

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::data::{DataService, Filter, Row};
use crate::error::RemoteError;

/// In-memory implementation of [`DataService`]
///
/// Stores rows per table and supports failure injection so callers can
/// exercise retry, circuit-breaker and fallback paths without a network.
///
/// # Example
///
/// ```
/// use orator_core::memory::InMemoryDataService;
/// use serde_json::json;
///
/// let data = InMemoryDataService::new()
///     .with_rows("npcs", vec![json!({"id": "n1", "campaign_id": "c1", "name": "Vex"})]);
/// assert_eq!(data.rows("npcs").len(), 1);
/// ```
pub struct InMemoryDataService {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    offline: AtomicBool,
    queued_failures: Mutex<VecDeque<RemoteError>>,
    latency: RwLock<Duration>,
    next_id: AtomicU64,
    select_calls: AtomicUsize,
    write_calls: AtomicUsize,
    ping_calls: AtomicUsize,
}

impl Default for InMemoryDataService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDataService {
    /// Create an empty service
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            queued_failures: Mutex::new(VecDeque::new()),
            latency: RwLock::new(Duration::ZERO),
            next_id: AtomicU64::new(1),
            select_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
            ping_calls: AtomicUsize::new(0),
        }
    }

    /// Seed a table (builder form)
    pub fn with_rows(self, table: &str, rows: Vec<Row>) -> Self {
        self.seed(table, rows);
        self
    }

    /// Append rows to a table
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Simulate a full outage: every call, including ping, fails
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Make the next `count` data calls fail with `error` (ping is unaffected)
    pub fn fail_next(&self, count: usize, error: RemoteError) {
        let mut queued = self.queued_failures.lock();
        for _ in 0..count {
            queued.push_back(error.clone());
        }
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Number of select calls received
    pub fn select_count(&self) -> usize {
        self.select_calls.load(AtomicOrdering::SeqCst)
    }

    /// Number of insert/update/delete calls received
    pub fn write_count(&self) -> usize {
        self.write_calls.load(AtomicOrdering::SeqCst)
    }

    /// Number of ping calls received
    pub fn ping_count(&self) -> usize {
        self.ping_calls.load(AtomicOrdering::SeqCst)
    }

    async fn simulate_network(&self) -> Result<(), RemoteError> {
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(RemoteError::new("network unreachable").with_code("OFFLINE"));
        }
        Ok(())
    }

    async fn simulate_call(&self) -> Result<(), RemoteError> {
        self.simulate_network().await?;
        if let Some(error) = self.queued_failures.lock().pop_front() {
            return Err(error);
        }
        Ok(())
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl DataService for InMemoryDataService {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, RemoteError> {
        self.select_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.simulate_call().await?;

        let mut rows: Vec<Row> = self
            .tables
            .read()
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &filter.order_by {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Vec<Row>, RemoteError> {
        self.write_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.simulate_call().await?;

        let Some(object) = row.as_object_mut() else {
            return Err(RemoteError::new("row must be a JSON object").with_code("22P02"));
        };
        if !object.contains_key("id") {
            let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
            object.insert("id".into(), Value::String(format!("{table}-{id}")));
        }

        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(vec![row])
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Row,
    ) -> Result<Vec<Row>, RemoteError> {
        self.write_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.simulate_call().await?;

        let Some(patch) = patch.as_object() else {
            return Err(RemoteError::new("patch must be a JSON object").with_code("22P02"));
        };

        let mut tables = self.tables.write();
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                if let Some(object) = row.as_object_mut() {
                    for (column, value) in patch {
                        object.insert(column.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, RemoteError> {
        self.write_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.simulate_call().await?;

        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(table) else {
            return Ok(vec![]);
        };
        let (removed, kept): (Vec<Row>, Vec<Row>) =
            rows.drain(..).partition(|r| filter.matches(r));
        *rows = kept;
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.ping_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.simulate_network().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn npcs() -> InMemoryDataService {
        InMemoryDataService::new().with_rows(
            "npcs",
            vec![
                json!({"id": "n1", "campaign_id": "c1", "name": "Vex", "rank": 2}),
                json!({"id": "n2", "campaign_id": "c1", "name": "Orla", "rank": 1}),
                json!({"id": "n3", "campaign_id": "c2", "name": "Brann", "rank": 3}),
            ],
        )
    }

    #[tokio::test]
    async fn test_select_filters_orders_and_limits() {
        let data = npcs();
        let filter = Filter::new().eq("campaign_id", "c1").order_asc("rank").limit(1);

        let rows = data.select("npcs", &filter).await.unwrap();
        assert_eq!(rows, vec![json!({"id": "n2", "campaign_id": "c1", "name": "Orla", "rank": 1})]);
        assert_eq!(data.select_count(), 1);
    }

    #[tokio::test]
    async fn test_insert_assigns_id() {
        let data = InMemoryDataService::new();
        let rows = data
            .insert("items", json!({"name": "Lantern"}))
            .await
            .unwrap();

        assert_eq!(rows[0]["id"], json!("items-1"));
        assert_eq!(data.rows("items").len(), 1);
        assert_eq!(data.write_count(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let data = npcs();
        let updated = data
            .update("npcs", &Filter::new().eq("id", "n1"), json!({"name": "Vex the Bold"}))
            .await
            .unwrap();

        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["name"], json!("Vex the Bold"));
        assert_eq!(updated[0]["rank"], json!(2));
    }

    #[tokio::test]
    async fn test_delete_removes_matching_rows() {
        let data = npcs();
        let removed = data
            .delete("npcs", &Filter::new().eq("campaign_id", "c1"))
            .await
            .unwrap();

        assert_eq!(removed.len(), 2);
        assert_eq!(data.rows("npcs").len(), 1);
    }

    #[tokio::test]
    async fn test_queued_failures_are_consumed_in_order() {
        let data = npcs();
        data.fail_next(1, RemoteError::new("boom").with_code("500"));

        let first = data.select("npcs", &Filter::new()).await;
        assert_eq!(first.unwrap_err().code.as_deref(), Some("500"));

        assert!(data.select("npcs", &Filter::new()).await.is_ok());
        // Ping never consumes injected data failures
        assert!(data.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_fails_everything() {
        let data = npcs();
        data.set_offline(true);

        assert!(data.ping().await.is_err());
        assert!(data.select("npcs", &Filter::new()).await.is_err());

        data.set_offline(false);
        assert!(data.ping().await.is_ok());
        assert_eq!(data.ping_count(), 2);
    }
}
