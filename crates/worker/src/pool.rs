//! Keyed worker pool with capacity-bounded eviction
//!
//! Maps a logical identity (an NPC id, a capability name) to a live worker,
//! creating it lazily through a [`WorkerFactory`]. When the pool is full the
//! entry chosen by the [`EvictionPolicy`] is dropped to make room.
//!
//! Initialization of one key runs once at a time: concurrent acquires of a
//! missing key wait for the first one and share its worker.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Which entry to drop when the pool is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// First inserted entry, regardless of use (FIFO)
    #[default]
    OldestInserted,
    /// Entry that was acquired least recently
    LeastRecentlyUsed,
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oldest_inserted" | "fifo" => Ok(Self::OldestInserted),
            "least_recently_used" | "lru" => Ok(Self::LeastRecentlyUsed),
            other => Err(format!("unknown eviction policy '{other}'")),
        }
    }
}

/// Pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    /// The factory failed to build the worker; nothing was inserted
    #[error("failed to initialize worker '{key}': {source}")]
    Initialization {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Builds workers for a pool
#[async_trait]
pub trait WorkerFactory<K>: Send + Sync {
    type Worker: Send + Sync;

    /// One-time asynchronous initialization of the worker for `key`
    async fn create(&self, key: &K) -> anyhow::Result<Self::Worker>;
}

struct PoolEntry<W> {
    worker: Arc<W>,
    inserted: u64,
    last_used: u64,
}

struct PoolState<K, W> {
    entries: HashMap<K, PoolEntry<W>>,
    clock: u64,
}

impl<K, W> PoolState<K, W> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

type Gates<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

/// Holds a key's initialization gate; the gate is dropped from the map by
/// its last holder
struct GateHandle<'a, K: Eq + Hash> {
    gates: &'a Gates<K>,
    key: K,
    gate: Arc<AsyncMutex<()>>,
}

impl<K: Eq + Hash> Drop for GateHandle<'_, K> {
    fn drop(&mut self) {
        let mut gates = self.gates.lock();
        let last = Arc::strong_count(&self.gate) == 2
            && gates
                .get(&self.key)
                .is_some_and(|gate| Arc::ptr_eq(gate, &self.gate));
        if last {
            gates.remove(&self.key);
        }
    }
}

/// Capacity-bounded map from key to lazily created worker
///
/// `active_count()` never exceeds `capacity()`: the eviction and the
/// insertion of a new worker happen under the same lock.
pub struct WorkerPool<K, F>
where
    F: WorkerFactory<K>,
{
    factory: F,
    capacity: usize,
    policy: EvictionPolicy,
    state: Mutex<PoolState<K, F::Worker>>,
    initializing: Gates<K>,
}

impl<K, F> WorkerPool<K, F>
where
    K: Eq + Hash + Clone + Display + Send + Sync,
    F: WorkerFactory<K>,
{
    /// Create a pool holding at most `capacity` workers (minimum 1)
    pub fn new(factory: F, capacity: usize) -> Self {
        Self {
            factory,
            capacity: capacity.max(1),
            policy: EvictionPolicy::default(),
            state: Mutex::new(PoolState {
                entries: HashMap::new(),
                clock: 0,
            }),
            initializing: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// The worker for `key`, creating it if needed
    ///
    /// Initialization runs without holding the pool lock, but only one
    /// initialization per key runs at a time. Callers queued behind it get
    /// its worker; if it failed, the next caller tries again.
    pub async fn acquire(&self, key: &K) -> Result<Arc<F::Worker>, PoolError> {
        if let Some(worker) = self.touch(key) {
            return Ok(worker);
        }

        let handle = self.gate(key);
        let _turn = handle.gate.lock().await;
        if let Some(worker) = self.touch(key) {
            debug!(key = %key, "Joined concurrent worker initialization");
            return Ok(worker);
        }

        debug!(key = %key, "Creating pooled worker");
        let worker = self
            .factory
            .create(key)
            .await
            .map_err(|source| PoolError::Initialization {
                key: key.to_string(),
                source,
            })?;

        Ok(self.insert(key, Arc::new(worker)))
    }

    /// The worker for `key` if it is live, without creating one
    pub fn get(&self, key: &K) -> Option<Arc<F::Worker>> {
        self.touch(key)
    }

    /// Whether a worker for `key` is live
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Drop the worker for `key`; returns whether one was live
    pub fn release(&self, key: &K) -> bool {
        let released = self.state.lock().entries.remove(key).is_some();
        if released {
            debug!(key = %key, "Released pooled worker");
        }
        released
    }

    /// Drop every worker; returns how many were live
    pub fn release_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        info!(released = count, "Released all pooled workers");
        count
    }

    /// Number of live workers
    pub fn active_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Live keys, oldest inserted first
    pub fn keys(&self) -> Vec<K> {
        let state = self.state.lock();
        let mut keys: Vec<(&K, u64)> = state
            .entries
            .iter()
            .map(|(key, entry)| (key, entry.inserted))
            .collect();
        keys.sort_by_key(|(_, inserted)| *inserted);
        keys.into_iter().map(|(key, _)| key.clone()).collect()
    }

    fn gate(&self, key: &K) -> GateHandle<'_, K> {
        let gate = Arc::clone(self.initializing.lock().entry(key.clone()).or_default());
        GateHandle {
            gates: &self.initializing,
            key: key.clone(),
            gate,
        }
    }

    fn touch(&self, key: &K) -> Option<Arc<F::Worker>> {
        let mut state = self.state.lock();
        let now = state.tick();
        let entry = state.entries.get_mut(key)?;
        entry.last_used = now;
        Some(Arc::clone(&entry.worker))
    }

    fn insert(&self, key: &K, worker: Arc<F::Worker>) -> Arc<F::Worker> {
        let mut state = self.state.lock();
        let now = state.tick();

        if let Some(existing) = state.entries.get_mut(key) {
            existing.last_used = now;
            return Arc::clone(&existing.worker);
        }

        if state.entries.len() >= self.capacity {
            let victim = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| match self.policy {
                    EvictionPolicy::OldestInserted => entry.inserted,
                    EvictionPolicy::LeastRecentlyUsed => entry.last_used,
                })
                .map(|(key, _)| key.clone());
            if let Some(victim) = victim {
                state.entries.remove(&victim);
                info!(
                    evicted = %victim,
                    policy = ?self.policy,
                    capacity = self.capacity,
                    "Pool full, evicted worker"
                );
            }
        }

        state.entries.insert(
            key.clone(),
            PoolEntry {
                worker: Arc::clone(&worker),
                inserted: now,
                last_used: now,
            },
        );
        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        created: AtomicUsize,
    }

    #[async_trait]
    impl WorkerFactory<String> for Counter {
        type Worker = (String, usize);

        async fn create(&self, key: &String) -> anyhow::Result<Self::Worker> {
            if key == "broken" {
                anyhow::bail!("no such entity");
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok((key.clone(), n))
        }
    }

    fn pool(capacity: usize) -> WorkerPool<String, Counter> {
        WorkerPool::new(
            Counter {
                created: AtomicUsize::new(0),
            },
            capacity,
        )
    }

    #[tokio::test]
    async fn test_acquire_reuses_live_worker() {
        let pool = pool(2);
        let first = pool.acquire(&"a".to_string()).await.unwrap();
        let second = pool.acquire(&"a".to_string()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.factory().created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_initialization_failure_inserts_nothing() {
        let pool = pool(2);
        let err = pool.acquire(&"broken".to_string()).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to initialize worker 'broken': no such entity"
        );
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_waiters_retry_after_failed_initialization() {
        struct FailsOnce {
            attempts: AtomicUsize,
        }

        #[async_trait]
        impl WorkerFactory<String> for FailsOnce {
            type Worker = usize;

            async fn create(&self, _key: &String) -> anyhow::Result<usize> {
                tokio::task::yield_now().await;
                match self.attempts.fetch_add(1, Ordering::SeqCst) {
                    0 => anyhow::bail!("warming up"),
                    n => Ok(n),
                }
            }
        }

        let pool = WorkerPool::new(
            FailsOnce {
                attempts: AtomicUsize::new(0),
            },
            2,
        );
        let key = "a".to_string();
        let (first, second, third) =
            tokio::join!(pool.acquire(&key), pool.acquire(&key), pool.acquire(&key));

        assert!(first.is_err());
        assert_eq!(*second.unwrap(), 1);
        assert_eq!(*third.unwrap(), 1);
        assert_eq!(pool.factory().attempts.load(Ordering::SeqCst), 2);
        assert!(pool.initializing.lock().is_empty());
    }

    #[tokio::test]
    async fn test_release() {
        let pool = pool(3);
        for key in ["a", "b", "c"] {
            pool.acquire(&key.to_string()).await.unwrap();
        }

        assert!(pool.release(&"b".to_string()));
        assert!(!pool.release(&"b".to_string()));
        assert_eq!(pool.keys(), vec!["a".to_string(), "c".to_string()]);

        assert_eq!(pool.release_all(), 2);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("fifo".parse(), Ok(EvictionPolicy::OldestInserted));
        assert_eq!("LRU".parse(), Ok(EvictionPolicy::LeastRecentlyUsed));
        assert!("random".parse::<EvictionPolicy>().is_err());
    }
}
