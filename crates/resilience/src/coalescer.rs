//! Request coalescing: deduplication and debounce with fan-out
//!
//! At most one underlying fetch per key is outstanding at any instant.
//! Callers arriving while a fetch for their key is pending (including the
//! debounce window before it starts) join it and receive a clone of its
//! result. The fetch runs on its own task, so it completes and can populate
//! the cache even if every caller stops waiting.
//!
//! A write can [`detach`](RequestCoalescer::detach) pending fetches whose
//! data it made outdated; callers arriving afterwards start a new fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::{CacheKey, InvalidationPattern};
use crate::error::ResilienceError;

/// A fetch shared by every caller for the same key
pub type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ResilienceError>>>;

/// How a new fetch is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalesceMode {
    /// Start immediately; concurrent callers share it
    #[default]
    Dedup,
    /// Start at the end of the debounce window; every caller in the window shares it
    Debounce,
}

struct Pending<V> {
    id: u64,
    fetch: SharedFetch<V>,
}

struct Registry<V> {
    next_id: u64,
    entries: HashMap<CacheKey, Pending<V>>,
}

impl<V> Registry<V> {
    /// Remove the entry for `key` if it is still the fetch `id`
    fn settle(&mut self, key: &CacheKey, id: u64) {
        if self.entries.get(key).is_some_and(|pending| pending.id == id) {
            self.entries.remove(key);
        }
    }
}

type PendingMap<V> = Arc<Mutex<Registry<V>>>;

/// Registry of in-flight fetches keyed by cache key
pub struct RequestCoalescer<V> {
    debounce_window: Duration,
    pending: PendingMap<V>,
}

impl<V> RequestCoalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(debounce_window: Duration) -> Self {
        Self {
            debounce_window,
            pending: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }

    pub fn debounce_window(&self) -> Duration {
        self.debounce_window
    }

    /// Join the pending fetch for `key`, or start one with `fetch`
    ///
    /// `fetch` is only invoked when no fetch is pending. Its future is
    /// spawned; the registry entry is removed when it settles, after any
    /// side effects the future performs (such as populating the cache).
    pub fn run<F, Fut>(&self, key: &CacheKey, mode: CoalesceMode, fetch: F) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ResilienceError>> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some(existing) = pending.entries.get(key) {
            trace!(key = %key, "Joining in-flight request");
            return existing.fetch.clone();
        }
        let id = pending.next_id;
        pending.next_id += 1;

        // The window starts with the first caller, not when the task is polled
        let start_at = match mode {
            CoalesceMode::Dedup => None,
            CoalesceMode::Debounce => Some(Instant::now() + self.debounce_window),
        };
        let registry = Arc::clone(&self.pending);
        let owned_key = key.clone();
        let work = fetch();

        let handle = tokio::spawn(async move {
            if let Some(start_at) = start_at {
                tokio::time::sleep_until(start_at).await;
            }
            let result = work.await;
            registry.lock().settle(&owned_key, id);
            result
        });

        let shared = async move {
            handle.await.unwrap_or_else(|err| {
                Err(ResilienceError::unknown(format!("fetch task failed: {err}")))
            })
        }
        .boxed()
        .shared();

        debug!(key = %key, ?mode, "Starting coalesced request");
        pending.entries.insert(
            key.clone(),
            Pending {
                id,
                fetch: shared.clone(),
            },
        );
        shared
    }

    /// Stop new callers from joining pending fetches matching `pattern`
    ///
    /// Detached fetches keep running for the callers already waiting on
    /// them. Returns the number detached.
    pub fn detach(&self, pattern: &InvalidationPattern) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.entries.len();
        pending.entries.retain(|key, _| !pattern.matches(key));
        let detached = before - pending.entries.len();
        if detached > 0 {
            debug!(?pattern, detached, "Detached in-flight requests");
        }
        detached
    }

    /// Whether a fetch for `key` is pending
    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.pending.lock().entries.contains_key(key)
    }

    /// Number of pending fetches
    pub fn pending_count(&self) -> usize {
        self.pending.lock().entries.len()
    }
}
