//! TTL cache store

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::keys::{CacheKey, InvalidationPattern};

/// Freshness class of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Fast-changing data (interaction logs)
    Short,
    /// Regular entity lists and rows
    Standard,
    /// Rarely changing data (campaign list)
    Long,
}

/// TTL for each class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlConfig {
    #[serde(with = "crate::duration_millis")]
    pub short: Duration,
    #[serde(with = "crate::duration_millis")]
    pub standard: Duration,
    #[serde(with = "crate::duration_millis")]
    pub long: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(30),
            standard: Duration::from_secs(5 * 60),
            long: Duration::from_secs(30 * 60),
        }
    }
}

impl TtlConfig {
    /// TTL of a class
    pub fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Short => self.short,
            TtlClass::Standard => self.standard,
            TtlClass::Long => self.long,
        }
    }
}

/// A cached value with its freshness metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: CacheKey,
    pub data: V,
    pub stored_at: Instant,
    pub ttl_class: TtlClass,
}

impl<V> CacheEntry<V> {
    /// Age of the entry
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

/// Invalidations remembered for fills that started before them
const INVALIDATION_LOG_LEN: usize = 256;

/// Numbered record of recent invalidations
#[derive(Debug, Default)]
struct InvalidationLog {
    generation: u64,
    recent: VecDeque<(u64, InvalidationPattern)>,
}

impl InvalidationLog {
    fn record(&mut self, pattern: InvalidationPattern) {
        self.generation += 1;
        if self.recent.len() == INVALIDATION_LOG_LEN {
            self.recent.pop_front();
        }
        self.recent.push_back((self.generation, pattern));
    }

    /// Whether `key` may have been invalidated after generation `since`
    ///
    /// Once the log no longer reaches back to `since` the answer is yes.
    fn touched_since(&self, key: &CacheKey, since: u64) -> bool {
        if since >= self.generation {
            return false;
        }
        match self.recent.front() {
            Some((oldest, _)) if *oldest <= since + 1 => self
                .recent
                .iter()
                .any(|(generation, pattern)| *generation > since && pattern.matches(key)),
            _ => true,
        }
    }
}

struct Inner<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    log: InvalidationLog,
}

/// Key → entry table with TTL-checked reads
///
/// [`get`](Self::get) never returns an entry older than its TTL; only
/// [`get_stale`](Self::get_stale), used for offline and blocked fallbacks,
/// ignores freshness.
///
/// Every invalidation advances a generation. A fill that read its data at
/// generation `g` goes through [`insert_since`](Self::insert_since) and is
/// dropped if a matching invalidation happened after `g`.
pub struct CacheStore<V> {
    ttl: TtlConfig,
    inner: RwLock<Inner<V>>,
}

impl<V: Clone> CacheStore<V> {
    pub fn new(ttl: TtlConfig) -> Self {
        Self {
            ttl,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                log: InvalidationLog::default(),
            }),
        }
    }

    pub fn ttl_config(&self) -> &TtlConfig {
        &self.ttl
    }

    /// Fresh value for a key
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let inner = self.inner.read();
        let entry = inner.entries.get(key)?;
        (entry.age() < self.ttl.ttl(entry.ttl_class)).then(|| entry.data.clone())
    }

    /// Value for a key regardless of age
    pub fn get_stale(&self, key: &CacheKey) -> Option<V> {
        self.inner.read().entries.get(key).map(|entry| entry.data.clone())
    }

    /// Store a value, replacing any previous entry
    pub fn insert(&self, key: CacheKey, data: V, ttl_class: TtlClass) {
        let entry = CacheEntry {
            key: key.clone(),
            data,
            stored_at: Instant::now(),
            ttl_class,
        };
        self.inner.write().entries.insert(key, entry);
    }

    /// Current invalidation generation
    ///
    /// Take it before reading the data that will later be stored.
    pub fn generation(&self) -> u64 {
        self.inner.read().log.generation
    }

    /// Store a value read at generation `since`
    ///
    /// Returns false, storing nothing, when the key was invalidated after
    /// `since`.
    pub fn insert_since(&self, key: CacheKey, data: V, ttl_class: TtlClass, since: u64) -> bool {
        let mut inner = self.inner.write();
        if inner.log.touched_since(&key, since) {
            debug!(key = %key, since, "Dropping cache fill invalidated mid-flight");
            return false;
        }
        let entry = CacheEntry {
            key: key.clone(),
            data,
            stored_at: Instant::now(),
            ttl_class,
        };
        inner.entries.insert(key, entry);
        true
    }

    /// Drop every entry matching the pattern; returns the number removed
    pub fn invalidate(&self, pattern: &InvalidationPattern) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !pattern.matches(key));
        let removed = before - inner.entries.len();
        inner.log.record(pattern.clone());
        if removed > 0 {
            debug!(?pattern, removed, "Invalidated cache entries");
        }
        removed
    }

    /// Drop expired entries; returns the number removed
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| entry.age() < self.ttl.ttl(entry.ttl_class));
        before - inner.entries.len()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.invalidate(&InvalidationPattern::All);
    }

    /// Keys currently stored, fresh or not
    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.read().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new(TtlConfig::default())
    }
}
