//! Byte-budget LRU cache with TTLs and logical namespaces.
//!
//! Two namespaces are in use: `embed` (7-day TTL) and `query:<collection>`
//! (1-hour TTL). Entries are immutable; staleness within TTL is accepted by
//! design, and eviction under byte pressure must never fail an operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

/// TTL for cached embeddings.
pub const EMBED_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
/// TTL for cached query results.
pub const QUERY_TTL: Duration = Duration::from_secs(3600);
/// TTL for session-scoped working state.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 3600);

/// Default byte budget: 512 MiB.
pub const DEFAULT_CAPACITY_BYTES: usize = 512 * 1024 * 1024;

/// A namespaced 16-byte cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: String,
    pub hash: [u8; 16],
}

impl CacheKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, hash: [u8; 16]) -> Self {
        Self {
            namespace: namespace.into(),
            hash,
        }
    }

    fn byte_len(&self) -> usize {
        self.namespace.len() + self.hash.len()
    }
}

/// Counters surfaced through memory stats.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub used_bytes: u64,
    pub evictions: u64,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Key-value cache with TTL expiry.
///
/// Implementations must be safe for concurrent readers and writers and must
/// degrade gracefully: a failed or unavailable cache is a miss, never an
/// error surfaced to the caller.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<Vec<u8>>;
    async fn put(&self, key: CacheKey, value: Vec<u8>, ttl: Duration);
    async fn remove_namespace(&self, namespace: &str);
    fn stats(&self) -> CacheStats;
    fn healthy(&self) -> bool {
        true
    }
}

struct Entry {
    value: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
    recency: u64,
}

#[derive(Default)]
struct LruInner {
    entries: HashMap<CacheKey, Entry>,
    /// recency tick → key; lowest tick is the LRU victim.
    order: BTreeMap<u64, CacheKey>,
    tick: u64,
    used_bytes: usize,
}

/// In-process LRU implementation of [`CacheStore`].
pub struct LruCache {
    inner: Mutex<LruInner>,
    capacity_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for LruCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES)
    }
}

impl LruCache {
    #[must_use]
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner::default()),
            capacity_bytes: capacity_bytes.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn entry_cost(key: &CacheKey, value_len: usize) -> usize {
        key.byte_len() + value_len
    }

    fn remove_locked(inner: &mut LruInner, key: &CacheKey) -> Option<Entry> {
        let entry = inner.entries.remove(key)?;
        inner.order.remove(&entry.recency);
        inner.used_bytes = inner
            .used_bytes
            .saturating_sub(Self::entry_cost(key, entry.value.len()));
        Some(entry)
    }
}

#[async_trait]
impl CacheStore for LruCache {
    async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().expect("cache poisoned");
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= entry.ttl,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            Self::remove_locked(&mut inner, key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(key).expect("checked above");
        let old_recency = entry.recency;
        entry.recency = tick;
        let value = entry.value.clone();
        inner.order.remove(&old_recency);
        inner.order.insert(tick, key.clone());
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    async fn put(&self, key: CacheKey, value: Vec<u8>, ttl: Duration) {
        let mut inner = self.inner.lock().expect("cache poisoned");
        Self::remove_locked(&mut inner, &key);

        inner.tick += 1;
        let tick = inner.tick;
        inner.used_bytes += Self::entry_cost(&key, value.len());
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
                recency: tick,
            },
        );

        while inner.used_bytes > self.capacity_bytes {
            let Some(victim_key) = inner.order.values().next().cloned() else {
                break;
            };
            Self::remove_locked(&mut inner, &victim_key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn remove_namespace(&self, namespace: &str) {
        let mut inner = self.inner.lock().expect("cache poisoned");
        let victims: Vec<CacheKey> = inner
            .entries
            .keys()
            .filter(|k| k.namespace == namespace)
            .cloned()
            .collect();
        for key in victims {
            Self::remove_locked(&mut inner, &key);
        }
    }

    fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache poisoned");
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: inner.entries.len() as u64,
            used_bytes: inner.used_bytes as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
