//! Check-key count cache.
//!
//! A read-through cache for the expensive count aggregates, with two
//! invalidation mechanisms:
//!
//! - **Deletion**: the local half of a snapshot is deleted outright on
//!   every local mutation (cheap to recompute, must be read-your-write).
//! - **Check keys**: the global half is invalidated logically. Every
//!   cached value is tagged at write time with the check-key timestamps
//!   observed when its computation *started*; the value is trusted only
//!   while no later touch has occurred. A touch during computation makes
//!   the freshly stored value stale-on-arrival, so the next read
//!   recomputes; the value itself is still returned to the caller that
//!   computed it.
//!
//! Population takes no exclusive lock. Concurrent callers may compute the
//! same value twice; the store is idempotent, so duplicate computation is
//! a performance cost, not a correctness problem. When recomputation
//! fails and a known-stale value is still present, the stale value is
//! served instead of surfacing the failure (availability over freshness).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use asupersync::Outcome;
use indexmap::IndexMap;

use badgecount_core::timestamps::now_micros;
use badgecount_core::{Error, LockLevel, OrderedMutex, OrderedRwLock};

/// Upper bound on entries held by [`MemoryCacheStore`].
const MAX_ENTRIES: usize = 8_192;

/// A cached value plus its validity metadata.
#[derive(Debug, Clone)]
pub struct CachedValue<V> {
    pub value: V,
    /// When the value was stored (microseconds since epoch).
    pub stored_at_us: i64,
    pub ttl: Duration,
    /// Check-key name and the check-key time observed when computation
    /// started. The value is valid only while no key has a later time.
    pub depends_on: Vec<(String, i64)>,
}

impl<V> CachedValue<V> {
    fn ttl_micros(&self) -> i64 {
        i64::try_from(self.ttl.as_micros()).unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn is_expired(&self, now_us: i64) -> bool {
        now_us.saturating_sub(self.stored_at_us) > self.ttl_micros()
    }
}

/// Result of a compute callback: the value plus an optional TTL override
/// (used to cache aggregates built from partial peer data for a shorter
/// time than the default).
#[derive(Debug, Clone)]
pub struct ComputedValue<V> {
    pub value: V,
    pub ttl: Option<Duration>,
}

impl<V> ComputedValue<V> {
    /// A value cacheable for the full default TTL.
    pub const fn full(value: V) -> Self {
        Self { value, ttl: None }
    }
}

/// Key/value storage with TTL-carrying entries and monotonic check keys.
///
/// The store is externally synchronized shared state; plain get/set/delete
/// plus a monotonic check-key timestamp suffice (no compare-and-swap).
/// `get` must not return TTL-expired entries; check-key validity is the
/// caller's concern ([`CountCache`] evaluates it), because a stale entry
/// must remain servable as a fallback.
pub trait CacheStore<V: Clone + Send + Sync>: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedValue<V>>;
    fn set(&self, key: &str, value: CachedValue<V>);
    fn delete(&self, key: &str);
    /// Advance a check key's timestamp. Strictly monotonic.
    fn touch_check_key(&self, key: &str);
    /// Read a check key's timestamp; `0` when never touched.
    fn check_key_time(&self, key: &str) -> i64;
}

impl<V: Clone + Send + Sync, S: CacheStore<V>> CacheStore<V> for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Option<CachedValue<V>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: CachedValue<V>) {
        (**self).set(key, value);
    }

    fn delete(&self, key: &str) {
        (**self).delete(key);
    }

    fn touch_check_key(&self, key: &str) {
        (**self).touch_check_key(key);
    }

    fn check_key_time(&self, key: &str) -> i64 {
        (**self).check_key_time(key)
    }
}

/// Lock-free cache hit/miss counters.
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub stale_serves: AtomicU64,
}

/// Snapshot of cache metrics at a point in time.
#[derive(Debug, Clone)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stale_serves: u64,
}

impl CacheMetricsSnapshot {
    /// Hit rate in [0.0, 1.0]; 0.0 before any lookup.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl CacheMetrics {
    const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_serves: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_stale_serve(&self) {
        self.stale_serves.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of the current metric values.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_serves: self.stale_serves.load(Ordering::Relaxed),
        }
    }
}

static CACHE_METRICS: CacheMetrics = CacheMetrics::new();

/// Get the global cache metrics.
#[must_use]
pub fn cache_metrics() -> &'static CacheMetrics {
    &CACHE_METRICS
}

/// In-memory [`CacheStore`] with LRU eviction.
pub struct MemoryCacheStore<V> {
    entries: OrderedRwLock<IndexMap<String, CachedValue<V>>>,
    check_keys: OrderedMutex<HashMap<String, i64>>,
}

impl<V: Clone + Send + Sync> MemoryCacheStore<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: OrderedRwLock::new(LockLevel::CacheEntries, IndexMap::new()),
            check_keys: OrderedMutex::new(LockLevel::CacheCheckKeys, HashMap::new()),
        }
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone + Send + Sync> Default for MemoryCacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> CacheStore<V> for MemoryCacheStore<V> {
    #[allow(clippy::significant_drop_tightening)]
    fn get(&self, key: &str) -> Option<CachedValue<V>> {
        let now = now_micros();
        let mut map = self.entries.write();
        let Some(idx) = map.get_index_of(key) else {
            CACHE_METRICS.record_miss();
            return None;
        };
        let (expired, value) = {
            let (_, entry) = map.get_index(idx)?;
            (entry.is_expired(now), entry.clone())
        };
        if expired {
            map.shift_remove_index(idx);
            CACHE_METRICS.record_miss();
            return None;
        }
        // Move to back for LRU ordering.
        let last = map.len() - 1;
        map.move_index(idx, last);
        CACHE_METRICS.record_hit();
        Some(value)
    }

    fn set(&self, key: &str, value: CachedValue<V>) {
        let now = now_micros();
        let mut map = self.entries.write();
        if map.len() >= MAX_ENTRIES {
            // Evict expired entries first, then the oldest from the front.
            map.retain(|_, entry| !entry.is_expired(now));
            while map.len() >= MAX_ENTRIES {
                map.shift_remove_index(0);
            }
        }
        map.insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.entries.write().shift_remove(key);
    }

    fn touch_check_key(&self, key: &str) {
        let mut keys = self.check_keys.lock();
        let now = now_micros();
        let slot = keys.entry(key.to_string()).or_insert(0);
        *slot = (*slot + 1).max(now);
    }

    fn check_key_time(&self, key: &str) -> i64 {
        self.check_keys.lock().get(key).copied().unwrap_or(0)
    }
}

/// Read-through cache front end: get-or-compute with race-tolerant
/// duplicate work and check-key tagging.
pub struct CountCache<V, S: CacheStore<V>> {
    store: S,
    _value: PhantomData<V>,
}

impl<V: Clone + Send + Sync, S: CacheStore<V>> CountCache<V, S> {
    pub const fn new(store: S) -> Self {
        Self {
            store,
            _value: PhantomData,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Serve `key` from cache, computing (and caching) on miss.
    ///
    /// `check_keys` are the invalidation keys this value depends on; their
    /// times are snapshotted *before* `compute` runs and stored with the
    /// value, so a touch that races the computation invalidates the stored
    /// value on the next read rather than being lost.
    ///
    /// When `compute` fails with an error and a (possibly stale) value is
    /// still cached, the cached value is served and the failure logged.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        default_ttl: Duration,
        check_keys: &[String],
        compute: F,
    ) -> Outcome<V, Error>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Outcome<ComputedValue<V>, Error>> + Send,
    {
        if let Some(entry) = self.store.get(key) {
            if self.deps_current(&entry) {
                return Outcome::Ok(entry.value);
            }
        }

        // Snapshot dependency times before computing; see the module docs
        // for why this ordering matters.
        let observed: Vec<(String, i64)> = check_keys
            .iter()
            .map(|k| (k.clone(), self.store.check_key_time(k)))
            .collect();

        match compute().await {
            Outcome::Ok(computed) => {
                let ttl = computed.ttl.unwrap_or(default_ttl);
                self.store.set(
                    key,
                    CachedValue {
                        value: computed.value.clone(),
                        stored_at_us: now_micros(),
                        ttl,
                        depends_on: observed,
                    },
                );
                Outcome::Ok(computed.value)
            }
            Outcome::Err(err) => {
                if let Some(entry) = self.store.get(key) {
                    CACHE_METRICS.record_stale_serve();
                    tracing::warn!(
                        key,
                        error = %err,
                        "serving stale cached value; recomputation failed"
                    );
                    return Outcome::Ok(entry.value);
                }
                Outcome::Err(err)
            }
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Delete a cached entry outright.
    pub fn delete(&self, key: &str) {
        self.store.delete(key);
    }

    /// Advance a check key, logically invalidating every value tagged
    /// with an earlier observation of it.
    pub fn touch_check_key(&self, key: &str) {
        self.store.touch_check_key(key);
    }

    /// Read a check key's timestamp; `0` when never touched.
    pub fn check_key_time(&self, key: &str) -> i64 {
        self.store.check_key_time(key)
    }

    fn deps_current(&self, entry: &CachedValue<V>) -> bool {
        entry
            .depends_on
            .iter()
            .all(|(key, observed)| self.store.check_key_time(key) <= *observed)
    }
}
