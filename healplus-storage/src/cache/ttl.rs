//! Key/value cache with caller-chosen staleness.

use super::freshness::CacheRead;
use super::stats::{CacheStats, StatCounters};
use healplus_core::{CacheKey, CacheSettings, Clock, CollectionRecord, SystemClock, Timestamp};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::trace;

/// Staleness tolerance used when a reader does not choose one.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Cache of ordered collection snapshots.
pub type CollectionCache = TtlCache<Vec<CollectionRecord>>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Timestamp,
    /// Insertion sequence, used to find the least recently set entry.
    seq: u64,
}

/// Shared map from [`CacheKey`] to `(value, stored_at)`.
///
/// An entry is fresh when `now - stored_at < stale_time`. Stale entries are
/// reported as absent but stay in the map until overwritten or invalidated.
/// With a capacity limit, inserting a new key into a full cache evicts the
/// least recently set entry.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<CacheKey, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    max_entries: Option<usize>,
    next_seq: AtomicU64,
    counters: StatCounters,
}

impl<V: Clone> TtlCache<V> {
    /// Unbounded cache on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            max_entries: None,
            next_seq: AtomicU64::new(0),
            counters: StatCounters::default(),
        }
    }

    /// Limit the number of entries. A limit of zero is treated as one.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max.max(1));
        self
    }

    pub fn from_settings(settings: &CacheSettings, clock: Arc<dyn Clock>) -> Self {
        let cache = Self::with_clock(clock);
        match settings.max_entries {
            Some(max) => cache.with_max_entries(max),
            None => cache,
        }
    }

    /// The cached value for `key` if it is younger than `stale_time`.
    pub fn get(&self, key: &str, stale_time: Duration) -> Option<V> {
        self.get_read(key, stale_time).map(CacheRead::into_value)
    }

    /// Like [`TtlCache::get`], keeping the time the value was stored.
    pub fn get_read(&self, key: &str, stale_time: Duration) -> Option<CacheRead<V>> {
        let now = self.clock.now();
        let entries = self.read_entries();
        match entries.get(key) {
            Some(entry) if is_fresh(entry.stored_at, now, stale_time) => {
                self.counters.record_hit();
                Some(CacheRead::from_cache(entry.value.clone(), entry.stored_at))
            }
            Some(_) => {
                trace!(key, "cache entry stale");
                self.counters.record_miss();
                None
            }
            None => {
                self.counters.record_miss();
                None
            }
        }
    }

    /// Store `value` under `key`, stamped with the current time.
    pub fn set(&self, key: impl Into<CacheKey>, value: V) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let mut entries = self.write_entries();
        if let Some(max) = self.max_entries {
            if !entries.contains_key(key.as_str()) && entries.len() >= max {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.seq)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    self.counters.record_eviction();
                    trace!(key = %oldest, "cache entry evicted");
                }
            }
        }
        entries.insert(key, entry);
    }

    /// Remove `key`. Returns whether an entry existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.write_entries().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.write_entries().clear();
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len())
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // A panic while holding the lock cannot leave an entry half-written, so
    // a poisoned map is still usable.
    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

/// Clock skew that puts `stored_at` in the future counts as age zero.
fn is_fresh(stored_at: Timestamp, now: Timestamp, stale_time: Duration) -> bool {
    let age = (now - stored_at).to_std().unwrap_or(Duration::ZERO);
    age < stale_time
}
