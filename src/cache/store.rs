//! Cache Store Module
//!
//! Main cache engine binding an ordered index (key → heap handle) to a
//! timeline heap ordered by expiry. Both structures are only ever mutated
//! together, under the cache's own lock.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::algorithm::{Heap, HeapHandle, OrderedMap};
use crate::cache::entry::current_timestamp_ns;
use crate::cache::{CacheEntry, CacheStats};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::tasks::spawn_sweeper;

type Timeline<K, V> = Heap<K, CacheEntry<V>>;

/// Mutable state guarded by the cache lock.
struct CacheState<K, V> {
    /// Key lookup; each value locates the key's entry in `timeline`
    index: OrderedMap<K, HeapHandle>,
    /// Entries ordered by expiry; `None` once released after shutdown
    timeline: Option<Timeline<K, V>>,
    closed: bool,
    stats: CacheStats,
}

struct Shared<K, V> {
    state: Mutex<CacheState<K, V>>,
    config: CacheConfig,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

// == TTL Cache ==
/// Thread-safe TTL cache with O(log n) set, get, delete and eviction.
///
/// Cloning is cheap and yields another handle to the same cache.
pub struct TtlCache<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Non-owning reference held by the sweeper so it never keeps a dropped
/// cache alive.
pub(crate) struct WeakCache<K, V>(Weak<Shared<K, V>>);

impl<K, V> WeakCache<K, V> {
    pub(crate) fn upgrade(&self) -> Option<TtlCache<K, V>> {
        self.0.upgrade().map(|shared| TtlCache { shared })
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Creates a cache without a background sweeper.
    ///
    /// Expired entries are still evicted lazily on read, or by calling
    /// [`sweep_expired`](Self::sweep_expired).
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);

        let state = CacheState {
            index: OrderedMap::new(),
            timeline: Some(Heap::new(config.heap)),
            closed: false,
            stats: CacheStats::new(),
        };
        info!(
            "TTL cache created: sweep_interval={:?}, sweep_batch_size={}",
            config.sweep_interval, config.sweep_batch_size
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                config,
                shutdown_tx,
                sweeper: Mutex::new(None),
            }),
        })
    }

    /// Creates a cache and starts its background sweeper on the current
    /// tokio runtime.
    pub fn with_sweeper(config: CacheConfig) -> Result<Self> {
        let cache = Self::new(config)?;
        let handle = spawn_sweeper(&cache)?;
        *cache.shared.sweeper.lock() = Some(handle);
        Ok(cache)
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl` from now.
    ///
    /// An existing key gets its value and expiry replaced.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.insert(key, CacheEntry::with_ttl(value, ttl));
    }

    /// Stores `value` under `key` until the absolute Unix-nanosecond instant
    /// `expires_at`.
    pub fn set_until(&self, key: K, value: V, expires_at: i64) {
        self.insert(key, CacheEntry::new(value, expires_at));
    }

    fn insert(&self, key: K, entry: CacheEntry<V>) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.closed {
            return;
        }
        let Some(timeline) = state.timeline.as_ref() else {
            return;
        };

        let expires_at = entry.expires_at;
        let existing = state
            .index
            .get(&key)
            .and_then(|handle| timeline.pop_at(handle.position()));

        // The index always keeps the handle returned by the latest push
        let handle = match existing {
            Some(mut old) => {
                old.set_sort_key(expires_at);
                old.replace_payload(entry);
                timeline.push_entry(old)
            }
            None => timeline.push(expires_at, key.clone(), entry),
        };
        state.index.put(key, handle);
        trace!(expires_at, "cache set");
    }

    // == Get ==
    /// Returns the value and expiry of a live key.
    ///
    /// A key found expired is evicted on the spot and reported absent.
    pub fn get(&self, key: &K) -> Option<(V, i64)> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.closed {
            return None;
        }
        let timeline = state.timeline.as_ref()?;

        let found = state.index.get(key).and_then(|handle| {
            let position = handle.position();
            timeline
                .with_entry(position, |e| (e.payload().clone(), position))
        });
        let Some((entry, position)) = found else {
            state.stats.record_miss();
            return None;
        };

        if entry.is_expired() {
            timeline.pop_at(position);
            state.index.delete(key);
            state.stats.record_expired();
            state.stats.record_miss();
            debug!(expires_at = entry.expires_at, "lazily evicted expired entry");
            return None;
        }

        state.stats.record_hit();
        Some((entry.value, entry.expires_at))
    }

    // == Delete ==
    /// Removes a key. Returns `false` if it was not present.
    pub fn delete(&self, key: &K) -> bool {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.closed {
            return false;
        }
        let Some(timeline) = state.timeline.as_ref() else {
            return false;
        };

        let Some(handle) = state.index.delete(key) else {
            return false;
        };
        timeline.pop_at(handle.position());
        trace!("cache delete");
        true
    }

    // == Oldest Key ==
    /// The key that expires first, with its expiry.
    pub fn oldest_key(&self) -> Option<(K, i64)> {
        let state = self.shared.state.lock();
        if state.closed {
            return None;
        }
        state
            .timeline
            .as_ref()?
            .peek_min()
            .map(|(expires_at, key)| (key, expires_at))
    }

    // == Entry At ==
    /// The key and expiry stored at `position` in the expiry timeline.
    ///
    /// Position 0 is always the oldest entry; other positions follow heap
    /// layout, not expiry order.
    pub fn entry_at(&self, position: usize) -> Option<(K, i64)> {
        let state = self.shared.state.lock();
        if state.closed {
            return None;
        }
        state
            .timeline
            .as_ref()?
            .get(position)
            .map(|(expires_at, key)| (key, expires_at))
    }

    // == Length ==
    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        let state = self.shared.state.lock();
        if state.closed {
            return 0;
        }
        state.timeline.as_ref().map_or(0, Heap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Keys ==
    /// All stored keys, level by level through the index tree.
    pub fn keys(&self) -> Vec<K> {
        let state = self.shared.state.lock();
        if state.closed {
            return Vec::new();
        }
        state.index.keys_breadth_first()
    }

    // == Sweep Expired ==
    /// Evicts expired entries, oldest first, up to the configured batch
    /// size. Returns how many were evicted.
    pub fn sweep_expired(&self) -> usize {
        let batch = self.shared.config.sweep_batch_size;
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.closed {
            return 0;
        }
        let Some(timeline) = state.timeline.as_ref() else {
            return 0;
        };

        let now = current_timestamp_ns();
        let mut removed = 0;
        while removed < batch {
            match timeline.peek_min() {
                Some((expires_at, _)) if expires_at <= now => {}
                _ => break,
            }
            let Some(entry) = timeline.pop_min() else {
                break;
            };
            state.index.delete(entry.key());
            removed += 1;
        }

        state.stats.record_swept(removed);
        removed
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        let live = if state.closed {
            0
        } else {
            state.timeline.as_ref().map_or(0, Heap::len)
        };
        stats.set_total_entries(live);
        stats
    }

    // == Check ==
    /// Verifies both structures' invariants and that every index handle
    /// points at the timeline slot holding the same key.
    pub fn check(&self) -> bool {
        let state = self.shared.state.lock();
        let Some(timeline) = state.timeline.as_ref() else {
            return state.index.is_empty();
        };
        if !state.index.check() || !timeline.check() || state.index.len() != timeline.len() {
            return false;
        }

        let pairs: Vec<(K, HeapHandle)> = state.index.iter().collect();
        pairs.iter().all(|(key, handle)| {
            timeline
                .get(handle.position())
                .is_some_and(|(_, stored)| stored == *key)
        })
    }

    // == Shutdown ==
    /// Closes the cache for good.
    ///
    /// Later calls are no-ops: reads report absent and `len` reports 0. The
    /// sweeper stops and releases the timeline; without a sweeper the
    /// timeline is released right away.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        info!("TTL cache shutting down");

        let has_sweeper = self.shared.sweeper.lock().is_some();
        if self.shared.shutdown_tx.send(true).is_err() || !has_sweeper {
            self.release();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Drops both structures of a closed cache.
    pub(crate) fn release(&self) {
        let mut state = self.shared.state.lock();
        if !state.closed {
            warn!("refusing to release an open cache");
            return;
        }
        if let Some(timeline) = state.timeline.take() {
            debug!(entries = timeline.len(), "timeline released");
        }
        state.index = OrderedMap::new();
    }

    // == Sweeper Plumbing ==

    pub(crate) fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shared.shutdown_tx.subscribe()
    }

    pub(crate) fn downgrade(&self) -> WeakCache<K, V> {
        WeakCache(Arc::downgrade(&self.shared))
    }

    /// Takes the sweeper's join handle, if one was started.
    pub fn take_sweeper(&self) -> Option<JoinHandle<()>> {
        self.shared.sweeper.lock().take()
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TtlCache")
            .field("closed", &state.closed)
            .field("stats", &state.stats)
            .finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn new_cache() -> TtlCache<String, String> {
        TtlCache::new(CacheConfig::default()).unwrap()
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_cache_new() {
        let cache = new_cache();
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert!(cache.oldest_key().is_none());
        assert!(cache.check());
    }

    #[test]
    fn test_cache_rejects_bad_config() {
        let config = CacheConfig {
            sweep_batch_size: 0,
            ..CacheConfig::default()
        };
        assert!(TtlCache::<String, String>::new(config).is_err());
    }

    #[test]
    fn test_cache_set_and_get() {
        let cache = new_cache();
        cache.set(s("key1"), s("value1"), Duration::from_secs(60));

        let (value, expires_at) = cache.get(&s("key1")).unwrap();
        assert_eq!(value, "value1");
        assert!(expires_at > current_timestamp_ns());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_get_nonexistent() {
        let cache = new_cache();
        assert!(cache.get(&s("nonexistent")).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_cache_delete() {
        let cache = new_cache();
        cache.set(s("key1"), s("value1"), Duration::from_secs(60));

        assert!(cache.delete(&s("key1")));
        assert!(cache.is_empty());
        assert!(cache.get(&s("key1")).is_none());
        assert!(!cache.delete(&s("key1")));
        assert!(cache.check());
    }

    #[test]
    fn test_cache_overwrite_updates_value_and_expiry() {
        let cache = new_cache();
        cache.set(s("a"), s("first"), Duration::from_secs(10));
        cache.set(s("b"), s("other"), Duration::from_secs(20));
        assert_eq!(cache.oldest_key().map(|(k, _)| k), Some(s("a")));

        cache.set(s("a"), s("second"), Duration::from_secs(30));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&s("a")).map(|(v, _)| v), Some(s("second")));
        assert_eq!(cache.oldest_key().map(|(k, _)| k), Some(s("b")));
        assert!(cache.check());
    }

    #[test]
    fn test_cache_set_until_absolute_expiry() {
        let cache = new_cache();
        let at = current_timestamp_ns() + 5_000_000_000;
        cache.set_until(s("k"), s("v"), at);
        assert_eq!(cache.get(&s("k")), Some((s("v"), at)));
        assert_eq!(cache.oldest_key(), Some((s("k"), at)));
        assert_eq!(cache.entry_at(0), Some((s("k"), at)));
        assert!(cache.entry_at(1).is_none());
    }

    #[test]
    fn test_cache_lazy_expiration() {
        let cache = new_cache();
        cache.set(s("a"), s("x"), Duration::from_millis(100));
        assert!(cache.get(&s("a")).is_some());

        sleep(Duration::from_millis(150));

        assert!(cache.get(&s("a")).is_none());
        assert!(!cache.keys().contains(&s("a")));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expired, 1);
        assert!(cache.check());
    }

    #[test]
    fn test_cache_already_expired_on_set() {
        let cache = new_cache();
        cache.set_until(s("past"), s("v"), current_timestamp_ns() - 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&s("past")).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_cache_set_expiry_follows_ttl() {
        let cache = new_cache();
        let before = current_timestamp_ns();
        cache.set(s("a"), s("v"), Duration::from_secs(10));
        let after = current_timestamp_ns();

        let (_, expires_at) = cache.get(&s("a")).unwrap();
        assert!(expires_at >= before + 10_000_000_000);
        assert!(expires_at <= after + 10_000_000_000);
    }

    #[test]
    fn test_cache_keys_breadth_first() {
        let cache: TtlCache<u32, u32> = TtlCache::new(CacheConfig::default()).unwrap();
        for k in 1..=7 {
            cache.set(k, k, Duration::from_secs(60));
        }
        // Ascending inserts leave 2 at the root with 4 rebalanced beneath it
        assert_eq!(cache.keys(), vec![2, 1, 4, 3, 6, 5, 7]);
    }

    #[test]
    fn test_cache_sweep_is_batched() {
        let config = CacheConfig {
            sweep_batch_size: 3,
            ..CacheConfig::default()
        };
        let cache: TtlCache<u32, u32> = TtlCache::new(config).unwrap();
        let past = current_timestamp_ns() - 1_000;
        for i in 0..7 {
            cache.set_until(i, i, past + i64::from(i));
        }
        cache.set(100, 100, Duration::from_secs(60));

        assert_eq!(cache.sweep_expired(), 3);
        assert_eq!(cache.oldest_key().map(|(k, _)| k), Some(3));
        assert_eq!(cache.sweep_expired(), 3);
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.sweep_expired(), 0);

        assert_eq!(cache.keys(), vec![100]);
        assert_eq!(cache.stats().swept, 7);
        assert!(cache.check());
    }

    #[test]
    fn test_cache_stats() {
        let cache = new_cache();
        cache.set(s("key1"), s("value1"), Duration::from_secs(60));
        cache.get(&s("key1")); // hit
        cache.get(&s("nonexistent")); // miss

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_cache_shutdown() {
        let cache = new_cache();
        cache.set(s("a"), s("x"), Duration::from_secs(60));
        cache.shutdown();

        assert!(cache.is_closed());
        assert!(cache.get(&s("a")).is_none());
        assert_eq!(cache.len(), 0);
        assert!(cache.keys().is_empty());
        assert!(cache.oldest_key().is_none());

        // Mutations are ignored after shutdown
        cache.set(s("b"), s("y"), Duration::from_secs(60));
        assert!(!cache.delete(&s("a")));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.sweep_expired(), 0);

        // Idempotent
        cache.shutdown();
        assert!(cache.check());
    }

    #[test]
    fn test_cache_clones_share_state() {
        let cache = new_cache();
        let other = cache.clone();
        cache.set(s("a"), s("x"), Duration::from_secs(60));
        assert_eq!(other.get(&s("a")).map(|(v, _)| v), Some(s("x")));
        other.shutdown();
        assert!(cache.is_closed());
    }
}
