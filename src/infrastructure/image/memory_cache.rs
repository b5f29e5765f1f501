//! In-memory LRU image cache implementation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, DecodedImage};
use crate::domain::ports::ImageCachePort;

/// Default maximum number of images to cache in memory.
pub const DEFAULT_COUNT_LIMIT: usize = 200;

/// Default maximum decoded size kept in memory (256 MiB).
pub const DEFAULT_COST_LIMIT: u64 = 256 * 1024 * 1024;

/// Bounds of a [`MemoryImageCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries, pinned ones included.
    pub count_limit: usize,
    /// Maximum summed cost in bytes, pinned ones included.
    pub cost_limit: u64,
    /// Entries not accessed for this long are dropped on the next lookup.
    pub expiration: Option<Duration>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            count_limit: DEFAULT_COUNT_LIMIT,
            cost_limit: DEFAULT_COST_LIMIT,
            expiration: None,
        }
    }
}

struct Entry {
    image: Arc<DecodedImage>,
    cost: u64,
    last_access: Instant,
}

impl Entry {
    fn new(image: Arc<DecodedImage>) -> Self {
        Self {
            cost: image.cost(),
            image,
            last_access: Instant::now(),
        }
    }

    fn is_expired(&self, expiration: Option<Duration>) -> bool {
        expiration.is_some_and(|ttl| self.last_access.elapsed() > ttl)
    }
}

struct State {
    lru: LruCache<CacheKey, Entry>,
    pinned: HashMap<CacheKey, Entry>,
    pinned_keys: HashSet<CacheKey>,
    total_cost: u64,
    pinned_cost: u64,
}

impl State {
    fn len(&self) -> usize {
        self.lru.len() + self.pinned.len()
    }

    fn take(&mut self, key: &CacheKey) -> Option<Entry> {
        let entry = match self.pinned.remove(key) {
            Some(entry) => {
                self.pinned_cost -= entry.cost;
                Some(entry)
            }
            None => self.lru.pop(key),
        };
        if let Some(entry) = &entry {
            self.total_cost -= entry.cost;
        }
        entry
    }
}

/// In-memory cache for decoded images, bounded by count and cost.
///
/// Eviction is least-recently-used and skips pinned entries. An image that
/// cannot fit next to the pinned set is refused rather than stored.
pub struct MemoryImageCache {
    state: Mutex<State>,
    config: MemoryCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the given bounds.
    #[must_use]
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            state: Mutex::new(State {
                lru: LruCache::unbounded(),
                pinned: HashMap::new(),
                pinned_keys: HashSet::new(),
                total_cost: 0,
                pinned_cost: 0,
            }),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default bounds.
    #[must_use]
    pub fn with_default_limits() -> Self {
        Self::new(MemoryCacheConfig::default())
    }

    /// Returns the configured bounds.
    #[must_use]
    pub const fn config(&self) -> MemoryCacheConfig {
        self.config
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let state = self.state.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: state.len(),
            cost: state.total_cost,
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        let state = self.state.lock();
        if let Some(entry) = state.pinned.get(key) {
            return Some(entry.image.clone());
        }
        state
            .lru
            .peek(key)
            .filter(|entry| !entry.is_expired(self.config.expiration))
            .map(|entry| entry.image.clone())
    }

    /// Returns true if `key` is stored and not expired.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.peek(key).is_some()
    }

    /// Summed cost of every stored entry.
    pub fn total_cost(&self) -> u64 {
        self.state.lock().total_cost
    }

    /// Protects `key` from eviction. Works for keys not stored yet.
    pub fn pin(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        if !state.pinned_keys.insert(key.clone()) {
            return;
        }
        if let Some(entry) = state.lru.pop(key) {
            state.pinned_cost += entry.cost;
            state.pinned.insert(key.clone(), entry);
        }
        trace!(key = %key, "Pinned memory cache entry");
    }

    /// Makes `key` evictable again.
    pub fn unpin(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        if !state.pinned_keys.remove(key) {
            return;
        }
        if let Some(entry) = state.pinned.remove(key) {
            state.pinned_cost -= entry.cost;
            state.lru.put(key.clone(), entry);
        }
        trace!(key = %key, "Unpinned memory cache entry");
    }

    /// Drops every entry that has outlived the expiration. Returns how many.
    pub fn remove_expired(&self) -> usize {
        let Some(ttl) = self.config.expiration else {
            return 0;
        };
        let mut state = self.state.lock();
        let expired: Vec<CacheKey> = state
            .lru
            .iter()
            .filter(|(_, entry)| entry.last_access.elapsed() > ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.take(key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired memory cache entries");
        }
        expired.len()
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_limits()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Current summed cost in bytes.
    pub cost: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} bytes), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.cost, self.hit_rate, self.hits, self.misses
        )
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        let expiration = self.config.expiration;
        let mut state = self.state.lock();

        let expired = match state.pinned.get_mut(key) {
            Some(entry) => {
                entry.last_access = Instant::now();
                false
            }
            None => state
                .lru
                .peek(key)
                .is_some_and(|entry| entry.is_expired(expiration)),
        };
        if expired {
            state.take(key);
            trace!(key = %key, "Memory cache entry expired");
        }

        let found = state.pinned.get(key).map(|entry| entry.image.clone()).or_else(|| {
            state.lru.get_mut(key).map(|entry| {
                entry.last_access = Instant::now();
                entry.image.clone()
            })
        });
        drop(state);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
        }
        found
    }

    fn put(&self, key: CacheKey, image: Arc<DecodedImage>) -> bool {
        let entry = Entry::new(image);
        let mut state = self.state.lock();
        state.take(&key);

        let pinned = state.pinned_keys.contains(&key);
        let pinned_count = state.pinned.len() + 1;
        if entry.cost > self.config.cost_limit
            || state.pinned_cost + entry.cost > self.config.cost_limit
            || pinned_count > self.config.count_limit
        {
            debug!(
                key = %key,
                cost = entry.cost,
                limit = self.config.cost_limit,
                "Refused image that cannot fit in memory cache"
            );
            return false;
        }

        while state.len() + 1 > self.config.count_limit
            || state.total_cost + entry.cost > self.config.cost_limit
        {
            let Some((evicted, old)) = state.lru.pop_lru() else {
                break;
            };
            state.total_cost -= old.cost;
            trace!(key = %evicted, "Evicted image from memory cache");
        }

        state.total_cost += entry.cost;
        if pinned {
            state.pinned_cost += entry.cost;
            state.pinned.insert(key.clone(), entry);
        } else {
            state.lru.put(key.clone(), entry);
        }
        debug!(key = %key, pinned, "Stored image in memory cache");
        true
    }

    fn remove(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        let removed = self.state.lock().take(key).map(|entry| entry.image);
        if removed.is_some() {
            debug!(key = %key, "Removed image from memory cache");
        }
        removed
    }

    fn len(&self) -> usize {
        self.state.lock().len()
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.lru.clear();
        state.pinned.clear();
        state.total_cost = 0;
        state.pinned_cost = 0;
        debug!("Cleared memory image cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::TransformPipeline;

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(name, &TransformPipeline::new())
    }

    // 10x10 RGBA = 400 bytes
    fn image() -> Arc<DecodedImage> {
        Arc::new(DecodedImage::still(image::DynamicImage::new_rgba8(10, 10)))
    }

    fn cache(count_limit: usize, cost_limit: u64) -> MemoryImageCache {
        MemoryImageCache::new(MemoryCacheConfig {
            count_limit,
            cost_limit,
            expiration: None,
        })
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = cache(10, 10_000);
        assert!(cache.put(key("a"), image()));
        let retrieved = cache.get(&key("a"));
        assert_eq!(retrieved.map(|img| img.width()), Some(10));
    }

    #[test]
    fn test_cache_miss() {
        let cache = cache(10, 10_000);
        assert!(cache.get(&key("missing")).is_none());
    }

    #[test]
    fn test_count_eviction_is_lru() {
        let cache = cache(2, 10_000);
        cache.put(key("a"), image());
        cache.put(key("b"), image());
        let _ = cache.get(&key("a"));
        cache.put(key("c"), image());

        assert!(cache.peek(&key("a")).is_some());
        assert!(cache.peek(&key("b")).is_none());
        assert!(cache.peek(&key("c")).is_some());
    }

    #[test]
    fn test_cost_bound_never_exceeded() {
        let cache = cache(100, 1000);
        for i in 0..10 {
            cache.put(key(&format!("img{i}")), image());
            assert!(cache.total_cost() <= 1000);
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_oversized_entry_refused() {
        let cache = cache(10, 399);
        assert!(!cache.put(key("a"), image()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_pinned_entries_survive_eviction() {
        let cache = cache(2, 10_000);
        cache.put(key("a"), image());
        cache.pin(&key("a"));
        cache.put(key("b"), image());
        cache.put(key("c"), image());

        assert!(cache.peek(&key("a")).is_some());
        assert!(cache.peek(&key("b")).is_none());
        assert!(cache.peek(&key("c")).is_some());
    }

    #[test]
    fn test_insert_refused_when_pinned_fill_cache() {
        let cache = cache(10, 800);
        cache.pin(&key("a"));
        cache.pin(&key("b"));
        assert!(cache.put(key("a"), image()));
        assert!(cache.put(key("b"), image()));
        assert!(!cache.put(key("c"), image()));
        assert_eq!(cache.len(), 2);

        cache.unpin(&key("a"));
        assert!(cache.put(key("c"), image()));
        assert!(cache.peek(&key("a")).is_none());
        assert!(cache.total_cost() <= 800);
    }

    #[test]
    fn test_cache_stats() {
        let cache = cache(10, 10_000);
        cache.put(key("a"), image());
        let _ = cache.get(&key("a"));
        let _ = cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.cost, 400);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = cache(2, 10_000);
        cache.put(key("a"), image());
        cache.put(key("b"), image());
        let _ = cache.peek(&key("a"));
        cache.put(key("c"), image());

        assert!(cache.peek(&key("a")).is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = cache(10, 10_000);
        cache.put(key("a"), image());
        cache.put(key("b"), image());
        assert!(cache.remove(&key("a")).is_some());
        assert!(cache.remove(&key("a")).is_none());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_expired_entries_dropped_on_access() {
        let cache = MemoryImageCache::new(MemoryCacheConfig {
            count_limit: 10,
            cost_limit: 10_000,
            expiration: Some(Duration::from_millis(20)),
        });
        cache.put(key("a"), image());
        std::thread::sleep(Duration::from_millis(50));

        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_replacing_key_keeps_cost_accurate() {
        let cache = cache(10, 10_000);
        cache.put(key("a"), image());
        cache.put(key("a"), image());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 400);
    }
}
