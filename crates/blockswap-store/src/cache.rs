//! Caching block store wrapper.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use blockswap_types::{Block, Key};

use crate::{BlockStore, CacheStats};

/// Default number of blocks kept in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// LRU read-through cache over another block store.
///
/// `get` and `has` are answered from the cache when possible; misses fall
/// through to the inner store and warm the cache. Hit/total counters are
/// reported via [`BlockStore::cache_stats`] and end up in the exchange's
/// stat snapshot.
pub struct CachedBlockStore<S> {
    inner: S,
    cache: Mutex<LruCache<Key, Block>>,
    hits: AtomicU64,
    total: AtomicU64,
}

impl<S: BlockStore> CachedBlockStore<S> {
    /// Wrap `inner` with a cache of `capacity` blocks.
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Wrap `inner` with the default cache capacity.
    pub fn with_defaults(inner: S) -> Self {
        Self::new(inner, DEFAULT_CACHE_CAPACITY)
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: BlockStore> BlockStore for CachedBlockStore<S> {
    fn get(&self, key: &Key) -> Option<Block> {
        self.total.fetch_add(1, Ordering::Relaxed);
        if let Some(block) = self.cache.lock().get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(block.clone());
        }
        let block = self.inner.get(key)?;
        self.cache.lock().put(key.clone(), block.clone());
        Some(block)
    }

    fn put(&self, block: Block) -> bool {
        let newly = self.inner.put(block.clone());
        self.cache.lock().put(block.key().clone(), block);
        newly
    }

    fn has(&self, key: &Key) -> bool {
        self.total.fetch_add(1, Ordering::Relaxed);
        if self.cache.lock().contains(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        self.inner.has(key)
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        Some(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            lookups: self.total.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlockStore;

    #[test]
    fn test_cache_counts_hits() {
        let store = CachedBlockStore::new(MemoryBlockStore::new(), 8);
        let block = Block::new(b"cached".to_vec());

        store.put(block.clone());
        assert!(store.has(block.key()));
        assert_eq!(store.get(block.key()).unwrap(), block);

        let stats = store.cache_stats().unwrap();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hits, 2);
    }

    #[test]
    fn test_cache_miss_falls_through() {
        let inner = MemoryBlockStore::new();
        let block = Block::new(b"deep".to_vec());
        inner.put(block.clone());

        let store = CachedBlockStore::new(inner, 8);
        assert_eq!(store.get(block.key()).unwrap(), block);
        assert_eq!(store.cache_stats().unwrap().hits, 0);
        // the miss warmed the cache
        assert!(store.has(block.key()));
        assert_eq!(store.cache_stats().unwrap().hits, 1);
    }

    #[test]
    fn test_cache_eviction() {
        let store = CachedBlockStore::new(MemoryBlockStore::new(), 1);
        let a = Block::new(b"a".to_vec());
        let b = Block::new(b"b".to_vec());

        store.put(a.clone());
        store.put(b.clone());

        // `a` was evicted from the cache but survives in the inner store
        assert_eq!(store.get(a.key()).unwrap(), a);
    }
}
