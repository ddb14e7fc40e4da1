//! # blockswap-store
//!
//! Block storage for the blockswap exchange.
//!
//! This crate provides:
//! - The [`BlockStore`] trait consumed by the exchange core
//! - [`MemoryBlockStore`], a concurrent in-memory implementation
//! - [`CachedBlockStore`], an LRU wrapper that counts cache hits

mod cache;
mod memory;

pub use cache::{CachedBlockStore, DEFAULT_CACHE_CAPACITY};
pub use memory::MemoryBlockStore;

use blockswap_types::{Block, Key};

/// Hit/total counters reported by caching store wrappers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Total lookups.
    pub lookups: u64,
}

/// Storage abstraction for content-addressed blocks.
///
/// Implementations provide their own concurrency safety; the exchange calls
/// these methods from multiple tasks.
pub trait BlockStore: Send + Sync {
    /// Fetch a block by key.
    fn get(&self, key: &Key) -> Option<Block>;

    /// Insert a block. Returns true when the block was not already present.
    fn put(&self, block: Block) -> bool;

    /// Check whether a key is present.
    fn has(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Cache counters, for stores that wrap one.
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }
}
