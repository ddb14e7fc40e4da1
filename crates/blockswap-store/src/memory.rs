//! In-memory block store.

use dashmap::DashMap;

use blockswap_types::{Block, Key};

use crate::BlockStore;

/// Concurrent in-memory block store.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<Key, Block>,
}

impl MemoryBlockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when the store holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Snapshot of all stored keys.
    pub fn all_keys(&self) -> Vec<Key> {
        self.blocks.iter().map(|r| r.key().clone()).collect()
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, key: &Key) -> Option<Block> {
        self.blocks.get(key).map(|r| r.value().clone())
    }

    fn put(&self, block: Block) -> bool {
        self.blocks.insert(block.key().clone(), block).is_none()
    }

    fn has(&self, key: &Key) -> bool {
        self.blocks.contains_key(key)
    }
}
