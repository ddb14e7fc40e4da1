//! Test data generators for integration tests.

use std::sync::atomic::{AtomicU64, Ordering};

use blockswap_types::{Block, Key, PeerId};

/// Global counter for unique data generation.
static DATA_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Deterministic generator of distinct blocks.
#[derive(Debug, Default)]
pub struct BlockGenerator {
    counter: AtomicU64,
}

impl BlockGenerator {
    /// A fresh generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The next distinct block.
    pub fn next_block(&self) -> Block {
        let serial = self.counter.fetch_add(1, Ordering::SeqCst);
        let unique = DATA_COUNTER.fetch_add(1, Ordering::SeqCst);
        Block::new(format!("block-{serial}-{unique}").into_bytes())
    }

    /// The next `n` distinct blocks.
    pub fn blocks(&self, n: usize) -> Vec<Block> {
        (0..n).map(|_| self.next_block()).collect()
    }
}

/// A block with exactly `len` bytes of payload, distinct per call.
pub fn sized_block(len: usize) -> Block {
    let unique = DATA_COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut data = unique.to_be_bytes().to_vec();
    data.resize(len, 0xAB);
    Block::new(data)
}

/// A deterministic test key.
pub fn test_key(seed: u8) -> Key {
    let mut bytes = vec![0u8; 32];
    bytes[0] = seed;
    bytes[31] = seed.wrapping_mul(7);
    Key::from_bytes(bytes)
}

/// A deterministic test peer ID.
pub fn test_peer(seed: u8) -> PeerId {
    let mut bytes = vec![0u8; 8];
    bytes[0] = 0xEE; // peer marker
    bytes[1] = seed;
    PeerId::from_bytes(bytes)
}
