//! Exchange statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use blockswap_types::{Key, PeerId};

/// Internal activity counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub blocks_received: AtomicU64,
    pub data_received: AtomicU64,
    pub dup_blks_received: AtomicU64,
    pub dup_data_received: AtomicU64,
    pub blocks_sent: AtomicU64,
    pub data_sent: AtomicU64,
    pub provide_buf_len: AtomicUsize,
}

impl Counters {
    pub fn incoming_unique(&self, bytes: u64) {
        self.blocks_received.fetch_add(1, Ordering::Relaxed);
        self.data_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn incoming_duplicate(&self, bytes: u64) {
        self.dup_blks_received.fetch_add(1, Ordering::Relaxed);
        self.dup_data_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn outgoing(&self, bytes: u64) {
        self.blocks_sent.fetch_add(1, Ordering::Relaxed);
        self.data_sent.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of exchange activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stat {
    /// Current depth of the provide announcement queue.
    pub provide_buf_len: usize,
    /// Unique blocks received from peers.
    pub blocks_received: u64,
    /// Bytes of unique blocks received.
    pub data_received: u64,
    /// Blocks received that were already held locally.
    pub dup_blks_received: u64,
    /// Bytes of duplicate blocks received.
    pub dup_data_received: u64,
    /// Blocks sent to peers.
    pub blocks_sent: u64,
    /// Bytes of blocks sent.
    pub data_sent: u64,
    /// Store-cache lookups answered from the cache; zero when the store has
    /// no cache wrapper.
    pub cache_hits: u64,
    /// Total store-cache lookups; zero when the store has no cache wrapper.
    pub cache_lookups: u64,
    /// Keys currently wanted.
    pub wantlist: Vec<Key>,
    /// Peers the decision engine is tracking.
    pub peers: Vec<PeerId>,
}
