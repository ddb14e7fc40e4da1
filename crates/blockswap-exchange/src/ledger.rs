//! Per-peer exchange accounting.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use blockswap_types::{Key, PeerId, Wantlist, WantlistEntry};

/// Accounting for the data exchange relationship with one peer.
///
/// Not internally synchronized; the decision engine owns every ledger behind
/// its own lock. Ledgers are created lazily when a peer first appears in
/// engine inputs and retained for the engine's life.
#[derive(Debug)]
pub struct Ledger {
    partner: PeerId,
    bytes_sent: u64,
    bytes_recv: u64,
    exchange_count: u64,
    first_exchange: Option<Instant>,
    last_exchange: Option<Instant>,
    want_list: Wantlist,
    sent_to_peer: HashMap<Key, Instant>,
}

impl Ledger {
    /// A fresh ledger for `partner`.
    pub fn new(partner: PeerId) -> Self {
        Self {
            partner,
            bytes_sent: 0,
            bytes_recv: 0,
            exchange_count: 0,
            first_exchange: None,
            last_exchange: None,
            want_list: Wantlist::new(),
            sent_to_peer: HashMap::new(),
        }
    }

    /// The remote peer this ledger tracks.
    pub fn partner(&self) -> &PeerId {
        &self.partner
    }

    /// `sent / (recv + 1)`: how much more we have given than received.
    pub fn debt_ratio(&self) -> f64 {
        self.bytes_sent as f64 / (self.bytes_recv + 1) as f64
    }

    /// Account an outbound transfer of `n` bytes.
    pub fn sent_bytes(&mut self, n: usize) {
        self.exchanged();
        self.bytes_sent += n as u64;
    }

    /// Account an inbound transfer of `n` bytes.
    pub fn received_bytes(&mut self, n: usize) {
        self.exchanged();
        self.bytes_recv += n as u64;
    }

    fn exchanged(&mut self) {
        let now = Instant::now();
        self.first_exchange.get_or_insert(now);
        self.last_exchange = Some(now);
        self.exchange_count += 1;
    }

    /// Record that the peer wants `key` at `priority`.
    pub fn wants(&mut self, key: Key, priority: i32) {
        self.want_list.add(key, priority);
    }

    /// Drop `key` from the peer's wantlist; true on physical removal.
    pub fn cancel_want(&mut self, key: &Key) -> bool {
        self.want_list.remove(key)
    }

    /// The peer's want entry for `key`, if any.
    pub fn want_entry(&self, key: &Key) -> Option<&WantlistEntry> {
        self.want_list.contains(key)
    }

    /// Keys the peer currently wants, highest priority first.
    pub fn wantlist_keys(&self) -> Vec<Key> {
        self.want_list
            .sorted_entries()
            .into_iter()
            .map(|e| e.key)
            .collect()
    }

    /// Record that `key` was transmitted to the peer.
    pub fn mark_sent(&mut self, key: Key) {
        self.sent_to_peer.insert(key, Instant::now());
    }

    /// True if `key` was transmitted and the peer has not re-wanted it
    /// since cancelling.
    pub fn already_sent(&self, key: &Key) -> bool {
        self.sent_to_peer.contains_key(key)
    }

    /// Forget that `key` was transmitted (the peer cancelled it).
    pub fn clear_sent(&mut self, key: &Key) {
        self.sent_to_peer.remove(key);
    }

    /// Total bytes sent to the peer.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total bytes received from the peer.
    pub fn bytes_recv(&self) -> u64 {
        self.bytes_recv
    }

    /// Number of accounted transfers in either direction.
    pub fn exchange_count(&self) -> u64 {
        self.exchange_count
    }

    /// Snapshot for introspection.
    pub fn receipt(&self) -> Receipt {
        Receipt {
            peer: self.partner.clone(),
            value: self.debt_ratio(),
            sent: self.bytes_sent,
            recv: self.bytes_recv,
            exchanged: self.exchange_count,
        }
    }
}

/// Point-in-time view of a peer's ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// The remote peer.
    pub peer: PeerId,
    /// Debt ratio `sent / (recv + 1)`.
    pub value: f64,
    /// Bytes sent to the peer.
    pub sent: u64,
    /// Bytes received from the peer.
    pub recv: u64,
    /// Number of accounted transfers.
    pub exchanged: u64,
}
