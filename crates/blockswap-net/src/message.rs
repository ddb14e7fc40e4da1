//! The exchange wire message.

use std::collections::HashMap;

use bytes::Bytes;
use prost::Message as _;

use blockswap_types::{Block, Key, WantlistEntry};

use crate::pb;
use crate::{NetworkError, NetworkResult};

/// A wantlist change carried by a message: either "I want this key at this
/// priority" or, with `cancel` set, "remove this key from my wantlist".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantEntry {
    /// The wantlist entry being asserted or withdrawn.
    pub entry: WantlistEntry,
    /// True to withdraw the key.
    pub cancel: bool,
}

impl WantEntry {
    /// A want for `key` at `priority`.
    pub fn want(key: Key, priority: i32) -> Self {
        Self {
            entry: WantlistEntry::new(key, priority),
            cancel: false,
        }
    }

    /// A cancel for `key`.
    pub fn cancel(key: Key) -> Self {
        Self {
            entry: WantlistEntry::new(key, 0),
            cancel: true,
        }
    }
}

/// One logical message between two exchange peers.
///
/// Holds at most one want entry per key; adding an entry for a key that is
/// already present overrides it, which is what lets the per-peer queue
/// coalesce rapid wantlist churn into a single pending message.
#[derive(Debug, Clone, Default)]
pub struct BlockMessage {
    full: bool,
    wants: HashMap<Key, WantEntry>,
    blocks: Vec<Block>,
}

impl BlockMessage {
    /// Create an empty message; `full` marks the wantlist as complete.
    pub fn new(full: bool) -> Self {
        Self {
            full,
            ..Self::default()
        }
    }

    /// Whether the wantlist should replace (rather than merge into) the
    /// receiver's view of the sender's wantlist.
    pub fn full(&self) -> bool {
        self.full
    }

    /// Set the full-wantlist flag.
    pub fn set_full(&mut self, full: bool) {
        self.full = full;
    }

    /// Record a want for `key`, overriding any prior entry for it.
    pub fn add_entry(&mut self, key: Key, priority: i32) {
        self.wants
            .insert(key.clone(), WantEntry::want(key, priority));
    }

    /// Record a cancel for `key`, overriding any prior entry for it.
    pub fn cancel(&mut self, key: Key) {
        self.wants.insert(key.clone(), WantEntry::cancel(key));
    }

    /// Attach a block.
    pub fn add_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// The carried wantlist changes, in no particular order.
    pub fn wantlist(&self) -> Vec<WantEntry> {
        self.wants.values().cloned().collect()
    }

    /// The carried blocks.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// True when the message carries neither wants nor blocks.
    pub fn is_empty(&self) -> bool {
        self.wants.is_empty() && self.blocks.is_empty()
    }

    /// Encode to the protobuf payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let wants = self
            .wants
            .values()
            .map(|w| pb::wire_message::WantEntry {
                key: w.entry.key.as_bytes().to_vec(),
                priority: w.entry.priority,
                cancel: w.cancel,
            })
            .collect();
        let blocks = self
            .blocks
            .iter()
            .map(|b| pb::wire_message::WireBlock {
                key: b.key().as_bytes().to_vec(),
                data: b.data().to_vec(),
            })
            .collect();
        pb::WireMessage {
            full: self.full,
            wants,
            blocks,
        }
        .encode_to_vec()
    }

    /// Decode from the protobuf payload.
    pub fn from_bytes(bytes: Bytes) -> NetworkResult<Self> {
        let wire = pb::WireMessage::decode(bytes)?;
        let mut msg = BlockMessage::new(wire.full);
        for want in wire.wants {
            if want.key.is_empty() {
                return Err(NetworkError::InvalidMessage(
                    "empty key in want entry".to_string(),
                ));
            }
            let key = Key::from_bytes(want.key);
            if want.cancel {
                msg.cancel(key);
            } else {
                msg.add_entry(key, want.priority);
            }
        }
        for block in wire.blocks {
            if block.key.is_empty() {
                return Err(NetworkError::InvalidMessage(
                    "empty key in block".to_string(),
                ));
            }
            msg.add_block(Block::with_key(Key::from_bytes(block.key), block.data));
        }
        Ok(msg)
    }
}
