//! The want manager: a single actor owning the outbound wantlist and the
//! per-peer message queues.
//!
//! Local wants and cancels, peer lifecycle events, and the rebroadcast timer
//! all funnel through one select loop, which is what gives per-key ordering
//! (a want followed by a cancel reaches every peer in that order). Only
//! entries that physically change the wantlist are forwarded as diffs; new
//! peers are seeded with the full wantlist instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use blockswap_net::{Network, WantEntry};
use blockswap_types::{Key, PeerId, ThreadSafeWantlist, WantlistEntry};

use crate::config::ExchangeConfig;
use crate::msgqueue::MessageQueue;
use crate::{RequestContext, MAX_PRIORITY};

/// Channel depth for actor inputs.
const CHANNEL_DEPTH: usize = 10;

/// Handle to the want manager actor.
pub struct WantManager {
    incoming_tx: mpsc::Sender<Vec<WantEntry>>,
    connect_tx: mpsc::Sender<PeerId>,
    disconnect_tx: mpsc::Sender<PeerId>,
    peer_reqs_tx: mpsc::Sender<oneshot::Sender<Vec<PeerId>>>,
    wantlist: Arc<ThreadSafeWantlist>,
    token: CancellationToken,
}

impl WantManager {
    /// Spawn the actor; it stops when `parent` is cancelled.
    pub fn new(
        network: Arc<dyn Network>,
        config: &ExchangeConfig,
        parent: &CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (connect_tx, connect_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (peer_reqs_tx, peer_reqs_rx) = mpsc::channel(CHANNEL_DEPTH);
        let wantlist = Arc::new(ThreadSafeWantlist::new());
        let token = parent.child_token();

        let actor = Actor {
            incoming_rx,
            connect_rx,
            disconnect_rx,
            peer_reqs_rx,
            peers: HashMap::new(),
            wantlist: wantlist.clone(),
            network,
            rebroadcast_interval: config.rebroadcast_interval,
            connect_timeout: config.connect_timeout,
            token: token.clone(),
        };
        let handle = tokio::spawn(actor.run());

        let manager = Arc::new(Self {
            incoming_tx,
            connect_tx,
            disconnect_tx,
            peer_reqs_tx,
            wantlist,
            token,
        });
        (manager, handle)
    }

    /// Add `keys` to the outbound wantlist and broadcast the diff.
    pub async fn want_blocks(&self, ctx: &RequestContext, keys: &[Key]) {
        debug!(count = keys.len(), "Want blocks");
        self.add_entries(keys, false, Some(ctx)).await;
    }

    /// Remove `keys` from the outbound wantlist and broadcast cancels.
    pub async fn cancel_wants(&self, keys: &[Key]) {
        debug!(count = keys.len(), "Cancel wants");
        self.add_entries(keys, true, None).await;
    }

    async fn add_entries(&self, keys: &[Key], cancel: bool, ctx: Option<&RequestContext>) {
        let entries: Vec<WantEntry> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| WantEntry {
                entry: WantlistEntry::new(key.clone(), MAX_PRIORITY - i as i32),
                cancel,
            })
            .collect();
        if entries.is_empty() {
            return;
        }
        match ctx {
            Some(ctx) => {
                tokio::select! {
                    _ = self.incoming_tx.send(entries) => {}
                    _ = ctx.done() => {}
                    _ = self.token.cancelled() => {}
                }
            }
            None => {
                tokio::select! {
                    _ = self.incoming_tx.send(entries) => {}
                    _ = self.token.cancelled() => {}
                }
            }
        }
    }

    /// Report a peer connection.
    pub async fn connected(&self, peer: PeerId) {
        tokio::select! {
            _ = self.connect_tx.send(peer) => {}
            _ = self.token.cancelled() => {}
        }
    }

    /// Report a peer disconnection.
    pub async fn disconnected(&self, peer: PeerId) {
        tokio::select! {
            _ = self.disconnect_tx.send(peer) => {}
            _ = self.token.cancelled() => {}
        }
    }

    /// Snapshot of the currently connected peer set.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let (tx, rx) = oneshot::channel();
        tokio::select! {
            _ = self.peer_reqs_tx.send(tx) => {}
            _ = self.token.cancelled() => return Vec::new(),
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshot of the outbound wantlist.
    pub fn wantlist_entries(&self) -> Vec<WantlistEntry> {
        self.wantlist.entries()
    }

    /// True while `key` is wanted.
    pub fn wants(&self, key: &Key) -> bool {
        self.wantlist.contains(key).is_some()
    }
}

struct QueueEntry {
    queue: Arc<MessageQueue>,
    refcnt: u32,
}

struct Actor {
    incoming_rx: mpsc::Receiver<Vec<WantEntry>>,
    connect_rx: mpsc::Receiver<PeerId>,
    disconnect_rx: mpsc::Receiver<PeerId>,
    peer_reqs_rx: mpsc::Receiver<oneshot::Sender<Vec<PeerId>>>,
    peers: HashMap<PeerId, QueueEntry>,
    wantlist: Arc<ThreadSafeWantlist>,
    network: Arc<dyn Network>,
    rebroadcast_interval: Duration,
    connect_timeout: Duration,
    token: CancellationToken,
}

impl Actor {
    async fn run(mut self) {
        let mut rebroadcast = tokio::time::interval(self.rebroadcast_interval);
        // the immediate first tick is a no-op rebroadcast
        rebroadcast.tick().await;
        loop {
            tokio::select! {
                Some(entries) = self.incoming_rx.recv() => self.handle_incoming(entries),
                Some(peer) = self.connect_rx.recv() => self.handle_connect(peer),
                Some(peer) = self.disconnect_rx.recv() => self.handle_disconnect(peer),
                Some(reply) = self.peer_reqs_rx.recv() => {
                    let _ = reply.send(self.peers.keys().cloned().collect());
                }
                _ = rebroadcast.tick() => self.handle_rebroadcast(),
                _ = self.token.cancelled() => break,
            }
        }
        for (_, entry) in self.peers.drain() {
            entry.queue.close();
        }
        trace!("Want manager stopped");
    }

    fn handle_incoming(&mut self, entries: Vec<WantEntry>) {
        // only physical wantlist changes are forwarded to peers
        let mut filtered = Vec::new();
        for entry in entries {
            if entry.cancel {
                if self.wantlist.remove(&entry.entry.key) {
                    filtered.push(entry);
                }
            } else if self.wantlist.add_entry(entry.entry.clone()) {
                filtered.push(entry);
            }
        }
        if filtered.is_empty() {
            return;
        }
        for queue in self.peers.values() {
            queue.queue.add_message(&filtered, false);
        }
    }

    fn handle_connect(&mut self, peer: PeerId) {
        if let Some(entry) = self.peers.get_mut(&peer) {
            // peers may connect over several transports at once
            entry.refcnt += 1;
            return;
        }
        debug!(peer = %peer, "Starting peer queue");
        let queue = MessageQueue::new(
            peer.clone(),
            self.network.clone(),
            self.connect_timeout,
            &self.token,
        );
        queue.set_full_wantlist(&self.wantlist.entries());
        tokio::spawn(queue.clone().run());
        self.peers.insert(peer, QueueEntry { queue, refcnt: 1 });
    }

    fn handle_disconnect(&mut self, peer: PeerId) {
        let Some(entry) = self.peers.get_mut(&peer) else {
            return;
        };
        entry.refcnt -= 1;
        if entry.refcnt > 0 {
            return;
        }
        debug!(peer = %peer, "Stopping peer queue");
        if let Some(entry) = self.peers.remove(&peer) {
            entry.queue.close();
        }
    }

    fn handle_rebroadcast(&mut self) {
        if self.peers.is_empty() {
            return;
        }
        // peers that never observed earlier diffs converge on the full list
        trace!(peers = self.peers.len(), "Rebroadcasting full wantlist");
        let entries = self.wantlist.entries();
        for queue in self.peers.values() {
            queue.queue.set_full_wantlist(&entries);
        }
    }
}
