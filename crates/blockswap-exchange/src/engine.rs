//! Decision engine: chooses which locally-held blocks to send to which
//! peers, in what order.
//!
//! The engine consumes inbound wantlists, peer lifecycle events, and local
//! block arrivals, and produces a stream of [`Envelope`]s. Selection is
//! round-robin across peers with eligible work; within a peer, tasks go out
//! in descending priority with FIFO ties. At most one envelope per peer is
//! outstanding at a time: the next one is withheld until the consumer
//! acknowledges the previous via [`Envelope::complete`], which is the
//! backpressure hook.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use blockswap_net::{BlockMessage, NetworkError};
use blockswap_store::BlockStore;
use blockswap_types::{Block, Key, PeerId};

use crate::ledger::{Ledger, Receipt};

/// A queued send of one key to one peer.
#[derive(Debug, Clone)]
struct Task {
    key: Key,
    priority: i32,
    retried: bool,
}

/// Per-peer send queue: descending priority, FIFO within a priority,
/// retries at the front.
#[derive(Debug, Default)]
struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    fn push(&mut self, task: Task) {
        let pos = self
            .tasks
            .iter()
            .position(|t| t.priority < task.priority)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(pos, task);
    }

    fn push_front(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    fn remove(&mut self, key: &Key) {
        self.tasks.retain(|t| &t.key != key);
    }

    fn contains(&self, key: &Key) -> bool {
        self.tasks.iter().any(|t| &t.key == key)
    }

    fn clear(&mut self) {
        self.tasks.clear();
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug)]
struct PeerState {
    ledger: Ledger,
    queue: TaskQueue,
    /// An envelope for this peer is out with a consumer, unacknowledged.
    in_flight: bool,
    /// The peer is currently queued in the round-robin rotation.
    in_rotation: bool,
    connected: bool,
}

impl PeerState {
    fn new(peer: PeerId) -> Self {
        Self {
            ledger: Ledger::new(peer),
            queue: TaskQueue::default(),
            in_flight: false,
            in_rotation: false,
            connected: true,
        }
    }
}

#[derive(Default)]
struct EngineState {
    peers: HashMap<PeerId, PeerState>,
    rotation: VecDeque<PeerId>,
}

impl EngineState {
    fn peer_mut(&mut self, peer: &PeerId) -> &mut PeerState {
        self.peers
            .entry(peer.clone())
            .or_insert_with(|| PeerState::new(peer.clone()))
    }

    /// Put `peer` back into the rotation if it has dispatchable work.
    fn rotate_if_ready(&mut self, peer: &PeerId) {
        let Some(ps) = self.peers.get_mut(peer) else {
            return;
        };
        if ps.connected && !ps.in_flight && !ps.in_rotation && !ps.queue.is_empty() {
            ps.in_rotation = true;
            self.rotation.push_back(peer.clone());
        }
    }
}

struct EngineInner {
    store: Arc<dyn BlockStore>,
    state: Mutex<EngineState>,
    work: Notify,
}

/// The decision engine. Cheap to clone; all clones share one state behind
/// one lock. The outbox is the async [`Engine::next_envelope`], gated on a
/// [`Notify`].
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// An engine serving blocks out of `store`.
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                state: Mutex::new(EngineState::default()),
                work: Notify::new(),
            }),
        }
    }

    /// Process a message from `from`: wantlist changes update the peer's
    /// ledger and task queue, carried blocks are accounted as received
    /// bytes.
    pub fn message_received(&self, from: &PeerId, msg: &BlockMessage) {
        let mut state = self.inner.state.lock();
        let ps = state.peer_mut(from);
        for want in msg.wantlist() {
            let key = want.entry.key;
            if want.cancel {
                trace!(peer = %from, key = %key, "Peer cancelled want");
                ps.ledger.cancel_want(&key);
                ps.queue.remove(&key);
                ps.ledger.clear_sent(&key);
            } else {
                ps.ledger.wants(key.clone(), want.entry.priority);
                if ps.ledger.already_sent(&key) {
                    continue;
                }
                if self.inner.store.has(&key) {
                    ps.queue.remove(&key);
                    ps.queue.push(Task {
                        key,
                        priority: want.entry.priority,
                        retried: false,
                    });
                }
            }
        }
        for block in msg.blocks() {
            ps.ledger.received_bytes(block.len());
        }
        state.rotate_if_ready(from);
        self.inner.work.notify_one();
    }

    /// A block entered the local store: queue it for every peer that wants
    /// it.
    pub fn add_block(&self, block: &Block) {
        let mut state = self.inner.state.lock();
        let mut ready = Vec::new();
        for (peer, ps) in state.peers.iter_mut() {
            let Some(entry) = ps.ledger.want_entry(block.key()) else {
                continue;
            };
            if ps.ledger.already_sent(block.key()) || ps.queue.contains(block.key()) {
                continue;
            }
            ps.queue.push(Task {
                key: block.key().clone(),
                priority: entry.priority,
                retried: false,
            });
            ready.push(peer.clone());
        }
        for peer in ready {
            state.rotate_if_ready(&peer);
        }
        self.inner.work.notify_one();
    }

    /// A peer connected (ledger created lazily on first contact).
    pub fn peer_connected(&self, peer: &PeerId) {
        let mut state = self.inner.state.lock();
        state.peer_mut(peer).connected = true;
        state.rotate_if_ready(peer);
        self.inner.work.notify_one();
    }

    /// A peer disconnected: its task queue drains, its ledger is retained.
    pub fn peer_disconnected(&self, peer: &PeerId) {
        let mut state = self.inner.state.lock();
        if let Some(ps) = state.peers.get_mut(peer) {
            ps.connected = false;
            ps.queue.clear();
        }
    }

    /// The next scheduled send. Suspends until a task is eligible.
    pub async fn next_envelope(&self) -> Envelope {
        loop {
            let notified = self.inner.work.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(envelope) = self.try_next_envelope() {
                return envelope;
            }
            notified.await;
        }
    }

    fn try_next_envelope(&self) -> Option<Envelope> {
        let mut state = self.inner.state.lock();
        let state = &mut *state;
        while let Some(peer) = state.rotation.pop_front() {
            let Some(ps) = state.peers.get_mut(&peer) else {
                continue;
            };
            ps.in_rotation = false;
            if ps.in_flight || !ps.connected {
                continue;
            }
            while let Some(task) = ps.queue.pop() {
                // a task is eligible only while the peer still wants the key,
                // we have not already sent it, and the store still has it
                if ps.ledger.want_entry(&task.key).is_none() {
                    continue;
                }
                if ps.ledger.already_sent(&task.key) {
                    continue;
                }
                let Some(block) = self.inner.store.get(&task.key) else {
                    continue;
                };
                ps.in_flight = true;
                trace!(peer = %peer, key = %task.key, "Dispatching envelope");
                return Some(Envelope {
                    peer,
                    block,
                    task,
                    engine: self.clone(),
                    acked: false,
                });
            }
            // queue drained; the peer re-enters the rotation with new work
        }
        None
    }

    fn finish(&self, peer: &PeerId, task: &Task, block_len: usize, ok: bool) {
        let mut state = self.inner.state.lock();
        let Some(ps) = state.peers.get_mut(peer) else {
            return;
        };
        ps.in_flight = false;
        if ok {
            ps.ledger.sent_bytes(block_len);
            ps.ledger.mark_sent(task.key.clone());
        } else if ps.connected && !task.retried {
            // one retry at the head of the peer's queue
            debug!(peer = %peer, key = %task.key, "Send failed, requeueing once");
            ps.queue.push_front(Task {
                key: task.key.clone(),
                priority: task.priority,
                retried: true,
            });
        }
        state.rotate_if_ready(peer);
        self.inner.work.notify_one();
    }

    /// Keys `peer` currently wants from us, highest priority first.
    pub fn wantlist_for(&self, peer: &PeerId) -> Vec<Key> {
        let state = self.inner.state.lock();
        state
            .peers
            .get(peer)
            .map(|ps| ps.ledger.wantlist_keys())
            .unwrap_or_default()
    }

    /// Ledger snapshot for `peer`, creating the ledger if unknown.
    pub fn receipt_for(&self, peer: &PeerId) -> Receipt {
        let mut state = self.inner.state.lock();
        state.peer_mut(peer).ledger.receipt()
    }

    /// Peers the engine holds ledgers for.
    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.state.lock().peers.keys().cloned().collect()
    }
}

/// A scheduled block send.
///
/// The consumer must call [`Envelope::complete`] exactly once after the
/// transmit attempt so the engine releases the peer's send slot; dropping an
/// unacknowledged envelope counts as a failed send.
pub struct Envelope {
    peer: PeerId,
    block: Block,
    task: Task,
    engine: Engine,
    acked: bool,
}

impl Envelope {
    /// The destination peer.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// The block to transmit.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Acknowledge the transmit attempt. On success the engine accounts the
    /// sent bytes; on failure the task is requeued once at the head of the
    /// peer's queue.
    pub fn complete(mut self, result: Result<(), NetworkError>) {
        self.acked = true;
        self.engine
            .finish(&self.peer, &self.task, self.block.len(), result.is_ok());
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if !self.acked {
            self.engine
                .finish(&self.peer, &self.task, self.block.len(), false);
        }
    }
}
