//! In-process virtual network and routing for tests.
//!
//! Mirrors a real transport closely enough to exercise the exchange end to
//! end: per-peer adapters implement [`Network`], delivery happens on spawned
//! tasks (optionally after a fixed delay), and connectivity events fire on
//! both sides of a dial, exactly as a symmetric transport would report them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use blockswap_types::{Key, PeerId};

use crate::{
    BlockMessage, MessageReceiver, MessageSender, Network, NetworkError, NetworkResult, Routing,
};

#[derive(Default)]
struct ClientState {
    receiver: RwLock<Option<Arc<dyn MessageReceiver>>>,
}

struct NetInner {
    clients: RwLock<HashMap<PeerId, Arc<ClientState>>>,
    delay: Option<Duration>,
}

/// An in-process message-passing network.
#[derive(Clone)]
pub struct VirtualNetwork {
    inner: Arc<NetInner>,
}

impl VirtualNetwork {
    /// A network with immediate delivery.
    pub fn new() -> Self {
        Self::with_delay(None)
    }

    /// A network that delays every delivery by `delay`.
    pub fn with_delay(delay: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(NetInner {
                clients: RwLock::new(HashMap::new()),
                delay,
            }),
        }
    }

    /// Register `peer` and return its transport adapter.
    pub fn adapter(&self, peer: PeerId) -> VirtualAdapter {
        let state = Arc::new(ClientState::default());
        self.inner
            .clients
            .write()
            .insert(peer.clone(), state.clone());
        VirtualAdapter {
            local: peer,
            state,
            net: self.inner.clone(),
        }
    }

    /// True when `peer` is registered.
    pub fn has_peer(&self, peer: &PeerId) -> bool {
        self.inner.clients.read().contains_key(peer)
    }

    /// Report `a` and `b` as disconnected to both sides.
    pub async fn disconnect(&self, a: &PeerId, b: &PeerId) {
        let ra = receiver_of(&self.inner, a);
        let rb = receiver_of(&self.inner, b);
        if let Some(ra) = ra {
            ra.peer_disconnected(b.clone()).await;
        }
        if let Some(rb) = rb {
            rb.peer_disconnected(a.clone()).await;
        }
    }
}

impl Default for VirtualNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn receiver_of(net: &Arc<NetInner>, peer: &PeerId) -> Option<Arc<dyn MessageReceiver>> {
    let clients = net.clients.read();
    let state = clients.get(peer)?;
    let receiver = state.receiver.read().clone();
    receiver
}

fn deliver(net: &Arc<NetInner>, from: PeerId, to: &PeerId, msg: BlockMessage) -> NetworkResult<()> {
    let client = net
        .clients
        .read()
        .get(to)
        .cloned()
        .ok_or_else(|| NetworkError::PeerNotFound(to.to_string()))?;
    let delay = net.delay;
    tokio::spawn(async move {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let receiver = client.receiver.read().clone();
        if let Some(receiver) = receiver {
            receiver.receive_message(from, msg).await;
        }
    });
    Ok(())
}

/// One peer's view of a [`VirtualNetwork`].
pub struct VirtualAdapter {
    local: PeerId,
    state: Arc<ClientState>,
    net: Arc<NetInner>,
}

impl VirtualAdapter {
    /// The peer this adapter belongs to.
    pub fn local_peer(&self) -> &PeerId {
        &self.local
    }
}

#[async_trait]
impl Network for VirtualAdapter {
    async fn connect_to(&self, peer: &PeerId) -> NetworkResult<()> {
        let remote = receiver_of(&self.net, peer)
            .ok_or_else(|| NetworkError::PeerNotFound(peer.to_string()))?;
        remote.peer_connected(self.local.clone()).await;
        let local = self.state.receiver.read().clone();
        if let Some(local) = local {
            local.peer_connected(peer.clone()).await;
        }
        Ok(())
    }

    async fn send_message(&self, peer: &PeerId, msg: BlockMessage) -> NetworkResult<()> {
        deliver(&self.net, self.local.clone(), peer, msg)
    }

    async fn new_sender(&self, peer: &PeerId) -> NetworkResult<Box<dyn MessageSender>> {
        if !self.net.clients.read().contains_key(peer) {
            return Err(NetworkError::PeerNotFound(peer.to_string()));
        }
        Ok(Box::new(VirtualSender {
            net: self.net.clone(),
            local: self.local.clone(),
            target: peer.clone(),
        }))
    }

    fn set_receiver(&self, receiver: Arc<dyn MessageReceiver>) {
        *self.state.receiver.write() = Some(receiver);
    }
}

struct VirtualSender {
    net: Arc<NetInner>,
    local: PeerId,
    target: PeerId,
}

#[async_trait]
impl MessageSender for VirtualSender {
    async fn send(&self, msg: &BlockMessage) -> NetworkResult<()> {
        deliver(&self.net, self.local.clone(), &self.target, msg.clone())
    }

    async fn close(&self) -> NetworkResult<()> {
        Ok(())
    }
}

/// Shared provider registry backing [`RoutingClient`]s.
#[derive(Clone, Default)]
pub struct MemoryRouting {
    providers: Arc<RwLock<HashMap<Key, Vec<PeerId>>>>,
    provide_calls: Arc<AtomicU64>,
}

impl MemoryRouting {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A routing client announcing as `local`.
    pub fn client(&self, local: PeerId) -> RoutingClient {
        RoutingClient {
            local,
            providers: self.providers.clone(),
            provide_calls: self.provide_calls.clone(),
        }
    }

    /// Registered providers for `key`.
    pub fn providers_of(&self, key: &Key) -> Vec<PeerId> {
        self.providers.read().get(key).cloned().unwrap_or_default()
    }

    /// Total provider announcements received across all clients.
    pub fn provide_calls(&self) -> u64 {
        self.provide_calls.load(AtomicOrdering::Relaxed)
    }
}

/// One peer's handle on a [`MemoryRouting`] registry.
pub struct RoutingClient {
    local: PeerId,
    providers: Arc<RwLock<HashMap<Key, Vec<PeerId>>>>,
    provide_calls: Arc<AtomicU64>,
}

#[async_trait]
impl Routing for RoutingClient {
    async fn provide(&self, key: &Key) -> NetworkResult<()> {
        self.provide_calls.fetch_add(1, AtomicOrdering::Relaxed);
        let mut providers = self.providers.write();
        let entry = providers.entry(key.clone()).or_default();
        if !entry.contains(&self.local) {
            entry.push(self.local.clone());
        }
        Ok(())
    }

    async fn find_providers(&self, key: &Key, max: usize) -> mpsc::Receiver<PeerId> {
        let found: Vec<PeerId> = self
            .providers
            .read()
            .get(key)
            .map(|peers| peers.iter().take(max).cloned().collect())
            .unwrap_or_default();
        let (tx, rx) = mpsc::channel(max.max(1));
        tokio::spawn(async move {
            for peer in found {
                if tx.send(peer).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// Receiver test double that records everything it is handed.
#[derive(Default)]
pub struct RecordingReceiver {
    messages: Mutex<Vec<(PeerId, BlockMessage)>>,
    connected: Mutex<Vec<PeerId>>,
    disconnected: Mutex<Vec<PeerId>>,
}

impl RecordingReceiver {
    /// A fresh recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages received so far.
    pub fn messages(&self) -> Vec<(PeerId, BlockMessage)> {
        self.messages.lock().clone()
    }

    /// Peers reported connected so far.
    pub fn connected(&self) -> Vec<PeerId> {
        self.connected.lock().clone()
    }

    /// Peers reported disconnected so far.
    pub fn disconnected(&self) -> Vec<PeerId> {
        self.disconnected.lock().clone()
    }
}

#[async_trait]
impl MessageReceiver for RecordingReceiver {
    async fn receive_message(&self, from: PeerId, msg: BlockMessage) {
        self.messages.lock().push((from, msg));
    }

    async fn peer_connected(&self, peer: PeerId) {
        self.connected.lock().push(peer);
    }

    async fn peer_disconnected(&self, peer: PeerId) {
        self.disconnected.lock().push(peer);
    }
}
