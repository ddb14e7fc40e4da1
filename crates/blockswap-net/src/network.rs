//! Transport and routing seams.
//!
//! The exchange core never opens sockets itself: it talks to a [`Network`]
//! for connectivity and message delivery, and to a [`Routing`] service for
//! provider discovery. The transport reports inbound traffic and peer
//! lifecycle back through the [`MessageReceiver`] the core registers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use blockswap_types::{Key, PeerId};

use crate::{BlockMessage, NetworkResult};

/// An open outbound stream to one peer.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send one message, synchronously with respect to the transport.
    async fn send(&self, msg: &BlockMessage) -> NetworkResult<()>;

    /// Close the stream.
    async fn close(&self) -> NetworkResult<()>;
}

/// Connectivity and message delivery, implemented by the transport layer.
#[async_trait]
pub trait Network: Send + Sync {
    /// Dial `peer` (lookup, connect, handshake). Idempotent for connected
    /// peers.
    async fn connect_to(&self, peer: &PeerId) -> NetworkResult<()>;

    /// Send a single message to `peer` on a transient stream.
    async fn send_message(&self, peer: &PeerId, msg: BlockMessage) -> NetworkResult<()>;

    /// Open a long-lived stream to `peer`.
    async fn new_sender(&self, peer: &PeerId) -> NetworkResult<Box<dyn MessageSender>>;

    /// Register the receiver for inbound messages and connectivity events.
    fn set_receiver(&self, receiver: Arc<dyn MessageReceiver>);
}

/// Callbacks from the transport into the exchange core.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// An inbound message arrived from `from`.
    async fn receive_message(&self, from: PeerId, msg: BlockMessage);

    /// A peer connected (possibly one of several transports).
    async fn peer_connected(&self, peer: PeerId);

    /// A peer disconnected.
    async fn peer_disconnected(&self, peer: PeerId);
}

/// Content routing: provider announcements and discovery.
#[async_trait]
pub trait Routing: Send + Sync {
    /// Announce that the local node can serve `key`. Best-effort.
    async fn provide(&self, key: &Key) -> NetworkResult<()>;

    /// Stream up to `max` known providers for `key`.
    async fn find_providers(&self, key: &Key, max: usize) -> mpsc::Receiver<PeerId>;
}
