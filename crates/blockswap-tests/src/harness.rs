//! Test harness for integration tests.
//!
//! Wires exchanges over the in-process virtual network and the in-memory
//! provider registry, one instance per simulated node.

use std::sync::Arc;

use blockswap_exchange::{Exchange, ExchangeConfig};
use blockswap_net::testnet::{MemoryRouting, VirtualAdapter, VirtualNetwork};
use blockswap_net::Network;
use blockswap_store::{BlockStore, CachedBlockStore, MemoryBlockStore};
use blockswap_types::PeerId;

/// One simulated node: an exchange, its store, and its transport adapter.
pub struct Instance {
    /// This node's identity on the virtual network.
    pub peer: PeerId,
    /// The running exchange.
    pub exchange: Arc<Exchange>,
    /// The node's block store.
    pub store: Arc<dyn BlockStore>,
    /// The node's transport adapter, for dialing other instances.
    pub network: Arc<VirtualAdapter>,
}

impl Instance {
    /// Dial another instance; both sides observe the connection.
    pub async fn connect_to(&self, other: &Instance) {
        self.network
            .connect_to(&other.peer)
            .await
            .expect("virtual dial failed");
    }
}

/// Creates exchange instances sharing one virtual network and routing
/// registry.
pub struct SessionGenerator {
    network: VirtualNetwork,
    routing: MemoryRouting,
    config: ExchangeConfig,
    next_peer: u8,
}

impl SessionGenerator {
    /// A generator with default exchange configuration.
    pub fn new() -> Self {
        Self::with_config(ExchangeConfig::default())
    }

    /// A generator with custom exchange configuration.
    pub fn with_config(config: ExchangeConfig) -> Self {
        Self {
            network: VirtualNetwork::new(),
            routing: MemoryRouting::new(),
            config,
            next_peer: 1,
        }
    }

    /// The shared provider registry.
    pub fn routing(&self) -> &MemoryRouting {
        &self.routing
    }

    /// The shared virtual network.
    pub fn network(&self) -> &VirtualNetwork {
        &self.network
    }

    /// Spin up the next instance.
    pub fn next_instance(&mut self) -> Instance {
        self.instance_with_store(Arc::new(MemoryBlockStore::new()))
    }

    /// Spin up the next instance with its store behind a counting LRU cache.
    pub fn next_cached_instance(&mut self) -> Instance {
        self.instance_with_store(Arc::new(CachedBlockStore::with_defaults(
            MemoryBlockStore::new(),
        )))
    }

    fn instance_with_store(&mut self, store: Arc<dyn BlockStore>) -> Instance {
        let peer = PeerId::from_bytes(vec![0xEE, self.next_peer]);
        self.next_peer += 1;

        let network = Arc::new(self.network.adapter(peer.clone()));
        let routing = Arc::new(self.routing.client(peer.clone()));
        let exchange = Exchange::new(
            network.clone(),
            routing,
            store.clone(),
            self.config.clone(),
        );
        Instance {
            peer,
            exchange,
            store,
            network,
        }
    }

    /// Spin up `n` instances, fully connected to each other.
    pub async fn connected_instances(&mut self, n: usize) -> Vec<Instance> {
        let instances: Vec<Instance> = (0..n).map(|_| self.next_instance()).collect();
        for i in 0..instances.len() {
            for j in (i + 1)..instances.len() {
                instances[i].connect_to(&instances[j]).await;
            }
        }
        instances
    }
}

impl Default for SessionGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shut down every instance, ignoring errors.
pub async fn close_all(instances: &[Instance]) {
    for instance in instances {
        let _ = instance.exchange.close().await;
    }
}

/// Install a tracing subscriber for debugging test runs. Safe to call from
/// several tests; only the first call wins.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
