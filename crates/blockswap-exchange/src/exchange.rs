//! The exchange driver.
//!
//! Ties the want manager, decision engine, notification bus, and block
//! store to the transport and routing seams: local `get`/`has` requests come
//! in at the top, inbound network traffic arrives through the
//! [`MessageReceiver`] implementation, and periodic provide/rebroadcast
//! loops run underneath.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use blockswap_net::{BlockMessage, MessageReceiver, Network, Routing};
use blockswap_store::BlockStore;
use blockswap_types::{Block, Key, PeerId};

use crate::engine::{Engine, Envelope};
use crate::ledger::Receipt;
use crate::notifications::Notifications;
use crate::stat::{Counters, Stat};
use crate::wantmanager::WantManager;
use crate::{ExchangeConfig, ExchangeError, ExchangeResult, RequestContext};

/// Depth of the provider-search request channel.
const FIND_KEYS_DEPTH: usize = 16;

/// A request to locate providers for some keys.
struct ProviderRequest {
    keys: Vec<Key>,
    ctx: RequestContext,
}

/// The block exchange.
///
/// Construct with [`Exchange::new`]; the exchange registers itself as the
/// transport's receiver. All spawned tasks are descendants of one root
/// cancellation scope and [`Exchange::close`] is the single tear-down path.
pub struct Exchange {
    network: Arc<dyn Network>,
    routing: Arc<dyn Routing>,
    store: Arc<dyn BlockStore>,
    engine: Engine,
    wm: Arc<WantManager>,
    notifications: Arc<Notifications>,
    counters: Counters,
    config: ExchangeConfig,
    provide_tx: mpsc::Sender<Key>,
    find_tx: mpsc::Sender<ProviderRequest>,
    root: CancellationToken,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Exchange {
    /// Create and start an exchange over the given seams.
    pub fn new(
        network: Arc<dyn Network>,
        routing: Arc<dyn Routing>,
        store: Arc<dyn BlockStore>,
        config: ExchangeConfig,
    ) -> Arc<Self> {
        let root = CancellationToken::new();
        let (wm, wm_handle) = WantManager::new(network.clone(), &config, &root);
        let engine = Engine::new(store.clone());
        let (provide_tx, provide_rx) = mpsc::channel(config.provide_buffer.max(1));
        let (find_tx, find_rx) = mpsc::channel(FIND_KEYS_DEPTH);

        let exchange = Arc::new(Self {
            network: network.clone(),
            routing,
            store,
            engine,
            wm,
            notifications: Arc::new(Notifications::new()),
            counters: Counters::default(),
            config: config.clone(),
            provide_tx,
            find_tx,
            root,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let mut handles = vec![wm_handle];
        for _ in 0..config.task_workers.max(1) {
            handles.push(tokio::spawn(task_worker(exchange.clone())));
        }
        let provide_rx = Arc::new(tokio::sync::Mutex::new(provide_rx));
        for _ in 0..config.provide_workers.max(1) {
            handles.push(tokio::spawn(provide_worker(
                exchange.clone(),
                provide_rx.clone(),
            )));
        }
        handles.push(tokio::spawn(find_providers_worker(
            exchange.clone(),
            find_rx,
        )));
        *exchange.tasks.lock() = handles;

        network.set_receiver(exchange.clone());
        info!("Exchange started");
        exchange
    }

    /// Announce that `block` is now locally available: store it, wake
    /// subscribers, schedule sends to peers that want it, withdraw it from
    /// the local wantlist, and (for new blocks) announce it to routing.
    pub async fn has_block(&self, block: Block) -> ExchangeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExchangeError::AlreadyClosed);
        }
        if block.key().is_empty() {
            return Err(ExchangeError::InvalidKey);
        }
        let newly_added = self.store.put(block.clone());
        self.notifications.publish(&block);
        self.engine.add_block(&block);
        if self.wm.wants(block.key()) {
            self.wm
                .cancel_wants(std::slice::from_ref(block.key()))
                .await;
        }
        if newly_added {
            self.enqueue_provide(block.key().clone());
        }
        Ok(())
    }

    fn enqueue_provide(&self, key: Key) {
        match self.provide_tx.try_send(key) {
            Ok(()) => {
                self.counters
                    .provide_buf_len
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(key)) => {
                // provide is best-effort
                warn!(key = %key, "Provide queue full, dropping announcement");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Fetch a single block, waiting for it to arrive if necessary.
    pub async fn get_block(&self, ctx: &RequestContext, key: &Key) -> ExchangeResult<Block> {
        let mut blocks = self.get_blocks(ctx, std::slice::from_ref(key)).await?;
        match blocks.recv().await {
            Some(block) => Ok(block),
            None => {
                if self.closed.load(Ordering::SeqCst) {
                    Err(ExchangeError::AlreadyClosed)
                } else if ctx.is_done() {
                    Err(ctx.error())
                } else {
                    Err(ExchangeError::NotFound)
                }
            }
        }
    }

    /// Fetch a batch of blocks.
    ///
    /// Keys already held locally are delivered immediately and never enter
    /// the wantlist. The returned stream closes once every key has been
    /// delivered, the context fires, or the exchange shuts down; wants still
    /// outstanding at that point are cancelled.
    pub async fn get_blocks(
        &self,
        ctx: &RequestContext,
        keys: &[Key],
    ) -> ExchangeResult<mpsc::Receiver<Block>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExchangeError::AlreadyClosed);
        }
        if keys.iter().any(|k| k.is_empty()) {
            return Err(ExchangeError::NotFound);
        }

        let (out_tx, out_rx) = mpsc::channel(keys.len().max(1));
        if keys.is_empty() {
            return Ok(out_rx);
        }

        let mut local = Vec::new();
        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            match self.store.get(key) {
                Some(block) => local.push(block),
                None => missing.push(key.clone()),
            }
        }

        if missing.is_empty() {
            for block in local {
                let _ = out_tx.try_send(block);
            }
            return Ok(out_rx);
        }

        // subscribe before wanting so an arrival can never slip between
        let subscription = self.notifications.subscribe(&missing);
        self.wm.want_blocks(ctx, &missing).await;

        let search_keys: Vec<Key> = missing
            .iter()
            .take(self.config.provider_search_keys)
            .cloned()
            .collect();
        let find_req = ProviderRequest {
            keys: search_keys,
            ctx: ctx.clone(),
        };
        if self.find_tx.try_send(find_req).is_err() {
            trace!("Provider search queue full, relying on connected peers");
        }

        for block in local {
            let _ = out_tx.try_send(block);
        }

        tokio::spawn(forward_blocks(
            self.wm.clone(),
            subscription,
            out_tx,
            missing.into_iter().collect(),
            ctx.clone(),
            self.root.clone(),
        ));
        Ok(out_rx)
    }

    /// Remove `keys` from the local wantlist and broadcast cancels.
    pub async fn cancel_wants(&self, keys: &[Key]) {
        self.wm.cancel_wants(keys).await;
    }

    /// Keys the local node currently wants.
    pub fn get_wantlist(&self) -> Vec<Key> {
        self.wm
            .wantlist_entries()
            .into_iter()
            .map(|e| e.key)
            .collect()
    }

    /// Keys `peer` wants from us.
    pub fn wantlist_for_peer(&self, peer: &PeerId) -> Vec<Key> {
        self.engine.wantlist_for(peer)
    }

    /// Accounting snapshot for `peer`.
    pub fn ledger_for_peer(&self, peer: &PeerId) -> Receipt {
        self.engine.receipt_for(peer)
    }

    /// Activity snapshot.
    pub fn stat(&self) -> Stat {
        let cache = self.store.cache_stats().unwrap_or_default();
        Stat {
            provide_buf_len: self.counters.provide_buf_len.load(Ordering::Relaxed),
            blocks_received: self.counters.blocks_received.load(Ordering::Relaxed),
            data_received: self.counters.data_received.load(Ordering::Relaxed),
            dup_blks_received: self.counters.dup_blks_received.load(Ordering::Relaxed),
            dup_data_received: self.counters.dup_data_received.load(Ordering::Relaxed),
            blocks_sent: self.counters.blocks_sent.load(Ordering::Relaxed),
            data_sent: self.counters.data_sent.load(Ordering::Relaxed),
            cache_hits: cache.hits,
            cache_lookups: cache.lookups,
            wantlist: self.get_wantlist(),
            peers: self.engine.peers(),
        }
    }

    /// Shut the exchange down and wait for every owned task.
    pub async fn close(&self) -> ExchangeResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Exchange closing");
        self.root.cancel();
        self.notifications.shutdown();
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn send_block(&self, envelope: Envelope) {
        let peer = envelope.peer().clone();
        let size = envelope.block().len();
        let mut msg = BlockMessage::new(false);
        msg.add_block(envelope.block().clone());
        debug!(peer = %peer, key = %envelope.block().key(), "Sending block");
        match self.network.send_message(&peer, msg).await {
            Ok(()) => {
                self.counters.outgoing(size as u64);
                envelope.complete(Ok(()));
            }
            Err(err) => {
                debug!(peer = %peer, error = %err, "Block send failed");
                envelope.complete(Err(err));
            }
        }
    }
}

#[async_trait]
impl MessageReceiver for Exchange {
    async fn receive_message(&self, from: PeerId, msg: BlockMessage) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        // wantlist entries and received-byte accounting
        self.engine.message_received(&from, &msg);

        let mut arrived = Vec::new();
        for block in msg.blocks() {
            if !self.store.put(block.clone()) {
                self.counters.incoming_duplicate(block.len() as u64);
                continue;
            }
            trace!(peer = %from, key = %block.key(), "Received block");
            self.counters.incoming_unique(block.len() as u64);
            // the store write lands before subscribers wake
            self.notifications.publish(block);
            self.engine.add_block(block);
            if self.wm.wants(block.key()) {
                arrived.push(block.key().clone());
            }
        }
        if !arrived.is_empty() {
            self.wm.cancel_wants(&arrived).await;
        }
    }

    async fn peer_connected(&self, peer: PeerId) {
        debug!(peer = %peer, "Peer connected");
        self.engine.peer_connected(&peer);
        self.wm.connected(peer).await;
    }

    async fn peer_disconnected(&self, peer: PeerId) {
        debug!(peer = %peer, "Peer disconnected");
        self.engine.peer_disconnected(&peer);
        self.wm.disconnected(peer).await;
    }
}

/// Forward notification-bus arrivals to one `get_blocks` caller, cancelling
/// whatever is still outstanding when the request ends.
async fn forward_blocks(
    wm: Arc<WantManager>,
    mut subscription: mpsc::Receiver<Block>,
    out_tx: mpsc::Sender<Block>,
    mut remaining: HashSet<Key>,
    ctx: RequestContext,
    root: CancellationToken,
) {
    loop {
        tokio::select! {
            arrival = subscription.recv() => match arrival {
                Some(block) => {
                    remaining.remove(block.key());
                    if out_tx.send(block).await.is_err() {
                        break;
                    }
                    if remaining.is_empty() {
                        break;
                    }
                }
                None => break,
            },
            _ = out_tx.closed() => break,
            _ = ctx.done() => break,
            _ = root.cancelled() => break,
        }
    }
    if !remaining.is_empty() {
        let keys: Vec<Key> = remaining.into_iter().collect();
        wm.cancel_wants(&keys).await;
    }
}

/// Drains the decision engine outbox.
async fn task_worker(exchange: Arc<Exchange>) {
    loop {
        tokio::select! {
            _ = exchange.root.cancelled() => break,
            envelope = exchange.engine.next_envelope() => {
                exchange.send_block(envelope).await;
            }
        }
    }
}

/// Announces locally held keys to the routing service, best-effort.
async fn provide_worker(
    exchange: Arc<Exchange>,
    provide_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Key>>>,
) {
    loop {
        let key = tokio::select! {
            _ = exchange.root.cancelled() => break,
            key = async { provide_rx.lock().await.recv().await } => match key {
                Some(key) => key,
                None => break,
            },
        };
        exchange
            .counters
            .provide_buf_len
            .fetch_sub(1, Ordering::Relaxed);
        trace!(key = %key, "Providing key");
        if let Err(err) = exchange.routing.provide(&key).await {
            debug!(key = %key, error = %err, "Provide failed");
        }
    }
}

/// Queries routing for providers of newly wanted keys and dials them.
async fn find_providers_worker(exchange: Arc<Exchange>, mut find_rx: mpsc::Receiver<ProviderRequest>) {
    loop {
        let req = tokio::select! {
            _ = exchange.root.cancelled() => break,
            req = find_rx.recv() => match req {
                Some(req) => req,
                None => break,
            },
        };
        for key in req.keys {
            if req.ctx.is_done() {
                break;
            }
            let mut providers = exchange
                .routing
                .find_providers(&key, exchange.config.provider_search_max)
                .await;
            loop {
                tokio::select! {
                    _ = exchange.root.cancelled() => return,
                    _ = req.ctx.done() => break,
                    provider = providers.recv() => match provider {
                        Some(peer) => {
                            trace!(peer = %peer, key = %key, "Connecting to provider");
                            if let Err(err) = exchange.network.connect_to(&peer).await {
                                debug!(peer = %peer, error = %err, "Cannot connect to provider");
                            }
                        }
                        None => break,
                    },
                }
            }
        }
    }
}
