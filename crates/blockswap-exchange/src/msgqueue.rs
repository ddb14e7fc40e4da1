//! Per-peer outbound message queue.
//!
//! Each queue owns the (lazily established) stream to one peer and a single
//! coalescing `pending` message. The want manager merges wantlist updates
//! into `pending` and fires the one-slot `work` signal; a dedicated worker
//! takes the message and sends it synchronously, reconnecting on the next
//! activity after a failure.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use blockswap_net::{BlockMessage, MessageSender, Network, NetworkResult, WantEntry};
use blockswap_types::{PeerId, WantlistEntry};

pub(crate) struct MessageQueue {
    partner: PeerId,
    network: Arc<dyn Network>,
    pending: Mutex<Option<BlockMessage>>,
    work: Notify,
    done: CancellationToken,
    connect_timeout: Duration,
}

impl MessageQueue {
    pub fn new(
        partner: PeerId,
        network: Arc<dyn Network>,
        connect_timeout: Duration,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            partner,
            network,
            pending: Mutex::new(None),
            work: Notify::new(),
            done: parent.child_token(),
            connect_timeout,
        })
    }

    /// Merge wantlist changes into the held message and wake the worker.
    ///
    /// Cancels override pending wants for the same key and vice versa; the
    /// `full` flag follows the most recent caller's intent.
    pub fn add_message(&self, entries: &[WantEntry], full: bool) {
        {
            let mut pending = self.pending.lock();
            let msg = pending.get_or_insert_with(|| BlockMessage::new(false));
            for entry in entries {
                if entry.cancel {
                    msg.cancel(entry.entry.key.clone());
                } else {
                    msg.add_entry(entry.entry.key.clone(), entry.entry.priority);
                }
            }
            msg.set_full(full);
        }
        self.work.notify_one();
    }

    /// Replace the held message with a full wantlist and wake the worker.
    pub fn set_full_wantlist(&self, entries: &[WantlistEntry]) {
        let mut msg = BlockMessage::new(true);
        for entry in entries {
            msg.add_entry(entry.key.clone(), entry.priority);
        }
        *self.pending.lock() = Some(msg);
        self.work.notify_one();
    }

    /// Tear the queue down; the worker exits and closes its stream.
    pub fn close(&self) {
        self.done.cancel();
    }

    /// Worker loop. Runs until `close()` or cancellation of the parent
    /// token.
    pub async fn run(self: Arc<Self>) {
        let mut sender: Option<Box<dyn MessageSender>> = None;
        let mut fresh_stream = false;
        loop {
            tokio::select! {
                _ = self.work.notified() => {
                    self.do_work(&mut sender, &mut fresh_stream).await;
                }
                _ = self.done.cancelled() => break,
            }
        }
        if let Some(sender) = sender {
            let _ = sender.close().await;
        }
        trace!(peer = %self.partner, "Peer queue stopped");
    }

    async fn do_work(
        &self,
        sender: &mut Option<Box<dyn MessageSender>>,
        fresh_stream: &mut bool,
    ) {
        if sender.is_none() {
            // the window covers lookup, dial, and handshake
            match tokio::time::timeout(self.connect_timeout, self.open_sender()).await {
                Ok(Ok(opened)) => {
                    *sender = Some(opened);
                    *fresh_stream = true;
                }
                Ok(Err(err)) => {
                    debug!(peer = %self.partner, error = %err, "Cannot open stream to peer");
                    return;
                }
                Err(_) => {
                    debug!(peer = %self.partner, "Connect to peer timed out");
                    return;
                }
            }
        }

        let Some(mut msg) = self.pending.lock().take() else {
            return;
        };
        if msg.is_empty() {
            return;
        }
        // the first message on any new stream carries the complete wantlist
        if *fresh_stream {
            msg.set_full(true);
        }

        let Some(stream) = sender.as_ref() else {
            return;
        };
        match stream.send(&msg).await {
            Ok(()) => {
                *fresh_stream = false;
                trace!(peer = %self.partner, "Sent wantlist update");
            }
            Err(err) => {
                // drop the taken message; the rebroadcast backstop repairs
                // whatever state the peer missed
                debug!(peer = %self.partner, error = %err, "Send failed, dropping stream");
                if let Some(stream) = sender.take() {
                    let _ = stream.close().await;
                }
                *fresh_stream = false;
            }
        }
    }

    async fn open_sender(&self) -> NetworkResult<Box<dyn MessageSender>> {
        self.network.connect_to(&self.partner).await?;
        self.network.new_sender(&self.partner).await
    }
}
