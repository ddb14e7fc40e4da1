//! Arrival notifications for wanted blocks.
//!
//! A publish/subscribe bus keyed by content key. Subscriptions are
//! single-shot per key: after a block for a subscribed key is delivered,
//! that key's registration is torn down, and the subscription closes once
//! every key has been delivered. Publication never blocks: each
//! subscription's channel is sized to its key count, and a subscriber whose
//! buffer is somehow full is dropped rather than waited on.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use blockswap_types::{Block, Key};

#[derive(Debug)]
struct Subscription {
    tx: mpsc::Sender<Block>,
    pending: HashSet<Key>,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    subs: HashMap<u64, Subscription>,
    by_key: HashMap<Key, Vec<u64>>,
    shutdown: bool,
}

impl Registry {
    fn drop_subscription(&mut self, id: u64) {
        let Some(sub) = self.subs.remove(&id) else {
            return;
        };
        for key in &sub.pending {
            if let Some(ids) = self.by_key.get_mut(key) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
    }
}

/// Publish/subscribe bus that wakes local readers when blocks arrive.
#[derive(Debug, Default)]
pub struct Notifications {
    inner: Mutex<Registry>,
}

impl Notifications {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `block` to every subscription waiting on its key.
    pub fn publish(&self, block: &Block) {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return;
        }
        let Some(ids) = inner.by_key.remove(block.key()) else {
            return;
        };
        for id in ids {
            let Some(sub) = inner.subs.get_mut(&id) else {
                continue;
            };
            if !sub.pending.remove(block.key()) {
                continue;
            }
            let delivered = sub.tx.try_send(block.clone()).is_ok();
            if !delivered || sub.pending.is_empty() {
                // closing the channel ends the subscriber's stream
                inner.drop_subscription(id);
            }
        }
    }

    /// Subscribe to the next arrival of each key in `keys`.
    ///
    /// The returned stream yields at most one block per distinct key and
    /// then closes. Subscribing to zero keys returns a closed stream.
    pub fn subscribe(&self, keys: &[Key]) -> mpsc::Receiver<Block> {
        let (tx, rx) = mpsc::channel(keys.len().max(1));
        if keys.is_empty() {
            return rx;
        }
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return rx;
        }
        let pending: HashSet<Key> = keys.iter().cloned().collect();
        let id = inner.next_id;
        inner.next_id += 1;
        for key in &pending {
            inner.by_key.entry(key.clone()).or_default().push(id);
        }
        inner.subs.insert(id, Subscription { tx, pending });
        rx
    }

    /// Close every live subscription and refuse new ones.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        inner.subs.clear();
        inner.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(data: &[u8]) -> Block {
        Block::new(data.to_vec())
    }

    #[tokio::test]
    async fn test_subscribe_then_publish_yields_and_closes() {
        let bus = Notifications::new();
        let b = block(b"one");
        let mut rx = bus.subscribe(std::slice::from_ref(b.key()));

        bus.publish(&b);
        assert_eq!(rx.recv().await, Some(b));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_single_shot_per_key() {
        let bus = Notifications::new();
        let b = block(b"again");
        let mut rx = bus.subscribe(std::slice::from_ref(b.key()));

        bus.publish(&b);
        bus.publish(&b);
        assert!(rx.recv().await.is_some());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_all_delivered() {
        let bus = Notifications::new();
        let b = block(b"shared");
        let mut rx1 = bus.subscribe(std::slice::from_ref(b.key()));
        let mut rx2 = bus.subscribe(std::slice::from_ref(b.key()));

        bus.publish(&b);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_closes_after_all_keys() {
        let bus = Notifications::new();
        let a = block(b"a");
        let b = block(b"b");
        let mut rx = bus.subscribe(&[a.key().clone(), b.key().clone()]);

        bus.publish(&a);
        bus.publish(&b);
        let mut got = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        got.sort_by(|x, y| x.data().cmp(y.data()));
        assert_eq!(got, vec![a, b]);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_zero_key_subscribe_is_closed() {
        let bus = Notifications::new();
        let mut rx = bus.subscribe(&[]);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_unrelated_publish_not_delivered() {
        let bus = Notifications::new();
        let wanted = block(b"wanted");
        let other = block(b"other");
        let mut rx = bus.subscribe(std::slice::from_ref(wanted.key()));

        bus.publish(&other);
        bus.publish(&wanted);
        assert_eq!(rx.recv().await.unwrap(), wanted);
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams() {
        let bus = Notifications::new();
        let b = block(b"late");
        let mut rx = bus.subscribe(std::slice::from_ref(b.key()));

        bus.shutdown();
        assert_eq!(rx.recv().await, None);
        // and post-shutdown subscriptions are born closed
        let mut rx = bus.subscribe(std::slice::from_ref(b.key()));
        assert_eq!(rx.recv().await, None);
    }
}
