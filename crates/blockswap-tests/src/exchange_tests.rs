//! End-to-end exchange scenarios over the virtual network.

use std::sync::Arc;
use std::time::Duration;

use blockswap_exchange::{ExchangeConfig, ExchangeError, RequestContext};
use blockswap_net::testnet::RecordingReceiver;
use blockswap_net::{BlockMessage, Network};
use blockswap_store::BlockStore;
use blockswap_types::{Block, Key, PeerId};

use crate::generators::{sized_block, test_key, BlockGenerator};
use crate::harness::{close_all, SessionGenerator};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_two_peer_exchange() {
    let mut gen = SessionGenerator::new();
    let instances = gen.connected_instances(2).await;
    let (a, b) = (&instances[0], &instances[1]);

    let block = Block::new(b"block".to_vec());
    a.exchange.has_block(block.clone()).await.unwrap();

    let ctx = RequestContext::with_timeout(Duration::from_secs(5));
    let received = b.exchange.get_block(&ctx, block.key()).await.unwrap();
    assert_eq!(received.data(), b"block");

    settle().await;
    let a_ledger = a.exchange.ledger_for_peer(&b.peer);
    assert_eq!(a_ledger.sent, 5);
    let b_ledger = b.exchange.ledger_for_peer(&a.peer);
    assert_eq!(b_ledger.recv, 5);

    close_all(&instances).await;
}

#[tokio::test]
async fn test_get_block_via_provider_discovery() {
    let mut gen = SessionGenerator::new();
    let a = gen.next_instance();
    let b = gen.next_instance();

    let block = Block::new(b"discovered".to_vec());
    a.exchange.has_block(block.clone()).await.unwrap();
    // let the provide workers register the announcement
    settle().await;
    assert_eq!(gen.routing().providers_of(block.key()), vec![a.peer.clone()]);

    let ctx = RequestContext::with_timeout(Duration::from_secs(5));
    let received = b.exchange.get_block(&ctx, block.key()).await.unwrap();
    assert_eq!(received, block);

    let _ = a.exchange.close().await;
    let _ = b.exchange.close().await;
}

#[tokio::test]
async fn test_empty_key_returns_not_found() {
    let mut gen = SessionGenerator::new();
    let solo = gen.next_instance();

    let ctx = RequestContext::with_timeout(Duration::from_secs(5));
    let err = solo
        .exchange
        .get_block(&ctx, &Key::from_bytes(Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::NotFound));

    let _ = solo.exchange.close().await;
}

#[tokio::test]
async fn test_local_block_returned_without_wantlist() {
    let mut gen = SessionGenerator::new();
    let solo = gen.next_instance();

    let block = Block::new(b"local".to_vec());
    solo.exchange.has_block(block.clone()).await.unwrap();

    let ctx = RequestContext::background();
    let received = solo.exchange.get_block(&ctx, block.key()).await.unwrap();
    assert_eq!(received, block);
    assert!(solo.exchange.get_wantlist().is_empty());

    let _ = solo.exchange.close().await;
}

#[tokio::test]
async fn test_deadline_exceeded_for_unavailable_block() {
    let mut gen = SessionGenerator::new();
    let solo = gen.next_instance();

    let ctx = RequestContext::with_timeout(Duration::from_millis(50));
    let err = solo
        .exchange
        .get_block(&ctx, &test_key(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::DeadlineExceeded));

    let _ = solo.exchange.close().await;
}

#[tokio::test]
async fn test_wantlist_cleanup() {
    let mut gen = SessionGenerator::new();
    let solo = gen.next_instance();
    let keys: Vec<Key> = (0..20).map(test_key).collect();

    // a timed-out get leaves nothing behind
    let ctx = RequestContext::with_timeout(Duration::from_millis(50));
    let err = solo.exchange.get_block(&ctx, &keys[0]).await.unwrap_err();
    assert!(matches!(err, ExchangeError::DeadlineExceeded));
    settle().await;
    assert!(solo.exchange.get_wantlist().is_empty());

    // a cancelled batch leaves nothing behind
    let ctx = RequestContext::with_timeout(Duration::from_millis(50));
    let _rx = solo.exchange.get_blocks(&ctx, &keys[..10]).await.unwrap();
    ctx.done().await;
    settle().await;
    assert!(solo.exchange.get_wantlist().is_empty());

    // one live single-key request plus ten live batch keys
    let live = RequestContext::background();
    let _rx1 = solo.exchange.get_blocks(&live, &keys[..1]).await.unwrap();
    let cancellable = RequestContext::background();
    let _rx2 = solo
        .exchange
        .get_blocks(&cancellable, &keys[10..])
        .await
        .unwrap();
    settle().await;
    assert_eq!(solo.exchange.get_wantlist().len(), 11);

    // cancelling the batch leaves exactly the single live key
    cancellable.cancel();
    settle().await;
    let remaining = solo.exchange.get_wantlist();
    assert_eq!(remaining, vec![keys[0].clone()]);

    let _ = solo.exchange.close().await;
}

#[tokio::test]
async fn test_double_get() {
    let mut gen = SessionGenerator::new();
    let instances = gen.connected_instances(2).await;
    let (a, b) = (&instances[0], &instances[1]);
    let block = BlockGenerator::new().next_block();

    let ctx1 = RequestContext::background();
    let mut rx1 = b
        .exchange
        .get_blocks(&ctx1, std::slice::from_ref(block.key()))
        .await
        .unwrap();
    let ctx2 = RequestContext::background();
    let mut rx2 = b
        .exchange
        .get_blocks(&ctx2, std::slice::from_ref(block.key()))
        .await
        .unwrap();

    // both requests are in the wantlist before the first is cancelled
    tokio::time::sleep(Duration::from_millis(100)).await;
    ctx1.cancel();
    assert_eq!(rx1.recv().await, None, "first stream should close empty");

    a.exchange.has_block(block.clone()).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), rx2.recv())
        .await
        .expect("timed out waiting on block")
        .expect("second request should still receive the block");
    assert_eq!(received, block);

    close_all(&instances).await;
}

#[tokio::test]
async fn test_rebroadcast_delivers_full_wantlist() {
    let mut gen = SessionGenerator::with_config(ExchangeConfig::with_rebroadcast_interval(
        Duration::from_millis(500),
    ));
    let a = gen.next_instance();

    // a silent peer that only records what it is sent
    let silent_peer = PeerId::from_bytes(vec![0xEE, 0x99]);
    let silent = gen.network().adapter(silent_peer.clone());
    let recorder = Arc::new(RecordingReceiver::new());
    silent.set_receiver(recorder.clone());
    silent.connect_to(&a.peer).await.unwrap();

    let wanted = test_key(42);
    let ctx = RequestContext::background();
    let _rx = solo_want(&a, &ctx, &wanted).await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    let fulls = recorder
        .messages()
        .iter()
        .filter(|(_, msg)| {
            msg.full() && msg.wantlist().iter().any(|w| w.entry.key == wanted && !w.cancel)
        })
        .count();
    // the initial broadcast plus at least one timer-driven rebroadcast
    assert!(fulls >= 2, "expected rebroadcasts, saw {fulls}");

    let _ = a.exchange.close().await;
}

async fn solo_want(
    instance: &crate::harness::Instance,
    ctx: &RequestContext,
    key: &Key,
) -> tokio::sync::mpsc::Receiver<Block> {
    instance
        .exchange
        .get_blocks(ctx, std::slice::from_ref(key))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_send_to_peer_that_wants_first() {
    let mut gen = SessionGenerator::with_config(ExchangeConfig::with_rebroadcast_interval(
        Duration::from_millis(500),
    ));
    let instances = gen.connected_instances(2).await;
    let (a, b) = (&instances[0], &instances[1]);
    let block = BlockGenerator::new().next_block();

    // A asks first; B only obtains the block afterwards
    let ctx = RequestContext::with_timeout(Duration::from_secs(5));
    let mut rx = a
        .exchange
        .get_blocks(&ctx, std::slice::from_ref(block.key()))
        .await
        .unwrap();
    settle().await;

    b.exchange.has_block(block.clone()).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("stream closed without the block");
    assert_eq!(received.key(), block.key());

    close_all(&instances).await;
}

#[tokio::test]
async fn test_ledger_accounting() {
    let mut gen = SessionGenerator::new();
    let instances = gen.connected_instances(2).await;
    let (a, b) = (&instances[0], &instances[1]);

    // A serves three 500-byte blocks to B
    let outbound: Vec<Block> = (0..3).map(|_| sized_block(500)).collect();
    for block in &outbound {
        a.exchange.has_block(block.clone()).await.unwrap();
    }
    let keys: Vec<Key> = outbound.iter().map(|blk| blk.key().clone()).collect();
    let ctx = RequestContext::with_timeout(Duration::from_secs(5));
    let mut rx = b.exchange.get_blocks(&ctx, &keys).await.unwrap();
    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("stream closed early");
    }

    // and B serves one 500-byte block back to A
    let inbound = sized_block(500);
    b.exchange.has_block(inbound.clone()).await.unwrap();
    let ctx = RequestContext::with_timeout(Duration::from_secs(5));
    a.exchange.get_block(&ctx, inbound.key()).await.unwrap();

    settle().await;
    let receipt = a.exchange.ledger_for_peer(&b.peer);
    assert_eq!(receipt.sent, 1500);
    assert_eq!(receipt.recv, 500);
    assert_eq!(receipt.exchanged, 4);
    assert!((receipt.value - 1500.0 / 501.0).abs() < 0.01);

    close_all(&instances).await;
}

#[tokio::test]
async fn test_provider_announce_suppressed_for_known_block() {
    let mut gen = SessionGenerator::new();
    let solo = gen.next_instance();
    let block = BlockGenerator::new().next_block();

    solo.exchange.has_block(block.clone()).await.unwrap();
    solo.exchange.has_block(block.clone()).await.unwrap();
    settle().await;

    assert_eq!(gen.routing().provide_calls(), 1);

    let _ = solo.exchange.close().await;
}

#[tokio::test]
async fn test_get_after_close_fails() {
    let mut gen = SessionGenerator::new();
    let solo = gen.next_instance();

    solo.exchange.close().await.unwrap();
    let ctx = RequestContext::background();
    let err = solo
        .exchange
        .get_block(&ctx, &test_key(7))
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::AlreadyClosed));

    // close is idempotent
    solo.exchange.close().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_blocks_counted() {
    let mut gen = SessionGenerator::new();
    let a = gen.next_instance();
    let block = BlockGenerator::new().next_block();
    a.exchange.has_block(block.clone()).await.unwrap();

    // an unsolicited copy of a block A already holds
    let stranger = gen.network().adapter(PeerId::from_bytes(vec![0xEE, 0x77]));
    let mut msg = BlockMessage::new(false);
    msg.add_block(block.clone());
    stranger.send_message(&a.peer, msg).await.unwrap();
    settle().await;

    let stat = a.exchange.stat();
    assert_eq!(stat.dup_blks_received, 1);
    assert_eq!(stat.dup_data_received, block.len() as u64);
    assert_eq!(stat.blocks_received, 0);

    let _ = a.exchange.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_distribution_across_swarm() {
    let mut gen = SessionGenerator::new();
    let instances = gen.connected_instances(5).await;
    let blocks = BlockGenerator::new().blocks(10);
    let keys: Vec<Key> = blocks.iter().map(|blk| blk.key().clone()).collect();

    for block in &blocks {
        instances[0].exchange.has_block(block.clone()).await.unwrap();
    }

    for instance in &instances[1..] {
        let ctx = RequestContext::with_timeout(Duration::from_secs(10));
        let mut rx = instance.exchange.get_blocks(&ctx, &keys).await.unwrap();
        for _ in 0..keys.len() {
            tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out during distribution")
                .expect("stream closed early");
        }
    }

    for instance in &instances {
        for key in &keys {
            assert!(instance.store.has(key));
        }
    }

    close_all(&instances).await;
}

#[tokio::test]
async fn test_cache_counters_surface_in_stat() {
    let mut gen = SessionGenerator::new();
    let a = gen.next_cached_instance();
    let b = gen.next_instance();
    a.connect_to(&b).await;

    let block = BlockGenerator::new().next_block();
    a.exchange.has_block(block.clone()).await.unwrap();

    // serving B drives A's engine through the caching store
    let ctx = RequestContext::with_timeout(Duration::from_secs(5));
    let received = b.exchange.get_block(&ctx, block.key()).await.unwrap();
    assert_eq!(received, block);

    settle().await;
    let stat = a.exchange.stat();
    assert!(stat.cache_lookups >= 1);
    assert!(stat.cache_hits >= 1);

    // a store without a cache wrapper reports nothing
    let b_stat = b.exchange.stat();
    assert_eq!(b_stat.cache_lookups, 0);
    assert_eq!(b_stat.cache_hits, 0);

    let _ = a.exchange.close().await;
    let _ = b.exchange.close().await;
}

#[tokio::test]
async fn test_stat_reflects_activity() {
    let mut gen = SessionGenerator::new();
    let instances = gen.connected_instances(2).await;
    let (a, b) = (&instances[0], &instances[1]);
    let block = BlockGenerator::new().next_block();

    a.exchange.has_block(block.clone()).await.unwrap();
    let ctx = RequestContext::with_timeout(Duration::from_secs(5));
    b.exchange.get_block(&ctx, block.key()).await.unwrap();
    settle().await;

    let a_stat = a.exchange.stat();
    assert_eq!(a_stat.blocks_sent, 1);
    assert_eq!(a_stat.data_sent, block.len() as u64);

    let b_stat = b.exchange.stat();
    assert_eq!(b_stat.blocks_received, 1);
    assert_eq!(b_stat.data_received, block.len() as u64);
    assert!(b_stat.wantlist.is_empty());
    assert!(b_stat.peers.contains(&a.peer));

    close_all(&instances).await;
}

#[tokio::test]
async fn test_wantlist_for_peer_visible_to_holder() {
    let mut gen = SessionGenerator::new();
    let instances = gen.connected_instances(2).await;
    let (a, b) = (&instances[0], &instances[1]);

    let wanted = test_key(3);
    let ctx = RequestContext::background();
    let _rx = b
        .exchange
        .get_blocks(&ctx, std::slice::from_ref(&wanted))
        .await
        .unwrap();
    settle().await;

    assert_eq!(a.exchange.wantlist_for_peer(&b.peer), vec![wanted]);

    close_all(&instances).await;
}
