//! Cross-process fan-out tests
//!
//! Simulates two fleet instances by running two connection managers (each
//! with its own relay and chat bridge) over one shared topic service,
//! cache, and store - the same topology two processes sharing Redis would
//! have.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parley_server::core::constants::CHANNEL_WS_BROADCAST;
use parley_server::data::cache::CacheService;
use parley_server::data::store::{MemoryMessageStore, StoreService};
use parley_server::data::topics::TopicService;
use parley_server::domain::breaker::Breakers;
use parley_server::domain::chat::{ChatPipeline, ReliableQueue};
use parley_server::domain::fanout::frame::{Frame, RelayEnvelope};
use parley_server::domain::fanout::relay::{start_chat_bridge, start_global_relay};
use parley_server::domain::fanout::ConnectionManager;
use tokio::sync::{mpsc, watch};

struct Instance {
    manager: Arc<ConnectionManager>,
}

struct Cluster {
    topics: Arc<TopicService>,
    cache: Arc<CacheService>,
    store: Arc<MemoryMessageStore>,
    pipeline: ChatPipeline,
    a: Instance,
    b: Instance,
    _shutdown_tx: watch::Sender<bool>,
    /// Keeps the ingest buffer open so sends take the normal path
    _archive_rx: mpsc::Receiver<parley_server::data::types::ChatMessage>,
}

async fn make_cluster() -> Cluster {
    let topics = Arc::new(TopicService::memory());
    let cache = Arc::new(CacheService::memory());
    let store = Arc::new(MemoryMessageStore::new());
    for user in ["alice", "bob", "u1", "u2", "u3", "u4", "u5"] {
        store.add_user(user);
    }
    store.add_group("g1", &["u1", "u2", "u3", "u4", "u5"]);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut instances = Vec::new();
    for _ in 0..2 {
        let (manager, _handle) = ConnectionManager::start(
            Arc::new(StoreService::with_store(store.clone())),
            Arc::clone(&topics),
            Arc::new(Breakers::new()),
            shutdown_rx.clone(),
        );
        start_global_relay(
            Arc::clone(&topics),
            Arc::clone(&manager),
            shutdown_rx.clone(),
        );
        start_chat_bridge(
            Arc::clone(&topics),
            Arc::clone(&manager),
            shutdown_rx.clone(),
        );
        instances.push(Instance { manager });
    }
    // Let the subscriptions attach before anything publishes
    tokio::time::sleep(Duration::from_millis(10)).await;

    let queue = Arc::new(ReliableQueue::new(Arc::clone(&cache)));
    let (archive_tx, archive_rx) = mpsc::channel(64);
    let pipeline = ChatPipeline::new(
        Arc::clone(&cache),
        Arc::new(StoreService::with_store(store.clone())),
        Arc::clone(&topics),
        queue,
        Arc::new(Breakers::new()),
        archive_tx,
    );

    let b = instances.pop().unwrap();
    let a = instances.pop().unwrap();
    Cluster {
        topics,
        cache,
        store,
        pipeline,
        a,
        b,
        _shutdown_tx: shutdown_tx,
        _archive_rx: archive_rx,
    }
}

async fn connect(
    manager: &ConnectionManager,
    username: &str,
    groups: &[&str],
) -> mpsc::Receiver<Frame> {
    let (tx, rx) = mpsc::channel(32);
    let groups: HashSet<String> = groups.iter().map(|g| g.to_string()).collect();
    manager.register(username, Arc::new(groups), tx).await;
    rx
}

async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed")
}

async fn assert_no_frame(rx: &mut mpsc::Receiver<Frame>) {
    let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

#[tokio::test]
async fn pipeline_send_crosses_instances_exactly_once() {
    let cluster = make_cluster().await;
    let mut alice_rx = connect(&cluster.a.manager, "alice", &[]).await;
    let mut bob_rx = connect(&cluster.b.manager, "bob", &[]).await;

    let sent = cluster.pipeline.send("alice", "bob", "yo").await.unwrap();

    // Bob (instance B) receives via the shared chat channel
    match recv_frame(&mut bob_rx).await {
        Frame::Chat { id, content, .. } => {
            assert_eq!(id, sent.id);
            assert_eq!(content, "yo");
        }
        other => panic!("expected chat frame, got {other:?}"),
    }

    // Alice (instance A) gets the sender echo, and nothing else
    recv_frame(&mut alice_rx).await;
    assert_no_frame(&mut alice_rx).await;
    assert_no_frame(&mut bob_rx).await;

    // Side effects happened exactly once
    assert_eq!(cluster.store.message_count(), 1);
    let history = cluster.cache.conversation_history("alice", "bob").await.unwrap();
    assert_eq!(history.len(), 1);
    let unread = cluster.cache.unread_counts("bob").await.unwrap();
    assert_eq!(unread.get("alice"), Some(&1));
}

#[tokio::test]
async fn ws_direct_frame_relays_to_peer_instance() {
    let cluster = make_cluster().await;
    let mut bob_rx = connect(&cluster.b.manager, "bob", &[]).await;

    // Alice is on A; bob is only on B, so A publishes an addressed copy
    let mut frame: Frame =
        serde_json::from_str(r#"{"type":"chat","to":"bob","content":"hi"}"#).unwrap();
    frame.stamp("alice");
    cluster.a.manager.inbound("alice", frame).await;

    match recv_frame(&mut bob_rx).await {
        Frame::Chat { from, .. } => assert_eq!(from, "alice"),
        other => panic!("expected chat frame, got {other:?}"),
    }
}

#[tokio::test]
async fn group_fanout_splits_local_remote_and_offline() {
    let cluster = make_cluster().await;

    // u1, u2 on A; u3 on B; u4, u5 offline
    let mut u1_rx = connect(&cluster.a.manager, "u1", &["g1"]).await;
    let mut u2_rx = connect(&cluster.a.manager, "u2", &["g1"]).await;
    let mut u3_rx = connect(&cluster.b.manager, "u3", &["g1"]).await;

    // Observe the cross-process traffic A emits
    let mut global_sub = cluster.topics.subscribe(CHANNEL_WS_BROADCAST).await.unwrap();

    let mut frame: Frame =
        serde_json::from_str(r#"{"type":"group_chat","group_id":"g1","content":"hi"}"#).unwrap();
    frame.stamp("u1");
    cluster.a.manager.inbound("u1", frame).await;

    // Local push on A (sender excluded), relay delivery on B
    recv_frame(&mut u2_rx).await;
    recv_frame(&mut u3_rx).await;
    assert_no_frame(&mut u1_rx).await;

    // Exactly one addressed copy per non-local member (u3, u4, u5)
    let mut targets = Vec::new();
    for _ in 0..3 {
        let payload = tokio::time::timeout(Duration::from_secs(1), global_sub.recv())
            .await
            .unwrap()
            .unwrap();
        let envelope: RelayEnvelope = serde_json::from_slice(&payload).unwrap();
        targets.push(envelope.to);
    }
    targets.sort();
    assert_eq!(targets, vec!["u3", "u4", "u5"]);
    let extra = tokio::time::timeout(Duration::from_millis(100), global_sub.recv()).await;
    assert!(extra.is_err(), "more publishes than non-local members");
}
