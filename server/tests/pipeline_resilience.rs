//! Failure-path integration tests
//!
//! Wires the pipeline over in-memory backends with injected outages to
//! exercise the degradation paths: cache down, ingest buffer overflow,
//! and crash recovery through the reliable queue.

use std::sync::Arc;
use std::time::Duration;

use parley_server::core::config::PipelineConfig;
use parley_server::data::archive::{ArchiveService, MemoryArchive};
use parley_server::data::cache::{CacheService, InMemoryCache};
use parley_server::data::store::{MemoryMessageStore, StoreService};
use parley_server::data::topics::TopicService;
use parley_server::data::types::ChatMessage;
use parley_server::domain::breaker::{BreakerState, Breakers};
use parley_server::domain::chat::{BatchWriter, ChatPipeline, QueueWorker, ReliableQueue};
use tokio::sync::{mpsc, watch};

struct Rig {
    pipeline: ChatPipeline,
    cache_backend: Arc<InMemoryCache>,
    store: Arc<MemoryMessageStore>,
    sink: Arc<MemoryArchive>,
    queue: Arc<ReliableQueue>,
    breakers: Arc<Breakers>,
    archive_rx: Option<mpsc::Receiver<ChatMessage>>,
    config: PipelineConfig,
}

fn make_rig(buffer_capacity: usize) -> Rig {
    let cache_backend = Arc::new(InMemoryCache::new());
    let cache = Arc::new(CacheService::with_backend(cache_backend.clone()));
    let store = Arc::new(MemoryMessageStore::new());
    store.add_user("alice");
    store.add_user("bob");
    let sink = Arc::new(MemoryArchive::new());
    let queue = Arc::new(ReliableQueue::new(Arc::clone(&cache)));
    let breakers = Arc::new(Breakers::new());

    let config = PipelineConfig {
        buffer_capacity,
        batch_flush_interval_ms: 20,
        batch_flush_size: 10,
        queue_poll_interval_ms: 20,
        archive_retry_attempts: 2,
        archive_retry_base_delay_ms: 10,
    };

    let (archive_tx, archive_rx) = mpsc::channel(buffer_capacity);
    let pipeline = ChatPipeline::new(
        cache,
        Arc::new(StoreService::with_store(store.clone())),
        Arc::new(TopicService::memory()),
        Arc::clone(&queue),
        Arc::clone(&breakers),
        archive_tx,
    );

    Rig {
        pipeline,
        cache_backend,
        store,
        sink,
        queue,
        breakers,
        archive_rx: Some(archive_rx),
        config,
    }
}

impl Rig {
    /// Start the batch writer (the "resume the writer" step in tests that
    /// begin with it paused)
    fn start_writer(&mut self, shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let writer = BatchWriter::new(
            self.archive_rx.take().expect("writer already started"),
            Arc::new(ArchiveService::with_sink(self.sink.clone())),
            Arc::clone(&self.queue),
            Arc::clone(&self.breakers),
            &self.config,
        );
        writer.start(shutdown_rx)
    }

    fn start_worker(&self, shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let worker = QueueWorker::new(
            Arc::clone(&self.queue),
            Arc::new(ArchiveService::with_sink(self.sink.clone())),
            Arc::clone(&self.breakers),
            &self.config,
        );
        worker.start(shutdown_rx)
    }
}

#[tokio::test]
async fn cache_down_send_succeeds_and_history_falls_back() {
    let rig = make_rig(64);
    rig.cache_backend.set_failing(true);

    // Sends are accepted while the cache is down
    for i in 0..3 {
        rig.pipeline
            .send("alice", "bob", &format!("hello {i}"))
            .await
            .unwrap();
    }
    assert_eq!(rig.store.message_count(), 3);

    // Two cache calls per send (history append + unread) trip the
    // aggressive cache breaker
    assert_eq!(rig.breakers.cache.state(), BreakerState::Open);

    // History is served from the durable store
    let history = rig.pipeline.history("alice", "bob").await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].content, "hello 0");
}

#[tokio::test]
async fn buffer_overflow_lands_in_pending_queue_then_archives() {
    let mut rig = make_rig(5);

    // Writer paused: the first five fill the buffer, the sixth overflows
    for i in 0..6 {
        rig.pipeline
            .send("alice", "bob", &format!("m{i}"))
            .await
            .unwrap();
    }
    let (pending, _) = rig.queue.depths().await.unwrap();
    assert_eq!(pending, 1);

    // Resume the writer and the queue worker: everything archives
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let writer = rig.start_writer(shutdown_rx.clone());
    let worker = rig.start_worker(shutdown_rx);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let _ = shutdown_tx.send(true);
    writer.await.unwrap();
    worker.await.unwrap();

    assert_eq!(rig.sink.records().len(), 6);
    assert_eq!(rig.queue.depths().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn crash_between_claim_and_archive_recovers_on_restart() {
    let rig = make_rig(64);
    let msg = ChatMessage::direct("alice", "bob", "survive me");
    rig.queue.enqueue(&msg).await.unwrap();

    // The worker claims the entry, then the process "crashes" before the
    // archive write: the claim sits in processing
    rig.queue.claim().await.unwrap().unwrap();
    assert_eq!(rig.queue.depths().await.unwrap(), (0, 1));

    // Restart: the startup sweep re-queues, the worker archives
    rig.queue.recover().await.unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = rig.start_worker(shutdown_rx);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let _ = shutdown_tx.send(true);
    worker.await.unwrap();

    let records = rig.sink.records();
    assert_eq!(records.len(), 1);
    let archived: ChatMessage = serde_json::from_slice(&records[0].payload).unwrap();
    assert_eq!(archived.id, msg.id);
    assert_eq!(rig.queue.depths().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn store_and_archive_both_down_message_stays_recoverable() {
    let mut rig = make_rig(64);
    rig.store.set_failing(true);
    rig.sink.set_failing(true);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let writer = rig.start_writer(shutdown_rx);

    // Accepted despite the store being down
    let msg = rig.pipeline.send("alice", "bob", "hold on").await.unwrap();
    assert_eq!(rig.store.message_count(), 0);

    // The writer's archive attempt fails and requeues to pending: the
    // message is never in none of {store, pending, processing, archive}
    tokio::time::sleep(Duration::from_millis(200)).await;
    let (pending, processing) = rig.queue.depths().await.unwrap();
    assert_eq!(pending + processing, 1, "message lost from every tier");

    let _ = shutdown_tx.send(true);
    writer.await.unwrap();

    // The backends recover; the queue worker drains the survivor
    rig.sink.set_failing(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = rig.start_worker(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let _ = shutdown_tx.send(true);
    worker.await.unwrap();

    let records = rig.sink.records();
    assert_eq!(records.len(), 1);
    let archived: ChatMessage = serde_json::from_slice(&records[0].payload).unwrap();
    assert_eq!(archived.id, msg.id);
}

#[tokio::test]
async fn overload_only_when_buffer_and_queue_both_fail() {
    let rig = make_rig(1);

    // Fill the one-slot buffer
    rig.pipeline.send("alice", "bob", "fits").await.unwrap();

    // Overflow path works while the cache is up
    rig.pipeline.send("alice", "bob", "overflows").await.unwrap();
    assert_eq!(rig.queue.depths().await.unwrap().0, 1);

    // With the cache down too, the overflow has nowhere to go
    rig.cache_backend.set_failing(true);
    let result = rig.pipeline.send("alice", "bob", "rejected").await;
    assert!(matches!(
        result,
        Err(parley_server::domain::PipelineError::Overloaded)
    ));
}
