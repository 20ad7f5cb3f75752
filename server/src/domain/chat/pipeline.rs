//! Message pipeline
//!
//! Ingest path for every accepted message:
//!
//! ```text
//! send ──▶ [durable store write] ──▶ [cache write] ──▶ [unread++]
//!                 │
//!                 ├─▶ [in-memory ring] ──▶ BatchWriter ──▶ archive log
//!                 │        │ (on overflow)
//!                 │        ▼
//!                 │   pending queue ──▶ QueueWorker
//!                 └─▶ [pub/sub publish]
//! ```
//!
//! Every step after validation is advisory except the archive buffering:
//! a message that fits neither the in-memory buffer nor the persistent
//! queue is the only ingest-time error. The durable store write is
//! absorb-and-log by policy (availability over durability; the queue path
//! keeps the message recoverable).

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;

use super::queue::ReliableQueue;
use crate::core::constants::{CHANNEL_CHAT_MESSAGES, HISTORY_PAGE_SIZE, MAX_CONTENT_BYTES};
use crate::data::cache::{CacheKey, CacheService};
use crate::data::error::TransientError;
use crate::data::store::StoreService;
use crate::data::topics::TopicService;
use crate::data::types::ChatMessage;
use crate::domain::breaker::{BreakerError, Breakers};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("Not a member of group {0}")]
    NotGroupMember(String),

    #[error("Pipeline overloaded, retry later")]
    Overloaded,

    #[error("Service degraded: {0}")]
    Unavailable(String),
}

/// Message pipeline
pub struct ChatPipeline {
    cache: Arc<CacheService>,
    store: Arc<StoreService>,
    topics: Arc<TopicService>,
    queue: Arc<ReliableQueue>,
    breakers: Arc<Breakers>,
    archive_tx: mpsc::Sender<ChatMessage>,
}

impl ChatPipeline {
    pub fn new(
        cache: Arc<CacheService>,
        store: Arc<StoreService>,
        topics: Arc<TopicService>,
        queue: Arc<ReliableQueue>,
        breakers: Arc<Breakers>,
        archive_tx: mpsc::Sender<ChatMessage>,
    ) -> Self {
        Self {
            cache,
            store,
            topics,
            queue,
            breakers,
            archive_tx,
        }
    }

    // =========================================================================
    // Ingest
    // =========================================================================

    /// Accept a direct message
    ///
    /// On success the message is durably persisted or recoverable from the
    /// persistent queue, and queued for archive.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        content: &str,
    ) -> Result<ChatMessage, PipelineError> {
        let content = validate_content(content)?;
        self.validate_recipient(to).await?;

        let msg = ChatMessage::direct(from, to, content);
        self.ingest(msg).await
    }

    /// Accept a group message
    pub async fn send_group(
        &self,
        from: &str,
        group_id: &str,
        content: &str,
    ) -> Result<ChatMessage, PipelineError> {
        let content = validate_content(content)?;
        self.validate_membership(group_id, from).await?;

        let msg = ChatMessage::group(from, group_id, content);
        self.ingest(msg).await
    }

    async fn ingest(&self, msg: ChatMessage) -> Result<ChatMessage, PipelineError> {
        let started = Instant::now();

        // 1. Durable persist - the source of truth. Failure is absorbed:
        //    the archive queue keeps the message recoverable.
        if let Err(e) = self
            .breakers
            .database
            .call(|| self.store.insert_message(&msg))
            .await
        {
            metrics::counter!("messages_failed").increment(1);
            tracing::error!(id = %msg.id, error = %e, "Durable persist failed, continuing");
        }

        // 2. Cache write (best-effort)
        if let Err(e) = self
            .breakers
            .cache
            .call(|| self.cache.append_message(&msg))
            .await
        {
            tracing::warn!(id = %msg.id, error = %e, "Cache write failed");
        }

        // 3. Unread increment (direct messages only, best-effort)
        if !msg.is_group {
            if let Err(e) = self
                .breakers
                .cache
                .call(|| self.cache.incr_unread(&msg.to, &msg.from))
                .await
            {
                tracing::warn!(id = %msg.id, error = %e, "Unread increment failed");
            }
        }

        // 4. Buffer for archive - the only ingest-time error path
        self.buffer_for_archive(&msg).await?;

        // 5. Pub/sub publish so peer processes can deliver
        self.publish(&msg).await;

        metrics::counter!("messages_sent").increment(1);
        metrics::histogram!("delivery_latency_seconds").record(started.elapsed().as_secs_f64());

        Ok(msg)
    }

    /// Non-blocking buffer send with persistent-queue overflow
    async fn buffer_for_archive(&self, msg: &ChatMessage) -> Result<(), PipelineError> {
        let overflowed = match self.archive_tx.try_send(msg.clone()) {
            Ok(()) => false,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(id = %msg.id, "Ingest buffer closed, using persistent queue");
                true
            }
        };

        if overflowed {
            self.queue.enqueue(msg).await.map_err(|e| {
                tracing::error!(id = %msg.id, error = %e, "Persistent queue enqueue failed");
                PipelineError::Overloaded
            })?;
        }

        metrics::counter!("messages_queued").increment(1);
        metrics::gauge!("buffer_depth")
            .set((self.archive_tx.max_capacity() - self.archive_tx.capacity()) as f64);
        Ok(())
    }

    async fn publish(&self, msg: &ChatMessage) {
        if let Err(e) = self.topics.publish_json(CHANNEL_CHAT_MESSAGES, msg).await {
            tracing::warn!(id = %msg.id, error = %e, "Chat channel publish failed");
        }
        if msg.is_group {
            let channel = CacheKey::group_channel(&msg.group_id);
            if let Err(e) = self.topics.publish_json(&channel, msg).await {
                tracing::warn!(id = %msg.id, channel = %channel, error = %e, "Group channel publish failed");
            }
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Reject definitively unknown recipients; skip the check when the
    /// store is degraded (availability bias)
    async fn validate_recipient(&self, to: &str) -> Result<(), PipelineError> {
        match self
            .breakers
            .database
            .call(|| self.store.user_exists(to))
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(PipelineError::UnknownRecipient(to.to_string())),
            Err(e) => {
                tracing::warn!(recipient = %to, error = %e, "Recipient validation skipped, store degraded");
                Ok(())
            }
        }
    }

    async fn validate_membership(&self, group_id: &str, user: &str) -> Result<(), PipelineError> {
        match self
            .breakers
            .database
            .call(|| self.store.is_group_member(group_id, user))
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(PipelineError::NotGroupMember(group_id.to_string())),
            Err(BreakerError::Inner(e)) if !e.is_transient() => {
                Err(PipelineError::Validation(format!("invalid group id {group_id}")))
            }
            Err(e) => {
                tracing::warn!(group_id = %group_id, error = %e, "Membership validation skipped, store degraded");
                Ok(())
            }
        }
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Most recent direct history, oldest first
    ///
    /// Cache first; on breaker-open, cache error, or empty set, fall back
    /// to the durable store and repopulate the cache asynchronously.
    pub async fn history(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, PipelineError> {
        match self
            .breakers
            .cache
            .call(|| self.cache.conversation_history(a, b))
            .await
        {
            Ok(messages) if !messages.is_empty() => Ok(normalize_history(messages)),
            Ok(_) => self.direct_history_from_store(a, b, true).await,
            Err(e) => {
                tracing::warn!(error = %e, "Cache history read failed, falling back to store");
                self.direct_history_from_store(a, b, true).await
            }
        }
    }

    /// Direct history older than `before_ts`; always served by the store
    pub async fn history_before(
        &self,
        a: &str,
        b: &str,
        before_ts: i64,
    ) -> Result<Vec<ChatMessage>, PipelineError> {
        let newest_first = self
            .breakers
            .database
            .call(|| {
                self.store
                    .direct_messages_before(a, b, before_ts, HISTORY_PAGE_SIZE)
            })
            .await
            .map_err(|e| PipelineError::Unavailable(e.to_string()))?;
        let mut messages = newest_first;
        messages.reverse();
        Ok(messages)
    }

    /// Most recent group history, oldest first; requester must be a member
    pub async fn group_history(
        &self,
        group_id: &str,
        user: &str,
    ) -> Result<Vec<ChatMessage>, PipelineError> {
        self.validate_membership(group_id, user).await?;

        match self
            .breakers
            .cache
            .call(|| self.cache.group_history(group_id))
            .await
        {
            Ok(messages) if !messages.is_empty() => Ok(normalize_history(messages)),
            Ok(_) => self.group_history_from_store(group_id).await,
            Err(e) => {
                tracing::warn!(group_id = %group_id, error = %e, "Cache group history read failed, falling back to store");
                self.group_history_from_store(group_id).await
            }
        }
    }

    async fn direct_history_from_store(
        &self,
        a: &str,
        b: &str,
        repopulate: bool,
    ) -> Result<Vec<ChatMessage>, PipelineError> {
        let newest_first = self
            .breakers
            .database
            .call(|| self.store.recent_direct_messages(a, b, HISTORY_PAGE_SIZE))
            .await
            .map_err(|e| PipelineError::Unavailable(e.to_string()))?;

        let mut messages = newest_first;
        messages.reverse();

        if repopulate && !messages.is_empty() {
            self.spawn_repopulate(messages.clone());
        }
        Ok(messages)
    }

    async fn group_history_from_store(
        &self,
        group_id: &str,
    ) -> Result<Vec<ChatMessage>, PipelineError> {
        let newest_first = self
            .breakers
            .database
            .call(|| self.store.recent_group_messages(group_id, HISTORY_PAGE_SIZE))
            .await
            .map_err(|e| PipelineError::Unavailable(e.to_string()))?;

        let mut messages = newest_first;
        messages.reverse();

        if !messages.is_empty() {
            self.spawn_repopulate(messages.clone());
        }
        Ok(messages)
    }

    /// Asynchronous cache repopulation after a store fallback
    fn spawn_repopulate(&self, messages: Vec<ChatMessage>) {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            if let Err(e) = cache.repopulate(&messages).await {
                tracing::debug!(error = %e, "Cache repopulation failed");
            }
        });
    }

    // =========================================================================
    // Unread counters
    // =========================================================================

    /// All unread counters for a user, keyed by peer
    pub async fn unread(&self, user: &str) -> Result<HashMap<String, i64>, PipelineError> {
        self.breakers
            .cache
            .call(|| self.cache.unread_counts(user))
            .await
            .map_err(|e| PipelineError::Unavailable(e.to_string()))
    }

    /// Clear the unread counter for a conversation the user opened
    pub async fn mark_read(&self, user: &str, peer: &str) -> Result<(), PipelineError> {
        self.breakers
            .cache
            .call(|| self.cache.clear_unread(user, peer))
            .await
            .map_err(|e| PipelineError::Unavailable(e.to_string()))?;
        Ok(())
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// (pending, processing) persistent queue depths
    pub async fn queue_depths(&self) -> Result<(u64, u64), PipelineError> {
        self.queue
            .depths()
            .await
            .map_err(|e| PipelineError::Unavailable(e.to_string()))
    }
}

/// Trim, reject empty and oversized content
fn validate_content(content: &str) -> Result<&str, PipelineError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Validation("empty content".into()));
    }
    if trimmed.len() > MAX_CONTENT_BYTES {
        return Err(PipelineError::Validation(format!(
            "content exceeds {MAX_CONTENT_BYTES} bytes"
        )));
    }
    Ok(trimmed)
}

/// Sort ascending by timestamp and drop duplicate ids
fn normalize_history(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
    let mut seen = HashSet::with_capacity(messages.len());
    messages.retain(|m| seen.insert(m.id.clone()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::MemoryMessageStore;
    use crate::data::store::MessageStore;

    pub(crate) struct TestPipeline {
        pub pipeline: ChatPipeline,
        pub store: Arc<MemoryMessageStore>,
        pub cache: Arc<CacheService>,
        pub queue: Arc<ReliableQueue>,
        pub archive_rx: mpsc::Receiver<ChatMessage>,
    }

    pub(crate) fn make_pipeline(buffer_capacity: usize) -> TestPipeline {
        let store = Arc::new(MemoryMessageStore::new());
        store.add_user("alice");
        store.add_user("bob");
        store.add_group("g1", &["alice", "bob"]);

        let cache = Arc::new(CacheService::memory());
        let queue = Arc::new(ReliableQueue::new(Arc::clone(&cache)));
        let (archive_tx, archive_rx) = mpsc::channel(buffer_capacity);

        let pipeline = ChatPipeline::new(
            Arc::clone(&cache),
            Arc::new(StoreService::with_store(store.clone())),
            Arc::new(TopicService::memory()),
            Arc::clone(&queue),
            Arc::new(Breakers::new()),
            archive_tx,
        );

        TestPipeline {
            pipeline,
            store,
            cache,
            queue,
            archive_rx,
        }
    }

    #[tokio::test]
    async fn test_send_persists_caches_and_buffers() {
        let mut t = make_pipeline(16);
        let msg = t.pipeline.send("alice", "bob", "hi").await.unwrap();

        assert!(!msg.id.is_empty());
        assert!(t.store.contains_message(&msg.id));

        let history = t.cache.conversation_history("alice", "bob").await.unwrap();
        assert_eq!(history, vec![msg.clone()]);

        let unread = t.cache.unread_counts("bob").await.unwrap();
        assert_eq!(unread.get("alice"), Some(&1));

        let buffered = t.archive_rx.recv().await.unwrap();
        assert_eq!(buffered, msg);
    }

    #[tokio::test]
    async fn test_send_rejects_empty_and_oversized_content() {
        let t = make_pipeline(16);
        assert!(matches!(
            t.pipeline.send("alice", "bob", "   ").await,
            Err(PipelineError::Validation(_))
        ));
        let oversized = "x".repeat(MAX_CONTENT_BYTES + 1);
        assert!(matches!(
            t.pipeline.send("alice", "bob", &oversized).await,
            Err(PipelineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_send_rejects_unknown_recipient() {
        let t = make_pipeline(16);
        assert!(matches!(
            t.pipeline.send("alice", "nobody", "hi").await,
            Err(PipelineError::UnknownRecipient(_))
        ));
    }

    #[tokio::test]
    async fn test_send_group_requires_membership() {
        let t = make_pipeline(16);
        t.store.add_user("carol");
        assert!(matches!(
            t.pipeline.send_group("carol", "g1", "hi").await,
            Err(PipelineError::NotGroupMember(_))
        ));

        let msg = t.pipeline.send_group("alice", "g1", "hi all").await.unwrap();
        assert!(msg.is_group);
    }

    #[tokio::test]
    async fn test_store_failure_is_absorbed() {
        let mut t = make_pipeline(16);
        t.store.set_failing(true);

        // Recipient validation is skipped while the store is degraded,
        // persist fails, yet the send is accepted.
        let msg = t.pipeline.send("alice", "bob", "hi").await.unwrap();
        assert!(!t.store.contains_message(&msg.id));

        // Still buffered for archive and visible in cache
        assert_eq!(t.archive_rx.recv().await.unwrap(), msg);
        let history = t.cache.conversation_history("alice", "bob").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_buffer_overflow_goes_to_pending_queue() {
        let t = make_pipeline(1);
        // Nothing drains archive_rx: the second send overflows
        t.pipeline.send("alice", "bob", "first").await.unwrap();
        t.pipeline.send("alice", "bob", "second").await.unwrap();

        let (pending, _) = t.queue.depths().await.unwrap();
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn test_history_prefers_cache() {
        let t = make_pipeline(16);
        let m1 = t.pipeline.send("alice", "bob", "one").await.unwrap();
        let m2 = t.pipeline.send("alice", "bob", "two").await.unwrap();

        let history = t.pipeline.history("bob", "alice").await.unwrap();
        let ids: HashSet<&str> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(history.len(), 2);
        assert!(ids.contains(m1.id.as_str()) && ids.contains(m2.id.as_str()));
    }

    #[tokio::test]
    async fn test_history_falls_back_to_store_when_cache_empty() {
        let t = make_pipeline(16);
        // Bypass the cache: insert into the store only
        let msg = ChatMessage::direct("alice", "bob", "old");
        t.store.insert_message(&msg).await.unwrap();

        let history = t.pipeline.history("alice", "bob").await.unwrap();
        assert_eq!(history, vec![msg]);
    }

    #[tokio::test]
    async fn test_history_sorted_without_duplicates() {
        let t = make_pipeline(16);
        let mut m1 = ChatMessage::direct("alice", "bob", "one");
        m1.timestamp = 10;
        let mut m2 = ChatMessage::direct("bob", "alice", "two");
        m2.timestamp = 5;
        t.cache.append_message(&m1).await.unwrap();
        t.cache.append_message(&m1).await.unwrap();
        t.cache.append_message(&m2).await.unwrap();

        let history = t.pipeline.history("alice", "bob").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[tokio::test]
    async fn test_history_before_paginates_store() {
        let t = make_pipeline(16);
        for ts in 1..=5 {
            let msg = ChatMessage {
                timestamp: ts,
                ..ChatMessage::direct("alice", "bob", &format!("m{ts}"))
            };
            t.store.insert_message(&msg).await.unwrap();
        }

        let page = t.pipeline.history_before("alice", "bob", 4).await.unwrap();
        assert_eq!(page.iter().map(|m| m.timestamp).collect::<Vec<_>>(), vec![
            1, 2, 3
        ]);
    }

    #[tokio::test]
    async fn test_unread_and_mark_read() {
        let t = make_pipeline(16);
        t.pipeline.send("alice", "bob", "one").await.unwrap();
        t.pipeline.send("alice", "bob", "two").await.unwrap();

        let unread = t.pipeline.unread("bob").await.unwrap();
        assert_eq!(unread.get("alice"), Some(&2));

        t.pipeline.mark_read("bob", "alice").await.unwrap();
        let unread = t.pipeline.unread("bob").await.unwrap();
        assert!(unread.is_empty());
    }

    #[tokio::test]
    async fn test_chat_channel_carries_each_message_once() {
        let store = Arc::new(MemoryMessageStore::new());
        store.add_user("alice");
        store.add_user("bob");
        let cache = Arc::new(CacheService::memory());
        let topics = Arc::new(TopicService::memory());
        let queue = Arc::new(ReliableQueue::new(Arc::clone(&cache)));
        let (archive_tx, _archive_rx) = mpsc::channel(16);
        let pipeline = ChatPipeline::new(
            cache,
            Arc::new(StoreService::with_store(store)),
            Arc::clone(&topics),
            queue,
            Arc::new(Breakers::new()),
            archive_tx,
        );

        let mut sub = topics.subscribe(CHANNEL_CHAT_MESSAGES).await.unwrap();
        let sent = pipeline.send("alice", "bob", "yo").await.unwrap();

        let payload = sub.recv().await.unwrap();
        let published: ChatMessage = serde_json::from_slice(&payload).unwrap();
        assert_eq!(published, sent);
    }
}
