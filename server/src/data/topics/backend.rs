//! Topic backend trait definition
//!
//! Broadcast (Pub/Sub) semantics only: fire-and-forget, every active
//! subscriber receives each message, nothing is persisted. Messages that
//! need stronger delivery guarantees go through the reliable queue on the
//! cache store, not through topics.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::error::TopicError;

/// Subscription to a broadcast topic
///
/// Both backends hand out a receiver on a local broadcast channel; for the
/// Redis backend a bridge task feeds that channel from the Redis
/// subscription.
pub struct Subscription {
    rx: broadcast::Receiver<Vec<u8>>,
}

impl Subscription {
    pub(super) fn new(rx: broadcast::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Receive the next message
    ///
    /// `Lagged` means the subscriber fell behind a bounded buffer and missed
    /// messages; callers tolerate this (pub/sub is best-effort).
    pub async fn recv(&mut self) -> Result<Vec<u8>, TopicError> {
        self.rx.recv().await.map_err(Into::into)
    }
}

/// Topic backend trait
///
/// Both the in-memory and Redis backends implement this trait. Publishing
/// with no subscribers silently drops the message.
#[async_trait]
pub trait TopicBackend: Send + Sync {
    /// Publish a message to a topic (fire-and-forget)
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TopicError>;

    /// Subscribe to a topic
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TopicError>;

    /// Stop background bridge tasks, if any
    async fn shutdown(&self) {}

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
