//! Distributed pub/sub topics
//!
//! Fire-and-forget broadcast with pluggable backends:
//! - In-memory (default) - local-only, for tests and single-process runs
//! - Redis - distributed, for multi-process fleets
//!
//! Topics follow the cache backend configuration: a Redis cache implies
//! Redis pub/sub, so every process sharing the cache also shares the
//! broadcast channels (`chat:messages`, `ws:broadcast:global`, per-group
//! channels).
//!
//! Delivery is best-effort: no persistence, lagging subscribers miss
//! messages. Anything needing stronger guarantees goes through the reliable
//! queue on the cache store.

mod backend;
mod error;
mod memory;
mod redis;

use std::sync::Arc;

pub use backend::{Subscription, TopicBackend};
pub use error::TopicError;
pub use memory::MemoryTopicBackend;

use crate::core::config::{CacheBackendType, CacheConfig};

/// Topic service providing broadcast pub/sub over the configured backend
pub struct TopicService {
    backend: Arc<dyn TopicBackend>,
}

impl std::fmt::Debug for TopicService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicService")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl TopicService {
    /// Create the topic service following the cache backend configuration
    pub async fn from_cache_config(config: &CacheConfig) -> Result<Self, TopicError> {
        let backend: Arc<dyn TopicBackend> = match config.backend {
            CacheBackendType::Memory => {
                tracing::debug!("Initializing in-memory topics");
                Arc::new(MemoryTopicBackend::new())
            }
            CacheBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    TopicError::Config("redis_url required for Redis backend".into())
                })?;
                Arc::new(redis::RedisTopicBackend::new(url).await?)
            }
        };
        Ok(Self { backend })
    }

    /// In-memory service for tests and dev mode
    pub fn memory() -> Self {
        Self {
            backend: Arc::new(MemoryTopicBackend::new()),
        }
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Publish raw bytes to a topic (fire-and-forget)
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TopicError> {
        self.backend.publish(topic, payload).await
    }

    /// Publish a JSON-serializable value to a topic
    pub async fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        value: &T,
    ) -> Result<(), TopicError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| TopicError::Serialization(e.to_string()))?;
        self.backend.publish(topic, &payload).await
    }

    /// Subscribe to a topic
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, TopicError> {
        self.backend.subscribe(topic).await
    }

    /// Stop background bridge tasks
    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::ChatMessage;

    #[tokio::test]
    async fn test_publish_json_roundtrip() {
        let topics = TopicService::memory();
        let mut sub = topics.subscribe("chat:messages").await.unwrap();

        let msg = ChatMessage::direct("alice", "bob", "hi");
        topics.publish_json("chat:messages", &msg).await.unwrap();

        let payload = sub.recv().await.unwrap();
        let received: ChatMessage = serde_json::from_slice(&payload).unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_backend_name() {
        let topics = TopicService::memory();
        assert_eq!(topics.backend_name(), "memory");
    }
}
