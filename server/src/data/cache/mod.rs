//! Cache module
//!
//! Provides the hot tier for conversations, unread counters, sessions, and
//! the reliable queue, with pluggable backends:
//! - In-memory (default) - single process, used by tests and dev mode
//! - Redis - shared across the fleet
//!
//! Message payloads are stored as JSON so cooperating services can read the
//! same keys.

mod backend;
mod error;
mod key;
mod memory;
mod redis;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use key::CacheKey;
pub use memory::InMemoryCache;

use crate::core::config::{CacheBackendType, CacheConfig};
use crate::core::constants::{CONVERSATION_CACHE_MAX, CONVERSATION_CACHE_TTL_SECS};
use crate::data::types::ChatMessage;

/// Cache service providing typed chat operations over the cache backend
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    conversation_max: usize,
    conversation_ttl: Duration,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl CacheService {
    /// Create a new cache service from configuration
    pub async fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendType::Memory => {
                tracing::debug!("Initializing in-memory cache");
                Arc::new(InMemoryCache::new())
            }
            CacheBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    CacheError::Config("redis_url required for Redis backend".into())
                })?;
                // Note: RedisCache::new logs sanitized URL internally
                Arc::new(redis::RedisCache::new(url).await?)
            }
        };

        Ok(Self::with_backend(backend))
    }

    /// Build directly over a backend (used by tests)
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            conversation_max: CONVERSATION_CACHE_MAX,
            conversation_ttl: Duration::from_secs(CONVERSATION_CACHE_TTL_SECS),
        }
    }

    /// In-memory service for tests and dev mode
    pub fn memory() -> Self {
        Self::with_backend(Arc::new(InMemoryCache::new()))
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    // =========================================================================
    // Conversation history
    // =========================================================================

    /// Upsert a message into its conversation sorted set, trim to the most
    /// recent N, and renew the TTL
    pub async fn append_message(&self, msg: &ChatMessage) -> Result<(), CacheError> {
        let key = conversation_cache_key(msg);
        let payload =
            serde_json::to_vec(msg).map_err(|e| CacheError::Serialization(e.to_string()))?;

        self.backend.zset_add(&key, msg.timestamp, &payload).await?;
        self.backend
            .zset_trim_to_newest(&key, self.conversation_max)
            .await?;
        self.backend.expire(&key, self.conversation_ttl).await?;
        Ok(())
    }

    /// Most recent direct-conversation messages, oldest first
    pub async fn conversation_history(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Vec<ChatMessage>, CacheError> {
        self.read_history(&CacheKey::conversation(a, b)).await
    }

    /// Most recent group messages, oldest first
    pub async fn group_history(&self, group_id: &str) -> Result<Vec<ChatMessage>, CacheError> {
        self.read_history(&CacheKey::group_messages(group_id)).await
    }

    async fn read_history(&self, key: &str) -> Result<Vec<ChatMessage>, CacheError> {
        let raw = self.backend.zset_newest(key, self.conversation_max).await?;
        let mut messages = Vec::with_capacity(raw.len());
        for payload in raw {
            match serde_json::from_slice::<ChatMessage>(&payload) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Dropping undeserializable cached message");
                }
            }
        }
        Ok(messages)
    }

    /// Bulk-write messages into a conversation set (history repopulation)
    pub async fn repopulate(&self, messages: &[ChatMessage]) -> Result<(), CacheError> {
        for msg in messages {
            self.append_message(msg).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Unread counters
    // =========================================================================

    /// Increment the unread counter for `recipient` from `sender`
    pub async fn incr_unread(&self, recipient: &str, sender: &str) -> Result<i64, CacheError> {
        self.backend
            .hash_incr(&CacheKey::unread(recipient), sender, 1)
            .await
    }

    /// All unread counters for a user, keyed by peer
    pub async fn unread_counts(&self, user: &str) -> Result<HashMap<String, i64>, CacheError> {
        let raw = self.backend.hash_get_all(&CacheKey::unread(user)).await?;
        let mut counts = HashMap::with_capacity(raw.len());
        for (peer, value) in raw {
            match value.parse::<i64>() {
                Ok(count) => {
                    counts.insert(peer, count);
                }
                Err(_) => {
                    tracing::warn!(user = %user, peer = %peer, value = %value, "Unread counter is not an integer");
                }
            }
        }
        Ok(counts)
    }

    /// Clear the unread counter for `user` from `peer` (conversation opened)
    pub async fn clear_unread(&self, user: &str, peer: &str) -> Result<bool, CacheError> {
        self.backend.hash_del(&CacheKey::unread(user), peer).await
    }

    // =========================================================================
    // Hash / list / key passthroughs (sessions, reliable queue)
    // =========================================================================

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.delete(key).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.backend.expire(key, ttl).await
    }

    pub async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.backend.hash_get_all(key).await
    }

    pub async fn hash_set_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), CacheError> {
        self.backend.hash_set_all(key, fields).await
    }

    pub async fn list_push_tail(&self, key: &str, value: &[u8]) -> Result<u64, CacheError> {
        self.backend.list_push_tail(key, value).await
    }

    pub async fn list_move_head_to_tail(
        &self,
        src: &str,
        dst: &str,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        self.backend.list_move_head_to_tail(src, dst).await
    }

    pub async fn list_remove(&self, key: &str, value: &[u8]) -> Result<u64, CacheError> {
        self.backend.list_remove(key, value).await
    }

    pub async fn list_len(&self, key: &str) -> Result<u64, CacheError> {
        self.backend.list_len(key).await
    }

    /// Health check
    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.backend.health_check().await
    }
}

/// Sorted-set key for the conversation a message belongs to
fn conversation_cache_key(msg: &ChatMessage) -> String {
    if msg.is_group {
        CacheKey::group_messages(&msg.group_id)
    } else {
        CacheKey::conversation(&msg.from, &msg.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_read_history() {
        let cache = CacheService::memory();

        let m1 = ChatMessage {
            timestamp: 100,
            ..ChatMessage::direct("alice", "bob", "hi")
        };
        let m2 = ChatMessage {
            timestamp: 200,
            ..ChatMessage::direct("bob", "alice", "hey")
        };
        cache.append_message(&m1).await.unwrap();
        cache.append_message(&m2).await.unwrap();

        // Symmetric key: both orderings see the same history
        let history = cache.conversation_history("bob", "alice").await.unwrap();
        assert_eq!(history, vec![m1, m2]);
    }

    #[tokio::test]
    async fn test_conversation_trimmed_to_cap() {
        let cache = CacheService::memory();
        for i in 0..(CONVERSATION_CACHE_MAX as i64 + 20) {
            let msg = ChatMessage {
                timestamp: i,
                ..ChatMessage::direct("alice", "bob", &format!("m{i}"))
            };
            cache.append_message(&msg).await.unwrap();
        }

        let history = cache.conversation_history("alice", "bob").await.unwrap();
        assert_eq!(history.len(), CONVERSATION_CACHE_MAX);
        // The oldest entries were evicted
        assert_eq!(history[0].timestamp, 20);
    }

    #[tokio::test]
    async fn test_group_history() {
        let cache = CacheService::memory();
        let msg = ChatMessage::group("alice", "g1", "hi all");
        cache.append_message(&msg).await.unwrap();

        let history = cache.group_history("g1").await.unwrap();
        assert_eq!(history, vec![msg]);
    }

    #[tokio::test]
    async fn test_unread_counters() {
        let cache = CacheService::memory();
        assert_eq!(cache.incr_unread("bob", "alice").await.unwrap(), 1);
        assert_eq!(cache.incr_unread("bob", "alice").await.unwrap(), 2);
        assert_eq!(cache.incr_unread("bob", "carol").await.unwrap(), 1);

        let counts = cache.unread_counts("bob").await.unwrap();
        assert_eq!(counts.get("alice"), Some(&2));
        assert_eq!(counts.get("carol"), Some(&1));

        assert!(cache.clear_unread("bob", "alice").await.unwrap());
        let counts = cache.unread_counts("bob").await.unwrap();
        assert!(!counts.contains_key("alice"));
        assert_eq!(counts.get("carol"), Some(&1));
    }

    #[tokio::test]
    async fn test_cached_message_roundtrip_is_byte_equivalent() {
        let cache = CacheService::memory();
        let msg = ChatMessage::direct("alice", "bob", "hi");
        cache.append_message(&msg).await.unwrap();

        let history = cache.conversation_history("alice", "bob").await.unwrap();
        assert_eq!(
            serde_json::to_vec(&history[0]).unwrap(),
            serde_json::to_vec(&msg).unwrap()
        );
    }
}
