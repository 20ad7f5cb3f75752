//! Cache backend trait definition

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

/// Cache backend trait
///
/// Defines the interface for cache implementations. Both the in-memory and
/// Redis backends implement this trait. The operation set mirrors the Redis
/// commands the messaging core depends on: sorted sets for conversation
/// history, hashes for unread counters and sessions, and lists for the
/// reliable queue.
///
/// # Consistency Notes
///
/// Individual operations are atomic. `list_move_head_to_tail` in particular
/// must be a single atomic step (Redis `LMOVE`): the reliable-queue claim
/// depends on an entry never being in neither list.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Delete a key (any type)
    ///
    /// Returns `true` if the key existed before deletion.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Set or renew a TTL on an existing key
    ///
    /// Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    // =========================================================================
    // Sorted sets (conversation history)
    // =========================================================================

    /// Add a member with the given score (`ZADD`)
    async fn zset_add(&self, key: &str, score: i64, member: &[u8]) -> Result<(), CacheError>;

    /// Trim the set to its `keep` highest-scored members (`ZREMRANGEBYRANK`)
    ///
    /// Returns the number of members removed.
    async fn zset_trim_to_newest(&self, key: &str, keep: usize) -> Result<u64, CacheError>;

    /// Fetch the `count` highest-scored members in ascending score order
    /// (`ZRANGE key -count -1`)
    async fn zset_newest(&self, key: &str, count: usize) -> Result<Vec<Vec<u8>>, CacheError>;

    /// Number of members in the set (`ZCARD`)
    async fn zset_len(&self, key: &str) -> Result<u64, CacheError>;

    // =========================================================================
    // Hashes (unread counters, sessions)
    // =========================================================================

    /// Atomically increment a hash field (`HINCRBY`), creating it at 0
    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError>;

    /// Fetch every field of a hash (`HGETALL`); empty map if the key is absent
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    /// Set multiple hash fields (`HSET`)
    async fn hash_set_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), CacheError>;

    /// Delete a hash field (`HDEL`); returns `true` if the field existed
    async fn hash_del(&self, key: &str, field: &str) -> Result<bool, CacheError>;

    // =========================================================================
    // Lists (reliable queue)
    // =========================================================================

    /// Append a value to the tail of a list (`RPUSH`); returns the new length
    async fn list_push_tail(&self, key: &str, value: &[u8]) -> Result<u64, CacheError>;

    /// Atomically move the head of `src` to the tail of `dst`
    /// (`LMOVE src dst LEFT RIGHT`)
    ///
    /// Returns the moved value, or `None` when `src` is empty.
    async fn list_move_head_to_tail(
        &self,
        src: &str,
        dst: &str,
    ) -> Result<Option<Vec<u8>>, CacheError>;

    /// Remove the first occurrence of `value` from a list (`LREM key 1`)
    ///
    /// Returns the number of removed entries (0 or 1).
    async fn list_remove(&self, key: &str, value: &[u8]) -> Result<u64, CacheError>;

    /// List length (`LLEN`)
    async fn list_len(&self, key: &str) -> Result<u64, CacheError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), CacheError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
