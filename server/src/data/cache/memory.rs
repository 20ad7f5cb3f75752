//! In-memory cache implementation
//!
//! Single-process stand-in for Redis used by tests and dev mode. Keys expire
//! lazily: a TTL is checked on the next access of the key. Lists share one
//! lock so `list_move_head_to_tail` is atomic, matching the `LMOVE`
//! guarantee the reliable queue depends on.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::CacheBackend;
use super::error::CacheError;

/// In-memory cache implementation
#[derive(Default)]
pub struct InMemoryCache {
    /// Sorted sets: member set ordered by (score, member)
    zsets: Mutex<HashMap<String, BTreeSet<(i64, Vec<u8>)>>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    expiries: Mutex<HashMap<String, Instant>>,
    failing: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until cleared (for outage tests)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("injected failure".into()));
        }
        Ok(())
    }

    /// Drop the key everywhere if its TTL has elapsed
    fn purge_if_expired(&self, key: &str) {
        let expired = {
            let expiries = self.expiries.lock();
            expiries.get(key).is_some_and(|at| *at <= Instant::now())
        };
        if expired {
            self.remove_key(key);
        }
    }

    fn remove_key(&self, key: &str) -> bool {
        let mut existed = false;
        existed |= self.zsets.lock().remove(key).is_some();
        existed |= self.hashes.lock().remove(key).is_some();
        existed |= self.lists.lock().remove(key).is_some();
        self.expiries.lock().remove(key);
        existed
    }

    fn key_exists(&self, key: &str) -> bool {
        self.zsets.lock().contains_key(key)
            || self.hashes.lock().contains_key(key)
            || self.lists.lock().contains_key(key)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        Ok(self.remove_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        if !self.key_exists(key) {
            return Ok(false);
        }
        self.expiries
            .lock()
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn zset_add(&self, key: &str, score: i64, member: &[u8]) -> Result<(), CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut zsets = self.zsets.lock();
        let set = zsets.entry(key.to_string()).or_default();
        // ZADD updates the score of an existing member
        set.retain(|(_, m)| m != member);
        set.insert((score, member.to_vec()));
        Ok(())
    }

    async fn zset_trim_to_newest(&self, key: &str, keep: usize) -> Result<u64, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut zsets = self.zsets.lock();
        let Some(set) = zsets.get_mut(key) else {
            return Ok(0);
        };
        let mut removed = 0u64;
        while set.len() > keep {
            let lowest = set.iter().next().cloned();
            if let Some(entry) = lowest {
                set.remove(&entry);
                removed += 1;
            } else {
                break;
            }
        }
        Ok(removed)
    }

    async fn zset_newest(&self, key: &str, count: usize) -> Result<Vec<Vec<u8>>, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        let zsets = self.zsets.lock();
        let Some(set) = zsets.get(key) else {
            return Ok(Vec::new());
        };
        let skip = set.len().saturating_sub(count);
        Ok(set.iter().skip(skip).map(|(_, m)| m.clone()).collect())
    }

    async fn zset_len(&self, key: &str) -> Result<u64, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        Ok(self.zsets.lock().get(key).map_or(0, |s| s.len() as u64))
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut hashes = self.hashes.lock();
        let hash = hashes.entry(key.to_string()).or_default();
        let current: i64 = hash
            .get(field)
            .map(|v| {
                v.parse().map_err(|_| {
                    CacheError::Operation(format!("hash field {field} is not an integer"))
                })
            })
            .transpose()?
            .unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
    }

    async fn hash_set_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut hashes = self.hashes.lock();
        let hash = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut hashes = self.hashes.lock();
        Ok(hashes
            .get_mut(key)
            .is_some_and(|hash| hash.remove(field).is_some()))
    }

    async fn list_push_tail(&self, key: &str, value: &[u8]) -> Result<u64, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut lists = self.lists.lock();
        let list = lists.entry(key.to_string()).or_default();
        list.push_back(value.to_vec());
        Ok(list.len() as u64)
    }

    async fn list_move_head_to_tail(
        &self,
        src: &str,
        dst: &str,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        self.check_available()?;
        self.purge_if_expired(src);
        // One lock over all lists makes the move atomic
        let mut lists = self.lists.lock();
        let Some(value) = lists.get_mut(src).and_then(|l| l.pop_front()) else {
            return Ok(None);
        };
        lists
            .entry(dst.to_string())
            .or_default()
            .push_back(value.clone());
        Ok(Some(value))
    }

    async fn list_remove(&self, key: &str, value: &[u8]) -> Result<u64, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut lists = self.lists.lock();
        let Some(list) = lists.get_mut(key) else {
            return Ok(0);
        };
        if let Some(pos) = list.iter().position(|v| v == value) {
            let _ = list.remove(pos);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn list_len(&self, key: &str) -> Result<u64, CacheError> {
        self.check_available()?;
        self.purge_if_expired(key);
        Ok(self.lists.lock().get(key).map_or(0, |l| l.len() as u64))
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        self.check_available()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zset_add_trim_and_range() {
        let cache = InMemoryCache::new();
        for i in 0..5 {
            cache
                .zset_add("z", i, format!("m{i}").as_bytes())
                .await
                .unwrap();
        }
        assert_eq!(cache.zset_len("z").await.unwrap(), 5);

        let removed = cache.zset_trim_to_newest("z", 3).await.unwrap();
        assert_eq!(removed, 2);

        let newest = cache.zset_newest("z", 10).await.unwrap();
        assert_eq!(newest, vec![b"m2".to_vec(), b"m3".to_vec(), b"m4".to_vec()]);
    }

    #[tokio::test]
    async fn test_zset_add_updates_existing_member() {
        let cache = InMemoryCache::new();
        cache.zset_add("z", 1, b"m").await.unwrap();
        cache.zset_add("z", 9, b"m").await.unwrap();
        assert_eq!(cache.zset_len("z").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hash_incr_and_del() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.hash_incr("h", "alice", 1).await.unwrap(), 1);
        assert_eq!(cache.hash_incr("h", "alice", 1).await.unwrap(), 2);

        let all = cache.hash_get_all("h").await.unwrap();
        assert_eq!(all.get("alice"), Some(&"2".to_string()));

        assert!(cache.hash_del("h", "alice").await.unwrap());
        assert!(!cache.hash_del("h", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_move_is_atomic_handoff() {
        let cache = InMemoryCache::new();
        cache.list_push_tail("pending", b"a").await.unwrap();
        cache.list_push_tail("pending", b"b").await.unwrap();

        let moved = cache
            .list_move_head_to_tail("pending", "processing")
            .await
            .unwrap();
        assert_eq!(moved, Some(b"a".to_vec()));
        assert_eq!(cache.list_len("pending").await.unwrap(), 1);
        assert_eq!(cache.list_len("processing").await.unwrap(), 1);

        assert_eq!(cache.list_remove("processing", b"a").await.unwrap(), 1);
        assert_eq!(cache.list_len("processing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_move_empty_source() {
        let cache = InMemoryCache::new();
        let moved = cache
            .list_move_head_to_tail("pending", "processing")
            .await
            .unwrap();
        assert_eq!(moved, None);
    }

    #[tokio::test]
    async fn test_expire_removes_key_lazily() {
        let cache = InMemoryCache::new();
        cache.zset_add("z", 1, b"m").await.unwrap();
        assert!(cache.expire("z", Duration::from_millis(5)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.zset_len("z").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let cache = InMemoryCache::new();
        assert!(!cache.expire("nope", Duration::from_secs(1)).await.unwrap());
    }
}
