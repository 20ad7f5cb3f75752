//! Durable message store
//!
//! The relational store is the source of truth for messages and the
//! directory for users and group membership. Pluggable backends:
//! - In-memory (default) - tests and single-process dev mode
//! - PostgreSQL - production, schema shared with the account/group services

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::core::config::{StoreBackendType, StoreConfig};
use crate::data::error::TransientError;
use crate::data::postgres::{PostgresError, PostgresService, repositories};
use crate::data::types::ChatMessage;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store configuration error: {0}")]
    Config(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Postgres(#[from] PostgresError),
}

impl TransientError for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Postgres(e) => e.is_transient(),
            StoreError::Config(_) => false,
        }
    }
}

/// Durable message store trait
///
/// History queries return messages newest-first; callers reverse for
/// display order.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, msg: &ChatMessage) -> Result<(), StoreError>;

    async fn recent_direct_messages(
        &self,
        a: &str,
        b: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn direct_messages_before(
        &self,
        a: &str,
        b: &str,
        before_ts: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn recent_group_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn group_messages_before(
        &self,
        group_id: &str,
        before_ts: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError>;

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError>;

    async fn is_group_member(&self, group_id: &str, username: &str) -> Result<bool, StoreError>;

    /// Ids of every group a user belongs to
    async fn member_group_ids(&self, username: &str) -> Result<Vec<String>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;

    /// Release held resources (connection pools)
    async fn close(&self) {}

    /// Store name for debugging/logging
    fn store_name(&self) -> &'static str;
}

// =============================================================================
// PostgreSQL store
// =============================================================================

/// PostgreSQL-backed message store
pub struct PostgresMessageStore {
    service: PostgresService,
}

impl PostgresMessageStore {
    pub async fn init(url: &str) -> Result<Self, StoreError> {
        let service = PostgresService::init(url).await?;
        Ok(Self { service })
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn insert_message(&self, msg: &ChatMessage) -> Result<(), StoreError> {
        repositories::message::insert_message(self.service.pool(), msg).await?;
        Ok(())
    }

    async fn recent_direct_messages(
        &self,
        a: &str,
        b: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(repositories::message::recent_direct_messages(self.service.pool(), a, b, limit).await?)
    }

    async fn direct_messages_before(
        &self,
        a: &str,
        b: &str,
        before_ts: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(repositories::message::direct_messages_before(
            self.service.pool(),
            a,
            b,
            before_ts,
            limit,
        )
        .await?)
    }

    async fn recent_group_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(
            repositories::message::recent_group_messages(self.service.pool(), group_id, limit)
                .await?,
        )
    }

    async fn group_messages_before(
        &self,
        group_id: &str,
        before_ts: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(repositories::message::group_messages_before(
            self.service.pool(),
            group_id,
            before_ts,
            limit,
        )
        .await?)
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(repositories::user::user_exists(self.service.pool(), username).await?)
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(repositories::group::group_members(self.service.pool(), group_id).await?)
    }

    async fn is_group_member(&self, group_id: &str, username: &str) -> Result<bool, StoreError> {
        Ok(repositories::group::is_member(self.service.pool(), group_id, username).await?)
    }

    async fn member_group_ids(&self, username: &str) -> Result<Vec<String>, StoreError> {
        Ok(repositories::group::member_group_ids(self.service.pool(), username).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.service.pool())
            .await
            .map_err(PostgresError::from)?;
        Ok(())
    }

    async fn close(&self) {
        self.service.close().await;
    }

    fn store_name(&self) -> &'static str {
        "postgres"
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory message store
///
/// `new()` starts empty; dev mode uses `with_demo_data()` so the server is
/// usable without an account service seeding users.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<ChatMessage>>,
    users: Mutex<HashSet<String>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
    failing: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded store for dev mode: three demo users sharing one group
    pub fn with_demo_data() -> Self {
        let store = Self::new();
        for user in ["alice", "bob", "carol"] {
            store.add_user(user);
        }
        let group_id = Uuid::new_v4().to_string();
        store.add_group(&group_id, &["alice", "bob", "carol"]);
        tracing::debug!(group_id = %group_id, "Memory store seeded with demo data");
        store
    }

    pub fn add_user(&self, username: &str) {
        self.users.lock().insert(username.to_string());
    }

    pub fn add_group(&self, group_id: &str, members: &[&str]) {
        self.groups.lock().insert(
            group_id.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    /// Make every operation fail until cleared (for failure-path tests)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of stored messages (for tests)
    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether a message id has been persisted (for tests)
    pub fn contains_message(&self, id: &str) -> bool {
        self.messages.lock().iter().any(|m| m.id == id)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    /// Newest-first filter over the insertion-ordered log
    fn filter_newest<F>(&self, predicate: F, limit: usize) -> Vec<ChatMessage>
    where
        F: Fn(&ChatMessage) -> bool,
    {
        let messages = self.messages.lock();
        let mut matched: Vec<ChatMessage> =
            messages.iter().filter(|&m| predicate(m)).cloned().collect();
        matched.sort_by_key(|m| m.timestamp);
        matched.into_iter().rev().take(limit).collect()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert_message(&self, msg: &ChatMessage) -> Result<(), StoreError> {
        self.check_available()?;
        self.messages.lock().push(msg.clone());
        Ok(())
    }

    async fn recent_direct_messages(
        &self,
        a: &str,
        b: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.check_available()?;
        Ok(self.filter_newest(
            |m| {
                !m.is_group
                    && ((m.from == a && m.to == b) || (m.from == b && m.to == a))
            },
            limit,
        ))
    }

    async fn direct_messages_before(
        &self,
        a: &str,
        b: &str,
        before_ts: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.check_available()?;
        Ok(self.filter_newest(
            |m| {
                !m.is_group
                    && m.timestamp < before_ts
                    && ((m.from == a && m.to == b) || (m.from == b && m.to == a))
            },
            limit,
        ))
    }

    async fn recent_group_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.check_available()?;
        Ok(self.filter_newest(|m| m.is_group && m.group_id == group_id, limit))
    }

    async fn group_messages_before(
        &self,
        group_id: &str,
        before_ts: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.check_available()?;
        Ok(self.filter_newest(
            |m| m.is_group && m.group_id == group_id && m.timestamp < before_ts,
            limit,
        ))
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.users.lock().contains(username))
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        Ok(self
            .groups
            .lock()
            .get(group_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn is_group_member(&self, group_id: &str, username: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .groups
            .lock()
            .get(group_id)
            .is_some_and(|members| members.contains(username)))
    }

    async fn member_group_ids(&self, username: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        Ok(self
            .groups
            .lock()
            .iter()
            .filter(|(_, members)| members.contains(username))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Store service
// =============================================================================

/// Store service wrapping the configured backend
pub struct StoreService {
    store: Arc<dyn MessageStore>,
}

impl std::fmt::Debug for StoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreService")
            .field("store", &self.store.store_name())
            .finish()
    }
}

impl StoreService {
    /// Create the store service from configuration
    pub async fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn MessageStore> = match config.backend {
            StoreBackendType::Memory => {
                tracing::debug!("Initializing in-memory message store");
                Arc::new(MemoryMessageStore::with_demo_data())
            }
            StoreBackendType::Postgres => {
                let url = config.postgres_url.as_ref().ok_or_else(|| {
                    StoreError::Config("postgres_url required for Postgres backend".into())
                })?;
                Arc::new(PostgresMessageStore::init(url).await?)
            }
        };
        Ok(Self { store })
    }

    /// Build directly over a store (used by tests)
    pub fn with_store(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// In-memory service for tests
    pub fn memory() -> Self {
        Self::with_store(Arc::new(MemoryMessageStore::new()))
    }

    /// Get the store name
    pub fn store_name(&self) -> &'static str {
        self.store.store_name()
    }

    /// Access the underlying store
    pub fn inner(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Close the backend
    pub async fn close(&self) {
        self.store.close().await;
    }
}

impl std::ops::Deref for StoreService {
    type Target = dyn MessageStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_recent_direct() {
        let store = MemoryMessageStore::new();
        let m1 = ChatMessage {
            timestamp: 1,
            ..ChatMessage::direct("alice", "bob", "one")
        };
        let m2 = ChatMessage {
            timestamp: 2,
            ..ChatMessage::direct("bob", "alice", "two")
        };
        store.insert_message(&m1).await.unwrap();
        store.insert_message(&m2).await.unwrap();

        // Newest first, both directions of the conversation
        let recent = store.recent_direct_messages("bob", "alice", 10).await.unwrap();
        assert_eq!(recent, vec![m2, m1]);
    }

    #[tokio::test]
    async fn test_messages_before_paginates() {
        let store = MemoryMessageStore::new();
        for i in 1..=5 {
            let msg = ChatMessage {
                timestamp: i,
                ..ChatMessage::direct("alice", "bob", &format!("m{i}"))
            };
            store.insert_message(&msg).await.unwrap();
        }

        let page = store
            .direct_messages_before("alice", "bob", 4, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].timestamp, 3);
        assert_eq!(page[1].timestamp, 2);
    }

    #[tokio::test]
    async fn test_group_membership() {
        let store = MemoryMessageStore::new();
        store.add_user("alice");
        store.add_group("g1", &["alice", "bob"]);

        assert!(store.is_group_member("g1", "alice").await.unwrap());
        assert!(!store.is_group_member("g1", "carol").await.unwrap());
        assert_eq!(store.member_group_ids("alice").await.unwrap(), vec!["g1"]);

        let mut members = store.group_members("g1").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryMessageStore::new();
        store.set_failing(true);
        let msg = ChatMessage::direct("alice", "bob", "hi");
        let err = store.insert_message(&msg).await.unwrap_err();
        assert!(err.is_transient());

        store.set_failing(false);
        store.insert_message(&msg).await.unwrap();
        assert!(store.contains_message(&msg.id));
    }

    #[tokio::test]
    async fn test_demo_data_seeds_users_and_group() {
        let store = MemoryMessageStore::with_demo_data();
        assert!(store.user_exists("alice").await.unwrap());
        assert_eq!(store.member_group_ids("bob").await.unwrap().len(), 1);
    }
}
