//! Session manager
//!
//! Two tiers: the shared cache (`session:<id>` hashes, 24 h TTL) is the
//! fast common path; an in-process read-through map answers reads while the
//! cache breaker is open. The local map is not authoritative - a definitive
//! cache miss evicts the local entry - but a session present only locally
//! is treated as valid for the duration of a breaker-open window.
//!
//! `last_activity` is renewed lazily: chatty clients would otherwise write
//! the hash on every request, so writes are skipped until the renewal
//! threshold has elapsed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::core::config::SessionConfig;
use crate::data::cache::{CacheKey, CacheService};
use crate::domain::breaker::Breakers;

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub username: String,
    pub login_time: i64,
    pub last_activity: i64,
}

impl Session {
    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("user_id".to_string(), self.user_id.clone()),
            ("username".to_string(), self.username.clone()),
            ("login_time".to_string(), self.login_time.to_string()),
            ("last_activity".to_string(), self.last_activity.to_string()),
        ]
    }

    fn from_fields(session_id: &str, fields: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            session_id: session_id.to_string(),
            user_id: fields.get("user_id")?.clone(),
            username: fields.get("username")?.clone(),
            login_time: fields.get("login_time")?.parse().ok()?,
            last_activity: fields.get("last_activity")?.parse().ok()?,
        })
    }
}

/// Session manager over the cache tier plus a local read-through map
pub struct SessionManager {
    cache: Arc<CacheService>,
    breakers: Arc<Breakers>,
    local: RwLock<HashMap<String, Session>>,
    ttl: Duration,
    update_threshold: i64,
}

impl SessionManager {
    pub fn new(cache: Arc<CacheService>, breakers: Arc<Breakers>, config: &SessionConfig) -> Self {
        Self {
            cache,
            breakers,
            local: RwLock::new(HashMap::new()),
            ttl: config.ttl(),
            update_threshold: config.update_threshold_secs,
        }
    }

    /// Create a session for an authenticated user
    ///
    /// The session is always usable: a failed cache write leaves it in the
    /// local tier and is reconciled when the cache recovers.
    pub async fn create(&self, user_id: &str, username: &str) -> Session {
        let now = chrono::Utc::now().timestamp();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            login_time: now,
            last_activity: now,
        };

        if let Err(e) = self.write_to_cache(&session).await {
            tracing::warn!(session_id = %session.session_id, error = %e, "Session cache write failed, local tier only");
        }

        self.local
            .write()
            .insert(session.session_id.clone(), session.clone());

        tracing::debug!(username = %username, session_id = %session.session_id, "Session created");
        session
    }

    /// Resolve a session, renewing `last_activity` past the threshold
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let key = CacheKey::session(session_id);
        match self
            .breakers
            .cache
            .call(|| self.cache.hash_get_all(&key))
            .await
        {
            Ok(fields) if !fields.is_empty() => {
                let Some(mut session) = Session::from_fields(session_id, &fields) else {
                    tracing::warn!(session_id = %session_id, "Session hash is malformed");
                    return None;
                };
                self.renew_if_stale(&mut session).await;
                self.local
                    .write()
                    .insert(session_id.to_string(), session.clone());
                Some(session)
            }
            Ok(_) => {
                // Authoritative miss: the cache is the faster tier, not a
                // different universe - reconcile the local map.
                self.local.write().remove(session_id);
                None
            }
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Session cache read failed, trying local tier");
                self.local.read().get(session_id).cloned()
            }
        }
    }

    /// Destroy a session in both tiers
    pub async fn destroy(&self, session_id: &str) {
        let key = CacheKey::session(session_id);
        if let Err(e) = self.breakers.cache.call(|| self.cache.delete(&key)).await {
            tracing::warn!(session_id = %session_id, error = %e, "Session cache delete failed");
        }
        self.local.write().remove(session_id);
        tracing::debug!(session_id = %session_id, "Session destroyed");
    }

    /// Overwrite `last_activity` and refresh the TTL when the renewal
    /// threshold has elapsed
    async fn renew_if_stale(&self, session: &mut Session) {
        let now = chrono::Utc::now().timestamp();
        if now - session.last_activity < self.update_threshold {
            return;
        }
        session.last_activity = now;
        if let Err(e) = self.write_to_cache(session).await {
            tracing::warn!(session_id = %session.session_id, error = %e, "Session renewal write failed");
        }
    }

    async fn write_to_cache(
        &self,
        session: &Session,
    ) -> Result<(), crate::domain::breaker::BreakerError<crate::data::cache::CacheError>> {
        let key = CacheKey::session(&session.session_id);
        let fields = session.to_fields();
        self.breakers
            .cache
            .call(|| async {
                self.cache.hash_set_all(&key, &fields).await?;
                self.cache.expire(&key, self.ttl).await?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Number of sessions in the local tier (for diagnostics)
    pub fn local_sessions(&self) -> usize {
        self.local.read().len()
    }
}
