//! Session resolution for handlers
//!
//! Cookie plumbing and credential verification belong to the excluded auth
//! layer; the core resolves an already-issued session id from the
//! `X-Session-Id` header (HTTP) or the `session` query parameter (WS
//! upgrade, where headers are awkward for browser clients).

use axum::http::HeaderMap;

use super::error::ApiError;
use crate::domain::sessions::{Session, SessionManager};

/// Header carrying the session id
pub const SESSION_HEADER: &str = "x-session-id";

/// Resolve the acting session from request headers
pub async fn require_session(
    sessions: &SessionManager,
    headers: &HeaderMap,
) -> Result<Session, ApiError> {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    sessions
        .get(session_id)
        .await
        .ok_or(ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::HeaderValue;

    use crate::core::config::SessionConfig;
    use crate::data::cache::CacheService;
    use crate::domain::breaker::Breakers;

    fn make_sessions() -> SessionManager {
        SessionManager::new(
            Arc::new(CacheService::memory()),
            Arc::new(Breakers::new()),
            &SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let sessions = make_sessions();
        let headers = HeaderMap::new();
        assert!(matches!(
            require_session(&sessions, &headers).await,
            Err(ApiError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_valid_session_resolves() {
        let sessions = make_sessions();
        let session = sessions.create("u-1", "alice").await;

        let mut headers = HeaderMap::new();
        headers.insert(
            SESSION_HEADER,
            HeaderValue::from_str(&session.session_id).unwrap(),
        );

        let resolved = require_session(&sessions, &headers).await.unwrap();
        assert_eq!(resolved.username, "alice");
    }

    #[tokio::test]
    async fn test_unknown_session_is_unauthorized() {
        let sessions = make_sessions();
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("bogus"));
        assert!(matches!(
            require_session(&sessions, &headers).await,
            Err(ApiError::Unauthorized)
        ));
    }
}
