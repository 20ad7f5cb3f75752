//! Login and logout
//!
//! Credential verification belongs to the excluded account service; login
//! here validates the user exists and mints a session, which is what the
//! core needs to exercise its session and presence primitives.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::super::auth::require_session;
use super::super::error::ApiError;
use super::super::ApiState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub session_id: String,
    pub username: String,
}

/// POST /login
pub async fn login(
    State(state): State<ApiState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("username is required".into()));
    }

    let known = state
        .breakers
        .database
        .call(|| state.store.user_exists(username))
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    if !known {
        return Err(ApiError::NotFound(format!("unknown user {username}")));
    }

    // The account service owns user ids; the session only needs a stable
    // handle, so mint one per login when running detached from it.
    let session = state
        .sessions
        .create(&Uuid::new_v4().to_string(), username)
        .await;

    Ok(Json(LoginResponse {
        session_id: session.session_id,
        username: session.username,
    }))
}

/// POST /logout
pub async fn logout(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state.sessions, &headers).await?;
    state.sessions.destroy(&session.session_id).await;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
