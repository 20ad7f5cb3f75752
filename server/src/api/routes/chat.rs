//! Direct chat endpoints

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;

use super::super::ApiState;
use super::super::auth::require_session;
use super::super::error::ApiError;
use crate::data::types::ChatMessage;

#[derive(Deserialize)]
pub struct SendRequest {
    pub content: String,
}

#[derive(Deserialize)]
pub struct BeforeQuery {
    pub ts: i64,
}

/// POST /chat/{peer}
///
/// Returns the created message so non-WS clients get the echo without
/// waiting for the relay.
pub async fn send(
    State(state): State<ApiState>,
    Path(peer): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<Json<ChatMessage>, ApiError> {
    let session = require_session(&state.sessions, &headers).await?;
    let msg = state
        .pipeline
        .send(&session.username, &peer, &request.content)
        .await?;
    Ok(Json(msg))
}

/// GET /chat/{peer}
///
/// Opening a conversation clears its unread counter.
pub async fn history(
    State(state): State<ApiState>,
    Path(peer): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let session = require_session(&state.sessions, &headers).await?;
    let messages = state.pipeline.history(&session.username, &peer).await?;

    if let Err(e) = state.pipeline.mark_read(&session.username, &peer).await {
        tracing::debug!(user = %session.username, peer = %peer, error = %e, "Unread clear on open failed");
    }

    Ok(Json(messages))
}

/// GET /chat/{peer}/before?ts=
pub async fn history_before(
    State(state): State<ApiState>,
    Path(peer): Path<String>,
    Query(query): Query<BeforeQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let session = require_session(&state.sessions, &headers).await?;
    let messages = state
        .pipeline
        .history_before(&session.username, &peer, query.ts)
        .await?;
    Ok(Json(messages))
}

/// POST /chat/{peer}/read
pub async fn mark_read(
    State(state): State<ApiState>,
    Path(peer): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state.sessions, &headers).await?;
    state.pipeline.mark_read(&session.username, &peer).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// GET /unread
pub async fn unread(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<HashMap<String, i64>>, ApiError> {
    let session = require_session(&state.sessions, &headers).await?;
    let counts = state.pipeline.unread(&session.username).await?;
    Ok(Json(counts))
}
