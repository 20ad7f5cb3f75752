//! Group chat endpoints

use axum::Json;
use axum::extract::{Path, State};
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

/// POST /groups/{id}/send
pub async fn send(
    State(state): State<ApiState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<Json<ChatMessage>, ApiError> {
    let session = require_session(&state.sessions, &headers).await?;
    let msg = state
        .pipeline
        .send_group(&session.username, &group_id, &request.content)
        .await?;
    Ok(Json(msg))
}

/// GET /groups/{id}/messages
pub async fn history(
    State(state): State<ApiState>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let session = require_session(&state.sessions, &headers).await?;
    let messages = state
        .pipeline
        .group_history(&group_id, &session.username)
        .await?;
    Ok(Json(messages))
}
