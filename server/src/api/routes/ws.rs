//! WebSocket upgrade endpoint

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use super::super::ApiState;
use super::super::error::ApiError;
use crate::domain::fanout::client::serve_client;

#[derive(Deserialize)]
pub struct WsQuery {
    pub session: String,
}

/// GET /ws/chat?session=
///
/// Resolves the session, captures the user's group set for the
/// connection's lifetime, then hands the socket to the fan-out layer.
pub async fn upgrade(
    State(state): State<ApiState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .get(&query.session)
        .await
        .ok_or(ApiError::Unauthorized)?;
    let username = session.username;

    // Group set snapshot; a degraded store falls back to an empty set
    // rather than refusing the connection.
    let groups: HashSet<String> = match state
        .breakers
        .database
        .call(|| state.store.member_group_ids(&username))
        .await
    {
        Ok(ids) => ids.into_iter().collect(),
        Err(e) => {
            tracing::warn!(username = %username, error = %e, "Group set capture failed, connecting without groups");
            HashSet::new()
        }
    };

    let manager = Arc::clone(&state.manager);
    let shutdown_rx = state.shutdown.subscribe();
    Ok(ws.on_upgrade(move |socket| {
        serve_client(socket, username, Arc::new(groups), manager, shutdown_rx)
    }))
}
