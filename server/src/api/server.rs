//! API server initialization

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::ApiState;
use super::routes::{auth, chat, groups, health, ws};
use crate::core::config::ServerConfig;

/// Assemble the router over the shared state
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/chat/{peer}", post(chat::send).get(chat::history))
        .route("/chat/{peer}/before", get(chat::history_before))
        .route("/chat/{peer}/read", post(chat::mark_read))
        .route("/unread", get(chat::unread))
        .route("/groups/{id}/send", post(groups::send))
        .route("/groups/{id}/messages", get(groups::history))
        .route("/ws/chat", get(ws::upgrade))
        .route("/health", get(health::health))
        .route("/presence/online", get(health::online))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown signal fires
pub async fn serve(state: ApiState, config: &ServerConfig) -> Result<()> {
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let shutdown_wait = state.shutdown.wait();

    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_wait)
        .await?;

    tracing::debug!("API server stopped");
    Ok(())
}

/// Bind on an ephemeral port and serve in the background (used by tests)
pub async fn serve_ephemeral(state: ApiState) -> Result<SocketAddr> {
    let shutdown_wait = state.shutdown.wait();
    let app = router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_wait)
            .await
        {
            tracing::error!(error = %e, "API server error");
        }
    });

    Ok(addr)
}
