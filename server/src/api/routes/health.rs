//! Health and presence endpoints

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use super::super::ApiState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub cache: ComponentHealth,
    pub store: ComponentHealth,
    pub breakers: BreakerStates,
    pub queue_pending: Option<u64>,
    pub queue_processing: Option<u64>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub backend: &'static str,
    pub healthy: bool,
}

#[derive(Serialize)]
pub struct BreakerStates {
    pub cache: String,
    pub archive: String,
    pub database: String,
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let cache_healthy = state.cache.health_check().await.is_ok();
    let store_healthy = state.store.health_check().await.is_ok();

    let (queue_pending, queue_processing) = match state.pipeline.queue_depths().await {
        Ok((pending, processing)) => (Some(pending), Some(processing)),
        Err(_) => (None, None),
    };

    let healthy = cache_healthy && store_healthy;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            cache: ComponentHealth {
                backend: state.cache.backend_name(),
                healthy: cache_healthy,
            },
            store: ComponentHealth {
                backend: state.store.store_name(),
                healthy: store_healthy,
            },
            breakers: BreakerStates {
                cache: format!("{:?}", state.breakers.cache.state()),
                archive: format!("{:?}", state.breakers.archive.state()),
                database: format!("{:?}", state.breakers.database.state()),
            },
            queue_pending,
            queue_processing,
        }),
    )
}

#[derive(Serialize)]
pub struct OnlineResponse {
    pub online: Vec<String>,
}

/// GET /presence/online
pub async fn online(State(state): State<ApiState>) -> Json<OnlineResponse> {
    let mut online = state.manager.online_users().await;
    online.sort();
    Json(OnlineResponse { online })
}
