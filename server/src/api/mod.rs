//! Thin HTTP/WS surface over the messaging core

pub mod auth;
pub mod error;
pub mod routes;
pub mod server;

use std::sync::Arc;

pub use error::ApiError;

use crate::core::ShutdownService;
use crate::data::{CacheService, StoreService};
use crate::domain::breaker::Breakers;
use crate::domain::fanout::ConnectionManager;
use crate::domain::sessions::SessionManager;
use crate::domain::ChatPipeline;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<ChatPipeline>,
    pub sessions: Arc<SessionManager>,
    pub manager: Arc<ConnectionManager>,
    pub store: Arc<StoreService>,
    pub cache: Arc<CacheService>,
    pub breakers: Arc<Breakers>,
    pub shutdown: ShutdownService,
}
