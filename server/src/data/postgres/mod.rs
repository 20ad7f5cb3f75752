//! PostgreSQL database service
//!
//! The durable source of truth for messages. Connection pooling with
//! min/max bounds, idle cleanup, lifetime cycling, and statement timeouts.

pub mod error;
mod migrations;
pub mod repositories;
mod schema;

pub use error::PostgresError;
pub use sqlx::PgPool;

use std::time::Duration;

use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::log::LevelFilter;

/// Pool sizing and timeouts for steady chat traffic
const MAX_CONNECTIONS: u32 = 20;
const MIN_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT_SECS: u64 = 5;
const IDLE_TIMEOUT_SECS: u64 = 600;
const MAX_LIFETIME_SECS: u64 = 1800;
const STATEMENT_TIMEOUT_SECS: u64 = 30;

/// PostgreSQL database service
///
/// Created once at server startup and shared across all modules.
pub struct PostgresService {
    pool: PgPool,
}

impl PostgresService {
    /// Initialize the database service, running pending migrations
    pub async fn init(url: &str) -> Result<Self, PostgresError> {
        if url.is_empty() {
            return Err(PostgresError::Config("PostgreSQL URL is required".into()));
        }

        let mut options: PgConnectOptions = url
            .parse()
            .map_err(|e| PostgresError::Config(format!("Invalid PostgreSQL URL: {}", e)))?;

        options = options.log_statements(LevelFilter::Trace);
        options = options.options([(
            "statement_timeout",
            format!("{}s", STATEMENT_TIMEOUT_SECS),
        )]);

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .min_connections(MIN_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .idle_timeout(Duration::from_secs(IDLE_TIMEOUT_SECS))
            .max_lifetime(Duration::from_secs(MAX_LIFETIME_SECS))
            .connect_with(options)
            .await?;

        migrations::run_migrations(&pool).await?;

        tracing::debug!(
            max_connections = MAX_CONNECTIONS,
            "PostgreSQL service initialized"
        );

        Ok(Self { pool })
    }

    /// Access the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("PostgreSQL pool closed");
    }
}
