//! PostgreSQL migration management
//!
//! Handles schema initialization and versioned migrations.

use sqlx::PgPool;

use super::error::PostgresError;
use super::schema::{SCHEMA, SCHEMA_VERSION};

/// Run all pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), PostgresError> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_name = 'schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        tracing::debug!("Applying initial PostgreSQL schema v{}", SCHEMA_VERSION);
        apply_initial_schema(pool).await?;
        return Ok(());
    }

    let current_version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    match current_version {
        None => {
            tracing::debug!("Applying initial PostgreSQL schema v{}", SCHEMA_VERSION);
            apply_initial_schema(pool).await?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            tracing::warn!(
                "PostgreSQL schema version {} is newer than application version {}. This may cause issues.",
                v,
                SCHEMA_VERSION
            );
        }
        _ => {
            tracing::debug!("PostgreSQL schema is up to date (v{})", SCHEMA_VERSION);
        }
    }

    Ok(())
}

/// Apply the initial schema
async fn apply_initial_schema(pool: &PgPool) -> Result<(), PostgresError> {
    sqlx::query(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| PostgresError::MigrationFailed {
            version: SCHEMA_VERSION,
            error: e.to_string(),
        })?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (id INTEGER PRIMARY KEY, version INTEGER NOT NULL)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO schema_version (id, version) VALUES (1, $1)
         ON CONFLICT (id) DO UPDATE SET version = $1",
    )
    .bind(SCHEMA_VERSION)
    .execute(pool)
    .await?;

    Ok(())
}
