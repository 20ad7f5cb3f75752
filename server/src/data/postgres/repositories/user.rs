//! User repository for PostgreSQL operations
//!
//! Read-only: account CRUD belongs to the collaborating account service.

use sqlx::PgPool;

use crate::data::postgres::PostgresError;

/// Whether a username exists
pub async fn user_exists(pool: &PgPool, username: &str) -> Result<bool, PostgresError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}
