//! PostgreSQL error types

use thiserror::Error;

use crate::data::error::TransientError;

#[derive(Error, Debug)]
pub enum PostgresError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration to v{version} failed: {error}")]
    MigrationFailed { version: i32, error: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

impl TransientError for PostgresError {
    fn is_transient(&self) -> bool {
        match self {
            // Lost connections and pool exhaustion are outage signals;
            // RowNotFound and constraint violations are not.
            PostgresError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
            PostgresError::MigrationFailed { .. }
            | PostgresError::Config(_)
            | PostgresError::InvalidId(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_failed_error_display() {
        let err = PostgresError::MigrationFailed {
            version: 2,
            error: "syntax error".to_string(),
        };
        assert_eq!(err.to_string(), "Migration to v2 failed: syntax error");
    }

    #[test]
    fn test_transient_classification() {
        assert!(!PostgresError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(PostgresError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!PostgresError::InvalidId("bad uuid".into()).is_transient());
    }
}
