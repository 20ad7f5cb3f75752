//! Cache error types

use thiserror::Error;

use crate::data::error::TransientError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache configuration error: {0}")]
    Config(String),

    #[error("Cache connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cache operation failed: {0}")]
    Operation(String),

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

impl TransientError for CacheError {
    fn is_transient(&self) -> bool {
        match self {
            CacheError::Connection(_) | CacheError::Pool(_) => true,
            CacheError::Redis(e) => {
                e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_timeout()
                    || e.is_io_error()
                    || e.is_cluster_error()
            }
            CacheError::Config(_) | CacheError::Serialization(_) | CacheError::Operation(_) => {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = CacheError::Connection("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "Cache connection error: connection refused"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(CacheError::Connection("down".into()).is_transient());
        assert!(CacheError::Pool(deadpool_redis::PoolError::Closed).is_transient());
        assert!(!CacheError::Serialization("bad json".into()).is_transient());
        assert!(!CacheError::Config("missing url".into()).is_transient());
    }
}
