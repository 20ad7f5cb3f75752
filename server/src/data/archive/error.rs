//! Archive log error types

use thiserror::Error;

use crate::data::error::TransientError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Archive log unavailable: {0}")]
    Unavailable(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl TransientError for ArchiveError {
    fn is_transient(&self) -> bool {
        match self {
            ArchiveError::Unavailable(_) | ArchiveError::Kafka(_) => true,
            ArchiveError::Config(_) | ArchiveError::Serialization(_) => false,
        }
    }
}
