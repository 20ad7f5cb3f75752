//! Append-only archive log
//!
//! Every accepted message is eventually appended here, keyed by
//! conversation so per-conversation order survives partitioning. Pluggable
//! sinks:
//! - In-memory (default) - tests and single-process dev mode
//! - Kafka - production, topic `chat-history`, `acks=all`
//!
//! Delivery to the archive is at-least-once: a crash between a confirmed
//! append and the queue-side acknowledgment replays the message, so
//! downstream consumers dedupe by message id.

mod backend;
mod error;
mod kafka;
mod memory;

use std::sync::Arc;

pub use backend::ArchiveSink;
pub use error::ArchiveError;
pub use memory::{ArchivedRecord, MemoryArchive};

use crate::core::config::{ArchiveBackendType, ArchiveConfig};
use crate::data::types::ChatMessage;

/// Archive service wrapping the configured sink
pub struct ArchiveService {
    sink: Arc<dyn ArchiveSink>,
}

impl std::fmt::Debug for ArchiveService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveService")
            .field("sink", &self.sink.sink_name())
            .finish()
    }
}

impl ArchiveService {
    /// Create the archive service from configuration
    pub fn new(config: &ArchiveConfig) -> Result<Self, ArchiveError> {
        let sink: Arc<dyn ArchiveSink> = match config.backend {
            ArchiveBackendType::Memory => {
                tracing::debug!("Initializing in-memory archive");
                Arc::new(MemoryArchive::new())
            }
            ArchiveBackendType::Kafka => {
                Arc::new(kafka::KafkaArchive::new(&config.brokers, &config.topic)?)
            }
        };
        Ok(Self { sink })
    }

    /// Build directly over a sink (used by tests)
    pub fn with_sink(sink: Arc<dyn ArchiveSink>) -> Self {
        Self { sink }
    }

    /// In-memory service for tests and dev mode
    pub fn memory() -> Self {
        Self::with_sink(Arc::new(MemoryArchive::new()))
    }

    /// Get the sink name
    pub fn sink_name(&self) -> &'static str {
        self.sink.sink_name()
    }

    /// Append a message, keyed by its conversation
    pub async fn archive_message(&self, msg: &ChatMessage) -> Result<(), ArchiveError> {
        let payload =
            serde_json::to_vec(msg).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        self.sink.produce(&msg.conversation_key(), &payload).await
    }

    /// Flush buffered records (used during shutdown)
    pub async fn flush(&self) -> Result<(), ArchiveError> {
        self.sink.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_archive_message_keys_by_conversation() {
        let sink = Arc::new(MemoryArchive::new());
        let archive = ArchiveService::with_sink(sink.clone());

        let direct = ChatMessage::direct("bob", "alice", "hi");
        let group = ChatMessage::group("alice", "g1", "hi all");
        archive.archive_message(&direct).await.unwrap();
        archive.archive_message(&group).await.unwrap();

        let records = sink.records();
        assert_eq!(records[0].key, "alice:bob");
        assert_eq!(records[1].key, "group:g1");

        let replayed: ChatMessage = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(replayed, direct);
    }
}
