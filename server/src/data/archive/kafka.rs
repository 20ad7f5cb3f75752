//! Kafka archive sink
//!
//! Produces JSON-serialized messages to the archive topic, keyed by
//! conversation key so every message of one conversation lands on the same
//! partition and keeps its order. `acks=all` so a write is only confirmed
//! once fully replicated.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use super::backend::ArchiveSink;
use super::error::ArchiveError;
use crate::core::constants::KAFKA_PRODUCER_RETRIES;

/// Per-send delivery timeout
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Flush timeout during shutdown
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka archive sink
pub struct KafkaArchive {
    producer: FutureProducer,
    topic: String,
}

impl KafkaArchive {
    /// Create a producer against the given brokers
    pub fn new(brokers: &str, topic: &str) -> Result<Self, ArchiveError> {
        if brokers.is_empty() {
            return Err(ArchiveError::Config("Kafka brokers are required".into()));
        }

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("retries", KAFKA_PRODUCER_RETRIES.to_string())
            .set("message.timeout.ms", "30000")
            .create()?;

        tracing::debug!(brokers = %brokers, topic = %topic, "Kafka archive producer created");

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl ArchiveSink for KafkaArchive {
    async fn produce(&self, key: &str, payload: &[u8]) -> Result<(), ArchiveError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map_err(|(e, _msg)| ArchiveError::Kafka(e))?;

        Ok(())
    }

    async fn flush(&self) -> Result<(), ArchiveError> {
        self.producer.flush(Timeout::After(FLUSH_TIMEOUT))?;
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "kafka"
    }
}
