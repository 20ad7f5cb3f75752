//! In-memory archive sink
//!
//! Records appends in process memory. Used by tests (with failure
//! injection) and single-process dev mode.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::ArchiveSink;
use super::error::ArchiveError;

/// A single archived record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedRecord {
    pub key: String,
    pub payload: Vec<u8>,
}

/// In-memory archive sink
#[derive(Default)]
pub struct MemoryArchive {
    records: Mutex<Vec<ArchivedRecord>>,
    failing: AtomicBool,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything archived so far
    pub fn records(&self) -> Vec<ArchivedRecord> {
        self.records.lock().clone()
    }

    /// Make every produce call fail until cleared (for failure-path tests)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn produce(&self, key: &str, payload: &[u8]) -> Result<(), ArchiveError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable("injected failure".into()));
        }
        self.records.lock().push(ArchivedRecord {
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn flush(&self) -> Result<(), ArchiveError> {
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_produce_records_in_order() {
        let sink = MemoryArchive::new();
        sink.produce("alice:bob", b"m1").await.unwrap();
        sink.produce("alice:bob", b"m2").await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, b"m1");
        assert_eq!(records[1].payload, b"m2");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let sink = MemoryArchive::new();
        sink.set_failing(true);
        assert!(sink.produce("k", b"p").await.is_err());

        sink.set_failing(false);
        assert!(sink.produce("k", b"p").await.is_ok());
        assert_eq!(sink.records().len(), 1);
    }
}
