//! Archive sink trait definition

use async_trait::async_trait;

use super::error::ArchiveError;

/// Append-only archive log sink
///
/// The key is the conversation key: sinks must route all records sharing a
/// key to the same partition so per-conversation order is preserved at the
/// writer end.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Append one record; resolves once the sink has confirmed the write
    async fn produce(&self, key: &str, payload: &[u8]) -> Result<(), ArchiveError>;

    /// Flush buffered records (used during shutdown)
    async fn flush(&self) -> Result<(), ArchiveError>;

    /// Sink name for debugging/logging
    fn sink_name(&self) -> &'static str;
}
