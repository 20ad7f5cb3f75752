//! Persistent reliable queue
//!
//! Two-list pattern on the cache store:
//! - `chat:pending_messages` holds overflow and retry entries
//! - `chat:processing_messages` holds in-flight claims
//!
//! The claim step is a single atomic `LMOVE`, so an entry is never in
//! neither list. A claimed entry is removed from processing only after the
//! archive write is confirmed; a crash in between leaves it in processing,
//! and the startup sweep moves everything there back to pending. A crash
//! after the archive write but before removal replays the message once -
//! consumers dedupe by id.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::PipelineConfig;
use crate::core::constants::{KEY_PENDING_MESSAGES, KEY_PROCESSING_MESSAGES};
use crate::data::archive::ArchiveService;
use crate::data::cache::{CacheError, CacheService};
use crate::data::types::ChatMessage;
use crate::domain::breaker::{BreakerState, Breakers};

/// Queue operations over the cache lists
pub struct ReliableQueue {
    cache: Arc<CacheService>,
}

impl ReliableQueue {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// Append a message to the pending queue
    pub async fn enqueue(&self, msg: &ChatMessage) -> Result<(), CacheError> {
        let payload =
            serde_json::to_vec(msg).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let depth = self
            .cache
            .list_push_tail(KEY_PENDING_MESSAGES, &payload)
            .await?;
        tracing::debug!(id = %msg.id, depth, "Message enqueued to pending queue");
        Ok(())
    }

    /// Atomically claim the head of pending into processing
    pub async fn claim(&self) -> Result<Option<Vec<u8>>, CacheError> {
        self.cache
            .list_move_head_to_tail(KEY_PENDING_MESSAGES, KEY_PROCESSING_MESSAGES)
            .await
    }

    /// Remove a successfully archived claim from processing
    pub async fn complete(&self, payload: &[u8]) -> Result<(), CacheError> {
        self.cache
            .list_remove(KEY_PROCESSING_MESSAGES, payload)
            .await?;
        Ok(())
    }

    /// Drop a corrupted claim from processing so it cannot block progress
    pub async fn discard(&self, payload: &[u8]) {
        if let Err(e) = self.cache.list_remove(KEY_PROCESSING_MESSAGES, payload).await {
            tracing::warn!(error = %e, "Failed to discard corrupted queue entry");
        }
    }

    /// Startup sweep: move every processing entry back to pending
    ///
    /// Heals claims orphaned by a crash between the claim and the archive
    /// write. Returns the number of entries recovered.
    pub async fn recover(&self) -> Result<u64, CacheError> {
        let mut recovered = 0u64;
        while self
            .cache
            .list_move_head_to_tail(KEY_PROCESSING_MESSAGES, KEY_PENDING_MESSAGES)
            .await?
            .is_some()
        {
            recovered += 1;
        }
        if recovered > 0 {
            tracing::info!(recovered, "Recovered in-flight messages from processing queue");
        }
        Ok(recovered)
    }

    /// (pending, processing) list depths
    pub async fn depths(&self) -> Result<(u64, u64), CacheError> {
        let pending = self.cache.list_len(KEY_PENDING_MESSAGES).await?;
        let processing = self.cache.list_len(KEY_PROCESSING_MESSAGES).await?;
        Ok((pending, processing))
    }
}

/// Background worker draining the pending queue into the archive log
pub struct QueueWorker {
    queue: Arc<ReliableQueue>,
    archive: Arc<ArchiveService>,
    breakers: Arc<Breakers>,
    poll_interval: Duration,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<ReliableQueue>,
        archive: Arc<ArchiveService>,
        breakers: Arc<Breakers>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            queue,
            archive,
            breakers,
            poll_interval: config.queue_poll_interval(),
            retry_attempts: config.archive_retry_attempts,
            retry_base_delay: Duration::from_millis(config.archive_retry_base_delay_ms),
        }
    }

    /// Start the worker loop; stops when the shutdown signal fires
    pub fn start(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.poll_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::debug!("Queue worker started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            // Final drain attempt before exiting
                            self.drain_once(&mut shutdown_rx).await;
                            break;
                        }
                    }
                    _ = tick.tick() => {
                        self.drain_once(&mut shutdown_rx).await;
                    }
                }
            }

            tracing::debug!("Queue worker stopped");
        })
    }

    /// Claim and archive entries until the pending queue is empty
    async fn drain_once(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            let claimed = match self.queue.claim().await {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Queue claim failed");
                    break;
                }
            };

            let msg: ChatMessage = match serde_json::from_slice(&claimed) {
                Ok(msg) => msg,
                Err(e) => {
                    // Corrupted entries must not block queue progress
                    tracing::error!(error = %e, "Dropping undeserializable queue entry");
                    self.queue.discard(&claimed).await;
                    continue;
                }
            };

            if self.archive_with_retry(&msg, shutdown_rx).await {
                if let Err(e) = self.queue.complete(&claimed).await {
                    tracing::warn!(id = %msg.id, error = %e, "Failed to remove archived entry from processing");
                }
            } else {
                // Left in processing; the startup sweep will retry it
                metrics::counter!("messages_failed").increment(1);
                tracing::error!(id = %msg.id, "Archive retries exhausted, entry left in processing");
            }
        }
    }

    /// Bounded archive retry with exponential backoff, doubled while the
    /// archive breaker is open
    async fn archive_with_retry(
        &self,
        msg: &ChatMessage,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        for attempt in 1..=self.retry_attempts {
            match self
                .breakers
                .archive
                .call(|| self.archive.archive_message(msg))
                .await
            {
                Ok(()) => return true,
                Err(e) => {
                    if attempt == self.retry_attempts {
                        tracing::warn!(id = %msg.id, attempt, error = %e, "Archive write failed");
                        return false;
                    }

                    let mut delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                    if self.breakers.archive.state() == BreakerState::Open {
                        delay *= 2;
                    }
                    tracing::warn!(
                        id = %msg.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Archive write failed, backing off"
                    );

                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                return false;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        false
    }
}
