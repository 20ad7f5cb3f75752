//! Batch archive writer
//!
//! A single background task drains the in-memory ingest buffer,
//! accumulating up to the flush size or waiting out the flush interval,
//! whichever comes first, then appends each message to the archive log.
//! Failed appends are requeued onto the persistent pending queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::queue::ReliableQueue;
use crate::core::config::PipelineConfig;
use crate::data::archive::ArchiveService;
use crate::data::types::ChatMessage;
use crate::domain::breaker::Breakers;

/// Batch archive writer task
pub struct BatchWriter {
    rx: mpsc::Receiver<ChatMessage>,
    archive: Arc<ArchiveService>,
    queue: Arc<ReliableQueue>,
    breakers: Arc<Breakers>,
    flush_size: usize,
    flush_interval: Duration,
}

impl BatchWriter {
    pub fn new(
        rx: mpsc::Receiver<ChatMessage>,
        archive: Arc<ArchiveService>,
        queue: Arc<ReliableQueue>,
        breakers: Arc<Breakers>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            rx,
            archive,
            queue,
            breakers,
            flush_size: config.batch_flush_size,
            flush_interval: config.batch_flush_interval(),
        }
    }

    /// Start the writer; performs a final flush on shutdown
    pub fn start(mut self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut batch: Vec<ChatMessage> = Vec::with_capacity(self.flush_size);
            let mut tick = tokio::time::interval(self.flush_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::debug!(
                flush_size = self.flush_size,
                flush_interval_ms = self.flush_interval.as_millis() as u64,
                "Batch writer started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            // Final flush: drain whatever is still buffered
                            while let Ok(msg) = self.rx.try_recv() {
                                batch.push(msg);
                            }
                            flush(&mut batch, &self.archive, &self.queue, &self.breakers).await;
                            break;
                        }
                    }
                    received = self.rx.recv() => {
                        match received {
                            Some(msg) => {
                                batch.push(msg);
                                if batch.len() >= self.flush_size {
                                    flush(&mut batch, &self.archive, &self.queue, &self.breakers).await;
                                }
                            }
                            None => {
                                flush(&mut batch, &self.archive, &self.queue, &self.breakers).await;
                                break;
                            }
                        }
                    }
                    _ = tick.tick() => {
                        if !batch.is_empty() {
                            flush(&mut batch, &self.archive, &self.queue, &self.breakers).await;
                        }
                    }
                }
            }

            tracing::debug!("Batch writer stopped");
        })
    }
}

/// Append the batch to the archive log; requeue failures
async fn flush(
    batch: &mut Vec<ChatMessage>,
    archive: &ArchiveService,
    queue: &ReliableQueue,
    breakers: &Breakers,
) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!("archive_batch_size").record(batch.len() as f64);

    for msg in batch.drain(..) {
        let result = breakers.archive.call(|| archive.archive_message(&msg)).await;
        if let Err(e) = result {
            tracing::warn!(id = %msg.id, error = %e, "Archive write failed, requeueing");
            if let Err(enqueue_err) = queue.enqueue(&msg).await {
                metrics::counter!("messages_failed").increment(1);
                tracing::error!(
                    id = %msg.id,
                    error = %enqueue_err,
                    "Requeue after archive failure also failed, message only in durable store"
                );
            }
        }
    }
}
