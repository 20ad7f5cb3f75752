//! Centralized shutdown management

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::constants::SHUTDOWN_TIMEOUT_SECS;
use crate::data::archive::ArchiveService;
use crate::data::store::StoreService;
use crate::data::topics::TopicService;

/// Centralized shutdown service for coordinating graceful shutdown
///
/// Shutdown is idempotent: `shutdown()` may be called more than once; only
/// the first call does work, later calls return after the signal is set.
#[derive(Clone)]
pub struct ShutdownService {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    topics: Arc<TopicService>,
    archive: Arc<ArchiveService>,
    store: Arc<StoreService>,
}

impl ShutdownService {
    pub fn new(
        topics: Arc<TopicService>,
        archive: Arc<ArchiveService>,
        store: Arc<StoreService>,
    ) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            handles: Arc::new(Mutex::new(Vec::new())),
            topics,
            archive,
            store,
        }
    }

    /// Register a background task handle to be awaited during shutdown
    pub async fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    /// Subscribe to shutdown signal
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Trigger shutdown
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Check if shutdown was triggered
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Trigger shutdown and wait for all registered tasks to complete
    ///
    /// Shutdown order (to prevent data loss):
    /// 1. Signal all tasks to stop accepting new work
    /// 2. Wait for the batch writer / queue worker / manager to drain
    /// 3. Shutdown pub/sub bridges (channels should be idle by now)
    /// 4. Flush and close the archive producer, then the store pool
    pub async fn shutdown(&self) {
        tracing::debug!("Initiating graceful shutdown...");
        self.trigger();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        let task_count = handles.len();
        tracing::debug!(
            count = task_count,
            "Waiting for background tasks to finish..."
        );

        let timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => {
                tracing::debug!("All background tasks completed");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Timeout waiting for background tasks"
                );
            }
        }

        tracing::debug!("Shutting down pub/sub bridges...");
        self.topics.shutdown().await;

        tracing::debug!("Flushing archive producer...");
        if let Err(e) = self.archive.flush().await {
            tracing::warn!(error = %e, "Archive flush on shutdown failed");
        }

        self.store.close().await;

        tracing::debug!("Shutdown complete");
    }

    /// Wait for shutdown signal (for use with axum graceful shutdown)
    /// Returns an owned future that can be passed to graceful_shutdown
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.rx.clone();
        async move {
            let _ = rx.wait_for(|&v| v).await;
        }
    }

    /// Install OS signal handlers and auto-trigger on Ctrl+C/SIGTERM
    pub fn install_signal_handlers(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sig) => {
                        sig.recv().await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::debug!("Received Ctrl+C, shutting down"),
                _ = terminate => tracing::debug!("Received SIGTERM, shutting down"),
            }

            service.trigger();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_shutdown() -> ShutdownService {
        let topics = Arc::new(TopicService::memory());
        let archive = Arc::new(ArchiveService::memory());
        let store = Arc::new(StoreService::memory());
        ShutdownService::new(topics, archive, store)
    }

    #[tokio::test]
    async fn test_shutdown_not_triggered_initially() {
        let shutdown = make_shutdown().await;
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_shutdown_trigger() {
        let shutdown = make_shutdown().await;
        shutdown.trigger();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let shutdown = make_shutdown().await;
        shutdown.shutdown().await;
        shutdown.shutdown().await;
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_shutdown_wait_returns_after_trigger() {
        let shutdown = make_shutdown().await;
        let wait_future = shutdown.wait();

        let handle = tokio::spawn(wait_future);

        tokio::task::yield_now().await;

        shutdown.trigger();

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_receives_shutdown() {
        let shutdown = make_shutdown().await;
        let rx = shutdown.subscribe();

        assert!(!*rx.borrow());
        shutdown.trigger();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_registered_task_awaited() {
        let shutdown = make_shutdown().await;
        let mut rx = shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let _ = rx.wait_for(|&v| v).await;
        });
        shutdown.register(handle).await;
        tokio::time::timeout(Duration::from_secs(1), shutdown.shutdown())
            .await
            .unwrap();
    }
}
