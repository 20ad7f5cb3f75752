//! Cross-process subscribers
//!
//! Two long-lived subscriptions feed the manager:
//! - the global relay (`ws:broadcast:global`) delivers addressed frames
//!   originating on peer processes to locally connected recipients
//! - the chat bridge (`chat:messages`) delivers every pipeline message to
//!   local clients that pass the visibility filter
//!
//! Both tolerate lag (pub/sub is best-effort) and exit on shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::frame::RelayEnvelope;
use super::manager::ConnectionManager;
use crate::core::constants::{CHANNEL_CHAT_MESSAGES, CHANNEL_WS_BROADCAST};
use crate::data::topics::{TopicError, TopicService};
use crate::data::types::ChatMessage;

/// Subscribe to the global fan-out channel and deliver addressed frames
pub fn start_global_relay(
    topics: Arc<TopicService>,
    manager: Arc<ConnectionManager>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    run_subscriber(
        topics,
        CHANNEL_WS_BROADCAST,
        shutdown_rx,
        move |payload, manager| async move {
            let envelope: RelayEnvelope = match serde_json::from_slice(&payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(error = %e, "Undeserializable relay payload");
                    return;
                }
            };
            if envelope.to.is_empty() {
                // Unaddressed group payloads were already expanded by the
                // originator
                return;
            }
            manager.relay_deliver(&envelope.to, envelope.frame).await;
        },
        manager,
    )
}

/// Subscribe to the chat channel and deliver to visibility-matched clients
pub fn start_chat_bridge(
    topics: Arc<TopicService>,
    manager: Arc<ConnectionManager>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    run_subscriber(
        topics,
        CHANNEL_CHAT_MESSAGES,
        shutdown_rx,
        move |payload, manager| async move {
            let msg: ChatMessage = match serde_json::from_slice(&payload) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "Undeserializable chat payload");
                    return;
                }
            };
            manager.deliver(msg).await;
        },
        manager,
    )
}

fn run_subscriber<F, Fut>(
    topics: Arc<TopicService>,
    channel: &'static str,
    mut shutdown_rx: watch::Receiver<bool>,
    handler: F,
    manager: Arc<ConnectionManager>,
) -> JoinHandle<()>
where
    F: Fn(Vec<u8>, Arc<ConnectionManager>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut subscription = match topics.subscribe(channel).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::error!(channel, error = %e, "Failed to subscribe");
                return;
            }
        };

        tracing::debug!(channel, "Subscriber started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                received = subscription.recv() => {
                    match received {
                        Ok(payload) => handler(payload, Arc::clone(&manager)).await,
                        Err(TopicError::Lagged(n)) => {
                            tracing::warn!(channel, lagged = n, "Subscriber lagged, messages missed");
                        }
                        Err(e) => {
                            tracing::debug!(channel, error = %e, "Subscription ended");
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!(channel, "Subscriber stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::super::frame::Frame;
    use crate::data::store::{MemoryMessageStore, StoreService};
    use crate::domain::breaker::Breakers;

    async fn setup() -> (
        Arc<TopicService>,
        Arc<ConnectionManager>,
        watch::Sender<bool>,
    ) {
        let topics = Arc::new(TopicService::memory());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (manager, _handle) = ConnectionManager::start(
            Arc::new(StoreService::with_store(Arc::new(MemoryMessageStore::new()))),
            Arc::clone(&topics),
            Arc::new(Breakers::new()),
            shutdown_rx,
        );
        (topics, manager, shutdown_tx)
    }

    async fn connect(
        manager: &ConnectionManager,
        username: &str,
        groups: &[&str],
    ) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(16);
        let groups: HashSet<String> = groups.iter().map(|g| g.to_string()).collect();
        manager.register(username, Arc::new(groups), tx).await;
        rx
    }

    #[tokio::test]
    async fn test_global_relay_delivers_addressed_frames() {
        let (topics, manager, shutdown_tx) = setup().await;
        let _relay = start_global_relay(
            Arc::clone(&topics),
            Arc::clone(&manager),
            shutdown_tx.subscribe(),
        );
        // Let the subscription attach before publishing
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut bob_rx = connect(&manager, "bob", &[]).await;

        let envelope = RelayEnvelope {
            to: "bob".to_string(),
            frame: Frame::Pong,
        };
        topics
            .publish_json(CHANNEL_WS_BROADCAST, &envelope)
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), bob_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, Frame::Pong);
    }

    #[tokio::test]
    async fn test_global_relay_ignores_unaddressed_payloads() {
        let (topics, manager, shutdown_tx) = setup().await;
        let _relay = start_global_relay(
            Arc::clone(&topics),
            Arc::clone(&manager),
            shutdown_tx.subscribe(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut bob_rx = connect(&manager, "bob", &[]).await;

        let envelope = RelayEnvelope {
            to: String::new(),
            frame: Frame::Pong,
        };
        topics
            .publish_json(CHANNEL_WS_BROADCAST, &envelope)
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), bob_rx.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_chat_bridge_applies_visibility() {
        let (topics, manager, shutdown_tx) = setup().await;
        let _bridge = start_chat_bridge(
            Arc::clone(&topics),
            Arc::clone(&manager),
            shutdown_tx.subscribe(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut bob_rx = connect(&manager, "bob", &[]).await;
        let mut carol_rx = connect(&manager, "carol", &[]).await;

        let msg = ChatMessage::direct("alice", "bob", "hi");
        topics
            .publish_json(CHANNEL_CHAT_MESSAGES, &msg)
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), bob_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Frame::Chat { .. }));

        let result = tokio::time::timeout(Duration::from_millis(50), carol_rx.recv()).await;
        assert!(result.is_err());
    }
}
