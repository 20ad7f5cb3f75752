//! Redis topic backend using Pub/Sub
//!
//! ## Bridge Architecture
//!
//! Each subscribed channel gets ONE bridge task (not one per subscriber):
//! - The bridge task holds a dedicated Redis connection for `SUBSCRIBE`
//! - It forwards messages from Redis into a local broadcast channel
//! - Local subscribers are fan-out receivers on that channel
//! - The task reconnects with a delay after connection errors
//!
//! ## Message Flow (No Duplicates)
//!
//! ```text
//! publish() ──► Redis PUBLISH ──► Bridge Task ──► Local Broadcast ──► Subscribers
//! ```
//!
//! `publish()` does NOT send to the local broadcast directly; everything
//! flows through Redis, so a process sees its own messages exactly once and
//! peer processes see them the same way.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::backend::{Subscription, TopicBackend};
use super::error::TopicError;

/// Reconnection delay for pub/sub after error
const PUBSUB_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Local broadcast channel capacity per bridged channel
const BRIDGE_BROADCAST_CAPACITY: usize = 10_000;

/// Time allowed for bridge tasks to stop during shutdown
const BRIDGE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-channel bridge: local fan-out plus the Redis subscriber task
struct Bridge {
    sender: broadcast::Sender<Vec<u8>>,
    task: JoinHandle<()>,
}

/// Redis topic backend
pub struct RedisTopicBackend {
    /// Connection pool for PUBLISH
    pool: Pool,
    /// Redis URL for creating dedicated pub/sub connections
    redis_url: String,
    /// Active bridges by channel name
    bridges: RwLock<HashMap<String, Bridge>>,
    /// Shutdown signal for bridge tasks
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RedisTopicBackend {
    /// Create a new Redis topic backend
    pub async fn new(redis_url: &str) -> Result<Self, TopicError> {
        let mut config = Config::from_url(redis_url);
        config.pool = Some(deadpool_redis::PoolConfig {
            max_size: 32,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| TopicError::Connection(format!("Failed to create Redis pool: {e}")))?;

        // Validate connection
        let mut conn = pool.get().await?;
        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| TopicError::Connection(format!("Redis PING failed: {e}")))?;

        tracing::debug!("Redis topic backend connected");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            pool,
            redis_url: redis_url.to_string(),
            bridges: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the local fan-out for a channel, starting its bridge task on
    /// first use
    fn get_or_create_bridge(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        {
            let bridges = self.bridges.read();
            if let Some(bridge) = bridges.get(channel) {
                return bridge.sender.clone();
            }
        }

        let mut bridges = self.bridges.write();
        // Double-check after acquiring write lock
        if let Some(bridge) = bridges.get(channel) {
            return bridge.sender.clone();
        }

        let (sender, _) = broadcast::channel(BRIDGE_BROADCAST_CAPACITY);
        let task = tokio::spawn(run_bridge_task(
            self.redis_url.clone(),
            channel.to_string(),
            sender.clone(),
            self.shutdown_rx.clone(),
        ));
        bridges.insert(channel.to_string(), Bridge {
            sender: sender.clone(),
            task,
        });
        sender
    }
}

/// Forward Redis pub/sub messages into the local broadcast channel,
/// reconnecting after errors until shutdown is signalled
async fn run_bridge_task(
    redis_url: String,
    channel: String,
    sender: broadcast::Sender<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!(channel = %channel, "Starting Redis pub/sub bridge");

    'outer: loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Dedicated client for SUBSCRIBE (pooled connections can't subscribe)
        let client = match deadpool_redis::redis::Client::open(redis_url.as_str()) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "Failed to create Redis client for pub/sub, retrying...");
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(PUBSUB_RECONNECT_DELAY) => continue,
                }
            }
        };

        let mut pubsub = match client.get_async_pubsub().await {
            Ok(ps) => ps,
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "Failed to get pub/sub connection, retrying...");
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(PUBSUB_RECONNECT_DELAY) => continue,
                }
            }
        };

        if let Err(e) = pubsub.subscribe(&channel).await {
            tracing::warn!(error = %e, channel = %channel, "Failed to subscribe to channel, retrying...");
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(PUBSUB_RECONNECT_DELAY) => continue,
            }
        }

        tracing::debug!(channel = %channel, "Redis pub/sub bridge connected");

        let mut msg_stream = pubsub.on_message();
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!(channel = %channel, "Bridge task stopping (shutdown)");
                        break 'outer;
                    }
                }

                msg_opt = msg_stream.next() => {
                    match msg_opt {
                        Some(msg) => {
                            let payload: Vec<u8> = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    tracing::warn!(error = %e, channel = %channel, "Failed to get message payload");
                                    continue;
                                }
                            };
                            // No receivers is fine for fire-and-forget
                            let _ = sender.send(payload);
                        }
                        None => {
                            tracing::warn!(channel = %channel, "Redis pub/sub stream ended, reconnecting...");
                            tokio::time::sleep(PUBSUB_RECONNECT_DELAY).await;
                            continue 'outer;
                        }
                    }
                }
            }
        }
    }

    tracing::debug!(channel = %channel, "Redis pub/sub bridge stopped");
}

#[async_trait]
impl TopicBackend for RedisTopicBackend {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TopicError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = deadpool_redis::redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TopicError> {
        Ok(Subscription::new(
            self.get_or_create_bridge(topic).subscribe(),
        ))
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let bridges: Vec<Bridge> = {
            let mut guard = self.bridges.write();
            guard.drain().map(|(_, bridge)| bridge).collect()
        };

        for bridge in bridges {
            if tokio::time::timeout(BRIDGE_STOP_TIMEOUT, bridge.task)
                .await
                .is_err()
            {
                tracing::warn!("Timeout waiting for pub/sub bridge to stop");
            }
        }

        tracing::debug!("Redis topic backend shutdown complete");
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
