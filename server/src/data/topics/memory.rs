//! In-memory topic backend
//!
//! Local-only broadcast channels. Suitable for tests and single-process
//! deployments; a multi-process fleet needs the Redis backend so messages
//! cross process boundaries.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::backend::{Subscription, TopicBackend};
use super::error::TopicError;

/// Default broadcast channel capacity
const DEFAULT_BROADCAST_CAPACITY: usize = 10_000;

/// In-memory topic backend
pub struct MemoryTopicBackend {
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl Default for MemoryTopicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTopicBackend {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }

    fn get_or_create(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        // Fast path: channel exists
        {
            let channels = self.channels.read();
            if let Some(sender) = channels.get(topic) {
                return sender.clone();
            }
        }

        let mut channels = self.channels.write();
        // Double-check after acquiring write lock
        if let Some(sender) = channels.get(topic) {
            return sender.clone();
        }
        let (sender, _) = broadcast::channel(self.capacity);
        channels.insert(topic.to_string(), sender.clone());
        sender
    }
}

#[async_trait]
impl TopicBackend for MemoryTopicBackend {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TopicError> {
        let sender = self.get_or_create(topic);
        // No receivers is fine for fire-and-forget
        let _ = sender.send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TopicError> {
        Ok(Subscription::new(self.get_or_create(topic).subscribe()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
