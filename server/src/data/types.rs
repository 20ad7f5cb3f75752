//! Shared chat entity types
//!
//! `ChatMessage` is the wire format everywhere a message crosses a process
//! boundary: cache sorted sets, the pending/processing queues, the archive
//! log, and the pub/sub channels all carry the same JSON serialization.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single immutable chat message
///
/// Exactly one of `to` / `group_id` is non-empty. `id` is globally unique
/// and is the dedup key for consumers (delivery is at-least-once).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    #[serde(default, rename = "group_id", skip_serializing_if = "String::is_empty")]
    pub group_id: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub is_group: bool,
}

impl ChatMessage {
    /// Build a direct message with a fresh id and the current timestamp
    pub fn direct(from: &str, to: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            group_id: String::new(),
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            is_group: false,
        }
    }

    /// Build a group message with a fresh id and the current timestamp
    pub fn group(from: &str, group_id: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: String::new(),
            group_id: group_id.to_string(),
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            is_group: true,
        }
    }

    /// Canonical conversation key for this message
    pub fn conversation_key(&self) -> String {
        if self.is_group {
            group_conversation_key(&self.group_id)
        } else {
            direct_conversation_key(&self.from, &self.to)
        }
    }
}

/// Canonical key for a 1:1 conversation: the lexicographically sorted pair
/// joined with `:`, so `key(a,b) == key(b,a)`.
pub fn direct_conversation_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

/// Canonical key for a group conversation
pub fn group_conversation_key(group_id: &str) -> String {
    format!("group:{group_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_key_symmetric() {
        assert_eq!(
            direct_conversation_key("alice", "bob"),
            direct_conversation_key("bob", "alice")
        );
        assert_eq!(direct_conversation_key("alice", "bob"), "alice:bob");
    }

    #[test]
    fn test_group_conversation_key() {
        assert_eq!(group_conversation_key("g1"), "group:g1");
    }

    #[test]
    fn test_message_conversation_key() {
        let direct = ChatMessage::direct("bob", "alice", "hi");
        assert_eq!(direct.conversation_key(), "alice:bob");

        let group = ChatMessage::group("alice", "g1", "hi all");
        assert_eq!(group.conversation_key(), "group:g1");
        assert!(group.is_group);
        assert!(group.to.is_empty());
    }

    #[test]
    fn test_json_shape() {
        let msg = ChatMessage::direct("alice", "bob", "hi");
        let value: serde_json::Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap())
            .unwrap();
        // Direct messages must not leak an empty group_id field.
        assert!(value.get("group_id").is_none());
        assert_eq!(value["from"], "alice");
        assert_eq!(value["to"], "bob");
    }

    #[test]
    fn test_roundtrip() {
        let msg = ChatMessage::group("alice", "g7", "hello");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
