//! WebSocket frame format
//!
//! JSON frames tagged by `type`, modeled as one sum type instead of a bag
//! of optional fields. `id`, `from`, and `timestamp` are stamped
//! server-side on ingest; values supplied by clients are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::data::types::ChatMessage;

fn is_null(value: &Value) -> bool {
    value.is_null()
}

/// A WebSocket frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Chat {
        #[serde(default)]
        id: String,
        #[serde(default)]
        from: String,
        to: String,
        content: String,
        #[serde(default)]
        timestamp: i64,
    },
    GroupChat {
        #[serde(default)]
        id: String,
        #[serde(default)]
        from: String,
        group_id: String,
        content: String,
        #[serde(default)]
        timestamp: i64,
    },
    Notification {
        #[serde(default)]
        from: String,
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "is_null")]
        data: Value,
        #[serde(default)]
        timestamp: i64,
    },
    CallOffer {
        to: String,
        #[serde(default)]
        from: String,
        #[serde(default, skip_serializing_if = "is_null")]
        data: Value,
    },
    CallAnswer {
        to: String,
        #[serde(default)]
        from: String,
        #[serde(default, skip_serializing_if = "is_null")]
        data: Value,
    },
    CallIce {
        to: String,
        #[serde(default)]
        from: String,
        #[serde(default, skip_serializing_if = "is_null")]
        data: Value,
    },
    CallEnd {
        to: String,
        #[serde(default)]
        from: String,
    },
    CallRinging {
        to: String,
        #[serde(default)]
        from: String,
    },
    Ping,
    Pong,
}

impl Frame {
    /// Delivery frame for an ingested message
    pub fn from_message(msg: &ChatMessage) -> Self {
        if msg.is_group {
            Frame::GroupChat {
                id: msg.id.clone(),
                from: msg.from.clone(),
                group_id: msg.group_id.clone(),
                content: msg.content.clone(),
                timestamp: msg.timestamp,
            }
        } else {
            Frame::Chat {
                id: msg.id.clone(),
                from: msg.from.clone(),
                to: msg.to.clone(),
                content: msg.content.clone(),
                timestamp: msg.timestamp,
            }
        }
    }

    /// Stamp server-side fields, overwriting whatever the client sent
    pub fn stamp(&mut self, sender: &str) {
        let now = chrono::Utc::now().timestamp();
        match self {
            Frame::Chat {
                id,
                from,
                timestamp,
                ..
            }
            | Frame::GroupChat {
                id,
                from,
                timestamp,
                ..
            } => {
                *id = Uuid::new_v4().to_string();
                *from = sender.to_string();
                *timestamp = now;
            }
            Frame::Notification {
                from, timestamp, ..
            } => {
                *from = sender.to_string();
                *timestamp = now;
            }
            Frame::CallOffer { from, .. }
            | Frame::CallAnswer { from, .. }
            | Frame::CallIce { from, .. }
            | Frame::CallEnd { from, .. }
            | Frame::CallRinging { from, .. } => {
                *from = sender.to_string();
            }
            Frame::Ping | Frame::Pong => {}
        }
    }

    /// Addressed recipient for direct routing, if any
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Frame::Chat { to, .. }
            | Frame::CallOffer { to, .. }
            | Frame::CallAnswer { to, .. }
            | Frame::CallIce { to, .. }
            | Frame::CallEnd { to, .. }
            | Frame::CallRinging { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Frame kind for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Chat { .. } => "chat",
            Frame::GroupChat { .. } => "group_chat",
            Frame::Notification { .. } => "notification",
            Frame::CallOffer { .. } => "call_offer",
            Frame::CallAnswer { .. } => "call_answer",
            Frame::CallIce { .. } => "call_ice",
            Frame::CallEnd { .. } => "call_end",
            Frame::CallRinging { .. } => "call_ringing",
            Frame::Ping => "ping",
            Frame::Pong => "pong",
        }
    }
}

/// Cross-process fan-out envelope on `ws:broadcast:global`
///
/// Every payload carries its addressed recipient; the receiving relay
/// ignores payloads without one (the originator addresses each non-local
/// group member individually).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    pub frame: Frame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let frame = Frame::Chat {
            id: "m1".to_string(),
            from: "alice".to_string(),
            to: "bob".to_string(),
            content: "hi".to_string(),
            timestamp: 7,
        };
        let value: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["from"], "alice");

        let back: Frame = serde_json::from_value(value).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_ping_is_bare() {
        assert_eq!(serde_json::to_string(&Frame::Ping).unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_client_omitted_fields_default() {
        // A client-authored frame carries only type/to/content
        let frame: Frame =
            serde_json::from_str(r#"{"type":"chat","to":"bob","content":"hi"}"#).unwrap();
        match &frame {
            Frame::Chat { id, from, timestamp, .. } => {
                assert!(id.is_empty());
                assert!(from.is_empty());
                assert_eq!(*timestamp, 0);
            }
            other => panic!("expected chat frame, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_json::from_str::<Frame>(r#"{"type":"upload","content":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_stamp_overwrites_client_values() {
        let mut frame: Frame = serde_json::from_str(
            r#"{"type":"chat","id":"spoofed","from":"mallory","to":"bob","content":"hi","timestamp":1}"#,
        )
        .unwrap();
        frame.stamp("alice");
        match frame {
            Frame::Chat { id, from, timestamp, .. } => {
                assert_ne!(id, "spoofed");
                assert_eq!(from, "alice");
                assert!(timestamp > 1);
            }
            other => panic!("expected chat frame, got {other:?}"),
        }
    }

    #[test]
    fn test_recipient() {
        let call: Frame =
            serde_json::from_str(r#"{"type":"call_offer","to":"bob"}"#).unwrap();
        assert_eq!(call.recipient(), Some("bob"));

        let group: Frame = serde_json::from_str(
            r#"{"type":"group_chat","group_id":"g1","content":"hi"}"#,
        )
        .unwrap();
        assert_eq!(group.recipient(), None);
    }

    #[test]
    fn test_relay_envelope_roundtrip() {
        let envelope = RelayEnvelope {
            to: "bob".to_string(),
            frame: Frame::Pong,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: RelayEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_from_message() {
        let msg = ChatMessage::group("alice", "g1", "hi all");
        match Frame::from_message(&msg) {
            Frame::GroupChat { id, group_id, .. } => {
                assert_eq!(id, msg.id);
                assert_eq!(group_id, "g1");
            }
            other => panic!("expected group_chat frame, got {other:?}"),
        }
    }
}
