//! Cache key construction
//!
//! Key layout is shared with cooperating services (presence, web UI); the
//! exact formats here are a wire contract, not an implementation detail.

use crate::core::constants::{
    KEY_PREFIX_CONVERSATION, KEY_PREFIX_GROUP, KEY_PREFIX_SESSION, KEY_PREFIX_UNREAD,
    KEY_SUFFIX_GROUP_MESSAGES,
};
use crate::data::types::direct_conversation_key;

/// Namespace for cache key construction
pub struct CacheKey;

impl CacheKey {
    /// `chat:conv:<u1>:<u2>` with the pair lexicographically sorted
    pub fn conversation(a: &str, b: &str) -> String {
        format!("{KEY_PREFIX_CONVERSATION}{}", direct_conversation_key(a, b))
    }

    /// `chat:group:<gid>:messages`
    pub fn group_messages(group_id: &str) -> String {
        format!("{KEY_PREFIX_GROUP}{group_id}{KEY_SUFFIX_GROUP_MESSAGES}")
    }

    /// `chat:unread:<user>`
    pub fn unread(user: &str) -> String {
        format!("{KEY_PREFIX_UNREAD}{user}")
    }

    /// `session:<id>`
    pub fn session(session_id: &str) -> String {
        format!("{KEY_PREFIX_SESSION}{session_id}")
    }

    /// `chat:group:<gid>` pub/sub channel for group-message relay
    pub fn group_channel(group_id: &str) -> String {
        format!("{KEY_PREFIX_GROUP}{group_id}")
    }
}
