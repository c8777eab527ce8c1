//! Chat fabric envelopes.
//!
//! The chat envelope is deliberately open: the `type` field carries values
//! like `"message"`, `"typing"`, `"presence"`, `"read"`, `"room_message"`,
//! `"user_status"`, `"connected_users"` and `"messages_dropped"`, and the
//! payload is whatever the producing side put there. The hub fills in
//! missing fields (type from the bus channel prefix, conversation id from
//! the channel suffix) before fan-out.

use serde::{Deserialize, Serialize};

use super::types::{ConversationId, RoomId, UserId};

/// Well-known values of the chat envelope `type` field.
pub mod kind {
    pub const MESSAGE: &str = "message";
    pub const TYPING: &str = "typing";
    pub const PRESENCE: &str = "presence";
    pub const USER_STATUS: &str = "user_status";
    pub const CONNECTED_USERS: &str = "connected_users";
    pub const MESSAGES_DROPPED: &str = "messages_dropped";
}

/// The chat fabric envelope, inbound and outbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChatMessage {
    /// Envelope for a user online/offline transition, fanned out to every
    /// other connected user.
    pub fn user_status(user_id: UserId, status: &str) -> Self {
        Self {
            kind: kind::USER_STATUS.to_string(),
            conversation_id: None,
            room_id: None,
            user_id: Some(user_id),
            username: None,
            payload: serde_json::json!({ "status": status }),
        }
    }

    /// Initial snapshot sent to a freshly registered connection.
    pub fn connected_users(user_ids: &[UserId]) -> Self {
        Self {
            kind: kind::CONNECTED_USERS.to_string(),
            conversation_id: None,
            room_id: None,
            user_id: None,
            username: None,
            payload: serde_json::json!(ConnectedUsersPayload {
                user_ids: user_ids.to_vec(),
            }),
        }
    }
}

/// Payload of a `connected_users` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedUsersPayload {
    pub user_ids: Vec<UserId>,
}

/// Payload of a `user_status` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusPayload {
    pub status: String,
}
