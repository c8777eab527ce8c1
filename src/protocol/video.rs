//! Videochat signalling envelopes.
//!
//! The videochat fabric relays WebRTC negotiation between peers; the server
//! never inspects the SDP or ICE payloads.

use serde::{Deserialize, Serialize};

use super::game::ErrorPayload;
use super::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VideoChatEvent {
    Join {
        room_id: String,
        user_id: UserId,
    },
    Leave {
        room_id: String,
        user_id: UserId,
    },
    Offer {
        room_id: String,
        user_id: UserId,
        target_id: UserId,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Answer {
        room_id: String,
        user_id: UserId,
        target_id: UserId,
        #[serde(default)]
        payload: serde_json::Value,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        room_id: String,
        user_id: UserId,
        target_id: UserId,
        #[serde(default)]
        payload: serde_json::Value,
    },
    RoomUsers {
        room_id: String,
        payload: RoomUsersPayload,
    },
    UserJoined {
        room_id: String,
        user_id: UserId,
    },
    UserLeft {
        room_id: String,
        user_id: UserId,
    },
    Error {
        room_id: String,
        payload: ErrorPayload,
    },
    ServerShutdown,
}

/// Peers already present, sent to a freshly joined participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomUsersPayload {
    pub user_ids: Vec<UserId>,
}
