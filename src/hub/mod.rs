//! Fanout hubs for the three realtime fabrics.
//!
//! All hubs share the same shape: membership maps behind a single
//! reader/writer lock, non-blocking try-sends onto per-client queues, and a
//! `start_wiring` hook that feeds bus deliveries back into the local
//! broadcast path. No lock is ever held across an await point or a socket
//! write.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::client::Client;
use crate::protocol::{RoomId, UserId};

pub mod chat;
pub mod game;
pub mod notification;
pub mod video;

pub use chat::ChatHub;
pub use game::GameHub;
pub use notification::NotificationHub;
pub use video::VideoChatHub;

/// Close reason used by every hub's shutdown sweep.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// The slice of a hub a [`Client`] needs: where to dispatch inbound frames
/// and where to report its own death.
#[async_trait]
pub trait Hub: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Remove this exact client instance from membership.
    fn unregister_client(&self, client: &Arc<Client>);

    /// Dispatch one inbound text frame.
    async fn handle_inbound(&self, client: &Arc<Client>, text: String);
}

/// Limit violations returned from hub registration. No state is mutated
/// when one of these is returned.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("user {user_id} has too many connections ({current}/{limit})")]
    UserConnectionLimit {
        user_id: UserId,
        current: usize,
        limit: usize,
    },
    #[error("server connection limit reached ({current}/{limit})")]
    TotalConnectionLimit { current: usize, limit: usize },
    #[error("game room limit reached ({current}/{limit})")]
    RoomLimit { current: usize, limit: usize },
    #[error("room {room_id} already has {limit} peers")]
    RoomFull { room_id: RoomId, limit: usize },
    #[error("video room {room_id} already has {limit} peers")]
    VideoRoomFull { room_id: String, limit: usize },
    #[error("user {user_id} has no active connection")]
    NotConnected { user_id: UserId },
}
