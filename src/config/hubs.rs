//! Hub membership limits.

use super::defaults::{
    default_max_conns_per_user, default_max_game_peers_per_room, default_max_game_room_messages,
    default_max_game_total_rooms, default_max_peers_per_room, default_max_total_conns,
};
use serde::{Deserialize, Serialize};

/// Resource limits enforced before a hub accepts work.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct HubConfig {
    /// Connections a single user may hold on one hub (multi-device cap)
    #[serde(default = "default_max_conns_per_user")]
    pub max_conns_per_user: usize,
    /// Total connections a hub accepts across all users
    #[serde(default = "default_max_total_conns")]
    pub max_total_conns: usize,
    /// Players per game room (the catalog is 1v1)
    #[serde(default = "default_max_game_peers_per_room")]
    pub max_game_peers_per_room: usize,
    /// Concurrently tracked game rooms
    #[serde(default = "default_max_game_total_rooms")]
    pub max_game_total_rooms: usize,
    /// Participants per videochat room
    #[serde(default = "default_max_peers_per_room")]
    pub max_peers_per_room: usize,
    /// Retained chat messages per game room
    #[serde(default = "default_max_game_room_messages")]
    pub max_game_room_messages: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_conns_per_user: default_max_conns_per_user(),
            max_total_conns: default_max_total_conns(),
            max_game_peers_per_room: default_max_game_peers_per_room(),
            max_game_total_rooms: default_max_game_total_rooms(),
            max_peers_per_room: default_max_peers_per_room(),
            max_game_room_messages: default_max_game_room_messages(),
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_conns_per_user == 0 {
            anyhow::bail!("hubs.max_conns_per_user must be nonzero");
        }
        if self.max_total_conns < self.max_conns_per_user {
            anyhow::bail!(
                "hubs.max_total_conns ({}) must be at least max_conns_per_user ({})",
                self.max_total_conns,
                self.max_conns_per_user
            );
        }
        if self.max_game_peers_per_room == 0 || self.max_peers_per_room == 0 {
            anyhow::bail!("hubs: per-room peer limits must be nonzero");
        }
        Ok(())
    }
}
