//! Persistence abstraction for game rooms, moves, stats, and room chat.
//!
//! The realtime core never talks to SQL directly; the game hub depends on
//! this trait and the binary wires in a backend. The in-memory backend in
//! [`memory`] is used by tests and by single-process deployments.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{GameStatus, GameType, RoomId, UserId};

pub mod memory;

pub use memory::InMemoryGameRepository;

/// A persisted game room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRoom {
    pub id: RoomId,
    pub game_type: GameType,
    pub status: GameStatus,
    pub creator_id: Option<UserId>,
    pub opponent_id: Option<UserId>,
    pub next_turn_id: Option<UserId>,
    pub winner_id: Option<UserId>,
    pub is_draw: bool,
    pub current_state: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl GameRoom {
    /// A fresh pending room awaiting an opponent.
    pub fn pending(id: RoomId, game_type: GameType, creator_id: UserId) -> Self {
        Self {
            id,
            game_type,
            status: GameStatus::Pending,
            creator_id: Some(creator_id),
            opponent_id: None,
            next_turn_id: None,
            winner_id: None,
            is_draw: false,
            current_state: crate::hub::game::initial_state(game_type),
            updated_at: Utc::now(),
        }
    }

    /// Whether `user_id` is one of the two players.
    pub fn is_player(&self, user_id: UserId) -> bool {
        self.creator_id == Some(user_id) || self.opponent_id == Some(user_id)
    }

    /// The other player, if both seats are filled.
    pub fn opponent_of(&self, user_id: UserId) -> Option<UserId> {
        if self.creator_id == Some(user_id) {
            self.opponent_id
        } else if self.opponent_id == Some(user_id) {
            self.creator_id
        } else {
            None
        }
    }
}

/// A persisted move, numbered monotonically per room starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMove {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub move_data: serde_json::Value,
    pub move_number: u64,
}

/// Per-user per-game-type lifetime stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStats {
    pub user_id: UserId,
    pub game_type: GameType,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub total_games: u64,
    pub points: i64,
}

impl GameStats {
    pub fn zero(user_id: UserId, game_type: GameType) -> Self {
        Self {
            user_id,
            game_type,
            wins: 0,
            losses: 0,
            draws: 0,
            total_games: 0,
            points: 0,
        }
    }
}

/// A chat message retained inside a game room's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomChatMessage {
    pub id: u64,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Storage contract used by the game hub.
#[async_trait]
pub trait GameRepository: Send + Sync {
    /// Persist a new room. Fails if the id is already taken.
    async fn create_room(&self, room: GameRoom) -> Result<GameRoom>;

    /// Fetch a room by id.
    async fn get_room(&self, room_id: RoomId) -> Result<Option<GameRoom>>;

    /// Overwrite a room's persisted state.
    async fn update_room(&self, room: &GameRoom) -> Result<()>;

    /// Active rooms of one game type.
    async fn get_active_rooms(&self, game_type: GameType) -> Result<Vec<GameRoom>>;

    /// Active rooms across all game types.
    async fn get_all_active_rooms(&self) -> Result<Vec<GameRoom>>;

    /// The creator's open pending room of a game type, if any.
    async fn get_pending_room_by_creator(
        &self,
        game_type: GameType,
        user_id: UserId,
    ) -> Result<Option<GameRoom>>;

    /// Append a move record.
    async fn create_move(&self, game_move: GameMove) -> Result<()>;

    /// All moves of a room in insertion order.
    async fn get_moves(&self, room_id: RoomId) -> Result<Vec<GameMove>>;

    /// Stats row for `(user_id, game_type)`, if one exists.
    async fn get_stats(&self, user_id: UserId, game_type: GameType) -> Result<Option<GameStats>>;

    /// Upsert the stats row keyed by `(user_id, game_type)`.
    async fn update_stats(&self, stats: GameStats) -> Result<()>;

    /// Append a room chat message, trimming the oldest entries beyond `cap`
    /// ordered by `(created_at, id)`. The backend assigns id and timestamp.
    async fn append_room_message(
        &self,
        room_id: RoomId,
        user_id: UserId,
        body: String,
        cap: usize,
    ) -> Result<RoomChatMessage>;

    /// Retained chat history of a room, oldest first.
    async fn get_room_messages(&self, room_id: RoomId) -> Result<Vec<RoomChatMessage>>;
}
