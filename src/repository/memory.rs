//! In-memory repository backend.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::protocol::{GameStatus, GameType, RoomId, UserId};

use super::{GameMove, GameRepository, GameRoom, GameStats, RoomChatMessage};

/// HashMap-backed storage with the same atomicity guarantees the SQL
/// backend provides per statement.
#[derive(Default)]
pub struct InMemoryGameRepository {
    rooms: RwLock<HashMap<RoomId, GameRoom>>,
    moves: RwLock<HashMap<RoomId, Vec<GameMove>>>,
    stats: RwLock<HashMap<(UserId, GameType), GameStats>>,
    messages: RwLock<HashMap<RoomId, Vec<RoomChatMessage>>>,
    next_message_id: AtomicU64,
}

impl InMemoryGameRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a message id; the SQL backend gets this from its sequence.
    pub fn next_message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl GameRepository for InMemoryGameRepository {
    async fn create_room(&self, room: GameRoom) -> Result<GameRoom> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.id) {
            bail!("room {} already exists", room.id);
        }
        rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: RoomId) -> Result<Option<GameRoom>> {
        Ok(self.rooms.read().await.get(&room_id).cloned())
    }

    async fn update_room(&self, room: &GameRoom) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let Some(existing) = rooms.get_mut(&room.id) else {
            bail!("room {} not found", room.id);
        };
        *existing = room.clone();
        existing.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn get_active_rooms(&self, game_type: GameType) -> Result<Vec<GameRoom>> {
        Ok(self
            .rooms
            .read()
            .await
            .values()
            .filter(|room| room.status == GameStatus::Active && room.game_type == game_type)
            .cloned()
            .collect())
    }

    async fn get_all_active_rooms(&self) -> Result<Vec<GameRoom>> {
        Ok(self
            .rooms
            .read()
            .await
            .values()
            .filter(|room| room.status == GameStatus::Active)
            .cloned()
            .collect())
    }

    async fn get_pending_room_by_creator(
        &self,
        game_type: GameType,
        user_id: UserId,
    ) -> Result<Option<GameRoom>> {
        Ok(self
            .rooms
            .read()
            .await
            .values()
            .find(|room| {
                room.status == GameStatus::Pending
                    && room.game_type == game_type
                    && room.creator_id == Some(user_id)
            })
            .cloned())
    }

    async fn create_move(&self, game_move: GameMove) -> Result<()> {
        self.moves
            .write()
            .await
            .entry(game_move.room_id)
            .or_default()
            .push(game_move);
        Ok(())
    }

    async fn get_moves(&self, room_id: RoomId) -> Result<Vec<GameMove>> {
        Ok(self
            .moves
            .read()
            .await
            .get(&room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_stats(&self, user_id: UserId, game_type: GameType) -> Result<Option<GameStats>> {
        Ok(self
            .stats
            .read()
            .await
            .get(&(user_id, game_type))
            .copied())
    }

    async fn update_stats(&self, stats: GameStats) -> Result<()> {
        self.stats
            .write()
            .await
            .insert((stats.user_id, stats.game_type), stats);
        Ok(())
    }

    async fn append_room_message(
        &self,
        room_id: RoomId,
        user_id: UserId,
        body: String,
        cap: usize,
    ) -> Result<RoomChatMessage> {
        let message = RoomChatMessage {
            id: self.next_message_id(),
            room_id,
            user_id,
            body,
            created_at: chrono::Utc::now(),
        };

        let mut messages = self.messages.write().await;
        let history = messages.entry(room_id).or_default();
        history.push(message.clone());
        if history.len() > cap {
            // Oldest first by (created_at, id), mirroring the SQL delete.
            history.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
            let excess = history.len() - cap;
            history.drain(..excess);
        }
        Ok(message)
    }

    async fn get_room_messages(&self, room_id: RoomId) -> Result<Vec<RoomChatMessage>> {
        let mut history = self
            .messages
            .read()
            .await
            .get(&room_id)
            .cloned()
            .unwrap_or_default();
        history.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(history)
    }
}
