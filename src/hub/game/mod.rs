//! Room-scoped game sessions: membership, action dispatch, and the
//! authoritative state machines for the four supported games.
//!
//! The hub owns the whole path from an inbound action down to the
//! type-specific engine: it validates turn order against the persisted
//! room, applies the engine transition, persists the move and the new
//! state, updates stats on finish, and fans the snapshot out locally and
//! over the bus. Engines only see a decoded payload and the actor's
//! symbol; the hub alone knows the symbol-to-user mapping.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Client, Outbound};
use crate::config::{GamePointsConfig, HubConfig, WebSocketTiming};
use crate::metrics::ServerMetrics;
use crate::notifier::{channels, Notifier};
use crate::protocol::{
    GameAction, GameChatPayload, GameEvent, GameStatePayload, GameStatus, GameType,
    PlaceShipsPayload, RoomId, UserId,
};
use crate::repository::{GameMove, GameRepository, GameRoom, GameStats};

use super::{Hub, RegisterError, SHUTDOWN_REASON};

pub mod battleship;
pub mod checkers;
pub mod connect_four;
pub mod othello;

/// Rejection sent to the acting user as a `{"type":"error"}` event. The
/// display strings are part of the client contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoveError {
    #[error("Invalid move location or column full")]
    ColumnFull,
    #[error("Invalid move location")]
    InvalidLocation,
    #[error("Shot out of bounds")]
    ShotOutOfBounds,
    #[error("Already shot that cell")]
    DuplicateShot,
    #[error("Not your piece")]
    NotYourPiece,
    #[error("Must capture")]
    MustCapture,
    #[error("Must continue jump")]
    MustContinueJump,
    #[error("Invalid move")]
    InvalidMove,
    #[error("{0}")]
    Payload(String),
}

/// What an engine hands back after a successful transition.
#[derive(Debug)]
pub(crate) struct EngineOutcome {
    /// New persisted state for the room.
    pub state: serde_json::Value,
    pub finished: bool,
    /// Winning symbol when finished; `None` with `finished` means a draw.
    pub winner_symbol: Option<String>,
    pub turn: TurnDirective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TurnDirective {
    Switch,
    Retain,
}

/// Initial `current_state` for a fresh room of the given type.
pub fn initial_state(game_type: GameType) -> serde_json::Value {
    match game_type {
        GameType::ConnectFour => connect_four::initial_board(),
        GameType::Othello => othello::initial_board(),
        GameType::Battleship => battleship::initial_state(),
        GameType::Checkers => checkers::initial_state(),
    }
}

#[derive(Default)]
struct GameHubState {
    /// At most one client per user per room; reconnects replace in place.
    rooms: HashMap<RoomId, HashMap<UserId, Arc<Client>>>,
    user_rooms: HashMap<UserId, HashSet<RoomId>>,
}

/// Fanout engine and game authority for the game fabric.
pub struct GameHub {
    weak_self: Weak<Self>,
    state: RwLock<GameHubState>,
    repo: Arc<dyn GameRepository>,
    notifier: Arc<Notifier>,
    limits: HubConfig,
    points: GamePointsConfig,
    timing: WebSocketTiming,
    metrics: Arc<ServerMetrics>,
}

impl GameHub {
    pub fn new(
        repo: Arc<dyn GameRepository>,
        notifier: Arc<Notifier>,
        limits: HubConfig,
        points: GamePointsConfig,
        timing: WebSocketTiming,
        metrics: Arc<ServerMetrics>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: Weak::clone(weak_self),
            state: RwLock::new(GameHubState::default()),
            repo,
            notifier,
            limits,
            points,
            timing,
            metrics,
        })
    }

    /// Accept a connection into a room. A user already registered in the
    /// room is treated as a reconnect and replaced without a peer-limit
    /// check; otherwise the peer and room limits apply.
    pub fn register(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(Arc<Client>, tokio::sync::mpsc::Receiver<Outbound>), RegisterError> {
        let (client, receiver) = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

            if !state.rooms.contains_key(&room_id)
                && state.rooms.len() >= self.limits.max_game_total_rooms
            {
                self.metrics.increment_register_rejections();
                return Err(RegisterError::RoomLimit {
                    current: state.rooms.len(),
                    limit: self.limits.max_game_total_rooms,
                });
            }

            let room = state.rooms.entry(room_id).or_default();
            let reconnect = room.contains_key(&user_id);
            if !reconnect && room.len() >= self.limits.max_game_peers_per_room {
                self.metrics.increment_register_rejections();
                return Err(RegisterError::RoomFull {
                    room_id,
                    limit: self.limits.max_game_peers_per_room,
                });
            }

            // The caller necessarily holds the hub's Arc, so the upgrade
            // cannot fail.
            let hub: Arc<dyn Hub> = self
                .weak_self
                .upgrade()
                .expect("register called through the hub's Arc");
            let (client, receiver) = Client::new(
                hub,
                user_id,
                None,
                Arc::clone(&self.metrics),
                self.timing.outbound_queue_capacity,
            );
            room.insert(user_id, Arc::clone(&client));
            state
                .user_rooms
                .entry(user_id)
                .or_default()
                .insert(room_id);

            if reconnect {
                debug!(%user_id, %room_id, "Reconnect replaced prior game client");
            }
            (client, receiver)
        };

        self.metrics.increment_connections();
        info!(%user_id, %room_id, hub = self.name(), "Client registered");
        Ok((client, receiver))
    }

    /// Dispatch one action. Returns whether the room's persisted state was
    /// mutated, so the transport layer can coalesce updates.
    pub async fn handle_action(&self, user_id: UserId, action: GameAction) -> bool {
        self.metrics.increment_game_actions();
        match action {
            GameAction::JoinRoom { room_id } => self.handle_join(user_id, room_id).await,
            GameAction::MakeMove { room_id, payload } => {
                self.handle_move(user_id, room_id, payload).await
            }
            GameAction::PlaceShips { room_id, payload } => {
                self.handle_place_ships(user_id, room_id, payload).await
            }
            GameAction::Chat { room_id, payload } => {
                self.handle_chat(user_id, room_id, payload).await
            }
            GameAction::Unknown => {
                debug!(%user_id, "Ignoring unknown game action");
                false
            }
        }
    }

    /// Serialize once, enqueue to every client in the room.
    pub fn broadcast_to_room(&self, room_id: RoomId, event: &GameEvent) {
        match serde_json::to_vec(event) {
            Ok(bytes) => self.broadcast_raw(room_id, Bytes::from(bytes)),
            Err(err) => warn!(%room_id, error = %err, "Failed to serialize game event"),
        }
    }

    fn broadcast_raw(&self, room_id: RoomId, bytes: Bytes) {
        let clients: Vec<Arc<Client>> = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            let Some(room) = state.rooms.get(&room_id) else {
                return;
            };
            room.values().cloned().collect()
        };
        for client in clients {
            client.try_send(bytes.clone());
        }
        self.metrics.increment_game_events_broadcast();
    }

    /// Deliver an error event only to the actor's client in that room.
    fn send_error(&self, user_id: UserId, room_id: RoomId, message: &str) {
        let client = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state
                .rooms
                .get(&room_id)
                .and_then(|room| room.get(&user_id))
                .cloned()
        };
        if let Some(client) = client {
            client.try_send_json(&GameEvent::Error {
                room_id,
                payload: crate::protocol::ErrorPayload {
                    message: message.to_string(),
                },
            });
        }
    }

    async fn load_room(&self, user_id: UserId, room_id: RoomId) -> Option<GameRoom> {
        match self.repo.get_room(room_id).await {
            Ok(Some(room)) => Some(room),
            Ok(None) => {
                self.send_error(user_id, room_id, "Room not found");
                None
            }
            Err(err) => {
                self.metrics.increment_persistence_errors();
                warn!(%room_id, error = %err, "Failed to load room");
                self.send_error(user_id, room_id, "Room not found");
                None
            }
        }
    }

    /// Join protocol: seat the opponent, activate the room, creator moves
    /// first. Battleship rooms restart from the setup state.
    async fn handle_join(&self, user_id: UserId, room_id: RoomId) -> bool {
        let Some(mut room) = self.load_room(user_id, room_id).await else {
            return false;
        };

        if room.status != GameStatus::Pending {
            self.send_error(user_id, room_id, "Room is not joinable");
            return false;
        }
        if room.creator_id == Some(user_id) {
            self.send_error(user_id, room_id, "Cannot join your own room");
            return false;
        }
        let Some(creator_id) = room.creator_id else {
            self.send_error(user_id, room_id, "Room has no creator");
            return false;
        };

        room.opponent_id = Some(user_id);
        room.status = GameStatus::Active;
        room.next_turn_id = Some(creator_id);
        if room.game_type == GameType::Battleship {
            room.current_state = battleship::initial_state();
        }
        self.persist_room(&room).await;

        let event = GameEvent::GameStarted {
            room_id,
            payload: snapshot(&room),
        };
        self.broadcast_to_room(room_id, &event);
        self.publish_event(room_id, &event).await;
        info!(%room_id, creator = %creator_id, opponent = %user_id, game = %room.game_type, "Game started");
        true
    }

    /// Common move framing: status and turn validation, engine dispatch,
    /// move persistence, finish/stats handling, turn switch, fanout.
    async fn handle_move(
        &self,
        user_id: UserId,
        room_id: RoomId,
        payload: serde_json::Value,
    ) -> bool {
        let Some(mut room) = self.load_room(user_id, room_id).await else {
            return false;
        };

        if room.status != GameStatus::Active {
            self.send_error(user_id, room_id, "Game is not active");
            return false;
        }
        if room.next_turn_id != Some(user_id) {
            self.send_error(user_id, room_id, "Not your turn");
            return false;
        }

        let is_creator = room.creator_id == Some(user_id);
        let symbol = actor_symbol(room.game_type, is_creator);

        let outcome = match room.game_type {
            GameType::ConnectFour => connect_four::apply_move(&room.current_state, &payload, symbol),
            GameType::Othello => othello::apply_move(&room.current_state, &payload, symbol),
            GameType::Checkers => checkers::apply_move(&room.current_state, &payload, symbol),
            GameType::Battleship => {
                battleship::fire(&room.current_state, &payload, is_creator, symbol)
            }
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                self.metrics.increment_game_moves_rejected();
                self.send_error(user_id, room_id, &err.to_string());
                return false;
            }
        };

        self.persist_move(&room, user_id, &payload).await;

        room.current_state = outcome.state;
        if outcome.finished {
            room.status = GameStatus::Finished;
            match &outcome.winner_symbol {
                Some(symbol) => {
                    room.winner_id = user_for_symbol(&room, symbol);
                    room.is_draw = false;
                }
                None => {
                    room.winner_id = None;
                    room.is_draw = true;
                }
            }
            self.metrics.increment_games_finished();
            self.record_stats(&room).await;
        } else {
            room.next_turn_id = match outcome.turn {
                TurnDirective::Switch => room.opponent_of(user_id),
                TurnDirective::Retain => Some(user_id),
            };
        }

        self.persist_room(&room).await;

        let event = GameEvent::GameState {
            room_id,
            payload: snapshot(&room),
        };
        self.broadcast_to_room(room_id, &event);
        self.publish_event(room_id, &event).await;
        self.metrics.increment_game_moves_applied();
        true
    }

    /// Battleship setup: validate and record a fleet; both fleets ready
    /// flips the room into the battle phase with the creator to move.
    async fn handle_place_ships(
        &self,
        user_id: UserId,
        room_id: RoomId,
        payload: serde_json::Value,
    ) -> bool {
        let Some(mut room) = self.load_room(user_id, room_id).await else {
            return false;
        };

        if room.status != GameStatus::Active || room.game_type != GameType::Battleship {
            self.send_error(user_id, room_id, "Game is not in ship placement");
            return false;
        }
        if !room.is_player(user_id) {
            self.send_error(user_id, room_id, "Not a player in this room");
            return false;
        }

        let ships: PlaceShipsPayload = match serde_json::from_value(payload) {
            Ok(ships) => ships,
            Err(_) => {
                self.send_error(user_id, room_id, "Invalid ships payload");
                return false;
            }
        };

        let is_creator = room.creator_id == Some(user_id);
        match battleship::place_ships(&room.current_state, ships.ships, is_creator) {
            Ok((state, battle_begins)) => {
                room.current_state = state;
                if battle_begins {
                    room.next_turn_id = room.creator_id;
                }
                self.persist_room(&room).await;

                let event = GameEvent::GameState {
                    room_id,
                    payload: snapshot(&room),
                };
                self.broadcast_to_room(room_id, &event);
                self.publish_event(room_id, &event).await;
                true
            }
            Err(err) => {
                self.metrics.increment_game_moves_rejected();
                self.send_error(user_id, room_id, &err.to_string());
                false
            }
        }
    }

    /// Room chat: broadcast-only, retained in a bounded per-room history.
    async fn handle_chat(
        &self,
        user_id: UserId,
        room_id: RoomId,
        payload: serde_json::Value,
    ) -> bool {
        let chat: GameChatPayload = match serde_json::from_value(payload) {
            Ok(chat) => chat,
            Err(_) => {
                debug!(%user_id, %room_id, "Malformed chat payload ignored");
                return false;
            }
        };

        if let Err(err) = self
            .repo
            .append_room_message(
                room_id,
                user_id,
                chat.message.clone(),
                self.limits.max_game_room_messages,
            )
            .await
        {
            self.metrics.increment_persistence_errors();
            warn!(%room_id, error = %err, "Failed to persist room chat message");
        }

        let event = GameEvent::Chat {
            room_id,
            user_id,
            payload: serde_json::json!(chat),
        };
        self.broadcast_to_room(room_id, &event);
        self.publish_event(room_id, &event).await;
        false
    }

    async fn persist_room(&self, room: &GameRoom) {
        if let Err(err) = self.repo.update_room(room).await {
            self.metrics.increment_persistence_errors();
            // The in-memory decision already happened; fanout still runs.
            warn!(room_id = %room.id, error = %err, "Failed to persist room state");
        }
    }

    async fn persist_move(&self, room: &GameRoom, user_id: UserId, payload: &serde_json::Value) {
        let move_number = match self.repo.get_moves(room.id).await {
            Ok(moves) => moves.len() as u64 + 1,
            Err(err) => {
                self.metrics.increment_persistence_errors();
                warn!(room_id = %room.id, error = %err, "Failed to count moves");
                return;
            }
        };
        if let Err(err) = self
            .repo
            .create_move(GameMove {
                room_id: room.id,
                user_id,
                move_data: payload.clone(),
                move_number,
            })
            .await
        {
            self.metrics.increment_persistence_errors();
            warn!(room_id = %room.id, error = %err, "Failed to persist move");
        }
    }

    /// Upsert both players' stats rows for a finished room. A failed
    /// upsert is logged; the turn has already committed.
    async fn record_stats(&self, room: &GameRoom) {
        let (Some(creator_id), Some(opponent_id)) = (room.creator_id, room.opponent_id) else {
            return;
        };

        if room.is_draw {
            for user_id in [creator_id, opponent_id] {
                self.upsert_stats(user_id, room.game_type, |stats| {
                    stats.draws += 1;
                    stats.total_games += 1;
                })
                .await;
            }
            return;
        }

        let Some(winner_id) = room.winner_id else {
            return;
        };
        let loser_id = if winner_id == creator_id {
            opponent_id
        } else {
            creator_id
        };
        let points = self.points.points_for(room.game_type);

        self.upsert_stats(winner_id, room.game_type, |stats| {
            stats.wins += 1;
            stats.total_games += 1;
            stats.points += points;
        })
        .await;
        self.upsert_stats(loser_id, room.game_type, |stats| {
            stats.losses += 1;
            stats.total_games += 1;
        })
        .await;
    }

    async fn upsert_stats<F: FnOnce(&mut GameStats)>(
        &self,
        user_id: UserId,
        game_type: GameType,
        apply: F,
    ) {
        let mut stats = match self.repo.get_stats(user_id, game_type).await {
            Ok(stats) => stats.unwrap_or_else(|| GameStats::zero(user_id, game_type)),
            Err(err) => {
                self.metrics.increment_persistence_errors();
                warn!(%user_id, game = %game_type, error = %err, "Failed to load stats");
                return;
            }
        };
        apply(&mut stats);
        if let Err(err) = self.repo.update_stats(stats).await {
            self.metrics.increment_persistence_errors();
            warn!(%user_id, game = %game_type, error = %err, "Failed to upsert stats");
        }
    }

    async fn publish_event(&self, room_id: RoomId, event: &GameEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%room_id, error = %err, "Failed to serialize game event for bus");
                return;
            }
        };
        if let Err(err) = self.notifier.publish_game_action(room_id, payload).await {
            warn!(%room_id, error = %err, "Failed to publish game event");
        }
    }

    /// Route game-channel bus deliveries into the local room fanout.
    pub async fn start_wiring(
        &self,
        notifier: &Notifier,
        token: CancellationToken,
    ) -> Result<()> {
        let hub = Weak::clone(&self.weak_self);
        notifier
            .start_game_subscriber(
                token,
                Arc::new(move |channel, payload| {
                    let Some(hub) = hub.upgrade() else {
                        return;
                    };
                    let Some(room_id) = channels::parse_game_channel(channel) else {
                        warn!(channel, "Unroutable game delivery discarded");
                        return;
                    };
                    hub.broadcast_raw(room_id, Bytes::copy_from_slice(payload.as_bytes()));
                }),
            )
            .await
    }

    /// Close every socket and clear membership.
    pub fn shutdown(&self) {
        let state = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *state)
        };
        for room in state.rooms.values() {
            for client in room.values() {
                client.try_send_json(&GameEvent::ServerShutdown);
                client.send_close(axum::extract::ws::close_code::AWAY, SHUTDOWN_REASON);
            }
        }
        info!(rooms = state.rooms.len(), hub = self.name(), "Hub shut down");
    }

    /// Test and introspection helpers.
    pub fn room_peer_count(&self, room_id: RoomId) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .rooms
            .get(&room_id)
            .map_or(0, HashMap::len)
    }

    pub fn tracked_room_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .rooms
            .len()
    }
}

fn actor_symbol(game_type: GameType, is_creator: bool) -> &'static str {
    match (game_type, is_creator) {
        (GameType::Checkers, true) => "r",
        (GameType::Checkers, false) => "b",
        (_, true) => "X",
        (_, false) => "O",
    }
}

fn user_for_symbol(room: &GameRoom, symbol: &str) -> Option<UserId> {
    match symbol {
        "X" | "r" => room.creator_id,
        "O" | "b" => room.opponent_id,
        _ => None,
    }
}

fn snapshot(room: &GameRoom) -> GameStatePayload {
    GameStatePayload {
        board: room.current_state.clone(),
        status: room.status,
        winner_id: room.winner_id,
        next_turn: room.next_turn_id,
        is_draw: room.is_draw,
    }
}

#[async_trait]
impl Hub for GameHub {
    fn name(&self) -> &'static str {
        "game"
    }

    fn unregister_client(&self, client: &Arc<Client>) {
        let user_id = client.user_id();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let Some(room_ids) = state.user_rooms.get(&user_id).cloned() else {
            return;
        };

        for room_id in room_ids {
            let Some(room) = state.rooms.get_mut(&room_id) else {
                continue;
            };
            // Identity check: a newer socket that replaced this one must
            // not be erased by the old pump's teardown.
            let is_same = room
                .get(&user_id)
                .is_some_and(|existing| Arc::ptr_eq(existing, client));
            if !is_same {
                continue;
            }
            room.remove(&user_id);
            if room.is_empty() {
                state.rooms.remove(&room_id);
            }
            if let Some(user_rooms) = state.user_rooms.get_mut(&user_id) {
                user_rooms.remove(&room_id);
                if user_rooms.is_empty() {
                    state.user_rooms.remove(&user_id);
                }
            }
            debug!(%user_id, %room_id, hub = self.name(), "Client unregistered");
        }
    }

    async fn handle_inbound(&self, client: &Arc<Client>, text: String) {
        let action: GameAction = match serde_json::from_str(&text) {
            Ok(action) => action,
            Err(err) => {
                debug!(user_id = %client.user_id(), error = %err, "Malformed game action ignored");
                return;
            }
        };

        self.handle_action(client.user_id(), action).await;
    }
}
