//! Game fabric envelopes and per-game move payloads.

use serde::{Deserialize, Serialize};

use super::types::{GameStatus, RoomId, UserId};

/// Inbound action envelope on a game socket.
///
/// Unknown `type` values deserialize to [`GameAction::Unknown`] so the hub
/// can log and ignore them instead of dropping the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameAction {
    JoinRoom {
        room_id: RoomId,
    },
    MakeMove {
        room_id: RoomId,
        #[serde(default)]
        payload: serde_json::Value,
    },
    PlaceShips {
        room_id: RoomId,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Chat {
        room_id: RoomId,
        #[serde(default)]
        payload: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

impl GameAction {
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            GameAction::JoinRoom { room_id }
            | GameAction::MakeMove { room_id, .. }
            | GameAction::PlaceShips { room_id, .. }
            | GameAction::Chat { room_id, .. } => Some(*room_id),
            GameAction::Unknown => None,
        }
    }
}

/// Outbound event envelope on the game fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    GameState {
        room_id: RoomId,
        payload: GameStatePayload,
    },
    GameStarted {
        room_id: RoomId,
        payload: GameStatePayload,
    },
    GameCancelled {
        room_id: RoomId,
    },
    Chat {
        room_id: RoomId,
        user_id: UserId,
        payload: serde_json::Value,
    },
    Error {
        room_id: RoomId,
        payload: ErrorPayload,
    },
    ServerShutdown,
}

/// Snapshot payload carried by every `game_state` and `game_started` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStatePayload {
    pub board: serde_json::Value,
    pub status: GameStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<UserId>,
    pub next_turn: Option<UserId>,
    pub is_draw: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Connect Four move: drop into a column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectFourMovePayload {
    pub column: i64,
}

/// Othello move: place at a board coordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OthelloMovePayload {
    pub row: i64,
    pub column: i64,
}

/// Battleship shot during the battle phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleshipMovePayload {
    pub row: i64,
    pub col: i64,
}

/// Battleship fleet placement during setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceShipsPayload {
    pub ships: Vec<Ship>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ship {
    pub name: String,
    pub size: i64,
    pub row: i64,
    pub col: i64,
    pub horizontal: bool,
}

/// Checkers move: `from`/`to` as `[row, col]` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckersMovePayload {
    pub from: [i64; 2],
    pub to: [i64; 2],
}

/// Chat body relayed inside a game room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameChatPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_move_action_parses() {
        let action: GameAction =
            serde_json::from_str(r#"{"type":"make_move","room_id":9,"payload":{"column":3}}"#)
                .unwrap();
        match action {
            GameAction::MakeMove { room_id, payload } => {
                assert_eq!(room_id, RoomId(9));
                assert_eq!(payload["column"], 3);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_type_is_tolerated() {
        let action: GameAction =
            serde_json::from_str(r#"{"type":"dance","room_id":1,"payload":{}}"#).unwrap();
        assert!(matches!(action, GameAction::Unknown));
        assert_eq!(action.room_id(), None);
    }

    #[test]
    fn game_state_event_wire_shape() {
        let event = GameEvent::GameState {
            room_id: RoomId(4),
            payload: GameStatePayload {
                board: serde_json::json!([["", ""]]),
                status: GameStatus::Active,
                winner_id: None,
                next_turn: Some(UserId(2)),
                is_draw: false,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "game_state");
        assert_eq!(value["room_id"], 4);
        assert_eq!(value["payload"]["next_turn"], 2);
        assert_eq!(value["payload"]["is_draw"], false);
        assert!(value["payload"].get("winner_id").is_none());
    }

    #[test]
    fn checkers_payload_parses_coordinate_pairs() {
        let payload: CheckersMovePayload =
            serde_json::from_str(r#"{"from":[2,1],"to":[0,3]}"#).unwrap();
        assert_eq!(payload.from, [2, 1]);
        assert_eq!(payload.to, [0, 3]);
    }
}
