//! Wire protocol definitions for the realtime fabrics.
//!
//! Everything that crosses a socket or the message bus is JSON text. The
//! envelope shapes here are the contract shared with the web and mobile
//! clients, so field names are load-bearing.

pub mod chat;
pub mod game;
pub mod types;
pub mod video;

pub use chat::{ChatMessage, ConnectedUsersPayload, UserStatusPayload};

pub use game::{
    BattleshipMovePayload, CheckersMovePayload, ConnectFourMovePayload, ErrorPayload, GameAction,
    GameChatPayload, GameEvent, GameStatePayload, OthelloMovePayload, PlaceShipsPayload, Ship,
};

pub use types::{ConversationId, GameStatus, GameType, RoomId, UserId};

pub use video::{RoomUsersPayload, VideoChatEvent};
