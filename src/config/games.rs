//! Game stat point values.

use super::defaults::{
    default_battleship_points, default_checkers_points, default_connect_four_points,
    default_othello_points,
};
use crate::protocol::GameType;
use serde::{Deserialize, Serialize};

/// Points awarded to the winner of a finished game, per game type.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct GamePointsConfig {
    #[serde(default = "default_connect_four_points")]
    pub connect_four: i64,
    #[serde(default = "default_othello_points")]
    pub othello: i64,
    #[serde(default = "default_checkers_points")]
    pub checkers: i64,
    #[serde(default = "default_battleship_points")]
    pub battleship: i64,
}

impl Default for GamePointsConfig {
    fn default() -> Self {
        Self {
            connect_four: default_connect_four_points(),
            othello: default_othello_points(),
            checkers: default_checkers_points(),
            battleship: default_battleship_points(),
        }
    }
}

impl GamePointsConfig {
    pub fn points_for(&self, game_type: GameType) -> i64 {
        match game_type {
            GameType::ConnectFour => self.connect_four,
            GameType::Othello => self.othello,
            GameType::Checkers => self.checkers,
            GameType::Battleship => self.battleship,
        }
    }
}
