//! Battleship engine.
//!
//! Two sub-protocols on one room: fleet placement while `phase == "setup"`,
//! shots while `phase == "battle"`. The battle starts once both players
//! have readied a valid fleet.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::protocol::{BattleshipMovePayload, Ship};

use super::{EngineOutcome, MoveError, TurnDirective};

pub const BOARD_SIZE: i64 = 10;

pub const PHASE_SETUP: &str = "setup";
pub const PHASE_BATTLE: &str = "battle";

/// Expected fleet: `(name, size)` pairs, all required exactly once.
const FLEET: [(&str, i64); 5] = [
    ("Carrier", 5),
    ("Battleship", 4),
    ("Cruiser", 3),
    ("Submarine", 3),
    ("Destroyer", 2),
];

/// Persisted room state for a battleship game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleshipState {
    pub phase: String,
    pub creator_ready: bool,
    pub opponent_ready: bool,
    #[serde(default)]
    pub creator_ships: Vec<Ship>,
    #[serde(default)]
    pub opponent_ships: Vec<Ship>,
    #[serde(default)]
    pub creator_shots: Vec<[i64; 2]>,
    #[serde(default)]
    pub opponent_shots: Vec<[i64; 2]>,
}

impl BattleshipState {
    fn decode(state: &Value) -> Result<Self, MoveError> {
        serde_json::from_value(state.clone())
            .map_err(|_| MoveError::Payload("Corrupt battleship state".to_string()))
    }
}

/// Fresh setup state: both players placing, nobody ready.
pub fn initial_state() -> Value {
    serde_json::json!(BattleshipState {
        phase: PHASE_SETUP.to_string(),
        creator_ready: false,
        opponent_ready: false,
        creator_ships: Vec::new(),
        opponent_ships: Vec::new(),
        creator_shots: Vec::new(),
        opponent_shots: Vec::new(),
    })
}

/// Every cell a ship occupies, in board order.
fn ship_cells(ship: &Ship) -> Vec<(i64, i64)> {
    (0..ship.size)
        .map(|offset| {
            if ship.horizontal {
                (ship.row, ship.col + offset)
            } else {
                (ship.row + offset, ship.col)
            }
        })
        .collect()
}

/// Exactly the five standard ships, sizes matching names, all cells on the
/// board, no overlaps, no duplicate names.
pub(super) fn validate_fleet(ships: &[Ship]) -> Result<(), MoveError> {
    if ships.len() != FLEET.len() {
        return Err(MoveError::Payload(format!(
            "Fleet must contain exactly {} ships",
            FLEET.len()
        )));
    }

    let mut seen_names = HashSet::new();
    let mut occupied = HashSet::new();

    for ship in ships {
        let Some((_, expected_size)) = FLEET.iter().find(|(name, _)| *name == ship.name) else {
            return Err(MoveError::Payload(format!("Unknown ship: {}", ship.name)));
        };
        if ship.size != *expected_size {
            return Err(MoveError::Payload(format!(
                "{} must have size {expected_size}",
                ship.name
            )));
        }
        if !seen_names.insert(ship.name.clone()) {
            return Err(MoveError::Payload(format!("Duplicate ship: {}", ship.name)));
        }
        for (row, col) in ship_cells(ship) {
            if !(0..BOARD_SIZE).contains(&row) || !(0..BOARD_SIZE).contains(&col) {
                return Err(MoveError::Payload(format!(
                    "{} extends off the board",
                    ship.name
                )));
            }
            if !occupied.insert((row, col)) {
                return Err(MoveError::Payload("Ships overlap".to_string()));
            }
        }
    }
    Ok(())
}

/// Write the actor's fleet and ready flag; returns the new state and
/// whether the battle phase just began.
pub(super) fn place_ships(
    state: &Value,
    ships: Vec<Ship>,
    is_creator: bool,
) -> Result<(Value, bool), MoveError> {
    let mut decoded = BattleshipState::decode(state)?;
    if decoded.phase != PHASE_SETUP {
        return Err(MoveError::Payload("Ships are already placed".to_string()));
    }

    validate_fleet(&ships)?;

    let already_ready = if is_creator {
        decoded.creator_ready
    } else {
        decoded.opponent_ready
    };
    if already_ready {
        return Err(MoveError::Payload("Ships already placed".to_string()));
    }

    if is_creator {
        decoded.creator_ships = ships;
        decoded.creator_ready = true;
    } else {
        decoded.opponent_ships = ships;
        decoded.opponent_ready = true;
    }

    let battle_begins = decoded.creator_ready && decoded.opponent_ready;
    if battle_begins {
        decoded.phase = PHASE_BATTLE.to_string();
    }

    Ok((serde_json::json!(decoded), battle_begins))
}

/// A shot during the battle phase. The actor wins once every cell of every
/// opposing ship has been hit; battleship has no draw.
pub(super) fn fire(
    state: &Value,
    payload: &Value,
    is_creator: bool,
    symbol: &str,
) -> Result<EngineOutcome, MoveError> {
    let shot: BattleshipMovePayload = serde_json::from_value(payload.clone())
        .map_err(|_| MoveError::Payload("Invalid move payload".to_string()))?;
    let mut decoded = BattleshipState::decode(state)?;

    if decoded.phase != PHASE_BATTLE {
        return Err(MoveError::Payload(
            "Game is still in setup phase".to_string(),
        ));
    }
    if !(0..BOARD_SIZE).contains(&shot.row) || !(0..BOARD_SIZE).contains(&shot.col) {
        return Err(MoveError::ShotOutOfBounds);
    }

    let cell = [shot.row, shot.col];
    let shots = if is_creator {
        &mut decoded.creator_shots
    } else {
        &mut decoded.opponent_shots
    };
    if shots.contains(&cell) {
        return Err(MoveError::DuplicateShot);
    }
    shots.push(cell);

    let shots: HashSet<[i64; 2]> = if is_creator {
        decoded.creator_shots.iter().copied().collect()
    } else {
        decoded.opponent_shots.iter().copied().collect()
    };
    let targets = if is_creator {
        &decoded.opponent_ships
    } else {
        &decoded.creator_ships
    };
    let all_sunk = targets
        .iter()
        .flat_map(ship_cells)
        .all(|(row, col)| shots.contains(&[row, col]));

    Ok(EngineOutcome {
        state: serde_json::json!(decoded),
        finished: all_sunk,
        winner_symbol: all_sunk.then(|| symbol.to_string()),
        turn: TurnDirective::Switch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ship(name: &str, size: i64, row: i64, col: i64, horizontal: bool) -> Ship {
        Ship {
            name: name.to_string(),
            size,
            row,
            col,
            horizontal,
        }
    }

    fn valid_fleet() -> Vec<Ship> {
        vec![
            ship("Carrier", 5, 0, 0, true),
            ship("Battleship", 4, 1, 0, true),
            ship("Cruiser", 3, 2, 0, true),
            ship("Submarine", 3, 3, 0, true),
            ship("Destroyer", 2, 4, 0, true),
        ]
    }

    #[test]
    fn valid_fleet_accepted() {
        validate_fleet(&valid_fleet()).unwrap();
    }

    #[test]
    fn fleet_rejections() {
        // Wrong count.
        assert!(validate_fleet(&valid_fleet()[..4]).is_err());

        // Size mismatch.
        let mut fleet = valid_fleet();
        fleet[4].size = 3;
        assert!(validate_fleet(&fleet).is_err());

        // Off the board.
        let mut fleet = valid_fleet();
        fleet[0].col = 6; // Carrier of 5 from col 6 ends at 10
        assert!(validate_fleet(&fleet).is_err());

        // Overlap.
        let mut fleet = valid_fleet();
        fleet[1].row = 0; // collides with the carrier
        assert!(validate_fleet(&fleet).is_err());

        // Duplicate name.
        let mut fleet = valid_fleet();
        fleet[4] = ship("Carrier", 5, 5, 0, true);
        assert!(validate_fleet(&fleet).is_err());

        // Unknown name.
        let mut fleet = valid_fleet();
        fleet[4].name = "Dinghy".to_string();
        assert!(validate_fleet(&fleet).is_err());
    }

    #[test]
    fn vertical_ships_validate_and_sink() {
        let fleet = vec![
            ship("Carrier", 5, 0, 0, false),
            ship("Battleship", 4, 0, 2, false),
            ship("Cruiser", 3, 0, 4, false),
            ship("Submarine", 3, 0, 6, false),
            ship("Destroyer", 2, 0, 8, false),
        ];
        validate_fleet(&fleet).unwrap();

        // A vertical carrier from row 6 runs off the bottom edge.
        let mut bad = fleet.clone();
        bad[0].row = 6;
        assert!(validate_fleet(&bad).is_err());
    }

    #[test]
    fn both_ready_starts_battle() {
        let state = initial_state();
        let (state, begun) = place_ships(&state, valid_fleet(), true).unwrap();
        assert!(!begun);

        // Creator cannot ready twice.
        assert!(place_ships(&state, valid_fleet(), true).is_err());

        let (state, begun) = place_ships(&state, valid_fleet(), false).unwrap();
        assert!(begun);
        let decoded = BattleshipState::decode(&state).unwrap();
        assert_eq!(decoded.phase, PHASE_BATTLE);
    }

    fn battle_state() -> Value {
        let (state, _) = place_ships(&initial_state(), valid_fleet(), true).unwrap();
        let (state, _) = place_ships(&state, valid_fleet(), false).unwrap();
        state
    }

    #[test]
    fn shots_validated_and_recorded() {
        let state = battle_state();
        assert_eq!(
            fire(&state, &serde_json::json!({"row": -1, "col": 0}), true, "X").unwrap_err(),
            MoveError::ShotOutOfBounds
        );
        assert_eq!(
            fire(&state, &serde_json::json!({"row": 0, "col": 10}), true, "X").unwrap_err(),
            MoveError::ShotOutOfBounds
        );

        let outcome = fire(&state, &serde_json::json!({"row": 0, "col": 0}), true, "X").unwrap();
        assert!(!outcome.finished);
        let decoded = BattleshipState::decode(&outcome.state).unwrap();
        assert_eq!(decoded.creator_shots, vec![[0, 0]]);

        assert_eq!(
            fire(
                &outcome.state,
                &serde_json::json!({"row": 0, "col": 0}),
                true,
                "X"
            )
            .unwrap_err(),
            MoveError::DuplicateShot
        );

        // The same cell is fresh for the other player.
        fire(
            &outcome.state,
            &serde_json::json!({"row": 0, "col": 0}),
            false,
            "O",
        )
        .unwrap();
    }

    #[test]
    fn shooting_before_battle_rejected() {
        let (state, _) = place_ships(&initial_state(), valid_fleet(), true).unwrap();
        assert!(fire(&state, &serde_json::json!({"row": 0, "col": 0}), true, "X").is_err());
    }

    #[test]
    fn sinking_the_whole_fleet_wins() {
        // Reduce the opponent's fleet to a lone destroyer at (0,0)-(0,1).
        let mut decoded = BattleshipState::decode(&battle_state()).unwrap();
        decoded.opponent_ships = vec![ship("Destroyer", 2, 0, 0, true)];
        decoded.creator_shots = vec![[0, 0]];
        let state = serde_json::json!(decoded);

        let outcome = fire(&state, &serde_json::json!({"row": 0, "col": 1}), true, "X").unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.winner_symbol.as_deref(), Some("X"));
    }
}
