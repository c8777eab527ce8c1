//! Othello engine.
//!
//! State is the bare 8x8 board with `""`, `"X"` (creator), `"O"`. A legal
//! move brackets at least one opponent run; turn handling follows the
//! forced-pass rule.

use serde_json::Value;

use crate::protocol::OthelloMovePayload;

use super::{EngineOutcome, MoveError, TurnDirective};

pub const SIZE: usize = 8;

const DIRECTIONS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

type Board = Vec<Vec<String>>;

/// Standard opening: X at (3,4),(4,3), O at (3,3),(4,4).
pub fn initial_board() -> Value {
    let mut board = vec![vec![String::new(); SIZE]; SIZE];
    board[3][3] = "O".to_string();
    board[4][4] = "O".to_string();
    board[3][4] = "X".to_string();
    board[4][3] = "X".to_string();
    serde_json::json!(board)
}

fn opponent(symbol: &str) -> &'static str {
    if symbol == "X" {
        "O"
    } else {
        "X"
    }
}

pub(super) fn apply_move(state: &Value, payload: &Value, symbol: &str) -> Result<EngineOutcome, MoveError> {
    let mv: OthelloMovePayload = serde_json::from_value(payload.clone())
        .map_err(|_| MoveError::Payload("Invalid move payload".to_string()))?;
    let mut board: Board = serde_json::from_value(state.clone())
        .map_err(|_| MoveError::Payload("Corrupt board state".to_string()))?;

    let (row, col) = match (usize::try_from(mv.row), usize::try_from(mv.column)) {
        (Ok(row), Ok(col)) if row < SIZE && col < SIZE => (row, col),
        _ => return Err(MoveError::InvalidLocation),
    };

    let flips = captured_cells(&board, row, col, symbol);
    if !board[row][col].is_empty() || flips.is_empty() {
        return Err(MoveError::InvalidLocation);
    }

    board[row][col] = symbol.to_string();
    for (r, c) in flips {
        board[r][c] = symbol.to_string();
    }

    let opp = opponent(symbol);
    let opponent_can_move = has_any_move(&board, opp);
    let current_can_move = has_any_move(&board, symbol);

    if !opponent_can_move && !current_can_move {
        // Neither side can play: count pieces.
        let mine = count(&board, symbol);
        let theirs = count(&board, opp);
        let winner_symbol = match mine.cmp(&theirs) {
            std::cmp::Ordering::Greater => Some(symbol.to_string()),
            std::cmp::Ordering::Less => Some(opp.to_string()),
            std::cmp::Ordering::Equal => None,
        };
        return Ok(EngineOutcome {
            state: serde_json::json!(board),
            finished: true,
            winner_symbol,
            turn: TurnDirective::Switch,
        });
    }

    let turn = if opponent_can_move {
        TurnDirective::Switch
    } else {
        // Forced pass: opponent has nothing, mover goes again.
        TurnDirective::Retain
    };

    Ok(EngineOutcome {
        state: serde_json::json!(board),
        finished: false,
        winner_symbol: None,
        turn,
    })
}

/// Cells flipped by playing `symbol` at `(row, col)`. Empty when illegal.
fn captured_cells(board: &Board, row: usize, col: usize, symbol: &str) -> Vec<(usize, usize)> {
    if !board[row][col].is_empty() {
        return Vec::new();
    }
    let opp = opponent(symbol);
    let mut flips = Vec::new();

    for (dr, dc) in DIRECTIONS {
        let mut run = Vec::new();
        let mut r = row as isize + dr;
        let mut c = col as isize + dc;
        while (0..SIZE as isize).contains(&r) && (0..SIZE as isize).contains(&c) {
            let cell = &board[r as usize][c as usize];
            if cell == opp {
                run.push((r as usize, c as usize));
            } else if cell == symbol {
                // Bracketed: the whole run flips.
                flips.extend(run);
                break;
            } else {
                break;
            }
            r += dr;
            c += dc;
        }
    }
    flips
}

fn has_any_move(board: &Board, symbol: &str) -> bool {
    for row in 0..SIZE {
        for col in 0..SIZE {
            if board[row][col].is_empty() && !captured_cells(board, row, col, symbol).is_empty() {
                return true;
            }
        }
    }
    false
}

fn count(board: &Board, symbol: &str) -> usize {
    board
        .iter()
        .flat_map(|row| row.iter())
        .filter(|cell| *cell == symbol)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_from(state: &Value) -> Board {
        serde_json::from_value(state.clone()).unwrap()
    }

    fn mv(row: i64, column: i64) -> Value {
        serde_json::json!({ "row": row, "column": column })
    }

    #[test]
    fn initial_board_has_standard_opening() {
        let board = board_from(&initial_board());
        assert_eq!(board[3][4], "X");
        assert_eq!(board[4][3], "X");
        assert_eq!(board[3][3], "O");
        assert_eq!(board[4][4], "O");
        assert_eq!(count(&board, "X"), 2);
        assert_eq!(count(&board, "O"), 2);
    }

    #[test]
    fn opening_move_flips_bracketed_piece() {
        // X at (2,3) brackets the O at (3,3) against X at (4,3).
        let outcome = apply_move(&initial_board(), &mv(2, 3), "X").unwrap();
        let board = board_from(&outcome.state);
        assert_eq!(board[2][3], "X");
        assert_eq!(board[3][3], "X", "bracketed piece flipped");
        assert!(!outcome.finished);
        assert!(matches!(outcome.turn, TurnDirective::Switch));
    }

    #[test]
    fn non_capturing_placement_rejected() {
        assert_eq!(
            apply_move(&initial_board(), &mv(0, 0), "X").unwrap_err(),
            MoveError::InvalidLocation
        );
        // Occupied cell.
        assert_eq!(
            apply_move(&initial_board(), &mv(3, 3), "X").unwrap_err(),
            MoveError::InvalidLocation
        );
        // Out of bounds.
        assert_eq!(
            apply_move(&initial_board(), &mv(8, 0), "X").unwrap_err(),
            MoveError::InvalidLocation
        );
    }

    #[test]
    fn forced_pass_retains_turn() {
        // After X plays (0,0) and flips (0,1), O's only piece sits at
        // (7,6) shielded by the corner: O cannot bracket anything, while X
        // still has (7,5) capturing through (7,6) into the corner X.
        let mut board = vec![vec![String::new(); SIZE]; SIZE];
        board[0][1] = "O".to_string();
        board[0][2] = "X".to_string();
        board[7][6] = "O".to_string();
        board[7][7] = "X".to_string();
        let state = serde_json::json!(board);

        let outcome = apply_move(&state, &mv(0, 0), "X").unwrap();
        let board = board_from(&outcome.state);
        assert_eq!(board[0][1], "X");
        assert!(!outcome.finished);
        assert!(
            matches!(outcome.turn, TurnDirective::Retain),
            "opponent without moves is passed over"
        );
    }

    #[test]
    fn game_ends_when_neither_side_can_move() {
        // Single O left at (0,1); X at (0,2). X plays (0,0) and flips it:
        // the board is all-X in that corner, no O remains anywhere, and
        // neither side has a legal move.
        let mut board = vec![vec![String::new(); SIZE]; SIZE];
        board[0][1] = "O".to_string();
        board[0][2] = "X".to_string();
        let state = serde_json::json!(board);

        let outcome = apply_move(&state, &mv(0, 0), "X").unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.winner_symbol.as_deref(), Some("X"));
    }

    #[test]
    fn equal_counts_finish_as_draw() {
        // X plays (0,0) flipping (0,1): three X in the top corner, three O
        // pinned against the bottom edge that X cannot bracket. Neither
        // side has a move and the count is 3 to 3.
        let mut board = vec![vec![String::new(); SIZE]; SIZE];
        board[0][1] = "O".to_string();
        board[0][2] = "X".to_string();
        board[7][5] = "O".to_string();
        board[7][6] = "O".to_string();
        board[7][7] = "O".to_string();
        let state = serde_json::json!(board);

        let outcome = apply_move(&state, &mv(0, 0), "X").unwrap();
        let board = board_from(&outcome.state);
        assert_eq!(count(&board, "X"), 3);
        assert_eq!(count(&board, "O"), 3);
        assert!(outcome.finished);
        assert!(outcome.winner_symbol.is_none());
    }
}
