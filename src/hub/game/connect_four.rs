//! Connect Four engine.
//!
//! State is the bare board: 6 rows of 7 cells, `""`, `"X"` (creator), or
//! `"O"`. Row 0 is the top; pieces stack from row 5 upward.

use serde_json::Value;

use crate::protocol::ConnectFourMovePayload;

use super::{EngineOutcome, MoveError, TurnDirective};

pub const ROWS: usize = 6;
pub const COLS: usize = 7;

type Board = Vec<Vec<String>>;

pub fn initial_board() -> Value {
    serde_json::json!(vec![vec![String::new(); COLS]; ROWS])
}

pub(super) fn apply_move(state: &Value, payload: &Value, symbol: &str) -> Result<EngineOutcome, MoveError> {
    let mv: ConnectFourMovePayload = serde_json::from_value(payload.clone())
        .map_err(|_| MoveError::Payload("Invalid move payload".to_string()))?;
    let mut board: Board = serde_json::from_value(state.clone())
        .map_err(|_| MoveError::Payload("Corrupt board state".to_string()))?;

    let col = usize::try_from(mv.column).map_err(|_| MoveError::ColumnFull)?;
    if col >= COLS || board.len() != ROWS || !board[0].get(col).is_some_and(String::is_empty) {
        return Err(MoveError::ColumnFull);
    }

    // Drop into the lowest empty cell of the column.
    for row in (0..ROWS).rev() {
        if board[row][col].is_empty() {
            board[row][col] = symbol.to_string();
            break;
        }
    }

    let won = check_win(&board, symbol);
    let draw = !won && board[0].iter().all(|cell| !cell.is_empty());

    Ok(EngineOutcome {
        state: serde_json::json!(board),
        finished: won || draw,
        winner_symbol: won.then(|| symbol.to_string()),
        turn: TurnDirective::Switch,
    })
}

/// Four in a row horizontally, vertically, or on either diagonal.
fn check_win(board: &Board, symbol: &str) -> bool {
    let at = |r: isize, c: isize| -> bool {
        r >= 0
            && c >= 0
            && (r as usize) < ROWS
            && (c as usize) < COLS
            && board[r as usize][c as usize] == symbol
    };

    for r in 0..ROWS as isize {
        for c in 0..COLS as isize {
            if !at(r, c) {
                continue;
            }
            for (dr, dc) in [(0, 1), (1, 0), (1, 1), (1, -1)] {
                if (1..4).all(|step| at(r + dr * step, c + dc * step)) {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_from(state: &Value) -> Board {
        serde_json::from_value(state.clone()).unwrap()
    }

    fn mv(column: i64) -> Value {
        serde_json::json!({ "column": column })
    }

    #[test]
    fn pieces_stack_from_bottom() {
        let state = initial_board();
        let first = apply_move(&state, &mv(3), "X").unwrap();
        let board = board_from(&first.state);
        assert_eq!(board[5][3], "X");

        let second = apply_move(&first.state, &mv(3), "O").unwrap();
        let board = board_from(&second.state);
        assert_eq!(board[4][3], "O");
        assert!(!second.finished);
    }

    #[test]
    fn full_column_rejected() {
        let mut state = initial_board();
        for i in 0..ROWS {
            let symbol = if i % 2 == 0 { "X" } else { "O" };
            state = apply_move(&state, &mv(0), symbol).unwrap().state;
        }
        assert_eq!(
            apply_move(&state, &mv(0), "X").unwrap_err(),
            MoveError::ColumnFull
        );
    }

    #[test]
    fn malformed_payload_rejected() {
        let state = initial_board();
        let err = apply_move(&state, &serde_json::json!({"row": 1}), "X").unwrap_err();
        assert_eq!(err, MoveError::Payload("Invalid move payload".to_string()));
    }

    #[test]
    fn out_of_range_column_rejected() {
        let state = initial_board();
        assert_eq!(
            apply_move(&state, &mv(7), "X").unwrap_err(),
            MoveError::ColumnFull
        );
        assert_eq!(
            apply_move(&state, &mv(-1), "X").unwrap_err(),
            MoveError::ColumnFull
        );
    }

    #[test]
    fn horizontal_win_on_bottom_row() {
        let mut state = initial_board();
        // X: 0,1,2 with O answering in 4,5; X completes at 3.
        for (col, symbol) in [(0, "X"), (4, "O"), (1, "X"), (5, "O"), (2, "X"), (4, "O")] {
            let outcome = apply_move(&state, &mv(col), symbol).unwrap();
            assert!(!outcome.finished);
            state = outcome.state;
        }
        let outcome = apply_move(&state, &mv(3), "X").unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.winner_symbol.as_deref(), Some("X"));
    }

    #[test]
    fn vertical_and_diagonal_wins_detected() {
        // Vertical
        let mut state = initial_board();
        for _ in 0..3 {
            state = apply_move(&state, &mv(2), "X").unwrap().state;
            state = apply_move(&state, &mv(3), "O").unwrap().state;
        }
        let outcome = apply_move(&state, &mv(2), "X").unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.winner_symbol.as_deref(), Some("X"));

        // Rising diagonal built by hand.
        let mut board: Board = vec![vec![String::new(); COLS]; ROWS];
        board[5][1] = "O".to_string();
        board[5][2] = "X".to_string();
        board[4][2] = "O".to_string();
        board[5][3] = "X".to_string();
        board[4][3] = "X".to_string();
        board[3][3] = "O".to_string();
        let state = serde_json::json!(board);
        // O at (5,0) does not win; O needs (2,3) on top of the stack at col 3?
        // Build instead the capped diagonal: O at (5,1),(4,2),(3,3) then drop at col 4 thrice.
        let mut state = state;
        state = apply_move(&state, &mv(4), "X").unwrap().state; // (5,4)
        state = apply_move(&state, &mv(4), "X").unwrap().state; // (4,4)
        state = apply_move(&state, &mv(4), "X").unwrap().state; // (3,4)
        let outcome = apply_move(&state, &mv(4), "O").unwrap(); // (2,4) completes (5,1)-(4,2)-(3,3)-(2,4)
        assert!(outcome.finished, "diagonal win not detected");
        assert_eq!(outcome.winner_symbol.as_deref(), Some("O"));
    }

    #[test]
    fn full_top_row_without_winner_is_draw() {
        // Construct a full board with no four in a row, leaving one slot in
        // the top row, then fill it.
        let columns = [
            ["X", "X", "O", "O", "X", "X"],
            ["O", "O", "X", "X", "O", "O"],
            ["X", "X", "O", "O", "X", "X"],
            ["O", "O", "X", "X", "O", "O"],
            ["X", "X", "O", "O", "X", "X"],
            ["O", "O", "X", "X", "O", "O"],
            ["X", "X", "O", "O", "X", ""],
        ];
        let mut board: Board = vec![vec![String::new(); COLS]; ROWS];
        for (col, stack) in columns.iter().enumerate() {
            for (height, symbol) in stack.iter().enumerate() {
                board[ROWS - 1 - height][col] = (*symbol).to_string();
            }
        }
        let state = serde_json::json!(board);
        let outcome = apply_move(&state, &mv(6), "O").unwrap();
        assert!(outcome.finished);
        assert!(outcome.winner_symbol.is_none(), "draw has no winner");
    }
}
