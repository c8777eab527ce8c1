//! Checkers engine (American rules).
//!
//! Creator is red (`"r"`, king `"R"`) moving toward row 0; opponent is
//! black (`"b"`, king `"B"`) moving toward row 7. Captures are mandatory,
//! multi-jumps are locked in via `must_jump_from`, and kinging ends the
//! turn even when the fresh king could jump on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::CheckersMovePayload;

use super::{EngineOutcome, MoveError, TurnDirective};

pub const SIZE: i64 = 8;

type Board = Vec<Vec<String>>;

/// Persisted room state for a checkers game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckersState {
    pub board: Board,
    #[serde(default)]
    pub must_jump_from: Option<[i64; 2]>,
}

impl CheckersState {
    fn decode(state: &Value) -> Result<Self, MoveError> {
        serde_json::from_value(state.clone())
            .map_err(|_| MoveError::Payload("Corrupt checkers state".to_string()))
    }
}

/// Standard opening: black on the dark squares of rows 0-2, red on rows 5-7.
pub fn initial_state() -> Value {
    let mut board = vec![vec![String::new(); SIZE as usize]; SIZE as usize];
    for (row, line) in board.iter_mut().enumerate() {
        for (col, cell) in line.iter_mut().enumerate() {
            if (row + col) % 2 != 1 {
                continue;
            }
            if row < 3 {
                *cell = "b".to_string();
            } else if row > 4 {
                *cell = "r".to_string();
            }
        }
    }
    serde_json::json!(CheckersState {
        board,
        must_jump_from: None,
    })
}

fn on_board(row: i64, col: i64) -> bool {
    (0..SIZE).contains(&row) && (0..SIZE).contains(&col)
}

fn piece_at(board: &Board, row: i64, col: i64) -> &str {
    &board[row as usize][col as usize]
}

/// The side a piece belongs to: `'r'` or `'b'`.
fn side_of(piece: &str) -> Option<char> {
    match piece {
        "r" | "R" => Some('r'),
        "b" | "B" => Some('b'),
        _ => None,
    }
}

fn is_king(piece: &str) -> bool {
    piece == "R" || piece == "B"
}

/// Row direction a non-king may move in: red climbs, black descends.
fn forward(side: char) -> i64 {
    if side == 'r' {
        -1
    } else {
        1
    }
}

/// Row that promotes the side's men.
fn crowning_row(side: char) -> i64 {
    if side == 'r' {
        0
    } else {
        SIZE - 1
    }
}

fn row_directions(piece: &str) -> Vec<i64> {
    let Some(side) = side_of(piece) else {
        return Vec::new();
    };
    if is_king(piece) {
        vec![-1, 1]
    } else {
        vec![forward(side)]
    }
}

/// Whether the piece at `(row, col)` has any jump available.
fn has_jump_from(board: &Board, row: i64, col: i64) -> bool {
    let piece = piece_at(board, row, col).to_string();
    let Some(side) = side_of(&piece) else {
        return false;
    };
    for dr in row_directions(&piece) {
        for dc in [-1, 1] {
            let (mid_r, mid_c) = (row + dr, col + dc);
            let (to_r, to_c) = (row + dr * 2, col + dc * 2);
            if !on_board(to_r, to_c) {
                continue;
            }
            let mid = piece_at(board, mid_r, mid_c);
            if side_of(mid).is_some_and(|mid_side| mid_side != side)
                && piece_at(board, to_r, to_c).is_empty()
            {
                return true;
            }
        }
    }
    false
}

/// Whether any piece of `side` has a jump available.
fn side_has_jump(board: &Board, side: char) -> bool {
    for row in 0..SIZE {
        for col in 0..SIZE {
            if side_of(piece_at(board, row, col)) == Some(side) && has_jump_from(board, row, col) {
                return true;
            }
        }
    }
    false
}

/// Whether any piece of `side` has any legal move at all.
fn side_has_any_move(board: &Board, side: char) -> bool {
    for row in 0..SIZE {
        for col in 0..SIZE {
            let piece = piece_at(board, row, col);
            if side_of(piece) != Some(side) {
                continue;
            }
            if has_jump_from(board, row, col) {
                return true;
            }
            for dr in row_directions(piece) {
                for dc in [-1, 1] {
                    let (to_r, to_c) = (row + dr, col + dc);
                    if on_board(to_r, to_c) && piece_at(board, to_r, to_c).is_empty() {
                        return true;
                    }
                }
            }
        }
    }
    false
}

fn side_has_pieces(board: &Board, side: char) -> bool {
    board
        .iter()
        .flat_map(|row| row.iter())
        .any(|cell| side_of(cell) == Some(side))
}

pub(super) fn apply_move(state: &Value, payload: &Value, symbol: &str) -> Result<EngineOutcome, MoveError> {
    let mv: CheckersMovePayload = serde_json::from_value(payload.clone())
        .map_err(|_| MoveError::Payload("Invalid move payload".to_string()))?;
    let mut decoded = CheckersState::decode(state)?;

    let actor_side = if symbol == "r" { 'r' } else { 'b' };
    let [from_row, from_col] = mv.from;
    let [to_row, to_col] = mv.to;

    if !on_board(from_row, from_col) || !on_board(to_row, to_col) {
        return Err(MoveError::InvalidMove);
    }

    let piece = piece_at(&decoded.board, from_row, from_col).to_string();
    if side_of(&piece) != Some(actor_side) {
        return Err(MoveError::NotYourPiece);
    }
    if !piece_at(&decoded.board, to_row, to_col).is_empty() {
        return Err(MoveError::InvalidMove);
    }

    let dr = to_row - from_row;
    let dc = to_col - from_col;

    // A pending multi-jump locks the moving piece.
    if let Some(lock) = decoded.must_jump_from {
        if lock != mv.from {
            return Err(MoveError::MustContinueJump);
        }
    }

    let (captured, kinged) = if dr.abs() == 1 && dc.abs() == 1 {
        // Simple step: forbidden while any capture is available.
        if side_has_jump(&decoded.board, actor_side) {
            return Err(MoveError::MustCapture);
        }
        if !row_directions(&piece).contains(&dr) {
            return Err(MoveError::InvalidMove);
        }
        let kinged = !is_king(&piece) && to_row == crowning_row(actor_side);
        (None, kinged)
    } else if dr.abs() == 2 && dc.abs() == 2 {
        if !row_directions(&piece).contains(&(dr / 2)) {
            return Err(MoveError::InvalidMove);
        }
        let (mid_row, mid_col) = (from_row + dr / 2, from_col + dc / 2);
        let mid = piece_at(&decoded.board, mid_row, mid_col);
        if !side_of(mid).is_some_and(|mid_side| mid_side != actor_side) {
            return Err(MoveError::InvalidMove);
        }
        let kinged = !is_king(&piece) && to_row == crowning_row(actor_side);
        (Some((mid_row, mid_col)), kinged)
    } else {
        return Err(MoveError::InvalidMove);
    };

    // Apply.
    decoded.board[from_row as usize][from_col as usize] = String::new();
    let placed = if kinged {
        piece.to_uppercase()
    } else {
        piece.clone()
    };
    decoded.board[to_row as usize][to_col as usize] = placed;
    if let Some((mid_row, mid_col)) = captured {
        decoded.board[mid_row as usize][mid_col as usize] = String::new();
    }

    // Multi-jump continuation. Kinging ends the turn unconditionally.
    let continue_jumping = captured.is_some()
        && !kinged
        && has_jump_from(&decoded.board, to_row, to_col);
    decoded.must_jump_from = continue_jumping.then_some([to_row, to_col]);

    let opponent_side = if actor_side == 'r' { 'b' } else { 'r' };
    let switching = !continue_jumping;
    let opponent_lost = !side_has_pieces(&decoded.board, opponent_side)
        || (switching && !side_has_any_move(&decoded.board, opponent_side));

    Ok(EngineOutcome {
        state: serde_json::json!(decoded),
        finished: opponent_lost,
        winner_symbol: opponent_lost.then(|| symbol.to_string()),
        turn: if switching {
            TurnDirective::Switch
        } else {
            TurnDirective::Retain
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_board() -> Board {
        vec![vec![String::new(); SIZE as usize]; SIZE as usize]
    }

    fn state_with(board: Board, must_jump_from: Option<[i64; 2]>) -> Value {
        serde_json::json!(CheckersState {
            board,
            must_jump_from
        })
    }

    fn mv(from: [i64; 2], to: [i64; 2]) -> Value {
        serde_json::json!({ "from": from, "to": to })
    }

    fn decode(state: &Value) -> CheckersState {
        CheckersState::decode(state).unwrap()
    }

    #[test]
    fn initial_layout_places_pieces_on_dark_squares() {
        let state = decode(&initial_state());
        assert_eq!(state.board[0][1], "b");
        assert_eq!(state.board[2][7], "b");
        assert_eq!(state.board[5][0], "r");
        assert_eq!(state.board[7][6], "r");
        assert_eq!(state.board[3][0], "");
        assert_eq!(state.board[0][0], "");
        assert!(state.must_jump_from.is_none());
    }

    #[test]
    fn red_steps_toward_row_zero_only() {
        let mut board = empty_board();
        board[4][3] = "r".to_string();
        // An extra black piece far away so the game does not end.
        board[0][1] = "b".to_string();
        let state = state_with(board, None);

        let outcome = apply_move(&state, &mv([4, 3], [3, 2]), "r").unwrap();
        assert_eq!(decode(&outcome.state).board[3][2], "r");
        assert!(!outcome.finished);

        // Backwards step rejected for a man.
        let state = state_with(decode(&outcome.state).board, None);
        assert_eq!(
            apply_move(&state, &mv([3, 2], [4, 3]), "r").unwrap_err(),
            MoveError::InvalidMove
        );
    }

    #[test]
    fn cannot_move_opponent_piece() {
        let state = initial_state();
        assert_eq!(
            apply_move(&state, &mv([2, 1], [3, 2]), "r").unwrap_err(),
            MoveError::NotYourPiece
        );
    }

    #[test]
    fn capture_is_mandatory() {
        let mut board = empty_board();
        board[4][3] = "r".to_string();
        board[3][4] = "b".to_string(); // jumpable: (4,3) -> (2,5)
        board[6][1] = "r".to_string(); // a piece that could otherwise step
        let state = state_with(board, None);

        assert_eq!(
            apply_move(&state, &mv([6, 1], [5, 0]), "r").unwrap_err(),
            MoveError::MustCapture
        );

        let outcome = apply_move(&state, &mv([4, 3], [2, 5]), "r").unwrap();
        let decoded = decode(&outcome.state);
        assert_eq!(decoded.board[2][5], "r");
        assert_eq!(decoded.board[3][4], "", "captured piece removed");
    }

    #[test]
    fn multi_jump_locks_the_piece_and_retains_turn() {
        let mut board = empty_board();
        board[6][1] = "r".to_string();
        board[5][2] = "b".to_string(); // first jump to (4,3)
        board[3][4] = "b".to_string(); // second jump to (2,5)
        board[0][7] = "b".to_string(); // spare piece so the game continues
        let state = state_with(board, None);

        let outcome = apply_move(&state, &mv([6, 1], [4, 3]), "r").unwrap();
        let decoded = decode(&outcome.state);
        assert_eq!(decoded.must_jump_from, Some([4, 3]));
        assert!(matches!(outcome.turn, TurnDirective::Retain));
        assert!(!outcome.finished);

        // While locked, another piece cannot move...
        let locked = serde_json::json!(decoded);
        let mut with_extra = decode(&locked);
        with_extra.board[7][6] = "r".to_string();
        let locked = serde_json::json!(with_extra);
        assert_eq!(
            apply_move(&locked, &mv([7, 6], [6, 5]), "r").unwrap_err(),
            MoveError::MustContinueJump
        );

        // ...and the locked piece must jump, not step.
        assert_eq!(
            apply_move(&locked, &mv([4, 3], [3, 2]), "r").unwrap_err(),
            MoveError::MustCapture
        );

        // Completing the second jump clears the lock and switches the turn.
        let outcome = apply_move(&locked, &mv([4, 3], [2, 5]), "r").unwrap();
        let decoded = decode(&outcome.state);
        assert!(decoded.must_jump_from.is_none());
        assert!(matches!(outcome.turn, TurnDirective::Switch));
    }

    #[test]
    fn kinging_terminates_multi_jump() {
        // Creator piece at (2,1), opponent at (1,2); the jump lands on the
        // kinging square (0,3). A further jump would exist via (1,4) onto
        // (2,5), but kinging ends the turn.
        let mut board = empty_board();
        board[2][1] = "r".to_string();
        board[1][2] = "b".to_string();
        board[1][4] = "b".to_string();
        let state = state_with(board, None);

        let outcome = apply_move(&state, &mv([2, 1], [0, 3]), "r").unwrap();
        let decoded = decode(&outcome.state);
        assert_eq!(decoded.board[0][3], "R", "piece promoted");
        assert_eq!(decoded.board[1][2], "", "jumped piece removed");
        assert!(decoded.must_jump_from.is_none());
        assert!(matches!(outcome.turn, TurnDirective::Switch));
        assert!(!outcome.finished, "black still has material and moves");
    }

    #[test]
    fn kings_move_both_directions() {
        let mut board = empty_board();
        board[3][2] = "R".to_string();
        board[0][7] = "b".to_string();
        let state = state_with(board, None);

        let outcome = apply_move(&state, &mv([3, 2], [4, 3]), "r").unwrap();
        assert_eq!(decode(&outcome.state).board[4][3], "R");
    }

    #[test]
    fn capturing_the_last_piece_wins() {
        let mut board = empty_board();
        board[4][3] = "r".to_string();
        board[3][4] = "b".to_string();
        let state = state_with(board, None);

        let outcome = apply_move(&state, &mv([4, 3], [2, 5]), "r").unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.winner_symbol.as_deref(), Some("r"));
    }

    #[test]
    fn men_cannot_jump_backwards() {
        let mut board = empty_board();
        board[3][2] = "r".to_string();
        board[4][3] = "b".to_string();
        board[0][7] = "b".to_string();
        let state = state_with(board, None);

        // The capture square is behind the red man.
        assert_eq!(
            apply_move(&state, &mv([3, 2], [5, 4]), "r").unwrap_err(),
            MoveError::InvalidMove
        );
    }

    #[test]
    fn black_descends_and_kings_on_row_seven() {
        let mut board = empty_board();
        board[6][3] = "b".to_string();
        board[7][6] = "r".to_string();
        board[0][1] = "r".to_string();
        let state = state_with(board, None);

        let outcome = apply_move(&state, &mv([6, 3], [7, 4]), "b").unwrap();
        let decoded = decode(&outcome.state);
        assert_eq!(decoded.board[7][4], "B");
        assert!(!outcome.finished);
    }

    #[test]
    fn blocking_all_moves_wins() {
        // Black's lone man at (0,1) is boxed in: both forward squares are
        // occupied by red pieces that themselves have no jump over it.
        let mut board = empty_board();
        board[0][1] = "b".to_string();
        board[1][0] = "r".to_string();
        board[1][2] = "r".to_string();
        board[2][3] = "r".to_string();
        board[2][1] = "r".to_string();
        board[5][6] = "r".to_string();
        let state = state_with(board, None);

        // Red makes a quiet step elsewhere; black then has no legal move.
        let outcome = apply_move(&state, &mv([5, 6], [4, 5]), "r").unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.winner_symbol.as_deref(), Some("r"));
    }
}
