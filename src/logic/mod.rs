pub mod zobrist;

use crate::core::{Board, Outcome, Position, Stone};

/// 五連の判定に使う4方向 (横, 縦, 右下, 左下)
const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

/// Stones needed in a line to win.
pub const WIN_LENGTH: usize = 5;

fn step(board: &Board, pos: Position, (dr, dc): (isize, isize)) -> Option<Position> {
    let row = pos.row.checked_add_signed(dr)?;
    let col = pos.col.checked_add_signed(dc)?;
    board
        .is_valid_position(row, col)
        .then_some(Position::new(row, col))
}

/// 連の始点から同色の石を数える
fn run_from(board: &Board, start: Position, dir: (isize, isize), stone: Stone) -> Vec<Position> {
    let mut line = vec![start];
    let mut cur = start;
    while let Some(next) = step(board, cur, dir) {
        if board.get(next.row, next.col) != Some(stone) {
            break;
        }
        line.push(next);
        cur = next;
    }
    line
}

/// First line of five or more in row-major scan order, with its color.
/// Runs longer than five count (free-style rules).
pub fn find_five(board: &Board) -> Option<(Stone, Vec<Position>)> {
    for (pos, stone) in board.stones() {
        for dir in DIRECTIONS {
            // 連の途中からは数えない
            let back = (-dir.0, -dir.1);
            if let Some(prev) = step(board, pos, back) {
                if board.get(prev.row, prev.col) == Some(stone) {
                    continue;
                }
            }
            let line = run_from(board, pos, dir, stone);
            if line.len() >= WIN_LENGTH {
                return Some((stone, line));
            }
        }
    }
    None
}

/// 終局判定: 五連があればその色の勝ち、盤が埋まれば引き分け
pub fn terminal_state(board: &Board) -> Option<Outcome> {
    if let Some((stone, _)) = find_five(board) {
        return Some(Outcome::Win(stone));
    }
    if board.is_full() {
        return Some(Outcome::Draw);
    }
    None
}
