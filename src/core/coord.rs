//! Conversion between internal `(row, col)` cells and engine vertices.
//!
//! Internally row 0 is the top edge. On the wire columns are letters with
//! `I` skipped and rows are counted from the bottom starting at 1, so on a
//! 15x15 board `(0, 0)` is `A15` and `(14, 8)` is `J1`.

use super::types::Position;
use thiserror::Error;

/// Column letters, `I` is never used.
pub const COLUMN_LETTERS: &[u8] = b"ABCDEFGHJKLMNOPQRSTUVWXYZ";

/// Largest board the letter scheme can address.
pub const MAX_BOARD_SIZE: usize = COLUMN_LETTERS.len();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    #[error("vertex is empty")]
    Empty,
    #[error("invalid column letter {0:?}")]
    BadColumn(char),
    #[error("invalid row number in {0:?}")]
    BadRow(String),
    #[error("vertex {vertex} is outside a {size}x{size} board")]
    OutOfBoard { vertex: String, size: usize },
}

/// A parsed engine move: either a board cell or a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMove {
    Place(Position),
    Pass,
}

pub fn column_letter(col: usize) -> Option<char> {
    COLUMN_LETTERS.get(col).map(|&b| b as char)
}

pub fn column_index(letter: char) -> Option<usize> {
    let upper = letter.to_ascii_uppercase();
    COLUMN_LETTERS.iter().position(|&b| b as char == upper)
}

/// `(row, col)` → vertex text such as `H8`.
///
/// Callers pass cells that are on the board; sizes above
/// [`MAX_BOARD_SIZE`] are rejected by configuration validation.
pub fn to_external(row: usize, col: usize, size: usize) -> String {
    let letter = column_letter(col).unwrap_or('?');
    format!("{}{}", letter, size - row)
}

/// Vertex text → `(row, col)`. Case-insensitive.
pub fn to_internal(vertex: &str, size: usize) -> Result<(usize, usize), CoordError> {
    let vertex = vertex.trim();
    let mut chars = vertex.chars();
    let letter = chars.next().ok_or(CoordError::Empty)?;
    let col = column_index(letter).ok_or(CoordError::BadColumn(letter))?;

    let digits = chars.as_str();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoordError::BadRow(vertex.to_string()));
    }
    let row_number: usize = digits
        .parse()
        .map_err(|_| CoordError::BadRow(vertex.to_string()))?;

    if col >= size || row_number == 0 || row_number > size {
        return Err(CoordError::OutOfBoard {
            vertex: vertex.to_string(),
            size,
        });
    }
    Ok((size - row_number, col))
}

/// Like [`to_internal`] but recognises `pass`.
pub fn parse_move(vertex: &str, size: usize) -> Result<ProtocolMove, CoordError> {
    if vertex.trim().eq_ignore_ascii_case("pass") {
        return Ok(ProtocolMove::Pass);
    }
    let (row, col) = to_internal(vertex, size)?;
    Ok(ProtocolMove::Place(Position::new(row, col)))
}
