use super::coord::{column_letter, MAX_BOARD_SIZE};
use super::types::{Outcome, Position, Stone};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("({row}, {col}) is outside a {size}x{size} board")]
    OutOfBounds { row: usize, col: usize, size: usize },
    #[error("({row}, {col}) is already occupied")]
    Occupied { row: usize, col: usize },
    #[error("({row}, {col}) is empty")]
    Empty { row: usize, col: usize },
    #[error("invalid stone counts: black {black}, white {white}")]
    InvalidCounts { black: usize, white: usize },
    #[error("board must be {expected}x{expected}, got {actual}")]
    Shape { expected: usize, actual: String },
    #[error("board size {0} is not supported")]
    UnsupportedSize(usize),
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// 盤面 (五目並べ)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BoardRepr", into = "BoardRepr")]
pub struct Board {
    size: usize,
    /// 行優先の石配置
    cells: Vec<Option<Stone>>,
}

/// On-disk form of [`Board`]; converted back only when the shape holds.
#[derive(Serialize, Deserialize)]
struct BoardRepr {
    size: usize,
    #[serde(with = "crate::core::serialization")]
    cells: Vec<Option<Stone>>,
}

impl TryFrom<BoardRepr> for Board {
    type Error = BoardError;

    fn try_from(repr: BoardRepr) -> Result<Self, Self::Error> {
        if repr.size > MAX_BOARD_SIZE {
            return Err(BoardError::UnsupportedSize(repr.size));
        }
        if repr.cells.len() != repr.size * repr.size {
            return Err(BoardError::Shape {
                expected: repr.size,
                actual: format!("{} cells", repr.cells.len()),
            });
        }
        Ok(Board {
            size: repr.size,
            cells: repr.cells,
        })
    }
}

impl From<Board> for BoardRepr {
    fn from(board: Board) -> Self {
        BoardRepr {
            size: board.size,
            cells: board.cells,
        }
    }
}

impl Board {
    /// Empty board. A size of 0 gives a board with no cells.
    pub fn new(size: usize) -> Self {
        Board {
            size,
            cells: vec![None; size * size],
        }
    }

    /// Build a board from explicit rows. Every row must be `rows.len()` long.
    pub fn from_grid(rows: Vec<Vec<Option<Stone>>>) -> Result<Self, BoardError> {
        let size = rows.len();
        if size == 0 || size > MAX_BOARD_SIZE {
            return Err(BoardError::UnsupportedSize(size));
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != size) {
            return Err(BoardError::Shape {
                expected: size,
                actual: format!("a row of length {}", bad.len()),
            });
        }
        Ok(Board {
            size,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    fn idx(&self, row: usize, col: usize) -> usize {
        row * self.size + col
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_valid_position(&self, row: usize, col: usize) -> bool {
        row < self.size && col < self.size
    }

    pub fn get(&self, row: usize, col: usize) -> Option<Stone> {
        if !self.is_valid_position(row, col) {
            return None;
        }
        self.cells[self.idx(row, col)]
    }

    pub fn is_empty_at(&self, row: usize, col: usize) -> bool {
        self.is_valid_position(row, col) && self.get(row, col).is_none()
    }

    pub fn place(&mut self, row: usize, col: usize, stone: Stone) -> Result<(), BoardError> {
        if !self.is_valid_position(row, col) {
            return Err(BoardError::OutOfBounds {
                row,
                col,
                size: self.size,
            });
        }
        let idx = self.idx(row, col);
        if self.cells[idx].is_some() {
            return Err(BoardError::Occupied { row, col });
        }
        self.cells[idx] = Some(stone);
        Ok(())
    }

    pub fn remove(&mut self, row: usize, col: usize) -> Result<Stone, BoardError> {
        if !self.is_valid_position(row, col) {
            return Err(BoardError::OutOfBounds {
                row,
                col,
                size: self.size,
            });
        }
        let idx = self.idx(row, col);
        self.cells[idx]
            .take()
            .ok_or(BoardError::Empty { row, col })
    }

    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = None);
    }

    /// 盤面のコピー (行のリスト)
    pub fn grid(&self) -> Vec<Vec<Option<Stone>>> {
        if self.size == 0 {
            return Vec::new();
        }
        self.cells.chunks(self.size).map(|r| r.to_vec()).collect()
    }

    /// Stones in row-major order.
    pub fn stones(&self) -> impl Iterator<Item = (Position, Stone)> + '_ {
        let size = self.size;
        self.cells
            .iter()
            .enumerate()
            .filter_map(move |(i, c)| c.map(|s| (Position::new(i / size, i % size), s)))
    }

    pub fn stones_of(&self, stone: Stone) -> Vec<Position> {
        self.stones()
            .filter(|&(_, s)| s == stone)
            .map(|(p, _)| p)
            .collect()
    }

    /// `None` counts empty cells.
    pub fn count(&self, cell: Option<Stone>) -> usize {
        self.cells.iter().filter(|&&c| c == cell).count()
    }

    pub fn stone_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|c| c.is_some())
    }

    /// 黒白の石数が交互着手と矛盾しないか
    pub fn is_valid(&self) -> bool {
        self.current_player().is_ok()
    }

    /// 次の手番。黒が先手で交互に打つ前提。
    pub fn current_player(&self) -> Result<Stone, BoardError> {
        let black = self.count(Some(Stone::Black));
        let white = self.count(Some(Stone::White));
        if black == white {
            Ok(Stone::Black)
        } else if black == white + 1 {
            Ok(Stone::White)
        } else {
            Err(BoardError::InvalidCounts { black, white })
        }
    }

    /// Cells where exactly one of the two boards holds a stone, with the
    /// color of that stone, in row-major order. Boards of different sizes
    /// are compared over the common area.
    pub fn diff(&self, other: &Board) -> Vec<(Stone, Position)> {
        let size = self.size.min(other.size);
        let mut out = Vec::new();
        for row in 0..size {
            for col in 0..size {
                match (self.get(row, col), other.get(row, col)) {
                    (Some(s), None) | (None, Some(s)) => out.push((s, Position::new(row, col))),
                    _ => {}
                }
            }
        }
        out
    }

    /// Every stone of `self` sits on `other` with the same color.
    pub fn is_subset_of(&self, other: &Board) -> bool {
        self.size == other.size
            && self
                .stones()
                .all(|(p, s)| other.get(p.row, p.col) == Some(s))
    }

    pub fn hash(&self) -> u64 {
        crate::logic::zobrist::ZobristHasher::compute_hash(self)
    }

    pub fn terminal_state(&self) -> Option<Outcome> {
        crate::logic::terminal_state(self)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P, expected_size: usize) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading board file {}", path.display()))?;
        let board: Board = if text.trim_start().starts_with('{') {
            serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            text.parse()
                .with_context(|| format!("parsing {}", path.display()))?
        };
        if board.size != expected_size {
            return Err(BoardError::Shape {
                expected: expected_size,
                actual: format!("{0}x{0}", board.size),
            }
            .into());
        }
        Ok(board)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// 列ラベル + 下から数えた行番号で描画
impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "   ")?;
        for col in 0..self.size {
            write!(f, " {}", column_letter(col).unwrap_or('?'))?;
        }
        writeln!(f)?;
        for row in 0..self.size {
            write!(f, "{:>2} ", self.size - row)?;
            for col in 0..self.size {
                let ch = self.get(row, col).map(Stone::symbol).unwrap_or('.');
                write!(f, " {ch}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn parse_cell(ch: char) -> Option<Option<Stone>> {
    match ch {
        '.' | '+' | '-' | '_' => Some(None),
        'X' | 'x' | 'B' | 'b' | '●' => Some(Some(Stone::Black)),
        'O' | 'o' | 'W' | 'w' | '○' => Some(Some(Stone::White)),
        _ => None,
    }
}

/// Accepts the [`Display`](fmt::Display) output as well as a bare grid of
/// `.XO` characters. Column header lines and leading row numbers are skipped.
impl FromStr for Board {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rows = Vec::new();
        for (line_no, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('A') || line.starts_with('#') {
                continue;
            }
            let body = line.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut row = Vec::new();
            for ch in body.chars().filter(|c| !c.is_whitespace()) {
                let cell = parse_cell(ch).ok_or_else(|| BoardError::Parse {
                    line: line_no + 1,
                    reason: format!("unexpected character {ch:?}"),
                })?;
                row.push(cell);
            }
            rows.push(row);
        }
        Board::from_grid(rows)
    }
}
