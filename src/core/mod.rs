pub mod board;
pub mod coord;
pub mod serialization;
pub mod types;

pub use board::{Board, BoardError};
pub use coord::{to_external, to_internal, CoordError, ProtocolMove};
pub use types::{Outcome, Position, Stone};
