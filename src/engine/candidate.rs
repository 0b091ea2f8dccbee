use crate::core::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 候補手 (解析結果の1レコード)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveCandidate {
    pub position: Position,
    /// Vertex as the engine printed it, e.g. `J10`.
    pub coord: String,
    pub visits: u64,
    pub weight: f64,
    /// Win probability for the side to move, 0.0..=1.0.
    pub winrate: f64,
    pub prior: Option<f64>,
    pub order: Option<u32>,
    /// Principal variation, vertices in engine format.
    pub pv: Vec<String>,
    pub pv_visits: Vec<u64>,
}

impl fmt::Display for MoveCandidate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Move{}({}): v{} w{:.0} {:.1}%",
            self.position,
            self.coord,
            self.visits,
            self.weight,
            self.winrate * 100.0
        )
    }
}
