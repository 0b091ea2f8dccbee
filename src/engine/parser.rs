//! Parser for the engine's streaming analysis lines.
//!
//! One line may batch several records:
//!
//! ```text
//! info move H8 visits 812 winrate 0.61 order 0 pv H8 J9 pvVisits 812 400 info move J9 ...
//! ```
//!
//! `pv` and `pvVisits` take every following token up to the next key; all
//! other keys take exactly one value.

use crate::core::coord::{parse_move, ProtocolMove};
use crate::engine::candidate::MoveCandidate;
use std::collections::HashMap;
use tracing::debug;

const ARRAY_KEYS: [&str; 2] = ["pv", "pvVisits"];

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Line without the record marker; ignore it.
    Noise,
    Records(Vec<MoveCandidate>),
}

/// Tokens of a single record before interpretation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawRecord {
    pub scalars: HashMap<String, String>,
    pub arrays: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct StreamParser {
    marker: String,
    board_size: usize,
}

/// 値ではなくキーとみなすトークン
fn is_key_token(token: &str) -> bool {
    !token.is_empty()
        && token.chars().all(|c| c.is_ascii_alphabetic())
        && !token.eq_ignore_ascii_case("pass")
}

impl StreamParser {
    pub fn new(marker: impl Into<String>, board_size: usize) -> Self {
        StreamParser {
            marker: marker.into(),
            board_size,
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn is_record_line(&self, line: &str) -> bool {
        line.split_whitespace().next() == Some(self.marker.as_str())
    }

    pub fn parse_line(&self, line: &str) -> ParseOutcome {
        if !self.is_record_line(line) {
            return ParseOutcome::Noise;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let candidates = tokens
            .split(|t| *t == self.marker)
            .filter(|record| !record.is_empty())
            .map(Self::tokenize)
            .filter_map(|raw| self.to_candidate(&raw))
            .collect();
        ParseOutcome::Records(candidates)
    }

    pub fn tokenize(tokens: &[&str]) -> RawRecord {
        let mut raw = RawRecord::default();
        let mut i = 0;
        while i < tokens.len() {
            let key = tokens[i];
            if ARRAY_KEYS.contains(&key) {
                let mut j = i + 1;
                while j < tokens.len() && !is_key_token(tokens[j]) {
                    j += 1;
                }
                let values = tokens[i + 1..j].iter().map(|s| s.to_string()).collect();
                raw.arrays.insert(key.to_string(), values);
                i = j;
            } else {
                let value = tokens.get(i + 1).copied().unwrap_or("");
                raw.scalars.insert(key.to_string(), value.to_string());
                i += 2;
            }
        }
        raw
    }

    fn to_candidate(&self, raw: &RawRecord) -> Option<MoveCandidate> {
        let coord = raw.scalars.get("move")?;
        let position = match parse_move(coord, self.board_size) {
            Ok(ProtocolMove::Place(p)) => p,
            Ok(ProtocolMove::Pass) => return None,
            Err(e) => {
                debug!("dropping record with bad move {coord:?}: {e}");
                return None;
            }
        };
        let visits = match raw.scalars.get("visits").map(|v| v.parse::<u64>()) {
            Some(Ok(v)) => v,
            _ => {
                debug!("dropping record for {coord}: missing or bad visits");
                return None;
            }
        };
        let winrate = match raw.scalars.get("winrate").map(|v| v.parse::<f64>()) {
            Some(Ok(w)) if w.is_finite() => w.clamp(0.0, 1.0),
            _ => {
                debug!("dropping record for {coord}: missing or bad winrate");
                return None;
            }
        };
        let weight = raw
            .scalars
            .get("weight")
            .and_then(|w| w.parse::<f64>().ok())
            .unwrap_or(0.0);

        Some(MoveCandidate {
            position,
            coord: coord.to_ascii_uppercase(),
            visits,
            weight,
            winrate,
            prior: raw.scalars.get("prior").and_then(|p| p.parse().ok()),
            order: raw.scalars.get("order").and_then(|o| o.parse().ok()),
            pv: raw.arrays.get("pv").cloned().unwrap_or_default(),
            pv_visits: raw
                .arrays
                .get("pvVisits")
                .map(|vs| vs.iter().filter_map(|v| v.parse().ok()).collect())
                .unwrap_or_default(),
        })
    }
}
