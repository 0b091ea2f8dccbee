//! serde helpers for `Board::cells`: the flat cell vector is stored as one
//! `.XO` string per row so board files stay readable.

use super::types::Stone;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

fn side_of(len: usize) -> Option<usize> {
    let side = (len as f64).sqrt().round() as usize;
    (side * side == len).then_some(side)
}

pub fn serialize<S>(cells: &[Option<Stone>], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let side = side_of(cells.len())
        .filter(|&s| s > 0)
        .unwrap_or(cells.len().max(1));
    let rows: Vec<String> = cells
        .chunks(side)
        .map(|row| {
            row.iter()
                .map(|c| c.map(Stone::symbol).unwrap_or('.'))
                .collect()
        })
        .collect();
    rows.serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Option<Stone>>, D::Error>
where
    D: Deserializer<'de>,
{
    let rows: Vec<String> = Vec::deserialize(deserializer)?;
    let size = rows.len();
    let mut cells = Vec::with_capacity(size * size);
    for (i, row) in rows.iter().enumerate() {
        let before = cells.len();
        for ch in row.chars() {
            cells.push(match ch {
                '.' => None,
                'X' => Some(Stone::Black),
                'O' => Some(Stone::White),
                other => {
                    return Err(D::Error::custom(format!(
                        "row {i}: unexpected cell {other:?}"
                    )))
                }
            });
        }
        if cells.len() - before != size {
            return Err(D::Error::custom(format!(
                "row {i} has {} cells, expected {size}",
                cells.len() - before
            )));
        }
    }
    Ok(cells)
}
