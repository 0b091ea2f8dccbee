use crate::core::coord::MAX_BOARD_SIZE;
use crate::core::{Board, Stone};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::OnceLock;

// 定数
const COLORS: usize = 2;
// 実行ごとに同じ値になるよう固定シード
const TABLE_SEED: u64 = 0x5EED_601A_15CE_0001;

// Zobrist Hash用の乱数テーブル
struct ZobristTable {
    stones: [[[u64; COLORS]; MAX_BOARD_SIZE]; MAX_BOARD_SIZE],
    size: [u64; MAX_BOARD_SIZE + 1],
}

static ZOBRIST_TABLE: OnceLock<ZobristTable> = OnceLock::new();

fn get_zobrist_table() -> &'static ZobristTable {
    ZOBRIST_TABLE.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(TABLE_SEED);
        let mut table = ZobristTable {
            stones: [[[0; COLORS]; MAX_BOARD_SIZE]; MAX_BOARD_SIZE],
            size: [0; MAX_BOARD_SIZE + 1],
        };

        for row in 0..MAX_BOARD_SIZE {
            for col in 0..MAX_BOARD_SIZE {
                for c in 0..COLORS {
                    table.stones[row][col][c] = rng.gen();
                }
            }
        }
        for s in table.size.iter_mut() {
            *s = rng.gen();
        }

        table
    })
}

fn stone_to_index(stone: Stone) -> usize {
    match stone {
        Stone::Black => 0,
        Stone::White => 1,
    }
}

pub struct ZobristHasher;

impl ZobristHasher {
    /// Digest of board size and stone placement. XOR makes it independent of
    /// the order stones were placed in.
    pub fn compute_hash(board: &Board) -> u64 {
        let table = get_zobrist_table();
        let mut hash = table.size[board.size().min(MAX_BOARD_SIZE)];

        for (pos, stone) in board.stones() {
            if pos.row < MAX_BOARD_SIZE && pos.col < MAX_BOARD_SIZE {
                hash ^= table.stones[pos.row][pos.col][stone_to_index(stone)];
            }
        }

        hash
    }
}
