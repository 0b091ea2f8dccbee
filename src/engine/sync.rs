//! Keeps the engine's game record equal to the observed board.
//!
//! The shadow board mirrors exactly what has been sent as `play` commands.
//! An observed board that is a superset of the shadow is reached by playing
//! the missing stones. Anything else (a stone vanished or changed color) is a
//! new game or a recognition glitch; the engine cannot undo an uncertain
//! history, so the record is cleared and replayed from scratch.

use crate::core::{to_external, Board, Position, Stone};
use crate::engine::config::AnalysisConfig;
use crate::engine::error::EngineError;
use crate::engine::process::CommandSender;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synchronized,
    Diverged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// `clear_board` was sent and the shadow rebuilt.
    pub reset: bool,
    /// Stones played, in the order they were sent.
    pub played: Vec<(Stone, Position)>,
}

impl SyncReport {
    /// The engine's position changed (and any running analysis was stopped).
    pub fn changed(&self) -> bool {
        self.reset || !self.played.is_empty()
    }
}

/// Orders stones so colors alternate, starting with `next`, as long as both
/// colors remain. Within a color the row-major order is kept.
pub fn replay_order(stones: &[(Stone, Position)], next: Stone) -> Vec<(Stone, Position)> {
    let mut black: VecDeque<_> = stones.iter().filter(|(s, _)| *s == Stone::Black).collect();
    let mut white: VecDeque<_> = stones.iter().filter(|(s, _)| *s == Stone::White).collect();
    let mut out = Vec::with_capacity(stones.len());
    let mut turn = next;
    loop {
        let queue = match turn {
            Stone::Black => &mut black,
            Stone::White => &mut white,
        };
        match queue.pop_front() {
            Some(&entry) => out.push(entry),
            None => {
                // 片方の色が尽きたら残りをそのまま
                out.extend(black.drain(..).copied());
                out.extend(white.drain(..).copied());
                break;
            }
        }
        turn = turn.opponent();
    }
    out
}

pub struct SyncProtocol {
    shadow: Board,
    sender: CommandSender,
    analyze_command: String,
    interval: u32,
    extra_flags: String,
}

impl SyncProtocol {
    pub fn new(config: &AnalysisConfig, sender: CommandSender) -> Self {
        SyncProtocol {
            shadow: Board::new(config.board_size),
            sender,
            analyze_command: config.analyze_command.clone(),
            interval: config.interval,
            extra_flags: config.extra_flags.clone(),
        }
    }

    pub fn shadow(&self) -> &Board {
        &self.shadow
    }

    pub fn state(&self, observed: &Board) -> SyncState {
        if self.shadow.is_subset_of(observed) {
            SyncState::Synchronized
        } else {
            SyncState::Diverged
        }
    }

    /// Brings the engine to `observed`. On success the shadow equals
    /// `observed` cell for cell.
    pub async fn reconcile(&mut self, observed: &Board) -> Result<SyncReport, EngineError> {
        let reset = self.state(observed) == SyncState::Diverged;
        let base = if reset {
            Board::new(observed.size())
        } else {
            self.shadow.clone()
        };
        let next = base.current_player().unwrap_or(Stone::Black);
        let missing = replay_order(&observed.diff(&base), next);

        if reset || !missing.is_empty() {
            self.sender.send("stop").await?;
        }
        if reset {
            warn!(
                "observed board is not a continuation of the engine record ({} stones known), resetting",
                self.shadow.stone_count()
            );
            self.shadow = Board::new(observed.size());
            self.sender.send("clear_board").await?;
        }

        let size = observed.size();
        for &(stone, pos) in &missing {
            let vertex = to_external(pos.row, pos.col, size);
            self.sender
                .send(&format!("play {} {}", stone.protocol_letter(), vertex))
                .await?;
            self.shadow.place(pos.row, pos.col, stone)?;
        }
        if !missing.is_empty() {
            debug!("replayed {} stone(s)", missing.len());
        }

        if self.shadow != *observed {
            return Err(EngineError::ConsistencyViolation);
        }
        Ok(SyncReport {
            reset,
            played: missing,
        })
    }

    /// Stops any running analysis and starts one for `player`.
    pub async fn begin_analysis(&self, player: Stone) -> Result<(), EngineError> {
        self.sender.send("stop").await?;
        let command = format!(
            "{} {} {} {}",
            self.analyze_command,
            player.protocol_letter(),
            self.interval,
            self.extra_flags
        );
        self.sender.send(command.trim_end()).await
    }

    pub async fn stop_analysis(&self) -> Result<(), EngineError> {
        self.sender.send("stop").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::process::ProcessSupervisor;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream, Lines};

    fn harness() -> (SyncProtocol, Lines<BufReader<DuplexStream>>, ProcessSupervisor) {
        let (stdin, engine_in) = duplex(64 * 1024);
        let (_out, stdout) = duplex(64);
        let (_err, stderr) = duplex(64);
        let sup = ProcessSupervisor::from_streams(Box::new(stdin), Box::new(stdout), Box::new(stderr));
        let sync = SyncProtocol::new(&AnalysisConfig::default(), sup.sender());
        (sync, BufReader::new(engine_in).lines(), sup)
    }

    async fn read_n(lines: &mut Lines<BufReader<DuplexStream>>, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(lines.next_line().await.unwrap().unwrap());
        }
        out
    }

    fn board(stones: &[(usize, usize, Stone)]) -> Board {
        let mut b = Board::new(15);
        for &(r, c, s) in stones {
            b.place(r, c, s).unwrap();
        }
        b
    }

    #[test]
    fn test_replay_order_alternates() {
        let stones = vec![
            (Stone::White, Position::new(0, 0)),
            (Stone::White, Position::new(0, 1)),
            (Stone::Black, Position::new(1, 0)),
            (Stone::Black, Position::new(1, 1)),
            (Stone::Black, Position::new(2, 2)),
        ];
        let order: Vec<Stone> = replay_order(&stones, Stone::Black)
            .iter()
            .map(|(s, _)| *s)
            .collect();
        assert_eq!(
            order,
            vec![Stone::Black, Stone::White, Stone::Black, Stone::White, Stone::Black]
        );

        let from_white = replay_order(&stones[..3], Stone::White);
        assert_eq!(from_white[0], (Stone::White, Position::new(0, 0)));
        assert_eq!(from_white[1], (Stone::Black, Position::new(1, 0)));
    }

    #[tokio::test]
    async fn test_incremental_replay() {
        let (mut sync, mut lines, _sup) = harness();

        let first = board(&[(7, 7, Stone::Black)]);
        let report = sync.reconcile(&first).await.unwrap();
        assert!(!report.reset);
        assert_eq!(read_n(&mut lines, 2).await, vec!["stop", "play B H8"]);

        let second = board(&[(7, 7, Stone::Black), (6, 8, Stone::White), (8, 6, Stone::Black)]);
        let report = sync.reconcile(&second).await.unwrap();
        assert_eq!(report.played.len(), 2);
        assert_eq!(
            read_n(&mut lines, 3).await,
            vec!["stop", "play W J9", "play B G7"]
        );
        assert_eq!(sync.shadow(), &second);
    }

    #[tokio::test]
    async fn test_unchanged_board_sends_nothing() {
        let (mut sync, mut lines, _sup) = harness();
        let b = board(&[(7, 7, Stone::Black)]);
        sync.reconcile(&b).await.unwrap();
        read_n(&mut lines, 2).await;

        let report = sync.reconcile(&b).await.unwrap();
        assert!(!report.changed());
        sync.stop_analysis().await.unwrap();
        // 次に届くのは明示的な stop だけ
        assert_eq!(read_n(&mut lines, 1).await, vec!["stop"]);
    }

    #[tokio::test]
    async fn test_superset_shadow_triggers_reset() {
        let (mut sync, mut lines, _sup) = harness();
        let full = board(&[(7, 7, Stone::Black), (7, 8, Stone::White)]);
        sync.reconcile(&full).await.unwrap();
        read_n(&mut lines, 3).await;

        let fewer = board(&[(3, 3, Stone::Black)]);
        assert_eq!(sync.state(&fewer), SyncState::Diverged);
        let report = sync.reconcile(&fewer).await.unwrap();
        assert!(report.reset);
        assert_eq!(
            read_n(&mut lines, 3).await,
            vec!["stop", "clear_board", "play B D12"]
        );
        assert_eq!(sync.shadow(), &fewer);
    }

    #[tokio::test]
    async fn test_reset_replays_with_alternation() {
        let (mut sync, mut lines, _sup) = harness();
        let b = board(&[
            (0, 0, Stone::White),
            (0, 1, Stone::White),
            (5, 5, Stone::Black),
            (6, 6, Stone::Black),
        ]);
        let report = sync.reconcile(&b).await.unwrap();
        let colors: Vec<Stone> = report.played.iter().map(|(s, _)| *s).collect();
        assert_eq!(colors, vec![Stone::Black, Stone::White, Stone::Black, Stone::White]);
        let sent = read_n(&mut lines, 5).await;
        assert_eq!(sent[0], "stop");
        assert!(sent[1].starts_with("play B"));
        assert!(sent[2].starts_with("play W"));
    }

    #[tokio::test]
    async fn test_begin_analysis_command() {
        let (sync, mut lines, _sup) = harness();
        sync.begin_analysis(Stone::White).await.unwrap();
        assert_eq!(
            read_n(&mut lines, 2).await,
            vec!["stop", "kata-analyze W 10 pvVisits true"]
        );
    }
}
