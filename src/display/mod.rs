use crate::core::coord::column_letter;
use crate::core::{Board, Outcome, Position, Stone};
use crate::engine::{QueryOutcome, Source};
use crossterm::style::Stylize;

/// 盤面表示の付加情報
#[derive(Debug, Clone, Default)]
pub struct DisplayState {
    /// Candidate cells in rank order; the first is drawn as the best move.
    pub highlights: Vec<Position>,
    pub status_msg: Option<String>,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_outcome(outcome: &QueryOutcome) -> Self {
        DisplayState {
            highlights: outcome.candidates.iter().map(|c| c.position).collect(),
            status_msg: None,
        }
    }

    /// 1-based rank of `pos` among the highlighted candidates.
    pub fn rank_of(&self, pos: Position) -> Option<usize> {
        self.highlights.iter().position(|&p| p == pos).map(|i| i + 1)
    }
}

pub fn render_board(board: &Board, state: &DisplayState) {
    let size = board.size();

    if let Some(msg) = &state.status_msg {
        println!("{}", msg.clone().bold().yellow());
    }

    // X軸ラベル
    print!("    ");
    for col in 0..size {
        print!(" {} ", column_letter(col).unwrap_or('?'));
    }
    println!();

    for row in 0..size {
        print!("{:>3} ", size - row);
        for col in 0..size {
            let pos = Position::new(row, col);
            match (board.get(row, col), state.rank_of(pos)) {
                (Some(Stone::Black), _) => print!("{}", " X ".cyan()),
                (Some(Stone::White), _) => print!("{}", " O ".magenta()),
                (None, Some(1)) => print!("{}", " * ".black().on_yellow()),
                (None, Some(rank)) if rank < 10 => print!("{}", format!(" {rank} ").green()),
                (None, Some(_)) => print!("{}", " + ".green()),
                (None, None) => print!(" . "),
            }
        }
        println!(" {}", size - row);
    }
}

pub fn render_terminal(board: &Board) {
    match board.terminal_state() {
        Some(Outcome::Win(stone)) => println!("{}", format!("{stone} has five in a row").bold().red()),
        Some(Outcome::Draw) => println!("{}", "board is full: draw".bold()),
        None => {}
    }
}

/// One line per candidate, best first.
pub fn candidate_lines(outcome: &QueryOutcome) -> Vec<String> {
    outcome
        .candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let pv = if c.pv.is_empty() {
                String::new()
            } else {
                format!("  pv {}", c.pv.join(" "))
            };
            format!(
                "{:>2}. {:<4} visits {:>7}  winrate {:>5.1}%{}",
                i + 1,
                c.coord,
                c.visits,
                c.winrate * 100.0,
                pv
            )
        })
        .collect()
}

pub fn render_outcome(outcome: &QueryOutcome) {
    let meta = &outcome.meta;
    let source = match meta.source {
        Source::Cache => "cache".green(),
        Source::Live => "live".yellow(),
        Source::Pending => "pending".dark_grey(),
        Source::Complete => "complete".cyan(),
    };
    let age = meta
        .snapshot_age_ms
        .map(|ms| format!(", {ms} ms old"))
        .unwrap_or_default();
    println!(
        "[{}] {} to move, best {} visits{}{}",
        source,
        outcome.player,
        meta.best_visits,
        age,
        if meta.refreshed { ", engine record reset" } else { "" }
    );
    if outcome.candidates.is_empty() {
        println!("  (no candidates yet)");
        return;
    }
    for (i, line) in candidate_lines(outcome).into_iter().enumerate() {
        if i == 0 {
            println!("{}", line.bold());
        } else {
            println!("{line}");
        }
    }
    println!(
        "queries {}  refreshes {}  cache hit rate {:.1}%",
        meta.total_queries,
        meta.refresh_count,
        meta.cache_hit_rate * 100.0
    );
}
