//! gomoku-assist: live move recommendations from an external analysis engine.
//!
//! ## Usage
//!
//! - `gomoku-assist show --board board.txt` - print a board and its state
//! - `gomoku-assist analyze --config engine.json --board board.txt` - analyze a position
//! - `gomoku-assist init-config engine.json` - write the default configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gomoku_assist::core::Board;
use gomoku_assist::display::{self, DisplayState};
use gomoku_assist::engine::{AnalysisEngine, Engine, EngineConfig, QueryMeta, Source};

#[derive(Parser)]
#[command(name = "gomoku-assist")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a board file with the side to move and the game state
    Show {
        #[arg(short, long)]
        board: PathBuf,
        #[arg(long, default_value_t = 15)]
        size: usize,
    },
    /// Query the analysis engine until the result converges
    Analyze {
        #[arg(short, long, default_value = "engine.json")]
        config: PathBuf,
        #[arg(short, long)]
        board: PathBuf,
        /// Maximum number of queries
        #[arg(long, default_value_t = 50)]
        cycles: u32,
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        /// Re-read the board file before every query
        #[arg(long)]
        follow: bool,
    },
    /// Write the default engine configuration
    InitConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Show { board, size } => show(&board, size),
        Commands::Analyze {
            config,
            board,
            cycles,
            interval_ms,
            follow,
        } => analyze(&config, &board, cycles, Duration::from_millis(interval_ms), follow).await,
        Commands::InitConfig { path } => {
            EngineConfig::default().save(&path)?;
            info!("wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

fn show(path: &Path, size: usize) -> Result<()> {
    let board = Board::load_from_file(path, size)?;
    display::render_board(&board, &DisplayState::new());
    match board.current_player() {
        Ok(player) => println!("{player} to move"),
        Err(e) => println!("not a reachable position: {e}"),
    }
    display::render_terminal(&board);
    Ok(())
}

async fn analyze(
    config_path: &Path,
    board_path: &Path,
    cycles: u32,
    interval: Duration,
    follow: bool,
) -> Result<()> {
    let config = EngineConfig::load(config_path)?;
    let size = config.analysis.board_size;
    let mut board = Board::load_from_file(board_path, size)?;
    if board.terminal_state().is_some() {
        display::render_board(&board, &DisplayState::new());
        display::render_terminal(&board);
        return Ok(());
    }

    let mut engine = Engine::start(&config).context("starting analysis engine")?;
    info!("using {} engine ({:?})", engine.name(), engine.kind());
    let result = run_cycles(&mut engine, &mut board, board_path, cycles, interval, follow).await;
    engine.close().await?;
    result
}

async fn run_cycles(
    engine: &mut Engine,
    board: &mut Board,
    board_path: &Path,
    cycles: u32,
    interval: Duration,
    follow: bool,
) -> Result<()> {
    let mut last: Option<QueryMeta> = None;
    for cycle in 1..=cycles {
        if follow {
            match Board::load_from_file(board_path, board.size()) {
                Ok(b) => *board = b,
                Err(e) => warn!("keeping previous board: {e:#}"),
            }
        }
        match engine.query(board).await {
            Ok(outcome) => {
                let mut state = DisplayState::from_outcome(&outcome);
                state.status_msg = Some(format!("cycle {cycle}/{cycles}"));
                display::render_board(board, &state);
                display::render_outcome(&outcome);
                let finished = matches!(outcome.meta.source, Source::Cache | Source::Complete);
                if finished && !follow {
                    return Ok(());
                }
                last = Some(outcome.meta);
            }
            Err(e) if e.is_fatal() => bail!("analysis engine failed: {e}"),
            Err(e) => warn!("skipping cycle {cycle}: {e}"),
        }
        tokio::time::sleep(interval).await;
    }
    match last {
        Some(meta) => info!(
            "no converged result after {} queries ({} refreshes, cache hit rate {:.1}%)",
            meta.total_queries,
            meta.refresh_count,
            meta.cache_hit_rate * 100.0
        ),
        None => warn!("no analysis result after {cycles} cycles"),
    }
    Ok(())
}
