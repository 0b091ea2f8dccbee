//! Query façade over the analysis process.
//!
//! [`Coordinator::query`] never waits for the search to converge: it syncs the
//! engine to the observed board, answers from the cache when it can, and
//! otherwise returns whatever the background reader has seen so far for this
//! exact position.

use crate::core::{Board, Stone};
use crate::engine::cache::{CacheEntry, CacheStats, ResultCache};
use crate::engine::candidate::MoveCandidate;
use crate::engine::config::{AnalysisConfig, EngineConfig};
use crate::engine::error::EngineError;
use crate::engine::parser::{ParseOutcome, StreamParser};
use crate::engine::process::{drain_stderr, CommandSender, LineReader, ProcessSupervisor};
use crate::engine::sync::SyncProtocol;
use crate::engine::AnalysisEngine;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Source {
    /// Converged result from the cache.
    Cache,
    /// In-progress result for this position.
    Live,
    /// Analysis started, nothing received yet.
    Pending,
    /// Finished search for this position that was not served from the cache.
    Complete,
}

/// 最新の解析結果
#[derive(Debug, Clone)]
pub struct AnalysisSnapshot {
    pub board_hash: u64,
    pub player: Stone,
    pub candidates: Vec<MoveCandidate>,
    pub received_at: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMeta {
    pub source: Source,
    /// The engine record was cleared and replayed during this query.
    pub refreshed: bool,
    pub best_visits: u64,
    pub total_queries: u64,
    pub refresh_count: u64,
    pub cache_hit_rate: f64,
    pub snapshot_age_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub player: Stone,
    pub candidates: Vec<MoveCandidate>,
    pub meta: QueryMeta,
}

impl QueryOutcome {
    pub fn best(&self) -> Option<&MoveCandidate> {
        self.candidates.first()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorStats {
    pub total_queries: u64,
    pub refresh_count: u64,
    pub commands_sent: u64,
    pub cache: CacheStats,
}

/// Position the running analysis belongs to.
struct Pending {
    hash: u64,
    player: Stone,
    board: Board,
    /// Converged and cached; the analysis was stopped.
    settled: bool,
}

struct SharedState {
    latest: Option<AnalysisSnapshot>,
    pending: Option<Pending>,
    cache: ResultCache,
    /// `=` / `?` responses seen so far.
    acks: u64,
    fault: Option<(&'static str, String)>,
}

/// Reader-side handler for stdout lines.
#[derive(Clone)]
struct Analyzer {
    shared: Arc<Mutex<SharedState>>,
    parser: StreamParser,
    sender: CommandSender,
    top_k: usize,
}

fn is_ack(line: &str) -> bool {
    line.starts_with('=') || line.starts_with('?')
}

impl Analyzer {
    async fn handle_line(&self, line: &str) -> Result<(), EngineError> {
        if is_ack(line) {
            if line.starts_with('?') {
                debug!(target: "gtp", "< {line}");
            }
            self.shared.lock().await.acks += 1;
            return Ok(());
        }
        let mut candidates = match self.parser.parse_line(line) {
            ParseOutcome::Noise => {
                debug!(target: "gtp", "ignoring line: {line}");
                return Ok(());
            }
            ParseOutcome::Records(records) => records,
        };

        let mut guard = self.shared.lock().await;
        let sent = self.sender.commands_sent();
        if guard.acks < sent {
            debug!("stale analysis line ({} of {sent} commands answered)", guard.acks);
            return Ok(());
        }
        let state = &mut *guard;
        let Some(pending) = state.pending.as_mut() else {
            return Ok(());
        };
        if let Some(c) = candidates
            .iter()
            .find(|c| !pending.board.is_empty_at(c.position.row, c.position.col))
        {
            debug!("analysis proposes occupied {}, dropping line", c.coord);
            return Ok(());
        }
        candidates.truncate(self.top_k);
        if candidates.is_empty() {
            return Ok(());
        }

        let converged = !pending.settled && state.cache.should_cache(&candidates);
        if converged {
            let entry = CacheEntry {
                player: pending.player,
                candidates: candidates.clone(),
            };
            state.cache.put(pending.hash, entry);
            pending.settled = true;
            info!(
                "analysis converged: {} with {} visits",
                candidates[0].coord, candidates[0].visits
            );
        }
        state.latest = Some(AnalysisSnapshot {
            board_hash: pending.hash,
            player: pending.player,
            candidates,
            received_at: Local::now(),
        });
        drop(guard);

        // stop はロック解放後に送る
        if converged {
            self.sender.send("stop").await?;
        }
        Ok(())
    }

    async fn record_fault(&self, stream: &'static str, err: &EngineError) {
        error!("{stream} reader stopped: {err}");
        let mut state = self.shared.lock().await;
        if state.fault.is_none() {
            state.fault = Some((stream, err.to_string()));
        }
    }
}

async fn pump_stdout(mut reader: LineReader, analyzer: Analyzer) {
    let result = async {
        while let Some(line) = reader.next_line().await? {
            analyzer.handle_line(&line).await?;
        }
        Ok::<(), EngineError>(())
    }
    .await;
    match result {
        Ok(()) => debug!("stdout reader stopped"),
        Err(e) => analyzer.record_fault(reader.stream(), &e).await,
    }
}

pub struct Coordinator {
    config: AnalysisConfig,
    supervisor: ProcessSupervisor,
    sync: SyncProtocol,
    shared: Arc<Mutex<SharedState>>,
    tasks: Vec<JoinHandle<()>>,
    total_queries: u64,
    refresh_count: u64,
}

impl Coordinator {
    /// Spawns the configured process and its reader tasks.
    pub fn start(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let supervisor = ProcessSupervisor::spawn(&config.process)?;
        Self::with_supervisor(config.analysis.clone(), supervisor)
    }

    pub fn with_supervisor(
        config: AnalysisConfig,
        mut supervisor: ProcessSupervisor,
    ) -> Result<Self, EngineError> {
        let stdout = supervisor
            .take_stdout()
            .ok_or(EngineError::ProcessUnavailable)?;
        let stderr = supervisor
            .take_stderr()
            .ok_or(EngineError::ProcessUnavailable)?;

        let shared = Arc::new(Mutex::new(SharedState {
            latest: None,
            pending: None,
            cache: ResultCache::new(config.cache_capacity, config.confidence_threshold),
            acks: 0,
            fault: None,
        }));
        let analyzer = Analyzer {
            shared: Arc::clone(&shared),
            parser: StreamParser::new(config.record_marker.clone(), config.board_size),
            sender: supervisor.sender(),
            top_k: config.top_k,
        };

        let stderr_analyzer = analyzer.clone();
        let tasks = vec![
            tokio::spawn(pump_stdout(stdout, analyzer)),
            tokio::spawn(async move {
                if let Err(e) = drain_stderr(stderr).await {
                    stderr_analyzer.record_fault("stderr", &e).await;
                }
            }),
        ];

        let sync = SyncProtocol::new(&config, supervisor.sender());
        info!(
            "coordinator ready: {}x{} board, threshold {} visits",
            config.board_size, config.board_size, config.confidence_threshold
        );
        Ok(Coordinator {
            config,
            supervisor,
            sync,
            shared,
            tasks,
            total_queries: 0,
            refresh_count: 0,
        })
    }

    pub async fn query(&mut self, board: &Board) -> Result<QueryOutcome, EngineError> {
        self.total_queries += 1;
        if let Some((stream, status)) = self.shared.lock().await.fault.clone() {
            return Err(EngineError::ProcessTerminated { stream, status });
        }
        if board.size() != self.config.board_size {
            return Err(EngineError::BoardSizeMismatch {
                expected: self.config.board_size,
                actual: board.size(),
            });
        }
        let player = board.current_player()?;

        // reconcile 内で盤面一致まで検証済み
        let report = self.sync.reconcile(board).await?;
        if report.reset {
            self.refresh_count += 1;
        }
        let hash = board.hash();

        let mut state = self.shared.lock().await;
        if let Some(entry) = state.cache.get(hash) {
            let (player, candidates) = (entry.player, entry.candidates.clone());
            let hit_rate = state.cache.hit_rate();
            drop(state);
            debug!("cache hit for {hash:016x}");
            return Ok(self.outcome(player, candidates, Source::Cache, report.reset, hit_rate, None));
        }
        // キャッシュミスのたびに stop + 解析を送り直す
        state.pending = Some(Pending {
            hash,
            player,
            board: board.clone(),
            settled: false,
        });
        drop(state);

        debug!("requesting analysis for {player} on {hash:016x}");
        self.sync.begin_analysis(player).await?;

        let state = self.shared.lock().await;
        let hit_rate = state.cache.hit_rate();
        let (source, candidates, age) = match &state.latest {
            Some(snap) if snap.board_hash == hash => (
                Source::Live,
                snap.candidates.clone(),
                Some((Local::now() - snap.received_at).num_milliseconds()),
            ),
            _ => (Source::Pending, Vec::new(), None),
        };
        drop(state);
        Ok(self.outcome(player, candidates, source, report.reset, hit_rate, age))
    }

    fn outcome(
        &self,
        player: Stone,
        candidates: Vec<MoveCandidate>,
        source: Source,
        refreshed: bool,
        cache_hit_rate: f64,
        snapshot_age_ms: Option<i64>,
    ) -> QueryOutcome {
        QueryOutcome {
            player,
            meta: QueryMeta {
                source,
                refreshed,
                best_visits: candidates.first().map_or(0, |c| c.visits),
                total_queries: self.total_queries,
                refresh_count: self.refresh_count,
                cache_hit_rate,
                snapshot_age_ms,
            },
            candidates,
        }
    }

    pub async fn latest(&self) -> Option<AnalysisSnapshot> {
        self.shared.lock().await.latest.clone()
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let state = self.shared.lock().await;
        CoordinatorStats {
            total_queries: self.total_queries,
            refresh_count: self.refresh_count,
            commands_sent: self.supervisor.sender().commands_sent(),
            cache: state.cache.stats(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Stops the process and waits for both readers.
    pub async fn close(mut self) -> Result<(), EngineError> {
        if let Err(e) = self.sync.stop_analysis().await {
            debug!("stop before shutdown failed: {e}");
        }
        self.supervisor.shutdown().await;
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            match tokio::time::timeout(READER_JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("reader task failed: {e}"),
                Err(_) => {
                    warn!("reader task did not stop, aborting");
                    abort.abort();
                }
            }
        }
        info!(
            "coordinator closed after {} queries ({} refreshes)",
            self.total_queries, self.refresh_count
        );
        Ok(())
    }
}

impl AnalysisEngine for Coordinator {
    fn name(&self) -> &str {
        "external-process"
    }

    async fn query(&mut self, board: &Board) -> Result<QueryOutcome, EngineError> {
        Coordinator::query(self, board).await
    }

    async fn close(self) -> Result<(), EngineError> {
        Coordinator::close(self).await
    }
}
