//! Request/response engine for the process's JSON analysis mode.
//!
//! Each query writes one JSON object describing the whole board and waits for
//! the response line carrying the same `id`. There is no game record to keep
//! in step, so nothing is replayed between queries.

use crate::core::coord::parse_move;
use crate::core::{to_external, Board, ProtocolMove, Stone};
use crate::engine::cache::{CacheEntry, ResultCache};
use crate::engine::candidate::MoveCandidate;
use crate::engine::config::{AnalysisConfig, EngineConfig};
use crate::engine::coordinator::{QueryMeta, QueryOutcome, Source};
use crate::engine::error::EngineError;
use crate::engine::process::{drain_stderr, LineReader, ProcessSupervisor};
use crate::engine::AnalysisEngine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RULES: &str = "Chinese";
const KOMI: f64 = 0.0;
const STDERR_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub id: String,
    /// `[colour, vertex]` pairs, e.g. `["B", "H8"]`.
    pub initial_stones: Vec<(String, String)>,
    pub moves: Vec<(String, String)>,
    pub rules: &'static str,
    pub komi: f64,
    pub board_x_size: usize,
    pub board_y_size: usize,
    pub include_policy: bool,
    pub initial_player: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_visits: Option<u64>,
}

impl AnalysisRequest {
    /// The whole board goes in as initial stones with no move history.
    pub fn for_board(id: u64, board: &Board, player: Stone, max_visits: Option<u64>) -> Self {
        let size = board.size();
        let initial_stones = board
            .stones()
            .map(|(p, s)| {
                (
                    s.protocol_letter().to_string(),
                    to_external(p.row, p.col, size),
                )
            })
            .collect();
        AnalysisRequest {
            id: id.to_string(),
            initial_stones,
            moves: Vec::new(),
            rules: RULES,
            komi: KOMI,
            board_x_size: size,
            board_y_size: size,
            include_policy: true,
            initial_player: player.protocol_letter().to_ascii_lowercase(),
            max_visits,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub id: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub is_during_search: bool,
    #[serde(default)]
    pub move_infos: Vec<MoveInfo>,
    #[serde(default)]
    pub root_info: Option<RootInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveInfo {
    #[serde(rename = "move")]
    pub vertex: String,
    pub visits: u64,
    pub winrate: f64,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub prior: Option<f64>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub pv: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootInfo {
    #[serde(default)]
    pub current_player: Option<String>,
    #[serde(default)]
    pub visits: Option<u64>,
}

/// Converts one move info, dropping passes, bad vertices and occupied cells.
fn to_candidate(info: &MoveInfo, board: &Board) -> Option<MoveCandidate> {
    let position = match parse_move(&info.vertex, board.size()) {
        Ok(ProtocolMove::Place(p)) => p,
        Ok(ProtocolMove::Pass) => return None,
        Err(e) => {
            debug!("dropping move info {:?}: {e}", info.vertex);
            return None;
        }
    };
    if board.get(position.row, position.col).is_some() {
        debug!("dropping move info for occupied {}", info.vertex);
        return None;
    }
    if !info.winrate.is_finite() {
        return None;
    }
    Some(MoveCandidate {
        position,
        coord: info.vertex.to_ascii_uppercase(),
        visits: info.visits,
        weight: info.weight.unwrap_or(0.0),
        winrate: info.winrate.clamp(0.0, 1.0),
        prior: info.prior,
        order: info.order,
        pv: info.pv.clone(),
        pv_visits: Vec::new(),
    })
}

pub struct JsonAnalysisEngine {
    config: AnalysisConfig,
    supervisor: ProcessSupervisor,
    stdout: LineReader,
    stderr_task: Option<JoinHandle<()>>,
    cache: ResultCache,
    next_id: u64,
    total_queries: u64,
}

impl JsonAnalysisEngine {
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
        let stderr_task = tokio::spawn(async move {
            if let Err(e) = drain_stderr(stderr).await {
                warn!("stderr reader stopped: {e}");
            }
        });
        info!(
            "json analysis engine ready: {}x{} board, threshold {} visits",
            config.board_size, config.board_size, config.confidence_threshold
        );
        Ok(JsonAnalysisEngine {
            cache: ResultCache::new(config.cache_capacity, config.confidence_threshold),
            config,
            supervisor,
            stdout,
            stderr_task: Some(stderr_task),
            next_id: 0,
            total_queries: 0,
        })
    }

    /// Answers from the cache or runs one complete search for `board`.
    pub async fn query(&mut self, board: &Board) -> Result<QueryOutcome, EngineError> {
        self.total_queries += 1;
        if board.size() != self.config.board_size {
            return Err(EngineError::BoardSizeMismatch {
                expected: self.config.board_size,
                actual: board.size(),
            });
        }
        let player = board.current_player()?;
        let hash = board.hash();
        if let Some(entry) = self.cache.get(hash) {
            let (player, candidates) = (entry.player, entry.candidates.clone());
            debug!("cache hit for {hash:016x}");
            return Ok(self.outcome(player, candidates, Source::Cache));
        }

        let request =
            AnalysisRequest::for_board(self.next_id, board, player, self.config.max_visits);
        self.next_id += 1;
        let line = serde_json::to_string(&request)?;
        debug!(target: "analysis", "> {line}");
        self.supervisor.send(&line).await?;

        let response = self.read_response(&request.id).await?;
        if let Some(error) = response.error {
            return Err(EngineError::Rejected(error));
        }
        if let Some(warning) = &response.warning {
            warn!("analysis warning for request {}: {warning}", request.id);
        }
        let player = response
            .root_info
            .as_ref()
            .and_then(|r| r.current_player.as_deref())
            .and_then(Stone::from_protocol)
            .unwrap_or(player);
        let candidates: Vec<MoveCandidate> = response
            .move_infos
            .iter()
            .filter_map(|info| to_candidate(info, board))
            .take(self.config.top_k)
            .collect();

        if self.cache.should_cache(&candidates) {
            let best = candidates.first().map_or(0, |c| c.visits);
            let entry = CacheEntry {
                player,
                candidates: candidates.clone(),
            };
            if self.cache.put(hash, entry) {
                info!("cached {hash:016x} with {best} visits");
            }
        }
        Ok(self.outcome(player, candidates, Source::Complete))
    }

    /// Reads until the final response for `id`, skipping anything else.
    async fn read_response(&mut self, id: &str) -> Result<AnalysisResponse, EngineError> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(EngineError::ProcessUnavailable);
            };
            let response: AnalysisResponse = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    debug!(target: "analysis", "ignoring line ({e}): {line}");
                    continue;
                }
            };
            if response.id != id {
                debug!("skipping response for request {}", response.id);
                continue;
            }
            if response.is_during_search {
                continue;
            }
            return Ok(response);
        }
    }

    fn outcome(
        &self,
        player: Stone,
        candidates: Vec<MoveCandidate>,
        source: Source,
    ) -> QueryOutcome {
        QueryOutcome {
            player,
            meta: QueryMeta {
                source,
                refreshed: false,
                best_visits: candidates.first().map_or(0, |c| c.visits),
                total_queries: self.total_queries,
                refresh_count: 0,
                cache_hit_rate: self.cache.hit_rate(),
                snapshot_age_ms: None,
            },
            candidates,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub async fn close(mut self) -> Result<(), EngineError> {
        self.supervisor.shutdown().await;
        if let Some(task) = self.stderr_task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(STDERR_JOIN_TIMEOUT, task).await.is_err() {
                warn!("stderr reader did not stop, aborting");
                abort.abort();
            }
        }
        info!("json analysis engine closed after {} queries", self.total_queries);
        Ok(())
    }
}

impl AnalysisEngine for JsonAnalysisEngine {
    fn name(&self) -> &str {
        "json-analysis"
    }

    async fn query(&mut self, board: &Board) -> Result<QueryOutcome, EngineError> {
        JsonAnalysisEngine::query(self, board).await
    }

    async fn close(self) -> Result<(), EngineError> {
        JsonAnalysisEngine::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    type Requests = Arc<Mutex<Vec<Value>>>;

    /// Answers every request line with `reply(request)`; records requests.
    async fn fake_engine(
        stdin: DuplexStream,
        mut stdout: DuplexStream,
        stderr: DuplexStream,
        requests: Requests,
        reply: fn(&Value) -> String,
    ) {
        let mut lines = BufReader::new(stdin).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let answer = reply(&request);
            requests.lock().unwrap().push(request);
            if stdout.write_all(answer.as_bytes()).await.is_err() {
                break;
            }
        }
        drop(stderr);
    }

    fn engine(threshold: u64, reply: fn(&Value) -> String) -> (JsonAnalysisEngine, Requests) {
        let (stdin, engine_in) = duplex(64 * 1024);
        let (engine_out, stdout) = duplex(64 * 1024);
        let (engine_err, stderr) = duplex(1024);
        let requests: Requests = Arc::default();
        tokio::spawn(fake_engine(
            engine_in,
            engine_out,
            engine_err,
            Arc::clone(&requests),
            reply,
        ));
        let supervisor =
            ProcessSupervisor::from_streams(Box::new(stdin), Box::new(stdout), Box::new(stderr));
        let config = AnalysisConfig {
            confidence_threshold: threshold,
            top_k: 2,
            max_visits: Some(3000),
            ..AnalysisConfig::default()
        };
        (JsonAnalysisEngine::with_supervisor(config, supervisor).unwrap(), requests)
    }

    fn response(id: &Value, visits: u64) -> String {
        let body = json!({
            "id": id,
            "isDuringSearch": false,
            "moveInfos": [
                {"move": "J10", "visits": visits, "weight": 812.5, "winrate": 0.61, "order": 0, "prior": 0.2, "pv": ["J10", "H9"]},
                {"move": "pass", "visits": 90, "winrate": 0.1, "order": 1},
                {"move": "H8", "visits": 80, "winrate": 0.5, "order": 2},
                {"move": "G7", "visits": 70, "winrate": 1.4, "order": 3},
                {"move": "F6", "visits": 60, "winrate": 0.3, "order": 4}
            ],
            "rootInfo": {"currentPlayer": "W", "visits": visits + 300}
        });
        format!("{body}\n")
    }

    fn converged(request: &Value) -> String {
        response(&request["id"], 5000)
    }

    fn shallow(request: &Value) -> String {
        response(&request["id"], 500)
    }

    fn rejecting(request: &Value) -> String {
        format!(
            "{}\n",
            json!({"id": request["id"], "error": "Illegal move in initialStones", "field": "initialStones"})
        )
    }

    /// Log noise, a response for another request and a partial result
    /// come before the final answer.
    fn noisy(request: &Value) -> String {
        let id = &request["id"];
        format!(
            "Loaded model\n{}\n{}\n{}",
            json!({"id": "other", "moveInfos": []}),
            json!({"id": id, "isDuringSearch": true, "moveInfos": []}),
            response(id, 500)
        )
    }

    fn board(stones: &[(usize, usize, Stone)]) -> Board {
        let mut b = Board::new(15);
        for &(r, c, s) in stones {
            b.place(r, c, s).unwrap();
        }
        b
    }

    #[tokio::test]
    async fn test_request_describes_whole_board() {
        let (mut engine, requests) = engine(1000, shallow);
        let b = board(&[(7, 7, Stone::Black), (7, 8, Stone::White), (6, 6, Stone::Black)]);

        engine.query(&b).await.unwrap();
        engine.close().await.unwrap();

        let sent = requests.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let request = &sent[0];
        assert_eq!(request["id"], "0");
        assert_eq!(
            request["initialStones"],
            json!([["B", "G9"], ["B", "H8"], ["W", "J8"]])
        );
        assert_eq!(request["moves"], json!([]));
        assert_eq!(request["rules"], "Chinese");
        assert_eq!(request["komi"], 0.0);
        assert_eq!(request["boardXSize"], 15);
        assert_eq!(request["boardYSize"], 15);
        assert_eq!(request["initialPlayer"], "w");
        assert_eq!(request["maxVisits"], 3000);
    }

    #[tokio::test]
    async fn test_move_infos_become_candidates() {
        let (mut engine, _requests) = engine(1000, shallow);
        let b = board(&[(7, 7, Stone::Black)]);

        let outcome = engine.query(&b).await.unwrap();
        assert_eq!(outcome.meta.source, Source::Complete);
        assert_eq!(outcome.player, Stone::White);
        // pass and the occupied H8 are dropped, then top_k = 2
        let coords: Vec<&str> = outcome.candidates.iter().map(|c| c.coord.as_str()).collect();
        assert_eq!(coords, ["J10", "G7"]);
        let best = &outcome.candidates[0];
        assert_eq!(best.visits, 500);
        assert_eq!(best.weight, 812.5);
        assert_eq!(best.pv, vec!["J10", "H9"]);
        assert_eq!(outcome.candidates[1].winrate, 1.0);
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_converged_answer_is_cached() {
        let (mut engine, requests) = engine(1000, converged);
        let b = board(&[(7, 7, Stone::Black)]);

        let first = engine.query(&b).await.unwrap();
        assert_eq!(first.meta.source, Source::Complete);
        let second = engine.query(&b).await.unwrap();
        assert_eq!(second.meta.source, Source::Cache);
        assert_eq!(second.candidates, first.candidates);
        assert_eq!(second.meta.total_queries, 2);
        engine.close().await.unwrap();
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shallow_answer_is_asked_again() {
        let (mut engine, requests) = engine(1000, shallow);
        let b = board(&[(7, 7, Stone::Black)]);

        engine.query(&b).await.unwrap();
        let again = engine.query(&b).await.unwrap();
        assert_eq!(again.meta.source, Source::Complete);
        engine.close().await.unwrap();

        let ids: Vec<Value> = requests.lock().unwrap().iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("0"), json!("1")]);
    }

    #[tokio::test]
    async fn test_error_response_is_recoverable() {
        let (mut engine, _requests) = engine(1000, rejecting);
        let err = engine.query(&board(&[(7, 7, Stone::Black)])).await.unwrap_err();
        assert!(matches!(&err, EngineError::Rejected(msg) if msg.contains("Illegal")));
        assert!(!err.is_fatal());
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_matching_final_response() {
        let (mut engine, _requests) = engine(1000, noisy);
        let outcome = engine.query(&board(&[(7, 7, Stone::Black)])).await.unwrap();
        assert_eq!(outcome.candidates[0].visits, 500);
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_boards_send_nothing() {
        let (mut engine, requests) = engine(1000, shallow);
        let err = engine.query(&Board::new(19)).await.unwrap_err();
        assert!(matches!(err, EngineError::BoardSizeMismatch { .. }));
        let two_black = board(&[(0, 0, Stone::Black), (0, 1, Stone::Black)]);
        assert!(matches!(
            engine.query(&two_black).await.unwrap_err(),
            EngineError::Board(_)
        ));
        engine.close().await.unwrap();
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_process_is_fatal() {
        let (stdin, engine_in) = duplex(1024);
        let (engine_out, stdout) = duplex(1024);
        let (engine_err, stderr) = duplex(1024);
        drop((engine_in, engine_out, engine_err));
        let supervisor =
            ProcessSupervisor::from_streams(Box::new(stdin), Box::new(stdout), Box::new(stderr));
        let mut engine =
            JsonAnalysisEngine::with_supervisor(AnalysisConfig::default(), supervisor).unwrap();

        let err = engine.query(&board(&[(7, 7, Stone::Black)])).await.unwrap_err();
        assert!(err.is_fatal(), "unexpected error: {err}");
        engine.close().await.unwrap();
    }
}
