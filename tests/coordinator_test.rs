//! Full pipeline against an in-process fake engine speaking GTP over pipes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gomoku_assist::core::{Board, Stone};
use gomoku_assist::engine::{
    AnalysisConfig, Coordinator, EngineError, ProcessSupervisor, QueryOutcome, Source,
};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

type Transcript = Arc<Mutex<Vec<String>>>;

/// Acknowledges every command; answers the analyze command with one record
/// for J10 carrying `visits`. The first `rejections` analyze commands are
/// refused with `?` and produce no records.
async fn fake_engine(
    stdin: DuplexStream,
    mut stdout: DuplexStream,
    stderr: DuplexStream,
    visits: u64,
    mut rejections: usize,
    transcript: Transcript,
) {
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(cmd)) = lines.next_line().await {
        transcript.lock().unwrap().push(cmd.clone());
        let reply = if !cmd.starts_with("kata-analyze") {
            "=\n\n".to_string()
        } else if rejections > 0 {
            rejections -= 1;
            "? analysis unavailable\n\n".to_string()
        } else {
            format!(
                "=\ninfo move J10 visits {visits} winrate 0.55 order 0 pv J10 H9 pvVisits {visits} 40\n"
            )
        };
        if stdout.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
    drop(stderr);
}

fn start(threshold: u64, visits: u64) -> (Coordinator, Transcript) {
    start_with_rejections(threshold, visits, 0)
}

fn start_with_rejections(threshold: u64, visits: u64, rejections: usize) -> (Coordinator, Transcript) {
    let (stdin, engine_in) = duplex(64 * 1024);
    let (engine_out, stdout) = duplex(64 * 1024);
    let (engine_err, stderr) = duplex(1024);
    let transcript: Transcript = Arc::default();
    tokio::spawn(fake_engine(
        engine_in,
        engine_out,
        engine_err,
        visits,
        rejections,
        Arc::clone(&transcript),
    ));
    let supervisor =
        ProcessSupervisor::from_streams(Box::new(stdin), Box::new(stdout), Box::new(stderr));
    let config = AnalysisConfig {
        confidence_threshold: threshold,
        ..AnalysisConfig::default()
    };
    let coordinator = Coordinator::with_supervisor(config, supervisor).unwrap();
    (coordinator, transcript)
}

fn count(transcript: &Transcript, prefix: &str) -> usize {
    transcript
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.starts_with(prefix))
        .count()
}

fn board(stones: &[(usize, usize, Stone)]) -> Board {
    let mut b = Board::new(15);
    for &(r, c, s) in stones {
        b.place(r, c, s).unwrap();
    }
    b
}

/// Re-queries until the outcome comes from `source` or the attempts run out.
async fn query_until(coord: &mut Coordinator, b: &Board, source: Source) -> QueryOutcome {
    for _ in 0..200 {
        let outcome = coord.query(b).await.unwrap();
        if outcome.meta.source == source {
            return outcome;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no {source:?} outcome");
}

#[tokio::test]
async fn test_below_threshold_is_live_but_not_cached() {
    let (mut coord, transcript) = start(1000, 500);
    let b = board(&[(7, 7, Stone::Black)]);

    let outcome = query_until(&mut coord, &b, Source::Live).await;
    assert_eq!(outcome.player, Stone::White);
    assert_eq!(outcome.candidates[0].coord, "J10");
    assert_eq!(outcome.meta.best_visits, 500);

    let stats = coord.stats().await;
    assert_eq!(stats.cache.len, 0);
    coord.close().await.unwrap();

    // キャッシュミスのたびに解析を出し直す
    assert_eq!(count(&transcript, "kata-analyze") as u64, stats.total_queries);
}

#[tokio::test]
async fn test_rejected_analysis_is_requested_again() {
    let (mut coord, transcript) = start_with_rejections(1000, 500, 2);
    let b = board(&[(7, 7, Stone::Black)]);

    let outcome = query_until(&mut coord, &b, Source::Live).await;
    assert_eq!(outcome.candidates[0].coord, "J10");
    assert!(outcome.meta.total_queries >= 3);
    coord.close().await.unwrap();
    assert!(count(&transcript, "kata-analyze") >= 3);
}

#[tokio::test]
async fn test_converged_result_served_from_cache() {
    let (mut coord, transcript) = start(1000, 5000);
    let b = board(&[(7, 7, Stone::Black)]);

    let outcome = query_until(&mut coord, &b, Source::Cache).await;
    assert_eq!(outcome.player, Stone::White);
    assert_eq!(outcome.candidates[0].visits, 5000);
    assert_eq!(outcome.candidates[0].pv, vec!["J10", "H9"]);
    assert_eq!(coord.stats().await.cache.len, 1);

    let sent = transcript.lock().unwrap().clone();
    assert_eq!(
        &sent[..4],
        &["stop", "play B H8", "stop", "kata-analyze W 10 pvVisits true"]
    );
    coord.close().await.unwrap();

    // 同期前, 各解析要求前, 収束時, 終了時にそれぞれ stop
    assert_eq!(
        count(&transcript, "stop"),
        count(&transcript, "kata-analyze") + 3
    );
}

#[tokio::test]
async fn test_removed_stone_resets_engine_record() {
    let (mut coord, transcript) = start(1000, 10);
    let first = board(&[(7, 7, Stone::Black), (7, 8, Stone::White)]);
    let outcome = coord.query(&first).await.unwrap();
    assert!(!outcome.meta.refreshed);

    let second = board(&[(3, 3, Stone::Black)]);
    let outcome = coord.query(&second).await.unwrap();
    assert!(outcome.meta.refreshed);
    assert_eq!(outcome.meta.refresh_count, 1);
    assert_eq!(outcome.meta.total_queries, 2);

    coord.close().await.unwrap();
    let sent = transcript.lock().unwrap().clone();
    let reset_at = sent.iter().position(|c| c == "clear_board").unwrap();
    assert_eq!(sent[reset_at + 1], "play B D12");
}

#[tokio::test]
async fn test_recoverable_errors_send_nothing() {
    let (mut coord, _transcript) = start(1000, 10);

    let err = coord.query(&Board::new(19)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::BoardSizeMismatch {
            expected: 15,
            actual: 19
        }
    ));
    assert!(!err.is_fatal());

    let two_black = board(&[(0, 0, Stone::Black), (0, 1, Stone::Black)]);
    let err = coord.query(&two_black).await.unwrap_err();
    assert!(matches!(err, EngineError::Board(_)));
    assert!(!err.is_fatal());

    assert_eq!(coord.stats().await.commands_sent, 0);
    coord.close().await.unwrap();
}

#[tokio::test]
async fn test_dead_engine_is_fatal() {
    let (stdin, engine_in) = duplex(1024);
    let (engine_out, stdout) = duplex(1024);
    let (engine_err, stderr) = duplex(1024);
    drop((engine_in, engine_out, engine_err));

    let supervisor =
        ProcessSupervisor::from_streams(Box::new(stdin), Box::new(stdout), Box::new(stderr));
    let mut coord = Coordinator::with_supervisor(AnalysisConfig::default(), supervisor).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = coord.query(&board(&[(7, 7, Stone::Black)])).await.unwrap_err();
    assert!(err.is_fatal(), "unexpected error: {err}");
    coord.close().await.unwrap();
}
