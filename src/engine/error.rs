use crate::core::{BoardError, CoordError};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start analysis process {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("analysis process is not accepting input")]
    ProcessUnavailable,
    #[error("analysis process exited while reading {stream} (status: {status})")]
    ProcessTerminated { stream: &'static str, status: String },
    #[error("shadow board diverged from observed board after replay")]
    ConsistencyViolation,
    #[error("observed board is {actual}x{actual}, engine is configured for {expected}x{expected}")]
    BoardSizeMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Coord(#[from] CoordError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("analysis request rejected: {0}")]
    Rejected(String),
    #[error("malformed analysis json: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Fatal errors leave the engine unusable; the caller owns restart.
    /// Everything else only skips the current cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Spawn { .. }
                | EngineError::ProcessUnavailable
                | EngineError::ProcessTerminated { .. }
                | EngineError::ConsistencyViolation
                | EngineError::Io(_)
        )
    }
}
