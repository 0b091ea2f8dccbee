pub mod cache;
pub mod candidate;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod json_analysis;
pub mod parser;
pub mod process;
pub mod sync;

pub use cache::{CacheEntry, CacheStats, ResultCache};
pub use candidate::MoveCandidate;
pub use config::{AnalysisConfig, EngineConfig, EngineKind, ProcessConfig};
pub use coordinator::{AnalysisSnapshot, Coordinator, CoordinatorStats, QueryMeta, QueryOutcome, Source};
pub use error::EngineError;
pub use json_analysis::{AnalysisRequest, AnalysisResponse, JsonAnalysisEngine};
pub use parser::{ParseOutcome, StreamParser};
pub use process::{CommandSender, LineReader, ProcessSupervisor};
pub use sync::{SyncProtocol, SyncReport, SyncState};

use crate::core::Board;

/// 盤面を受け取って候補手を返す解析エンジンのtrait
#[allow(async_fn_in_trait)]
pub trait AnalysisEngine {
    fn name(&self) -> &str;
    async fn query(&mut self, board: &Board) -> Result<QueryOutcome, EngineError>;
    async fn close(self) -> Result<(), EngineError>
    where
        Self: Sized;
}

/// Engine chosen by [`EngineConfig::kind`].
pub enum Engine {
    Gtp(Coordinator),
    Analysis(JsonAnalysisEngine),
}

impl Engine {
    pub fn start(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        match config.kind {
            EngineKind::Gtp => Coordinator::start(config).map(Engine::Gtp),
            EngineKind::Analysis => JsonAnalysisEngine::start(config).map(Engine::Analysis),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Gtp(_) => EngineKind::Gtp,
            Engine::Analysis(_) => EngineKind::Analysis,
        }
    }
}

impl AnalysisEngine for Engine {
    fn name(&self) -> &str {
        match self {
            Engine::Gtp(e) => e.name(),
            Engine::Analysis(e) => e.name(),
        }
    }

    async fn query(&mut self, board: &Board) -> Result<QueryOutcome, EngineError> {
        match self {
            Engine::Gtp(e) => e.query(board).await,
            Engine::Analysis(e) => e.query(board).await,
        }
    }

    async fn close(self) -> Result<(), EngineError> {
        match self {
            Engine::Gtp(e) => e.close().await,
            Engine::Analysis(e) => e.close().await,
        }
    }
}
