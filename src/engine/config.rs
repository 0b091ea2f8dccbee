use crate::core::coord::MAX_BOARD_SIZE;
use crate::engine::error::EngineError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which protocol the external process speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// GTP with streaming `kata-analyze` output.
    #[default]
    Gtp,
    /// One JSON request and one JSON response per board.
    Analysis,
}

impl EngineKind {
    /// Mode argument the process expects for this protocol.
    pub fn process_mode(self) -> &'static str {
        match self {
            EngineKind::Gtp => "gtp",
            EngineKind::Analysis => "analysis",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub version: String,
    #[serde(default)]
    pub kind: EngineKind,
    pub process: ProcessConfig,
    pub analysis: AnalysisConfig,
}

/// 外部エンジンの起動設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub executable: PathBuf,
    /// First argument, selects the engine's operating mode.
    pub mode: String,
    pub config_path: PathBuf,
    pub model_path: PathBuf,
    /// `key=value` passed through `-override-config`, e.g. `basicRule=RENJU`.
    #[serde(default)]
    pub override_config: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub board_size: usize,
    pub top_k: usize,
    /// Top candidate visits must exceed this before a result is cached.
    pub confidence_threshold: u64,
    pub cache_capacity: usize,
    pub analyze_command: String,
    /// Report interval passed to the analyze command (centiseconds).
    pub interval: u32,
    pub extra_flags: String,
    pub record_marker: String,
    /// Visit budget sent with JSON analysis requests.
    #[serde(default)]
    pub max_visits: Option<u64>,
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&config_str)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("using default engine config: {e:#}");
            Self::default()
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json + "\n")
            .with_context(|| format!("writing {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let a = &self.analysis;
        if !(5..=MAX_BOARD_SIZE).contains(&a.board_size) {
            return Err(EngineError::Config(format!(
                "board_size must be between 5 and {MAX_BOARD_SIZE}, got {}",
                a.board_size
            )));
        }
        if a.top_k == 0 {
            return Err(EngineError::Config("top_k must be positive".into()));
        }
        if a.cache_capacity == 0 {
            return Err(EngineError::Config("cache_capacity must be positive".into()));
        }
        if a.record_marker.trim().is_empty() || a.record_marker.contains(char::is_whitespace) {
            return Err(EngineError::Config(
                "record_marker must be a single token".into(),
            ));
        }
        let expected_mode = self.kind.process_mode();
        if self.process.mode != expected_mode {
            return Err(EngineError::Config(format!(
                "{:?} engine needs process mode {expected_mode:?}, got {:?}",
                self.kind, self.process.mode
            )));
        }
        if let Some(kv) = &self.process.override_config {
            if !kv.contains('=') {
                return Err(EngineError::Config(format!(
                    "override_config must look like key=value, got {kv:?}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            board_size: 15,
            top_k: 7,
            confidence_threshold: 2000,
            cache_capacity: 1000,
            analyze_command: "kata-analyze".to_string(),
            interval: 10,
            extra_flags: "pvVisits true".to_string(),
            record_marker: "info".to_string(),
            max_visits: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            version: "1.0".to_string(),
            kind: EngineKind::default(),
            process: ProcessConfig {
                executable: PathBuf::from("engine/gom15x_trt"),
                mode: "gtp".to_string(),
                config_path: PathBuf::from("engine/gtp_engine.cfg"),
                model_path: PathBuf::from("weights/zhizi_renju28b_s1600.bin.gz"),
                override_config: Some("basicRule=FREESTYLE".to_string()),
            },
            analysis: AnalysisConfig::default(),
        }
    }
}
