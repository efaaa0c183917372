//! One YAML file for the whole CBIR stack.
//!
//! Each section maps onto the typed config of the crate that owns it; every
//! section may be omitted and falls back to its defaults.
//!
//! ```text
//! index     -> index::IndexConfig
//! matcher   -> matcher::MatchConfig
//! retrieval -> retrieval::RetrievalConfig
//! ingest    -> detectors computed at ingest
//! ```
//!
//! ```yaml
//! version: "1.0"
//! name: "holiday photos"
//!
//! index:
//!   backend: "redb"
//!   path: "/var/lib/cbir/index.redb"
//!   compression: "zstd"
//!   compression_level: 3
//!
//! matcher:
//!   version: 1
//!   strategy: "nearest_neighbor"
//!   goodmatch_threshold: 0.7
//!   goodmatch_percent: 0.005
//!   use_parallel: false
//!
//! retrieval:
//!   workers: 8
//!   default_max: 50
//!   eval_k: 8
//!
//! ingest:
//!   detectors: ["brisk", "orb", "sift", "fast", "simple_blob"]
//! ```

use std::fs;
use std::path::Path;

use descriptor::DetectorType;
use index::{BackendConfig, CompressionCodec, CompressionConfig, IndexConfig};
use matcher::{MatchConfig, MatchStrategy};
use retrieval::RetrievalConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Top-level YAML configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CbirConfig {
    /// Must be `"1.0"` or `"1"`.
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub index: IndexYamlConfig,

    #[serde(default)]
    pub matcher: MatchYamlConfig,

    #[serde(default)]
    pub retrieval: RetrievalYamlConfig,

    #[serde(default)]
    pub ingest: IngestYamlConfig,
}

impl CbirConfig {
    /// Read, parse and validate `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    /// Parse and validate an in-memory document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let parsed: Self = serde_yaml::from_str(yaml)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if !matches!(self.version.as_str(), "1.0" | "1") {
            return Err(ConfigLoadError::UnsupportedVersion(self.version.clone()));
        }

        self.index.validate()?;
        self.matcher.validate()?;
        self.retrieval.validate()?;
        self.ingest.validate()?;
        Ok(())
    }

    pub fn index_config(&self) -> Result<IndexConfig, ConfigLoadError> {
        self.index.to_config()
    }

    pub fn match_config(&self) -> Result<MatchConfig, ConfigLoadError> {
        self.matcher.to_config()
    }

    pub fn retrieval_config(&self) -> Result<RetrievalConfig, ConfigLoadError> {
        Ok(self.retrieval.to_config(self.match_config()?))
    }

    pub fn ingest_detectors(&self) -> Result<Vec<DetectorType>, ConfigLoadError> {
        self.ingest.detectors()
    }
}

impl Default for CbirConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            index: IndexYamlConfig::default(),
            matcher: MatchYamlConfig::default(),
            retrieval: RetrievalYamlConfig::default(),
            ingest: IngestYamlConfig::default(),
        }
    }
}

/// `index:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexYamlConfig {
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Database file, required by the `redb` backend.
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default = "default_compression")]
    pub compression: String,

    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl IndexYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        self.to_config().map(|_| ())
    }

    fn to_config(&self) -> Result<IndexConfig, ConfigLoadError> {
        let backend = match self.backend.as_str() {
            "in_memory" => BackendConfig::in_memory(),
            "redb" => match &self.path {
                Some(path) if !path.trim().is_empty() => BackendConfig::redb(path.clone()),
                _ => {
                    return Err(ConfigLoadError::MissingField(
                        "index.path is required when backend is 'redb'".to_string(),
                    ))
                }
            },
            other => {
                return Err(ConfigLoadError::Validation(format!(
                    "index.backend must be one of: [\"in_memory\", \"redb\"], got {other:?}"
                )))
            }
        };
        let codec = match self.compression.as_str() {
            "none" => CompressionCodec::None,
            "zstd" => CompressionCodec::Zstd,
            other => {
                return Err(ConfigLoadError::Validation(format!(
                    "index.compression must be one of: [\"none\", \"zstd\"], got {other:?}"
                )))
            }
        };
        if !(1..=22).contains(&self.compression_level) {
            return Err(ConfigLoadError::Validation(
                "index.compression_level must be in 1..=22".to_string(),
            ));
        }
        Ok(IndexConfig::new()
            .with_backend(backend)
            .with_compression(CompressionConfig::new(codec, self.compression_level)))
    }
}

impl Default for IndexYamlConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
            compression: default_compression(),
            compression_level: default_compression_level(),
        }
    }
}

/// `matcher:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchYamlConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// `nearest_neighbor` or `ratio_test`.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    #[serde(default = "default_goodmatch_threshold")]
    pub goodmatch_threshold: f64,

    #[serde(default = "default_goodmatch_percent")]
    pub goodmatch_percent: f64,

    #[serde(default)]
    pub use_parallel: bool,
}

impl MatchYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.version == 0 {
            return Err(ConfigLoadError::Validation(
                "matcher.version must be >= 1".to_string(),
            ));
        }
        self.to_config().map(|_| ())
    }

    fn to_config(&self) -> Result<MatchConfig, ConfigLoadError> {
        let strategy = match self.strategy.as_str() {
            "nearest_neighbor" => MatchStrategy::NearestNeighbor,
            "ratio_test" => MatchStrategy::RatioTest {
                goodmatch_threshold: self.goodmatch_threshold,
                goodmatch_percent: self.goodmatch_percent,
            },
            other => {
                return Err(ConfigLoadError::Validation(format!(
                    "matcher.strategy must be one of: [\"nearest_neighbor\", \"ratio_test\"], got {other:?}"
                )))
            }
        };
        let cfg = MatchConfig::new()
            .with_strategy(strategy)
            .with_parallel(self.use_parallel);
        cfg.validate()
            .map_err(|e| ConfigLoadError::Validation(format!("matcher: {e}")))?;
        Ok(cfg)
    }
}

impl Default for MatchYamlConfig {
    fn default() -> Self {
        Self {
            version: 1,
            strategy: default_strategy(),
            goodmatch_threshold: default_goodmatch_threshold(),
            goodmatch_percent: default_goodmatch_percent(),
            use_parallel: false,
        }
    }
}

/// `retrieval:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalYamlConfig {
    /// Scan pool threads, `0` for one per core.
    #[serde(default)]
    pub workers: usize,

    /// Result cap for queries that leave `max` unset; `0` keeps everything.
    #[serde(default)]
    pub default_max: usize,

    #[serde(default = "default_eval_k")]
    pub eval_k: usize,
}

impl RetrievalYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.eval_k == 0 {
            return Err(ConfigLoadError::Validation(
                "retrieval.eval_k must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    fn to_config(&self, matcher: MatchConfig) -> RetrievalConfig {
        RetrievalConfig::new()
            .with_workers(self.workers)
            .with_default_max(self.default_max)
            .with_eval_k(self.eval_k)
            .with_matcher(matcher)
    }
}

impl Default for RetrievalYamlConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            default_max: 0,
            eval_k: default_eval_k(),
        }
    }
}

/// `ingest:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestYamlConfig {
    /// Detector families computed for every ingested image.
    #[serde(default = "default_detectors")]
    pub detectors: Vec<String>,
}

impl IngestYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        let detectors = self.detectors()?;
        if detectors.is_empty() {
            return Err(ConfigLoadError::MissingField("ingest.detectors".to_string()));
        }
        for (i, d) in detectors.iter().enumerate() {
            if detectors[..i].contains(d) {
                return Err(ConfigLoadError::Validation(format!(
                    "ingest.detectors lists {d} twice"
                )));
            }
        }
        Ok(())
    }

    fn detectors(&self) -> Result<Vec<DetectorType>, ConfigLoadError> {
        self.detectors
            .iter()
            .map(|name| {
                name.parse()
                    .map_err(|e| ConfigLoadError::Validation(format!("ingest.detectors: {e}")))
            })
            .collect()
    }
}

impl Default for IngestYamlConfig {
    fn default() -> Self {
        Self {
            detectors: default_detectors(),
        }
    }
}

// serde defaults
fn default_version() -> u32 {
    1
}
fn default_backend() -> String {
    "in_memory".to_string()
}
fn default_compression() -> String {
    "zstd".to_string()
}
fn default_compression_level() -> i32 {
    3
}
fn default_strategy() -> String {
    "nearest_neighbor".to_string()
}
fn default_goodmatch_threshold() -> f64 {
    0.7
}
fn default_goodmatch_percent() -> f64 {
    0.005
}
fn default_eval_k() -> usize {
    8
}
fn default_detectors() -> Vec<String> {
    crate::DEFAULT_DETECTORS
        .iter()
        .map(|d| d.name().to_string())
        .collect()
}
