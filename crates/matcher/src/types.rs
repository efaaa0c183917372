use descriptor::{DescriptorError, DetectorType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw value reported for an [`MatchDistance::Incomparable`] outcome.
pub const INCOMPARABLE: f64 = -1.0;

/// How nearest-neighbor distances are turned into one score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Mean of every query row's nearest model distance.
    #[default]
    NearestNeighbor,
    /// Lowe-style ratio test: keep a query row only when its best distance is
    /// clearly better than its second best, and require enough kept rows.
    RatioTest {
        /// A row is kept when `best <= goodmatch_threshold * second_best`.
        #[serde(default = "MatchStrategy::default_goodmatch_threshold")]
        goodmatch_threshold: f64,
        /// Minimum `kept / min(model_rows, query_rows)`, exclusive.
        #[serde(default = "MatchStrategy::default_goodmatch_percent")]
        goodmatch_percent: f64,
    },
}

impl MatchStrategy {
    pub(crate) fn default_goodmatch_threshold() -> f64 {
        0.7
    }

    pub(crate) fn default_goodmatch_percent() -> f64 {
        0.005
    }

    /// Ratio test with the default parameters.
    pub fn ratio_test() -> Self {
        MatchStrategy::RatioTest {
            goodmatch_threshold: Self::default_goodmatch_threshold(),
            goodmatch_percent: Self::default_goodmatch_percent(),
        }
    }
}

/// Matcher configuration.
///
/// Cheap to copy and serde-friendly so it can be embedded in higher-level configs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct MatchConfig {
    #[serde(default)]
    pub strategy: MatchStrategy,
    /// Run the per-row nearest-neighbor search on the rayon pool.
    #[serde(default)]
    pub use_parallel: bool,
}

impl MatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_ratio_test(mut self, goodmatch_threshold: f64, goodmatch_percent: f64) -> Self {
        self.strategy = MatchStrategy::RatioTest {
            goodmatch_threshold,
            goodmatch_percent,
        };
        self
    }

    pub fn with_parallel(mut self, use_parallel: bool) -> Self {
        self.use_parallel = use_parallel;
        self
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        if let MatchStrategy::RatioTest {
            goodmatch_threshold,
            goodmatch_percent,
        } = self.strategy
        {
            if !(goodmatch_threshold > 0.0 && goodmatch_threshold <= 1.0) {
                return Err(MatchError::InvalidConfig(
                    "goodmatch_threshold must be in (0.0, 1.0]".into(),
                ));
            }
            if !(0.0..1.0).contains(&goodmatch_percent) {
                return Err(MatchError::InvalidConfig(
                    "goodmatch_percent must be in [0.0, 1.0)".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Aggregate distance between a model and a query descriptor matrix.
///
/// `Incomparable` is a value, not an error: it means there was nothing to
/// compare (an empty side, or no row survived filtering). It is never equal to
/// a perfect `Mean(0.0)` match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MatchDistance {
    Mean(f64),
    Incomparable,
}

impl MatchDistance {
    /// Numeric form: the mean, or [`INCOMPARABLE`].
    pub fn raw(self) -> f64 {
        match self {
            MatchDistance::Mean(d) => d,
            MatchDistance::Incomparable => INCOMPARABLE,
        }
    }

    /// Inverse of [`MatchDistance::raw`]: any negative value is incomparable.
    pub fn from_raw(raw: f64) -> Self {
        if raw < 0.0 {
            MatchDistance::Incomparable
        } else {
            MatchDistance::Mean(raw)
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            MatchDistance::Mean(d) => Some(d),
            MatchDistance::Incomparable => None,
        }
    }

    pub fn is_comparable(self) -> bool {
        matches!(self, MatchDistance::Mean(_))
    }
}

/// Full outcome of one match, as reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchReport {
    pub detector: DetectorType,
    pub distance: MatchDistance,
    pub model_rows: usize,
    pub query_rows: usize,
    /// Query rows that contributed to the aggregate.
    pub matched_rows: usize,
}

/// Errors produced by the matching layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid match config: {0}")]
    InvalidConfig(String),
    /// Descriptors of different detector families cannot be compared.
    #[error("detector mismatch: model is {model}, query is {query}")]
    DetectorMismatch {
        model: DetectorType,
        query: DetectorType,
    },
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}
