use std::time::Duration;

use descriptor::{DescriptorError, DescriptorSet, DetectorType, HashPair};
use index::IndexError;
use matcher::{MatchDistance, MatchError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Which signal a query is ranked on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Perceptual and color-moment hashes.
    Hashes,
    /// Local-feature descriptors of one detector family.
    #[default]
    Descriptor,
}

/// A ranking request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    pub mode: ComparisonMode,
    /// Exact matches only: equal hashes, or a descriptor score of zero.
    #[serde(default)]
    pub strict: bool,
    /// Distance cutoff. In descriptor mode `0` selects absolute ranking.
    #[serde(default)]
    pub threshold: f64,
    /// Detector family used in descriptor mode.
    #[serde(default = "QueryRequest::default_detector")]
    pub detector: DetectorType,
    /// Maximum number of results; `Some(0)` returns everything and `None`
    /// takes the engine's `default_max`.
    #[serde(default)]
    pub max: Option<usize>,
}

impl QueryRequest {
    fn default_detector() -> DetectorType {
        DetectorType::Orb
    }

    pub fn hashes(threshold: f64) -> Self {
        Self {
            mode: ComparisonMode::Hashes,
            strict: false,
            threshold,
            detector: Self::default_detector(),
            max: None,
        }
    }

    pub fn descriptor(detector: DetectorType, threshold: f64) -> Self {
        Self {
            mode: ComparisonMode::Descriptor,
            strict: false,
            threshold,
            detector,
            max: None,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.threshold.is_nan() || self.threshold < 0.0 {
            return Err(RetrievalError::InvalidThreshold(self.threshold));
        }
        if self.mode == ComparisonMode::Hashes && !self.strict && self.threshold <= 0.0 {
            return Err(RetrievalError::InvalidRequest(
                "non-strict hash queries need a threshold > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Features of a query image, computed by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFeatures {
    /// `None` when only descriptors were computed.
    pub hashes: Option<HashPair>,
    pub descriptors: DescriptorSet,
}

impl QueryFeatures {
    pub(crate) fn require_hashes(&self) -> Result<&HashPair, RetrievalError> {
        self.hashes
            .as_ref()
            .ok_or_else(|| RetrievalError::InvalidRequest("query hashes were not computed".into()))
    }
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    pub image_id: Uuid,
    /// First category of the image, empty when it has none.
    pub category: String,
    pub file_reference: String,
    pub relevance: f64,
    pub relevance_text: String,
}

/// Direct comparison of two images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    Hashes { perceptual: f64, color_moment: f64 },
    Descriptor(MatchDistance),
}

/// Outcome of threshold calibration for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub category: String,
    pub detector: DetectorType,
    /// `ceil(max distance)`, or `NaN` when no member was comparable.
    pub threshold: f64,
    /// Comparable distances, in category member order.
    pub distances: Vec<(Uuid, f64)>,
    /// Members without a descriptor of the detector, or with an incomparable score.
    pub skipped: usize,
}

impl Calibration {
    pub fn is_defined(&self) -> bool {
        !self.threshold.is_nan()
    }
}

/// One image kept by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationHit {
    pub image_id: Uuid,
    pub in_target: bool,
    pub score: f64,
    pub relevance: f64,
}

/// Precision of a threshold against the whole corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub category: String,
    pub detector: DetectorType,
    pub threshold: f64,
    pub k: usize,
    /// Kept images, best first.
    pub hits: Vec<EvaluationHit>,
    /// Kept images in the target category over all kept images.
    pub rate1: f64,
    /// Target images among the top `k` over `k`.
    pub rate2: f64,
}

impl Evaluation {
    /// No image fell inside the threshold, so both rates are `NaN`.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn kept_in_target(&self) -> usize {
        self.hits.iter().filter(|h| h.in_target).count()
    }
}

/// Calibrate-then-evaluate result for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryReport {
    pub calibration: Calibration,
    /// Absent when the calibration was undefined.
    pub evaluation: Option<Evaluation>,
    pub elapsed: Duration,
}

/// Errors produced by the retrieval layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid threshold {0}: must be a number >= 0")]
    InvalidThreshold(f64),
    /// The query image has no descriptor of the requested detector.
    #[error("query has no descriptor for detector {0}")]
    QueryNotFound(DetectorType),
    #[error("scan cancelled")]
    Cancelled,
    #[error("scan pool error: {0}")]
    Pool(String),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl RetrievalError {
    pub fn is_not_found(&self) -> bool {
        match self {
            RetrievalError::QueryNotFound(_) => true,
            RetrievalError::Index(err) => err.is_not_found(),
            RetrievalError::Descriptor(err) => err.is_not_found(),
            RetrievalError::Match(MatchError::Descriptor(err)) => err.is_not_found(),
            _ => false,
        }
    }
}
