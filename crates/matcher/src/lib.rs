//! # CBIR Matcher (`matcher`)
//!
//! ## Purpose
//!
//! `matcher` scores how far one descriptor matrix is from another. For every
//! row of the query matrix it finds the nearest row of the model matrix by
//! brute force, using the metric the detector's profile selects (Hamming for
//! binary families, Euclidean otherwise), and averages those distances.
//!
//! The score is directional: `score(model, query)` generally differs from
//! `score(query, model)`. An empty side, or a query where no row survives the
//! configured filter, is [`MatchDistance::Incomparable`] (raw value `-1`),
//! never a perfect match.
//!
//! ## Core Types
//!
//! - [`MatchConfig`]: strategy plus the `use_parallel` switch.
//! - [`MatchStrategy`]: plain nearest neighbor (default) or the opt-in ratio
//!   test (`goodmatch_threshold` 0.7, `goodmatch_percent` 0.005).
//! - [`DescriptorMatcher`]: matcher for one [`descriptor::DetectorType`].
//! - [`TrainedMatcher`]: a matcher bound to a borrowed model matrix, reused for
//!   many queries.
//!
//! ## Example Usage
//!
//! ```
//! use descriptor::{DetectorType, MatrixDescriptor};
//! use matcher::{DescriptorMatcher, MatchConfig, MatchDistance};
//!
//! let model = MatrixDescriptor::new(2, 1, 1, vec![0x00u8, 0xFF]).unwrap();
//! let query = MatrixDescriptor::new(1, 1, 1, vec![0x0Fu8]).unwrap();
//!
//! let matcher = DescriptorMatcher::new(DetectorType::Orb, MatchConfig::default()).unwrap();
//! let trained = matcher.train(&model).unwrap();
//! assert_eq!(trained.distance(&query).unwrap(), MatchDistance::Mean(4.0));
//! ```
//!
//! ## Observability
//!
//! Install a [`MatchMetrics`] implementation via [`set_match_metrics`] to
//! record per-match row counts and latency. This is typically done once during
//! service startup.

pub mod engine;
pub mod metrics;
pub mod types;

pub use crate::engine::{DescriptorMatcher, TrainedMatcher};
pub use crate::metrics::{set_match_metrics, MatchMetrics};
pub use crate::types::{
    MatchConfig, MatchDistance, MatchError, MatchReport, MatchStrategy, INCOMPARABLE,
};
