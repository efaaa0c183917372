//! # CBIR Descriptor Model (`descriptor`)
//!
//! The leaf of the retrieval stack. Everything above it (matcher, index,
//! retrieval) speaks in these types.
//!
//! ## What lives here
//!
//! - [`MatrixDescriptor`]: a `rows x cols` matrix of fixed-size elements kept
//!   as one shared byte buffer. One row per keypoint.
//! - [`DescriptorSet`]: at most one matrix per [`DetectorType`] for an image.
//! - [`DetectorType`] and its static [`DetectorProfile`] table, which decides
//!   the [`DistanceMetric`] for a detector.
//! - [`hash`]: the upper-case hex codec for perceptual and color-moment
//!   hashes plus the [`HashComparator`] contract.
//! - [`extract`]: the [`FeatureExtractor`] trait implemented by whatever
//!   computes descriptors and hashes from image files.
//!
//! ## Example
//!
//! ```
//! use descriptor::{metric_for, DescriptorSet, DetectorType, DistanceMetric, MatrixDescriptor};
//!
//! let orb = MatrixDescriptor::new(2, 4, 1, vec![0u8, 1, 2, 3, 4, 5, 6, 7]).unwrap();
//! let set = DescriptorSet::new([(DetectorType::Orb, orb)]).unwrap();
//!
//! assert_eq!(set.get(DetectorType::Orb).unwrap().rows(), 2);
//! assert!(set.get(DetectorType::Sift).unwrap_err().is_not_found());
//! assert_eq!(metric_for(DetectorType::Orb), DistanceMetric::Hamming);
//! ```

mod detector;
mod error;
pub mod extract;
pub mod hash;
mod matrix;
pub mod metric;

pub use crate::detector::{metric_for, DetectorProfile, DetectorType};
pub use crate::error::DescriptorError;
pub use crate::extract::{ExtractError, FeatureExtractor};
pub use crate::hash::{HashComparator, HashKind, HashPair, StandardHashComparator};
pub use crate::matrix::{DescriptorRecord, DescriptorSet, MatrixDescriptor};
pub use crate::metric::{hamming_bits, DistanceMetric, RowKernel};
