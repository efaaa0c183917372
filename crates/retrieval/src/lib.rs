//! # CBIR Retrieval (`retrieval`)
//!
//! Online ranking and offline calibration over an [`index::ImageIndex`].
//!
//! - [`RetrievalEngine::rank`] scores every stored image against a query, in
//!   hash mode (perceptual and color-moment distances) or descriptor mode
//!   (one detector family), and returns [`RankedResult`]s best first.
//! - [`RetrievalEngine::calibrate`] derives a per-category cutoff as the
//!   ceiling of the largest distance between a representative query and the
//!   category's own members.
//! - [`RetrievalEngine::evaluate`] keeps every image under a threshold and
//!   reports precision over all kept images (`rate1`) and over the top `k`
//!   (`rate2`).
//!
//! Candidate scans run on a dedicated rayon pool ([`ScanPool`]) and stop at
//! the next candidate once their [`CancellationToken`] is cancelled.
//!
//! ```
//! use std::sync::Arc;
//!
//! use descriptor::{DescriptorSet, DetectorType, HashPair, MatrixDescriptor, StandardHashComparator};
//! use index::{ImageIndex, IndexConfig, NewImage};
//! use retrieval::{CancellationToken, QueryFeatures, QueryRequest, RetrievalConfig, RetrievalEngine};
//!
//! let orb = |rows: &[u8]| MatrixDescriptor::new(rows.len(), 1, 1, rows.to_vec()).unwrap();
//! let index = Arc::new(ImageIndex::new(IndexConfig::default()).unwrap());
//! index
//!     .insert_image(NewImage {
//!         hashes: HashPair::from_bytes(&[0xAB], &[0u8; 8]).unwrap(),
//!         external_file: Some("cat.jpg".into()),
//!         categories: vec!["cats".into()],
//!         descriptors: DescriptorSet::new([(DetectorType::Orb, orb(&[0x0F]))]).unwrap(),
//!     })
//!     .unwrap();
//!
//! let engine = RetrievalEngine::new(
//!     index,
//!     Arc::new(StandardHashComparator),
//!     RetrievalConfig::default().with_workers(2),
//! )
//! .unwrap();
//! let query = QueryFeatures {
//!     hashes: None,
//!     descriptors: DescriptorSet::new([(DetectorType::Orb, orb(&[0x0F]))]).unwrap(),
//! };
//!
//! let req = QueryRequest::descriptor(DetectorType::Orb, 10.0);
//! let results = engine.rank(&query, &req, &CancellationToken::new()).unwrap();
//! assert_eq!(results[0].category, "cats");
//! assert_eq!(results[0].relevance_text, "100.00%");
//! ```

pub mod calibrate;
mod engine;
pub mod evaluate;
pub mod ranker;
mod scan;
mod types;

pub use crate::engine::{RetrievalConfig, RetrievalEngine};
pub use crate::scan::{CancelOnDrop, CancellationToken, ScanPool};
pub use crate::types::{
    Calibration, CategoryReport, Comparison, ComparisonMode, Evaluation, EvaluationHit,
    QueryFeatures, QueryRequest, RankedResult, RetrievalError,
};
