//! Feature extraction collaborator.
//!
//! Keypoint detection, descriptor computation and hashing live outside this
//! workspace. Implementations plug in through [`FeatureExtractor`]; the
//! provided methods assemble the per-image [`DescriptorSet`] and [`HashPair`].

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::detector::DetectorType;
use crate::error::DescriptorError;
use crate::hash::{HashKind, HashPair};
use crate::matrix::{DescriptorSet, MatrixDescriptor};

/// Errors surfaced by a [`FeatureExtractor`].
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),
    #[error("detector {0} is not supported by this extractor")]
    UnsupportedDetector(DetectorType),
    #[error("feature extraction failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Pure, thread-safe source of descriptors and hashes for an image.
pub trait FeatureExtractor: Send + Sync {
    /// Descriptor matrix of `image` for one detector family.
    ///
    /// An image with no detectable keypoints yields an empty matrix, not an error.
    /// Keypoint-only detectors (Fast, SimpleBlob, Default) describe their
    /// keypoints with a descriptor family of the implementation's choosing.
    fn extract_descriptor(
        &self,
        image: &Path,
        detector: DetectorType,
    ) -> Result<MatrixDescriptor, ExtractError>;

    /// Raw hash bytes of `image`.
    fn compute_hash(&self, image: &Path, kind: HashKind) -> Result<Vec<u8>, ExtractError>;

    /// Both hashes, hex encoded.
    fn compute_hashes(&self, image: &Path) -> Result<HashPair, ExtractError> {
        let perceptual = self.compute_hash(image, HashKind::Perceptual)?;
        let color_moment = self.compute_hash(image, HashKind::ColorMoment)?;
        Ok(HashPair::from_bytes(&perceptual, &color_moment)?)
    }

    /// One descriptor per requested detector. Duplicates in `detectors` are rejected.
    fn extract_set(
        &self,
        image: &Path,
        detectors: &[DetectorType],
    ) -> Result<DescriptorSet, ExtractError> {
        let entries = detectors
            .iter()
            .map(|&detector| Ok((detector, self.extract_descriptor(image, detector)?)))
            .collect::<Result<Vec<_>, ExtractError>>()?;
        Ok(DescriptorSet::new(entries)?)
    }
}
