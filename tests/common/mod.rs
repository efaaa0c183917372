//! Shared fixtures for the integration tests.
//!
//! Images are never decoded: [`SyntheticExtractor`] serves registered
//! features by path, so distances are known exactly. Binary detectors see
//! one `u8` row per entry of `rows` (Hamming distance is the popcount of the
//! XOR); Sift sees the same values as single `f32` columns.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use cbir::{
    Cbir, DetectorType, ExtractError, FeatureExtractor, HashKind, MatrixDescriptor,
    RetrievalConfig, StandardHashComparator,
};

#[derive(Debug, Clone)]
pub struct SyntheticImage {
    pub perceptual: u8,
    pub color_moment: f64,
    pub rows: Vec<u8>,
}

impl SyntheticImage {
    pub fn new(perceptual: u8, color_moment: f64, rows: &[u8]) -> Self {
        Self {
            perceptual,
            color_moment,
            rows: rows.to_vec(),
        }
    }
}

#[derive(Default)]
pub struct SyntheticExtractor {
    images: RwLock<HashMap<PathBuf, SyntheticImage>>,
    descriptor_calls: AtomicUsize,
    unhashable: RwLock<HashSet<PathBuf>>,
}

impl SyntheticExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: &str, image: SyntheticImage) -> PathBuf {
        let path = PathBuf::from(path);
        self.images
            .write()
            .unwrap()
            .insert(path.clone(), image);
        path
    }

    /// Hash computation for `path` fails from now on; descriptors still work.
    pub fn fail_hashes_for(&self, path: &Path) {
        self.unhashable.write().unwrap().insert(path.to_path_buf());
    }

    pub fn descriptor_calls(&self) -> usize {
        self.descriptor_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, image: &Path) -> Result<SyntheticImage, ExtractError> {
        self.images
            .read()
            .unwrap()
            .get(image)
            .cloned()
            .ok_or_else(|| ExtractError::ImageNotFound(image.to_path_buf()))
    }
}

impl FeatureExtractor for SyntheticExtractor {
    fn extract_descriptor(
        &self,
        image: &Path,
        detector: DetectorType,
    ) -> Result<MatrixDescriptor, ExtractError> {
        self.descriptor_calls.fetch_add(1, Ordering::SeqCst);
        let features = self.lookup(image)?;
        match detector {
            DetectorType::Latch | DetectorType::Lucid => {
                Err(ExtractError::UnsupportedDetector(detector))
            }
            DetectorType::Sift => {
                let rows: Vec<Vec<f32>> = features.rows.iter().map(|&v| vec![f32::from(v)]).collect();
                if rows.is_empty() {
                    return Ok(MatrixDescriptor::empty(1, 4));
                }
                Ok(MatrixDescriptor::from_rows(&rows)?)
            }
            _ => Ok(MatrixDescriptor::new(
                features.rows.len(),
                1,
                1,
                features.rows.clone(),
            )?),
        }
    }

    fn compute_hash(&self, image: &Path, kind: HashKind) -> Result<Vec<u8>, ExtractError> {
        if self.unhashable.read().unwrap().contains(image) {
            return Err(ExtractError::Failed(format!("cannot hash {}", image.display())));
        }
        let features = self.lookup(image)?;
        Ok(match kind {
            HashKind::Perceptual => vec![features.perceptual],
            HashKind::ColorMoment => features.color_moment.to_le_bytes().to_vec(),
        })
    }
}

pub fn categories(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Facade over an in-memory index with the default detector list.
pub fn in_memory_cbir(extractor: Arc<SyntheticExtractor>, retrieval: RetrievalConfig) -> Cbir {
    let index = Arc::new(cbir::ImageIndex::new(cbir::IndexConfig::default()).unwrap());
    Cbir::with_parts(
        index,
        extractor,
        Arc::new(StandardHashComparator),
        retrieval,
        &cbir::DEFAULT_DETECTORS,
    )
    .unwrap()
}

/// Corpus used across the suites. Orb distances from `query.jpg` (row 0x00):
/// cat1 0, dog1 2, cat2 4, bird1 7, cat3 8.
pub fn seed_corpus(cbir: &Cbir, extractor: &SyntheticExtractor) -> PathBuf {
    let images = [
        ("cat1.jpg", "cats", SyntheticImage::new(0x00, 0.0, &[0x00])),
        ("dog1.jpg", "dogs", SyntheticImage::new(0xFF, 1.0, &[0x03])),
        ("cat2.jpg", "cats", SyntheticImage::new(0x0F, 10.0, &[0x0F])),
        ("bird1.jpg", "birds", SyntheticImage::new(0x7F, 0.5, &[0x7F])),
        ("cat3.jpg", "cats", SyntheticImage::new(0xF8, 20.0, &[0xFF])),
    ];
    for (file, category, image) in images {
        let path = extractor.register(file, image);
        cbir.ingest_image(&path, &categories(&[category])).unwrap();
    }
    extractor.register("query.jpg", SyntheticImage::new(0x00, 0.0, &[0x00]))
}

pub fn files(results: &[cbir::RankedResult]) -> Vec<&str> {
    results.iter().map(|r| r.file_reference.as_str()).collect()
}
