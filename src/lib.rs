//! Workspace umbrella crate for content-based image retrieval (CBIR).
//!
//! [`Cbir`] ties a [`FeatureExtractor`] to the corpus store and the retrieval
//! engine so callers can ingest, query, compare and evaluate images by path
//! with a single API entry point. The member crates stay usable on their own:
//!
//! - `descriptor`: descriptor matrices, detector table, hash codec.
//! - `matcher`: brute-force nearest-neighbor distance between two matrices.
//! - `index`: images, categories and descriptors over in-memory or redb storage.
//! - `retrieval`: ranking, threshold calibration and precision evaluation.

pub mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub use crate::config::{CbirConfig, ConfigLoadError};
pub use descriptor::{
    metric_for, DescriptorError, DescriptorSet, DetectorType, DistanceMetric, ExtractError,
    FeatureExtractor, HashComparator, HashKind, HashPair, MatrixDescriptor,
    StandardHashComparator,
};
pub use index::{ImageIndex, ImageRecord, IndexConfig, IndexError, NewImage};
pub use matcher::{DescriptorMatcher, MatchConfig, MatchDistance, MatchError, MatchStrategy};
pub use retrieval::{
    Calibration, CancelOnDrop, CancellationToken, CategoryReport, Comparison, ComparisonMode,
    Evaluation, QueryFeatures, QueryRequest, RankedResult, RetrievalConfig, RetrievalEngine,
    RetrievalError,
};

/// Detector families computed at ingestion unless configured otherwise.
pub const DEFAULT_DETECTORS: [DetectorType; 5] = [
    DetectorType::Brisk,
    DetectorType::Orb,
    DetectorType::Sift,
    DetectorType::Fast,
    DetectorType::SimpleBlob,
];

/// Errors surfaced by the [`Cbir`] facade.
#[derive(Debug, Error)]
pub enum CbirError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigLoadError),
    #[error("feature extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The blocking scan task panicked or was aborted by the runtime.
    #[error("scan task failed: {0}")]
    Task(String),
}

impl CbirError {
    pub fn is_not_found(&self) -> bool {
        match self {
            CbirError::Extract(ExtractError::ImageNotFound(_)) => true,
            CbirError::Index(err) => err.is_not_found(),
            CbirError::Retrieval(err) => err.is_not_found(),
            CbirError::Descriptor(err) => err.is_not_found(),
            _ => false,
        }
    }
}

/// Ingestion, search and evaluation over one corpus.
///
/// Cheap to clone; clones share the index, the engine and the extractor.
#[derive(Clone)]
pub struct Cbir {
    index: Arc<ImageIndex>,
    engine: Arc<RetrievalEngine>,
    extractor: Arc<dyn FeatureExtractor>,
    detectors: Arc<[DetectorType]>,
}

impl Cbir {
    /// Build the index, engine and ingest detector list from `cfg`.
    pub fn new(cfg: &CbirConfig, extractor: Arc<dyn FeatureExtractor>) -> Result<Self, CbirError> {
        cfg.validate()?;
        let index = Arc::new(ImageIndex::new(cfg.index_config()?)?);
        Self::with_parts(
            index,
            extractor,
            Arc::new(StandardHashComparator),
            cfg.retrieval_config()?,
            &cfg.ingest_detectors()?,
        )
    }

    /// Assemble from an existing index and hash comparator.
    pub fn with_parts(
        index: Arc<ImageIndex>,
        extractor: Arc<dyn FeatureExtractor>,
        comparator: Arc<dyn HashComparator>,
        retrieval: RetrievalConfig,
        detectors: &[DetectorType],
    ) -> Result<Self, CbirError> {
        if detectors.is_empty() {
            return Err(CbirError::InvalidInput(
                "at least one ingest detector is required".into(),
            ));
        }
        let engine = RetrievalEngine::new(Arc::clone(&index), comparator, retrieval)?;
        Ok(Self {
            index,
            engine: Arc::new(engine),
            extractor,
            detectors: detectors.into(),
        })
    }

    pub fn index(&self) -> &Arc<ImageIndex> {
        &self.index
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    pub fn detectors(&self) -> &[DetectorType] {
        &self.detectors
    }

    /// Store `image` under `categories` and return its id.
    ///
    /// An image already stored under the same path keeps its features; only
    /// the new category memberships are added.
    pub fn ingest_image(&self, image: &Path, categories: &[String]) -> Result<Uuid, CbirError> {
        let start = Instant::now();
        let external = image.to_string_lossy().into_owned();

        let new_image = match self.index.find_by_file(&external)? {
            // The index keeps stored features, so only the record's hashes are
            // carried over.
            Some(id) => NewImage {
                hashes: self.index.get_image(id)?.hashes,
                external_file: Some(external),
                categories: categories.to_vec(),
                descriptors: DescriptorSet::default(),
            },
            None => NewImage {
                hashes: self.extractor.compute_hashes(image)?,
                external_file: Some(external),
                categories: categories.to_vec(),
                descriptors: self.extractor.extract_set(image, &self.detectors)?,
            },
        };

        match self.index.insert_image(new_image) {
            Ok(id) => {
                info!(
                    image_id = %id,
                    categories = categories.len(),
                    elapsed_micros = start.elapsed().as_micros(),
                    "ingest_success"
                );
                Ok(id)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    image = %image.display(),
                    elapsed_micros = start.elapsed().as_micros(),
                    "ingest_failure"
                );
                Err(err.into())
            }
        }
    }

    /// Hashes plus one descriptor per ingest detector, for an image that is
    /// not necessarily stored.
    pub fn features(&self, image: &Path) -> Result<QueryFeatures, CbirError> {
        Ok(QueryFeatures {
            hashes: Some(self.extractor.compute_hashes(image)?),
            descriptors: self.extractor.extract_set(image, &self.detectors)?,
        })
    }

    /// Only what a `mode` query reads: hashes, or the one descriptor.
    fn features_for(
        &self,
        image: &Path,
        mode: ComparisonMode,
        detector: DetectorType,
    ) -> Result<QueryFeatures, CbirError> {
        Ok(match mode {
            ComparisonMode::Hashes => QueryFeatures {
                hashes: Some(self.extractor.compute_hashes(image)?),
                descriptors: DescriptorSet::default(),
            },
            ComparisonMode::Descriptor => QueryFeatures {
                hashes: None,
                descriptors: self.extractor.extract_set(image, &[detector])?,
            },
        })
    }

    fn descriptor_of(&self, image: &Path, detector: DetectorType) -> Result<MatrixDescriptor, CbirError> {
        Ok(self.extractor.extract_descriptor(image, detector)?)
    }

    /// Rank the corpus against the image at `query`.
    ///
    /// Hash queries never extract descriptors and descriptor queries never
    /// compute hashes.
    pub fn query_by_image(
        &self,
        query: &Path,
        req: &QueryRequest,
    ) -> Result<Vec<RankedResult>, CbirError> {
        self.query_by_image_with(query, req, &CancellationToken::new())
    }

    /// [`Cbir::query_by_image`] with a caller-owned cancellation token.
    pub fn query_by_image_with(
        &self,
        query: &Path,
        req: &QueryRequest,
        token: &CancellationToken,
    ) -> Result<Vec<RankedResult>, CbirError> {
        req.validate()?;
        let features = self.features_for(query, req.mode, req.detector)?;
        Ok(self.engine.rank(&features, req, token)?)
    }

    /// Async form of [`Cbir::query_by_image`]. The scan runs on the blocking
    /// pool and is cancelled if the returned future is dropped first.
    pub async fn query_by_image_async(
        &self,
        query: PathBuf,
        req: QueryRequest,
    ) -> Result<Vec<RankedResult>, CbirError> {
        let token = CancellationToken::new();
        let guard = CancelOnDrop::new(token.clone());
        let this = self.clone();
        let results = tokio::task::spawn_blocking(move || {
            this.query_by_image_with(&query, &req, &token)
        })
        .await
        .map_err(|e| CbirError::Task(e.to_string()))??;
        guard.disarm();
        Ok(results)
    }

    /// Images whose category name matches one of `keys`.
    pub fn query_by_category(
        &self,
        keys: &[String],
        strict: bool,
        max: Option<usize>,
    ) -> Result<Vec<RankedResult>, CbirError> {
        Ok(self.engine.search_by_category(keys, strict, max)?)
    }

    /// Compare two images directly, `b` scored against `a`.
    pub fn compare_images(
        &self,
        a: &Path,
        b: &Path,
        mode: ComparisonMode,
        detector: DetectorType,
    ) -> Result<Comparison, CbirError> {
        let a = self.features_for(a, mode, detector)?;
        let b = self.features_for(b, mode, detector)?;
        Ok(self.engine.compare(&a, &b, mode, detector)?)
    }

    pub fn calibrate(
        &self,
        category: &str,
        query: &Path,
        detector: DetectorType,
    ) -> Result<Calibration, CbirError> {
        let query = self.descriptor_of(query, detector)?;
        Ok(self
            .engine
            .calibrate(category, &query, detector, &CancellationToken::new())?)
    }

    pub fn evaluate(
        &self,
        category: &str,
        query: &Path,
        detector: DetectorType,
        threshold: f64,
        k: usize,
    ) -> Result<Evaluation, CbirError> {
        let query = self.descriptor_of(query, detector)?;
        Ok(self.engine.evaluate(
            category,
            &query,
            detector,
            threshold,
            k,
            &CancellationToken::new(),
        )?)
    }

    /// Calibrate on `category` with `query`, then evaluate that threshold.
    pub fn evaluate_category(
        &self,
        category: &str,
        query: &Path,
        detector: DetectorType,
    ) -> Result<CategoryReport, CbirError> {
        let query = self.descriptor_of(query, detector)?;
        Ok(self
            .engine
            .evaluate_category(category, &query, detector, &CancellationToken::new())?)
    }

    /// One report per `(category, representative image)` pair.
    pub fn evaluate_categories(
        &self,
        queries: &[(String, PathBuf)],
        detector: DetectorType,
    ) -> Result<Vec<CategoryReport>, CbirError> {
        let queries = queries
            .iter()
            .map(|(category, path)| Ok((category.clone(), self.descriptor_of(path, detector)?)))
            .collect::<Result<Vec<_>, CbirError>>()?;
        Ok(self
            .engine
            .evaluate_categories(&queries, detector, &CancellationToken::new())?)
    }
}

impl std::fmt::Debug for Cbir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cbir")
            .field("engine", &self.engine)
            .field("detectors", &self.detectors)
            .finish_non_exhaustive()
    }
}
