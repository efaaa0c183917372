use std::sync::Arc;

use descriptor::{DetectorType, HashComparator, MatrixDescriptor};
use index::ImageIndex;
use matcher::{DescriptorMatcher, MatchConfig, MatchDistance, TrainedMatcher};
use uuid::Uuid;

use crate::scan::{CancellationToken, ScanPool};
use crate::types::RetrievalError;

#[cfg(test)]
mod tests;

/// Configuration for the retrieval engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Scan pool size; `0` uses one thread per core.
    pub workers: usize,
    /// Result cap for requests that leave `max` unset; `0` keeps everything.
    pub default_max: usize,
    /// Top-K cap used by the evaluator.
    pub eval_k: usize,
    pub matcher: MatchConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            default_max: 0,
            eval_k: 8,
            matcher: MatchConfig::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_default_max(mut self, default_max: usize) -> Self {
        self.default_max = default_max;
        self
    }

    pub fn with_eval_k(mut self, eval_k: usize) -> Self {
        self.eval_k = eval_k;
        self
    }

    pub fn with_matcher(mut self, matcher: MatchConfig) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.eval_k == 0 {
            return Err(RetrievalError::InvalidRequest(
                "eval_k must be greater than zero".into(),
            ));
        }
        self.matcher.validate()?;
        Ok(())
    }
}

/// Online ranking and offline calibration over one corpus.
///
/// The ranking, calibration and evaluation entry points live in their own
/// modules; this type owns the shared pieces they scan with.
pub struct RetrievalEngine {
    pub(crate) index: Arc<ImageIndex>,
    pub(crate) comparator: Arc<dyn HashComparator>,
    pub(crate) pool: ScanPool,
    pub(crate) cfg: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        index: Arc<ImageIndex>,
        comparator: Arc<dyn HashComparator>,
        cfg: RetrievalConfig,
    ) -> Result<Self, RetrievalError> {
        cfg.validate()?;
        Ok(Self {
            index,
            comparator,
            pool: ScanPool::new(cfg.workers)?,
            cfg,
        })
    }

    pub fn index(&self) -> &Arc<ImageIndex> {
        &self.index
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.cfg
    }

    pub(crate) fn matcher(&self, detector: DetectorType) -> Result<DescriptorMatcher, RetrievalError> {
        Ok(DescriptorMatcher::new(detector, self.cfg.matcher)?)
    }

    /// Score every candidate against a matcher trained on `query`.
    ///
    /// Candidates without a descriptor of the detector are counted in the
    /// returned `skipped` and left out of the scores, which stay in candidate
    /// order.
    pub(crate) fn score_candidates(
        &self,
        query: &MatrixDescriptor,
        detector: DetectorType,
        candidates: &[Uuid],
        token: &CancellationToken,
    ) -> Result<(Vec<(Uuid, MatchDistance)>, usize), RetrievalError> {
        let matcher = self.matcher(detector)?;
        let trained = matcher.train(query)?;
        let scored = self.pool.scan(candidates, token, |id| {
            Ok(Some((id, self.candidate_distance(&trained, id)?)))
        })?;
        let mut skipped = 0;
        let scores = scored
            .into_iter()
            .filter_map(|(id, d)| match d {
                Some(d) => Some((id, d)),
                None => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        Ok((scores, skipped))
    }

    /// Distance from the trained query to one stored image, `None` when the
    /// image has no descriptor of the trained detector or no longer exists.
    pub(crate) fn candidate_distance(
        &self,
        trained: &TrainedMatcher<'_>,
        id: Uuid,
    ) -> Result<Option<MatchDistance>, RetrievalError> {
        let candidate = match self.index.get_descriptor(id, trained.detector()) {
            Ok(candidate) => candidate,
            // Never computed for this image, or the image is gone.
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(trained.distance(&candidate)?))
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("pool", &self.pool)
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}
