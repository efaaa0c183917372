//! Per-category threshold calibration.

use std::time::Instant;

use descriptor::{DetectorType, MatrixDescriptor};
use matcher::MatchDistance;
use tracing::{info, warn, Level};

use crate::engine::RetrievalEngine;
use crate::scan::CancellationToken;
use crate::types::{Calibration, RetrievalError};

/// `ceil` of the largest comparable score, `NaN` when there is none.
pub fn threshold_from_scores(scores: &[MatchDistance]) -> f64 {
    scores
        .iter()
        .filter_map(|d| d.value())
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
        .map_or(f64::NAN, f64::ceil)
}

impl RetrievalEngine {
    /// Derive a cutoff for `category` from the distances between `query` and
    /// the category's own members.
    ///
    /// An empty category, or one where nothing is comparable, yields an
    /// undefined (`NaN`) threshold rather than an error.
    pub fn calibrate(
        &self,
        category: &str,
        query: &MatrixDescriptor,
        detector: DetectorType,
        token: &CancellationToken,
    ) -> Result<Calibration, RetrievalError> {
        let start = Instant::now();
        let span = tracing::span!(
            Level::INFO,
            "retrieval.calibrate",
            category,
            detector = %detector,
        );
        let _guard = span.enter();

        match self.calibrate_inner(category, query, detector, token) {
            Ok(calibration) => {
                if calibration.is_defined() {
                    info!(
                        threshold = calibration.threshold,
                        members = calibration.distances.len(),
                        skipped = calibration.skipped,
                        elapsed_micros = start.elapsed().as_micros(),
                        "calibrate_success"
                    );
                } else {
                    warn!(
                        skipped = calibration.skipped,
                        elapsed_micros = start.elapsed().as_micros(),
                        "calibrate_undefined"
                    );
                }
                Ok(calibration)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    elapsed_micros = start.elapsed().as_micros(),
                    "calibrate_failure"
                );
                Err(err)
            }
        }
    }

    fn calibrate_inner(
        &self,
        category: &str,
        query: &MatrixDescriptor,
        detector: DetectorType,
        token: &CancellationToken,
    ) -> Result<Calibration, RetrievalError> {
        let members = self.index.images_in_category(category)?;
        let (scores, _) = self.score_candidates(query, detector, &members, token)?;

        let threshold =
            threshold_from_scores(&scores.iter().map(|(_, d)| *d).collect::<Vec<_>>());
        let distances: Vec<_> = scores
            .into_iter()
            .filter_map(|(id, d)| d.value().map(|v| (id, v)))
            .collect();
        // Descriptor-less and incomparable members both count as skipped.
        let skipped = members.len() - distances.len();

        Ok(Calibration {
            category: category.to_string(),
            detector,
            threshold,
            distances,
            skipped,
        })
    }
}
