//! Precision of a calibrated threshold over the whole corpus.

use std::time::Instant;

use descriptor::{DetectorType, MatrixDescriptor};
use tracing::{info, warn, Level};

use crate::engine::RetrievalEngine;
use crate::scan::CancellationToken;
use crate::types::{CategoryReport, Evaluation, EvaluationHit, RetrievalError};

/// Both precision rates for hits already sorted best first.
///
/// `rate1` is over every hit, `rate2` over the first `k` divided by `k`.
/// No hits gives `NaN` for both.
pub fn precision(in_target: &[bool], k: usize) -> (f64, f64) {
    if in_target.is_empty() || k == 0 {
        return (f64::NAN, f64::NAN);
    }
    let count = |hits: &[bool]| hits.iter().filter(|&&t| t).count() as f64;
    let rate1 = count(in_target) / in_target.len() as f64;
    let rate2 = count(&in_target[..k.min(in_target.len())]) / k as f64;
    (rate1, rate2)
}

/// Relevance of a score kept under `threshold`. A zero threshold only keeps
/// exact matches, which are fully relevant.
fn evaluation_relevance(score: f64, threshold: f64) -> Option<f64> {
    if !(0.0..=threshold).contains(&score) {
        return None;
    }
    if threshold == 0.0 {
        return Some(100.0);
    }
    Some(100.0 * (threshold - score) / threshold)
}

impl RetrievalEngine {
    /// Score the whole corpus against `query` and measure how many of the
    /// images kept under `threshold` are labelled `category`, i.e. list it as
    /// their first category.
    pub fn evaluate(
        &self,
        category: &str,
        query: &MatrixDescriptor,
        detector: DetectorType,
        threshold: f64,
        k: usize,
        token: &CancellationToken,
    ) -> Result<Evaluation, RetrievalError> {
        let start = Instant::now();
        let span = tracing::span!(
            Level::INFO,
            "retrieval.evaluate",
            category,
            detector = %detector,
            threshold,
            k,
        );
        let _guard = span.enter();

        match self.evaluate_inner(category, query, detector, threshold, k, token) {
            Ok(evaluation) => {
                info!(
                    kept = evaluation.hits.len(),
                    in_target = evaluation.kept_in_target(),
                    rate1 = evaluation.rate1,
                    rate2 = evaluation.rate2,
                    elapsed_micros = start.elapsed().as_micros(),
                    "evaluate_success"
                );
                Ok(evaluation)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    elapsed_micros = start.elapsed().as_micros(),
                    "evaluate_failure"
                );
                Err(err)
            }
        }
    }

    fn evaluate_inner(
        &self,
        category: &str,
        query: &MatrixDescriptor,
        detector: DetectorType,
        threshold: f64,
        k: usize,
        token: &CancellationToken,
    ) -> Result<Evaluation, RetrievalError> {
        if threshold.is_nan() || threshold < 0.0 {
            return Err(RetrievalError::InvalidThreshold(threshold));
        }
        if k == 0 {
            return Err(RetrievalError::InvalidRequest("k must be greater than zero".into()));
        }

        // Fails with CategoryNotFound for an unknown category.
        self.index.images_in_category(category)?;
        let candidates = self.index.image_ids()?;
        let (scores, _) = self.score_candidates(query, detector, &candidates, token)?;

        let mut hits = Vec::new();
        for (id, distance) in scores {
            let Some(score) = distance.value() else {
                continue;
            };
            let Some(relevance) = evaluation_relevance(score, threshold) else {
                continue;
            };
            // Deleted since the id list was taken.
            let Some(record) = self.index.image(id)? else {
                continue;
            };
            hits.push(EvaluationHit {
                image_id: id,
                in_target: record.category_label() == category,
                score,
                relevance,
            });
        }
        // Stable: ties keep corpus order.
        hits.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        let flags: Vec<bool> = hits.iter().map(|h| h.in_target).collect();
        let (rate1, rate2) = precision(&flags, k);

        Ok(Evaluation {
            category: category.to_string(),
            detector,
            threshold,
            k,
            hits,
            rate1,
            rate2,
        })
    }

    /// Calibrate on `category`, then evaluate the resulting threshold with the
    /// configured `eval_k`. An undefined calibration skips the evaluation.
    pub fn evaluate_category(
        &self,
        category: &str,
        query: &MatrixDescriptor,
        detector: DetectorType,
        token: &CancellationToken,
    ) -> Result<CategoryReport, RetrievalError> {
        let start = Instant::now();
        let calibration = self.calibrate(category, query, detector, token)?;
        let evaluation = if calibration.is_defined() {
            Some(self.evaluate(
                category,
                query,
                detector,
                calibration.threshold,
                self.cfg.eval_k,
                token,
            )?)
        } else {
            None
        };
        Ok(CategoryReport {
            calibration,
            evaluation,
            elapsed: start.elapsed(),
        })
    }

    /// [`RetrievalEngine::evaluate_category`] for each `(category, query)`
    /// pair in turn. The batch stops at the first error.
    pub fn evaluate_categories(
        &self,
        queries: &[(String, MatrixDescriptor)],
        detector: DetectorType,
        token: &CancellationToken,
    ) -> Result<Vec<CategoryReport>, RetrievalError> {
        let start = Instant::now();
        let span = tracing::span!(
            Level::INFO,
            "retrieval.evaluate_categories",
            categories = queries.len(),
            detector = %detector,
        );
        let _guard = span.enter();

        let mut reports = Vec::with_capacity(queries.len());
        for (category, query) in queries {
            let report = self.evaluate_category(category, query, detector, token)?;
            match &report.evaluation {
                Some(eval) => info!(
                    category = %category,
                    threshold = report.calibration.threshold,
                    rate1 = eval.rate1,
                    rate2 = eval.rate2,
                    elapsed_micros = report.elapsed.as_micros(),
                    "category_evaluated"
                ),
                None => warn!(category = %category, "category_uncalibrated"),
            }
            reports.push(report);
        }
        info!(
            categories = reports.len(),
            elapsed_micros = start.elapsed().as_micros(),
            "evaluate_categories_success"
        );
        Ok(reports)
    }
}
