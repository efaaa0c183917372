use std::time::Instant;

use descriptor::{
    DescriptorError, DescriptorSet, DetectorType, DistanceMetric, MatrixDescriptor, RowKernel,
};
use rayon::prelude::*;

use crate::metrics::metrics_recorder;
use crate::types::{MatchConfig, MatchDistance, MatchError, MatchReport, MatchStrategy};


/// Brute-force nearest-neighbor matcher for one detector family.
///
/// The metric is fixed by the detector's profile. Train it on a model matrix
/// to get a [`TrainedMatcher`], then score any number of query matrices.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorMatcher {
    detector: DetectorType,
    metric: DistanceMetric,
    cfg: MatchConfig,
}

impl DescriptorMatcher {
    pub fn new(detector: DetectorType, cfg: MatchConfig) -> Result<Self, MatchError> {
        cfg.validate()?;
        Ok(Self {
            detector,
            metric: detector.metric(),
            cfg,
        })
    }

    pub fn detector(&self) -> DetectorType {
        self.detector
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn config(&self) -> &MatchConfig {
        &self.cfg
    }

    /// Borrow `model` as the train set. The row kernel is resolved here, once.
    pub fn train<'a>(&self, model: &'a MatrixDescriptor) -> Result<TrainedMatcher<'a>, MatchError> {
        let kernel = if model.is_empty() {
            None
        } else {
            Some(self.metric.kernel(model.element_size())?)
        };
        Ok(TrainedMatcher {
            detector: self.detector,
            cfg: self.cfg,
            model,
            kernel,
        })
    }

    /// One-shot `score(model, query)`.
    pub fn distance(
        &self,
        model: &MatrixDescriptor,
        query: &MatrixDescriptor,
    ) -> Result<MatchDistance, MatchError> {
        self.train(model)?.distance(query)
    }

    /// Score two tagged descriptors, failing fast when the tags differ from
    /// each other or from this matcher.
    pub fn distance_tagged(
        &self,
        model: (DetectorType, &MatrixDescriptor),
        query: (DetectorType, &MatrixDescriptor),
    ) -> Result<MatchDistance, MatchError> {
        if model.0 != query.0 {
            return Err(MatchError::DetectorMismatch {
                model: model.0,
                query: query.0,
            });
        }
        if model.0 != self.detector {
            return Err(MatchError::DetectorMismatch {
                model: self.detector,
                query: model.0,
            });
        }
        self.distance(model.1, query.1)
    }

    /// Score the matrices both sets hold for this matcher's detector.
    pub fn distance_in_sets(
        &self,
        model: &DescriptorSet,
        query: &DescriptorSet,
    ) -> Result<MatchDistance, MatchError> {
        let m = model.get(self.detector)?;
        let q = query.get(self.detector)?;
        self.distance(m, q)
    }
}

/// A matcher bound to one model matrix.
///
/// The borrow scopes its lifetime: it cannot outlive the model rows it was
/// trained on, and dropping it releases nothing but the borrow.
#[derive(Debug, Clone, Copy)]
pub struct TrainedMatcher<'a> {
    detector: DetectorType,
    cfg: MatchConfig,
    model: &'a MatrixDescriptor,
    kernel: Option<RowKernel>,
}

impl<'a> TrainedMatcher<'a> {
    pub fn detector(&self) -> DetectorType {
        self.detector
    }

    pub fn model(&self) -> &'a MatrixDescriptor {
        self.model
    }

    /// `score(model, query)`: mean nearest-neighbor distance of the query rows.
    pub fn distance(&self, query: &MatrixDescriptor) -> Result<MatchDistance, MatchError> {
        Ok(self.report(query)?.distance)
    }

    /// Like [`TrainedMatcher::distance`] but rejects a query of another detector.
    pub fn distance_for(
        &self,
        detector: DetectorType,
        query: &MatrixDescriptor,
    ) -> Result<MatchDistance, MatchError> {
        if detector != self.detector {
            return Err(MatchError::DetectorMismatch {
                model: self.detector,
                query: detector,
            });
        }
        self.distance(query)
    }

    /// Match `query` and report row counts alongside the distance.
    pub fn report(&self, query: &MatrixDescriptor) -> Result<MatchReport, MatchError> {
        let start = Instant::now();
        let report = self.report_inner(query)?;
        if let Some(recorder) = metrics_recorder() {
            recorder.record_match(&report, start.elapsed());
        }
        Ok(report)
    }

    fn report_inner(&self, query: &MatrixDescriptor) -> Result<MatchReport, MatchError> {
        let mut report = MatchReport {
            detector: self.detector,
            distance: MatchDistance::Incomparable,
            model_rows: self.model.rows(),
            query_rows: query.rows(),
            matched_rows: 0,
        };
        let kernel = match self.kernel {
            Some(kernel) if !query.is_empty() => kernel,
            _ => return Ok(report),
        };
        if !self.model.same_row_layout(query) {
            return Err(DescriptorError::ShapeMismatch {
                model_cols: self.model.cols(),
                model_element_size: self.model.element_size(),
                query_cols: query.cols(),
                query_element_size: query.element_size(),
            }
            .into());
        }

        let per_row: Vec<Option<f64>> = if self.cfg.use_parallel {
            (0..query.rows())
                .into_par_iter()
                .map(|i| self.row_distance(kernel, query, i))
                .collect()
        } else {
            (0..query.rows())
                .map(|i| self.row_distance(kernel, query, i))
                .collect()
        };

        let (distance, matched) = mean_of_matches(&per_row);
        report.matched_rows = matched;
        report.distance = match self.cfg.strategy {
            MatchStrategy::NearestNeighbor => distance,
            MatchStrategy::RatioTest {
                goodmatch_percent, ..
            } => {
                let denom = self.model.rows().min(query.rows()) as f64;
                if (matched as f64) / denom > goodmatch_percent {
                    distance
                } else {
                    MatchDistance::Incomparable
                }
            }
        };
        Ok(report)
    }

    /// Distance contributed by query row `i`, or `None` when it is filtered out.
    fn row_distance(&self, kernel: RowKernel, query: &MatrixDescriptor, i: usize) -> Option<f64> {
        let row = query.row(i)?;
        let (best, second) = nearest_two(kernel, self.model, row);
        match self.cfg.strategy {
            MatchStrategy::NearestNeighbor => best,
            MatchStrategy::RatioTest {
                goodmatch_threshold,
                ..
            } => match (best, second) {
                (Some(b), Some(s)) if b <= goodmatch_threshold * s => Some(b),
                _ => None,
            },
        }
    }
}

/// Best and second-best distance from `row` to any model row. NaN distances
/// never win.
fn nearest_two(kernel: RowKernel, model: &MatrixDescriptor, row: &[u8]) -> (Option<f64>, Option<f64>) {
    let mut best: Option<f64> = None;
    let mut second: Option<f64> = None;
    for candidate in model.row_iter() {
        let d = kernel(candidate, row);
        if d.is_nan() {
            continue;
        }
        match best {
            Some(b) if d >= b => {
                if second.is_none_or(|s| d < s) {
                    second = Some(d);
                }
            }
            _ => {
                second = best;
                best = Some(d);
            }
        }
    }
    (best, second)
}

/// Arithmetic mean of the rows that found a match, in row order.
pub(crate) fn mean_of_matches(per_row: &[Option<f64>]) -> (MatchDistance, usize) {
    let (sum, count) = per_row
        .iter()
        .flatten()
        .fold((0.0f64, 0usize), |(sum, n), d| (sum + d, n + 1));
    if count == 0 {
        (MatchDistance::Incomparable, 0)
    } else {
        (MatchDistance::Mean(sum / count as f64), count)
    }
}
