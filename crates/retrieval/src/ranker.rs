//! Online ranking of stored images against a query image.

use std::time::Instant;

use descriptor::{HashKind, HashPair, MatrixDescriptor};
use index::ImageRecord;
use matcher::MatchDistance;
use tracing::{info, warn, Level};
use uuid::Uuid;

use crate::engine::RetrievalEngine;
use crate::scan::CancellationToken;
use crate::types::{
    Comparison, ComparisonMode, QueryFeatures, QueryRequest, RankedResult, RetrievalError,
};

/// Relevance and its annotation for one candidate.
type Scored = (f64, String);

impl RetrievalEngine {
    /// Rank the whole corpus against `query`.
    ///
    /// Results are sorted by relevance, best first; equal relevance keeps scan
    /// order. The result cap is `req.max`, or `default_max` when unset.
    pub fn rank(
        &self,
        query: &QueryFeatures,
        req: &QueryRequest,
        token: &CancellationToken,
    ) -> Result<Vec<RankedResult>, RetrievalError> {
        let start = Instant::now();
        let span = tracing::span!(
            Level::INFO,
            "retrieval.rank",
            mode = ?req.mode,
            strict = req.strict,
            detector = %req.detector,
        );
        let _guard = span.enter();

        match self.rank_inner(query, req, token) {
            Ok((results, candidates)) => {
                info!(
                    candidates,
                    kept = results.len(),
                    elapsed_micros = start.elapsed().as_micros(),
                    "rank_success"
                );
                Ok(results)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    elapsed_micros = start.elapsed().as_micros(),
                    "rank_failure"
                );
                Err(err)
            }
        }
    }

    fn rank_inner(
        &self,
        query: &QueryFeatures,
        req: &QueryRequest,
        token: &CancellationToken,
    ) -> Result<(Vec<RankedResult>, usize), RetrievalError> {
        req.validate()?;
        let candidates = self.index.image_ids()?;
        let results = match req.mode {
            ComparisonMode::Hashes => {
                self.rank_by_hashes(query.require_hashes()?, req, &candidates, token)?
            }
            ComparisonMode::Descriptor => {
                let model = query
                    .descriptors
                    .get(req.detector)
                    .map_err(|_| RetrievalError::QueryNotFound(req.detector))?;
                self.rank_by_descriptor(model, req, &candidates, token)?
            }
        };
        let max = req.max.unwrap_or(self.cfg.default_max);
        Ok((finalize(results, max), candidates.len()))
    }

    pub(crate) fn rank_by_hashes(
        &self,
        query: &HashPair,
        req: &QueryRequest,
        candidates: &[Uuid],
        token: &CancellationToken,
    ) -> Result<Vec<RankedResult>, RetrievalError> {
        let query_p = query.decode(HashKind::Perceptual)?;
        let query_cm = query.decode(HashKind::ColorMoment)?;

        self.pool.scan(candidates, token, |id| {
            // Deleted since the id list was taken.
            let Some(record) = self.index.image(id)? else {
                return Ok(None);
            };
            let scored = if req.strict {
                query.shares_any(&record.hashes).then(exact_match)
            } else {
                let pdist = self.comparator.compare(
                    HashKind::Perceptual,
                    &query_p,
                    &record.hashes.decode(HashKind::Perceptual)?,
                )?;
                let cmdist = self.comparator.compare(
                    HashKind::ColorMoment,
                    &query_cm,
                    &record.hashes.decode(HashKind::ColorMoment)?,
                )?;
                hash_relevance(pdist, cmdist, req.threshold)
            };
            Ok(scored.map(|scored| ranked(&record, scored)))
        })
    }

    pub(crate) fn rank_by_descriptor(
        &self,
        model: &MatrixDescriptor,
        req: &QueryRequest,
        candidates: &[Uuid],
        token: &CancellationToken,
    ) -> Result<Vec<RankedResult>, RetrievalError> {
        // The query is the train set; every stored image is matched against it.
        let matcher = self.matcher(req.detector)?;
        let trained = matcher.train(model)?;

        self.pool.scan(candidates, token, |id| {
            let Some(distance) = self.candidate_distance(&trained, id)? else {
                return Ok(None);
            };
            let Some(scored) = descriptor_relevance(distance, req.threshold, req.strict) else {
                return Ok(None);
            };
            Ok(self.index.image(id)?.map(|record| ranked(&record, scored)))
        })
    }

    /// Every member of the categories whose name matches one of `keys`, with
    /// relevance 100. Strict mode compares names exactly, otherwise a key
    /// matches any category name containing it. `max` caps as in [`rank`].
    ///
    /// [`rank`]: RetrievalEngine::rank
    pub fn search_by_category(
        &self,
        keys: &[String],
        strict: bool,
        max: Option<usize>,
    ) -> Result<Vec<RankedResult>, RetrievalError> {
        let start = Instant::now();
        let span = tracing::span!(Level::INFO, "retrieval.search_by_category", strict);
        let _guard = span.enter();

        let keys: Vec<&str> = keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            warn!("search_by_category_failure: no keys");
            return Err(RetrievalError::InvalidRequest(
                "at least one category key is required".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let mut results = Vec::new();
        for category in self.index.categories()? {
            let hit = keys.iter().any(|key| {
                if strict {
                    category.name == *key
                } else {
                    category.name.contains(key)
                }
            });
            if !hit {
                continue;
            }
            for id in category.image_ids {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(record) = self.index.image(id)? {
                    results.push(ranked(&record, exact_match()));
                }
            }
        }

        let results = finalize(results, max.unwrap_or(self.cfg.default_max));
        info!(
            keys = keys.len(),
            kept = results.len(),
            elapsed_micros = start.elapsed().as_micros(),
            "search_by_category_success"
        );
        Ok(results)
    }

    /// Compare two images directly: hash distances, or the descriptor score of
    /// `b` against a matcher trained on `a`.
    pub fn compare(
        &self,
        a: &QueryFeatures,
        b: &QueryFeatures,
        mode: ComparisonMode,
        detector: descriptor::DetectorType,
    ) -> Result<Comparison, RetrievalError> {
        match mode {
            ComparisonMode::Hashes => {
                let (perceptual, color_moment) = self
                    .comparator
                    .compare_pair(a.require_hashes()?, b.require_hashes()?)?;
                Ok(Comparison::Hashes {
                    perceptual,
                    color_moment,
                })
            }
            ComparisonMode::Descriptor => {
                let model = a
                    .descriptors
                    .get(detector)
                    .map_err(|_| RetrievalError::QueryNotFound(detector))?;
                let query = b.descriptors.get(detector)?;
                Ok(Comparison::Descriptor(
                    self.matcher(detector)?.distance(model, query)?,
                ))
            }
        }
    }
}

fn ranked(record: &ImageRecord, (relevance, relevance_text): Scored) -> RankedResult {
    RankedResult {
        image_id: record.id,
        category: record.category_label().to_string(),
        file_reference: record.file_reference(),
        relevance,
        relevance_text,
    }
}

fn exact_match() -> Scored {
    (100.0, "100%".to_string())
}

/// Non-strict hash relevance. `threshold` must be `> 0`.
///
/// The candidate is kept when either distance is within the threshold; the
/// better of the two relevances wins, perceptual on ties. A `NaN` distance is
/// never within the threshold and never wins.
pub fn hash_relevance(pdist: f64, cmdist: f64, threshold: f64) -> Option<Scored> {
    if !(pdist <= threshold || cmdist <= threshold) {
        return None;
    }
    let relevance = |d: f64| (!d.is_nan()).then(|| (threshold - d) / threshold * 100.0);
    let perceptual = |p: f64| (p, format!("{p:.2}% (Perceptual)"));
    let color_moment = |cm: f64| (cm, format!("{cm:.2}% (Color Moment)"));
    match (relevance(pdist), relevance(cmdist)) {
        (Some(p), Some(cm)) if cm > p => Some(color_moment(cm)),
        (Some(p), _) => Some(perceptual(p)),
        (None, Some(cm)) => Some(color_moment(cm)),
        (None, None) => None,
    }
}

/// Descriptor relevance for one score.
///
/// Strict keeps exact (`0`) matches only. Otherwise `threshold == 0` ranks by
/// absolute distance (relevance `-score`), and any other threshold keeps
/// `score <= threshold` scaled to a percentage.
pub fn descriptor_relevance(distance: MatchDistance, threshold: f64, strict: bool) -> Option<Scored> {
    let score = distance.value().filter(|s| !s.is_nan())?;
    if strict {
        return (score == 0.0).then(exact_match);
    }
    if score < 0.0 {
        return None;
    }
    if threshold == 0.0 {
        return Some((-score, format!("{score} (abs)")));
    }
    if score > threshold {
        return None;
    }
    let r = 100.0 * (threshold - score) / threshold;
    Some((r, format!("{r:.2}%")))
}

/// Stable sort by relevance, best first, then truncate when `max > 0`.
pub fn finalize(mut results: Vec<RankedResult>, max: usize) -> Vec<RankedResult> {
    results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    if max > 0 && results.len() > max {
        results.truncate(max);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(n: u128, relevance: f64) -> RankedResult {
        RankedResult {
            image_id: Uuid::from_u128(n),
            category: String::new(),
            file_reference: n.to_string(),
            relevance,
            relevance_text: String::new(),
        }
    }

    #[test]
    fn hash_scenario_prefers_the_closer_signal() {
        let (r, text) = hash_relevance(5.0, 15.0, 10.0).unwrap();
        assert_eq!(r, 50.0);
        assert_eq!(text, "50.00% (Perceptual)");

        let (r, text) = hash_relevance(15.0, 2.5, 10.0).unwrap();
        assert_eq!(r, 75.0);
        assert_eq!(text, "75.00% (Color Moment)");

        assert!(hash_relevance(10.5, 11.0, 10.0).is_none());
    }

    #[test]
    fn hash_ties_go_to_perceptual() {
        let (_, text) = hash_relevance(4.0, 4.0, 8.0).unwrap();
        assert!(text.ends_with("(Perceptual)"));
    }

    #[test]
    fn nan_hash_distance_falls_back_to_the_other_signal() {
        let (r, text) = hash_relevance(0.0, f64::NAN, 20.0).unwrap();
        assert_eq!(r, 100.0);
        assert_eq!(text, "100.00% (Perceptual)");

        let (r, text) = hash_relevance(f64::NAN, 5.0, 20.0).unwrap();
        assert_eq!(r, 75.0);
        assert_eq!(text, "75.00% (Color Moment)");

        assert!(hash_relevance(f64::NAN, f64::NAN, 20.0).is_none());
        assert!(hash_relevance(25.0, f64::NAN, 20.0).is_none());
    }

    #[test]
    fn descriptor_relevance_modes() {
        assert_eq!(
            descriptor_relevance(MatchDistance::Mean(0.0), 5.0, true),
            Some((100.0, "100%".into()))
        );
        assert_eq!(descriptor_relevance(MatchDistance::Mean(0.5), 5.0, true), None);

        let (r, text) = descriptor_relevance(MatchDistance::Mean(2.5), 10.0, false).unwrap();
        assert_eq!(r, 75.0);
        assert_eq!(text, "75.00%");
        assert_eq!(descriptor_relevance(MatchDistance::Mean(10.0), 10.0, false).unwrap().0, 0.0);
        assert_eq!(descriptor_relevance(MatchDistance::Mean(10.1), 10.0, false), None);

        assert_eq!(
            descriptor_relevance(MatchDistance::Mean(12.5), 0.0, false),
            Some((-12.5, "12.5 (abs)".into()))
        );
    }

    #[test]
    fn incomparable_never_ranks() {
        for (threshold, strict) in [(0.0, false), (10.0, false), (10.0, true)] {
            assert_eq!(descriptor_relevance(MatchDistance::Incomparable, threshold, strict), None);
        }
    }

    #[test]
    fn finalize_is_stable_and_truncates() {
        let results = vec![
            result(1, 10.0),
            result(2, 50.0),
            result(3, 10.0),
            result(4, 90.0),
            result(5, 50.0),
        ];
        let ordered: Vec<u128> = finalize(results.clone(), 0)
            .iter()
            .map(|r| r.image_id.as_u128())
            .collect();
        assert_eq!(ordered, vec![4, 2, 5, 1, 3]);

        assert_eq!(finalize(results.clone(), 2).len(), 2);
        assert_eq!(finalize(results, 10).len(), 5);
    }

    #[test]
    fn finalize_orders_nan_deterministically() {
        let results = vec![result(1, 10.0), result(2, f64::NAN), result(3, 60.0)];
        let ordered: Vec<u128> = finalize(results, 0).iter().map(|r| r.image_id.as_u128()).collect();
        assert_eq!(ordered, vec![2, 3, 1]);
        assert_eq!(descriptor_relevance(MatchDistance::Mean(f64::NAN), 0.0, false), None);
    }

    #[test]
    fn absolute_mode_orders_smallest_distance_first() {
        let mut results = Vec::new();
        for (n, score) in [(1u128, 7.0), (2, 1.0), (3, 3.0)] {
            let (relevance, _) = descriptor_relevance(MatchDistance::Mean(score), 0.0, false).unwrap();
            results.push(result(n, relevance));
        }
        let ordered: Vec<u128> = finalize(results, 0).iter().map(|r| r.image_id.as_u128()).collect();
        assert_eq!(ordered, vec![2, 3, 1]);
    }
}
