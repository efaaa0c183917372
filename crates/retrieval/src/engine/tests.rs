use super::*;
use std::collections::BTreeSet;

use descriptor::{DescriptorSet, HashPair, StandardHashComparator};
use index::{IndexConfig, NewImage};

use crate::types::{Comparison, ComparisonMode, QueryFeatures, QueryRequest, RankedResult};

fn orb(row: u8) -> MatrixDescriptor {
    MatrixDescriptor::new(1, 1, 1, vec![row]).expect("orb row")
}

fn sift() -> MatrixDescriptor {
    MatrixDescriptor::from_rows(&[vec![1.0f32, 2.0]]).expect("sift row")
}

fn moments(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn hashes(perceptual: u8, color_moment: f64) -> HashPair {
    HashPair::from_bytes(&[perceptual], &moments(&[color_moment])).expect("hashes")
}

struct Corpus {
    engine: RetrievalEngine,
    query: QueryFeatures,
}

/// Orb distances from the query `0x00`: a.jpg 0, b.jpg 2, c.jpg 4, e.jpg 8.
/// d.jpg has no Orb descriptor.
fn corpus(cfg: RetrievalConfig) -> Corpus {
    let index = Arc::new(ImageIndex::new(IndexConfig::default()).expect("index"));
    let images = [
        ("a.jpg", vec!["cats"], hashes(0x00, 0.0), Some(orb(0x00))),
        ("b.jpg", vec!["dogs"], hashes(0xFF, 1.0), Some(orb(0x03))),
        ("c.jpg", vec!["cats"], hashes(0x0F, 10.0), Some(orb(0x0F))),
        ("d.jpg", vec!["birds", "cats"], hashes(0x7F, 0.5), None),
        ("e.jpg", vec![], hashes(0xFF, 9.0), Some(orb(0xFF))),
    ];
    for (file, categories, hashes, orb) in images {
        let mut descriptors = vec![(DetectorType::Sift, sift())];
        if let Some(orb) = orb {
            descriptors.push((DetectorType::Orb, orb));
        }
        index
            .insert_image(NewImage {
                hashes,
                external_file: Some(file.into()),
                categories: categories.into_iter().map(String::from).collect(),
                descriptors: DescriptorSet::new(descriptors).expect("set"),
            })
            .expect("insert");
    }
    index.upsert_category("empty", None).expect("category");

    let engine =
        RetrievalEngine::new(index, Arc::new(StandardHashComparator), cfg).expect("engine");
    let query = QueryFeatures {
        hashes: Some(hashes(0x00, 0.0)),
        descriptors: DescriptorSet::new([(DetectorType::Orb, orb(0x00))]).expect("query set"),
    };
    Corpus { engine, query }
}

fn default_corpus() -> Corpus {
    corpus(RetrievalConfig::default().with_workers(4))
}

fn files(results: &[RankedResult]) -> Vec<&str> {
    results.iter().map(|r| r.file_reference.as_str()).collect()
}

fn texts(results: &[RankedResult]) -> Vec<&str> {
    results.iter().map(|r| r.relevance_text.as_str()).collect()
}

fn query_orb(c: &Corpus) -> &MatrixDescriptor {
    c.query.descriptors.get(DetectorType::Orb).expect("query orb")
}

#[test]
fn descriptor_mode_scales_under_threshold() {
    let c = default_corpus();
    let req = QueryRequest::descriptor(DetectorType::Orb, 4.0);
    let results = c.engine.rank(&c.query, &req, &CancellationToken::new()).unwrap();

    assert_eq!(files(&results), vec!["a.jpg", "b.jpg", "c.jpg"]);
    assert_eq!(texts(&results), vec!["100.00%", "50.00%", "0.00%"]);
    assert_eq!(results[0].category, "cats");
    assert_eq!(results[1].category, "dogs");
}

#[test]
fn descriptor_absolute_mode_keeps_everything_comparable() {
    let c = default_corpus();
    let req = QueryRequest::descriptor(DetectorType::Orb, 0.0);
    let results = c.engine.rank(&c.query, &req, &CancellationToken::new()).unwrap();

    assert_eq!(files(&results), vec!["a.jpg", "b.jpg", "c.jpg", "e.jpg"]);
    assert_eq!(texts(&results), vec!["0 (abs)", "2 (abs)", "4 (abs)", "8 (abs)"]);
    assert_eq!(results[3].relevance, -8.0);
    assert_eq!(results[3].category, "");
}

#[test]
fn descriptor_strict_mode_keeps_exact_matches() {
    let c = default_corpus();
    let req = QueryRequest::descriptor(DetectorType::Orb, 0.0).with_strict(true);
    let results = c.engine.rank(&c.query, &req, &CancellationToken::new()).unwrap();

    assert_eq!(files(&results), vec!["a.jpg"]);
    assert_eq!(results[0].relevance, 100.0);
    assert_eq!(results[0].relevance_text, "100%");
}

#[test]
fn max_truncates_to_the_top() {
    let c = default_corpus();
    let req = QueryRequest::descriptor(DetectorType::Orb, 0.0).with_max(2);
    let results = c.engine.rank(&c.query, &req, &CancellationToken::new()).unwrap();
    assert_eq!(files(&results), vec!["a.jpg", "b.jpg"]);

    for pair in results.windows(2) {
        assert!(pair[0].relevance >= pair[1].relevance);
    }
}

#[test]
fn query_without_the_detector_is_not_found() {
    let c = default_corpus();
    let req = QueryRequest::descriptor(DetectorType::Brisk, 4.0);
    let err = c.engine.rank(&c.query, &req, &CancellationToken::new()).unwrap_err();
    assert_eq!(err, RetrievalError::QueryNotFound(DetectorType::Brisk));
    assert!(err.is_not_found());
}

#[test]
fn hash_mode_picks_the_better_family() {
    let c = default_corpus();
    let req = QueryRequest::hashes(4.0);
    let results = c.engine.rank(&c.query, &req, &CancellationToken::new()).unwrap();

    assert_eq!(files(&results), vec!["a.jpg", "d.jpg", "b.jpg", "c.jpg"]);
    assert_eq!(
        texts(&results),
        vec![
            "100.00% (Perceptual)",
            "87.50% (Color Moment)",
            "75.00% (Color Moment)",
            "0.00% (Perceptual)",
        ]
    );
    assert_eq!(results[1].category, "birds");
}

#[test]
fn nan_color_moment_falls_back_to_perceptual() {
    let c = default_corpus();
    let query = QueryFeatures {
        hashes: Some(hashes(0x00, f64::NAN)),
        descriptors: c.query.descriptors.clone(),
    };
    let results = c
        .engine
        .rank(&query, &QueryRequest::hashes(20.0), &CancellationToken::new())
        .unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(files(&results)[..3], ["a.jpg", "c.jpg", "d.jpg"]);
    assert_eq!(results[0].relevance, 100.0);
    assert!(results.iter().all(|r| r.relevance.is_finite()));
    assert!(results.iter().all(|r| r.relevance_text.ends_with("(Perceptual)")));
}

#[test]
fn vanished_candidates_are_skipped() {
    let c = default_corpus();
    let token = CancellationToken::new();
    let mut candidates = c.engine.index().image_ids().unwrap();
    candidates.insert(0, Uuid::new_v4());
    candidates.push(Uuid::new_v4());

    let by_hash = c
        .engine
        .rank_by_hashes(c.query.hashes.as_ref().unwrap(), &QueryRequest::hashes(4.0), &candidates, &token)
        .unwrap();
    assert_eq!(by_hash.len(), 4);

    let req = QueryRequest::descriptor(DetectorType::Orb, 0.0);
    let by_desc = c
        .engine
        .rank_by_descriptor(query_orb(&c), &req, &candidates, &token)
        .unwrap();
    assert_eq!(by_desc.len(), 4);

    let (scores, skipped) = c
        .engine
        .score_candidates(query_orb(&c), DetectorType::Orb, &candidates, &token)
        .unwrap();
    assert_eq!(scores.len(), 4);
    // Two unknown ids plus d.jpg without Orb.
    assert_eq!(skipped, 3);
}

#[test]
fn hash_strict_mode_needs_equal_hex() {
    let c = default_corpus();
    let req = QueryRequest::hashes(0.0).with_strict(true);
    let results = c.engine.rank(&c.query, &req, &CancellationToken::new()).unwrap();
    assert_eq!(files(&results), vec!["a.jpg"]);
    assert_eq!(results[0].relevance_text, "100%");
}

#[test]
fn non_strict_hash_mode_needs_a_threshold() {
    let c = default_corpus();
    let err = c
        .engine
        .rank(&c.query, &QueryRequest::hashes(0.0), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidRequest(_)));
}

#[test]
fn cancelled_rank_returns_cancelled() {
    let c = default_corpus();
    let token = CancellationToken::new();
    token.cancel();
    let err = c
        .engine
        .rank(&c.query, &QueryRequest::descriptor(DetectorType::Orb, 0.0), &token)
        .unwrap_err();
    assert_eq!(err, RetrievalError::Cancelled);
}

#[test]
fn calibration_uses_category_members_only() {
    let c = default_corpus();
    let cal = c
        .engine
        .calibrate("cats", query_orb(&c), DetectorType::Orb, &CancellationToken::new())
        .unwrap();

    assert!(cal.is_defined());
    assert_eq!(cal.threshold, 4.0);
    assert_eq!(cal.distances.len(), 2);
    // d.jpg has no Orb descriptor.
    assert_eq!(cal.skipped, 1);
}

#[test]
fn empty_category_calibration_is_undefined() {
    let c = default_corpus();
    let report = c
        .engine
        .evaluate_category("empty", query_orb(&c), DetectorType::Orb, &CancellationToken::new())
        .unwrap();
    assert!(!report.calibration.is_defined());
    assert!(report.calibration.threshold.is_nan());
    assert!(report.evaluation.is_none());
}

#[test]
fn unknown_category_is_not_found() {
    let c = default_corpus();
    let err = c
        .engine
        .calibrate("fish", query_orb(&c), DetectorType::Orb, &CancellationToken::new())
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn evaluation_reports_both_rates() {
    let c = default_corpus();
    let eval = c
        .engine
        .evaluate("cats", query_orb(&c), DetectorType::Orb, 4.0, 2, &CancellationToken::new())
        .unwrap();

    let kept: Vec<f64> = eval.hits.iter().map(|h| h.score).collect();
    assert_eq!(kept, vec![0.0, 2.0, 4.0]);
    assert_eq!(eval.kept_in_target(), 2);
    assert!((eval.rate1 - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(eval.rate2, 0.5);
}

#[test]
fn evaluation_targets_the_first_category() {
    let index = Arc::new(ImageIndex::new(IndexConfig::default()).unwrap());
    index
        .insert_image(NewImage {
            hashes: hashes(0x00, 0.0),
            external_file: Some("pet.jpg".into()),
            categories: vec!["dogs".into(), "cats".into()],
            descriptors: DescriptorSet::new([(DetectorType::Orb, orb(0x00))]).unwrap(),
        })
        .unwrap();
    let engine =
        RetrievalEngine::new(index, Arc::new(StandardHashComparator), RetrievalConfig::default())
            .unwrap();
    let token = CancellationToken::new();

    let cats = engine.evaluate("cats", &orb(0), DetectorType::Orb, 4.0, 1, &token).unwrap();
    assert_eq!(cats.hits.len(), 1);
    assert!(!cats.hits[0].in_target);
    assert_eq!(cats.rate1, 0.0);
    assert_eq!(cats.rate2, 0.0);

    let dogs = engine.evaluate("dogs", &orb(0), DetectorType::Orb, 4.0, 1, &token).unwrap();
    assert!(dogs.hits[0].in_target);
    assert_eq!(dogs.rate1, 1.0);
    assert_eq!(dogs.rate2, 1.0);
}

#[test]
fn evaluation_with_nothing_kept_is_nan() {
    let index = Arc::new(ImageIndex::new(IndexConfig::default()).unwrap());
    index.upsert_category("cats", None).unwrap();
    let engine =
        RetrievalEngine::new(index, Arc::new(StandardHashComparator), RetrievalConfig::default())
            .unwrap();
    let eval = engine
        .evaluate("cats", &orb(0), DetectorType::Orb, 4.0, 8, &CancellationToken::new())
        .unwrap();
    assert!(eval.is_empty());
    assert!(eval.rate1.is_nan());
    assert!(eval.rate2.is_nan());
}

#[test]
fn evaluation_rejects_undefined_threshold() {
    let c = default_corpus();
    for threshold in [f64::NAN, -1.0] {
        let err = c
            .engine
            .evaluate("cats", query_orb(&c), DetectorType::Orb, threshold, 8, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidThreshold(_)));
    }
}

#[test]
fn evaluate_category_chains_calibration() {
    let c = corpus(RetrievalConfig::default().with_workers(2).with_eval_k(2));
    let reports = c
        .engine
        .evaluate_categories(
            &[("cats".to_string(), query_orb(&c).clone())],
            DetectorType::Orb,
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(reports.len(), 1);
    let eval = reports[0].evaluation.as_ref().expect("calibrated");
    assert_eq!(eval.threshold, 4.0);
    assert_eq!(eval.k, 2);
    assert_eq!(eval.rate2, 0.5);
}

#[test]
fn category_search_matches_names() {
    let c = default_corpus();
    let loose = c.engine.search_by_category(&["at".into()], false, None).unwrap();
    let loose: BTreeSet<&str> = loose.iter().map(|r| r.file_reference.as_str()).collect();
    assert_eq!(loose, BTreeSet::from(["a.jpg", "c.jpg", "d.jpg"]));

    assert!(c.engine.search_by_category(&["cat".into()], true, None).unwrap().is_empty());
    let strict = c.engine.search_by_category(&["dogs".into()], true, None).unwrap();
    assert_eq!(files(&strict), vec!["b.jpg"]);
    assert_eq!(strict[0].relevance, 100.0);

    assert_eq!(c.engine.search_by_category(&["cats".into()], true, Some(1)).unwrap().len(), 1);
    assert!(matches!(
        c.engine.search_by_category(&[" ".into()], false, None),
        Err(RetrievalError::InvalidRequest(_))
    ));
}

#[test]
fn compare_reports_hash_and_descriptor_distances() {
    let c = default_corpus();
    let other = QueryFeatures {
        hashes: Some(hashes(0xFF, 3.0)),
        descriptors: DescriptorSet::new([(DetectorType::Orb, orb(0x07))]).unwrap(),
    };

    let hashes = c
        .engine
        .compare(&c.query, &other, ComparisonMode::Hashes, DetectorType::Orb)
        .unwrap();
    assert_eq!(
        hashes,
        Comparison::Hashes {
            perceptual: 8.0,
            color_moment: 3.0
        }
    );

    let desc = c
        .engine
        .compare(&c.query, &other, ComparisonMode::Descriptor, DetectorType::Orb)
        .unwrap();
    assert_eq!(desc, Comparison::Descriptor(MatchDistance::Mean(3.0)));
}

#[test]
fn invalid_config_is_rejected() {
    let index = Arc::new(ImageIndex::new(IndexConfig::default()).unwrap());
    let err = RetrievalEngine::new(
        index,
        Arc::new(StandardHashComparator),
        RetrievalConfig::default().with_eval_k(0),
    )
    .unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidRequest(_)));
}
