use std::hint::black_box;
use std::sync::Arc;

use cbir::{
    CancellationToken, DescriptorMatcher, DescriptorSet, DetectorType, HashPair, ImageIndex,
    IndexConfig, MatchConfig, MatrixDescriptor, NewImage, QueryFeatures, QueryRequest,
    RetrievalConfig, RetrievalEngine, StandardHashComparator,
};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

/// Deterministic pseudo-random bytes (xorshift64).
fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// ORB-shaped matrix: `rows` x 32 bytes.
fn orb_matrix(seed: u64, rows: usize) -> MatrixDescriptor {
    MatrixDescriptor::new(rows, 32, 1, noise(seed, rows * 32)).expect("orb matrix")
}

/// SIFT-shaped matrix: `rows` x 128 `f32`.
fn sift_matrix(seed: u64, rows: usize) -> MatrixDescriptor {
    let values: Vec<f32> = noise(seed, rows * 128).into_iter().map(f32::from).collect();
    MatrixDescriptor::from_elements(rows, 128, &values).expect("sift matrix")
}

/// Benchmark one model/query pair per detector family and row count
fn bench_pairwise(c: &mut Criterion) {
    let mut group = c.benchmark_group("pairwise");

    for &rows in [100usize, 500].iter() {
        for (name, detector, model, query) in [
            ("orb", DetectorType::Orb, orb_matrix(1, rows), orb_matrix(2, rows)),
            ("sift", DetectorType::Sift, sift_matrix(1, rows), sift_matrix(2, rows)),
        ] {
            for (mode, parallel) in [("seq", false), ("par", true)] {
                let matcher = DescriptorMatcher::new(
                    detector,
                    MatchConfig::default().with_parallel(parallel),
                )
                .expect("matcher");
                let trained = matcher.train(&model).expect("train");

                group.throughput(Throughput::Elements((rows * rows) as u64));
                group.bench_function(format!("{name}_{mode}_{rows}"), |b| {
                    b.iter(|| trained.distance(black_box(&query)).expect("distance"));
                });
            }
        }
    }

    group.finish();
}

/// Benchmark the ratio test against plain nearest neighbor
fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("strategies");
    let model = orb_matrix(3, 500);
    let query = orb_matrix(4, 500);

    for (name, cfg) in [
        ("nearest_neighbor", MatchConfig::default()),
        ("ratio_test", MatchConfig::default().with_ratio_test(0.7, 0.005)),
    ] {
        let matcher = DescriptorMatcher::new(DetectorType::Orb, cfg).expect("matcher");
        let trained = matcher.train(&model).expect("train");
        group.bench_function(name, |b| {
            b.iter(|| trained.distance(black_box(&query)).expect("distance"));
        });
    }

    group.finish();
}

/// Benchmark a full descriptor-mode ranking over corpora of growing size
fn bench_rank_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank_scale");
    group.sample_size(20);

    for &size in [100usize, 1000].iter() {
        let index = Arc::new(ImageIndex::new(IndexConfig::default()).expect("index"));
        for i in 0..size as u64 {
            index
                .insert_image(NewImage {
                    hashes: HashPair::from_bytes(&noise(i, 8), &noise(i + 7, 8)).expect("hashes"),
                    external_file: Some(format!("bench-{i}.jpg")),
                    categories: vec![format!("cat-{}", i % 10)],
                    descriptors: DescriptorSet::new([(DetectorType::Orb, orb_matrix(i, 50))])
                        .expect("descriptors"),
                })
                .expect("insert");
        }
        let engine = RetrievalEngine::new(
            index,
            Arc::new(StandardHashComparator),
            RetrievalConfig::default(),
        )
        .expect("engine");
        let query = QueryFeatures {
            hashes: Some(HashPair::from_bytes(&noise(99, 8), &noise(98, 8)).expect("hashes")),
            descriptors: DescriptorSet::new([(DetectorType::Orb, orb_matrix(99, 50))])
                .expect("descriptors"),
        };
        let req = QueryRequest::descriptor(DetectorType::Orb, 0.0).with_max(10);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("images_{size}"), |b| {
            b.iter(|| {
                engine
                    .rank(black_box(&query), &req, &CancellationToken::new())
                    .expect("rank")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pairwise, bench_strategies, bench_rank_scale);
criterion_main!(benches);
