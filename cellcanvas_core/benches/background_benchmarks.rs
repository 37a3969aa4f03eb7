//! Benchmarks for the background estimator hot path
//!
//! Run with: cargo bench --bench background_benchmarks

use cellcanvas_core::background::{distances, median_per_dimension, percentile};
use cellcanvas_core::{BackgroundConfig, BackgroundEstimator, VolumeShape};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_features(rows: usize, cols: usize) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(42);
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0f32..1.0))
}

/// Median, distance and percentile stages at growing volume sizes
fn bench_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("background_stages");

    for side in [16usize, 32, 48] {
        let voxels = side * side * side;
        let features = random_features(voxels, 32);
        let reference = median_per_dimension(features.view());
        let dists = distances(features.view(), &reference);

        group.bench_with_input(BenchmarkId::new("median", voxels), &features, |b, f| {
            b.iter(|| black_box(median_per_dimension(f.view())));
        });
        group.bench_with_input(BenchmarkId::new("distances", voxels), &features, |b, f| {
            b.iter(|| black_box(distances(f.view(), &reference)));
        });
        group.bench_with_input(BenchmarkId::new("percentile", voxels), &dists, |b, d| {
            b.iter(|| black_box(percentile(d, 1.0)));
        });
    }

    group.finish();
}

/// Full estimate including the mask, as the pipeline runs it
fn bench_estimate(c: &mut Criterion) {
    let shape = VolumeShape::new(32, 64, 64);
    let features = random_features(shape.voxels(), 32);
    let estimator = BackgroundEstimator::new(BackgroundConfig::default());

    c.bench_function("background_estimate_32x64x64", |b| {
        b.iter(|| black_box(estimator.estimate(features.view(), shape)));
    });
}

criterion_group!(benches, bench_stages, bench_estimate);
criterion_main!(benches);
