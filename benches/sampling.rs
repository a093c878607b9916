//! Range-restricted sampling throughput: naive decomposition (C8) against
//! the accelerated rejection-free cursor (C9), over a tree built once per
//! query selectivity (spec §4.8-§4.9).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use sampling_rtree::build::InMemorySort;
use sampling_rtree::geometry::{BBox, Point, PointId};
use sampling_rtree::hilbert::DefaultHilbertComputer;
use sampling_rtree::{Config, SamplingRTree};

fn cfg() -> Config {
    Config {
        dim: 2,
        hilbert_words: 2,
        block_size: 4096,
        f_io_min: 8,
        f_io_max: 32,
        max_top_layer_io_node_count: 16,
        ..Config::default()
    }
}

fn uniform_points(n: u64) -> Vec<Point> {
    let mut rng = XorShiftRng::seed_from_u64(7);
    (0..n)
        .map(|i| {
            let x: f32 = rand::Rng::gen_range(&mut rng, 0.0..1.0);
            let y: f32 = rand::Rng::gen_range(&mut rng, 0.0..1.0);
            Point::new(vec![x, y], 0.0, PointId::from_u64(i))
        })
        .collect()
}

fn selectivity_query(side: f32) -> BBox {
    BBox {
        lo: vec![0.0, 0.0],
        hi: vec![side, side],
    }
}

fn sample_cursors(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
    let mut build_rng = XorShiftRng::seed_from_u64(9);
    let (mut tree, _stats) = SamplingRTree::build(
        dir.path().join("idx"),
        uniform_points(50_000),
        computer,
        &InMemorySort,
        cfg(),
        &mut build_rng,
    )
    .unwrap();

    let mut group = c.benchmark_group("sampling/get_samples_k=100");
    for side in [0.1f32, 0.5, 1.0] {
        let query = selectivity_query(side);

        group.bench_with_input(BenchmarkId::new("naive", side), &query, |b, query| {
            let mut rng = XorShiftRng::seed_from_u64(1);
            b.iter(|| tree.sample_naive_k(query, 100, &mut rng).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("accelerated", side), &query, |b, query| {
            let mut rng = XorShiftRng::seed_from_u64(2);
            b.iter(|| tree.sample_accelerated_k(query.clone(), 100, &mut rng).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, sample_cursors);
criterion_main!(benches);
