//! End-to-end coverage of the sampling uniformity and range-restricted
//! count-estimation scenarios, at a scale suited to a test run rather than
//! the full 1,000,000-point scenario (exercised separately, `#[ignore]`d).

use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use sampling_rtree::build::InMemorySort;
use sampling_rtree::geometry::{BBox, Point, PointId};
use sampling_rtree::hilbert::DefaultHilbertComputer;
use sampling_rtree::{Config, SamplingRTree};

fn cfg() -> Config {
    Config {
        dim: 3,
        hilbert_words: 2,
        block_size: 8192,
        f_io_min: 4,
        f_io_max: 16,
        max_top_layer_io_node_count: 32,
        ..Config::default()
    }
}

fn unit_cube_points(n: u64, seed: u64) -> Vec<Point> {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let coords: Vec<f32> = (0..3).map(|_| rand::Rng::gen_range(&mut rng, 0.0..1.0)).collect();
            Point::new(coords, 0.0, PointId::from_u64(i))
        })
        .collect()
}

fn whole_bbox() -> BBox {
    BBox {
        lo: vec![0.0, 0.0, 0.0],
        hi: vec![1.0, 1.0, 1.0],
    }
}

/// Kolmogorov-Smirnov statistic of `samples` against Uniform(0, 1).
fn ks_statistic(samples: &mut [f32]) -> f64 {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = samples.len() as f64;
    let mut d_max = 0f64;
    for (i, x) in samples.iter().enumerate() {
        let empirical_below = i as f64 / n;
        let empirical_at = (i + 1) as f64 / n;
        let theoretical = *x as f64;
        d_max = d_max.max((empirical_below - theoretical).abs());
        d_max = d_max.max((empirical_at - theoretical).abs());
    }
    d_max
}

/// Critical value for a two-sided KS test at alpha=0.01, asymptotic
/// approximation `1.63 / sqrt(n)`.
fn ks_critical_value(n: usize) -> f64 {
    1.63 / (n as f64).sqrt()
}

#[test]
fn naive_sample_coordinate_distribution_passes_ks_test() {
    let dir = tempfile::tempdir().unwrap();
    let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0), (0.0, 1.0)]);
    let mut rng = XorShiftRng::seed_from_u64(42);
    let (mut tree, _stats) = SamplingRTree::build(
        dir.path().join("idx"),
        unit_cube_points(20_000, 1),
        computer,
        &InMemorySort,
        cfg(),
        &mut rng,
    )
    .unwrap();

    let mut draws = tree.sample_naive_k(&whole_bbox(), 5_000, &mut rng).unwrap();
    assert_eq!(draws.len(), 5_000);
    let mut xs: Vec<f32> = draws.drain(..).map(|p| p.coords[0]).collect();
    let d = ks_statistic(&mut xs);
    assert!(
        d < ks_critical_value(xs.len()),
        "KS statistic {d} exceeded critical value for n={}",
        xs.len()
    );
}

#[test]
fn accelerated_sample_matches_naive_count_estimate_within_a_few_std_devs() {
    let dir = tempfile::tempdir().unwrap();
    let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0), (0.0, 1.0)]);
    let mut rng = XorShiftRng::seed_from_u64(43);
    let n = 20_000u64;
    let (mut tree, _stats) = SamplingRTree::build(
        dir.path().join("idx"),
        unit_cube_points(n, 2),
        computer,
        &InMemorySort,
        cfg(),
        &mut rng,
    )
    .unwrap();

    let query = BBox {
        lo: vec![0.25, 0.25, 0.0],
        hi: vec![0.75, 0.75, 1.0],
    };
    let report = tree.range_report(&query).unwrap();
    let true_count = report.len() as f64;
    let expected = n as f64 * 0.25;
    assert!(
        (true_count - expected).abs() < 4.0 * expected.sqrt(),
        "true count {true_count} too far from expected {expected}"
    );

    let (estimate, sd) = tree.estimate_count(query, 10_000, &mut rng).unwrap();
    assert!(
        (estimate as f64 - true_count).abs() < 3.0 * sd.max(1.0),
        "estimate {estimate} (sd {sd}) too far from true count {true_count}"
    );
}
