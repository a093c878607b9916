//! Insert-then-find-then-erase scenario (spec §8 scenario 4) against a
//! larger, already-split tree, exercising C10's IO-level flush/split paths
//! rather than only the in-memory buffering unit tests cover.

use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use sampling_rtree::build::InMemorySort;
use sampling_rtree::geometry::{Point, PointId};
use sampling_rtree::hilbert::DefaultHilbertComputer;
use sampling_rtree::{Config, SamplingRTree};

fn cfg() -> Config {
    Config {
        dim: 2,
        hilbert_words: 1,
        block_size: 1024,
        f_io_min: 4,
        f_io_max: 8,
        max_top_layer_io_node_count: 4,
        insertion_buffer_capacity: 16,
        ..Config::default()
    }
}

fn grid_points(n: u64) -> Vec<Point> {
    (0..n)
        .map(|i| {
            let f = i as f32 / n as f32;
            Point::new(vec![f, 1.0 - f], 0.0, PointId::from_u64(i))
        })
        .collect()
}

#[test]
fn insert_100_find_all_erase_all_restores_original_size() {
    let dir = tempfile::tempdir().unwrap();
    let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
    let mut rng = XorShiftRng::seed_from_u64(21);
    let (mut tree, _stats) = SamplingRTree::build(
        dir.path().join("idx"),
        grid_points(4_000),
        computer,
        &InMemorySort,
        cfg(),
        &mut rng,
    )
    .unwrap();
    let original_size = tree.size();

    let new_points: Vec<Point> = (0..100)
        .map(|i| Point::new(vec![0.5, 0.5], 0.0, PointId::from_u64(1_000_000 + i)))
        .collect();

    for p in &new_points {
        tree.insert(p.clone(), &mut rng).unwrap();
    }
    assert_eq!(tree.size(), original_size + 100);

    for p in &new_points {
        assert!(tree.find(p).unwrap(), "expected to find {:?}", p.id);
    }

    for p in &new_points {
        assert!(tree.erase(p, &mut rng).unwrap(), "expected to erase {:?}", p.id);
    }
    assert_eq!(tree.size(), original_size);

    for p in &new_points {
        assert!(!tree.find(p).unwrap(), "expected {:?} to be gone", p.id);
    }
}

#[test]
fn erase_of_absent_point_returns_false() {
    let dir = tempfile::tempdir().unwrap();
    let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
    let mut rng = XorShiftRng::seed_from_u64(22);
    let (mut tree, _stats) = SamplingRTree::build(
        dir.path().join("idx"),
        grid_points(500),
        computer,
        &InMemorySort,
        cfg(),
        &mut rng,
    )
    .unwrap();

    let ghost = Point::new(vec![0.5, 0.5], 0.0, PointId::from_u64(999_999));
    assert!(!tree.find(&ghost).unwrap());
    assert!(!tree.erase(&ghost, &mut rng).unwrap());
}
