//! The top-level sampling R-tree: ties the block manager, the on-disk and
//! in-memory layers, the sample builder, the query cursors, and insert
//! /erase/find (spec §2, whole-system wiring) into a single handle.

use crate::block::BlockManager;
use crate::build::{
    build_io_layers, build_mem_layers, load_io_layers, load_mem_nodes, save_io_layers, save_mem_nodes,
    BuildStats, ExternalSort,
};
use crate::config::Config;
use crate::cursor::{range_report, AcceleratedSampleCursor, NaiveSampleCursor};
use crate::error::{Error, Result};
use crate::geometry::{BBox, Point};
use crate::hilbert::HilbertComputer;
use crate::node::NodeEntry;
use crate::ops;
use crate::residency::{load_memory_budget, LoaderStats, ResidencyCache};
use crate::sample::build_node_samples;
use crate::stats::Stats;
use rand::Rng;
use std::path::{Path, PathBuf};

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn iolayers_path(prefix: &Path) -> PathBuf {
    with_suffix(prefix, ".iolayers")
}

fn memnodes_path(prefix: &Path) -> PathBuf {
    with_suffix(prefix, ".memnodes")
}

/// A sampling R-tree instance: a block manager, a [`Config`], the injected
/// [`HilbertComputer`], and the in-memory root entry over the on-disk
/// forest.
pub struct SamplingRTree<H: HilbertComputer> {
    path: PathBuf,
    bm: BlockManager,
    cfg: Config,
    computer: H,
    root: NodeEntry,
    build_stats: BuildStats,
    residency: ResidencyCache,
}

impl<H: HilbertComputer> SamplingRTree<H> {
    /// Bulk-builds a fresh index at `path` from `points` (spec §4.4-§4.6):
    /// sorts, packs the IO forest, synthesizes in-memory layers over its top
    /// layer, then computes every node's initial sample buffer.
    pub fn build<R: Rng>(
        path: impl AsRef<Path>,
        points: Vec<Point>,
        computer: H,
        sorter: &dyn ExternalSort,
        cfg: Config,
        rng: &mut R,
    ) -> Result<(Self, BuildStats)> {
        let path = path.as_ref().to_path_buf();
        let bm = BlockManager::create(&path, cfg.block_size)?;
        let (top_layer, build_stats) = build_io_layers(points, &computer, sorter, &bm, &cfg)?;
        save_io_layers(iolayers_path(&path), &cfg, 0, &top_layer)?;
        let mut root = build_mem_layers(top_layer, &cfg);
        build_node_samples(&mut root, 0, rng, &bm, &cfg)?;
        let tree = SamplingRTree {
            path,
            bm,
            cfg,
            computer,
            root,
            build_stats,
            residency: ResidencyCache::default(),
        };
        Ok((tree, build_stats))
    }

    /// Opens a previously built index. In-memory layers are resynthesized
    /// from the persisted top layer unless `load_saved_mem_nodes` is set and
    /// a `.memnodes` sidecar exists, in which case that snapshot — including
    /// every node's sample buffer — is restored instead (spec §4.5).
    pub fn open<R: Rng>(
        path: impl AsRef<Path>,
        computer: H,
        cfg: Config,
        load_saved_mem_nodes: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bm = BlockManager::load(&path)?;
        let (params, top_layer) = load_io_layers(iolayers_path(&path), cfg.dim, cfg.hilbert_words)?;
        if params.block_size != cfg.block_size {
            return Err(Error::Corrupted(format!(
                "reopened with block_size {} but index was built with {}",
                cfg.block_size, params.block_size
            )));
        }
        let snapshot = memnodes_path(&path);
        let root = if load_saved_mem_nodes && snapshot.exists() {
            load_mem_nodes(&snapshot, &cfg)?
        } else {
            let mut root = build_mem_layers(top_layer, &cfg);
            build_node_samples(&mut root, 0, rng, &bm, &cfg)?;
            root
        };
        Ok(SamplingRTree {
            path,
            bm,
            cfg,
            computer,
            root,
            build_stats: BuildStats::default(),
            residency: ResidencyCache::default(),
        })
    }

    /// Persists the current in-memory layers (including sample buffers) to
    /// the `.memnodes` sidecar, for a later `open(..., load_saved_mem_nodes:
    /// true, ...)`.
    pub fn save_mem_nodes(&self) -> Result<()> {
        save_mem_nodes(memnodes_path(&self.path), &self.root)
    }

    /// Flushes the block manager to backing storage. Does not itself persist
    /// in-memory layers — call [`Self::save_mem_nodes`] first if desired.
    pub fn close(&self) -> Result<()> {
        self.bm.flush()
    }

    pub fn size(&self) -> u64 {
        self.root.subtree_size
    }

    pub fn bbox(&self) -> &BBox {
        &self.root.bbox
    }

    pub fn computer(&self) -> &H {
        &self.computer
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn root_entry(&self) -> &NodeEntry {
        &self.root
    }

    pub fn block_manager(&self) -> &BlockManager {
        &self.bm
    }

    /// Runs the memory-budget loader (spec §5) over the current tree,
    /// replacing any previously promoted nodes with a fresh pass over the
    /// tree's present state. `memory_limit` is a byte budget; pass `None`
    /// to load every io node unconditionally.
    pub fn warm_memory_budget(&mut self, memory_limit: Option<usize>) -> Result<LoaderStats> {
        let (cache, stats) = load_memory_budget(&self.root, &self.bm, &self.cfg, memory_limit.is_none(), memory_limit.unwrap_or(0))?;
        self.residency = cache;
        Ok(stats)
    }

    /// Drops every node the memory-budget loader promoted, reverting reads
    /// to ordinary block-manager access.
    pub fn forget_memory_budget(&mut self) {
        self.residency.clear();
    }

    pub fn stats(&self) -> Stats {
        Stats {
            blocks: self.bm.stats(),
            build: self.build_stats,
        }
    }

    pub fn find(&self, probe: &Point) -> Result<bool> {
        ops::find(&self.root, probe, &self.computer, &self.bm, &self.cfg)
    }

    pub fn insert<R: Rng>(&mut self, point: Point, rng: &mut R) -> Result<()> {
        ops::insert(&mut self.root, point, &self.computer, &self.bm, &self.cfg, rng)
    }

    pub fn erase<R: Rng>(&mut self, probe: &Point, rng: &mut R) -> Result<bool> {
        ops::erase(&mut self.root, probe, &self.computer, &self.bm, &self.cfg, rng)
    }

    pub fn range_report(&mut self, query: &BBox) -> Result<Vec<Point>> {
        range_report(&mut self.root, query, &self.bm, &self.cfg, Some(&mut self.residency))
    }

    pub fn naive_sample(&mut self, query: &BBox) -> Result<NaiveSampleCursor<'_>> {
        NaiveSampleCursor::build(&mut self.root, query, &self.bm, &self.cfg)
    }

    pub fn accelerated_sample(&mut self, query: BBox) -> AcceleratedSampleCursor<'_> {
        AcceleratedSampleCursor::new(&mut self.root, query)
    }

    /// One-shot `get_samples(k)` over the naive cursor (spec §4.8): builds
    /// the decomposition and draws in a single call, for callers that don't
    /// need to hold the cursor open across repeated draws.
    pub fn sample_naive_k<R: Rng>(&mut self, query: &BBox, k: u64, rng: &mut R) -> Result<Vec<Point>> {
        let mut cursor = NaiveSampleCursor::build(&mut self.root, query, &self.bm, &self.cfg)?;
        cursor.get_samples(k, rng, &self.bm, &self.cfg)
    }

    /// One-shot `get_samples(k)` over the accelerated cursor (spec §4.9).
    pub fn sample_accelerated_k<R: Rng>(&mut self, query: BBox, k: u64, rng: &mut R) -> Result<Vec<Point>> {
        let mut cursor = AcceleratedSampleCursor::new(&mut self.root, query);
        let mut out = Vec::new();
        cursor.get_samples(k, &mut out, rng, &self.bm, &self.cfg)?;
        Ok(out)
    }

    /// Draws `draws` samples through the accelerated cursor and returns its
    /// weighted `|Q ∩ data|` estimate and that estimator's standard
    /// deviation, in one call (spec §4.9 `estimate_count`).
    pub fn estimate_count<R: Rng>(&mut self, query: BBox, draws: u64, rng: &mut R) -> Result<(u64, f64)> {
        let mut cursor = AcceleratedSampleCursor::new(&mut self.root, query);
        let mut out = Vec::new();
        cursor.get_samples(draws, &mut out, rng, &self.bm, &self.cfg)?;
        let mut sd = 0.0;
        let estimate = cursor.estimate_count(&mut sd);
        Ok((estimate, sd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::InMemorySort;
    use crate::geometry::PointId;
    use crate::hilbert::DefaultHilbertComputer;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    fn cfg() -> Config {
        Config {
            dim: 2,
            hilbert_words: 1,
            block_size: 2048,
            f_io_min: 4,
            f_io_max: 8,
            max_top_layer_io_node_count: 4,
            ..Config::default()
        }
    }

    fn points(n: u64) -> Vec<Point> {
        (0..n)
            .map(|i| {
                let f = i as f32 / n as f32;
                Point::new(vec![f, 1.0 - f], 0.0, PointId::from_u64(i))
            })
            .collect()
    }

    #[test]
    fn build_then_range_report_recovers_every_point() {
        let dir = tempfile::tempdir().unwrap();
        let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
        let mut rng = XorShiftRng::seed_from_u64(11);
        let (mut tree, _stats) = SamplingRTree::build(
            dir.path().join("idx"),
            points(2_000),
            computer,
            &InMemorySort,
            cfg(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(tree.size(), 2_000);
        let whole = BBox {
            lo: vec![0.0, 0.0],
            hi: vec![1.0, 1.0],
        };
        let report = tree.range_report(&whole).unwrap();
        assert_eq!(report.len(), 2_000);
    }

    #[test]
    fn insert_find_erase_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
        let mut rng = XorShiftRng::seed_from_u64(12);
        let (mut tree, _stats) = SamplingRTree::build(
            dir.path().join("idx"),
            points(500),
            computer,
            &InMemorySort,
            cfg(),
            &mut rng,
        )
        .unwrap();
        let original_size = tree.size();

        let fresh: Vec<Point> = (0..20)
            .map(|i| Point::new(vec![0.42, 0.58], 0.0, PointId::from_u64(10_000 + i)))
            .collect();
        for p in &fresh {
            tree.insert(p.clone(), &mut rng).unwrap();
        }
        assert_eq!(tree.size(), original_size + fresh.len() as u64);
        for p in &fresh {
            assert!(tree.find(p).unwrap());
        }
        for p in &fresh {
            assert!(tree.erase(p, &mut rng).unwrap());
        }
        assert_eq!(tree.size(), original_size);
        for p in &fresh {
            assert!(!tree.find(p).unwrap());
        }
    }

    #[test]
    fn memnodes_round_trip_preserves_size_and_bbox() {
        let dir = tempfile::tempdir().unwrap();
        let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
        let mut rng = XorShiftRng::seed_from_u64(13);
        let path = dir.path().join("idx");
        let (tree, _stats) = SamplingRTree::build(&path, points(300), computer, &InMemorySort, cfg(), &mut rng).unwrap();
        tree.save_mem_nodes().unwrap();
        let size_before = tree.size();
        let bbox_before = tree.bbox().clone();
        drop(tree);

        let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
        let reopened = SamplingRTree::open(&path, computer, cfg(), true, &mut rng).unwrap();
        assert_eq!(reopened.size(), size_before);
        assert_eq!(reopened.bbox(), &bbox_before);
    }
}
