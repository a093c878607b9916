//! C8: the baseline/ground-truth sampling cursor (spec §4.8). Decomposes
//! the tree once into `inside_nodes` (subtrees wholly covered by the query
//! box) and `boundary_values` (points from partially-covered io-leaves
//! that pass the query), then answers each `get_samples(k)` by a fresh
//! binomial split over that fixed decomposition.

use crate::block::BlockManager;
use crate::config::Config;
use crate::error::Result;
use crate::geometry::{BBox, Point};
use crate::node::{IoInternalNode, IoLeafNode, Locator, Node, NodeEntry, NodeKind};
use crate::sample::{draw_with_replacement, sample_binomial, split_proportionally};
use rand::Rng;

/// A subtree wholly inside the query box: either a live reference into the
/// tree (mem nodes, or an io node not yet descended into) or an entry
/// materialized while loading an io-internal's children during
/// decomposition.
enum InsideNode<'a> {
    Borrowed(&'a mut NodeEntry),
    Owned(NodeEntry),
}

impl<'a> InsideNode<'a> {
    fn entry_mut(&mut self) -> &mut NodeEntry {
        match self {
            InsideNode::Borrowed(e) => e,
            InsideNode::Owned(e) => e,
        }
    }

    fn weight(&self) -> u64 {
        match self {
            InsideNode::Borrowed(e) => e.subtree_size,
            InsideNode::Owned(e) => e.subtree_size,
        }
    }
}

pub struct NaiveSampleCursor<'a> {
    inside: Vec<InsideNode<'a>>,
    inside_weights: Vec<u64>,
    boundary_values: Vec<Point>,
    total_weight: u64,
}

impl<'a> NaiveSampleCursor<'a> {
    /// Builds the decomposition against `query` (spec §4.8 "Constructor").
    /// Touches every boundary io-leaf exactly once; fully-covered subtrees
    /// are recorded by weight only, never opened.
    pub fn build(root: &'a mut NodeEntry, query: &BBox, bm: &BlockManager, cfg: &Config) -> Result<Self> {
        let mut inside = Vec::new();
        let mut boundary_values = Vec::new();
        decompose(root, query, bm, cfg, &mut inside, &mut boundary_values)?;
        let inside_weights: Vec<u64> = inside.iter().map(InsideNode::weight).collect();
        let total_weight = inside_weights.iter().sum::<u64>() + boundary_values.len() as u64;
        Ok(NaiveSampleCursor {
            inside,
            inside_weights,
            boundary_values,
            total_weight,
        })
    }

    pub fn len(&self) -> u64 {
        self.total_weight
    }

    /// Draws `k` points uniformly with replacement from `Q ∩ data` as
    /// observed at construction time (spec §4.8 steps 1-3).
    pub fn get_samples<R: Rng>(
        &mut self,
        k: u64,
        rng: &mut R,
        bm: &BlockManager,
        cfg: &Config,
    ) -> Result<Vec<Point>> {
        if k == 0 || self.total_weight == 0 {
            return Ok(Vec::new());
        }
        let boundary_p = self.boundary_values.len() as f64 / self.total_weight as f64;
        let boundary_k = sample_binomial(rng, k, boundary_p);
        let mut out = draw_with_replacement(&self.boundary_values, boundary_k, rng);

        let inside_k = k - boundary_k;
        let parts = split_proportionally(rng, inside_k, &self.inside_weights);
        for (node, part) in self.inside.iter_mut().zip(parts) {
            if part == 0 {
                continue;
            }
            out.extend(sample_from_entry(node.entry_mut(), part, rng, bm, cfg)?);
        }
        Ok(out)
    }
}

fn decompose<'a>(
    entry: &'a mut NodeEntry,
    query: &BBox,
    bm: &BlockManager,
    cfg: &Config,
    inside: &mut Vec<InsideNode<'a>>,
    boundary: &mut Vec<Point>,
) -> Result<()> {
    if entry.bbox.covered_by(query) {
        inside.push(InsideNode::Borrowed(entry));
        return Ok(());
    }
    if !entry.bbox.intersects(query) {
        return Ok(());
    }
    match &mut entry.locator {
        Locator::Owned(boxed) => match &mut **boxed {
            Node::MemInternal(mem) => {
                for child in mem.children.iter_mut() {
                    decompose(child, query, bm, cfg, inside, boundary)?;
                }
                Ok(())
            }
            Node::MemLeaf(leaf) => {
                for p in &leaf.insertion_buffer {
                    if query.contains(p) {
                        boundary.push(p.clone());
                    }
                }
                for child in leaf.children.iter_mut() {
                    decompose(child, query, bm, cfg, inside, boundary)?;
                }
                Ok(())
            }
            _ => unreachable!("an owned locator only ever holds a mem node"),
        },
        Locator::Block(bid) => match entry.kind {
            NodeKind::IoInternal | NodeKind::LoadedIoInternal => {
                let bid = *bid;
                let mut io = IoInternalNode {
                    block0: bid,
                    block1: bid + 1,
                    block0_content: None,
                    sample_buffer: None,
                    sticky: false,
                };
                let cb = io.load_children_and_buffer(bm, cfg)?.clone();
                for p in &cb.insertion_buffer {
                    if query.contains(p) {
                        boundary.push(p.clone());
                    }
                }
                for child in cb.children {
                    decompose_owned(child, query, bm, cfg, inside, boundary)?;
                }
                Ok(())
            }
            NodeKind::IoLeaf | NodeKind::LoadedIoLeaf => {
                let bid = *bid;
                let mut leaf = IoLeafNode {
                    block: bid,
                    values: None,
                    sticky: false,
                };
                let values = leaf.load_values(bm, cfg, entry.subtree_size as usize)?;
                for p in values {
                    if query.contains(p) {
                        boundary.push(p.clone());
                    }
                }
                Ok(())
            }
            _ => unreachable!("a block locator only ever holds an io node"),
        },
    }
}

/// Like [`decompose`] but for entries materialized while loading an
/// io-internal's children — these never borrow from the original tree, so
/// they can only ever end up `Owned` in the inside list.
fn decompose_owned<'a>(
    mut entry: NodeEntry,
    query: &BBox,
    bm: &BlockManager,
    cfg: &Config,
    inside: &mut Vec<InsideNode<'a>>,
    boundary: &mut Vec<Point>,
) -> Result<()> {
    if entry.bbox.covered_by(query) {
        inside.push(InsideNode::Owned(entry));
        return Ok(());
    }
    if !entry.bbox.intersects(query) {
        return Ok(());
    }
    let bid = match entry.locator {
        Locator::Block(bid) => bid,
        Locator::Owned(_) => unreachable!("an io-internal's children are always io entries"),
    };
    match entry.kind {
        NodeKind::IoInternal | NodeKind::LoadedIoInternal => {
            let mut io = IoInternalNode {
                block0: bid,
                block1: bid + 1,
                block0_content: None,
                sample_buffer: None,
                sticky: false,
            };
            let cb = io.load_children_and_buffer(bm, cfg)?.clone();
            for p in &cb.insertion_buffer {
                if query.contains(p) {
                    boundary.push(p.clone());
                }
            }
            for child in cb.children {
                decompose_owned(child, query, bm, cfg, inside, boundary)?;
            }
            Ok(())
        }
        NodeKind::IoLeaf | NodeKind::LoadedIoLeaf => {
            let mut leaf = IoLeafNode {
                block: bid,
                values: None,
                sticky: false,
            };
            let subtree_size = entry.subtree_size;
            let values = leaf.load_values(bm, cfg, subtree_size as usize)?;
            for p in values {
                if query.contains(p) {
                    boundary.push(p.clone());
                }
            }
            Ok(())
        }
        _ => unreachable!("a block locator only ever holds an io node"),
    }
}

/// Draws `k` points uniformly with replacement from `entry`'s subtree
/// (spec §4.8 step 3): split among children by subtree size for mem/io
/// internal kinds, or draw directly from an io-leaf's loaded points.
fn sample_from_entry<R: Rng>(
    entry: &mut NodeEntry,
    k: u64,
    rng: &mut R,
    bm: &BlockManager,
    cfg: &Config,
) -> Result<Vec<Point>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    match &mut entry.locator {
        Locator::Owned(boxed) => match &mut **boxed {
            Node::MemInternal(mem) => {
                let weights: Vec<u64> = mem.children.iter().map(|c| c.subtree_size).collect();
                let parts = split_proportionally(rng, k, &weights);
                let mut out = Vec::new();
                for (child, part) in mem.children.iter_mut().zip(parts) {
                    if part == 0 {
                        continue;
                    }
                    out.extend(sample_from_entry(child, part, rng, bm, cfg)?);
                }
                Ok(out)
            }
            Node::MemLeaf(leaf) => {
                let mut weights: Vec<u64> = leaf.children.iter().map(|c| c.subtree_size).collect();
                weights.push(leaf.insertion_buffer.len() as u64);
                let parts = split_proportionally(rng, k, &weights);
                let n = leaf.children.len();
                let mut out = Vec::new();
                for (i, child) in leaf.children.iter_mut().enumerate() {
                    if parts[i] == 0 {
                        continue;
                    }
                    out.extend(sample_from_entry(child, parts[i], rng, bm, cfg)?);
                }
                if parts[n] > 0 {
                    out.extend(draw_with_replacement(&leaf.insertion_buffer, parts[n], rng));
                }
                Ok(out)
            }
            _ => unreachable!("an owned locator only ever holds a mem node"),
        },
        Locator::Block(bid) => match entry.kind {
            NodeKind::IoInternal | NodeKind::LoadedIoInternal => {
                let bid = *bid;
                let mut io = IoInternalNode {
                    block0: bid,
                    block1: bid + 1,
                    block0_content: None,
                    sample_buffer: None,
                    sticky: false,
                };
                let cb = io.load_children_and_buffer(bm, cfg)?.clone();
                let mut weights: Vec<u64> = cb.children.iter().map(|c| c.subtree_size).collect();
                weights.push(cb.insertion_buffer.len() as u64);
                let parts = split_proportionally(rng, k, &weights);
                let n = cb.children.len();
                let mut children = cb.children;
                let mut out = Vec::new();
                for (i, child) in children.iter_mut().enumerate() {
                    if parts[i] == 0 {
                        continue;
                    }
                    out.extend(sample_from_entry(child, parts[i], rng, bm, cfg)?);
                }
                if parts[n] > 0 {
                    out.extend(draw_with_replacement(&cb.insertion_buffer, parts[n], rng));
                }
                Ok(out)
            }
            NodeKind::IoLeaf | NodeKind::LoadedIoLeaf => {
                let bid = *bid;
                let subtree_size = entry.subtree_size;
                let mut leaf = IoLeafNode {
                    block: bid,
                    values: None,
                    sticky: false,
                };
                let values = leaf.load_values(bm, cfg, subtree_size as usize)?;
                Ok(draw_with_replacement(values, k, rng))
            }
            _ => unreachable!("a block locator only ever holds an io node"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PointId;
    use crate::hilbert::Key;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    fn cfg() -> Config {
        Config {
            dim: 2,
            hilbert_words: 2,
            block_size: 4096,
            ..Config::default()
        }
    }

    #[test]
    fn fully_covered_leaf_feeds_inside_nodes_not_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 4096).unwrap();
        let cfg = cfg();
        let values: Vec<Point> = (0..10)
            .map(|i| Point::new(vec![i as f32 / 10.0, 0.5], 0.0, PointId::from_u64(i)))
            .collect();
        let mut leaf = IoLeafNode::allocate(&bm).unwrap();
        leaf.values = Some(values.clone());
        leaf.save_to_block(&bm, &cfg).unwrap();
        let mut root = NodeEntry::on_disk(
            NodeKind::IoLeaf,
            BBox {
                lo: vec![0.0, 0.0],
                hi: vec![1.0, 1.0],
            },
            10,
            Key(vec![0, 0]),
            leaf.block,
        );
        let query = BBox {
            lo: vec![0.0, 0.0],
            hi: vec![1.0, 1.0],
        };
        let mut cursor = NaiveSampleCursor::build(&mut root, &query, &bm, &cfg).unwrap();
        assert_eq!(cursor.boundary_values.len(), 0);
        assert_eq!(cursor.len(), 10);

        let mut rng = XorShiftRng::seed_from_u64(1);
        let samples = cursor.get_samples(5, &mut rng, &bm, &cfg).unwrap();
        assert_eq!(samples.len(), 5);
    }

    #[test]
    fn disjoint_query_yields_zero_weight_and_empty_draws() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 4096).unwrap();
        let cfg = cfg();
        let mut leaf = IoLeafNode::allocate(&bm).unwrap();
        leaf.values = Some(vec![Point::new(vec![0.1, 0.1], 0.0, PointId::from_u64(1))]);
        leaf.save_to_block(&bm, &cfg).unwrap();
        let mut root = NodeEntry::on_disk(
            NodeKind::IoLeaf,
            BBox {
                lo: vec![0.0, 0.0],
                hi: vec![1.0, 1.0],
            },
            1,
            Key(vec![0, 0]),
            leaf.block,
        );
        let query = BBox {
            lo: vec![5.0, 5.0],
            hi: vec![6.0, 6.0],
        };
        let mut cursor = NaiveSampleCursor::build(&mut root, &query, &bm, &cfg).unwrap();
        assert_eq!(cursor.len(), 0);
        let mut rng = XorShiftRng::seed_from_u64(1);
        assert!(cursor.get_samples(10, &mut rng, &bm, &cfg).unwrap().is_empty());
    }
}
