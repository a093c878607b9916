//! C9: the central algorithm (spec §4.9). Maintains a `frontier` of
//! entries known to cover a superset of `Q ∩ data`; each batch draws from
//! an entry's precomputed sample buffer before ever touching its
//! children, and only expands an entry into its children once that
//! buffer is exhausted.

use crate::block::BlockManager;
use crate::config::Config;
use crate::error::Result;
use crate::geometry::{BBox, Point};
use crate::node::{IoInternalNode, IoLeafNode, Locator, Node, NodeEntry, NodeKind};
use crate::sample::{draw_with_replacement, split_proportionally};
use rand::seq::SliceRandom;
use rand::Rng;

/// One member of the frontier: a live subtree reference, an owned entry
/// materialized while descending through io blocks, or a mem-leaf/
/// io-internal insertion buffer (no bbox of its own, so every draw from it
/// is tested against `Q` individually).
enum FrontierNode<'a> {
    Borrowed(&'a mut NodeEntry),
    Owned(NodeEntry),
    Buffer(Vec<Point>),
}

fn frontier_bbox<'a, 'b>(node: &'b FrontierNode<'a>) -> Option<&'b BBox> {
    match node {
        FrontierNode::Borrowed(e) => Some(&e.bbox),
        FrontierNode::Owned(e) => Some(&e.bbox),
        FrontierNode::Buffer(_) => None,
    }
}

fn frontier_raw_size(node: &FrontierNode) -> u64 {
    match node {
        FrontierNode::Borrowed(e) => e.subtree_size,
        FrontierNode::Owned(e) => e.subtree_size,
        FrontierNode::Buffer(v) => v.len() as u64,
    }
}

struct FrontierItem<'a> {
    node: FrontierNode<'a>,
    sample_used: usize,
    matched: usize,
    buffer_len: Option<usize>,
    /// Q-filtered values for a leaf-like item only — populated once and
    /// then exact, not an upper bound. Never touched for internal items;
    /// see `sample_scratch` for their buffer storage.
    leaf_cache: Option<Vec<Point>>,
    /// Scratch storage for an internal item's (mem-internal/mem-leaf/
    /// io-internal) own precomputed sample buffer, kept separate from
    /// `leaf_cache` so `weight()` can't confuse the two: only a leaf-like
    /// item's cache is ever an exact replacement for `subtree_size`.
    sample_scratch: Option<Vec<Point>>,
}

impl<'a> FrontierItem<'a> {
    fn root(entry: &'a mut NodeEntry) -> Self {
        FrontierItem {
            node: FrontierNode::Borrowed(entry),
            sample_used: 0,
            matched: 0,
            buffer_len: None,
            leaf_cache: None,
            sample_scratch: None,
        }
    }

    fn fresh(node: FrontierNode<'a>) -> Self {
        FrontierItem {
            node,
            sample_used: 0,
            matched: 0,
            buffer_len: None,
            leaf_cache: None,
            sample_scratch: None,
        }
    }

    /// Weight used for proportional batch splitting: once a leaf-like
    /// item's Q-filtered values are cached this is exact, not an upper
    /// bound. Internal items always fall back to `subtree_size` — their
    /// sample buffer is a draw source, not a count of the subtree.
    fn weight(&self) -> u64 {
        if self.is_leaf_like() {
            match &self.leaf_cache {
                Some(cache) => cache.len() as u64,
                None => frontier_raw_size(&self.node),
            }
        } else {
            frontier_raw_size(&self.node)
        }
    }

    fn fully_inside(&self, query: &BBox) -> bool {
        match frontier_bbox(&self.node) {
            Some(bbox) => bbox.covered_by(query),
            None => false,
        }
    }

    fn is_leaf_like(&self) -> bool {
        match &self.node {
            FrontierNode::Buffer(_) => true,
            FrontierNode::Borrowed(e) => e.kind.is_leaf() && e.kind.is_io(),
            FrontierNode::Owned(e) => e.kind.is_leaf() && e.kind.is_io(),
        }
    }
}

fn load_leaf_values(entry: &mut NodeEntry, bm: &BlockManager, cfg: &Config) -> Result<Vec<Point>> {
    let bid = match entry.locator {
        Locator::Block(b) => b,
        Locator::Owned(_) => unreachable!("an io-leaf entry is never owned in memory"),
    };
    let subtree_size = entry.subtree_size;
    let mut leaf = IoLeafNode {
        block: bid,
        values: None,
        sticky: false,
    };
    Ok(leaf.load_values(bm, cfg, subtree_size as usize)?.clone())
}

fn load_sample_buffer(entry: &mut NodeEntry, bm: &BlockManager, cfg: &Config) -> Result<Vec<Point>> {
    match &mut entry.locator {
        Locator::Owned(boxed) => match &mut **boxed {
            Node::MemInternal(mem) => Ok(mem.sample_buffer.clone()),
            Node::MemLeaf(leaf) => Ok(leaf.sample_buffer.clone()),
            _ => unreachable!("an owned locator only ever holds a mem node"),
        },
        Locator::Block(bid) => {
            let bid = *bid;
            let mut io = IoInternalNode {
                block0: bid,
                block1: bid + 1,
                block0_content: None,
                sample_buffer: None,
                sticky: false,
            };
            Ok(io.load_samples(bm, cfg)?.clone())
        }
    }
}

/// Replaces one frontier node with its children, per spec §4.9 step 2:
/// mem-internal/mem-leaf children keep their borrow of the live tree;
/// io-internal children are materialized afresh from their block. A
/// mem-leaf or io-internal's insertion buffer becomes a synthetic
/// `Buffer` sibling.
fn expand_children<'a>(node: FrontierNode<'a>, bm: &BlockManager, cfg: &Config) -> Result<Vec<FrontierNode<'a>>> {
    match node {
        FrontierNode::Buffer(_) => unreachable!("a buffer never expands further"),
        FrontierNode::Borrowed(entry) => match &mut entry.locator {
            Locator::Owned(boxed) => match &mut **boxed {
                Node::MemInternal(mem) => Ok(mem.children.iter_mut().map(FrontierNode::Borrowed).collect()),
                Node::MemLeaf(leaf) => {
                    let mut out: Vec<FrontierNode<'a>> =
                        leaf.children.iter_mut().map(FrontierNode::Borrowed).collect();
                    if !leaf.insertion_buffer.is_empty() {
                        out.push(FrontierNode::Buffer(leaf.insertion_buffer.clone()));
                    }
                    Ok(out)
                }
                _ => unreachable!("an owned locator only ever holds a mem node"),
            },
            Locator::Block(bid) => {
                let bid = *bid;
                expand_io_internal(bid, bm, cfg)
            }
        },
        FrontierNode::Owned(entry) => {
            let bid = match entry.locator {
                Locator::Block(b) => b,
                Locator::Owned(_) => unreachable!("an io-internal's children are always io entries"),
            };
            expand_io_internal(bid, bm, cfg)
        }
    }
}

fn expand_io_internal<'a>(bid: crate::block::BlockId, bm: &BlockManager, cfg: &Config) -> Result<Vec<FrontierNode<'a>>> {
    let mut io = IoInternalNode {
        block0: bid,
        block1: bid + 1,
        block0_content: None,
        sample_buffer: None,
        sticky: false,
    };
    let cb = io.load_children_and_buffer(bm, cfg)?.clone();
    let mut out: Vec<FrontierNode<'a>> = cb.children.into_iter().map(FrontierNode::Owned).collect();
    if !cb.insertion_buffer.is_empty() {
        out.push(FrontierNode::Buffer(cb.insertion_buffer));
    }
    Ok(out)
}

/// Draws up to `s` samples from `item`, expanding it into children if its
/// own sample buffer runs out before `s` is satisfied. Returns the net
/// change to the cursor's total frontier weight.
fn process_item<'a, R: Rng>(
    mut item: FrontierItem<'a>,
    s: u64,
    query: &BBox,
    rng: &mut R,
    bm: &BlockManager,
    cfg: &Config,
    drawn: &mut Vec<Point>,
    new_frontier: &mut Vec<FrontierItem<'a>>,
) -> Result<i64> {
    if s == 0 {
        new_frontier.push(item);
        return Ok(0);
    }
    let fully_inside = item.fully_inside(query);

    if item.is_leaf_like() {
        let old_weight = item.weight() as i64;
        if item.leaf_cache.is_none() {
            let values = match &mut item.node {
                FrontierNode::Buffer(v) => std::mem::take(v),
                FrontierNode::Borrowed(e) => load_leaf_values(e, bm, cfg)?,
                FrontierNode::Owned(e) => load_leaf_values(e, bm, cfg)?,
            };
            let filtered = if fully_inside {
                values
            } else {
                values.into_iter().filter(|p| query.contains(p)).collect()
            };
            item.leaf_cache = Some(filtered);
        }
        let cache = item.leaf_cache.as_ref().unwrap();
        drawn.extend(draw_with_replacement(cache, s, rng));
        let new_weight = item.weight() as i64;
        let delta = new_weight - old_weight;
        new_frontier.push(item);
        return Ok(delta);
    }

    if item.buffer_len.is_none() {
        let buf = load_sample_buffer(entry_mut(&mut item.node), bm, cfg)?;
        item.buffer_len = Some(buf.len());
        item.sample_scratch = Some(buf);
    }
    let buffer = item.sample_scratch.as_ref().unwrap();
    let available = buffer.len().saturating_sub(item.sample_used);
    let from_buffer = available.min(s as usize);
    if from_buffer > 0 {
        let take: Vec<Point> = buffer[item.sample_used..item.sample_used + from_buffer].to_vec();
        for p in take {
            if fully_inside || query.contains(&p) {
                item.matched += 1;
                drawn.push(p);
            }
        }
        item.sample_used += from_buffer;
    }
    let remaining = s - from_buffer as u64;
    if remaining == 0 {
        new_frontier.push(item);
        return Ok(0);
    }

    let old_weight = item.weight();
    let children_all = expand_children(item.node, bm, cfg)?;
    let children: Vec<FrontierNode<'a>> = children_all
        .into_iter()
        .filter(|c| frontier_bbox(c).map_or(true, |b| b.intersects(query)))
        .collect();
    if children.is_empty() {
        return Ok(-(old_weight as i64));
    }
    let weights: Vec<u64> = children.iter().map(frontier_raw_size).collect();
    let new_weight_total: u64 = weights.iter().sum();
    let parts = split_proportionally(rng, remaining, &weights);
    let mut delta = new_weight_total as i64 - old_weight as i64;
    for (child_node, part) in children.into_iter().zip(parts) {
        delta += process_item(FrontierItem::fresh(child_node), part, query, rng, bm, cfg, drawn, new_frontier)?;
    }
    Ok(delta)
}

fn entry_mut<'a, 'b>(node: &'b mut FrontierNode<'a>) -> &'b mut NodeEntry {
    match node {
        FrontierNode::Borrowed(e) => e,
        FrontierNode::Owned(e) => e,
        FrontierNode::Buffer(_) => unreachable!("a buffer has no backing entry"),
    }
}

pub struct AcceleratedSampleCursor<'a> {
    query: BBox,
    frontier: Vec<FrontierItem<'a>>,
    count: u64,
    sample_buffer: Vec<Point>,
}

impl<'a> AcceleratedSampleCursor<'a> {
    pub fn new(root: &'a mut NodeEntry, query: BBox) -> Self {
        let count = root.subtree_size;
        AcceleratedSampleCursor {
            query,
            frontier: vec![FrontierItem::root(root)],
            count,
            sample_buffer: Vec::new(),
        }
    }

    /// Appends up to `k` points to `out` (spec §4.9 `get_samples`).
    /// Returns fewer than `k` only once `Q ∩ data` is exhausted.
    pub fn get_samples<R: Rng>(
        &mut self,
        k: u64,
        out: &mut Vec<Point>,
        rng: &mut R,
        bm: &BlockManager,
        cfg: &Config,
    ) -> Result<()> {
        let mut delivered = 0u64;
        while delivered < k {
            if let Some(p) = self.sample_buffer.pop() {
                out.push(p);
                delivered += 1;
                continue;
            }
            if self.count == 0 || self.frontier.is_empty() {
                break;
            }
            let remaining = k - delivered;
            let b = remaining.max(4 * self.frontier.len() as u64);
            self.issue_batch(b, rng, bm, cfg)?;
            if self.sample_buffer.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn issue_batch<R: Rng>(&mut self, b: u64, rng: &mut R, bm: &BlockManager, cfg: &Config) -> Result<()> {
        let weights: Vec<u64> = self.frontier.iter().map(FrontierItem::weight).collect();
        let parts = split_proportionally(rng, b, &weights);
        let old_frontier = std::mem::take(&mut self.frontier);
        let mut new_frontier = Vec::with_capacity(old_frontier.len());
        let mut drawn = Vec::new();
        let mut delta: i64 = 0;
        let query = self.query.clone();
        for (item, s) in old_frontier.into_iter().zip(parts) {
            delta += process_item(item, s, &query, rng, bm, cfg, &mut drawn, &mut new_frontier)?;
        }
        self.frontier = new_frontier;
        self.count = (self.count as i64 + delta).max(0) as u64;
        drawn.shuffle(rng);
        self.sample_buffer.extend(drawn);
        Ok(())
    }

    /// Weighted size estimator over the current frontier (spec §4.9
    /// `estimate_count`), writing the estimator's standard deviation to
    /// `sd_out`.
    pub fn estimate_count(&self, sd_out: &mut f64) -> u64 {
        let mut est = 0f64;
        let mut var = 0f64;
        for item in &self.frontier {
            let subtree_size = frontier_raw_size(&item.node) as f64;
            if item.fully_inside(&self.query) {
                est += subtree_size;
                continue;
            }
            if let Some(cache) = &item.leaf_cache {
                est += cache.len() as f64;
                continue;
            }
            if let Some(buffer_len) = item.buffer_len.filter(|&n| n > 0) {
                let matched_ratio = item.matched as f64 / buffer_len as f64;
                est += subtree_size * matched_ratio;
                var += subtree_size.powi(2) / buffer_len as f64;
                continue;
            }
            est += subtree_size / 2.0;
            var += subtree_size.powi(2) / 4.0;
        }
        *sd_out = var.sqrt();
        est.round() as u64
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
    fn draws_exactly_k_from_a_fully_covered_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 4096).unwrap();
        let cfg = cfg();
        let values: Vec<Point> = (0..15)
            .map(|i| Point::new(vec![i as f32 / 15.0, 0.5], 0.0, PointId::from_u64(i)))
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
            15,
            Key(vec![0, 0]),
            leaf.block,
        );
        let query = BBox {
            lo: vec![0.0, 0.0],
            hi: vec![1.0, 1.0],
        };
        let mut cursor = AcceleratedSampleCursor::new(&mut root, query);
        let mut rng = XorShiftRng::seed_from_u64(11);
        let mut out = Vec::new();
        cursor.get_samples(7, &mut out, &mut rng, &bm, &cfg).unwrap();
        assert_eq!(out.len(), 7);
    }

    #[test]
    fn disjoint_query_delivers_nothing() {
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
        let mut cursor = AcceleratedSampleCursor::new(&mut root, query);
        let mut rng = XorShiftRng::seed_from_u64(3);
        let mut out = Vec::new();
        cursor.get_samples(5, &mut out, &mut rng, &bm, &cfg).unwrap();
        assert!(out.is_empty());
        let mut sd = 0.0;
        assert_eq!(cursor.estimate_count(&mut sd), 0);
    }

    /// A partially-drained internal item (mem-internal/mem-leaf/io-internal)
    /// must keep reporting its true `subtree_size` as weight, not the
    /// length of its own sample buffer — otherwise a second batch over a
    /// multi-item frontier would split proportionally to buffer sizes
    /// instead of subtree sizes, biasing which subtree gets sampled from.
    #[test]
    fn internal_item_weight_uses_subtree_size_not_sample_buffer_len_after_partial_drain() {
        use crate::node::{BoundedVec, MemLeafNode};

        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 4096).unwrap();
        let cfg = cfg();
        let sample_buffer: Vec<Point> = (0..4)
            .map(|i| Point::new(vec![0.5, 0.5], 0.0, PointId::from_u64(100 + i)))
            .collect();
        let mem_leaf = MemLeafNode {
            children: BoundedVec::new(0),
            insertion_buffer: Vec::new(),
            sample_buffer,
            sample_target: 4,
        };
        let bbox = BBox {
            lo: vec![0.0, 0.0],
            hi: vec![1.0, 1.0],
        };
        let mut entry = NodeEntry::owned(NodeKind::MemLeaf, bbox.clone(), 2_000, Key(vec![0, 0]), Node::MemLeaf(mem_leaf));
        let item = FrontierItem::root(&mut entry);

        let mut rng = XorShiftRng::seed_from_u64(5);
        let mut drawn = Vec::new();
        let mut new_frontier = Vec::new();
        // Draw fewer than the buffer holds so the item is neither exhausted
        // nor expanded into children — it stays in the frontier mid-drain.
        process_item(item, 2, &bbox, &mut rng, &bm, &cfg, &mut drawn, &mut new_frontier).unwrap();

        assert_eq!(new_frontier.len(), 1);
        assert_eq!(
            new_frontier[0].weight(),
            2_000,
            "a partially-drained internal item's weight must stay the subtree size, not the sample buffer length"
        );
    }
}
