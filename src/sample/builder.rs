//! C6: recursive top-down allocation of sample draws, building every
//! node's sample buffer bottom-up in one traversal (spec §4.6). A node's
//! insertion buffer (mem-leaf, io-internal) is treated as a virtual child
//! of weight `|buffer|`, sampled directly rather than recursed into.

use super::binomial::split_proportionally;
use crate::block::BlockManager;
use crate::config::Config;
use crate::error::Result;
use crate::geometry::Point;
use crate::node::{IoInternalNode, IoLeafNode, Locator, Node, NodeEntry, NodeKind};
use rand::Rng;

pub fn draw_with_replacement<R: Rng>(values: &[Point], k: u64, rng: &mut R) -> Vec<Point> {
    if values.is_empty() || k == 0 {
        return Vec::new();
    }
    (0..k)
        .map(|_| values[rng.gen_range(0..values.len())].clone())
        .collect()
}

/// Splits `drawn` into `(own, for_ancestors)` where `own` takes the first
/// `s` elements.
fn split_own_and_up(mut drawn: Vec<Point>, s: u64) -> (Vec<Point>, Vec<Point>) {
    let idx = (s as usize).min(drawn.len());
    let tail = drawn.split_off(idx);
    (drawn, tail)
}

/// Builds `entry`'s subtree sample buffers and returns `ancestor_demand`
/// freshly drawn points destined for `entry`'s caller.
pub fn build_node_samples<R: Rng>(
    entry: &mut NodeEntry,
    ancestor_demand: u64,
    rng: &mut R,
    bm: &BlockManager,
    cfg: &Config,
) -> Result<Vec<Point>> {
    let subtree_size = entry.subtree_size;
    match &mut entry.locator {
        Locator::Owned(boxed) => match &mut **boxed {
            Node::MemInternal(mem) => {
                let target = (mem.sample_target as u64).min(subtree_size);
                let weights: Vec<u64> = mem.children.iter().map(|c| c.subtree_size).collect();
                let a_parts = split_proportionally(rng, ancestor_demand, &weights);
                let s_parts = split_proportionally(rng, target, &weights);
                let mut own = Vec::new();
                let mut up = Vec::new();
                for (i, child) in mem.children.iter_mut().enumerate() {
                    let demand = a_parts[i] + s_parts[i];
                    if demand == 0 {
                        continue;
                    }
                    let drawn = build_node_samples(child, demand, rng, bm, cfg)?;
                    let (mine, theirs) = split_own_and_up(drawn, s_parts[i]);
                    own.extend(mine);
                    up.extend(theirs);
                }
                mem.sample_buffer = own;
                Ok(up)
            }
            Node::MemLeaf(leaf) => {
                let target = (leaf.sample_target as u64).min(subtree_size);
                let mut weights: Vec<u64> = leaf.children.iter().map(|c| c.subtree_size).collect();
                weights.push(leaf.insertion_buffer.len() as u64);
                let a_parts = split_proportionally(rng, ancestor_demand, &weights);
                let s_parts = split_proportionally(rng, target, &weights);
                let mut own = Vec::new();
                let mut up = Vec::new();
                let n = leaf.children.len();
                for (i, child) in leaf.children.iter_mut().enumerate() {
                    let demand = a_parts[i] + s_parts[i];
                    if demand == 0 {
                        continue;
                    }
                    let drawn = build_node_samples(child, demand, rng, bm, cfg)?;
                    let (mine, theirs) = split_own_and_up(drawn, s_parts[i]);
                    own.extend(mine);
                    up.extend(theirs);
                }
                let buf_demand = a_parts[n] + s_parts[n];
                if buf_demand > 0 {
                    let drawn = draw_with_replacement(&leaf.insertion_buffer, buf_demand, rng);
                    let (mine, theirs) = split_own_and_up(drawn, s_parts[n]);
                    own.extend(mine);
                    up.extend(theirs);
                }
                leaf.sample_buffer = own;
                Ok(up)
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
                let target = (IoInternalNode::sample_capacity(cfg) as u64).min(subtree_size);
                let cb = io.load_children_and_buffer(bm, cfg)?.clone();
                let mut weights: Vec<u64> = cb.children.iter().map(|c| c.subtree_size).collect();
                weights.push(cb.insertion_buffer.len() as u64);
                let a_parts = split_proportionally(rng, ancestor_demand, &weights);
                let s_parts = split_proportionally(rng, target, &weights);
                let mut own = Vec::new();
                let mut up = Vec::new();
                let n = cb.children.len();
                let mut children = cb.children;
                for (i, child) in children.iter_mut().enumerate() {
                    let demand = a_parts[i] + s_parts[i];
                    if demand == 0 {
                        continue;
                    }
                    let drawn = build_node_samples(child, demand, rng, bm, cfg)?;
                    let (mine, theirs) = split_own_and_up(drawn, s_parts[i]);
                    own.extend(mine);
                    up.extend(theirs);
                }
                let buf_demand = a_parts[n] + s_parts[n];
                if buf_demand > 0 {
                    let drawn = draw_with_replacement(&cb.insertion_buffer, buf_demand, rng);
                    let (mine, theirs) = split_own_and_up(drawn, s_parts[n]);
                    own.extend(mine);
                    up.extend(theirs);
                }
                io.sample_buffer = Some(own);
                io.save_samples_only(bm, cfg)?;
                Ok(up)
            }
            NodeKind::IoLeaf | NodeKind::LoadedIoLeaf => {
                let bid = *bid;
                let mut leaf = IoLeafNode {
                    block: bid,
                    values: None,
                    sticky: false,
                };
                let values = leaf.load_values(bm, cfg, subtree_size as usize)?;
                Ok(draw_with_replacement(values, ancestor_demand, rng))
            }
            _ => unreachable!("a block locator only ever holds an io node"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, PointId};
    use crate::hilbert::{DefaultHilbertComputer, HilbertComputer};
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    #[test]
    fn io_leaf_sample_buffer_is_bounded_and_drawn_from_points() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 4096).unwrap();
        let cfg = Config {
            dim: 2,
            hilbert_words: 2,
            block_size: 4096,
            ..Config::default()
        };
        let computer = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
        let values: Vec<Point> = (0..20)
            .map(|i| Point::new(vec![i as f32 / 20.0, 0.5], 0.0, PointId::from_u64(i)))
            .collect();
        let mut leaf = IoLeafNode::allocate(&bm).unwrap();
        leaf.values = Some(values.clone());
        leaf.save_to_block(&bm, &cfg).unwrap();
        leaf.values = None;

        let bbox = BBox::union_all(values.iter().map(BBox::of_point).collect::<Vec<_>>().iter());
        let mut entry = NodeEntry::on_disk(
            NodeKind::IoLeaf,
            bbox,
            values.len() as u64,
            computer.compute(&values[0]),
            leaf.block,
        );
        let mut rng = XorShiftRng::seed_from_u64(42);
        let up = build_node_samples(&mut entry, 5, &mut rng, &bm, &cfg).unwrap();
        assert_eq!(up.len(), 5);
        for p in &up {
            assert!(values.iter().any(|v| v.id == p.id));
        }
    }
}
