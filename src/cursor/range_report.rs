//! C7: pruned depth-first range report (spec §4.7). The grounding use of
//! [`NodeVisitor`] — every other cursor in this crate walks entries by
//! its own bespoke recursion because it needs more than "descend or
//! don't", but a plain collect-everything-in-Q traversal is exactly what
//! the visitor's four-way dispatch was built for.

use crate::block::BlockManager;
use crate::config::Config;
use crate::error::Result;
use crate::geometry::{BBox, Point};
use crate::node::{IoInternalNode, IoLeafNode, MemInternalNode, MemLeafNode, Node, NodeEntry, NodeVisitor};
use crate::residency::ResidencyCache;

pub struct RangeReportVisitor<'q> {
    query: &'q BBox,
    out: Vec<Point>,
}

impl<'q> RangeReportVisitor<'q> {
    fn visit_child(
        &mut self,
        child: &mut NodeEntry,
        bm: &BlockManager,
        cfg: &Config,
        residency: Option<&mut ResidencyCache>,
    ) -> Result<()> {
        if !child.bbox.intersects(self.query) {
            return Ok(());
        }
        Node::apply_visitor_to_entry(child, self, bm, cfg, residency)
    }
}

impl<'q> NodeVisitor for RangeReportVisitor<'q> {
    type Output = ();

    fn mem_internal(
        &mut self,
        node: &mut MemInternalNode,
        bm: &BlockManager,
        cfg: &Config,
        mut residency: Option<&mut ResidencyCache>,
    ) -> Result<()> {
        for child in node.children.iter_mut() {
            self.visit_child(child, bm, cfg, residency.as_deref_mut())?;
        }
        Ok(())
    }

    fn mem_leaf(
        &mut self,
        node: &mut MemLeafNode,
        bm: &BlockManager,
        cfg: &Config,
        mut residency: Option<&mut ResidencyCache>,
    ) -> Result<()> {
        for p in &node.insertion_buffer {
            if self.query.contains(p) {
                self.out.push(p.clone());
            }
        }
        for child in node.children.iter_mut() {
            self.visit_child(child, bm, cfg, residency.as_deref_mut())?;
        }
        Ok(())
    }

    fn io_internal(
        &mut self,
        node: &mut IoInternalNode,
        bm: &BlockManager,
        cfg: &Config,
        mut residency: Option<&mut ResidencyCache>,
    ) -> Result<()> {
        let cb = node.load_children_and_buffer(bm, cfg)?.clone();
        for p in &cb.insertion_buffer {
            if self.query.contains(p) {
                self.out.push(p.clone());
            }
        }
        let mut children = cb.children;
        for child in children.iter_mut() {
            self.visit_child(child, bm, cfg, residency.as_deref_mut())?;
        }
        Ok(())
    }

    fn io_leaf(
        &mut self,
        node: &mut IoLeafNode,
        _bm: &BlockManager,
        _cfg: &Config,
        _residency: Option<&mut ResidencyCache>,
    ) -> Result<()> {
        let values = node.values.as_ref().expect("io-leaf values loaded before dispatch");
        for p in values {
            if self.query.contains(p) {
                self.out.push(p.clone());
            }
        }
        Ok(())
    }
}

/// Runs a full range report over `root`, returning every point covered by
/// `query`. Idempotent: re-invoking with the same query over an unchanged
/// tree yields the same multiset (spec §4.7). `residency` is consulted for
/// any block-located entry encountered along the way (spec §5) — pass
/// `None` to always read through to the block manager.
pub fn range_report(
    root: &mut NodeEntry,
    query: &BBox,
    bm: &BlockManager,
    cfg: &Config,
    residency: Option<&mut ResidencyCache>,
) -> Result<Vec<Point>> {
    if !root.bbox.intersects(query) {
        return Ok(Vec::new());
    }
    let mut visitor = RangeReportVisitor {
        query,
        out: Vec::new(),
    };
    Node::apply_visitor_to_entry(root, &mut visitor, bm, cfg, residency)?;
    Ok(visitor.out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PointId;
    use crate::hilbert::Key;
    use crate::node::{IoLeafNode, NodeKind};

    #[test]
    fn disjoint_query_returns_empty_without_touching_data() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 4096).unwrap();
        let cfg = Config {
            dim: 2,
            hilbert_words: 2,
            ..Config::default()
        };
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
        let results = range_report(&mut root, &query, &bm, &cfg, None).unwrap();
        assert!(results.is_empty());
        assert_eq!(bm.stats().read_count, 0);
    }

    #[test]
    fn query_covering_everything_returns_all_points() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 4096).unwrap();
        let cfg = Config {
            dim: 2,
            hilbert_words: 2,
            ..Config::default()
        };
        let values = vec![
            Point::new(vec![0.1, 0.1], 0.0, PointId::from_u64(1)),
            Point::new(vec![0.9, 0.9], 0.0, PointId::from_u64(2)),
        ];
        let mut leaf = IoLeafNode::allocate(&bm).unwrap();
        leaf.values = Some(values.clone());
        leaf.save_to_block(&bm, &cfg).unwrap();
        let mut root = NodeEntry::on_disk(
            NodeKind::IoLeaf,
            BBox {
                lo: vec![0.0, 0.0],
                hi: vec![1.0, 1.0],
            },
            2,
            Key(vec![0, 0]),
            leaf.block,
        );
        let query = BBox {
            lo: vec![0.0, 0.0],
            hi: vec![1.0, 1.0],
        };
        let mut results = range_report(&mut root, &query, &bm, &cfg, None).unwrap();
        results.sort_by_key(|p| p.id.0);
        assert_eq!(results.len(), 2);
    }
}
