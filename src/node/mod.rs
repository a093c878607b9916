//! The node contract (spec C3): a tagged sum over the four node kinds plus
//! a visitor trait used for double dispatch. Spec §9 calls out that a
//! closed `match` is preferable to a type per kind here, since fan-out and
//! dimension are runtime [`Config`] values, not compile-time parameters —
//! so `Node` is a plain enum rather than the teacher's generic
//! `Tree<X: Dml, M, I>` machinery.

pub mod bounded_vec;
pub mod codec;
pub mod entry;
pub mod io;
pub mod mem;

pub use bounded_vec::BoundedVec;
pub use entry::{Locator, NodeEntry, NodeKind};
pub use io::{ChildrenAndBuffer, IoInternalNode, IoLeafNode};
pub use mem::{MemInternalNode, MemLeafNode};

use crate::block::BlockManager;
use crate::config::Config;
use crate::error::Result;
use crate::geometry::BBox;
use crate::hilbert::Key;

#[derive(Clone)]
pub enum Node {
    MemInternal(MemInternalNode),
    MemLeaf(MemLeafNode),
    IoInternal(IoInternalNode),
    IoLeaf(IoLeafNode),
}

impl Node {
    pub fn kind_hint(&self) -> NodeKind {
        match self {
            Node::MemInternal(_) => NodeKind::MemInternal,
            Node::MemLeaf(_) => NodeKind::MemLeaf,
            Node::IoInternal(n) if n.mem_resident() => NodeKind::LoadedIoInternal,
            Node::IoInternal(_) => NodeKind::IoInternal,
            Node::IoLeaf(n) if n.mem_resident() => NodeKind::LoadedIoLeaf,
            Node::IoLeaf(_) => NodeKind::IoLeaf,
        }
    }

    /// Recomputes `(bbox, subtree_size, min_key)` from current contents,
    /// loading whatever on-disk state is needed (spec §4.3). For an io-leaf
    /// this requires the values already be resident, since a leaf block
    /// carries no independent length — the caller must load it via the
    /// parent entry's `subtree_size` first.
    pub fn summarize(&mut self, bm: &BlockManager, cfg: &Config) -> Result<(BBox, u64, Key)> {
        match self {
            Node::MemInternal(n) => Ok(n.summarize()),
            Node::MemLeaf(n) => Ok(n.summarize()),
            Node::IoInternal(n) => {
                let cb = n.load_children_and_buffer(bm, cfg)?;
                let dim = cb
                    .children
                    .first()
                    .map(|c| c.bbox.dim())
                    .or_else(|| cb.insertion_buffer.first().map(|p| p.coords.len()))
                    .unwrap_or(cfg.dim);
                let mut bbox = if cb.children.is_empty() {
                    BBox::empty(dim)
                } else {
                    BBox::union_all(cb.children.iter().map(|c| &c.bbox))
                };
                for p in &cb.insertion_buffer {
                    bbox.expand_point(p);
                }
                let subtree_size = cb.children.iter().map(|c| c.subtree_size).sum::<u64>()
                    + cb.insertion_buffer.len() as u64;
                let min_key = cb
                    .children
                    .first()
                    .map(|c| c.min_key.clone())
                    .unwrap_or_else(|| Key::min(cfg.hilbert_words));
                Ok((bbox, subtree_size, min_key))
            }
            Node::IoLeaf(n) => {
                let values = n
                    .values
                    .as_ref()
                    .expect("io-leaf must be loaded before it can be summarized");
                let dim = values.first().map(|p| p.coords.len()).unwrap_or(cfg.dim);
                let mut bbox = BBox::empty(dim);
                for p in values {
                    bbox.expand_point(p);
                }
                let min_key = Key::min(cfg.hilbert_words);
                Ok((bbox, values.len() as u64, min_key))
            }
        }
    }
}

/// Double-dispatch over node kinds (spec C3, "visitor"). Range reporting
/// (C7) and the sampling cursors (C8, C9) each implement this once rather
/// than every operation growing its own four-way match. Pruning decisions
/// that depend on a child's own `bbox`/`subtree_size` are made by the
/// caller against the child's [`NodeEntry`] before dispatch — once inside
/// an arm here, the node's *own* children already carry that information.
pub trait NodeVisitor {
    type Output;

    fn mem_internal(
        &mut self,
        node: &mut MemInternalNode,
        bm: &BlockManager,
        cfg: &Config,
        residency: Option<&mut crate::residency::ResidencyCache>,
    ) -> Result<Self::Output>;
    fn mem_leaf(
        &mut self,
        node: &mut MemLeafNode,
        bm: &BlockManager,
        cfg: &Config,
        residency: Option<&mut crate::residency::ResidencyCache>,
    ) -> Result<Self::Output>;
    fn io_internal(
        &mut self,
        node: &mut IoInternalNode,
        bm: &BlockManager,
        cfg: &Config,
        residency: Option<&mut crate::residency::ResidencyCache>,
    ) -> Result<Self::Output>;
    fn io_leaf(
        &mut self,
        node: &mut IoLeafNode,
        bm: &BlockManager,
        cfg: &Config,
        residency: Option<&mut crate::residency::ResidencyCache>,
    ) -> Result<Self::Output>;
}

impl Node {
    pub fn apply_visitor<V: NodeVisitor>(
        &mut self,
        visitor: &mut V,
        bm: &BlockManager,
        cfg: &Config,
        residency: Option<&mut crate::residency::ResidencyCache>,
    ) -> Result<V::Output> {
        match self {
            Node::MemInternal(n) => visitor.mem_internal(n, bm, cfg, residency),
            Node::MemLeaf(n) => visitor.mem_leaf(n, bm, cfg, residency),
            Node::IoInternal(n) => visitor.io_internal(n, bm, cfg, residency),
            Node::IoLeaf(n) => visitor.io_leaf(n, bm, cfg, residency),
        }
    }

    /// Dispatches on `entry`'s locator, constructing a transient node
    /// wrapper for io kinds so that block-backed and memory-resident
    /// children go through the same [`apply_visitor`] path — unless
    /// `residency` already holds a promoted copy of this block (spec §5's
    /// memory-budget loader), in which case that copy is dispatched to
    /// directly and no block read happens at all.
    pub fn apply_visitor_to_entry<V: NodeVisitor>(
        entry: &mut NodeEntry,
        visitor: &mut V,
        bm: &BlockManager,
        cfg: &Config,
        mut residency: Option<&mut crate::residency::ResidencyCache>,
    ) -> Result<V::Output> {
        match &mut entry.locator {
            Locator::Owned(boxed) => boxed.apply_visitor(visitor, bm, cfg, residency),
            Locator::Block(bid) => {
                let bid = *bid;
                match entry.kind {
                    NodeKind::IoInternal | NodeKind::LoadedIoInternal => {
                        if let Some(cached) = residency.as_deref_mut().and_then(|r| r.io_internal_mut(bid)) {
                            return visitor.io_internal(cached, bm, cfg, None);
                        }
                        let mut node = IoInternalNode {
                            block0: bid,
                            block1: bid + 1,
                            block0_content: None,
                            sample_buffer: None,
                            sticky: false,
                        };
                        visitor.io_internal(&mut node, bm, cfg, residency)
                    }
                    NodeKind::IoLeaf | NodeKind::LoadedIoLeaf => {
                        if let Some(cached) = residency.as_deref_mut().and_then(|r| r.io_leaf_mut(bid)) {
                            return visitor.io_leaf(cached, bm, cfg, None);
                        }
                        let mut leaf = IoLeafNode {
                            block: bid,
                            values: None,
                            sticky: false,
                        };
                        leaf.load_values(bm, cfg, entry.subtree_size as usize)?;
                        visitor.io_leaf(&mut leaf, bm, cfg, residency)
                    }
                    _ => unreachable!("a block locator only ever holds an io node"),
                }
            }
        }
    }
}
