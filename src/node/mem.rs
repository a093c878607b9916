//! In-memory node kinds (spec §3): `mem-internal` and `mem-leaf`.

use super::bounded_vec::BoundedVec;
use super::entry::NodeEntry;
use crate::geometry::{BBox, Point};
use crate::hilbert::Key;

/// Internal node whose children live entirely in process memory (or point
/// to IO nodes). Carries an optional sample buffer (spec §3,
/// "sample-buffer invariant"); `S = 0` disables sampling for this node.
#[derive(Clone)]
pub struct MemInternalNode {
    pub children: BoundedVec<NodeEntry>,
    pub sample_buffer: Vec<Point>,
    pub sample_target: usize,
}

impl MemInternalNode {
    pub fn new(f_mem_max: usize, sample_target: usize) -> Self {
        MemInternalNode {
            children: BoundedVec::new(f_mem_max),
            sample_buffer: Vec::new(),
            sample_target,
        }
    }

    /// Recomputes `bbox`, `subtree_size`, `min_key` from current children.
    pub fn summarize(&self) -> (BBox, u64, Key) {
        let dim = self
            .children
            .first()
            .map(|c| c.bbox.dim())
            .unwrap_or(0);
        let bbox = if self.children.is_empty() {
            BBox::empty(dim)
        } else {
            BBox::union_all(self.children.iter().map(|c| &c.bbox))
        };
        let subtree_size = self.children.iter().map(|c| c.subtree_size).sum();
        let min_key = self
            .children
            .first()
            .map(|c| c.min_key.clone())
            .unwrap_or_else(|| Key(vec![]));
        (bbox, subtree_size, min_key)
    }
}

/// Internal node one level above IO nodes: in addition to its children it
/// buffers points pending flush (spec §3, "insertion buffer").
#[derive(Clone)]
pub struct MemLeafNode {
    pub children: BoundedVec<NodeEntry>,
    pub insertion_buffer: Vec<Point>,
    pub sample_buffer: Vec<Point>,
    pub sample_target: usize,
}

impl MemLeafNode {
    pub fn new(f_mem_max: usize, sample_target: usize) -> Self {
        MemLeafNode {
            children: BoundedVec::new(f_mem_max),
            insertion_buffer: Vec::new(),
            sample_buffer: Vec::new(),
            sample_target,
        }
    }

    pub fn summarize(&self) -> (BBox, u64, Key) {
        let dim = self
            .children
            .first()
            .map(|c| c.bbox.dim())
            .or_else(|| self.insertion_buffer.first().map(|p| p.coords.len()))
            .unwrap_or(0);
        let mut bbox = if self.children.is_empty() {
            BBox::empty(dim)
        } else {
            BBox::union_all(self.children.iter().map(|c| &c.bbox))
        };
        for p in &self.insertion_buffer {
            bbox.expand_point(p);
        }
        let subtree_size = self.children.iter().map(|c| c.subtree_size).sum::<u64>()
            + self.insertion_buffer.len() as u64;
        let min_key = self
            .children
            .first()
            .map(|c| c.min_key.clone())
            .unwrap_or_else(|| Key(vec![]));
        (bbox, subtree_size, min_key)
    }
}
