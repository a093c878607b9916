//! C4: sorts the input by Hilbert key and packs it into on-disk io-leaves
//! and io-internals, level by level, until the top layer is small enough
//! to become the seed for the in-memory layers (spec §4.4).
//!
//! The sort itself is an opaque external collaborator (spec §1, §9,
//! "External sort dependency"); [`InMemorySort`] is a minimal in-process
//! stand-in for it, analogous to treating the Hilbert computer as opaque
//! in `hilbert.rs`.

use crate::block::BlockManager;
use crate::build::fanout::pack_sizes;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::{BBox, Point};
use crate::hilbert::{HilbertComputer, Key};
use crate::node::codec::{read_entry, write_entry};
use crate::node::{ChildrenAndBuffer, IoInternalNode, IoLeafNode, NodeEntry, NodeKind};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

/// Sorts `(Point, HilbertKey)` pairs by key. The core only specifies the
/// interface; a real deployment would delegate to an out-of-core merge
/// sort once input no longer fits in memory.
pub trait ExternalSort {
    fn sort(&self, points: Vec<Point>, computer: &dyn HilbertComputer) -> Result<Vec<(Point, Key)>>;
}

pub struct InMemorySort;

impl ExternalSort for InMemorySort {
    fn sort(&self, points: Vec<Point>, computer: &dyn HilbertComputer) -> Result<Vec<(Point, Key)>> {
        let mut keyed: Vec<(Point, Key)> = points
            .into_iter()
            .map(|p| {
                let k = computer.compute(&p);
                (p, k)
            })
            .collect();
        keyed.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(keyed)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuildStats {
    pub read_time: Duration,
    pub sort_time: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoLayersParameters {
    pub fill_ratio: f64,
    pub block_size: usize,
    pub max_top_layer: usize,
    pub cached_blocks: usize,
}

/// Builds the on-disk IO forest and returns its top layer (the roots).
/// Each io-internal's locator records only its first block (`block0`); the
/// second block is always `block0 + 1` (spec §4.4, "reserves 2 blocks").
pub fn build_io_layers(
    points: Vec<Point>,
    computer: &dyn HilbertComputer,
    sorter: &dyn ExternalSort,
    bm: &BlockManager,
    cfg: &Config,
) -> Result<(Vec<NodeEntry>, BuildStats)> {
    log::trace!("build_io_layers: enter with {} points", points.len());
    let read_start = Instant::now();
    let n = points.len();
    let read_time = read_start.elapsed();

    let sort_start = Instant::now();
    let sorted = sorter.sort(points, computer)?;
    let sort_time = sort_start.elapsed();
    debug_assert_eq!(sorted.len(), n);

    let leaf_cap = IoLeafNode::capacity(cfg).max(1);
    let min_leaf = (leaf_cap / 4).max(1);
    let mut layer = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    for size in pack_sizes(n, min_leaf, leaf_cap) {
        let chunk: Vec<(Point, Key)> = (&mut iter).take(size).collect();
        let min_key = chunk[0].1.clone();
        let mut bbox = BBox::of_point(&chunk[0].0);
        for (p, _) in &chunk[1..] {
            bbox.expand_point(p);
        }
        let values: Vec<Point> = chunk.into_iter().map(|(p, _)| p).collect();
        let mut leaf = IoLeafNode::allocate(bm)?;
        leaf.values = Some(values);
        leaf.save_to_block(bm, cfg)?;
        let entry = NodeEntry::on_disk(NodeKind::IoLeaf, bbox, size as u64, min_key, leaf.block);
        layer.push(entry);
    }
    log::debug!("build_io_layers: packed {} io-leaves", layer.len());

    while layer.len() > cfg.max_top_layer_io_node_count && layer.len() > 1 {
        let sizes = pack_sizes(layer.len(), cfg.f_io_min, cfg.f_io_max);
        let mut next_layer = Vec::with_capacity(sizes.len());
        let mut children_iter = layer.into_iter();
        for size in sizes {
            let children: Vec<NodeEntry> = (&mut children_iter).take(size).collect();
            let bbox = BBox::union_all(children.iter().map(|c| &c.bbox));
            let subtree_size = children.iter().map(|c| c.subtree_size).sum();
            let min_key = children[0].min_key.clone();
            let mut node = IoInternalNode::allocate(bm)?;
            node.block0_content = Some(ChildrenAndBuffer {
                children,
                insertion_buffer: Vec::new(),
            });
            node.sample_buffer = Some(Vec::new());
            node.save_to_blocks(bm, cfg)?;
            let entry = NodeEntry::on_disk(NodeKind::IoInternal, bbox, subtree_size, min_key, node.block0);
            next_layer.push(entry);
        }
        log::debug!("build_io_layers: packed next level, {} nodes", next_layer.len());
        layer = next_layer;
    }

    Ok((
        layer,
        BuildStats {
            read_time,
            sort_time,
        },
    ))
}

pub fn save_io_layers(
    path: impl AsRef<Path>,
    cfg: &Config,
    cached_blocks: usize,
    top_layer: &[NodeEntry],
) -> Result<()> {
    let params = IoLayersParameters {
        fill_ratio: cfg.fill_ratio,
        block_size: cfg.block_size,
        max_top_layer: cfg.max_top_layer_io_node_count,
        cached_blocks,
    };
    let encoded = bincode::serialize(&params).map_err(|e| Error::Corrupted(e.to_string()))?;
    let mut f = BufWriter::new(File::create(path)?);
    f.write_u64::<LittleEndian>(encoded.len() as u64)?;
    f.write_all(&encoded)?;
    f.write_u64::<LittleEndian>(top_layer.len() as u64)?;
    for entry in top_layer {
        write_entry(&mut f, entry)?;
    }
    Ok(())
}

pub fn load_io_layers(
    path: impl AsRef<Path>,
    dim: usize,
    hilbert_words: usize,
) -> Result<(IoLayersParameters, Vec<NodeEntry>)> {
    let mut f = BufReader::new(File::open(path)?);
    let len = f.read_u64::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    f.read_exact(&mut buf)?;
    let params: IoLayersParameters =
        bincode::deserialize(&buf).map_err(|e| Error::Corrupted(e.to_string()))?;
    let count = f.read_u64::<LittleEndian>()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(read_entry(&mut f, dim, hilbert_words)?);
    }
    Ok((params, entries))
}
