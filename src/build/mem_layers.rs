//! C5: synthesizes in-memory layers above the on-disk IO forest's top
//! layer (spec §4.5), or restores a previously saved `.memnodes` snapshot.

use crate::build::fanout::pack_sizes;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::{BBox, Point};
use crate::hilbert::Key;
use crate::node::codec::{read_entry, write_entry};
use crate::node::{BoundedVec, Locator, MemInternalNode, MemLeafNode, Node, NodeEntry, NodeKind};
use crate::serialization::{read_point, write_point};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Packs `top_layer` (io-kind entries) into mem-leaf then mem-internal
/// layers until a single root entry remains. If `top_layer` already holds
/// one entry, that entry becomes the root directly.
pub fn build_mem_layers(top_layer: Vec<NodeEntry>, cfg: &Config) -> NodeEntry {
    assert!(!top_layer.is_empty(), "cannot build mem layers over an empty forest");
    if top_layer.len() == 1 {
        return top_layer.into_iter().next().unwrap();
    }
    let mut layer = top_layer;
    let mut first_level = true;
    loop {
        let min = cfg.f_mem_min();
        let max = cfg.f_mem_max;
        let sizes = pack_sizes(layer.len(), min, max);
        let mut next_layer = Vec::with_capacity(sizes.len());
        let mut iter = layer.into_iter();
        for size in sizes {
            let children: Vec<NodeEntry> = (&mut iter).take(size).collect();
            let bbox = BBox::union_all(children.iter().map(|c| &c.bbox));
            let subtree_size = children.iter().map(|c| c.subtree_size).sum();
            let min_key = children[0].min_key.clone();
            let (kind, node) = if first_level {
                (
                    NodeKind::MemLeaf,
                    Node::MemLeaf(MemLeafNode {
                        children: BoundedVec::with_items(max, children),
                        insertion_buffer: Vec::new(),
                        sample_buffer: Vec::new(),
                        sample_target: cfg.mem_sample_size,
                    }),
                )
            } else {
                (
                    NodeKind::MemInternal,
                    Node::MemInternal(MemInternalNode {
                        children: BoundedVec::with_items(max, children),
                        sample_buffer: Vec::new(),
                        sample_target: cfg.mem_sample_size,
                    }),
                )
            };
            next_layer.push(NodeEntry::owned(kind, bbox, subtree_size, min_key, node));
        }
        first_level = false;
        if next_layer.len() == 1 {
            return next_layer.into_iter().next().unwrap();
        }
        layer = next_layer;
    }
}

fn write_entry_header<W: Write>(w: &mut W, entry: &NodeEntry) -> Result<()> {
    w.write_u8(entry.kind as u8)?;
    w.write_u64::<LittleEndian>(entry.subtree_size)?;
    crate::serialization::write_bbox(w, &entry.bbox)?;
    crate::serialization::write_key(w, &entry.min_key)?;
    Ok(())
}

fn read_entry_header<R: Read>(r: &mut R, dim: usize, words: usize) -> Result<(NodeKind, u64, BBox, Key)> {
    let kind_byte = r.read_u8()?;
    let kind = NodeKind::from_u8(kind_byte)
        .ok_or_else(|| Error::Corrupted(format!("unknown node kind byte {kind_byte} in memnodes snapshot")))?;
    let subtree_size = r.read_u64::<LittleEndian>()?;
    let bbox = crate::serialization::read_bbox(r, dim)?;
    let min_key = crate::serialization::read_key(r, words)?;
    Ok((kind, subtree_size, bbox, min_key))
}

fn write_points<W: Write>(w: &mut W, pts: &[Point]) -> Result<()> {
    w.write_u32::<LittleEndian>(pts.len() as u32)?;
    for p in pts {
        write_point(w, p)?;
    }
    Ok(())
}

fn read_points<R: Read>(r: &mut R, dim: usize) -> Result<Vec<Point>> {
    let n = r.read_u32::<LittleEndian>()? as usize;
    let mut v = Vec::with_capacity(n);
    for _ in 0..n {
        v.push(read_point(r, dim)?);
    }
    Ok(v)
}

/// Writes one mem entry, recursively: entry header, sample buffer, then
/// (mem-internal) a child count and each child recursively, or
/// (mem-leaf) the insertion buffer followed by its io-entry children
/// written as ordinary fixed-width entries (spec §6, `.memnodes`).
pub fn save_mem_node<W: Write>(w: &mut W, entry: &NodeEntry) -> Result<()> {
    write_entry_header(w, entry)?;
    match &entry.locator {
        Locator::Owned(boxed) => match boxed.as_ref() {
            Node::MemInternal(mem) => {
                write_points(w, &mem.sample_buffer)?;
                w.write_u32::<LittleEndian>(mem.children.len() as u32)?;
                for child in mem.children.iter() {
                    save_mem_node(w, child)?;
                }
                Ok(())
            }
            Node::MemLeaf(leaf) => {
                write_points(w, &leaf.sample_buffer)?;
                write_points(w, &leaf.insertion_buffer)?;
                w.write_u32::<LittleEndian>(leaf.children.len() as u32)?;
                for child in leaf.children.iter() {
                    write_entry(w, child)?;
                }
                Ok(())
            }
            _ => Err(Error::Corrupted("memnodes snapshot may only hold mem nodes".into())),
        },
        Locator::Block(_) => Err(Error::Corrupted(
            "save_mem_node requires an in-memory-owned entry".into(),
        )),
    }
}

pub fn load_mem_node<R: Read>(r: &mut R, cfg: &Config) -> Result<NodeEntry> {
    let (kind, subtree_size, bbox, min_key) = read_entry_header(r, cfg.dim, cfg.hilbert_words)?;
    match kind {
        NodeKind::MemInternal => {
            let sample_buffer = read_points(r, cfg.dim)?;
            let count = r.read_u32::<LittleEndian>()? as usize;
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                children.push(load_mem_node(r, cfg)?);
            }
            let node = Node::MemInternal(MemInternalNode {
                children: BoundedVec::with_items(cfg.f_mem_max, children),
                sample_buffer,
                sample_target: cfg.mem_sample_size,
            });
            Ok(NodeEntry::owned(kind, bbox, subtree_size, min_key, node))
        }
        NodeKind::MemLeaf => {
            let sample_buffer = read_points(r, cfg.dim)?;
            let insertion_buffer = read_points(r, cfg.dim)?;
            let count = r.read_u32::<LittleEndian>()? as usize;
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                children.push(read_entry(r, cfg.dim, cfg.hilbert_words)?);
            }
            let node = Node::MemLeaf(MemLeafNode {
                children: BoundedVec::with_items(cfg.f_mem_max, children),
                insertion_buffer,
                sample_buffer,
                sample_target: cfg.mem_sample_size,
            });
            Ok(NodeEntry::owned(kind, bbox, subtree_size, min_key, node))
        }
        _ => Err(Error::Corrupted(
            "memnodes snapshot root must be a mem node".into(),
        )),
    }
}

pub fn save_mem_nodes(path: impl AsRef<Path>, root: &NodeEntry) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    save_mem_node(&mut w, root)
}

pub fn load_mem_nodes(path: impl AsRef<Path>, cfg: &Config) -> Result<NodeEntry> {
    let mut r = BufReader::new(File::open(path)?);
    load_mem_node(&mut r, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockId;
    use crate::geometry::PointId;

    fn cfg() -> Config {
        Config {
            dim: 2,
            hilbert_words: 2,
            f_mem_max: 4,
            ..Config::default()
        }
    }

    fn io_leaf_entry(n: u64, bid: BlockId) -> NodeEntry {
        NodeEntry::on_disk(
            NodeKind::IoLeaf,
            BBox {
                lo: vec![0.0, 0.0],
                hi: vec![1.0, 1.0],
            },
            n,
            Key(vec![0, 0]),
            bid,
        )
    }

    #[test]
    fn single_top_entry_becomes_root_unchanged() {
        let cfg = cfg();
        let entry = io_leaf_entry(10, 1);
        let root = build_mem_layers(vec![entry], &cfg);
        assert_eq!(root.kind, NodeKind::IoLeaf);
        assert_eq!(root.subtree_size, 10);
    }

    #[test]
    fn multiple_top_entries_collapse_to_one_root() {
        let cfg = cfg();
        let entries: Vec<NodeEntry> = (0..10).map(|i| io_leaf_entry(5, i + 1)).collect();
        let root = build_mem_layers(entries, &cfg);
        assert_eq!(root.kind, NodeKind::MemLeaf);
        assert_eq!(root.subtree_size, 50);
    }

    #[test]
    fn memnodes_round_trip_preserves_structure() {
        let cfg = cfg();
        let mut leaf = MemLeafNode::new(4, 8);
        leaf.children.push_back(io_leaf_entry(3, 7));
        leaf.insertion_buffer
            .push(Point::new(vec![0.1, 0.1], 0.0, PointId::from_u64(99)));
        leaf.sample_buffer
            .push(Point::new(vec![0.2, 0.2], 0.0, PointId::from_u64(100)));
        let (bbox, subtree_size, min_key) = leaf.summarize();
        let entry = NodeEntry::owned(NodeKind::MemLeaf, bbox, subtree_size, min_key, Node::MemLeaf(leaf));

        let mut buf = Vec::new();
        save_mem_node(&mut buf, &entry).unwrap();
        let restored = load_mem_node(&mut buf.as_slice(), &cfg).unwrap();
        assert_eq!(restored.subtree_size, entry.subtree_size);
        assert_eq!(restored.bbox, entry.bbox);
        match restored.locator {
            Locator::Owned(boxed) => match *boxed {
                Node::MemLeaf(l) => {
                    assert_eq!(l.insertion_buffer.len(), 1);
                    assert_eq!(l.sample_buffer.len(), 1);
                    assert_eq!(l.children.len(), 1);
                }
                _ => panic!("expected mem-leaf"),
            },
            _ => panic!("expected owned locator"),
        }
    }
}
