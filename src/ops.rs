//! Insert, erase, find (spec C10). Insertion is buffered at mem-leaves with
//! deferred flush to IO children; IO-internal and IO-leaf nodes merge the
//! incoming sorted range into their own sorted content and split only when
//! they overflow. Erase is naive — no underflow rebalancing (spec §9 open
//! question: "preserve this behavior; do not infer rebalancing").

use crate::block::BlockManager;
use crate::build::pack_sizes;
use crate::config::Config;
use crate::error::Result;
use crate::geometry::{BBox, Point};
use crate::hilbert::{HilbertComputer, Key};
use crate::node::{
    BoundedVec, ChildrenAndBuffer, IoInternalNode, IoLeafNode, Locator, MemInternalNode,
    MemLeafNode, Node, NodeEntry, NodeKind,
};
use crate::sample::build_node_samples;
use rand::Rng;

/// Index of the last child whose `min_key <= key` — the child whose range
/// contains `key` (spec §4.10).
fn choose_child_index(children: &[NodeEntry], key: &Key) -> usize {
    let mut idx = 0;
    for (i, child) in children.iter().enumerate() {
        if child.min_key <= *key {
            idx = i;
        } else {
            break;
        }
    }
    idx
}

fn clone_io_entry(e: &NodeEntry) -> NodeEntry {
    let bid = match e.locator {
        Locator::Block(b) => b,
        Locator::Owned(_) => unreachable!("an io child entry is always block-located"),
    };
    NodeEntry::on_disk(e.kind, e.bbox.clone(), e.subtree_size, e.min_key.clone(), bid)
}

/// Replaces `children` with a freshly sized `BoundedVec` holding the sorted
/// union of its current contents and `new_entries`, growing capacity rather
/// than splitting — in-memory fan-out is re-leveled on the next reopen
/// (spec §4.5), so a mem node simply grows here instead of splitting.
fn insert_sorted_growing(children: &mut BoundedVec<NodeEntry>, new_entries: Vec<NodeEntry>) {
    let old_cap = children.cap();
    let mut items = std::mem::replace(children, BoundedVec::new(old_cap)).into_vec();
    items.extend(new_entries);
    items.sort_by(|a, b| a.min_key.cmp(&b.min_key));
    let cap = items.len().max(old_cap);
    *children = BoundedVec::with_items(cap, items);
}

fn patch_sample_on_insert<R: Rng>(buffer: &mut [Point], point: &Point, subtree_size_after: u64, rng: &mut R) {
    if subtree_size_after == 0 {
        return;
    }
    let p = 1.0 / subtree_size_after as f64;
    for slot in buffer.iter_mut() {
        if rng.gen_bool(p) {
            *slot = point.clone();
        }
    }
}

/// Assigns each `(point, key)` to the index of the child whose range covers
/// `key`, assuming both `children` and `sorted` are ascending by key.
fn partition_by_children(children: &[NodeEntry], sorted: Vec<(Point, Key)>) -> Vec<Vec<Point>> {
    let mut result: Vec<Vec<Point>> = (0..children.len()).map(|_| Vec::new()).collect();
    let mut ci = 0;
    for (p, k) in sorted {
        while ci + 1 < children.len() && children[ci + 1].min_key <= k {
            ci += 1;
        }
        result[ci].push(p);
    }
    result
}

fn merge_sorted_points<H: HilbertComputer>(a: Vec<Point>, b: Vec<Point>, computer: &H, out: &mut Vec<Point>) {
    let mut a = a.into_iter().map(|p| (computer.compute(&p), p)).peekable();
    let mut b = b.into_iter().map(|p| (computer.compute(&p), p)).peekable();
    loop {
        match (a.peek(), b.peek()) {
            (Some((ka, _)), Some((kb, _))) => {
                if ka <= kb {
                    out.push(a.next().unwrap().1);
                } else {
                    out.push(b.next().unwrap().1);
                }
            }
            (Some(_), None) => out.push(a.next().unwrap().1),
            (None, Some(_)) => out.push(b.next().unwrap().1),
            (None, None) => break,
        }
    }
}

/// Splits an overflowing io-internal's children into `children` (the first
/// group, kept in place) and the remaining groups as freshly allocated
/// sibling io-internals (spec §4.10: "packing children into groups of the
/// chosen step size, a power-of-two division of the current count down to
/// fit the cap").
fn split_io_internal_children(
    children: &mut Vec<NodeEntry>,
    cfg: &Config,
    bm: &BlockManager,
) -> Result<Vec<NodeEntry>> {
    let n = children.len();
    let mut d = 1usize;
    while (n + d - 1) / d > cfg.f_io_max {
        d *= 2;
    }
    let group_size = (n + d - 1) / d;
    let all = std::mem::take(children);
    let mut iter = all.into_iter();
    let mut groups: Vec<Vec<NodeEntry>> = Vec::with_capacity(d);
    loop {
        let g: Vec<NodeEntry> = (&mut iter).take(group_size).collect();
        if g.is_empty() {
            break;
        }
        groups.push(g);
    }
    let first = groups.remove(0);
    *children = first;
    let mut produced = Vec::with_capacity(groups.len());
    for g in groups {
        let bbox = BBox::union_all(g.iter().map(|c| &c.bbox));
        let subtree_size = g.iter().map(|c| c.subtree_size).sum();
        let min_key = g[0].min_key.clone();
        let mut node = IoInternalNode::allocate(bm)?;
        node.block0_content = Some(ChildrenAndBuffer {
            children: g,
            insertion_buffer: Vec::new(),
        });
        node.sample_buffer = Some(Vec::new());
        node.save_to_blocks(bm, cfg)?;
        produced.push(NodeEntry::on_disk(NodeKind::IoInternal, bbox, subtree_size, min_key, node.block0));
    }
    Ok(produced)
}

/// Merges a sorted `points` range into an io-kind `entry`, splitting and
/// returning new sibling entries if it overflows (spec §4.10). `points` must
/// be non-empty and already sorted by key.
fn insert_range_into_io<H: HilbertComputer>(
    entry: &mut NodeEntry,
    points: Vec<Point>,
    computer: &H,
    bm: &BlockManager,
    cfg: &Config,
) -> Result<Vec<NodeEntry>> {
    if points.is_empty() {
        return Ok(Vec::new());
    }
    let old_subtree_size = entry.subtree_size;
    let bid = match entry.locator {
        Locator::Block(b) => b,
        Locator::Owned(_) => unreachable!("an io entry is always block-located"),
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
            let mut merged = Vec::with_capacity(cb.insertion_buffer.len() + points.len());
            merge_sorted_points(cb.insertion_buffer, points, computer, &mut merged);
            let mut children = cb.children;
            let mut new_buffer = merged;
            if new_buffer.len() > IoInternalNode::buffer_capacity(cfg) {
                let keyed: Vec<(Point, Key)> = new_buffer
                    .drain(..)
                    .map(|p| {
                        let k = computer.compute(&p);
                        (p, k)
                    })
                    .collect();
                let partitions = partition_by_children(&children, keyed);
                let mut produced = Vec::new();
                for (i, pts) in partitions.into_iter().enumerate() {
                    if pts.is_empty() {
                        continue;
                    }
                    let extra = insert_range_into_io(&mut children[i], pts, computer, bm, cfg)?;
                    produced.extend(extra);
                }
                if !produced.is_empty() {
                    children.append(&mut produced);
                    children.sort_by(|a, b| a.min_key.cmp(&b.min_key));
                }
            }
            let mut split_out = Vec::new();
            if children.len() > cfg.f_io_max {
                split_out = split_io_internal_children(&mut children, cfg, bm)?;
            }
            entry.bbox = BBox::union_all(children.iter().map(|c| &c.bbox));
            entry.subtree_size = children.iter().map(|c| c.subtree_size).sum::<u64>() + new_buffer.len() as u64;
            entry.min_key = children[0].min_key.clone();
            let samples = io.load_samples(bm, cfg)?.clone();
            io.block0_content = Some(ChildrenAndBuffer {
                children,
                insertion_buffer: new_buffer,
            });
            io.sample_buffer = Some(samples);
            io.save_to_blocks(bm, cfg)?;
            Ok(split_out)
        }
        NodeKind::IoLeaf | NodeKind::LoadedIoLeaf => {
            let mut leaf = IoLeafNode {
                block: bid,
                values: None,
                sticky: false,
            };
            let existing = leaf.load_values(bm, cfg, old_subtree_size as usize)?.clone();
            let mut merged = Vec::with_capacity(existing.len() + points.len());
            merge_sorted_points(existing, points, computer, &mut merged);
            let cap = IoLeafNode::capacity(cfg).max(1);
            if merged.len() > cap {
                let min = (cap / 4).max(1);
                let sizes = pack_sizes(merged.len(), min, cap);
                let mut iter = merged.into_iter();
                let mut groups: Vec<Vec<Point>> = sizes.iter().map(|&s| (&mut iter).take(s).collect()).collect();
                let first = groups.remove(0);
                entry.bbox = BBox::union_all(first.iter().map(BBox::of_point).collect::<Vec<_>>().iter());
                entry.subtree_size = first.len() as u64;
                entry.min_key = computer.compute(&first[0]);
                leaf.values = Some(first);
                leaf.save_to_block(bm, cfg)?;
                let mut extra = Vec::with_capacity(groups.len());
                for g in groups {
                    let bbox = BBox::union_all(g.iter().map(BBox::of_point).collect::<Vec<_>>().iter());
                    let min_key = computer.compute(&g[0]);
                    let size = g.len() as u64;
                    let mut nl = IoLeafNode::allocate(bm)?;
                    nl.values = Some(g);
                    nl.save_to_block(bm, cfg)?;
                    extra.push(NodeEntry::on_disk(NodeKind::IoLeaf, bbox, size, min_key, nl.block));
                }
                Ok(extra)
            } else {
                entry.bbox = BBox::union_all(merged.iter().map(BBox::of_point).collect::<Vec<_>>().iter());
                entry.subtree_size = merged.len() as u64;
                entry.min_key = computer.compute(&merged[0]);
                leaf.values = Some(merged);
                leaf.save_to_block(bm, cfg)?;
                Ok(Vec::new())
            }
        }
        _ => unreachable!("an io child entry must be io-kind"),
    }
}

fn flush_mem_leaf<H: HilbertComputer>(leaf: &mut MemLeafNode, computer: &H, bm: &BlockManager, cfg: &Config) -> Result<()> {
    let pending = std::mem::take(&mut leaf.insertion_buffer);
    let mut keyed: Vec<(Point, Key)> = pending
        .into_iter()
        .map(|p| {
            let k = computer.compute(&p);
            (p, k)
        })
        .collect();
    keyed.sort_by(|a, b| a.1.cmp(&b.1));
    if leaf.children.is_empty() {
        leaf.insertion_buffer = keyed.into_iter().map(|(p, _)| p).collect();
        return Ok(());
    }
    let partitions = partition_by_children(leaf.children.as_slice(), keyed);
    let mut produced = Vec::new();
    for (i, pts) in partitions.into_iter().enumerate() {
        if pts.is_empty() {
            continue;
        }
        let child = leaf.children.get_mut(i).expect("partition index in range");
        let extra = insert_range_into_io(child, pts, computer, bm, cfg)?;
        produced.extend(extra);
    }
    if !produced.is_empty() {
        insert_sorted_growing(&mut leaf.children, produced);
    }
    Ok(())
}

fn rebuild_root_over_split(root: &mut NodeEntry, mut siblings: Vec<NodeEntry>, cfg: &Config) {
    let placeholder = NodeEntry::on_disk(NodeKind::IoLeaf, BBox::empty(root.bbox.dim()), 0, Key::min(root.min_key.words()), 1);
    let old_root = std::mem::replace(root, placeholder);
    let mut children = Vec::with_capacity(1 + siblings.len());
    children.push(old_root);
    children.append(&mut siblings);
    children.sort_by(|a, b| a.min_key.cmp(&b.min_key));
    let bbox = BBox::union_all(children.iter().map(|c| &c.bbox));
    let subtree_size = children.iter().map(|c| c.subtree_size).sum();
    let min_key = children[0].min_key.clone();
    let node = MemInternalNode {
        children: BoundedVec::with_items(cfg.f_mem_max.max(children.len()), children),
        sample_buffer: Vec::new(),
        sample_target: cfg.mem_sample_size,
    };
    *root = NodeEntry::owned(NodeKind::MemInternal, bbox, subtree_size, min_key, Node::MemInternal(node));
}

fn insert_into_entry<H: HilbertComputer, R: Rng>(
    entry: &mut NodeEntry,
    point: Point,
    key: &Key,
    computer: &H,
    bm: &BlockManager,
    cfg: &Config,
    rng: &mut R,
) -> Result<Vec<NodeEntry>> {
    match &mut entry.locator {
        Locator::Owned(boxed) => match &mut **boxed {
            Node::MemInternal(mem) => {
                entry.bbox.expand_point(&point);
                entry.subtree_size += 1;
                patch_sample_on_insert(&mut mem.sample_buffer, &point, entry.subtree_size, rng);
                if mem.children.is_empty() {
                    return Ok(Vec::new());
                }
                let idx = choose_child_index(mem.children.as_slice(), key);
                let child = mem.children.get_mut(idx).expect("idx in range");
                let siblings = insert_into_entry(child, point, key, computer, bm, cfg, rng)?;
                if !siblings.is_empty() {
                    insert_sorted_growing(&mut mem.children, siblings);
                }
                Ok(Vec::new())
            }
            Node::MemLeaf(leaf) => {
                entry.bbox.expand_point(&point);
                entry.subtree_size += 1;
                patch_sample_on_insert(&mut leaf.sample_buffer, &point, entry.subtree_size, rng);
                leaf.insertion_buffer.push(point);
                if leaf.insertion_buffer.len() > cfg.insertion_buffer_capacity {
                    flush_mem_leaf(leaf, computer, bm, cfg)?;
                }
                Ok(Vec::new())
            }
            _ => unreachable!("an owned locator only ever holds a mem node"),
        },
        Locator::Block(_) => insert_range_into_io(entry, vec![point], computer, bm, cfg),
    }
}

/// Inserts `point`, descending by its Hilbert key from `root` (spec §4.10).
pub fn insert<H: HilbertComputer, R: Rng>(
    root: &mut NodeEntry,
    point: Point,
    computer: &H,
    bm: &BlockManager,
    cfg: &Config,
    rng: &mut R,
) -> Result<()> {
    let key = computer.compute(&point);
    let siblings = insert_into_entry(root, point, &key, computer, bm, cfg, rng)?;
    if !siblings.is_empty() {
        rebuild_root_over_split(root, siblings, cfg);
    }
    Ok(())
}

fn find_in_entry(entry: &NodeEntry, probe: &Point, key: &Key, bm: &BlockManager, cfg: &Config) -> Result<bool> {
    match &entry.locator {
        Locator::Owned(boxed) => match boxed.as_ref() {
            Node::MemInternal(mem) => {
                if mem.children.is_empty() {
                    return Ok(false);
                }
                let idx = choose_child_index(mem.children.as_slice(), key);
                find_in_entry(mem.children.get(idx).unwrap(), probe, key, bm, cfg)
            }
            Node::MemLeaf(leaf) => {
                if leaf.insertion_buffer.iter().any(|p| p.id == probe.id) {
                    return Ok(true);
                }
                if leaf.children.is_empty() {
                    return Ok(false);
                }
                let idx = choose_child_index(leaf.children.as_slice(), key);
                find_in_entry(leaf.children.get(idx).unwrap(), probe, key, bm, cfg)
            }
            _ => unreachable!("an owned locator only ever holds a mem node"),
        },
        Locator::Block(bid) => {
            let bid = *bid;
            match entry.kind {
                NodeKind::IoInternal | NodeKind::LoadedIoInternal => {
                    let mut io = IoInternalNode {
                        block0: bid,
                        block1: bid + 1,
                        block0_content: None,
                        sample_buffer: None,
                        sticky: false,
                    };
                    let cb = io.load_children_and_buffer(bm, cfg)?;
                    if cb.insertion_buffer.iter().any(|p| p.id == probe.id) {
                        return Ok(true);
                    }
                    if cb.children.is_empty() {
                        return Ok(false);
                    }
                    let idx = choose_child_index(&cb.children, key);
                    let child = clone_io_entry(&cb.children[idx]);
                    find_in_entry(&child, probe, key, bm, cfg)
                }
                NodeKind::IoLeaf | NodeKind::LoadedIoLeaf => {
                    let mut leaf = IoLeafNode {
                        block: bid,
                        values: None,
                        sticky: false,
                    };
                    let values = leaf.load_values(bm, cfg, entry.subtree_size as usize)?;
                    Ok(values.iter().any(|p| p.id == probe.id))
                }
                _ => unreachable!("a block locator only ever holds an io node"),
            }
        }
    }
}

/// Key-indexed descent with buffer inspection at each mem-leaf, early-exit
/// on the first identifier match (spec §4.10).
pub fn find<H: HilbertComputer>(root: &NodeEntry, probe: &Point, computer: &H, bm: &BlockManager, cfg: &Config) -> Result<bool> {
    let key = computer.compute(probe);
    find_in_entry(root, probe, &key, bm, cfg)
}

fn erase_in_entry<H: HilbertComputer, R: Rng>(
    entry: &mut NodeEntry,
    probe: &Point,
    key: &Key,
    computer: &H,
    bm: &BlockManager,
    cfg: &Config,
    rng: &mut R,
) -> Result<bool> {
    match &mut entry.locator {
        Locator::Owned(boxed) => match &mut **boxed {
            Node::MemInternal(mem) => {
                if mem.children.is_empty() {
                    return Ok(false);
                }
                let idx = choose_child_index(mem.children.as_slice(), key);
                let found = erase_in_entry(mem.children.get_mut(idx).unwrap(), probe, key, computer, bm, cfg, rng)?;
                if found {
                    let (bbox, subtree_size, min_key) = mem.summarize();
                    entry.bbox = bbox;
                    entry.subtree_size = subtree_size;
                    entry.min_key = min_key;
                }
                Ok(found)
            }
            Node::MemLeaf(leaf) => {
                if let Some(pos) = leaf.insertion_buffer.iter().position(|p| p.id == probe.id) {
                    leaf.insertion_buffer.remove(pos);
                    let (bbox, subtree_size, min_key) = leaf.summarize();
                    entry.bbox = bbox;
                    entry.subtree_size = subtree_size;
                    entry.min_key = min_key;
                    build_node_samples(entry, 0, rng, bm, cfg)?;
                    return Ok(true);
                }
                if leaf.children.is_empty() {
                    return Ok(false);
                }
                let idx = choose_child_index(leaf.children.as_slice(), key);
                let found = erase_in_entry(leaf.children.get_mut(idx).unwrap(), probe, key, computer, bm, cfg, rng)?;
                if found {
                    let (bbox, subtree_size, min_key) = leaf.summarize();
                    entry.bbox = bbox;
                    entry.subtree_size = subtree_size;
                    entry.min_key = min_key;
                }
                Ok(found)
            }
            _ => unreachable!("an owned locator only ever holds a mem node"),
        },
        Locator::Block(bid) => {
            let bid = *bid;
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
                    let mut children = cb.children;
                    let mut insertion_buffer = cb.insertion_buffer;
                    let mut found = false;
                    if let Some(pos) = insertion_buffer.iter().position(|p| p.id == probe.id) {
                        insertion_buffer.remove(pos);
                        found = true;
                    } else if !children.is_empty() {
                        let idx = choose_child_index(&children, key);
                        let mut child = clone_io_entry(&children[idx]);
                        if erase_in_entry(&mut child, probe, key, computer, bm, cfg, rng)? {
                            children[idx] = child;
                            found = true;
                        }
                    }
                    if found {
                        entry.bbox = if children.is_empty() {
                            BBox::empty(entry.bbox.dim())
                        } else {
                            BBox::union_all(children.iter().map(|c| &c.bbox))
                        };
                        entry.subtree_size = children.iter().map(|c| c.subtree_size).sum::<u64>() + insertion_buffer.len() as u64;
                        entry.min_key = children
                            .first()
                            .map(|c| c.min_key.clone())
                            .unwrap_or_else(|| Key::min(cfg.hilbert_words));
                        io.block0_content = Some(ChildrenAndBuffer { children, insertion_buffer });
                        io.sample_buffer = Some(io.load_samples(bm, cfg)?.clone());
                        io.save_to_blocks(bm, cfg)?;
                        build_node_samples(entry, 0, rng, bm, cfg)?;
                    }
                    Ok(found)
                }
                NodeKind::IoLeaf | NodeKind::LoadedIoLeaf => {
                    let mut leaf = IoLeafNode {
                        block: bid,
                        values: None,
                        sticky: false,
                    };
                    let mut values = leaf.load_values(bm, cfg, entry.subtree_size as usize)?.clone();
                    if let Some(pos) = values.iter().position(|p| p.id == probe.id) {
                        values.remove(pos);
                        entry.bbox = if values.is_empty() {
                            BBox::empty(entry.bbox.dim())
                        } else {
                            BBox::union_all(values.iter().map(BBox::of_point).collect::<Vec<_>>().iter())
                        };
                        entry.subtree_size = values.len() as u64;
                        entry.min_key = values
                            .first()
                            .map(|p| computer.compute(p))
                            .unwrap_or_else(|| Key::min(cfg.hilbert_words));
                        leaf.values = Some(values);
                        leaf.save_to_block(bm, cfg)?;
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                }
                _ => unreachable!("a block locator only ever holds an io node"),
            }
        }
    }
}

/// Erases the point matching `probe`'s identifier. No underflow
/// rebalancing is performed (spec §9, preserved "naive erase" behavior).
pub fn erase<H: HilbertComputer, R: Rng>(
    root: &mut NodeEntry,
    probe: &Point,
    computer: &H,
    bm: &BlockManager,
    cfg: &Config,
    rng: &mut R,
) -> Result<bool> {
    let key = computer.compute(probe);
    erase_in_entry(root, probe, &key, computer, bm, cfg, rng)
}
