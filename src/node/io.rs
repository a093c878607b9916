//! On-disk node kinds (spec §3, §6): `io-internal` (two blocks — children +
//! insertion buffer, and samples) and `io-leaf` (one block of sorted
//! points). Both support lazy, independent per-block loading so that a
//! visitor can materialize only what it needs (spec §4.3, §9
//! "partially-loaded IO nodes").

use super::codec::{read_entry, write_entry};
use super::entry::NodeEntry;
use crate::block::{AccessMode, BlockId, BlockManager};
use crate::config::Config;
use crate::error::Result;
use crate::geometry::Point;
use crate::serialization::{
    max_array_len, point_size, read_array_len, read_point, write_array, write_point, BlockCursor,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Content of block B0: children entries plus the pending insertion buffer.
#[derive(Debug, Default, Clone)]
pub struct ChildrenAndBuffer {
    pub children: Vec<NodeEntry>,
    pub insertion_buffer: Vec<Point>,
}

#[derive(Clone)]
pub struct IoInternalNode {
    pub block0: BlockId,
    pub block1: BlockId,
    pub block0_content: Option<ChildrenAndBuffer>,
    pub sample_buffer: Option<Vec<Point>>,
    /// Set by the memory-budget loader (spec §5) to pin residency so that
    /// ordinary cache pressure does not unload this node.
    pub sticky: bool,
}

impl IoInternalNode {
    pub fn allocate(bm: &BlockManager) -> Result<Self> {
        let base = bm.allocate(2)?;
        Ok(IoInternalNode {
            block0: base,
            block1: base + 1,
            block0_content: None,
            sample_buffer: None,
            sticky: false,
        })
    }

    pub fn free_blocks(&self, bm: &BlockManager) -> Result<()> {
        bm.free(self.block0, 2)
    }

    pub fn mem_resident(&self) -> bool {
        self.block0_content.is_some()
    }

    fn buffer_offset(cfg: &Config) -> usize {
        8 + cfg.f_io_max * NodeEntry::serialized_size(cfg.dim, cfg.hilbert_words)
    }

    /// Maximum insertion-buffer length that still fits in block B0 alongside
    /// a full `F_IO_max`-entry children array (spec §6, block B0 layout).
    pub fn buffer_capacity(cfg: &Config) -> usize {
        let remaining = cfg.block_size.saturating_sub(Self::buffer_offset(cfg));
        max_array_len(remaining, point_size(cfg.dim))
    }

    pub fn save_to_blocks(&self, bm: &BlockManager, cfg: &Config) -> Result<()> {
        let content = self
            .block0_content
            .as_ref()
            .expect("save_to_blocks requires loaded block0 content");
        {
            let mut h = bm.get(self.block0, AccessMode::WRITE)?;
            let buf = h.buf_mut();
            let buffer_offset = Self::buffer_offset(cfg);
            {
                let mut cur = BlockCursor::new(&mut *buf);
                cur.write_u64::<LittleEndian>(content.children.len() as u64)?;
                for entry in &content.children {
                    write_entry(&mut cur, entry)?;
                }
            }
            let remaining = cfg.block_size.saturating_sub(buffer_offset);
            let mut buf2 = BlockCursor::new(&mut buf[buffer_offset..]);
            write_array(
                &mut buf2,
                content.insertion_buffer.len(),
                remaining,
                point_size(cfg.dim),
                |w, i| write_point(w, &content.insertion_buffer[i]),
            )?;
        }
        let samples = self
            .sample_buffer
            .as_ref()
            .expect("save_to_blocks requires loaded sample buffer");
        {
            let mut h = bm.get(self.block1, AccessMode::WRITE)?;
            let buf = h.buf_mut();
            let mut cur = BlockCursor::new(buf);
            write_array(
                &mut cur,
                samples.len(),
                cfg.block_size,
                point_size(cfg.dim),
                |w, i| write_point(w, &samples[i]),
            )?;
        }
        Ok(())
    }

    pub fn load_children_and_buffer(&mut self, bm: &BlockManager, cfg: &Config) -> Result<&ChildrenAndBuffer> {
        if self.block0_content.is_none() {
            let h = bm.get(self.block0, AccessMode::READ)?;
            let buf = h.buf();
            let mut cur = std::io::Cursor::new(buf);
            let count = cur.read_u64::<LittleEndian>()? as usize;
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                children.push(read_entry(&mut cur, cfg.dim, cfg.hilbert_words)?);
            }
            let buffer_offset = Self::buffer_offset(cfg);
            let remaining = cfg.block_size.saturating_sub(buffer_offset);
            let mut buf_cur = std::io::Cursor::new(&buf[buffer_offset..]);
            let blen = read_array_len(&mut buf_cur, remaining, point_size(cfg.dim))?;
            let mut insertion_buffer = Vec::with_capacity(blen);
            for _ in 0..blen {
                insertion_buffer.push(read_point(&mut buf_cur, cfg.dim)?);
            }
            self.block0_content = Some(ChildrenAndBuffer {
                children,
                insertion_buffer,
            });
        }
        Ok(self.block0_content.as_ref().unwrap())
    }

    pub fn load_samples(&mut self, bm: &BlockManager, cfg: &Config) -> Result<&Vec<Point>> {
        if self.sample_buffer.is_none() {
            let h = bm.get(self.block1, AccessMode::READ)?;
            let buf = h.buf();
            let mut cur = std::io::Cursor::new(buf);
            let count = read_array_len(&mut cur, cfg.block_size, point_size(cfg.dim))?;
            let mut samples = Vec::with_capacity(count);
            for _ in 0..count {
                samples.push(read_point(&mut cur, cfg.dim)?);
            }
            self.sample_buffer = Some(samples);
        }
        Ok(self.sample_buffer.as_ref().unwrap())
    }

    /// Drops cached content unless pinned by the memory-budget loader.
    pub fn unload(&mut self) {
        if !self.sticky {
            self.block0_content = None;
            self.sample_buffer = None;
        }
    }

    /// Maximum number of sample records that fit in one block — the target
    /// sample-buffer size `S` for io-internal nodes (spec §4.6).
    pub fn sample_capacity(cfg: &Config) -> usize {
        max_array_len(cfg.block_size, point_size(cfg.dim))
    }

    /// Rewrites only block B1 (the sample buffer) — used by the sample
    /// builder, which never changes a node's children or insertion buffer.
    pub fn save_samples_only(&self, bm: &BlockManager, cfg: &Config) -> Result<()> {
        let samples = self
            .sample_buffer
            .as_ref()
            .expect("save_samples_only requires loaded sample buffer");
        let mut h = bm.get(self.block1, AccessMode::WRITE)?;
        let buf = h.buf_mut();
        let mut cur = BlockCursor::new(buf);
        write_array(
            &mut cur,
            samples.len(),
            cfg.block_size,
            point_size(cfg.dim),
            |w, i| write_point(w, &samples[i]),
        )
    }
}

#[derive(Clone)]
pub struct IoLeafNode {
    pub block: BlockId,
    pub values: Option<Vec<Point>>,
    pub sticky: bool,
}

impl IoLeafNode {
    pub fn allocate(bm: &BlockManager) -> Result<Self> {
        let bid = bm.allocate(1)?;
        Ok(IoLeafNode {
            block: bid,
            values: None,
            sticky: false,
        })
    }

    pub fn free_block(&self, bm: &BlockManager) -> Result<()> {
        bm.free(self.block, 1)
    }

    pub fn mem_resident(&self) -> bool {
        self.values.is_some()
    }

    pub fn save_to_block(&self, bm: &BlockManager, cfg: &Config) -> Result<()> {
        let values = self
            .values
            .as_ref()
            .expect("save_to_block requires loaded values");
        let mut h = bm.get(self.block, AccessMode::WRITE)?;
        let buf = h.buf_mut();
        let mut cur = BlockCursor::new(buf);
        for p in values {
            write_point(&mut cur, p)?;
        }
        Ok(())
    }

    /// `count` comes from the parent entry's `subtree_size` — io-leaf blocks
    /// carry no length prefix (spec §6).
    pub fn load_values(&mut self, bm: &BlockManager, cfg: &Config, count: usize) -> Result<&Vec<Point>> {
        if self.values.is_none() {
            let h = bm.get(self.block, AccessMode::READ)?;
            let buf = h.buf();
            let mut cur = std::io::Cursor::new(buf);
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(read_point(&mut cur, cfg.dim)?);
            }
            self.values = Some(values);
        }
        Ok(self.values.as_ref().unwrap())
    }

    pub fn unload(&mut self) {
        if !self.sticky {
            self.values = None;
        }
    }

    /// Leaf capacity at the configured fill ratio (spec §3, "Fan-out
    /// parameters").
    pub fn capacity(cfg: &Config) -> usize {
        ((cfg.block_size as f64 * cfg.fill_ratio) / point_size(cfg.dim) as f64) as usize
    }
}
