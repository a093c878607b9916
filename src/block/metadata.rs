//! The `.metadata` sidecar: block size, free-extent map, next free block.
//! Laid out byte-exactly per spec §6: `block_size (size_t)`, free-extent map
//! as `count (size_t)` followed by `(bid, size)` pairs, then
//! `next_free_block (size_t)`. A leading `capacity_blocks` field (`0` meaning
//! "growable") records which backing mode the manager was created with.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Block id `0` is reserved invalid, so the first allocatable block is `1`.
const FIRST_BLOCK_ID: u64 = 1;

#[derive(Debug, Default)]
pub struct FreeExtentMap {
    /// start block id -> run length, kept coalesced.
    extents: BTreeMap<u64, u64>,
}

impl FreeExtentMap {
    /// First-fit scan for a run of at least `n` blocks; splits the extent if
    /// it is larger than needed.
    pub fn take_first_fit(&mut self, n: u64) -> Option<u64> {
        let hit = self
            .extents
            .iter()
            .find(|(_, &len)| len >= n)
            .map(|(&start, &len)| (start, len));
        let (start, len) = hit?;
        self.extents.remove(&start);
        if len > n {
            self.extents.insert(start + n, len - n);
        }
        Some(start)
    }

    /// Inserts a freed run, coalescing with adjacent extents. Fails loudly
    /// if the run overlaps an already-free extent (double free).
    pub fn insert_checked(&mut self, bid: u64, n: u64) -> Result<()> {
        for (&start, &len) in self.extents.iter() {
            let overlaps = bid < start + len && start < bid + n;
            if overlaps {
                return Err(Error::Corrupted(format!(
                    "double free: blocks [{bid}, {}) already overlap free extent [{start}, {})",
                    bid + n,
                    start + len
                )));
            }
        }
        let mut new_start = bid;
        let mut new_len = n;
        if let Some((&prev_start, &prev_len)) = self.extents.range(..bid).next_back() {
            if prev_start + prev_len == bid {
                new_start = prev_start;
                new_len += prev_len;
                self.extents.remove(&prev_start);
            }
        }
        if let Some((&next_start, &next_len)) = self.extents.range(new_start + new_len..).next() {
            if next_start == new_start + new_len {
                new_len += next_len;
                self.extents.remove(&next_start);
            }
        }
        self.extents.insert(new_start, new_len);
        Ok(())
    }

    pub fn total_free(&self) -> u64 {
        self.extents.values().sum()
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }
}

pub struct Metadata {
    pub block_size: usize,
    pub capacity_blocks: Option<u64>,
    pub free: FreeExtentMap,
    pub next_free_block: u64,
}

const MAGIC: u32 = 0x5254_5342; // "RTSB"

impl Metadata {
    pub fn new(block_size: usize, capacity_blocks: Option<u64>) -> Self {
        Metadata {
            block_size,
            capacity_blocks,
            free: FreeExtentMap::default(),
            next_free_block: FIRST_BLOCK_ID,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_u32::<LittleEndian>(MAGIC)?;
        w.write_u64::<LittleEndian>(self.block_size as u64)?;
        w.write_u64::<LittleEndian>(self.capacity_blocks.unwrap_or(0))?;
        w.write_u64::<LittleEndian>(self.free.len() as u64)?;
        for (&start, &len) in &self.free.extents {
            w.write_u64::<LittleEndian>(start)?;
            w.write_u64::<LittleEndian>(len)?;
        }
        w.write_u64::<LittleEndian>(self.next_free_block)?;
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(Error::Corrupted(format!(
                "metadata magic mismatch: expected {MAGIC:#x}, found {magic:#x}"
            )));
        }
        let block_size = r.read_u64::<LittleEndian>()? as usize;
        let capacity_raw = r.read_u64::<LittleEndian>()?;
        let capacity_blocks = if capacity_raw == 0 {
            None
        } else {
            Some(capacity_raw)
        };
        let count = r.read_u64::<LittleEndian>()?;
        let mut extents = BTreeMap::new();
        for _ in 0..count {
            let start = r.read_u64::<LittleEndian>()?;
            let len = r.read_u64::<LittleEndian>()?;
            extents.insert(start, len);
        }
        let next_free_block = r.read_u64::<LittleEndian>()?;
        Ok(Metadata {
            block_size,
            capacity_blocks,
            free: FreeExtentMap { extents },
            next_free_block,
        })
    }
}
