//! Fixed-size block allocation, read/write, free-list tracking and the
//! mmap/positioned-IO split (spec C1, §4.1).
//!
//! One `.data` file holds a sequence of fixed-size blocks; one `.metadata`
//! file records `{block_size, free_extent_map, next_free_block}`. Block id
//! `0` is reserved as invalid, mirroring the teacher's convention of never
//! handing out a zero `DiskOffset`.

mod handle;
mod metadata;

pub use handle::{AccessMode, BlockHandle};

use crate::error::{Error, Result};
use memmap2::MmapMut;
use metadata::Metadata;
use parking_lot::Mutex;
use std::{
    cell::RefCell,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

pub type BlockId = u64;

#[derive(Debug, Default, Clone, Copy)]
pub struct BlockManagerStats {
    pub read_count: u64,
    pub write_count: u64,
}

enum Backing {
    /// Fixed-capacity mapping; block reads/writes are `memcpy`s against it.
    /// `RefCell` is sufficient since the index is single-threaded
    /// cooperative (spec §5) — the cell only guards against re-entrant
    /// aliasing within one thread, not cross-thread races.
    Mmap(RefCell<MmapMut>, u64),
    /// Growable backing, accessed via positioned reads/writes serialized by
    /// a mutex so that read-only cursors can still share the manager.
    Dynamic(Mutex<File>),
}

/// Manages one `.data`/`.metadata` file pair as a sequence of fixed-size
/// blocks.
pub struct BlockManager {
    data_path: PathBuf,
    metadata_path: PathBuf,
    block_size: usize,
    backing: Backing,
    meta: Mutex<Metadata>,
    stats: Mutex<BlockManagerStats>,
}

impl BlockManager {
    /// Creates a new growable block file.
    pub fn create(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let (data_path, metadata_path) = Self::paths(path.as_ref());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&data_path)?;
        let meta = Metadata::new(block_size, None);
        meta.save(&metadata_path)?;
        Ok(BlockManager {
            data_path,
            metadata_path,
            block_size,
            backing: Backing::Dynamic(Mutex::new(file)),
            meta: Mutex::new(meta),
            stats: Mutex::new(BlockManagerStats::default()),
        })
    }

    /// Creates a new block file with a fixed capacity, backed by a memory
    /// map. Allocation beyond `capacity_blocks` fails with
    /// [`Error::ResourceExhausted`].
    pub fn create_fixed(
        path: impl AsRef<Path>,
        block_size: usize,
        capacity_blocks: u64,
    ) -> Result<Self> {
        let (data_path, metadata_path) = Self::paths(path.as_ref());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&data_path)?;
        file.set_len(capacity_blocks * block_size as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let meta = Metadata::new(block_size, Some(capacity_blocks));
        meta.save(&metadata_path)?;
        Ok(BlockManager {
            data_path,
            metadata_path,
            block_size,
            backing: Backing::Mmap(RefCell::new(mmap), capacity_blocks),
            meta: Mutex::new(meta),
            stats: Mutex::new(BlockManagerStats::default()),
        })
    }

    /// Opens an existing block file, inferring the backing mode from the
    /// persisted metadata.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let (data_path, metadata_path) = Self::paths(path.as_ref());
        let meta = Metadata::load(&metadata_path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&data_path)?;
        let backing = match meta.capacity_blocks {
            Some(cap) => {
                let mmap = unsafe { MmapMut::map_mut(&file)? };
                Backing::Mmap(RefCell::new(mmap), cap)
            }
            None => Backing::Dynamic(Mutex::new(file)),
        };
        Ok(BlockManager {
            data_path,
            metadata_path,
            block_size: meta.block_size,
            backing,
            meta: Mutex::new(meta),
            stats: Mutex::new(BlockManagerStats::default()),
        })
    }

    fn paths(prefix: &Path) -> (PathBuf, PathBuf) {
        let mut data = prefix.as_os_str().to_owned();
        data.push(".data");
        let mut metadata = prefix.as_os_str().to_owned();
        metadata.push(".metadata");
        (PathBuf::from(data), PathBuf::from(metadata))
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn stats(&self) -> BlockManagerStats {
        *self.stats.lock()
    }

    /// Returns a run of `n` contiguous blocks, preferring free extents via a
    /// first-fit scan; growing the backing only if dynamic.
    pub fn allocate(&self, n: u64) -> Result<BlockId> {
        let mut meta = self.meta.lock();
        if let Some(bid) = meta.free.take_first_fit(n) {
            meta.save(&self.metadata_path)?;
            return Ok(bid);
        }
        let bid = meta.next_free_block;
        match &self.backing {
            Backing::Mmap(_, capacity) => {
                if bid + n > *capacity {
                    return Err(Error::ResourceExhausted(format!(
                        "allocate({n}) exceeds fixed capacity of {capacity} blocks"
                    )));
                }
            }
            Backing::Dynamic(file) => {
                let file = file.lock();
                file.set_len((bid + n) * self.block_size as u64)?;
            }
        }
        meta.next_free_block = bid + n;
        meta.save(&self.metadata_path)?;
        Ok(bid)
    }

    /// Returns a run of `n` blocks starting at `bid` to the free map,
    /// coalescing with adjacent extents. Freeing an already-free range is
    /// fatal (`Error::Corrupted`), never silently merged twice.
    pub fn free(&self, bid: BlockId, n: u64) -> Result<()> {
        let mut meta = self.meta.lock();
        meta.free.insert_checked(bid, n)?;
        meta.save(&self.metadata_path)?;
        Ok(())
    }

    /// Returns an RAII handle exposing a fixed-width buffer for block `bid`.
    /// If `mode` includes [`AccessMode::WRITE`], the buffer is written back
    /// on drop.
    pub fn get(&self, bid: BlockId, mode: AccessMode) -> Result<BlockHandle<'_>> {
        if bid == 0 {
            return Err(Error::Corrupted("block id 0 is reserved invalid".into()));
        }
        let mut buf = vec![0u8; self.block_size];
        if mode.contains(AccessMode::READ) {
            self.read_into(bid, &mut buf)?;
            self.stats.lock().read_count += 1;
        }
        Ok(BlockHandle::new(self, bid, buf, mode))
    }

    fn read_into(&self, bid: BlockId, buf: &mut [u8]) -> Result<()> {
        let offset = bid * self.block_size as u64;
        match &self.backing {
            Backing::Mmap(mmap, _) => {
                let mmap = mmap.borrow();
                let start = offset as usize;
                buf.copy_from_slice(&mmap[start..start + self.block_size]);
            }
            Backing::Dynamic(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)?;
            }
        }
        Ok(())
    }

    pub(super) fn write_back(&self, bid: BlockId, buf: &[u8]) -> Result<()> {
        let offset = bid * self.block_size as u64;
        match &self.backing {
            Backing::Mmap(mmap, _) => {
                let mut mmap = mmap.borrow_mut();
                let start = offset as usize;
                mmap[start..start + self.block_size].copy_from_slice(buf);
            }
            Backing::Dynamic(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(buf)?;
            }
        }
        self.stats.lock().write_count += 1;
        Ok(())
    }

    /// Best-effort sync to backing storage.
    pub fn flush(&self) -> Result<()> {
        match &self.backing {
            Backing::Mmap(mmap, _) => {
                mmap.borrow().flush()?;
            }
            Backing::Dynamic(file) => {
                file.lock().sync_data()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_free_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 4096).unwrap();
        let a = bm.allocate(3).unwrap();
        let b = bm.allocate(2).unwrap();
        bm.free(a, 3).unwrap();
        let c = bm.allocate(3).unwrap();
        // first-fit should reuse the freed extent exactly.
        assert_eq!(a, c);
        let _ = b;
    }

    #[test]
    fn double_free_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 4096).unwrap();
        let a = bm.allocate(2).unwrap();
        bm.free(a, 2).unwrap();
        let res = bm.free(a, 2);
        assert!(matches!(res, Err(Error::Corrupted(_))));
    }

    #[test]
    fn write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create(dir.path().join("idx"), 64).unwrap();
        let bid = bm.allocate(1).unwrap();
        {
            let mut h = bm.get(bid, AccessMode::WRITE).unwrap();
            h.buf_mut()[0..4].copy_from_slice(&[1, 2, 3, 4]);
        }
        let h = bm.get(bid, AccessMode::READ).unwrap();
        assert_eq!(&h.buf()[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn fixed_capacity_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let bm = BlockManager::create_fixed(dir.path().join("idx"), 64, 2).unwrap();
        bm.allocate(1).unwrap();
        bm.allocate(1).unwrap();
        assert!(matches!(
            bm.allocate(1),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn reopen_preserves_block_size_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let bid;
        {
            let bm = BlockManager::create(dir.path().join("idx"), 128).unwrap();
            bid = bm.allocate(1).unwrap();
            let mut h = bm.get(bid, AccessMode::WRITE).unwrap();
            h.buf_mut()[0] = 9;
        }
        let bm = BlockManager::load(dir.path().join("idx")).unwrap();
        assert_eq!(bm.block_size(), 128);
        let h = bm.get(bid, AccessMode::READ).unwrap();
        assert_eq!(h.buf()[0], 9);
    }
}
