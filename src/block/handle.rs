//! RAII handle over one block's bytes, modeled on the teacher's pattern of
//! write-back-on-drop cache guards (`CacheValueRefMut` in
//! `data_management::Dml`).

use super::{BlockId, BlockManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMode(u8);

impl AccessMode {
    pub const READ: AccessMode = AccessMode(0b01);
    pub const WRITE: AccessMode = AccessMode(0b10);
    pub const READ_WRITE: AccessMode = AccessMode(0b11);

    pub fn contains(&self, other: AccessMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AccessMode {
    type Output = AccessMode;
    fn bitor(self, rhs: AccessMode) -> AccessMode {
        AccessMode(self.0 | rhs.0)
    }
}

/// A fixed-width buffer for one block. If opened with
/// [`AccessMode::WRITE`], the buffer is written back to the manager when
/// this handle is dropped.
pub struct BlockHandle<'a> {
    manager: &'a BlockManager,
    bid: BlockId,
    buf: Vec<u8>,
    mode: AccessMode,
}

impl<'a> BlockHandle<'a> {
    pub(super) fn new(manager: &'a BlockManager, bid: BlockId, buf: Vec<u8>, mode: AccessMode) -> Self {
        BlockHandle {
            manager,
            bid,
            buf,
            mode,
        }
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn bid(&self) -> BlockId {
        self.bid
    }
}

impl<'a> Drop for BlockHandle<'a> {
    fn drop(&mut self) {
        if self.mode.contains(AccessMode::WRITE) {
            if let Err(e) = self.manager.write_back(self.bid, &self.buf) {
                log::warn!("block {} failed to write back on drop: {e}", self.bid);
            }
        }
    }
}
