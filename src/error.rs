//! Error types returned by the index. Core operations never call `exit`;
//! every failure is returned to the caller.

use thiserror::Error;

/// Failure modes of the sampling R-tree.
#[derive(Debug, Error)]
pub enum Error {
    /// A serialized length prefix exceeded block capacity, a metadata magic
    /// mismatch was found, or a block was freed twice.
    #[error("corrupted on-disk structure: {0}")]
    Corrupted(String),

    /// Block allocation beyond a fixed-size mapping, or a memory budget was
    /// exceeded while loading IO nodes into memory.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Underlying file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
