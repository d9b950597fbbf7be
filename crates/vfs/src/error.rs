//! Error types for the VFS crate.

use std::fmt;

use peerfs_source::SourceError;
use thiserror::Error;

/// Why a single chunk did not complete successfully.
///
/// Cloneable so one transport failure can be delivered to every chunk that
/// was waiting on the same stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// The source failed (transport, protocol, or availability).
    #[error("{0}")]
    Source(#[from] SourceError),

    /// The downloader was stopped before the chunk was served.
    #[error("Download cancelled")]
    Cancelled,

    /// The completion was dropped without ever receiving a result.
    #[error("Chunk completion dropped without a result")]
    Abandoned,

    /// The requested range has `start > end`.
    #[error("Invalid range: start {start} is past end {end}")]
    InvalidRange { start: u64, end: u64 },
}

/// Errors that can occur during VFS operations.
#[derive(Debug)]
pub enum VfsError {
    /// File handle is not open.
    BadHandle(u64),

    /// File was released; no more reads are accepted.
    Released,

    /// Read range rejected before reaching the network.
    InvalidRange { start: u64, end: u64 },

    /// A chunk failed while being downloaded.
    ChunkFailed(ChunkError),

    /// Downloader thread could not be started.
    ThreadSpawn(String),
}

impl VfsError {
    /// Map to the errno reported to the calling process.
    pub fn to_errno(&self) -> i32 {
        match self {
            VfsError::BadHandle(_) | VfsError::Released => libc::EBADF,
            VfsError::InvalidRange { .. } => libc::EINVAL,
            VfsError::ChunkFailed(ChunkError::InvalidRange { .. }) => libc::EINVAL,
            VfsError::ChunkFailed(ChunkError::Source(SourceError::Timeout { .. })) => {
                libc::ETIMEDOUT
            }
            VfsError::ChunkFailed(ChunkError::Source(SourceError::NotFound { .. })) => {
                libc::ENOENT
            }
            VfsError::ChunkFailed(ChunkError::Cancelled) => libc::EINTR,
            VfsError::ChunkFailed(_) => libc::EIO,
            VfsError::ThreadSpawn(_) => libc::EAGAIN,
        }
    }
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::BadHandle(fh) => write!(f, "File handle not open: {}", fh),
            VfsError::Released => write!(f, "File already released"),
            VfsError::InvalidRange { start, end } => {
                write!(f, "Invalid read range: {}..{}", start, end)
            }
            VfsError::ChunkFailed(err) => write!(f, "Read failed: {}", err),
            VfsError::ThreadSpawn(msg) => write!(f, "Failed to start downloader: {}", msg),
        }
    }
}

impl std::error::Error for VfsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VfsError::ChunkFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ChunkError> for VfsError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::InvalidRange { start, end } => VfsError::InvalidRange { start, end },
            other => VfsError::ChunkFailed(other),
        }
    }
}
