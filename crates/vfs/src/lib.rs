//! Chunked streaming download engine for the peerfs network filesystem.
//!
//! Many concurrent byte-range reads on one open file are multiplexed onto a
//! single outbound stream. Arriving bytes are spliced into the waiting
//! readers' buffers in offset order; a read that is not contiguous with the
//! stream forces an abort and a fresh ranged request (a "seek").
//!
//! # Architecture
//!
//! ```text
//! Layer 3: Open-file surface (OpenFileTable, StreamingFile)
//! Layer 2: Downloader (request loop thread, one per open file)
//! Layer 1: Primitives (Chunk, ChunkQueue, splice, CompletionSignal)
//! ```
//!
//! Network access goes through [`peerfs_source::RemoteSource`], which pairs a
//! source resolver with a request issuer.

pub mod chunk;
pub mod chunk_queue;
pub mod downloader;
pub mod error;
pub mod file;
pub mod options;
pub mod splicer;
pub mod stats;

pub use chunk::{Chunk, ChunkData, ChunkReceiver, ChunkResult, CompletionSignal};
pub use chunk_queue::{ChunkQueue, Dequeued, EnqueueError};
pub use downloader::{Downloader, DownloaderState};
pub use error::{ChunkError, VfsError};
pub use file::{OpenFileTable, StreamingFile};
pub use options::DownloaderOptions;
pub use splicer::{splice, SpliceOutcome, StreamBuffer};
pub use stats::{DownloaderStats, DownloaderStatsSnapshot};
