//! Open-file surface: per-handle streaming files and the handle table.
//!
//! Filesystem dispatch calls into [`OpenFileTable`] on open, read and
//! release. Each handle owns a [`StreamingFile`], which keeps one
//! [`Downloader`] alive at a time and replaces it when the previous one has
//! stopped (idle, stall or transport error).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::runtime::Handle;

use peerfs_common::FileIdentity;
use peerfs_source::RemoteSource;

use crate::chunk::{Chunk, ChunkData, CompletionSignal};
use crate::chunk_queue::EnqueueError;
use crate::downloader::{Downloader, DownloaderState};
use crate::error::{ChunkError, VfsError};
use crate::options::DownloaderOptions;
use crate::stats::{DownloaderStats, DownloaderStatsSnapshot};

// ============================================================================
// StreamingFile
// ============================================================================

/// One open handle on a remote file.
pub struct StreamingFile {
    identity: FileIdentity,
    source: RemoteSource,
    options: DownloaderOptions,
    runtime: Handle,
    /// Shared by every downloader this file starts.
    stats: Arc<DownloaderStats>,
    downloader: Mutex<Option<Downloader>>,
    released: AtomicBool,
}

impl StreamingFile {
    /// Create a streaming file. No downloader starts until the first read.
    ///
    /// # Arguments
    /// * `identity` - Content identity of the file
    /// * `source` - Resolver and issuer for the file's content
    /// * `options` - Downloader timeouts and limits
    /// * `runtime` - Runtime driving the network streams
    pub fn new(
        identity: FileIdentity,
        source: RemoteSource,
        options: DownloaderOptions,
        runtime: Handle,
    ) -> Self {
        Self {
            identity,
            source,
            options,
            runtime,
            stats: Arc::new(DownloaderStats::default()),
            downloader: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    /// Content identity of this file.
    pub fn identity(&self) -> &FileIdentity {
        &self.identity
    }

    /// Queue a read of `start..end` that completes through `signal`.
    ///
    /// `start >= size` completes with 0 bytes without touching the network;
    /// `end > size` is clamped.
    ///
    /// # Arguments
    /// * `start` - First byte to read
    /// * `end` - One past the last byte to read
    /// * `signal` - Fired exactly once with the result
    ///
    /// # Returns
    /// `VfsError::InvalidRange` if `start > end` (the signal also fires with
    /// the error), `VfsError::Released` after [`release`](Self::release).
    pub fn enqueue_chunk(
        &self,
        start: u64,
        end: u64,
        signal: CompletionSignal,
    ) -> Result<(), VfsError> {
        let chunk: Chunk = Chunk::new(start, end, signal)?;
        if self.released.load(Ordering::SeqCst) {
            chunk.fail(ChunkError::Cancelled);
            return Err(VfsError::Released);
        }
        if chunk.start() >= self.identity.size() {
            self.stats.record_completed();
            chunk.complete();
            return Ok(());
        }

        // Signals may call back into this file, so they fire and stopped
        // downloaders are joined only after the slot lock is released.
        let mut stale: Vec<Downloader> = Vec::new();
        let result: Result<(), (Chunk, VfsError)> = self.enqueue_locked(chunk, &mut stale);
        drop(stale);

        match result {
            Ok(()) => Ok(()),
            Err((chunk, err)) => {
                let reason: ChunkError = match err {
                    VfsError::Released => ChunkError::Cancelled,
                    _ => ChunkError::Abandoned,
                };
                chunk.fail(reason);
                Err(err)
            }
        }
    }

    /// Hand `chunk` to a running downloader, starting one if needed.
    ///
    /// Never fires a signal. Stopped downloaders are moved into `stale`.
    fn enqueue_locked(
        &self,
        mut chunk: Chunk,
        stale: &mut Vec<Downloader>,
    ) -> Result<(), (Chunk, VfsError)> {
        let mut slot: MutexGuard<'_, Option<Downloader>> = self.downloader.lock().unwrap();
        if self.released.load(Ordering::SeqCst) {
            return Err((chunk, VfsError::Released));
        }

        loop {
            let running: Option<Downloader> = match slot.take() {
                Some(stopped) if stopped.is_stopped() => {
                    stale.push(stopped);
                    None
                }
                other => other,
            };
            let downloader: &Downloader = match running {
                Some(downloader) => slot.insert(downloader),
                None => match self.spawn_downloader() {
                    Ok(downloader) => slot.insert(downloader),
                    Err(err) => return Err((chunk, err)),
                },
            };

            match downloader.enqueue(chunk) {
                Ok(()) => return Ok(()),
                Err(EnqueueError::Closed(returned)) => {
                    log::debug!(
                        "Downloader for {} closed before accepting chunk at {}, restarting",
                        self.identity,
                        returned.start()
                    );
                    chunk = returned;
                }
            }
        }
    }

    fn spawn_downloader(&self) -> Result<Downloader, VfsError> {
        Downloader::spawn(
            self.identity.clone(),
            self.source.clone(),
            self.options.clone(),
            self.runtime.clone(),
            self.stats.clone(),
        )
    }

    /// Read up to `size` bytes at `offset`, blocking until they arrive.
    ///
    /// Must not be called from inside the runtime driving the streams.
    ///
    /// # Arguments
    /// * `offset` - First byte to read
    /// * `size` - Maximum number of bytes
    ///
    /// # Returns
    /// The bytes read; shorter than `size` only at the end of the file.
    pub fn read(&self, offset: u64, size: usize) -> Result<Vec<u8>, VfsError> {
        let end: u64 = offset.saturating_add(size as u64);
        let (signal, receiver) = CompletionSignal::channel();
        self.enqueue_chunk(offset, end, signal)?;
        let data: ChunkData = receiver.wait()?;
        Ok(data.into_vec())
    }

    /// Async variant of [`read`](Self::read).
    pub async fn read_async(&self, offset: u64, size: usize) -> Result<Vec<u8>, VfsError> {
        let end: u64 = offset.saturating_add(size as u64);
        let (signal, receiver) = CompletionSignal::channel();
        self.enqueue_chunk(offset, end, signal)?;
        let data: ChunkData = receiver.await?;
        Ok(data.into_vec())
    }

    /// Stop the current downloader and refuse further reads.
    ///
    /// Outstanding chunks fail with [`ChunkError::Cancelled`]. Returns once
    /// the downloader thread has exited.
    pub fn release(&self) {
        let downloader: Option<Downloader> = {
            let mut slot: MutexGuard<'_, Option<Downloader>> = self.downloader.lock().unwrap();
            self.released.store(true, Ordering::SeqCst);
            slot.take()
        };
        if let Some(downloader) = downloader {
            downloader.stop_and_join();
        }
        log::debug!("Released {}", self.identity);
    }

    /// Check if [`release`](Self::release) was called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// State of the current downloader, if one exists.
    pub fn downloader_state(&self) -> Option<DownloaderState> {
        self.downloader.lock().unwrap().as_ref().map(Downloader::state)
    }

    /// Counters accumulated over every downloader of this file.
    pub fn stats(&self) -> DownloaderStatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for StreamingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingFile")
            .field("identity", &self.identity)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// OpenFileTable
// ============================================================================

/// Maps file handles to open streaming files.
pub struct OpenFileTable {
    source: RemoteSource,
    options: DownloaderOptions,
    runtime: Handle,
    files: RwLock<HashMap<u64, Arc<StreamingFile>>>,
    /// Next file handle ID.
    next_handle: AtomicU64,
}

impl OpenFileTable {
    /// Create an empty table.
    ///
    /// # Arguments
    /// * `source` - Resolver and issuer shared by every open file
    /// * `options` - Downloader options for every open file
    /// * `runtime` - Runtime driving the network streams
    pub fn new(source: RemoteSource, options: DownloaderOptions, runtime: Handle) -> Self {
        Self {
            source,
            options,
            runtime,
            files: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Open `identity` and return its file handle.
    pub fn open(&self, identity: FileIdentity) -> u64 {
        let fh: u64 = self.next_handle.fetch_add(1, Ordering::SeqCst);
        log::debug!("Opening {} as handle {}", identity, fh);
        let file: Arc<StreamingFile> = Arc::new(StreamingFile::new(
            identity,
            self.source.clone(),
            self.options.clone(),
            self.runtime.clone(),
        ));
        self.files.write().unwrap().insert(fh, file);
        fh
    }

    /// Look up an open handle.
    pub fn get(&self, fh: u64) -> Result<Arc<StreamingFile>, VfsError> {
        self.files
            .read()
            .unwrap()
            .get(&fh)
            .cloned()
            .ok_or(VfsError::BadHandle(fh))
    }

    /// Read from an open handle; see [`StreamingFile::read`].
    ///
    /// # Arguments
    /// * `fh` - File handle from [`open`](Self::open)
    /// * `offset` - First byte to read
    /// * `size` - Maximum number of bytes
    pub fn read(&self, fh: u64, offset: u64, size: usize) -> Result<Vec<u8>, VfsError> {
        let file: Arc<StreamingFile> = self.get(fh)?;
        file.read(offset, size)
    }

    /// Close a handle, stopping and joining its downloader.
    pub fn release(&self, fh: u64) -> Result<(), VfsError> {
        let file: Arc<StreamingFile> = self
            .files
            .write()
            .unwrap()
            .remove(&fh)
            .ok_or(VfsError::BadHandle(fh))?;
        file.release();
        Ok(())
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.files.read().unwrap().len()
    }

    /// Check if no handles are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for OpenFileTable {
    fn drop(&mut self) {
        let files: Vec<Arc<StreamingFile>> = match self.files.get_mut() {
            Ok(files) => files.drain().map(|(_, file)| file).collect(),
            Err(poisoned) => poisoned.into_inner().drain().map(|(_, file)| file).collect(),
        };
        for file in files {
            file.release();
        }
    }
}
