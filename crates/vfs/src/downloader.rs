//! Per-open-file download engine.
//!
//! A [`Downloader`] owns a [`ChunkQueue`] and one background thread running
//! the request loop. Reader threads enqueue chunks and block on each chunk's
//! own completion; the loop serves chunks lowest offset first over a single
//! stream, reconnecting only when a chunk is not contiguous with the bytes
//! the stream is delivering.
//!
//! # State Machine
//!
//! ```text
//!            dequeue                open stream
//!   ┌──────┐ ───────► ┌────────────┐ ──────────► ┌───────────┐
//!   │ Idle │          │ Requesting │             │ Streaming │
//!   └──────┘ ◄─────── └────────────┘ ◄────────── └───────────┘
//!      │      clean EOF                seek         │
//!      │ idle timeout / stop            stall / error / stop
//!      └──────────────────► ┌─────────┐ ◄───────────┘
//!                           │ Stopped │
//!                           └─────────┘
//! ```
//!
//! The network stream is async. The loop drives it from its own thread with
//! `Handle::block_on`, racing every wait against the stop token.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use peerfs_common::FileIdentity;
use peerfs_source::{ByteStream, OpenedStream, RemoteSource, SourceError};

use crate::chunk::Chunk;
use crate::chunk_queue::{ChunkQueue, Dequeued, EnqueueError};
use crate::error::{ChunkError, VfsError};
use crate::options::DownloaderOptions;
use crate::splicer::{splice, SpliceOutcome, StreamBuffer};
use crate::stats::{DownloaderStats, DownloaderStatsSnapshot};

/// Observable phase of a downloader's request loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloaderState {
    /// Waiting for a chunk, no connection open.
    Idle,
    /// Resolving a source and opening a stream.
    Requesting,
    /// Splicing deliveries into chunks.
    Streaming,
    /// Thread has exited or is about to.
    Stopped,
}

/// Next step of the request loop. Streaming carries the open connection.
enum Step {
    Idle,
    Requesting,
    Streaming(ByteStream),
    Stopped,
}

// ============================================================================
// Downloader (Public API)
// ============================================================================

/// Download engine for one open file handle.
///
/// Dropping a downloader stops and joins its thread.
pub struct Downloader {
    identity: FileIdentity,
    queue: Arc<ChunkQueue>,
    state: Arc<Mutex<DownloaderState>>,
    stats: Arc<DownloaderStats>,
    cancel: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Downloader {
    /// Start a downloader thread for `identity`.
    ///
    /// # Arguments
    /// * `identity` - Content identity of the file
    /// * `source` - Resolver and issuer used for every request
    /// * `options` - Timeouts and limits
    /// * `runtime` - Runtime driving the network streams (time driver enabled)
    /// * `stats` - Counters to update; may be shared across downloaders
    pub fn spawn(
        identity: FileIdentity,
        source: RemoteSource,
        options: DownloaderOptions,
        runtime: Handle,
        stats: Arc<DownloaderStats>,
    ) -> Result<Self, VfsError> {
        let queue: Arc<ChunkQueue> = Arc::new(ChunkQueue::new(identity.size()));
        let state: Arc<Mutex<DownloaderState>> = Arc::new(Mutex::new(DownloaderState::Idle));
        let cancel: CancellationToken = CancellationToken::new();

        let request_loop: RequestLoop = RequestLoop {
            identity: identity.clone(),
            source,
            options,
            runtime,
            queue: queue.clone(),
            state: state.clone(),
            stats: stats.clone(),
            cancel: cancel.clone(),
            current_chunk: None,
            download_offset: 0,
            seek: false,
            timed_out: false,
            range_restarts: 0,
        };

        let short_hash: String = identity.hash().chars().take(12).collect();
        let thread: JoinHandle<()> = std::thread::Builder::new()
            .name(format!("peerfs-dl-{}", short_hash))
            .spawn(move || request_loop.run())
            .map_err(|e| VfsError::ThreadSpawn(e.to_string()))?;

        stats.record_downloader_started();
        log::debug!("Started downloader for {}", identity);

        Ok(Self {
            identity,
            queue,
            state,
            stats,
            cancel,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Content identity this downloader serves.
    pub fn identity(&self) -> &FileIdentity {
        &self.identity
    }

    /// Queue a chunk.
    ///
    /// A chunk starting at or past the end of the file completes at once with
    /// 0 bytes and never reaches the network. Ends past the file size are
    /// clamped.
    ///
    /// # Arguments
    /// * `chunk` - Chunk to serve
    ///
    /// # Returns
    /// `EnqueueError::Closed` with the chunk if this downloader has stopped.
    pub fn enqueue(&self, chunk: Chunk) -> Result<(), EnqueueError> {
        if chunk.start() >= self.identity.size() {
            self.stats.record_completed();
            chunk.complete();
            return Ok(());
        }
        self.queue.enqueue(chunk)
    }

    /// Current phase of the request loop.
    pub fn state(&self) -> DownloaderState {
        *self.state.lock().unwrap()
    }

    /// Check if this downloader no longer accepts chunks.
    pub fn is_stopped(&self) -> bool {
        self.queue.is_closed() || self.state() == DownloaderState::Stopped
    }

    /// Number of queued chunks not yet picked up.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Current counters.
    pub fn stats(&self) -> DownloaderStatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask the thread to exit.
    ///
    /// Outstanding chunks fail with [`ChunkError::Cancelled`]. Returns
    /// without waiting; see [`join`](Self::join).
    pub fn stop(&self) {
        self.queue.stop();
        self.cancel.cancel();
    }

    /// Wait for the thread to exit.
    pub fn join(&self) {
        let handle: Option<JoinHandle<()>> = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::warn!("Downloader thread for {} panicked", self.identity);
            }
        }
    }

    /// Stop the thread and wait for it.
    pub fn stop_and_join(&self) {
        self.stop();
        self.join();
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("queue", &self.queue)
            .finish()
    }
}

// ============================================================================
// Request Loop
// ============================================================================

/// State owned by the downloader thread.
struct RequestLoop {
    identity: FileIdentity,
    source: RemoteSource,
    options: DownloaderOptions,
    runtime: Handle,
    queue: Arc<ChunkQueue>,
    state: Arc<Mutex<DownloaderState>>,
    stats: Arc<DownloaderStats>,
    cancel: CancellationToken,
    /// Chunk being filled; owned exclusively by this thread.
    current_chunk: Option<Chunk>,
    /// Absolute offset of the next byte the open stream will deliver.
    download_offset: u64,
    /// Last stream was aborted because a chunk wanted another offset.
    seek: bool,
    /// Loop ended because a bounded wait expired.
    timed_out: bool,
    /// Consecutive streams that opened at an offset other than requested.
    range_restarts: u32,
}

impl RequestLoop {
    fn run(mut self) {
        let mut step: Step = Step::Idle;
        loop {
            step = match step {
                Step::Idle => {
                    self.set_state(DownloaderState::Idle);
                    self.idle()
                }
                Step::Requesting => {
                    self.set_state(DownloaderState::Requesting);
                    self.request()
                }
                Step::Streaming(body) => {
                    self.set_state(DownloaderState::Streaming);
                    self.stream(body)
                }
                Step::Stopped => break,
            };
        }
        self.shutdown();
    }

    fn set_state(&self, state: DownloaderState) {
        *self.state.lock().unwrap() = state;
    }

    /// Run `fut` to completion on the runtime unless stop is requested first.
    fn block_on<F: Future>(&self, fut: F) -> Option<F::Output> {
        let cancel: &CancellationToken = &self.cancel;
        self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                output = fut => Some(output),
            }
        })
    }

    fn idle(&mut self) -> Step {
        match self.queue.dequeue_or_close(self.options.idle_timeout) {
            Dequeued::Chunk(chunk) => {
                self.download_offset = chunk.start();
                self.current_chunk = Some(chunk);
                Step::Requesting
            }
            Dequeued::TimedOut => {
                self.timed_out = true;
                self.stats.record_idle_timeout();
                log::debug!(
                    "Downloader for {} idle for {:?}, exiting",
                    self.identity,
                    self.options.idle_timeout
                );
                Step::Stopped
            }
            Dequeued::Stopped => Step::Stopped,
        }
    }

    fn request(&mut self) -> Step {
        let Some(start) = self.current_chunk.as_ref().map(Chunk::start) else {
            return Step::Idle;
        };
        if self.seek {
            log::debug!("Reopening {} at byte {} after seek", self.identity, start);
        }
        self.seek = false;
        self.stats.record_request();

        let source: &RemoteSource = &self.source;
        let identity: &FileIdentity = &self.identity;
        match self.block_on(async { source.open(identity, start).await }) {
            None => Step::Stopped,
            Some(Ok(opened)) => self.begin_stream(opened, start),
            Some(Err(err)) => {
                self.fail_all(err);
                Step::Stopped
            }
        }
    }

    fn begin_stream(&mut self, opened: OpenedStream, requested: u64) -> Step {
        if opened.start == requested {
            self.range_restarts = 0;
        } else {
            // The source ignored the range; the splicer will see a seek.
            self.range_restarts += 1;
            log::debug!(
                "{} started at byte {} instead of {} ({} in a row)",
                opened.url,
                opened.start,
                requested,
                self.range_restarts
            );
            if self.range_restarts > self.options.max_range_restarts {
                self.fail_all(SourceError::RangeNotHonored {
                    start: requested,
                    attempts: self.range_restarts,
                });
                return Step::Stopped;
            }
        }
        self.download_offset = opened.start;
        Step::Streaming(opened.body)
    }

    /// Pump deliveries until the stream must end. Returning drops `body`,
    /// which aborts the connection.
    fn stream(&mut self, mut body: ByteStream) -> Step {
        loop {
            if self.current_chunk.is_none() {
                if self.download_offset >= self.identity.size() {
                    log::debug!("Stream for {} reached end of file", self.identity);
                    return Step::Idle;
                }
                match self.queue.dequeue_or_close(self.options.stall_timeout) {
                    Dequeued::Chunk(chunk) => {
                        let aligned: bool = chunk.start() == self.download_offset;
                        self.current_chunk = Some(chunk);
                        if !aligned {
                            return self.seek_to_current();
                        }
                    }
                    Dequeued::TimedOut => return self.stall(),
                    Dequeued::Stopped => return Step::Stopped,
                }
            }

            let read_timeout: std::time::Duration = self.options.read_timeout;
            let delivery = self.block_on(async {
                tokio::time::timeout(read_timeout, body.next()).await
            });
            let bytes: Bytes = match delivery {
                None => return Step::Stopped,
                Some(Err(_elapsed)) => {
                    self.fail_all(SourceError::Timeout {
                        millis: read_timeout.as_millis() as u64,
                    });
                    return Step::Stopped;
                }
                Some(Ok(None)) => return self.end_of_stream(),
                Some(Ok(Some(Err(err)))) => {
                    self.fail_all(err);
                    return Step::Stopped;
                }
                Some(Ok(Some(Ok(bytes)))) => bytes,
            };
            if bytes.is_empty() {
                continue;
            }

            let mut buffer: StreamBuffer = StreamBuffer::new(self.download_offset, bytes);
            let queue: &ChunkQueue = &self.queue;
            let stall_timeout: std::time::Duration = self.options.stall_timeout;
            let outcome: SpliceOutcome =
                splice(&mut self.current_chunk, &mut buffer, &self.stats, || {
                    queue.dequeue_or_close(stall_timeout)
                });
            self.download_offset = buffer.start();

            match outcome {
                SpliceOutcome::WantMore | SpliceOutcome::Drained => {}
                SpliceOutcome::Seek => return self.seek_to_current(),
                SpliceOutcome::Stalled => return self.stall(),
                SpliceOutcome::Stopped => return Step::Stopped,
            }
        }
    }

    /// Abort the stream and restart at the current chunk's offset.
    fn seek_to_current(&mut self) -> Step {
        let target: u64 = self
            .current_chunk
            .as_ref()
            .map(Chunk::start)
            .unwrap_or(self.download_offset);
        log::debug!(
            "Seek on {}: stream at byte {}, next read wants {}",
            self.identity,
            self.download_offset,
            target
        );
        self.seek = true;
        self.stats.record_seek();
        Step::Requesting
    }

    fn stall(&mut self) -> Step {
        self.timed_out = true;
        self.stats.record_stall();
        log::debug!(
            "No read followed byte {} of {} within {:?}, dropping stream",
            self.download_offset,
            self.identity,
            self.options.stall_timeout
        );
        Step::Stopped
    }

    fn end_of_stream(&mut self) -> Step {
        if self.current_chunk.is_none() {
            return Step::Idle;
        }
        self.fail_all(SourceError::UnexpectedEof {
            offset: self.download_offset,
            expected: self.identity.size(),
        });
        Step::Stopped
    }

    /// Fail the current chunk and everything queued, and refuse new chunks.
    fn fail_all(&mut self, err: SourceError) {
        log::warn!(
            "Download of {} failed at byte {}: {}",
            self.identity,
            self.download_offset,
            err
        );
        let err: ChunkError = ChunkError::Source(err);
        let mut failed: Vec<Chunk> = self.queue.close();
        failed.extend(self.current_chunk.take());
        self.stats.record_failed(failed.len() as u64);
        for chunk in failed {
            chunk.fail(err.clone());
        }
    }

    /// Close the queue and cancel anything left over (only after a stop).
    fn shutdown(&mut self) {
        let mut cancelled: Vec<Chunk> = self.queue.close();
        cancelled.extend(self.current_chunk.take());
        let count: usize = cancelled.len();
        self.stats.record_failed(count as u64);
        for chunk in cancelled {
            chunk.fail(ChunkError::Cancelled);
        }
        self.set_state(DownloaderState::Stopped);
        log::debug!(
            "Downloader for {} stopped (timed out: {}, cancelled: {})",
            self.identity,
            self.timed_out,
            count
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
