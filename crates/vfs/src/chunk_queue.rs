//! Ordered queue of pending reads for one open file.
//!
//! Any number of reader threads enqueue; exactly one downloader thread
//! dequeues. Chunks come out lowest `start` first regardless of arrival
//! order. Overlapping and duplicate ranges are kept as-is.
//!
//! # Closing
//!
//! When the consumer's bounded wait times out on an empty queue, the queue is
//! closed in the same critical section. From then on `enqueue` hands the
//! chunk back as [`EnqueueError::Closed`], so a reader racing the timeout
//! never strands a chunk on a downloader that has already exited.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::chunk::Chunk;

/// Result of a bounded wait on the queue.
#[derive(Debug)]
pub enum Dequeued {
    /// The lowest-offset pending chunk.
    Chunk(Chunk),
    /// Nothing arrived in time.
    TimedOut,
    /// The queue was stopped.
    Stopped,
}

/// Why a chunk could not be queued. The chunk is handed back unfired.
pub enum EnqueueError {
    /// The consumer has exited; queue the chunk somewhere else.
    Closed(Chunk),
}

impl EnqueueError {
    /// Take back the rejected chunk.
    pub fn into_chunk(self) -> Chunk {
        match self {
            EnqueueError::Closed(chunk) => chunk,
        }
    }
}

impl fmt::Debug for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Closed(chunk) => f
                .debug_tuple("Closed")
                .field(&(chunk.start()..chunk.end()))
                .finish(),
        }
    }
}

/// Lock-protected queue state.
#[derive(Default)]
struct QueueState {
    /// Pending chunks, ascending by `start`; equal starts keep arrival order.
    chunks: VecDeque<Chunk>,
    /// No consumer will dequeue again.
    closed: bool,
    /// Stop was requested; waits return immediately.
    stopped: bool,
}

/// Pending reads for one file, ordered by offset.
pub struct ChunkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    file_size: u64,
}

impl ChunkQueue {
    /// Create an empty queue for a file of `file_size` bytes.
    ///
    /// # Arguments
    /// * `file_size` - Known size; chunk ends are clamped to it
    pub fn new(file_size: u64) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            file_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap()
    }

    /// Insert a chunk in offset order and wake the consumer.
    ///
    /// The chunk's end is clamped to the file size first.
    ///
    /// # Arguments
    /// * `chunk` - Chunk to queue
    pub fn enqueue(&self, mut chunk: Chunk) -> Result<(), EnqueueError> {
        chunk.clamp_to(self.file_size);
        {
            let mut state: MutexGuard<'_, QueueState> = self.lock();
            if state.closed || state.stopped {
                return Err(EnqueueError::Closed(chunk));
            }
            let start: u64 = chunk.start();
            let index: usize = state.chunks.partition_point(|c| c.start() <= start);
            state.chunks.insert(index, chunk);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Wait up to `timeout` for the lowest-offset chunk.
    ///
    /// # Arguments
    /// * `timeout` - Maximum time to wait
    ///
    /// # Returns
    /// The chunk, or `None` on timeout or stop.
    pub fn dequeue_blocking(&self, timeout: Duration) -> Option<Chunk> {
        match self.wait_for_chunk(timeout, false) {
            Dequeued::Chunk(chunk) => Some(chunk),
            Dequeued::TimedOut | Dequeued::Stopped => None,
        }
    }

    /// Wait up to `timeout` for a chunk, closing the queue if none arrives.
    ///
    /// # Arguments
    /// * `timeout` - Maximum time to wait
    pub fn dequeue_or_close(&self, timeout: Duration) -> Dequeued {
        self.wait_for_chunk(timeout, true)
    }

    fn wait_for_chunk(&self, timeout: Duration, close_on_timeout: bool) -> Dequeued {
        let deadline: Instant = Instant::now() + timeout;
        let mut state: MutexGuard<'_, QueueState> = self.lock();
        loop {
            if state.stopped {
                return Dequeued::Stopped;
            }
            if let Some(chunk) = state.chunks.pop_front() {
                return Dequeued::Chunk(chunk);
            }
            let now: Instant = Instant::now();
            if now >= deadline {
                if close_on_timeout {
                    state.closed = true;
                }
                return Dequeued::TimedOut;
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }

    /// Number of pending chunks.
    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    /// Check if no chunks are pending.
    pub fn is_empty(&self) -> bool {
        self.lock().chunks.is_empty()
    }

    /// Check if the queue no longer accepts chunks.
    pub fn is_closed(&self) -> bool {
        let state: MutexGuard<'_, QueueState> = self.lock();
        state.closed || state.stopped
    }

    /// Check if stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Refuse further chunks and take every pending one.
    pub fn close(&self) -> Vec<Chunk> {
        let mut state: MutexGuard<'_, QueueState> = self.lock();
        state.closed = true;
        state.chunks.drain(..).collect()
    }

    /// Request stop: wake the consumer and make every wait return at once.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.available.notify_all();
    }
}

impl fmt::Debug for ChunkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state: MutexGuard<'_, QueueState> = self.lock();
        f.debug_struct("ChunkQueue")
            .field("pending", &state.chunks.len())
            .field("closed", &state.closed)
            .field("stopped", &state.stopped)
            .field("file_size", &self.file_size)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
