//! Read requests and their one-shot completions.
//!
//! A [`Chunk`] is one caller's byte range plus the buffer it is filled into.
//! Each chunk carries a [`CompletionSignal`] private to it, so the downloader
//! can wake exactly one reader without touching any shared lock.
//!
//! ```text
//! reader thread                      downloader thread
//! ─────────────                      ─────────────────
//! (signal, rx) = channel()
//! enqueue(Chunk::new(.., signal)) ─► queue ─► splice bytes into chunk
//! rx.wait()  ◄──────────────────────────────  signal.fire(Ok(data))
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use peerfs_common::MAX_CHUNK_PRERESERVE;
use tokio::sync::oneshot;

use crate::error::ChunkError;

/// Outcome delivered to a chunk's owner.
pub type ChunkResult = Result<ChunkData, ChunkError>;

/// Bytes delivered for a successfully completed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    /// Absolute file offset of the first byte.
    pub offset: u64,
    /// The bytes read. Shorter than requested only when the range was
    /// clamped to the file size.
    pub data: Vec<u8>,
}

impl ChunkData {
    /// Number of bytes delivered.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if no bytes were delivered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

// ============================================================================
// Completion Signal
// ============================================================================

type CompletionFn = Box<dyn FnOnce(ChunkResult) + Send + 'static>;

/// One-shot completion handle for a single chunk.
///
/// Fires exactly once. Firing consumes the signal; a signal dropped without
/// firing delivers [`ChunkError::Abandoned`]. Callbacks run on the downloader
/// thread and must not block.
pub struct CompletionSignal {
    callback: Option<CompletionFn>,
}

impl CompletionSignal {
    /// Create a signal that invokes `callback` with the result.
    ///
    /// # Arguments
    /// * `callback` - Non-blocking function receiving the chunk's result
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: FnOnce(ChunkResult) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Create a signal paired with a receiver the reader can block on.
    pub fn channel() -> (Self, ChunkReceiver) {
        let (tx, rx) = oneshot::channel::<ChunkResult>();
        let signal: CompletionSignal = Self::from_fn(move |result| {
            // Receiver gone means the reader stopped caring.
            let _ = tx.send(result);
        });
        (signal, ChunkReceiver { rx })
    }

    /// Deliver the result.
    ///
    /// # Arguments
    /// * `result` - Bytes read or the reason the chunk failed
    pub fn fire(mut self, result: ChunkResult) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(ChunkError::Abandoned));
        }
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("fired", &self.callback.is_none())
            .finish()
    }
}

/// Receiving side of [`CompletionSignal::channel`].
///
/// Blocking threads call [`wait`](Self::wait); async callers can `.await` it.
#[derive(Debug)]
pub struct ChunkReceiver {
    rx: oneshot::Receiver<ChunkResult>,
}

impl ChunkReceiver {
    /// Block the current thread until the chunk completes.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> ChunkResult {
        self.rx.blocking_recv().unwrap_or(Err(ChunkError::Abandoned))
    }

    /// Return the result if the chunk has already completed.
    pub fn try_result(&mut self) -> Option<ChunkResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ChunkError::Abandoned)),
        }
    }
}

impl Future for ChunkReceiver {
    type Output = ChunkResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ChunkError::Abandoned)))
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// One pending read: a byte range, its destination buffer, and its signal.
///
/// `start` is the write cursor. It begins at the requested offset and
/// advances toward `end` as bytes are spliced in.
#[derive(Debug)]
pub struct Chunk {
    /// Requested offset, reported back in [`ChunkData::offset`].
    offset: u64,
    /// Next absolute offset this chunk wants.
    start: u64,
    /// Exclusive end offset.
    end: u64,
    /// Destination; `buffer.len()` is the number of bytes written.
    buffer: Vec<u8>,
    signal: CompletionSignal,
}

impl Chunk {
    /// Create a chunk for `start..end`.
    ///
    /// On `start > end` the signal fires with [`ChunkError::InvalidRange`]
    /// and the same error is returned.
    ///
    /// # Arguments
    /// * `start` - Inclusive start offset
    /// * `end` - Exclusive end offset
    /// * `signal` - Completion handle
    pub fn new(start: u64, end: u64, signal: CompletionSignal) -> Result<Self, ChunkError> {
        Self::with_buffer(start, end, Vec::new(), signal)
    }

    /// Create a chunk that fills a caller-supplied buffer.
    ///
    /// The buffer is cleared; its capacity is reused.
    ///
    /// # Arguments
    /// * `start` - Inclusive start offset
    /// * `end` - Exclusive end offset
    /// * `buffer` - Destination buffer
    /// * `signal` - Completion handle
    pub fn with_buffer(
        start: u64,
        end: u64,
        mut buffer: Vec<u8>,
        signal: CompletionSignal,
    ) -> Result<Self, ChunkError> {
        if start > end {
            let err: ChunkError = ChunkError::InvalidRange { start, end };
            signal.fire(Err(err.clone()));
            return Err(err);
        }
        buffer.clear();
        Ok(Self {
            offset: start,
            start,
            end,
            buffer,
            signal,
        })
    }

    /// Offset originally requested.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next offset this chunk wants.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Bytes written so far.
    pub fn bytes_used(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes still wanted.
    pub fn remaining(&self) -> u64 {
        self.end - self.start
    }

    /// Check if every requested byte has been written.
    pub fn is_full(&self) -> bool {
        self.start == self.end
    }

    /// Shorten the chunk so it does not extend past `file_size`.
    ///
    /// Reserves the destination buffer for the clamped length, up to
    /// [`MAX_CHUNK_PRERESERVE`] bytes.
    ///
    /// # Arguments
    /// * `file_size` - Known size of the file
    pub fn clamp_to(&mut self, file_size: u64) {
        if self.end > file_size {
            self.end = file_size.max(self.start);
        }
        let wanted: usize = usize::try_from(self.remaining())
            .unwrap_or(usize::MAX)
            .min(MAX_CHUNK_PRERESERVE);
        self.buffer.reserve(wanted);
    }

    /// Copy as many bytes as still fit from `data`, advancing the cursor.
    ///
    /// # Arguments
    /// * `data` - Bytes available at `self.start()`
    ///
    /// # Returns
    /// Number of bytes consumed from `data`.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n: usize = usize::try_from(self.remaining())
            .unwrap_or(usize::MAX)
            .min(data.len());
        self.buffer.extend_from_slice(&data[..n]);
        self.start += n as u64;
        n
    }

    /// Fire the signal with the bytes written.
    pub fn complete(self) {
        let Chunk {
            offset,
            buffer,
            signal,
            ..
        } = self;
        signal.fire(Ok(ChunkData {
            offset,
            data: buffer,
        }));
    }

    /// Fire the signal with an error.
    ///
    /// # Arguments
    /// * `err` - Reason the chunk failed
    pub fn fail(self, err: ChunkError) {
        self.signal.fire(Err(err));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_write_stops_at_end() {
        let (signal, rx) = CompletionSignal::channel();
        let mut chunk: Chunk = Chunk::new(10, 14, signal).unwrap();

        assert_eq!(chunk.write(&[1, 2]), 2);
        assert_eq!(chunk.start(), 12);
        assert_eq!(chunk.write(&[3, 4, 5, 6]), 2);
        assert!(chunk.is_full());
        assert_eq!(chunk.bytes_used(), 4);

        chunk.complete();
        let data: ChunkData = rx.wait().unwrap();
        assert_eq!(data.offset, 10);
        assert_eq!(data.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_invalid_range_fires_signal() {
        let (signal, rx) = CompletionSignal::channel();
        let result: Result<Chunk, ChunkError> = Chunk::new(9, 3, signal);
        assert_eq!(
            result.unwrap_err(),
            ChunkError::InvalidRange { start: 9, end: 3 }
        );
        assert_eq!(
            rx.wait().unwrap_err(),
            ChunkError::InvalidRange { start: 9, end: 3 }
        );
    }

    #[test]
    fn test_clamp_to_file_size() {
        let (signal, _rx) = CompletionSignal::channel();
        let mut chunk: Chunk = Chunk::new(900, 1200, signal).unwrap();
        chunk.clamp_to(1000);
        assert_eq!(chunk.end(), 1000);
        assert_eq!(chunk.remaining(), 100);

        let (signal, _rx) = CompletionSignal::channel();
        let mut inside: Chunk = Chunk::new(0, 10, signal).unwrap();
        inside.clamp_to(1000);
        assert_eq!(inside.end(), 10);
    }

    #[test]
    fn test_clamp_caps_initial_reservation() {
        let (signal, _rx) = CompletionSignal::channel();
        let mut huge: Chunk = Chunk::new(0, 1 << 40, signal).unwrap();
        huge.clamp_to(1 << 40);
        assert_eq!(huge.remaining(), 1 << 40);
        assert!(huge.buffer.capacity() >= MAX_CHUNK_PRERESERVE);
        assert!(huge.buffer.capacity() < 4 * MAX_CHUNK_PRERESERVE);

        assert_eq!(huge.write(&[7u8; 64]), 64);
        assert_eq!(huge.bytes_used(), 64);
    }

    #[test]
    fn test_dropped_signal_fires_abandoned_once() {
        let calls: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let calls_clone: Arc<AtomicUsize> = calls.clone();
        let signal: CompletionSignal = CompletionSignal::from_fn(move |result| {
            assert_eq!(result.unwrap_err(), ChunkError::Abandoned);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        drop(signal);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fire_runs_callback_exactly_once() {
        let calls: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let calls_clone: Arc<AtomicUsize> = calls.clone();
        let signal: CompletionSignal = CompletionSignal::from_fn(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        signal.fire(Err(ChunkError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_length_chunk() {
        let (signal, mut rx) = CompletionSignal::channel();
        let mut chunk: Chunk = Chunk::new(5, 5, signal).unwrap();
        assert!(chunk.is_full());
        assert_eq!(chunk.write(&[1, 2, 3]), 0);
        assert!(rx.try_result().is_none());

        chunk.complete();
        assert!(rx.try_result().unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receiver_is_awaitable() {
        let (signal, rx) = CompletionSignal::channel();
        let (signal_b, rx_b) = CompletionSignal::channel();
        std::thread::spawn(move || {
            signal.fire(Ok(ChunkData {
                offset: 0,
                data: vec![7],
            }));
            drop(signal_b);
        });

        assert_eq!(rx.await.unwrap().data, vec![7]);
        assert_eq!(rx_b.await.unwrap_err(), ChunkError::Abandoned);
    }
}
