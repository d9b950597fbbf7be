//! Splicing stream deliveries into pending chunks.
//!
//! Two cursors move in lockstep: the chunk's write cursor (`chunk.start`
//! toward `chunk.end`) and the delivery's read cursor (`buffer.start` toward
//! `buffer.end`). Bytes are copied only while the two point at the same
//! absolute offset; when they disagree the caller wants a different part of
//! the file than the stream is producing, which is a seek.
//!
//! ```text
//!  file   ──────────────────────────────────────────────►
//!  stream          [buffer.start ........ buffer.end)
//!  chunk A   [.......A.start ... A.end)
//!  chunk B                            [B.start ... B.end)
//!                  └── n = min(remaining buffer, remaining chunk)
//! ```

use bytes::Bytes;

use crate::chunk::Chunk;
use crate::chunk_queue::Dequeued;
use crate::stats::DownloaderStats;

/// One delivery from the network with a read cursor.
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    /// Absolute offset of the next unread byte.
    start: u64,
    /// Exclusive absolute end offset.
    end: u64,
    data: Bytes,
    /// Read position within `data`.
    pos: usize,
}

impl StreamBuffer {
    /// Wrap `data` arriving at absolute offset `start`.
    ///
    /// # Arguments
    /// * `start` - Absolute offset of `data[0]`
    /// * `data` - Delivered bytes
    pub fn new(start: u64, data: Bytes) -> Self {
        Self {
            start,
            end: start + data.len() as u64,
            data,
            pos: 0,
        }
    }

    /// Absolute offset of the next unread byte.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive absolute end offset.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Check if every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn unread(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
        self.start += n as u64;
    }
}

/// What the downloader should do after a delivery has been spliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceOutcome {
    /// Delivery consumed, current chunk still wants bytes: read more.
    WantMore,
    /// Chunk and delivery ended together; no chunk is current now.
    Drained,
    /// Current chunk starts somewhere other than the stream position.
    Seek,
    /// A chunk completed mid-delivery and no next chunk arrived in time.
    Stalled,
    /// Stop was requested while waiting for the next chunk.
    Stopped,
}

/// Splice `buffer` into `current`, pulling further chunks from `next_chunk`
/// when a chunk fills before the delivery is used up.
///
/// `current` may be `None` on entry, in which case a chunk is pulled first.
/// On [`SpliceOutcome::Seek`] the mismatched chunk is left in `current`.
///
/// # Arguments
/// * `current` - The in-flight chunk
/// * `buffer` - Delivery to consume; its cursor is advanced in place
/// * `stats` - Counters for completions and bytes
/// * `next_chunk` - Bounded wait for the next queued chunk
pub fn splice<F>(
    current: &mut Option<Chunk>,
    buffer: &mut StreamBuffer,
    stats: &DownloaderStats,
    mut next_chunk: F,
) -> SpliceOutcome
where
    F: FnMut() -> Dequeued,
{
    loop {
        if current.is_none() {
            match next_chunk() {
                Dequeued::Chunk(chunk) => *current = Some(chunk),
                Dequeued::TimedOut => return SpliceOutcome::Stalled,
                Dequeued::Stopped => return SpliceOutcome::Stopped,
            }
        }
        let Some(chunk) = current.as_mut() else {
            return SpliceOutcome::Stalled;
        };

        if chunk.start() != buffer.start() {
            return SpliceOutcome::Seek;
        }

        let n: usize = chunk.write(buffer.unread());
        buffer.advance(n);
        stats.record_bytes(n as u64);

        if !chunk.is_full() {
            // n was bounded by the buffer, so the buffer is exhausted.
            return SpliceOutcome::WantMore;
        }

        if let Some(done) = current.take() {
            stats.record_completed();
            done.complete();
        }
        if buffer.is_empty() {
            return SpliceOutcome::Drained;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkData, ChunkReceiver, CompletionSignal};
    use std::collections::VecDeque;

    fn chunk(start: u64, end: u64) -> (Chunk, ChunkReceiver) {
        let (signal, rx) = CompletionSignal::channel();
        (Chunk::new(start, end, signal).unwrap(), rx)
    }

    /// Deterministic content: byte at offset `i` is `i % 251`.
    fn content(start: u64, end: u64) -> Bytes {
        (start..end).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    fn no_more() -> Dequeued {
        Dequeued::TimedOut
    }

    #[test]
    fn test_partial_fill_wants_more() {
        let stats: DownloaderStats = DownloaderStats::default();
        let (c, mut rx) = chunk(0, 100);
        let mut current: Option<Chunk> = Some(c);
        let mut buffer: StreamBuffer = StreamBuffer::new(0, content(0, 40));

        let outcome: SpliceOutcome = splice(&mut current, &mut buffer, &stats, no_more);
        assert_eq!(outcome, SpliceOutcome::WantMore);
        assert!(buffer.is_empty());
        assert_eq!(current.as_ref().unwrap().start(), 40);
        assert!(rx.try_result().is_none());

        let mut buffer: StreamBuffer = StreamBuffer::new(40, content(40, 100));
        let outcome: SpliceOutcome = splice(&mut current, &mut buffer, &stats, no_more);
        assert_eq!(outcome, SpliceOutcome::Drained);
        assert!(current.is_none());

        let data: ChunkData = rx.try_result().unwrap().unwrap();
        assert_eq!(data.data, content(0, 100).to_vec());
        assert_eq!(stats.snapshot().bytes_delivered, 100);
        assert_eq!(stats.snapshot().chunks_completed, 1);
    }

    #[test]
    fn test_buffer_spanning_chunks() {
        let stats: DownloaderStats = DownloaderStats::default();
        let (a, mut rx_a) = chunk(0, 30);
        let (b, mut rx_b) = chunk(30, 60);
        let (c, mut rx_c) = chunk(60, 100);
        let mut pending: VecDeque<Chunk> = VecDeque::from(vec![b, c]);
        let mut current: Option<Chunk> = Some(a);
        let mut buffer: StreamBuffer = StreamBuffer::new(0, content(0, 80));

        let outcome: SpliceOutcome = splice(&mut current, &mut buffer, &stats, || {
            pending.pop_front().map(Dequeued::Chunk).unwrap_or(Dequeued::TimedOut)
        });

        assert_eq!(outcome, SpliceOutcome::WantMore);
        assert_eq!(rx_a.try_result().unwrap().unwrap().data, content(0, 30).to_vec());
        assert_eq!(rx_b.try_result().unwrap().unwrap().data, content(30, 60).to_vec());
        assert!(rx_c.try_result().is_none());
        assert_eq!(current.as_ref().unwrap().start(), 80);
    }

    #[test]
    fn test_offset_mismatch_is_seek() {
        let stats: DownloaderStats = DownloaderStats::default();
        let (c, mut rx) = chunk(500, 600);
        let mut current: Option<Chunk> = Some(c);
        let mut buffer: StreamBuffer = StreamBuffer::new(0, content(0, 100));

        let outcome: SpliceOutcome = splice(&mut current, &mut buffer, &stats, no_more);
        assert_eq!(outcome, SpliceOutcome::Seek);
        assert_eq!(current.as_ref().unwrap().start(), 500);
        assert_eq!(buffer.start(), 0);
        assert!(rx.try_result().is_none());
    }

    #[test]
    fn test_next_chunk_elsewhere_is_seek() {
        let stats: DownloaderStats = DownloaderStats::default();
        let (a, mut rx_a) = chunk(0, 10);
        let (far, _rx_far) = chunk(500, 510);
        let mut next: Option<Chunk> = Some(far);
        let mut current: Option<Chunk> = Some(a);
        let mut buffer: StreamBuffer = StreamBuffer::new(0, content(0, 50));

        let outcome: SpliceOutcome = splice(&mut current, &mut buffer, &stats, || {
            next.take().map(Dequeued::Chunk).unwrap_or(Dequeued::TimedOut)
        });

        assert_eq!(outcome, SpliceOutcome::Seek);
        assert!(rx_a.try_result().unwrap().is_ok());
        assert_eq!(current.as_ref().unwrap().start(), 500);
    }

    #[test]
    fn test_leftover_without_next_chunk_stalls() {
        let stats: DownloaderStats = DownloaderStats::default();
        let (a, mut rx_a) = chunk(0, 10);
        let mut current: Option<Chunk> = Some(a);
        let mut buffer: StreamBuffer = StreamBuffer::new(0, content(0, 50));

        let outcome: SpliceOutcome = splice(&mut current, &mut buffer, &stats, no_more);
        assert_eq!(outcome, SpliceOutcome::Stalled);
        assert!(current.is_none());
        assert_eq!(rx_a.try_result().unwrap().unwrap().len(), 10);
        assert_eq!(buffer.start(), 10);
    }

    #[test]
    fn test_stop_while_waiting_for_next() {
        let stats: DownloaderStats = DownloaderStats::default();
        let (a, _rx_a) = chunk(0, 10);
        let mut current: Option<Chunk> = Some(a);
        let mut buffer: StreamBuffer = StreamBuffer::new(0, content(0, 50));

        let outcome: SpliceOutcome =
            splice(&mut current, &mut buffer, &stats, || Dequeued::Stopped);
        assert_eq!(outcome, SpliceOutcome::Stopped);
    }

    #[test]
    fn test_zero_length_chunk_completes_on_alignment() {
        let stats: DownloaderStats = DownloaderStats::default();
        let (empty, mut rx_empty) = chunk(5, 5);
        let (after, mut rx_after) = chunk(5, 8);
        let mut next: Option<Chunk> = Some(after);
        let mut current: Option<Chunk> = Some(empty);
        let mut buffer: StreamBuffer = StreamBuffer::new(5, content(5, 8));

        let outcome: SpliceOutcome = splice(&mut current, &mut buffer, &stats, || {
            next.take().map(Dequeued::Chunk).unwrap_or(Dequeued::TimedOut)
        });

        assert_eq!(outcome, SpliceOutcome::Drained);
        assert!(rx_empty.try_result().unwrap().unwrap().is_empty());
        assert_eq!(rx_after.try_result().unwrap().unwrap().len(), 3);
    }

    #[test]
    fn test_pulls_chunk_when_none_current() {
        let stats: DownloaderStats = DownloaderStats::default();
        let (a, mut rx_a) = chunk(100, 120);
        let mut next: Option<Chunk> = Some(a);
        let mut current: Option<Chunk> = None;
        let mut buffer: StreamBuffer = StreamBuffer::new(100, content(100, 120));

        let outcome: SpliceOutcome = splice(&mut current, &mut buffer, &stats, || {
            next.take().map(Dequeued::Chunk).unwrap_or(Dequeued::TimedOut)
        });

        assert_eq!(outcome, SpliceOutcome::Drained);
        assert_eq!(rx_a.try_result().unwrap().unwrap().data, content(100, 120).to_vec());
    }
}
