//! Counters describing what a file's downloaders have done.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, shared by every downloader created for one open file.
#[derive(Debug, Default)]
pub struct DownloaderStats {
    downloaders_started: AtomicU64,
    requests: AtomicU64,
    seeks: AtomicU64,
    chunks_completed: AtomicU64,
    chunks_failed: AtomicU64,
    bytes_delivered: AtomicU64,
    stalls: AtomicU64,
    idle_timeouts: AtomicU64,
}

impl DownloaderStats {
    pub(crate) fn record_downloader_started(&self) {
        self.downloaders_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_seek(&self) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.chunks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, count: u64) {
        self.chunks_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes(&self, bytes: u64) {
        self.bytes_delivered.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> DownloaderStatsSnapshot {
        DownloaderStatsSnapshot {
            downloaders_started: self.downloaders_started.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            seeks: self.seeks.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DownloaderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloaderStatsSnapshot {
    /// Downloader threads started.
    pub downloaders_started: u64,
    /// Outbound stream requests opened.
    pub requests: u64,
    /// Streams aborted because a chunk wanted a different offset.
    pub seeks: u64,
    /// Chunks completed successfully.
    pub chunks_completed: u64,
    /// Chunks completed with an error.
    pub chunks_failed: u64,
    /// Bytes spliced into chunks.
    pub bytes_delivered: u64,
    /// Streams dropped because no next chunk arrived in time.
    pub stalls: u64,
    /// Downloaders that exited with nothing to do.
    pub idle_timeouts: u64,
}
