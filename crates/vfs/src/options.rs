//! Configuration options for the download engine.
//!
//! Timeouts are the only mechanism (besides an explicit stop) that end a
//! downloader's thread, so they are the main knobs here.

use std::time::Duration;

use peerfs_common::{
    DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_RANGE_RESTARTS, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_STALL_TIMEOUT_MS,
};

/// Configuration options for a downloader.
///
/// # Example
///
/// ```ignore
/// let options = DownloaderOptions::default()
///     .with_idle_timeout(Duration::from_secs(60))
///     .with_stall_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DownloaderOptions {
    /// How long an idle downloader waits for work before its thread exits.
    pub idle_timeout: Duration,
    /// How long a streaming downloader waits for the next read before it
    /// drops the connection and exits.
    pub stall_timeout: Duration,
    /// Maximum time between two deliveries on an open stream.
    /// Exceeding it is a transport error.
    pub read_timeout: Duration,
    /// Consecutive restarts tolerated when a fresh stream starts at the wrong
    /// offset (the source ignored the byte range).
    pub max_range_restarts: u32,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            stall_timeout: Duration::from_millis(DEFAULT_STALL_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            max_range_restarts: DEFAULT_MAX_RANGE_RESTARTS,
        }
    }
}

impl DownloaderOptions {
    /// Options for interactive use: short stalls, long idle.
    pub fn interactive() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            stall_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    /// Short timeouts so tests finish quickly.
    pub fn for_tests() -> Self {
        Self {
            idle_timeout: Duration::from_millis(500),
            stall_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_secs(5),
            max_range_restarts: DEFAULT_MAX_RANGE_RESTARTS,
        }
    }

    /// Set the idle timeout.
    ///
    /// # Arguments
    /// * `timeout` - Idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the stall timeout.
    ///
    /// # Arguments
    /// * `timeout` - Stall timeout
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the read timeout.
    ///
    /// # Arguments
    /// * `timeout` - Read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set how many range restarts are tolerated.
    ///
    /// # Arguments
    /// * `restarts` - Maximum consecutive restarts
    pub fn with_max_range_restarts(mut self, restarts: u32) -> Self {
        self.max_range_restarts = restarts;
        self
    }
}
