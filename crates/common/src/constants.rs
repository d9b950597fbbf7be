//! Shared constants used across peerfs crates.

/// How long an idle downloader waits for a read request before it exits (30s).
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// How long a streaming downloader waits for the next contiguous read before
/// it drops the connection (5s).
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 5_000;

/// Maximum time between two deliveries on an open stream (60s).
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 60_000;

/// Consecutive restarts tolerated from a source that ignores byte ranges.
pub const DEFAULT_MAX_RANGE_RESTARTS: u32 = 3;

/// Connect timeout for source requests (10s).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Size of each delivery produced by in-memory sources (16KB).
pub const DEFAULT_DELIVERY_SIZE: usize = 16 * 1024;

/// Most a chunk buffer reserves before any bytes arrive (256KB); larger
/// ranges grow as deliveries are written.
pub const MAX_CHUNK_PRERESERVE: usize = 256 * 1024;

/// User agent sent with source requests.
pub const USER_AGENT: &str = concat!("peerfs/", env!("CARGO_PKG_VERSION"));
