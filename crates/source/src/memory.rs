//! In-memory source for tests and local use.
//!
//! `MemorySource` acts as both the resolver and the issuer. It serves content
//! from memory in fixed-size deliveries and records every request it opens,
//! so callers can assert on how many connections were made and where.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use peerfs_common::{FileIdentity, DEFAULT_DELIVERY_SIZE};

use crate::error::SourceError;
use crate::traits::{ByteStream, OpenedStream, RequestIssuer, SourceResolver};

/// URL scheme produced by [`MemorySource`] as a resolver.
pub const MEMORY_SCHEME: &str = "memory://";

/// One request opened against a [`MemorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// URL the request was opened for.
    pub url: String,
    /// Requested range start, `None` when no range was sent.
    pub range_start: Option<u64>,
}

/// Serves content held in memory, keyed by content hash.
pub struct MemorySource {
    content: RwLock<HashMap<String, Bytes>>,
    delivery_size: usize,
    /// Deliver from offset 0 regardless of the requested range.
    ignore_ranges: AtomicBool,
    /// Stop delivering after this many bytes and keep the stream open.
    stall_after: Mutex<Option<u64>>,
    /// Fail each stream with a transport error after this many bytes.
    fail_after: Mutex<Option<u64>>,
    /// Fail every open with this error.
    fail_open: Mutex<Option<SourceError>>,
    requests: Mutex<Vec<RequestRecord>>,
}

impl MemorySource {
    /// Create an empty source with the default delivery size.
    pub fn new() -> Self {
        Self::with_delivery_size(DEFAULT_DELIVERY_SIZE)
    }

    /// Create an empty source delivering at most `delivery_size` bytes at once.
    ///
    /// # Arguments
    /// * `delivery_size` - Maximum bytes per delivery (at least 1)
    pub fn with_delivery_size(delivery_size: usize) -> Self {
        Self {
            content: RwLock::new(HashMap::new()),
            delivery_size: delivery_size.max(1),
            ignore_ranges: AtomicBool::new(false),
            stall_after: Mutex::new(None),
            fail_after: Mutex::new(None),
            fail_open: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Add content and return its identity.
    ///
    /// # Arguments
    /// * `data` - Full file content
    pub fn insert(&self, data: Vec<u8>) -> FileIdentity {
        let identity: FileIdentity = FileIdentity::for_content(&data);
        self.content
            .write()
            .unwrap()
            .insert(identity.hash().to_string(), Bytes::from(data));
        identity
    }

    /// Make streams start at offset 0 whatever range was asked for.
    pub fn set_ignore_ranges(&self, ignore: bool) {
        self.ignore_ranges.store(ignore, Ordering::SeqCst);
    }

    /// Make each stream go silent after `bytes` bytes without ending.
    pub fn set_stall_after(&self, bytes: Option<u64>) {
        *self.stall_after.lock().unwrap() = bytes;
    }

    /// Fail each stream with a transport error after `bytes` bytes.
    pub fn set_fail_after(&self, bytes: Option<u64>) {
        *self.fail_after.lock().unwrap() = bytes;
    }

    /// Fail every subsequent open with `error`.
    pub fn set_fail_open(&self, error: Option<SourceError>) {
        *self.fail_open.lock().unwrap() = error;
    }

    /// All requests opened so far, oldest first.
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests opened so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Split `data[start..]` into deliveries, truncated at the failure or
    /// stall point.
    fn deliveries(&self, data: &Bytes, start: u64) -> Vec<Result<Bytes, SourceError>> {
        let fail_after: Option<u64> = *self.fail_after.lock().unwrap();
        let stall_after: Option<u64> = *self.stall_after.lock().unwrap();
        let cutoff: Option<u64> = match (fail_after, stall_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let mut items: Vec<Result<Bytes, SourceError>> = Vec::new();
        let mut sent: u64 = 0;
        let mut pos: usize = start as usize;

        while pos < data.len() {
            let mut len: usize = self.delivery_size.min(data.len() - pos);
            if let Some(limit) = cutoff {
                len = len.min(limit.saturating_sub(sent) as usize);
                if len == 0 {
                    break;
                }
            }
            items.push(Ok(data.slice(pos..pos + len)));
            pos += len;
            sent += len as u64;
        }

        if fail_after.is_some() && fail_after == cutoff {
            items.push(Err(SourceError::Transport {
                message: "connection reset by peer".to_string(),
                retryable: true,
            }));
        }
        items
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceResolver for MemorySource {
    async fn resolve_source(&self, identity: &FileIdentity) -> Result<String, SourceError> {
        if self.content.read().unwrap().contains_key(identity.hash()) {
            Ok(format!("{}{}", MEMORY_SCHEME, identity.hash()))
        } else {
            Err(SourceError::Unavailable {
                hash: identity.hash().to_string(),
            })
        }
    }
}

#[async_trait]
impl RequestIssuer for MemorySource {
    async fn open_stream(
        &self,
        url: &str,
        range_start: Option<u64>,
    ) -> Result<OpenedStream, SourceError> {
        self.requests.lock().unwrap().push(RequestRecord {
            url: url.to_string(),
            range_start,
        });

        if let Some(err) = self.fail_open.lock().unwrap().clone() {
            return Err(err);
        }

        let hash: &str = url
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| SourceError::InvalidUrl {
                url: url.to_string(),
                message: format!("expected {} scheme", MEMORY_SCHEME),
            })?;

        let data: Bytes = self
            .content
            .read()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                url: url.to_string(),
            })?;

        let start: u64 = if self.ignore_ranges.load(Ordering::SeqCst) {
            0
        } else {
            range_start.unwrap_or(0)
        };
        if start > data.len() as u64 {
            return Err(SourceError::RangeNotSatisfiable {
                url: url.to_string(),
                start,
            });
        }

        let items: Vec<Result<Bytes, SourceError>> = self.deliveries(&data, start);
        let stalls: bool = self.stall_after.lock().unwrap().is_some();
        let body: ByteStream = if stalls {
            stream::iter(items).chain(stream::pending()).boxed()
        } else {
            stream::iter(items).boxed()
        };

        Ok(OpenedStream {
            url: url.to_string(),
            start,
            body,
        })
    }
}
