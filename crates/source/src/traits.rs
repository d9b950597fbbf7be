//! Collaborator interfaces for locating and streaming remote content.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use peerfs_common::FileIdentity;

use crate::error::SourceError;

/// Sequence of byte deliveries from one open request.
///
/// Ends with `None` on a clean end of file. Dropping the stream aborts the
/// request.
pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// An open streaming request.
pub struct OpenedStream {
    /// URL the request was sent to.
    pub url: String,
    /// Absolute file offset of the first byte `body` will deliver.
    ///
    /// A source that ignored the requested range reports 0 here.
    pub start: u64,
    /// The deliveries.
    pub body: ByteStream,
}

impl std::fmt::Debug for OpenedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedStream")
            .field("url", &self.url)
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

/// Picks a peer URL serving a given piece of content.
///
/// Successive calls for the same identity may return different peers, e.g.
/// after a previously chosen peer went away.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Resolve a source URL for the content.
    ///
    /// # Arguments
    /// * `identity` - Content identity of the file
    ///
    /// # Returns
    /// A URL the content can be fetched from, or `SourceError::Unavailable`.
    async fn resolve_source(&self, identity: &FileIdentity) -> Result<String, SourceError>;
}

/// Opens range-capable streaming requests.
#[async_trait]
pub trait RequestIssuer: Send + Sync {
    /// Open a streaming GET.
    ///
    /// # Arguments
    /// * `url` - Source URL
    /// * `range_start` - Open-ended byte range start, `None` for the whole file
    async fn open_stream(
        &self,
        url: &str,
        range_start: Option<u64>,
    ) -> Result<OpenedStream, SourceError>;
}
