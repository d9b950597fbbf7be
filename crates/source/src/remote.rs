//! Resolve-then-open pairing of the two collaborators.

use std::sync::Arc;

use peerfs_common::FileIdentity;

use crate::error::SourceError;
use crate::traits::{OpenedStream, RequestIssuer, SourceResolver};

/// A resolver and an issuer used together to reach a file's content.
#[derive(Clone)]
pub struct RemoteSource {
    resolver: Arc<dyn SourceResolver>,
    issuer: Arc<dyn RequestIssuer>,
}

impl RemoteSource {
    /// Pair a resolver with an issuer.
    ///
    /// # Arguments
    /// * `resolver` - Picks the peer for each request
    /// * `issuer` - Opens the streaming request
    pub fn new(resolver: Arc<dyn SourceResolver>, issuer: Arc<dyn RequestIssuer>) -> Self {
        Self { resolver, issuer }
    }

    /// Resolve a peer for `identity` and open a stream at `start`.
    ///
    /// The range is omitted when `start` is 0.
    ///
    /// # Arguments
    /// * `identity` - Content identity of the file
    /// * `start` - Absolute offset the stream should begin at
    pub async fn open(
        &self,
        identity: &FileIdentity,
        start: u64,
    ) -> Result<OpenedStream, SourceError> {
        let url: String = self.resolver.resolve_source(identity).await?;
        let range_start: Option<u64> = if start == 0 { None } else { Some(start) };
        log::debug!("Opening {} at {:?} for {}", url, range_start, identity);
        self.issuer.open_stream(&url, range_start).await
    }
}

impl std::fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSource").finish_non_exhaustive()
    }
}
