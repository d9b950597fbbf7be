//! Simple source resolvers.
//!
//! Peer ranking lives outside this crate; these resolvers cover the fixed
//! cases of one known server and a fixed set of peers.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use peerfs_common::FileIdentity;

use crate::error::SourceError;
use crate::traits::SourceResolver;

/// Join a base URL and a content hash.
fn content_url(base_url: &str, hash: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), hash)
}

/// Resolves every identity to `{base_url}/{hash}` on one server.
#[derive(Debug, Clone)]
pub struct StaticSourceResolver {
    base_url: String,
}

impl StaticSourceResolver {
    /// Create a resolver for a single server.
    ///
    /// # Arguments
    /// * `base_url` - URL prefix content hashes are appended to
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SourceResolver for StaticSourceResolver {
    async fn resolve_source(&self, identity: &FileIdentity) -> Result<String, SourceError> {
        Ok(content_url(&self.base_url, identity.hash()))
    }
}

/// Rotates through a fixed list of peers, one per request.
#[derive(Debug)]
pub struct PeerListResolver {
    peers: Vec<String>,
    next: AtomicUsize,
}

impl PeerListResolver {
    /// Create a resolver over a list of peer base URLs.
    ///
    /// # Arguments
    /// * `peers` - Base URLs of peers that all serve the same content
    pub fn new(peers: Vec<String>) -> Self {
        Self {
            peers,
            next: AtomicUsize::new(0),
        }
    }

    /// Number of configured peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl SourceResolver for PeerListResolver {
    async fn resolve_source(&self, identity: &FileIdentity) -> Result<String, SourceError> {
        if self.peers.is_empty() {
            return Err(SourceError::Unavailable {
                hash: identity.hash().to_string(),
            });
        }
        let index: usize = self.next.fetch_add(1, Ordering::Relaxed) % self.peers.len();
        Ok(content_url(&self.peers[index], identity.hash()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_joins_url() {
        let resolver: StaticSourceResolver = StaticSourceResolver::new("http://peer:8080/cas/");
        let id: FileIdentity = FileIdentity::new("abc", 10);
        assert_eq!(
            resolver.resolve_source(&id).await.unwrap(),
            "http://peer:8080/cas/abc"
        );
    }

    #[tokio::test]
    async fn test_peer_list_rotates() {
        let resolver: PeerListResolver =
            PeerListResolver::new(vec!["http://a".into(), "http://b".into()]);
        let id: FileIdentity = FileIdentity::new("h", 1);

        assert_eq!(resolver.resolve_source(&id).await.unwrap(), "http://a/h");
        assert_eq!(resolver.resolve_source(&id).await.unwrap(), "http://b/h");
        assert_eq!(resolver.resolve_source(&id).await.unwrap(), "http://a/h");
    }

    #[tokio::test]
    async fn test_empty_peer_list_is_unavailable() {
        let resolver: PeerListResolver = PeerListResolver::new(Vec::new());
        let id: FileIdentity = FileIdentity::new("h", 1);
        let result: Result<String, SourceError> = resolver.resolve_source(&id).await;
        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
    }
}
