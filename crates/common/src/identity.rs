//! Content identity of a remote file.

use std::fmt;
use std::sync::Arc;

/// Identity of a content-addressed file: its hash and its known size.
///
/// The hash is what source resolvers use to locate peers; the size bounds
/// every read against the file. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    hash: Arc<str>,
    size: u64,
}

impl FileIdentity {
    /// Create an identity from a known hash and size.
    ///
    /// # Arguments
    /// * `hash` - Content hash identifying the file
    /// * `size` - File size in bytes
    pub fn new(hash: impl Into<Arc<str>>, size: u64) -> Self {
        Self {
            hash: hash.into(),
            size,
        }
    }

    /// Create an identity for in-hand content using XXH128.
    ///
    /// # Arguments
    /// * `data` - The full file content
    pub fn for_content(data: &[u8]) -> Self {
        let hash: u128 = xxhash_rust::xxh3::xxh3_128(data);
        Self::new(format!("{:032x}", hash), data.len() as u64)
    }

    /// Content hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Known file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.hash, self.size)
    }
}
