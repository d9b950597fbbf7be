//! Source location and streaming request interfaces for peerfs.
//!
//! The download engine never talks to the network directly. It goes through
//! two collaborators defined here:
//!
//! - **`SourceResolver`** - picks a peer URL for a content identity
//! - **`RequestIssuer`** - opens a streaming, range-capable request
//!
//! `RemoteSource` pairs the two. Backends live in their own crates (see
//! `peerfs-source-http`); `MemorySource` serves content from memory.

mod error;
pub mod memory;
mod remote;
pub mod resolver;
mod traits;

pub use error::SourceError;
pub use memory::{MemorySource, RequestRecord, MEMORY_SCHEME};
pub use remote::RemoteSource;
pub use resolver::{PeerListResolver, StaticSourceResolver};
pub use traits::{ByteStream, OpenedStream, RequestIssuer, SourceResolver};
