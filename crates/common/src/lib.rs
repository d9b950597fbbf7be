//! Shared types and constants for peerfs.
//!
//! This crate provides functionality used across all peerfs crates:
//! - Content identity of remote files
//! - Default timeouts and limits

pub mod constants;
pub mod identity;

pub use constants::*;
pub use identity::FileIdentity;
