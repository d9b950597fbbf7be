//! HTTP backend for peerfs sources.
//!
//! This crate provides a `RequestIssuer` implementation using `reqwest`.
//! Requests carry an open-ended `Range: bytes=N-` header when the stream
//! should start past offset 0.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use peerfs_source::{RemoteSource, StaticSourceResolver};
//! use peerfs_source_http::{HttpOptions, HttpRequestIssuer};
//!
//! let issuer = HttpRequestIssuer::new(HttpOptions::default())?;
//! let resolver = StaticSourceResolver::new("http://peer:8080/cas");
//! let source = RemoteSource::new(Arc::new(resolver), Arc::new(issuer));
//! ```

mod client;
mod error;

pub use client::{HttpOptions, HttpRequestIssuer};
pub use error::HttpError;
