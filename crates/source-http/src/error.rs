//! Error types for the HTTP backend.

use peerfs_source::SourceError;
use thiserror::Error;

/// Errors specific to the HTTP backend.
#[derive(Error, Debug)]
pub enum HttpError {
    /// Request failed before or while reading the response.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Client could not be built from the options.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<HttpError> for SourceError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Request(e) if e.is_timeout() => SourceError::Transport {
                message: e.to_string(),
                retryable: true,
            },
            HttpError::Request(e) => SourceError::Transport {
                retryable: e.is_connect(),
                message: e.to_string(),
            },
            HttpError::ConfigError(message) => SourceError::InvalidUrl {
                url: String::new(),
                message,
            },
        }
    }
}
