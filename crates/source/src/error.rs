//! Error types for source operations.

use thiserror::Error;

/// Errors that can occur while locating a source or streaming from it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Content not found at the resolved source.
    #[error("Content not found at {url}")]
    NotFound { url: String },

    /// No source could be resolved for the content.
    #[error("No source available for {hash}")]
    Unavailable { hash: String },

    /// Source answered with an unexpected status.
    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Source rejected the requested byte range.
    #[error("Range starting at byte {start} not satisfiable by {url}")]
    RangeNotSatisfiable { url: String, start: u64 },

    /// Source kept delivering from the wrong offset after restarts.
    #[error("Source ignored byte range starting at {start} after {attempts} attempts")]
    RangeNotHonored { start: u64, attempts: u32 },

    /// Network error (connect, reset, name resolution).
    #[error("Transport error: {message}")]
    Transport { message: String, retryable: bool },

    /// No data arrived in time.
    #[error("Timed out after {millis}ms waiting for source data")]
    Timeout { millis: u64 },

    /// Source URL could not be used.
    #[error("Invalid source URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// Stream ended before the file's known size was reached.
    #[error("Stream ended at byte {offset}, file size is {expected}")]
    UnexpectedEof { offset: u64, expected: u64 },
}

impl SourceError {
    /// Create a non-retryable transport error.
    ///
    /// # Arguments
    /// * `message` - Description of the failure
    pub fn transport(message: impl Into<String>) -> Self {
        SourceError::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Check if a fresh request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transport { retryable, .. } => *retryable,
            SourceError::Timeout { .. } => true,
            SourceError::HttpStatus { status, .. } => {
                (500..=599).contains(status) || *status == 408 || *status == 429
            }
            SourceError::Unavailable { .. } => true,
            SourceError::NotFound { .. } => false,
            SourceError::RangeNotSatisfiable { .. } => false,
            SourceError::RangeNotHonored { .. } => false,
            SourceError::InvalidUrl { .. } => false,
            SourceError::UnexpectedEof { .. } => false,
        }
    }
}
