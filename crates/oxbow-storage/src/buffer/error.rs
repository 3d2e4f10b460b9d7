//! Buffer pool errors.

use thiserror::Error;

use crate::disk::DiskError;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
///
/// Conditions a caller is expected to handle (a missing page, a pinned page
/// on delete) are reported through `bool` returns, not through this enum;
/// the enum covers pool exhaustion and I/O failure.
#[derive(Debug, Error)]
pub enum BufferError {
    /// No free frame and no evictable frame: every page is pinned.
    #[error("buffer pool exhausted: no free or evictable frame")]
    PoolExhausted,

    /// I/O error from the disk layer.
    #[error("disk error: {source}")]
    Disk {
        /// The underlying error.
        #[from]
        source: DiskError,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is a transient condition that can be retried
    /// (after unpinning something).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted)
    }
}
