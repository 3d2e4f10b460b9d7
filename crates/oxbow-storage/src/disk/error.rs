//! Disk layer errors.

use std::io;

use thiserror::Error;

/// Result type for disk operations.
pub type DiskResult<T> = Result<T, DiskError>;

/// Errors that can occur at the block-device boundary.
#[derive(Debug, Error)]
pub enum DiskError {
    /// I/O error from the underlying device.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying error.
        #[from]
        source: io::Error,
    },

    /// A buffer of the wrong size was handed to the device.
    #[error("buffer size {actual} does not match page size {expected}")]
    BadBufferSize {
        /// Expected page size in bytes.
        expected: usize,
        /// Size of the buffer that was provided.
        actual: usize,
    },

    /// A request targeted the invalid page id sentinel.
    #[error("request targets invalid page id")]
    InvalidPageId,

    /// The scheduler worker is gone and can no longer complete requests.
    #[error("disk scheduler worker has shut down before completing the request")]
    WorkerGone,
}
