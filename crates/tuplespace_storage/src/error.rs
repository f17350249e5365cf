//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame ended before its declared length.
    #[error("truncated frame at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        /// Offset of the frame start.
        offset: u64,
        /// Bytes the frame header declares.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The backend was closed.
    #[error("storage is closed")]
    Closed,

    /// A batch was rejected by the backend.
    #[error("batch rejected: {0}")]
    Rejected(String),
}
