//! Storage layer error types
//!
//! Defines all errors that can occur while reading, writing and indexing
//! shape logs.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Open, seek, read, write or stat failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A line of a record could not be parsed
    #[error("Format error at byte {offset}: {reason}")]
    Format { offset: u64, reason: String },

    /// The log ended in the middle of a record
    #[error("Format error: record at byte {offset} ends prematurely")]
    Truncated { offset: u64 },

    /// A record violates its own invariants and cannot be written
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// An index entry disagrees with the record found at its offset
    #[error("Corrupt index: {0}")]
    Corruption(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn format(offset: u64, reason: impl Into<String>) -> Self {
        StoreError::Format {
            offset,
            reason: reason.into(),
        }
    }

    /// True for malformed and truncated records alike
    pub fn is_format(&self) -> bool {
        matches!(self, StoreError::Format { .. } | StoreError::Truncated { .. })
    }

    /// True when the underlying file does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type alias for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
