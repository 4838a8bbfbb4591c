//! Query error types

use crate::storage::StoreError;
use thiserror::Error;

/// Errors that can occur while answering a read request
#[derive(Error, Debug)]
pub enum QueryError {
    /// The request was rejected before touching any file
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
