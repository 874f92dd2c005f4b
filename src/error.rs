//! Crate-wide error type.
//!
//! Every fallible operation in the database returns [`Error`] so embedders
//! can match broadly or on a specific kind. Validation errors are raised
//! before any state is mutated.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("id {0} already exists")]
    DuplicateId(u64),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a truncated or corrupt-input error.
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Deserialization(msg.into())
    }
}
