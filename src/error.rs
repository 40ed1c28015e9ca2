//! Error types for the cache connector
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache connector.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation issued before `open` or after `close`
    #[error("Invalid cache connection")]
    NotConnected,

    /// The store file could not be opened or created
    #[error("Failed to open store: {0}")]
    StoreOpen(String),

    /// The store handle could not be released
    #[error("Failed to close store: {0}")]
    StoreClose(String),

    /// Attempted to write a value that encodes to nothing
    #[error("Empty cache data")]
    EmptyValue,

    /// Key rejected before reaching the store
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Failure inside a read or write transaction
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Stored record could not be decoded
    #[error("Decode failed: {0}")]
    Decode(String),

    /// `current + step` does not fit in an i64
    #[error("Sequence overflow: {0}")]
    SequenceOverflow(String),
}

// == Store Error Conversions ==
macro_rules! transaction_error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for CacheError {
                fn from(err: $source) -> Self {
                    CacheError::Transaction(err.to_string())
                }
            }
        )*
    };
}

transaction_error_from!(
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<base64::DecodeError> for CacheError {
    fn from(err: base64::DecodeError) -> Self {
        CacheError::Decode(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache connector.
pub type Result<T> = std::result::Result<T, CacheError>;
