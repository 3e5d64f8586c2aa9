//! Store error types.

use osmhist_codec::CodecError;
use thiserror::Error;

/// Store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// LMDB error.
    #[error("database error: {0}")]
    Database(#[from] heed::Error),

    /// A stored or incoming cell blob could not be decoded while merging.
    #[error("cell decode error: {0}")]
    Codec(#[from] CodecError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored key has the wrong length.
    #[error("malformed key of {0} bytes")]
    MalformedKey(usize),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
