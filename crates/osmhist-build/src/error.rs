//! Build error types.

use osmhist_codec::CodecError;
use osmhist_store::StoreError;
use thiserror::Error;

/// Error that aborts a shard.
///
/// Per-record problems (undecodable side-channel entries, missing children,
/// coordinates outside the grid) are logged and do not surface here.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Writing a sealed cell failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Sealing a cell failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Reading or writing the side channel failed.
    #[error("side channel io error: {0}")]
    Io(#[from] std::io::Error),

    /// The upstream decoder reported an error.
    #[error("upstream error: {0}")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Input ids are not strictly ascending.
    #[error("input out of order: id {id} after {previous}")]
    Unsorted { previous: i64, id: i64 },

    /// A version group carried no versions.
    #[error("empty version group after id {0:?}")]
    EmptyGroup(Option<i64>),

    /// A version group mixed several ids.
    #[error("version group for id {expected} contains id {found}")]
    MixedGroup { expected: i64, found: i64 },

    /// A configuration value could not be parsed.
    #[error("invalid value {value:?} for {name}")]
    Config { name: &'static str, value: String },
}

impl BuildError {
    pub fn upstream(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Upstream(Box::new(err))
    }
}

/// Result type for build operations.
pub type BuildResult<T> = Result<T, BuildError>;
