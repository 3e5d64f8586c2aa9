//! Codec error types.

use thiserror::Error;

/// Decoding error for a single record or cell.
///
/// A failure affects only the record being decoded; callers skip it and
/// continue with the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer ended in the middle of a value.
    #[error("record truncated at byte {offset}")]
    Truncated { offset: usize },

    /// A varint did not terminate within 10 bytes.
    #[error("varint too long at byte {offset}")]
    VarIntTooLong { offset: usize },

    /// Header carries bits this codec does not know.
    #[error("unknown header flags {0:#04x}")]
    UnknownFlags(u8),

    /// A version references a tag key outside the record's key catalog.
    #[error("tag key index {index} outside catalog of {len} keys")]
    TagIndex { index: u64, len: usize },

    /// A relation member carries an unknown entity type byte.
    #[error("unknown member type {0}")]
    UnknownMemberType(u8),

    /// A value does not fit the field it decodes into.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    /// A byte range lies outside the buffer it refers to.
    #[error("range {offset}+{length} exceeds buffer of {len} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        len: usize,
    },

    /// The offset index of a grid cell is inconsistent.
    #[error("corrupt cell index: {0}")]
    CorruptIndex(&'static str),

    /// Two cells with different coordinates were merged.
    #[error("cannot merge cell {left_zoom}/{left_id} with {right_zoom}/{right_id}")]
    CellMismatch {
        left_zoom: u8,
        left_id: i64,
        right_zoom: u8,
        right_id: i64,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
