//! Encoding error types.

use thiserror::Error;

use crate::encoded::EncodedTag;

/// Errors produced while encoding or decoding wire data.
///
/// A decoding error is final: the bytes cannot become valid by retrying, so
/// callers drop the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// Input ended before the announced length.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes left in the input.
        available: usize,
    },

    /// Unknown type tag.
    #[error("unknown tag: 0x{0:02x}")]
    UnknownTag(u8),

    /// Content length does not fit the fixed size of its type.
    #[error("invalid length {length} for {tag:?}")]
    InvalidLength {
        /// Type being decoded.
        tag: EncodedTag,
        /// Announced length.
        length: usize,
    },

    /// Content does not fit in a u32 length prefix.
    #[error("content too large: {0} bytes")]
    TooLarge(usize),

    /// Bytes left over after the top-level value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// Nesting exceeded [`crate::MAX_DEPTH`].
    #[error("nesting deeper than {0}")]
    DepthExceeded(usize),

    /// Boolean content other than 0 or 1.
    #[error("invalid boolean byte: 0x{0:02x}")]
    InvalidBool(u8),

    /// String content is not UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Dictionary keys are duplicated or not in canonical order.
    #[error("dictionary keys not strictly increasing")]
    UnorderedKeys,

    /// Value has a different type than the one requested.
    #[error("unexpected type: expected {expected:?}, found {found:?}")]
    UnexpectedType {
        /// Requested type.
        expected: EncodedTag,
        /// Actual type.
        found: EncodedTag,
    },

    /// List has the wrong number of elements.
    #[error("unexpected list length: expected {expected}, found {found}")]
    UnexpectedListLength {
        /// Required element count.
        expected: usize,
        /// Actual element count.
        found: usize,
    },

    /// Dictionary lacks a required key.
    #[error("missing dictionary key: {0:?}")]
    MissingKey(Vec<u8>),

    /// Integer does not fit the target type.
    #[error("integer out of range: {0}")]
    IntegerOutOfRange(u64),
}
