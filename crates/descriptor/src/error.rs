//! Error types produced by the descriptor crate.
//!
//! Two families of failures exist at this layer:
//!
//! | Family | Variants | Meaning |
//! |--------|----------|---------|
//! | Format | everything except `NotFound` | malformed bytes, shapes, codes or hex input |
//! | NotFound | [`NotFound`](DescriptorError::NotFound) | the requested detector was never computed |
//!
//! Callers that only care about the family use [`DescriptorError::is_format`]
//! and [`DescriptorError::is_not_found`].
//!
//! ```rust
//! use descriptor::{DescriptorError, MatrixDescriptor};
//!
//! let err = MatrixDescriptor::new(2, 4, 1, vec![0u8; 7]).unwrap_err();
//! assert!(err.is_format());
//! assert!(matches!(err, DescriptorError::LengthMismatch { expected: 8, actual: 7, .. }));
//! ```
use thiserror::Error;

use crate::detector::DetectorType;

/// Errors raised while building, decoding or indexing descriptors and hashes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DescriptorError {
    /// `data.len()` does not equal `rows * cols * element_size`.
    #[error(
        "descriptor length mismatch: {rows}x{cols}x{element_size} needs {expected} bytes, got {actual}"
    )]
    LengthMismatch {
        rows: usize,
        cols: usize,
        element_size: usize,
        expected: usize,
        actual: usize,
    },

    /// A storage record carried a negative dimension.
    #[error("negative descriptor dimension {field}={value}")]
    NegativeDimension { field: &'static str, value: i32 },

    /// A dimension too large for the `i32` storage record.
    #[error("descriptor dimension {field}={value} does not fit the storage record")]
    DimensionOverflow { field: &'static str, value: usize },

    /// Element size is zero or cannot be decoded by the requested metric.
    #[error("unsupported element size {0}")]
    ElementSize(usize),

    /// Two matrices that must share a row layout do not.
    #[error("shape mismatch: model rows are {model_cols}x{model_element_size}, query rows are {query_cols}x{query_element_size}")]
    ShapeMismatch {
        model_cols: usize,
        model_element_size: usize,
        query_cols: usize,
        query_element_size: usize,
    },

    /// Hex input with an odd number of characters.
    #[error("odd-length hex string ({len} chars)")]
    OddHexLength { len: usize },

    /// Hex input containing a non-hex character.
    #[error("invalid hex character {character:?} at offset {offset}")]
    InvalidHex { character: char, offset: usize },

    /// Decoded hash bytes are not a whole number of elements.
    #[error("{len} hash bytes are not a multiple of element size {element_size}")]
    PartialElement { len: usize, element_size: usize },

    /// Unknown detector name or storage code.
    #[error("unknown detector type: {0}")]
    UnknownDetector(String),

    /// Unknown hash family name.
    #[error("unknown hash kind: {0}")]
    UnknownHashKind(String),

    /// A descriptor set was built with the same detector twice.
    #[error("duplicate descriptor for detector {0}")]
    DuplicateDetector(DetectorType),

    /// The requested detector type was never computed for the image.
    #[error("no descriptor computed for detector {0}")]
    NotFound(DetectorType),
}

impl DescriptorError {
    /// Whether this is a format failure (malformed input), as opposed to a lookup miss.
    pub fn is_format(&self) -> bool {
        !self.is_not_found()
    }

    /// Whether this is a lookup miss on a [`crate::DescriptorSet`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, DescriptorError::NotFound(_))
    }
}

impl DescriptorError {
    /// Map a `hex` decode failure on an input of `len` characters.
    pub(crate) fn from_hex(err: hex::FromHexError, len: usize) -> Self {
        match err {
            hex::FromHexError::InvalidHexCharacter { c, index } => DescriptorError::InvalidHex {
                character: c,
                offset: index,
            },
            hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => {
                DescriptorError::OddHexLength { len }
            }
        }
    }
}
