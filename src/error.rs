//! Error types for array deserialization.

use thiserror::Error;

/// Errors that can occur while reconstructing an array from serialized bytes.
///
/// Deserialization (and, transitively, the factory) is the only fallible
/// entry point in the crate; every other operation on a well-formed array
/// is infallible.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TilepackError {
    /// The supplied buffer cannot hold the header, or is shorter than the
    /// header plus the payload the header describes.
    #[error("buffer too small for serialized array: {needed} bytes needed, {got} available")]
    BufferTooSmall {
        /// Number of bytes the serialized form requires.
        needed: usize,
        /// Number of bytes that were supplied.
        got: usize,
    },

    /// The framed magic/meta does not parse as a header of this family.
    #[error("invalid array header")]
    InvalidHeader,

    /// The header's scalar type disagrees with the array type being built.
    #[error("header specifies a different underlying scalar type than this array")]
    ScalarTypeMismatch,

    /// The header's extents do not have this array type's dimensionality.
    #[error("header specifies a different dimensionality than this array")]
    DimensionalityMismatch,
}
