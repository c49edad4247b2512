//! # tilepack
//!
//! Compressed, randomly addressable N-dimensional arrays of floating-point
//! scalars.
//!
//! A tilepack array looks like an ordinary mutable 1D, 2D, or 3D array of
//! `f32` or `f64`, but keeps its contents resident in RAM in compressed
//! form. Values are grouped into blocks of 4^d elements, each compressed at
//! a fixed rate into a bit-packed slot, so any block is addressable without
//! touching its neighbors. A small write-back cache of decompressed blocks
//! makes element access cheap: a cached block serves reads and writes
//! directly, and is re-compressed only when evicted or flushed.
//!
//! ## Choosing a rate
//!
//! The rate is the number of compressed bits per value. Because blocks
//! occupy whole 64-bit words, the rate is negotiated up to a quantum that
//! depends on dimensionality:
//!
//! | Dims | Values per block | Rate quantum (bits/value) |
//! |------|------------------|---------------------------|
//! | 1D   | 4                | 16                        |
//! | 2D   | 16               | 4                         |
//! | 3D   | 64               | 1                         |
//!
//! Higher rates preserve more precision; [`Array1::set_rate`] (and friends)
//! return the rate actually in effect.
//!
//! ## Quick start
//!
//! ```rust
//! use tilepack::Array2;
//!
//! // A 100 x 100 array of doubles at 32 bits per value (4x compression).
//! let mut a = Array2::<f64>::with_size(100, 100, 32.0);
//!
//! // Ordinary element access.
//! a.set(3, 4, 1.25);
//! assert!((a.get(3, 4) - 1.25).abs() < 1e-9);
//!
//! // Serialize and restore.
//! let bytes = a.to_bytes();
//! let b = Array2::<f64>::from_bytes(&bytes).unwrap();
//! assert_eq!(b.size(), 10_000);
//! ```
//!
//! ## Serialized form
//!
//! [`Array1::to_bytes`] (and friends) produce a self-describing image: a
//! 16-byte header (magic, scalar type, extents, rate) followed by the
//! compressed payload, stable byte-for-byte across platforms. A buffer of
//! unknown provenance can be probed with [`AnyArray::from_bytes`], which
//! returns whichever of the six `(dims, scalar)` variants the header
//! describes.
//!
//! ## Threading
//!
//! Arrays are single-threaded: even reads may decompress into the internal
//! cache, which is why all accessors take `&mut self`. Wrap an array in a
//! lock to share it across threads.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bitstream;
mod buffer;
mod cache;
mod codec;
mod error;
mod factory;
mod header;
mod scalar;
mod store;

pub mod array1;
pub mod array2;
pub mod array3;

pub use array1::Array1;
pub use array2::Array2;
pub use array3::Array3;
pub use error::TilepackError;
pub use factory::AnyArray;
pub use scalar::{Scalar, ScalarType};

/// Convenience type alias for Results with TilepackError.
pub type Result<T> = std::result::Result<T, TilepackError>;
