//! Construction of arrays from self-describing serialized buffers.

use crate::array1::Array1;
use crate::array2::Array2;
use crate::array3::Array3;
use crate::scalar::ScalarType;

/// A compressed array of any supported dimensionality and scalar type.
///
/// Produced by [`AnyArray::from_bytes`], which probes a serialized buffer's
/// self-describing header. Match on the variant to recover the concrete
/// array.
pub enum AnyArray {
    /// 1D array of f32.
    Array1F32(Array1<f32>),
    /// 1D array of f64.
    Array1F64(Array1<f64>),
    /// 2D array of f32.
    Array2F32(Array2<f32>),
    /// 2D array of f64.
    Array2F64(Array2<f64>),
    /// 3D array of f32.
    Array3F32(Array3<f32>),
    /// 3D array of f64.
    Array3F64(Array3<f64>),
}

impl AnyArray {
    /// Try to construct each supported array variant from the buffer; the
    /// first that accepts the header wins. Returns `None` when no variant
    /// does (the header's self-description makes at most one valid).
    ///
    /// # Example
    ///
    /// ```
    /// use tilepack::{AnyArray, Array2};
    ///
    /// let mut a = Array2::<f32>::with_size(12, 9, 16.0);
    /// let restored = AnyArray::from_bytes(&a.to_bytes()).unwrap();
    /// assert_eq!(restored.dimensionality(), 2);
    ///
    /// assert!(AnyArray::from_bytes(&[0u8; 1024]).is_none());
    /// ```
    pub fn from_bytes(bytes: &[u8]) -> Option<AnyArray> {
        if let Ok(a) = Array1::<f32>::from_bytes(bytes) {
            return Some(AnyArray::Array1F32(a));
        }
        if let Ok(a) = Array1::<f64>::from_bytes(bytes) {
            return Some(AnyArray::Array1F64(a));
        }
        if let Ok(a) = Array2::<f32>::from_bytes(bytes) {
            return Some(AnyArray::Array2F32(a));
        }
        if let Ok(a) = Array2::<f64>::from_bytes(bytes) {
            return Some(AnyArray::Array2F64(a));
        }
        if let Ok(a) = Array3::<f32>::from_bytes(bytes) {
            return Some(AnyArray::Array3F32(a));
        }
        if let Ok(a) = Array3::<f64>::from_bytes(bytes) {
            return Some(AnyArray::Array3F64(a));
        }
        None
    }

    /// Dimensionality of the contained array (1, 2, or 3).
    pub fn dimensionality(&self) -> u32 {
        match self {
            AnyArray::Array1F32(_) | AnyArray::Array1F64(_) => 1,
            AnyArray::Array2F32(_) | AnyArray::Array2F64(_) => 2,
            AnyArray::Array3F32(_) | AnyArray::Array3F64(_) => 3,
        }
    }

    /// Scalar type of the contained array.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            AnyArray::Array1F32(_) | AnyArray::Array2F32(_) | AnyArray::Array3F32(_) => {
                ScalarType::F32
            }
            AnyArray::Array1F64(_) | AnyArray::Array2F64(_) | AnyArray::Array3F64(_) => {
                ScalarType::F64
            }
        }
    }

    /// First extent.
    pub fn size_x(&self) -> u32 {
        match self {
            AnyArray::Array1F32(a) => a.size_x(),
            AnyArray::Array1F64(a) => a.size_x(),
            AnyArray::Array2F32(a) => a.size_x(),
            AnyArray::Array2F64(a) => a.size_x(),
            AnyArray::Array3F32(a) => a.size_x(),
            AnyArray::Array3F64(a) => a.size_x(),
        }
    }

    /// Second extent; zero for 1D arrays.
    pub fn size_y(&self) -> u32 {
        match self {
            AnyArray::Array1F32(_) | AnyArray::Array1F64(_) => 0,
            AnyArray::Array2F32(a) => a.size_y(),
            AnyArray::Array2F64(a) => a.size_y(),
            AnyArray::Array3F32(a) => a.size_y(),
            AnyArray::Array3F64(a) => a.size_y(),
        }
    }

    /// Third extent; zero for 1D and 2D arrays.
    pub fn size_z(&self) -> u32 {
        match self {
            AnyArray::Array3F32(a) => a.size_z(),
            AnyArray::Array3F64(a) => a.size_z(),
            _ => 0,
        }
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        match self {
            AnyArray::Array1F32(a) => a.size(),
            AnyArray::Array1F64(a) => a.size(),
            AnyArray::Array2F32(a) => a.size(),
            AnyArray::Array2F64(a) => a.size(),
            AnyArray::Array3F32(a) => a.size(),
            AnyArray::Array3F64(a) => a.size(),
        }
    }

    /// Compression rate in bits per value.
    pub fn rate(&self) -> f64 {
        match self {
            AnyArray::Array1F32(a) => a.rate(),
            AnyArray::Array1F64(a) => a.rate(),
            AnyArray::Array2F32(a) => a.rate(),
            AnyArray::Array2F64(a) => a.rate(),
            AnyArray::Array3F32(a) => a.rate(),
            AnyArray::Array3F64(a) => a.rate(),
        }
    }
}
