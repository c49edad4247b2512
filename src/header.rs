//! Framed header describing a serialized array.
//!
//! ## Layout
//!
//! The header region is a fixed 16 bytes. Within it, the framed header
//! occupies the final 96 bits:
//!
//! - Bits 0..31: zero padding (the header is pre-padded so its last bit
//!   completes a 64-bit word, placing the payload on a word boundary).
//! - Magic (32 bits): `'t' | 'p' << 8 | 'k' << 16 | version << 24`.
//! - Meta (52 bits): scalar type (1 bit, 0 = f32), then `nx`, `ny`, `nz`
//!   as 16-bit fields (unused axes zero), then 3 padding bits.
//! - Mode short (12 bits): `bits_per_block - 1`, fixed-rate mode.

use crate::bitstream::{BitReader, BitWriter, WORD_BITS};
use crate::error::TilepackError;
use crate::scalar::{Scalar, ScalarType};

/// Bits in the framed magic field.
pub const MAGIC_BITS: usize = 32;
/// Bits in the framed metadata field.
pub const META_BITS: usize = 52;
/// Bits in the framed compression-mode field.
pub const MODE_SHORT_BITS: usize = 12;

/// Total framed header bits.
pub const HEADER_BITS: usize = MAGIC_BITS + META_BITS + MODE_SHORT_BITS;

/// Bits of padding before the framed header, chosen so the header's last
/// bit is the last bit of a word.
pub const HEADER_OFFSET_BITS: usize = WORD_BITS - (HEADER_BITS % WORD_BITS);

/// Size in bytes of the header region, including padding.
pub const HEADER_BYTES: usize = (HEADER_BITS + WORD_BITS - 1) / WORD_BITS * WORD_BITS / 8;

/// Serialization format version carried in the magic word.
const VERSION: u8 = 1;

const MAGIC: u64 =
    (b't' as u64) | ((b'p' as u64) << 8) | ((b'k' as u64) << 16) | ((VERSION as u64) << 24);

/// Largest extent the 16-bit meta fields can frame.
pub const MAX_EXTENT: u32 = (1 << 16) - 1;

/// Parsed (or to-be-written) header contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Scalar type of the stored array.
    pub scalar: ScalarType,
    /// Logical extents; unused axes are zero.
    pub nx: u32,
    /// Second extent.
    pub ny: u32,
    /// Third extent.
    pub nz: u32,
    /// Compressed bits per block.
    pub bits_per_block: usize,
}

/// Expanded fixed-rate compression parameters, as implied by the mode
/// short. All four are determined by `bits_per_block` and the scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateParams {
    /// Minimum bits per compressed block.
    pub min_bits: usize,
    /// Maximum bits per compressed block (equal to `min_bits`: fixed rate).
    pub max_bits: usize,
    /// Maximum bit planes of precision per value.
    pub max_prec: u32,
    /// Smallest block exponent before values flush to zero.
    pub min_exp: i32,
}

impl Header {
    /// Dimensionality implied by a `(nx, ny, nz)` extent triple, if the
    /// triple is well-formed (exactly the first `dims` extents non-zero).
    pub fn dims_of(nx: u32, ny: u32, nz: u32) -> Option<u32> {
        match (nx > 0, ny > 0, nz > 0) {
            (true, false, false) => Some(1),
            (true, true, false) => Some(2),
            (true, true, true) => Some(3),
            _ => None,
        }
    }

    /// Canonical fixed-rate parameters for this header's geometry.
    pub fn rate_params(&self) -> RateParams {
        RateParams {
            min_bits: self.bits_per_block,
            max_bits: self.bits_per_block,
            max_prec: match self.scalar {
                ScalarType::F32 => 32,
                ScalarType::F64 => 64,
            },
            min_exp: match self.scalar {
                ScalarType::F32 => -149,
                ScalarType::F64 => -1074,
            },
        }
    }

    /// Write the padded, framed header into a header region.
    ///
    /// `buf` must be at least [`HEADER_BYTES`] long.
    pub fn write(&self, buf: &mut [u8]) {
        let mut w = BitWriter::new(&mut buf[..HEADER_BYTES]);
        w.pad(HEADER_OFFSET_BITS);
        w.write(MAGIC, MAGIC_BITS as u32);
        let ty = match self.scalar {
            ScalarType::F32 => 0u64,
            ScalarType::F64 => 1u64,
        };
        w.write(ty, 1);
        w.write(self.nx as u64, 16);
        w.write(self.ny as u64, 16);
        w.write(self.nz as u64, 16);
        w.write(0, (META_BITS - 49) as u32);
        w.write(self.bits_per_block.saturating_sub(1) as u64, MODE_SHORT_BITS as u32);
        w.flush();
    }

    /// Parse a header region, validating magic, framing, and geometry.
    ///
    /// Fails with `InvalidHeader` when the bytes do not frame a header of
    /// this family (bad magic/version, malformed extents, or a mode short
    /// that is not a word-aligned fixed-rate geometry).
    pub fn read(buf: &[u8]) -> Result<Header, TilepackError> {
        if buf.len() < HEADER_BYTES {
            return Err(TilepackError::BufferTooSmall {
                needed: HEADER_BYTES,
                got: buf.len(),
            });
        }
        let mut r = BitReader::new(&buf[..HEADER_BYTES]);
        r.skip(HEADER_OFFSET_BITS);
        if r.read(MAGIC_BITS as u32) != MAGIC {
            return Err(TilepackError::InvalidHeader);
        }
        let scalar = if r.read(1) == 0 {
            ScalarType::F32
        } else {
            ScalarType::F64
        };
        let nx = r.read(16) as u32;
        let ny = r.read(16) as u32;
        let nz = r.read(16) as u32;
        if r.read((META_BITS - 49) as u32) != 0 {
            return Err(TilepackError::InvalidHeader);
        }
        let bits_per_block = r.read(MODE_SHORT_BITS as u32) as usize + 1;

        if Header::dims_of(nx, ny, nz).is_none() || bits_per_block % WORD_BITS != 0 {
            return Err(TilepackError::InvalidHeader);
        }
        Ok(Header {
            scalar,
            nx,
            ny,
            nz,
            bits_per_block,
        })
    }

    /// Parse and additionally verify scalar type and dimensionality against
    /// the concrete array type being deserialized.
    pub fn read_for<S: Scalar>(buf: &[u8], dims: u32) -> Result<Header, TilepackError> {
        let header = Header::read(buf)?;
        if header.scalar != S::TYPE {
            return Err(TilepackError::ScalarTypeMismatch);
        }
        let got = Header::dims_of(header.nx, header.ny, header.nz).expect("validated extents");
        if got != dims {
            return Err(TilepackError::DimensionalityMismatch);
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_constants() {
        assert_eq!(HEADER_BITS, 96);
        assert_eq!(HEADER_OFFSET_BITS, 32);
        assert_eq!(HEADER_BYTES, 16);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let header = Header {
            scalar: ScalarType::F64,
            nx: 100,
            ny: 100,
            nz: 0,
            bits_per_block: 512,
        };
        let mut buf = [0u8; HEADER_BYTES];
        header.write(&mut buf);

        let parsed = Header::read(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_padding_bits_are_zero() {
        let header = Header {
            scalar: ScalarType::F32,
            nx: 55,
            ny: 0,
            nz: 0,
            bits_per_block: 64,
        };
        let mut buf = [0xFFu8; HEADER_BYTES];
        header.write(&mut buf);
        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_zero_buffer_is_invalid() {
        let buf = [0u8; HEADER_BYTES];
        assert_eq!(Header::read(&buf), Err(TilepackError::InvalidHeader));
    }

    #[test]
    fn test_short_buffer() {
        let buf = [0u8; 1];
        assert_eq!(
            Header::read(&buf),
            Err(TilepackError::BufferTooSmall { needed: 16, got: 1 })
        );
    }

    #[test]
    fn test_scalar_type_checked() {
        let header = Header {
            scalar: ScalarType::F32,
            nx: 10,
            ny: 10,
            nz: 0,
            bits_per_block: 128,
        };
        let mut buf = [0u8; HEADER_BYTES];
        header.write(&mut buf);

        assert_eq!(
            Header::read_for::<f64>(&buf, 2),
            Err(TilepackError::ScalarTypeMismatch)
        );
        assert!(Header::read_for::<f32>(&buf, 2).is_ok());
    }

    #[test]
    fn test_dimensionality_checked() {
        let header = Header {
            scalar: ScalarType::F32,
            nx: 10,
            ny: 10,
            nz: 0,
            bits_per_block: 128,
        };
        let mut buf = [0u8; HEADER_BYTES];
        header.write(&mut buf);

        assert_eq!(
            Header::read_for::<f32>(&buf, 1),
            Err(TilepackError::DimensionalityMismatch)
        );
    }

    #[test]
    fn test_malformed_extents_rejected() {
        // ny set with nx zero cannot come from a valid array.
        let header = Header {
            scalar: ScalarType::F32,
            nx: 0,
            ny: 8,
            nz: 0,
            bits_per_block: 64,
        };
        let mut buf = [0u8; HEADER_BYTES];
        header.write(&mut buf);
        assert_eq!(Header::read(&buf), Err(TilepackError::InvalidHeader));
    }

    #[test]
    fn test_rate_params_canonical() {
        let header = Header {
            scalar: ScalarType::F32,
            nx: 55,
            ny: 0,
            nz: 0,
            bits_per_block: 64,
        };
        let params = header.rate_params();
        assert_eq!(params.min_bits, 64);
        assert_eq!(params.max_bits, 64);
        assert_eq!(params.max_prec, 32);
        assert_eq!(params.min_exp, -149);
    }
}
