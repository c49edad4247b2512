//! Fixed-rate block codec.
//!
//! Each 4^d block of scalars compresses to a slot of exactly
//! `bits_per_block` bits, enabling random access by block index.
//!
//! ## Slot format
//!
//! For `v = 4^dims` lanes at `B = bits_per_block`:
//!
//! - Common exponent (8 bits for f32, 11 for f64): the biased exponent of
//!   the largest magnitude in the block, stored as `emax + bias` with 0
//!   reserved to mean the whole block is zero.
//! - `v` lanes of `p = (B - exponent_bits) / v` bits each (capped at 56):
//!   offset-binary fixed point `q + (2^(p-1) - 1)` where
//!   `q = round(x * 2^(p - 2 - emax))` clamped to `±(2^(p-1) - 1)`.
//! - Zero padding up to exactly `B` bits.
//!
//! All quantization runs in `f64`, so the emitted bits are identical across
//! platforms and across the contiguous and strided entry points. Non-finite
//! values have no representation at a fixed rate: infinities saturate to the
//! largest lane value and NaN quantizes to zero.
//!
//! Partial boundary blocks carry a shape code (2 bits per axis, `4 - used`).
//! Unused lanes are zeroed before encoding and skipped when scattering, so a
//! full block encodes identically through either entry point.

use crate::bitstream::{BitReader, BitWriter, WORD_BITS};
use crate::header::MODE_SHORT_BITS;
use crate::scalar::Scalar;

/// Smallest negotiable slot size: one bitstream word.
pub(crate) const MIN_BLOCK_BITS: usize = WORD_BITS;

/// Largest slot size the header's mode field can frame.
pub(crate) const MAX_BLOCK_BITS: usize = 1 << MODE_SHORT_BITS;

/// Cap on bits per lane; beyond the f64 significand there is nothing left
/// to store, and the cap keeps lane arithmetic inside `i64`.
const MAX_LANE_BITS: u32 = 56;

/// Mask for extracting the exponent bits from an IEEE 754 double.
const EXP_MASK: u64 = 0x7FF0_0000_0000_0000;

/// Round a requested rate (bits per value) up to a representable slot size.
///
/// Slots are whole words, so the rate quantum is `64 / 4^dims` bits per
/// value: 16 in 1D, 4 in 2D, 1 in 3D. The result is clamped to what the
/// header can frame.
pub(crate) fn negotiate_rate(rate: f64, dims: u32) -> usize {
    let lanes = 1usize << (2 * dims);
    let want = (rate.max(0.0) * lanes as f64).ceil() as usize;
    let bits = want.div_ceil(WORD_BITS) * WORD_BITS;
    bits.clamp(MIN_BLOCK_BITS, MAX_BLOCK_BITS)
}

/// Used extents (x, y, z) encoded by a shape code; (4, 4, 4) for code 0.
#[inline]
pub(crate) fn used_extents(shape: u8) -> (usize, usize, usize) {
    (
        4 - (shape & 3) as usize,
        4 - ((shape >> 2) & 3) as usize,
        4 - ((shape >> 4) & 3) as usize,
    )
}

/// Unbiased exponent of a positive finite double.
#[inline]
fn exponent(x: f64) -> i32 {
    ((x.to_bits() & EXP_MASK) >> 52) as i32 - 1023
}

/// 2^e for e in [-1022, 1023].
#[inline]
fn pow2(e: i32) -> f64 {
    debug_assert!((-1022..=1023).contains(&e));
    f64::from_bits(((e + 1023) as u64) << 52)
}

/// x * 2^shift without intermediate overflow, for |shift| up to ~2000.
#[inline]
fn scale_by_pow2(x: f64, shift: i32) -> f64 {
    let half = shift / 2;
    x * pow2(half) * pow2(shift - half)
}

#[inline]
fn lane_bits<S: Scalar>(block_bits: usize, lanes: usize) -> u32 {
    (((block_bits - S::EXP_BITS as usize) / lanes) as u32).min(MAX_LANE_BITS)
}

#[inline]
fn lane_used(lane: usize, ux: usize, uy: usize, uz: usize) -> bool {
    (lane & 3) < ux && ((lane >> 2) & 3) < uy && ((lane >> 4) & 3) < uz
}

/// Encode one tile into slot `b` of the payload.
///
/// Writes exactly `block_bits` bits at `b * block_bits`. `tile` holds 4^d
/// scalars; lanes outside the shape code's used extent are treated as zero.
pub(crate) fn encode_tile<S: Scalar>(
    payload: &mut [u8],
    block_bits: usize,
    b: u32,
    tile: &[S],
    shape: u8,
) {
    let lanes = tile.len();
    let (ux, uy, uz) = used_extents(shape);

    let mut vals = [0.0f64; 64];
    let mut maxabs = 0.0f64;
    for (lane, val) in vals[..lanes].iter_mut().enumerate() {
        if lane_used(lane, ux, uy, uz) {
            let v = tile[lane].to_f64();
            *val = v;
            if v.is_finite() && v.abs() > maxabs {
                maxabs = v.abs();
            }
        }
    }

    let mut w = BitWriter::new(payload);
    w.wseek(b as usize * block_bits);

    if maxabs == 0.0 {
        w.pad(block_bits);
        w.flush();
        return;
    }

    let e_max = (1i32 << S::EXP_BITS) - 1;
    let e_stored = (exponent(maxabs) + S::EXP_BIAS).clamp(1, e_max);
    w.write(e_stored as u64, S::EXP_BITS);

    let p = lane_bits::<S>(block_bits, lanes);
    if p > 0 {
        let emax = e_stored - S::EXP_BIAS;
        let shift = p as i32 - 2 - emax;
        let limit = (1i64 << (p - 1)) - 1;
        for &v in &vals[..lanes] {
            let q = if v.is_nan() {
                0
            } else {
                (scale_by_pow2(v, shift).round() as i64).clamp(-limit, limit)
            };
            w.write((q + limit) as u64, p);
        }
    }

    let written = S::EXP_BITS as usize + lanes * p as usize;
    w.pad(block_bits - written);
    w.flush();
}

/// Decode slot `b` of the payload into a tile of 4^d scalars.
///
/// Unused lanes of partial blocks decode to zero (they were encoded as
/// such).
pub(crate) fn decode_tile<S: Scalar>(payload: &[u8], block_bits: usize, b: u32, tile: &mut [S]) {
    let lanes = tile.len();
    let mut r = BitReader::new(payload);
    r.rseek(b as usize * block_bits);

    let e_stored = r.read(S::EXP_BITS) as i32;
    let p = lane_bits::<S>(block_bits, lanes);
    if e_stored == 0 || p == 0 {
        tile.fill(S::default());
        return;
    }

    let emax = e_stored - S::EXP_BIAS;
    let shift = emax + 2 - p as i32;
    let limit = (1i64 << (p - 1)) - 1;
    for val in tile.iter_mut() {
        let q = r.read(p) as i64 - limit;
        *val = S::from_f64(scale_by_pow2(q as f64, shift));
    }
}

/// Gather a (possibly partial) block from a strided 1D window into a tile.
#[inline]
fn gather_1<S: Scalar>(src: &[S], offset: usize, shape: u8, sx: isize) -> [S; 4] {
    let (ux, _, _) = used_extents(shape);
    let mut tile = [S::default(); 4];
    for (x, t) in tile.iter_mut().enumerate().take(ux) {
        *t = src[(offset as isize + x as isize * sx) as usize];
    }
    tile
}

#[inline]
fn gather_2<S: Scalar>(src: &[S], offset: usize, shape: u8, sx: isize, sy: isize) -> [S; 16] {
    let (ux, uy, _) = used_extents(shape);
    let mut tile = [S::default(); 16];
    for y in 0..uy {
        for x in 0..ux {
            let idx = offset as isize + x as isize * sx + y as isize * sy;
            tile[x + 4 * y] = src[idx as usize];
        }
    }
    tile
}

#[inline]
fn gather_3<S: Scalar>(
    src: &[S],
    offset: usize,
    shape: u8,
    sx: isize,
    sy: isize,
    sz: isize,
) -> [S; 64] {
    let (ux, uy, uz) = used_extents(shape);
    let mut tile = [S::default(); 64];
    for z in 0..uz {
        for y in 0..uy {
            for x in 0..ux {
                let idx = offset as isize + x as isize * sx + y as isize * sy + z as isize * sz;
                tile[x + 4 * y + 16 * z] = src[idx as usize];
            }
        }
    }
    tile
}

/// Scatter a tile's used lanes into a strided 1D window.
#[inline]
pub(crate) fn scatter_1<S: Scalar>(tile: &[S], dst: &mut [S], offset: usize, shape: u8, sx: isize) {
    let (ux, _, _) = used_extents(shape);
    for x in 0..ux {
        dst[(offset as isize + x as isize * sx) as usize] = tile[x];
    }
}

/// Scatter a tile's used lanes into a strided 2D window.
#[inline]
pub(crate) fn scatter_2<S: Scalar>(
    tile: &[S],
    dst: &mut [S],
    offset: usize,
    shape: u8,
    sx: isize,
    sy: isize,
) {
    let (ux, uy, _) = used_extents(shape);
    for y in 0..uy {
        for x in 0..ux {
            let idx = offset as isize + x as isize * sx + y as isize * sy;
            dst[idx as usize] = tile[x + 4 * y];
        }
    }
}

/// Scatter a tile's used lanes into a strided 3D window.
#[inline]
pub(crate) fn scatter_3<S: Scalar>(
    tile: &[S],
    dst: &mut [S],
    offset: usize,
    shape: u8,
    sx: isize,
    sy: isize,
    sz: isize,
) {
    let (ux, uy, uz) = used_extents(shape);
    for z in 0..uz {
        for y in 0..uy {
            for x in 0..ux {
                let idx = offset as isize + x as isize * sx + y as isize * sy + z as isize * sz;
                dst[idx as usize] = tile[x + 4 * y + 16 * z];
            }
        }
    }
}

/// Encode a block gathered from a strided 1D window.
pub(crate) fn encode_strided_1<S: Scalar>(
    payload: &mut [u8],
    block_bits: usize,
    b: u32,
    src: &[S],
    offset: usize,
    shape: u8,
    sx: isize,
) {
    let tile = gather_1(src, offset, shape, sx);
    encode_tile(payload, block_bits, b, &tile, shape);
}

/// Encode a block gathered from a strided 2D window.
#[allow(clippy::too_many_arguments)]
pub(crate) fn encode_strided_2<S: Scalar>(
    payload: &mut [u8],
    block_bits: usize,
    b: u32,
    src: &[S],
    offset: usize,
    shape: u8,
    sx: isize,
    sy: isize,
) {
    let tile = gather_2(src, offset, shape, sx, sy);
    encode_tile(payload, block_bits, b, &tile, shape);
}

/// Encode a block gathered from a strided 3D window.
#[allow(clippy::too_many_arguments)]
pub(crate) fn encode_strided_3<S: Scalar>(
    payload: &mut [u8],
    block_bits: usize,
    b: u32,
    src: &[S],
    offset: usize,
    shape: u8,
    sx: isize,
    sy: isize,
    sz: isize,
) {
    let tile = gather_3(src, offset, shape, sx, sy, sz);
    encode_tile(payload, block_bits, b, &tile, shape);
}

/// Decode a block and scatter it into a strided 1D window.
pub(crate) fn decode_strided_1<S: Scalar>(
    payload: &[u8],
    block_bits: usize,
    b: u32,
    dst: &mut [S],
    offset: usize,
    shape: u8,
    sx: isize,
) {
    let mut tile = [S::default(); 4];
    decode_tile(payload, block_bits, b, &mut tile);
    scatter_1(&tile, dst, offset, shape, sx);
}

/// Decode a block and scatter it into a strided 2D window.
#[allow(clippy::too_many_arguments)]
pub(crate) fn decode_strided_2<S: Scalar>(
    payload: &[u8],
    block_bits: usize,
    b: u32,
    dst: &mut [S],
    offset: usize,
    shape: u8,
    sx: isize,
    sy: isize,
) {
    let mut tile = [S::default(); 16];
    decode_tile(payload, block_bits, b, &mut tile);
    scatter_2(&tile, dst, offset, shape, sx, sy);
}

/// Decode a block and scatter it into a strided 3D window.
#[allow(clippy::too_many_arguments)]
pub(crate) fn decode_strided_3<S: Scalar>(
    payload: &[u8],
    block_bits: usize,
    b: u32,
    dst: &mut [S],
    offset: usize,
    shape: u8,
    sx: isize,
    sy: isize,
    sz: isize,
) {
    let mut tile = [S::default(); 64];
    decode_tile(payload, block_bits, b, &mut tile);
    scatter_3(&tile, dst, offset, shape, sx, sy, sz);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_rate_quantum() {
        // 1D: 4 values per block, one word minimum, so 16 bpv quantum.
        assert_eq!(negotiate_rate(16.0, 1), 64);
        assert_eq!(negotiate_rate(10.0, 1), 64);
        assert_eq!(negotiate_rate(17.0, 1), 128);
        // 2D: 16 values per block.
        assert_eq!(negotiate_rate(32.0, 2), 512);
        assert_eq!(negotiate_rate(4.0, 2), 64);
        // 3D: 64 values per block.
        assert_eq!(negotiate_rate(8.0, 3), 512);
        assert_eq!(negotiate_rate(1.0, 3), 64);
        // Clamped to the header's mode range.
        assert_eq!(negotiate_rate(0.0, 1), 64);
        assert_eq!(negotiate_rate(1e9, 3), MAX_BLOCK_BITS);
    }

    #[test]
    fn test_used_extents() {
        assert_eq!(used_extents(0), (4, 4, 4));
        // nx % 4 == 3 gives code 1 on the x axis.
        assert_eq!(used_extents(1), (3, 4, 4));
        assert_eq!(used_extents(0b10_01_11), (1, 3, 2));
    }

    #[test]
    fn test_roundtrip_1d() {
        let tile = [1.25f32, -3.5, 0.0, 100.0];
        let mut payload = vec![0u8; 8];
        encode_tile(&mut payload, 64, 0, &tile, 0);

        let mut out = [0.0f32; 4];
        decode_tile(&payload, 64, 0, &mut out);
        for (orig, dec) in tile.iter().zip(out.iter()) {
            assert!((orig - dec).abs() < 0.05, "orig={}, dec={}", orig, dec);
        }
    }

    #[test]
    fn test_roundtrip_2d_f64() {
        let tile: Vec<f64> = (0..16).map(|i| (i as f64 * 0.37).sin() * 40.0).collect();
        let mut payload = vec![0u8; 64];
        encode_tile(&mut payload, 512, 0, &tile, 0);

        let mut out = [0.0f64; 16];
        decode_tile(&payload, 512, 0, &mut out);
        for (orig, dec) in tile.iter().zip(out.iter()) {
            assert!((orig - dec).abs() < 1e-6, "orig={}, dec={}", orig, dec);
        }
    }

    #[test]
    fn test_roundtrip_3d() {
        let tile: Vec<f32> = (0..64).map(|i| (i as f32 * 0.11).cos() * 5.0).collect();
        let mut payload = vec![0u8; 512];
        encode_tile(&mut payload, 4096, 0, &tile, 0);

        let mut out = [0.0f32; 64];
        decode_tile(&payload, 4096, 0, &mut out);
        for (orig, dec) in tile.iter().zip(out.iter()) {
            assert!((orig - dec).abs() < 1e-3, "orig={}, dec={}", orig, dec);
        }
    }

    #[test]
    fn test_zero_block_is_all_zero_bytes() {
        let tile = [0.0f64; 16];
        let mut payload = vec![0xFFu8; 64];
        encode_tile(&mut payload, 512, 0, &tile, 0);
        assert!(payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_deterministic_bits() {
        let tile: Vec<f32> = (0..16).map(|i| (i as f32).sqrt() * 7.0).collect();
        let mut a = vec![0u8; 128];
        let mut b = vec![0u8; 128];
        encode_tile(&mut a, 512, 1, &tile, 0);
        encode_tile(&mut b, 512, 1, &tile, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_strided_matches_contiguous_for_full_block() {
        let src: Vec<f64> = (0..64).map(|i| (i as f64 * 0.23).sin()).collect();
        // 8x8 window, block at (0, 0), unit strides.
        let mut contiguous = vec![0u8; 64];
        let mut tile = [0.0f64; 16];
        for y in 0..4 {
            for x in 0..4 {
                tile[x + 4 * y] = src[x + 8 * y];
            }
        }
        encode_tile(&mut contiguous, 512, 0, &tile, 0);

        let mut strided = vec![0u8; 64];
        encode_strided_2(&mut strided, 512, 0, &src, 0, 0, 1, 8);
        assert_eq!(contiguous, strided);
    }

    #[test]
    fn test_partial_block_roundtrip() {
        // 3-wide partial block in a 1D array of 3.
        let src = [1.0f32, 2.0, 3.0];
        let mut payload = vec![0u8; 8];
        let shape = 1u8; // 4 - 3 = 1
        encode_strided_1(&mut payload, 64, 0, &src, 0, shape, 1);

        let mut dst = [9.0f32; 3];
        decode_strided_1(&payload, 64, 0, &mut dst, 0, shape, 1);
        for (orig, dec) in src.iter().zip(dst.iter()) {
            assert!((orig - dec).abs() < 0.01, "orig={}, dec={}", orig, dec);
        }
    }

    #[test]
    fn test_slot_isolation() {
        // Writing block 1 must not disturb block 0's bytes.
        let tile0 = [5.0f32, 6.0, 7.0, 8.0];
        let tile1 = [-1.0f32, -2.0, -3.0, -4.0];
        let mut payload = vec![0u8; 16];
        encode_tile(&mut payload, 64, 0, &tile0, 0);
        let before: Vec<u8> = payload[..8].to_vec();
        encode_tile(&mut payload, 64, 1, &tile1, 0);
        assert_eq!(&payload[..8], &before[..]);

        let mut out = [0.0f32; 4];
        decode_tile(&payload, 64, 0, &mut out);
        assert!((out[0] - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_tiny_magnitudes() {
        let tile = [1e-40f64, -2e-40, 0.0, 1.5e-40];
        let mut payload = vec![0u8; 32];
        encode_tile(&mut payload, 256, 0, &tile, 0);

        let mut out = [0.0f64; 4];
        decode_tile(&payload, 256, 0, &mut out);
        for (orig, dec) in tile.iter().zip(out.iter()) {
            assert!((orig - dec).abs() < 1e-43, "orig={}, dec={}", orig, dec);
        }
    }

    #[test]
    fn test_nonfinite_values_saturate() {
        let tile = [f32::INFINITY, f32::NEG_INFINITY, f32::NAN, 1.0];
        let mut payload = vec![0u8; 8];
        encode_tile(&mut payload, 64, 0, &tile, 0);

        let mut out = [0.0f32; 4];
        decode_tile(&payload, 64, 0, &mut out);
        assert!(out.iter().all(|v| v.is_finite()));
        assert!(out[0] > 0.0);
        assert!(out[1] < 0.0);
    }
}
