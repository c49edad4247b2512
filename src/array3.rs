//! Compressed 3D array.

use crate::codec;
use crate::error::TilepackError;
use crate::header::HEADER_BYTES;
use crate::scalar::Scalar;
use crate::store::BlockStore;

/// Compressed, randomly addressable 3D array of scalars.
///
/// Elements are grouped into 4x4x4 blocks, each compressed to a fixed
/// number of bits. Blocks are ordered (z, y, x) row-major in the payload.
/// A write-back cache of decompressed blocks backs element access.
///
/// All accessors take `&mut self` because any access may decompress into
/// the cache. Accessing an array before both a size and a rate are set
/// panics.
#[derive(Clone)]
pub struct Array3<S: Scalar> {
    store: BlockStore<S>,
}

impl<S: Scalar> Array3<S> {
    /// Create an empty array: zero extents, zero rate. Not usable until
    /// both [`resize`](Self::resize) and [`set_rate`](Self::set_rate) are
    /// called.
    pub fn new() -> Self {
        Array3 {
            store: BlockStore::new(3),
        }
    }

    /// Create an `nx * ny * nz` array of zeros compressed at `rate` bits
    /// per value.
    pub fn with_size(nx: u32, ny: u32, nz: u32, rate: f64) -> Self {
        let mut array = Array3::new();
        array.store.set_rate(rate);
        array.store.resize(nx, ny, nz);
        array.store.set_cache_size(0);
        array
    }

    /// Create an array by compressing `data` (x fastest, z slowest, length
    /// `nx * ny * nz`) at `rate` bits per value.
    pub fn from_slice(nx: u32, ny: u32, nz: u32, rate: f64, data: &[S]) -> Self {
        let mut array = Array3::with_size(nx, ny, nz, rate);
        array.set_slice(data);
        array
    }

    /// Reconstruct an array from serialized bytes (header followed by
    /// payload, as produced by [`to_bytes`](Self::to_bytes)).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TilepackError> {
        Ok(Array3 {
            store: BlockStore::deserialize(3, bytes)?,
        })
    }

    /// Compression rate in bits per value.
    pub fn rate(&self) -> f64 {
        self.store.rate()
    }

    /// Set the compression rate, returning the rate actually negotiated
    /// (rounded up to the codec's quantum of 1 bit per value in 3D).
    /// Stored contents are discarded.
    pub fn set_rate(&mut self, rate: f64) -> f64 {
        self.store.set_rate(rate)
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.store.size()
    }

    /// First (fastest-varying) extent.
    pub fn size_x(&self) -> u32 {
        self.store.nx
    }

    /// Second extent.
    pub fn size_y(&self) -> u32 {
        self.store.ny
    }

    /// Third extent.
    pub fn size_z(&self) -> u32 {
        self.store.nz
    }

    /// Resize the array. All previously stored data is lost; the new
    /// payload is zeroed. Resizing any extent to zero frees the storage.
    pub fn resize(&mut self, nx: u32, ny: u32, nz: u32) {
        self.store.resize(nx, ny, nz);
    }

    /// Empty the cache without compressing modified blocks.
    pub fn clear_cache(&mut self) {
        self.store.clear_cache();
    }

    /// Compress all modified cached blocks back to the payload.
    pub fn flush_cache(&mut self) {
        self.store.flush_cache();
    }

    /// Cache capacity in bytes.
    pub fn cache_size(&self) -> usize {
        self.store.cache_size()
    }

    /// Set the minimum cache size in bytes; zero selects the default
    /// budget. Modified blocks are flushed first.
    pub fn set_cache_size(&mut self, bytes: usize) {
        self.store.set_cache_size(bytes);
    }

    /// Compressed payload size in bytes.
    pub fn compressed_size(&self) -> usize {
        self.store.payload_bytes()
    }

    /// Compressed payload bytes. Flushes the cache first, so the image
    /// reflects every prior mutation.
    pub fn compressed_data(&mut self) -> &[u8] {
        self.store.compressed_data()
    }

    /// Header size in bytes, including padding.
    pub fn header_size(&self) -> usize {
        self.store.header_size()
    }

    /// Header bytes. Flushes the cache first.
    pub fn header_data(&mut self) -> &[u8] {
        self.store.header_data()
    }

    /// Serialized form: header followed by payload.
    pub fn to_bytes(&mut self) -> Vec<u8> {
        self.store.to_bytes()
    }

    /// Decompress the whole array into `dst`, x fastest (length must equal
    /// [`size`](Self::size)).
    pub fn get_slice(&self, dst: &mut [S]) {
        assert_eq!(dst.len(), self.size(), "destination length mismatch");
        if dst.is_empty() {
            return;
        }
        let st = &self.store;
        let payload = &st.buf.as_slice()[HEADER_BYTES..];
        let nx = st.nx as usize;
        let nxy = nx * st.ny as usize;
        let mut b = 0u32;
        for bk in 0..st.bz {
            for bj in 0..st.by {
                for bi in 0..st.bx {
                    let offset =
                        4 * bi as usize + 4 * bj as usize * nx + 4 * bk as usize * nxy;
                    let shape = st.shape_code(b);
                    if let Some(tile) = st.cache.lookup(b) {
                        codec::scatter_3(tile, dst, offset, shape, 1, nx as isize, nxy as isize);
                    } else {
                        codec::decode_strided_3(
                            payload,
                            st.block_bits,
                            b,
                            dst,
                            offset,
                            shape,
                            1,
                            nx as isize,
                            nxy as isize,
                        );
                    }
                    b += 1;
                }
            }
        }
    }

    /// Compress the whole array from `src`, x fastest (length must equal
    /// [`size`](Self::size)). Replaces all stored content and empties the
    /// cache.
    pub fn set_slice(&mut self, src: &[S]) {
        assert_eq!(src.len(), self.size(), "source length mismatch");
        if src.is_empty() {
            return;
        }
        let st = &mut self.store;
        let block_bits = st.block_bits;
        let nx = st.nx as usize;
        let nxy = nx * st.ny as usize;
        let (bx, by, bz) = (st.bx, st.by, st.bz);
        let shape = st.shape.as_deref();
        let payload = &mut st.buf.as_mut_slice()[HEADER_BYTES..];
        let mut b = 0u32;
        for bk in 0..bz {
            for bj in 0..by {
                for bi in 0..bx {
                    let offset =
                        4 * bi as usize + 4 * bj as usize * nx + 4 * bk as usize * nxy;
                    let code = shape.map_or(0, |s| s[b as usize]);
                    codec::encode_strided_3(
                        payload,
                        block_bits,
                        b,
                        src,
                        offset,
                        code,
                        1,
                        nx as isize,
                        nxy as isize,
                    );
                    b += 1;
                }
            }
        }
        st.cache.clear();
    }

    /// Read element `(i, j, k)`.
    pub fn get(&mut self, i: u32, j: u32, k: u32) -> S {
        let slot = self.line_at(i, j, k, false);
        self.store.cache.tile(slot)[Self::lane(i, j, k)]
    }

    /// Write element `(i, j, k)`.
    pub fn set(&mut self, i: u32, j: u32, k: u32, value: S) {
        let slot = self.line_at(i, j, k, true);
        self.store.cache.tile_mut(slot)[Self::lane(i, j, k)] = value;
    }

    /// Add `value` to element `(i, j, k)`.
    pub fn add(&mut self, i: u32, j: u32, k: u32, value: S) {
        self.update(i, j, k, |x| x + value);
    }

    /// Subtract `value` from element `(i, j, k)`.
    pub fn sub(&mut self, i: u32, j: u32, k: u32, value: S) {
        self.update(i, j, k, |x| x - value);
    }

    /// Multiply element `(i, j, k)` by `value`.
    pub fn mul(&mut self, i: u32, j: u32, k: u32, value: S) {
        self.update(i, j, k, |x| x * value);
    }

    /// Divide element `(i, j, k)` by `value`.
    pub fn div(&mut self, i: u32, j: u32, k: u32, value: S) {
        self.update(i, j, k, |x| x / value);
    }

    /// Write proxy for element `(i, j, k)`.
    pub fn entry(&mut self, i: u32, j: u32, k: u32) -> ElementMut<'_, S> {
        assert!(
            i < self.store.nx && j < self.store.ny && k < self.store.nz,
            "index ({}, {}, {}) out of bounds",
            i,
            j,
            k
        );
        ElementMut {
            array: self,
            i,
            j,
            k,
        }
    }

    /// Read the element at flat index `idx` (x fastest).
    pub fn get_flat(&mut self, idx: usize) -> S {
        let (i, j, k) = self.coords(idx);
        self.get(i, j, k)
    }

    /// Write the element at flat index `idx` (x fastest).
    pub fn set_flat(&mut self, idx: usize, value: S) {
        let (i, j, k) = self.coords(idx);
        self.set(i, j, k, value);
    }

    /// Write proxy for the element at flat index `idx`.
    pub fn entry_flat(&mut self, idx: usize) -> ElementMut<'_, S> {
        let (i, j, k) = self.coords(idx);
        self.entry(i, j, k)
    }

    /// Exchange elements `a` and `b`: both are read, then both written.
    pub fn swap(&mut self, a: (u32, u32, u32), b: (u32, u32, u32)) {
        let x = self.get(a.0, a.1, a.2);
        let y = self.get(b.0, b.1, b.2);
        self.set(b.0, b.1, b.2, x);
        self.set(a.0, a.1, a.2, y);
    }

    /// Iterate over `(i, j, k, value)` in block-major order: raster order
    /// within each 4x4x4 block's used extent, blocks in (z, y, x) order. A
    /// cached block serves up to 64 consecutive steps.
    pub fn iter(&mut self) -> Iter<'_, S> {
        Iter {
            array: self,
            i: 0,
            j: 0,
            k: 0,
        }
    }

    fn update(&mut self, i: u32, j: u32, k: u32, f: impl FnOnce(S) -> S) {
        let slot = self.line_at(i, j, k, true);
        let lane = Self::lane(i, j, k);
        let tile = self.store.cache.tile_mut(slot);
        tile[lane] = f(tile[lane]);
    }

    /// Fetch the cache line holding element `(i, j, k)`.
    fn line_at(&mut self, i: u32, j: u32, k: u32, write: bool) -> usize {
        assert!(
            i < self.store.nx && j < self.store.ny && k < self.store.nz,
            "index ({}, {}, {}) out of bounds",
            i,
            j,
            k
        );
        let b = i / 4 + self.store.bx * (j / 4 + self.store.by * (k / 4));
        self.store.line(b, write)
    }

    #[inline]
    fn lane(i: u32, j: u32, k: u32) -> usize {
        ((i & 3) + 4 * (j & 3) + 16 * (k & 3)) as usize
    }

    /// Convert a flat index to `(i, j, k)`.
    fn coords(&self, idx: usize) -> (u32, u32, u32) {
        let nx = self.store.nx as usize;
        let ny = self.store.ny as usize;
        (
            (idx % nx) as u32,
            (idx / nx % ny) as u32,
            (idx / nx / ny) as u32,
        )
    }
}

impl<S: Scalar> Default for Array3<S> {
    fn default() -> Self {
        Array3::new()
    }
}

/// Write proxy for a single element of an [`Array3`].
///
/// Compound assignment fuses into a single cache access.
pub struct ElementMut<'a, S: Scalar> {
    array: &'a mut Array3<S>,
    i: u32,
    j: u32,
    k: u32,
}

impl<S: Scalar> ElementMut<'_, S> {
    /// Current value of the element.
    pub fn get(&mut self) -> S {
        self.array.get(self.i, self.j, self.k)
    }

    /// Overwrite the element.
    pub fn set(&mut self, value: S) {
        self.array.set(self.i, self.j, self.k, value);
    }
}

impl<S: Scalar> std::ops::AddAssign<S> for ElementMut<'_, S> {
    fn add_assign(&mut self, value: S) {
        self.array.add(self.i, self.j, self.k, value);
    }
}

impl<S: Scalar> std::ops::SubAssign<S> for ElementMut<'_, S> {
    fn sub_assign(&mut self, value: S) {
        self.array.sub(self.i, self.j, self.k, value);
    }
}

impl<S: Scalar> std::ops::MulAssign<S> for ElementMut<'_, S> {
    fn mul_assign(&mut self, value: S) {
        self.array.mul(self.i, self.j, self.k, value);
    }
}

impl<S: Scalar> std::ops::DivAssign<S> for ElementMut<'_, S> {
    fn div_assign(&mut self, value: S) {
        self.array.div(self.i, self.j, self.k, value);
    }
}

/// Forward iterator over an [`Array3`], yielding `(i, j, k, value)` in
/// block-major order.
pub struct Iter<'a, S: Scalar> {
    array: &'a mut Array3<S>,
    i: u32,
    j: u32,
    k: u32,
}

impl<S: Scalar> Iterator for Iter<'_, S> {
    type Item = (u32, u32, u32, S);

    fn next(&mut self) -> Option<Self::Item> {
        if self.k == self.array.store.nz {
            return None;
        }
        let item = (
            self.i,
            self.j,
            self.k,
            self.array.get(self.i, self.j, self.k),
        );
        self.increment();
        Some(item)
    }
}

impl<S: Scalar> Iter<'_, S> {
    /// Advance to the next element within the current block, or to the
    /// next block once the current block's used extent is exhausted.
    fn increment(&mut self) {
        let nx = self.array.store.nx;
        let ny = self.array.store.ny;
        let nz = self.array.store.nz;
        self.i += 1;
        if self.i & 3 == 0 || self.i == nx {
            self.i = (self.i - 1) & !3;
            self.j += 1;
            if self.j & 3 == 0 || self.j == ny {
                self.j = (self.j - 1) & !3;
                self.k += 1;
                if self.k & 3 == 0 || self.k == nz {
                    self.k = (self.k - 1) & !3;
                    // done with block; advance to next
                    self.i += 4;
                    if self.i >= nx {
                        self.i = 0;
                        self.j += 4;
                        if self.j >= ny {
                            self.j = 0;
                            self.k += 4;
                            if self.k >= nz {
                                self.k = nz;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(nx: u32, ny: u32, nz: u32) -> Vec<f32> {
        let mut data = Vec::with_capacity((nx * ny * nz) as usize);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let v = (i as f32 * 0.2).sin() + (j as f32 * 0.15).cos()
                        - (k as f32 * 0.1).sin();
                    data.push(v * 4.0);
                }
            }
        }
        data
    }

    #[test]
    fn test_set_get_exact_while_cached() {
        let mut a = Array3::<f32>::with_size(20, 31, 22, 8.0);
        a.set(19, 30, 21, 6.5);
        a.set(0, 0, 0, -1.0);
        assert_eq!(a.get(19, 30, 21), 6.5);
        assert_eq!(a.get(0, 0, 0), -1.0);
    }

    #[test]
    fn test_roundtrip_partial_extents() {
        // 20 x 31 x 22: y and z leave partial blocks.
        let data = wave(20, 31, 22);
        let mut a = Array3::from_slice(20, 31, 22, 8.0, &data);

        let mut out = vec![0.0f32; data.len()];
        a.get_slice(&mut out);
        // Rate 8 in 3D leaves ~7 bits per value; tolerance is coarse.
        for (orig, dec) in data.iter().zip(out.iter()) {
            assert!((orig - dec).abs() < 0.3, "orig={}, dec={}", orig, dec);
        }
    }

    #[test]
    fn test_payload_deterministic() {
        let data = wave(20, 31, 22);
        let mut a = Array3::from_slice(20, 31, 22, 8.0, &data);
        let mut b = Array3::from_slice(20, 31, 22, 8.0, &data);
        assert_eq!(a.compressed_data(), b.compressed_data());
    }

    #[test]
    fn test_iter_visits_all_once() {
        let mut a = Array3::<f32>::with_size(5, 6, 7, 8.0);
        let visited: Vec<(u32, u32, u32)> = a.iter().map(|(i, j, k, _)| (i, j, k)).collect();
        assert_eq!(visited.len(), 5 * 6 * 7);

        let mut sorted = visited.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 5 * 6 * 7);

        // Starts raster order within the first block.
        assert_eq!(&visited[..5], &[(0, 0, 0), (1, 0, 0), (2, 0, 0), (3, 0, 0), (0, 1, 0)]);
        // First block is 4x4x4 = 64 elements.
        assert_eq!(visited[63], (3, 3, 3));
        assert_eq!(visited[64], (4, 0, 0));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let data = wave(9, 9, 9);
        let mut a = Array3::from_slice(9, 9, 9, 16.0, &data);
        let bytes = a.to_bytes();

        let mut b = Array3::<f32>::from_bytes(&bytes).unwrap();
        assert_eq!((b.size_x(), b.size_y(), b.size_z()), (9, 9, 9));

        let mut out_a = vec![0.0f32; 729];
        let mut out_b = vec![0.0f32; 729];
        a.get_slice(&mut out_a);
        b.get_slice(&mut out_b);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn test_entry_ops() {
        let mut a = Array3::<f64>::with_size(8, 8, 8, 32.0);
        a.entry(1, 2, 3).set(4.0);
        let mut e = a.entry(1, 2, 3);
        e += 1.0;
        e *= 2.0;
        assert_eq!(a.get(1, 2, 3), 10.0);
    }

    #[test]
    fn test_swap() {
        let mut a = Array3::<f32>::with_size(8, 8, 8, 16.0);
        a.set(0, 0, 0, 1.0);
        a.set(7, 7, 7, 2.0);
        a.swap((0, 0, 0), (7, 7, 7));
        assert_eq!(a.get(0, 0, 0), 2.0);
        assert_eq!(a.get(7, 7, 7), 1.0);
    }

    #[test]
    fn test_flat_access() {
        let mut a = Array3::<f32>::with_size(4, 5, 6, 16.0);
        // Flat index 87 = 3 + 4 * (1 + 5 * 4): (3, 1, 4).
        a.set_flat(87, 9.0);
        assert_eq!(a.get(3, 1, 4), 9.0);
        assert_eq!(a.get_flat(87), 9.0);
    }

    #[test]
    fn test_resize_to_zero_frees() {
        let mut a = Array3::<f32>::with_size(8, 8, 8, 8.0);
        a.resize(8, 0, 8);
        assert_eq!(a.size(), 0);
        assert_eq!(a.compressed_size(), 0);
    }
}
