//! Compressed 2D array.

use crate::codec;
use crate::error::TilepackError;
use crate::header::HEADER_BYTES;
use crate::scalar::Scalar;
use crate::store::BlockStore;

/// Compressed, randomly addressable 2D array of scalars.
///
/// Elements are grouped into 4x4 blocks, each compressed to a fixed number
/// of bits. Blocks are ordered row-major (y major, x minor) in the payload.
/// A write-back cache of decompressed blocks backs element access.
///
/// All accessors take `&mut self` because any access may decompress into
/// the cache. Accessing an array before both a size and a rate are set
/// panics.
///
/// # Example
///
/// ```
/// use tilepack::Array2;
///
/// let mut a = Array2::<f64>::with_size(100, 100, 32.0);
/// a.set(3, 4, 1.25);
/// assert!((a.get(3, 4) - 1.25).abs() < 1e-9);
/// ```
#[derive(Clone, Debug)]
pub struct Array2<S: Scalar> {
    store: BlockStore<S>,
}

impl<S: Scalar> Array2<S> {
    /// Create an empty array: zero extents, zero rate. Not usable until
    /// both [`resize`](Self::resize) and [`set_rate`](Self::set_rate) are
    /// called.
    pub fn new() -> Self {
        Array2 {
            store: BlockStore::new(2),
        }
    }

    /// Create an `nx * ny` array of zeros compressed at `rate` bits per
    /// value.
    pub fn with_size(nx: u32, ny: u32, rate: f64) -> Self {
        let mut array = Array2::new();
        array.store.set_rate(rate);
        array.store.resize(nx, ny, 0);
        array.store.set_cache_size(0);
        array
    }

    /// Create an array by compressing `data` (row-major, length `nx * ny`)
    /// at `rate` bits per value.
    pub fn from_slice(nx: u32, ny: u32, rate: f64, data: &[S]) -> Self {
        let mut array = Array2::with_size(nx, ny, rate);
        array.set_slice(data);
        array
    }

    /// Reconstruct an array from serialized bytes (header followed by
    /// payload, as produced by [`to_bytes`](Self::to_bytes)).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TilepackError> {
        Ok(Array2 {
            store: BlockStore::deserialize(2, bytes)?,
        })
    }

    /// Compression rate in bits per value.
    pub fn rate(&self) -> f64 {
        self.store.rate()
    }

    /// Set the compression rate, returning the rate actually negotiated
    /// (rounded up to the codec's quantum of 4 bits per value in 2D).
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

    /// Resize the array. All previously stored data is lost; the new
    /// payload is zeroed. Resizing any extent to zero frees the storage.
    pub fn resize(&mut self, nx: u32, ny: u32) {
        self.store.resize(nx, ny, 0);
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

    /// Decompress the whole array into `dst`, row-major (length must equal
    /// [`size`](Self::size)).
    pub fn get_slice(&self, dst: &mut [S]) {
        assert_eq!(dst.len(), self.size(), "destination length mismatch");
        if dst.is_empty() {
            return;
        }
        let st = &self.store;
        let payload = &st.buf.as_slice()[HEADER_BYTES..];
        let nx = st.nx as usize;
        let mut b = 0u32;
        for bj in 0..st.by {
            for bi in 0..st.bx {
                let offset = 4 * bi as usize + 4 * bj as usize * nx;
                let shape = st.shape_code(b);
                if let Some(tile) = st.cache.lookup(b) {
                    codec::scatter_2(tile, dst, offset, shape, 1, nx as isize);
                } else {
                    codec::decode_strided_2(
                        payload,
                        st.block_bits,
                        b,
                        dst,
                        offset,
                        shape,
                        1,
                        nx as isize,
                    );
                }
                b += 1;
            }
        }
    }

    /// Compress the whole array from `src`, row-major (length must equal
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
        let (bx, by) = (st.bx, st.by);
        let shape = st.shape.as_deref();
        let payload = &mut st.buf.as_mut_slice()[HEADER_BYTES..];
        let mut b = 0u32;
        for bj in 0..by {
            for bi in 0..bx {
                let offset = 4 * bi as usize + 4 * bj as usize * nx;
                let code = shape.map_or(0, |s| s[b as usize]);
                codec::encode_strided_2(payload, block_bits, b, src, offset, code, 1, nx as isize);
                b += 1;
            }
        }
        st.cache.clear();
    }

    /// Read element `(i, j)`.
    pub fn get(&mut self, i: u32, j: u32) -> S {
        let slot = self.line_at(i, j, false);
        self.store.cache.tile(slot)[Self::lane(i, j)]
    }

    /// Write element `(i, j)`.
    pub fn set(&mut self, i: u32, j: u32, value: S) {
        let slot = self.line_at(i, j, true);
        self.store.cache.tile_mut(slot)[Self::lane(i, j)] = value;
    }

    /// Add `value` to element `(i, j)`.
    pub fn add(&mut self, i: u32, j: u32, value: S) {
        self.update(i, j, |x| x + value);
    }

    /// Subtract `value` from element `(i, j)`.
    pub fn sub(&mut self, i: u32, j: u32, value: S) {
        self.update(i, j, |x| x - value);
    }

    /// Multiply element `(i, j)` by `value`.
    pub fn mul(&mut self, i: u32, j: u32, value: S) {
        self.update(i, j, |x| x * value);
    }

    /// Divide element `(i, j)` by `value`.
    pub fn div(&mut self, i: u32, j: u32, value: S) {
        self.update(i, j, |x| x / value);
    }

    /// Write proxy for element `(i, j)`.
    pub fn entry(&mut self, i: u32, j: u32) -> ElementMut<'_, S> {
        assert!(
            i < self.store.nx && j < self.store.ny,
            "index ({}, {}) out of bounds",
            i,
            j
        );
        ElementMut { array: self, i, j }
    }

    /// Read the element at flat (row-major) index `idx`.
    pub fn get_flat(&mut self, idx: usize) -> S {
        let (i, j) = self.coords(idx);
        self.get(i, j)
    }

    /// Write the element at flat (row-major) index `idx`.
    pub fn set_flat(&mut self, idx: usize, value: S) {
        let (i, j) = self.coords(idx);
        self.set(i, j, value);
    }

    /// Write proxy for the element at flat (row-major) index `idx`.
    pub fn entry_flat(&mut self, idx: usize) -> ElementMut<'_, S> {
        let (i, j) = self.coords(idx);
        self.entry(i, j)
    }

    /// Exchange elements `a` and `b`: both are read, then both written.
    pub fn swap(&mut self, a: (u32, u32), b: (u32, u32)) {
        let x = self.get(a.0, a.1);
        let y = self.get(b.0, b.1);
        self.set(b.0, b.1, x);
        self.set(a.0, a.1, y);
    }

    /// Iterate over `(i, j, value)` triples in block-major order: raster
    /// order within each 4x4 block's used extent, blocks row-major. A
    /// cached block serves up to 16 consecutive steps.
    pub fn iter(&mut self) -> Iter<'_, S> {
        Iter {
            array: self,
            i: 0,
            j: 0,
        }
    }

    fn update(&mut self, i: u32, j: u32, f: impl FnOnce(S) -> S) {
        let slot = self.line_at(i, j, true);
        let lane = Self::lane(i, j);
        let tile = self.store.cache.tile_mut(slot);
        tile[lane] = f(tile[lane]);
    }

    /// Fetch the cache line holding element `(i, j)`.
    fn line_at(&mut self, i: u32, j: u32, write: bool) -> usize {
        assert!(
            i < self.store.nx && j < self.store.ny,
            "index ({}, {}) out of bounds",
            i,
            j
        );
        let b = i / 4 + self.store.bx * (j / 4);
        self.store.line(b, write)
    }

    #[inline]
    fn lane(i: u32, j: u32) -> usize {
        ((i & 3) + 4 * (j & 3)) as usize
    }

    /// Convert a flat row-major index to `(i, j)`.
    fn coords(&self, idx: usize) -> (u32, u32) {
        let nx = self.store.nx as usize;
        ((idx % nx) as u32, (idx / nx) as u32)
    }
}

impl<S: Scalar> Default for Array2<S> {
    fn default() -> Self {
        Array2::new()
    }
}

/// Write proxy for a single element of an [`Array2`].
///
/// Compound assignment fuses into a single cache access.
pub struct ElementMut<'a, S: Scalar> {
    array: &'a mut Array2<S>,
    i: u32,
    j: u32,
}

impl<S: Scalar> ElementMut<'_, S> {
    /// Current value of the element.
    pub fn get(&mut self) -> S {
        self.array.get(self.i, self.j)
    }

    /// Overwrite the element.
    pub fn set(&mut self, value: S) {
        self.array.set(self.i, self.j, value);
    }
}

impl<S: Scalar> std::ops::AddAssign<S> for ElementMut<'_, S> {
    fn add_assign(&mut self, value: S) {
        self.array.add(self.i, self.j, value);
    }
}

impl<S: Scalar> std::ops::SubAssign<S> for ElementMut<'_, S> {
    fn sub_assign(&mut self, value: S) {
        self.array.sub(self.i, self.j, value);
    }
}

impl<S: Scalar> std::ops::MulAssign<S> for ElementMut<'_, S> {
    fn mul_assign(&mut self, value: S) {
        self.array.mul(self.i, self.j, value);
    }
}

impl<S: Scalar> std::ops::DivAssign<S> for ElementMut<'_, S> {
    fn div_assign(&mut self, value: S) {
        self.array.div(self.i, self.j, value);
    }
}

/// Forward iterator over an [`Array2`], yielding `(i, j, value)` in
/// block-major order.
pub struct Iter<'a, S: Scalar> {
    array: &'a mut Array2<S>,
    i: u32,
    j: u32,
}

impl<S: Scalar> Iterator for Iter<'_, S> {
    type Item = (u32, u32, S);

    fn next(&mut self) -> Option<Self::Item> {
        if self.j == self.array.store.ny {
            return None;
        }
        let item = (self.i, self.j, self.array.get(self.i, self.j));
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
        self.i += 1;
        if self.i & 3 == 0 || self.i == nx {
            self.i = (self.i - 1) & !3;
            self.j += 1;
            if self.j & 3 == 0 || self.j == ny {
                self.j = (self.j - 1) & !3;
                // done with block; advance to next
                self.i += 4;
                if self.i >= nx {
                    self.i = 0;
                    self.j += 4;
                    if self.j >= ny {
                        self.j = ny;
                    }
                }
            }
        }
    }
}
