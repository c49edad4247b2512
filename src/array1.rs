//! Compressed 1D array.

use crate::codec;
use crate::error::TilepackError;
use crate::header::HEADER_BYTES;
use crate::scalar::Scalar;
use crate::store::BlockStore;

/// Compressed, randomly addressable 1D array of scalars.
///
/// Elements live in RAM in compressed form, grouped into blocks of 4 that
/// each occupy a fixed number of bits. A small write-back cache holds
/// recently touched blocks decompressed, so element reads and writes cost
/// one cache probe in the common case.
///
/// Because any access may decompress into the cache, all accessors take
/// `&mut self`; the array is single-threaded by construction. Accessing an
/// array before both a size and a rate are set panics.
///
/// # Example
///
/// ```
/// use tilepack::Array1;
///
/// let mut a = Array1::<f32>::with_size(55, 16.0);
/// a.set(7, 3.5);
/// assert_eq!(a.get(7), 3.5);
/// ```
#[derive(Clone, Debug)]
pub struct Array1<S: Scalar> {
    store: BlockStore<S>,
}

impl<S: Scalar> Array1<S> {
    /// Create an empty array: zero length, zero rate. Not usable until
    /// both [`resize`](Self::resize) and [`set_rate`](Self::set_rate) are
    /// called.
    pub fn new() -> Self {
        Array1 {
            store: BlockStore::new(1),
        }
    }

    /// Create an array of `nx` zeros compressed at `rate` bits per value.
    pub fn with_size(nx: u32, rate: f64) -> Self {
        let mut array = Array1::new();
        array.store.set_rate(rate);
        array.store.resize(nx, 0, 0);
        array.store.set_cache_size(0);
        array
    }

    /// Create an array by compressing `data` at `rate` bits per value.
    ///
    /// # Example
    ///
    /// ```
    /// use tilepack::Array1;
    ///
    /// let data: Vec<f64> = (0..100).map(|i| (i as f64 * 0.1).sin()).collect();
    /// let mut a = Array1::from_slice(100, 16.0, &data);
    /// assert!((a.get(42) - data[42]).abs() < 1e-3);
    /// ```
    pub fn from_slice(nx: u32, rate: f64, data: &[S]) -> Self {
        let mut array = Array1::with_size(nx, rate);
        array.set_slice(data);
        array
    }

    /// Reconstruct an array from serialized bytes (header followed by
    /// payload, as produced by [`to_bytes`](Self::to_bytes)).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TilepackError> {
        Ok(Array1 {
            store: BlockStore::deserialize(1, bytes)?,
        })
    }

    /// Compression rate in bits per value.
    pub fn rate(&self) -> f64 {
        self.store.rate()
    }

    /// Set the compression rate, returning the rate actually negotiated
    /// (rounded up to the codec's quantum of 16 bits per value in 1D).
    /// Stored contents are discarded.
    pub fn set_rate(&mut self, rate: f64) -> f64 {
        self.store.set_rate(rate)
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.store.size()
    }

    /// Array length.
    pub fn size_x(&self) -> u32 {
        self.store.nx
    }

    /// Resize the array. All previously stored data is lost; the new
    /// payload is zeroed. Resizing to zero frees the storage.
    pub fn resize(&mut self, nx: u32) {
        self.store.resize(nx, 0, 0);
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

    /// Decompress the whole array into `dst` (length must equal
    /// [`size`](Self::size)).
    pub fn get_slice(&self, dst: &mut [S]) {
        assert_eq!(dst.len(), self.size(), "destination length mismatch");
        if dst.is_empty() {
            return;
        }
        let st = &self.store;
        let payload = &st.buf.as_slice()[HEADER_BYTES..];
        for b in 0..st.blocks {
            let offset = 4 * b as usize;
            let shape = st.shape_code(b);
            if let Some(tile) = st.cache.lookup(b) {
                codec::scatter_1(tile, dst, offset, shape, 1);
            } else {
                codec::decode_strided_1(payload, st.block_bits, b, dst, offset, shape, 1);
            }
        }
    }

    /// Compress the whole array from `src` (length must equal
    /// [`size`](Self::size)). Replaces all stored content and empties the
    /// cache.
    pub fn set_slice(&mut self, src: &[S]) {
        assert_eq!(src.len(), self.size(), "source length mismatch");
        if src.is_empty() {
            return;
        }
        let st = &mut self.store;
        let block_bits = st.block_bits;
        let shape = st.shape.as_deref();
        let payload = &mut st.buf.as_mut_slice()[HEADER_BYTES..];
        for b in 0..st.blocks {
            let code = shape.map_or(0, |s| s[b as usize]);
            codec::encode_strided_1(payload, block_bits, b, src, 4 * b as usize, code, 1);
        }
        st.cache.clear();
    }

    /// Read element `i`.
    pub fn get(&mut self, i: u32) -> S {
        let slot = self.line_at(i, false);
        self.store.cache.tile(slot)[Self::lane(i)]
    }

    /// Write element `i`.
    pub fn set(&mut self, i: u32, value: S) {
        let slot = self.line_at(i, true);
        self.store.cache.tile_mut(slot)[Self::lane(i)] = value;
    }

    /// Add `value` to element `i`.
    pub fn add(&mut self, i: u32, value: S) {
        self.update(i, |x| x + value);
    }

    /// Subtract `value` from element `i`.
    pub fn sub(&mut self, i: u32, value: S) {
        self.update(i, |x| x - value);
    }

    /// Multiply element `i` by `value`.
    pub fn mul(&mut self, i: u32, value: S) {
        self.update(i, |x| x * value);
    }

    /// Divide element `i` by `value`.
    pub fn div(&mut self, i: u32, value: S) {
        self.update(i, |x| x / value);
    }

    /// Write proxy for element `i`.
    ///
    /// # Example
    ///
    /// ```
    /// use tilepack::Array1;
    ///
    /// let mut a = Array1::<f64>::with_size(10, 32.0);
    /// a.entry(3).set(2.0);
    /// let mut e = a.entry(3);
    /// e += 0.5;
    /// assert_eq!(a.get(3), 2.5);
    /// ```
    pub fn entry(&mut self, i: u32) -> ElementMut<'_, S> {
        assert!(i < self.store.nx, "index {} out of bounds", i);
        ElementMut { array: self, i }
    }

    /// Read the element at flat index `idx` (identical to `get` in 1D).
    pub fn get_flat(&mut self, idx: usize) -> S {
        self.get(idx as u32)
    }

    /// Write the element at flat index `idx`.
    pub fn set_flat(&mut self, idx: usize, value: S) {
        self.set(idx as u32, value);
    }

    /// Write proxy for the element at flat index `idx`.
    pub fn entry_flat(&mut self, idx: usize) -> ElementMut<'_, S> {
        self.entry(idx as u32)
    }

    /// Exchange elements `a` and `b`: both are read, then both written.
    pub fn swap(&mut self, a: u32, b: u32) {
        let x = self.get(a);
        let y = self.get(b);
        self.set(b, x);
        self.set(a, y);
    }

    /// Iterate over `(i, value)` pairs in storage (block-major) order,
    /// which for a 1D array is simply index order. A cached block serves
    /// up to 4 consecutive steps.
    pub fn iter(&mut self) -> Iter<'_, S> {
        Iter { array: self, i: 0 }
    }

    fn update(&mut self, i: u32, f: impl FnOnce(S) -> S) {
        let slot = self.line_at(i, true);
        let lane = Self::lane(i);
        let tile = self.store.cache.tile_mut(slot);
        tile[lane] = f(tile[lane]);
    }

    /// Fetch the cache line holding element `i`.
    fn line_at(&mut self, i: u32, write: bool) -> usize {
        assert!(i < self.store.nx, "index {} out of bounds", i);
        self.store.line(i / 4, write)
    }

    #[inline]
    fn lane(i: u32) -> usize {
        (i & 3) as usize
    }
}

impl<S: Scalar> Default for Array1<S> {
    fn default() -> Self {
        Array1::new()
    }
}

/// Write proxy for a single element of an [`Array1`].
///
/// Compound assignment fuses into a single cache access.
pub struct ElementMut<'a, S: Scalar> {
    array: &'a mut Array1<S>,
    i: u32,
}

impl<S: Scalar> ElementMut<'_, S> {
    /// Current value of the element.
    pub fn get(&mut self) -> S {
        self.array.get(self.i)
    }

    /// Overwrite the element.
    pub fn set(&mut self, value: S) {
        self.array.set(self.i, value);
    }
}

impl<S: Scalar> std::ops::AddAssign<S> for ElementMut<'_, S> {
    fn add_assign(&mut self, value: S) {
        self.array.add(self.i, value);
    }
}

impl<S: Scalar> std::ops::SubAssign<S> for ElementMut<'_, S> {
    fn sub_assign(&mut self, value: S) {
        self.array.sub(self.i, value);
    }
}

impl<S: Scalar> std::ops::MulAssign<S> for ElementMut<'_, S> {
    fn mul_assign(&mut self, value: S) {
        self.array.mul(self.i, value);
    }
}

impl<S: Scalar> std::ops::DivAssign<S> for ElementMut<'_, S> {
    fn div_assign(&mut self, value: S) {
        self.array.div(self.i, value);
    }
}

/// Forward iterator over an [`Array1`], yielding `(i, value)`.
pub struct Iter<'a, S: Scalar> {
    array: &'a mut Array1<S>,
    i: u32,
}

impl<S: Scalar> Iterator for Iter<'_, S> {
    type Item = (u32, S);

    fn next(&mut self) -> Option<Self::Item> {
        if self.i == self.array.store.nx {
            return None;
        }
        let item = (self.i, self.array.get(self.i));
        self.i += 1;
        Some(item)
    }
}
