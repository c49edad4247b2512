//! Shared storage engine behind every array variant.
//!
//! A `BlockStore` owns the array descriptor, the aligned compressed
//! buffer (header region followed by payload), the optional shape table
//! for partial boundary blocks, and the tile cache. The per-dimension
//! array types layer index math and public API over it.

use crate::buffer::AlignedBuf;
use crate::cache::BlockCache;
use crate::codec;
use crate::error::TilepackError;
use crate::header::{Header, HEADER_BYTES, MAX_EXTENT};
use crate::scalar::Scalar;

/// Descriptor, storage, and cache engine shared by all array variants.
#[derive(Clone, Debug)]
pub(crate) struct BlockStore<S: Scalar> {
    /// Array dimensionality (1, 2, or 3).
    pub dims: u32,
    /// Logical extents; unused axes are zero.
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
    /// Extents in blocks; unused axes are zero.
    pub bx: u32,
    pub by: u32,
    pub bz: u32,
    /// Total number of blocks.
    pub blocks: u32,
    /// Scalars per block (4^dims).
    pub block_vals: u32,
    /// Compressed bits per block; zero until a rate is set.
    pub block_bits: usize,
    /// Header region followed by payload; empty until allocated.
    pub buf: AlignedBuf,
    /// Per-block used-extent codes, present iff some extent is not a
    /// multiple of 4.
    pub shape: Option<Box<[u8]>>,
    /// Cache of decompressed tiles.
    pub cache: BlockCache<S>,
}

impl<S: Scalar> BlockStore<S> {
    /// Empty store for a given dimensionality: zero extents, zero rate.
    pub fn new(dims: u32) -> Self {
        let block_vals = 1u32 << (2 * dims);
        BlockStore {
            dims,
            nx: 0,
            ny: 0,
            nz: 0,
            bx: 0,
            by: 0,
            bz: 0,
            blocks: 0,
            block_vals,
            block_bits: 0,
            buf: AlignedBuf::new(),
            shape: None,
            cache: BlockCache::new(1, block_vals as usize),
        }
    }

    /// Rate in bits per value.
    pub fn rate(&self) -> f64 {
        self.block_bits as f64 / self.block_vals as f64
    }

    /// Negotiate and apply a new rate; returns the rate actually set.
    ///
    /// Changing the rate changes the payload geometry, so the storage is
    /// reallocated (and zeroed) and the cache dropped.
    pub fn set_rate(&mut self, rate: f64) -> f64 {
        self.block_bits = codec::negotiate_rate(rate, self.dims);
        tracing::debug!(
            requested = rate,
            actual = self.rate(),
            bits_per_block = self.block_bits,
            "rate negotiated"
        );
        self.alloc();
        self.rate()
    }

    /// Update extents and reallocate. Unused axes must be zero. Previously
    /// stored data is not preserved.
    pub fn resize(&mut self, nx: u32, ny: u32, nz: u32) {
        let active = [nx, ny, nz];
        if active[..self.dims as usize].iter().any(|&n| n == 0) {
            self.free();
            return;
        }
        assert!(
            nx <= MAX_EXTENT && ny <= MAX_EXTENT && nz <= MAX_EXTENT,
            "extent exceeds maximum of {}",
            MAX_EXTENT
        );
        self.nx = nx;
        self.ny = ny;
        self.nz = nz;
        self.bx = nx.div_ceil(4);
        self.by = ny.div_ceil(4);
        self.bz = nz.div_ceil(4);
        let blocks = self.bx as u64 * self.by.max(1) as u64 * self.bz.max(1) as u64;
        // The cache tag reserves a bit, so block indices must fit in 31 bits.
        assert!(blocks < (1 << 31), "array has too many blocks");
        self.blocks = blocks as u32;
        self.alloc();
        self.build_shape();
    }

    /// (Re)allocate the storage region for the current geometry: zeroed
    /// buffer, fresh header, empty cache.
    pub fn alloc(&mut self) {
        let payload = self.payload_bytes();
        if self.blocks == 0 {
            self.buf.release();
        } else {
            self.buf.resize(HEADER_BYTES + payload);
            self.write_header();
        }
        self.cache.clear();
        tracing::debug!(
            blocks = self.blocks,
            payload_bytes = payload,
            "storage allocated"
        );
    }

    /// Release storage and reset extents to zero.
    pub fn free(&mut self) {
        self.nx = 0;
        self.ny = 0;
        self.nz = 0;
        self.bx = 0;
        self.by = 0;
        self.bz = 0;
        self.blocks = 0;
        self.buf.release();
        self.shape = None;
        self.cache.clear();
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        if self.nx == 0 {
            return 0;
        }
        self.nx as usize * self.ny.max(1) as usize * self.nz.max(1) as usize
    }

    /// Payload size in bytes.
    pub fn payload_bytes(&self) -> usize {
        self.blocks as usize * (self.block_bits / 8)
    }

    /// Rebuild the shape table; `None` when every extent divides by 4.
    fn build_shape(&mut self) {
        if (self.nx | self.ny | self.nz) & 3 == 0 {
            self.shape = None;
            return;
        }
        let mut table = Vec::with_capacity(self.blocks as usize);
        for k in 0..self.bz.max(1) {
            for j in 0..self.by.max(1) {
                for i in 0..self.bx {
                    let mut code = 0u8;
                    if i == self.bx - 1 {
                        code |= (self.nx.wrapping_neg() & 3) as u8;
                    }
                    if self.dims >= 2 && j == self.by - 1 {
                        code |= ((self.ny.wrapping_neg() & 3) as u8) << 2;
                    }
                    if self.dims >= 3 && k == self.bz - 1 {
                        code |= ((self.nz.wrapping_neg() & 3) as u8) << 4;
                    }
                    table.push(code);
                }
            }
        }
        self.shape = Some(table.into_boxed_slice());
    }

    /// Shape code for a block; 0 for full blocks.
    #[inline]
    pub fn shape_code(&self, block: u32) -> u8 {
        self.shape.as_ref().map_or(0, |s| s[block as usize])
    }

    /// Write the canonical header for the current descriptor.
    fn write_header(&mut self) {
        let header = Header {
            scalar: S::TYPE,
            nx: self.nx,
            ny: self.ny,
            nz: self.nz,
            bits_per_block: self.block_bits,
        };
        header.write(&mut self.buf.as_mut_slice()[..HEADER_BYTES]);
    }

    /// Claim the cache line for `block`, writing back and fetching as
    /// needed, and return its slot.
    pub fn line(&mut self, block: u32, write: bool) -> usize {
        let (slot, prior) = self.cache.access(block, write);
        if prior.block() != Some(block) {
            let block_bits = self.block_bits;
            let payload = &mut self.buf.as_mut_slice()[HEADER_BYTES..];
            if let Some(old) = prior.block() {
                if prior.dirty() {
                    let shape = self.shape.as_ref().map_or(0, |s| s[old as usize]);
                    codec::encode_tile(payload, block_bits, old, self.cache.tile(slot), shape);
                }
            }
            codec::decode_tile(payload, block_bits, block, self.cache.tile_mut(slot));
        }
        slot
    }

    /// Compress every dirty cache line back to its slot. Lines stay
    /// resident and clean.
    pub fn flush_cache(&mut self) {
        if self.buf.len() == 0 {
            self.cache.clear();
            return;
        }
        let block_bits = self.block_bits;
        let payload = &mut self.buf.as_mut_slice()[HEADER_BYTES..];
        let shape = self.shape.as_deref();
        self.cache.flush(|block, tile| {
            let code = shape.map_or(0, |s| s[block as usize]);
            codec::encode_tile(payload, block_bits, block, tile, code);
        });
    }

    /// Drop all cached tiles without writing them back.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Cache capacity in bytes.
    pub fn cache_size(&self) -> usize {
        self.cache.lines() * self.cache.line_bytes()
    }

    /// Resize the cache to at least `bytes` (zero selects the default
    /// budget of two block rows). Dirty lines are flushed first.
    pub fn set_cache_size(&mut self, bytes: usize) {
        self.flush_cache();
        let lines = self.cache_lines(bytes);
        self.cache = BlockCache::new(lines, self.block_vals as usize);
        tracing::debug!(lines, "cache resized");
    }

    /// Line count for a byte budget, or the suggested default for zero.
    fn cache_lines(&self, bytes: usize) -> usize {
        let line_bytes = self.block_vals as usize * std::mem::size_of::<S>();
        let budget = if bytes > 0 {
            bytes
        } else {
            8 * self.nx as usize * std::mem::size_of::<S>()
        };
        (budget / line_bytes).max(1)
    }

    /// Header region bytes, including padding.
    pub fn header_size(&self) -> usize {
        HEADER_BYTES
    }

    /// Header region bytes; flushes so the image is consistent.
    pub fn header_data(&mut self) -> &[u8] {
        self.flush_cache();
        let end = HEADER_BYTES.min(self.buf.len());
        &self.buf.as_slice()[..end]
    }

    /// Payload bytes; flushes so the image reflects all prior mutations.
    pub fn compressed_data(&mut self) -> &[u8] {
        self.flush_cache();
        let start = HEADER_BYTES.min(self.buf.len());
        &self.buf.as_slice()[start..]
    }

    /// Header followed by payload, as one owned vector.
    pub fn to_bytes(&mut self) -> Vec<u8> {
        self.flush_cache();
        self.buf.as_slice().to_vec()
    }

    /// Reconstruct a store from serialized bytes (header + payload).
    ///
    /// Validates the header against this store's scalar type and `dims`,
    /// and the buffer length against the payload the header describes.
    pub fn deserialize(dims: u32, bytes: &[u8]) -> Result<Self, TilepackError> {
        let header = Header::read_for::<S>(bytes, dims)?;

        let mut store = BlockStore::<S>::new(dims);
        store.block_bits = header.bits_per_block;
        store.resize(header.nx, header.ny, header.nz);

        let needed = HEADER_BYTES + store.payload_bytes();
        if bytes.len() < needed {
            store.free();
            return Err(TilepackError::BufferTooSmall {
                needed,
                got: bytes.len(),
            });
        }

        store.buf.as_mut_slice()[HEADER_BYTES..]
            .copy_from_slice(&bytes[HEADER_BYTES..needed]);
        store.set_cache_size(0);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_2d(nx: u32, ny: u32, rate: f64) -> BlockStore<f32> {
        let mut store = BlockStore::new(2);
        store.set_rate(rate);
        store.resize(nx, ny, 0);
        store
    }

    #[test]
    fn test_geometry() {
        let store = store_2d(100, 100, 32.0);
        assert_eq!((store.bx, store.by, store.bz), (25, 25, 0));
        assert_eq!(store.blocks, 625);
        assert_eq!(store.block_bits, 512);
        assert_eq!(store.payload_bytes(), 625 * 64);
        assert_eq!(store.size(), 10_000);
        assert!(store.shape.is_none());
    }

    #[test]
    fn test_shape_table_on_partial_extents() {
        let store = store_2d(6, 9, 16.0);
        assert_eq!((store.bx, store.by), (2, 3));
        let shape = store.shape.as_ref().unwrap();
        assert_eq!(shape.len(), 6);
        // Interior block: full.
        assert_eq!(shape[0], 0);
        // Last column: 6 % 4 = 2 used of 4 on x.
        assert_eq!(shape[1], 2);
        // Last row: 9 % 4 = 1 used on y.
        assert_eq!(shape[4], 3 << 2);
        // Corner: both partial.
        assert_eq!(shape[5], 2 | (3 << 2));
    }

    #[test]
    fn test_resize_zero_frees() {
        let mut store = store_2d(8, 8, 16.0);
        store.resize(0, 8, 0);
        assert_eq!(store.size(), 0);
        assert_eq!(store.buf.len(), 0);
        assert_eq!(store.blocks, 0);
    }

    #[test]
    fn test_set_rate_negotiates_and_reallocates() {
        let mut store = BlockStore::<f32>::new(1);
        let actual = store.set_rate(10.0);
        assert_eq!(actual, 16.0);
        assert_eq!(store.set_rate(16.0), 16.0);
        store.resize(55, 0, 0);
        assert_eq!(store.payload_bytes(), 14 * 8);
    }

    #[test]
    fn test_line_writeback_on_conflict() {
        let mut store = store_2d(100, 100, 32.0);
        store.set_cache_size(1); // one line: every new block evicts

        let slot = store.line(0, true);
        store.cache.tile_mut(slot)[0] = 42.0;

        // Touching another block forces write-back of block 0.
        store.line(1, false);
        let slot = store.line(0, false);
        let got = store.cache.tile(slot)[0];
        assert!((got - 42.0).abs() < 1e-3, "got {}", got);
    }

    #[test]
    fn test_flush_then_payload_reflects_writes() {
        let mut store = store_2d(8, 8, 32.0);
        let slot = store.line(0, true);
        store.cache.tile_mut(slot)[0] = 7.0;

        assert!(store.compressed_data().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_header_matches_descriptor() {
        let mut store = store_2d(100, 100, 32.0);
        let header = Header::read(store.header_data()).unwrap();
        assert_eq!(header.nx, 100);
        assert_eq!(header.ny, 100);
        assert_eq!(header.nz, 0);
        assert_eq!(header.bits_per_block, 512);
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut store = store_2d(10, 10, 32.0);
        let slot = store.line(0, true);
        store.cache.tile_mut(slot)[5] = 3.25;

        let bytes = store.to_bytes();
        let mut copy = BlockStore::<f32>::deserialize(2, &bytes).unwrap();
        assert_eq!(copy.nx, 10);
        assert_eq!(copy.block_bits, 512);
        assert_eq!(copy.compressed_data(), store.compressed_data());
    }

    #[test]
    fn test_deserialize_too_small() {
        let mut store = store_2d(10, 10, 32.0);
        let bytes = store.to_bytes();
        let err = BlockStore::<f32>::deserialize(2, &bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, TilepackError::BufferTooSmall { .. }));

        let err = BlockStore::<f32>::deserialize(2, &bytes[..1]).unwrap_err();
        assert_eq!(
            err,
            TilepackError::BufferTooSmall {
                needed: HEADER_BYTES,
                got: 1
            }
        );
    }

    #[test]
    fn test_deserialize_type_and_dims_checks() {
        let mut store = store_2d(10, 10, 32.0);
        let bytes = store.to_bytes();

        let err = BlockStore::<f64>::deserialize(2, &bytes).unwrap_err();
        assert_eq!(err, TilepackError::ScalarTypeMismatch);

        let err = BlockStore::<f32>::deserialize(1, &bytes).unwrap_err();
        assert_eq!(err, TilepackError::DimensionalityMismatch);
    }

    #[test]
    fn test_default_cache_budget() {
        let mut store = store_2d(100, 100, 32.0);
        store.set_cache_size(0);
        // 8 * nx * sizeof(f32) / (16 * sizeof(f32)) = nx / 2 lines.
        assert_eq!(store.cache.lines(), 50);
    }
}
