//! LZ4 block codec (requires the `compression` feature).
//!
//! LZ4 shows up in tooling-side payloads rather than in the containers
//! themselves; data is carried in the **size-prepended block format**: a
//! little-endian `u32` giving the decompressed byte count, immediately
//! followed by the raw LZ4 block. This matches the layout produced and
//! consumed by [`lz4_flex::decompress_size_prepended`].
//!
//! For payloads actually found inside the archives handled by this
//! library (Yaz0, the DS LZ framings, `.zs` SARCs) see the method table in
//! [`crate::compression`].

#![cfg(feature = "compression")]

use crate::{Error, Result};

/// Decompress an LZ4-compressed buffer.
///
/// `data` must begin with a little-endian `u32` decompressed-size prefix
/// followed by the raw LZ4 block.
///
/// Returns [`Error::Lz4`] on any decompression failure.
pub fn decompress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data).map_err(|_| Error::Lz4)
}

/// Compress a buffer into the size-prepended LZ4 block format.
pub fn compress_lz4(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}
