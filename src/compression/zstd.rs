//! Zstandard codec (requires the `compression` feature).
//!
//! Zstd is the outer wrapper of modern SARC archives: a `.sarc.zs` (or
//! just `.zs`) file is a complete SARC blob compressed as a single Zstd
//! stream. Decompress the whole file first with [`decompress_zstd`], then
//! parse the result with [`crate::formats::sarc::Sarc::parse`]; compress
//! the built bytes back with [`compress_zstd`] when writing.

#![cfg(feature = "compression")]

use std::io;

use crate::{Error, Result};

/// Decompress a complete Zstandard-compressed buffer.
///
/// Returns [`Error::Zstd`] on any decompression failure.
pub fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data).map_err(|_| Error::Zstd)
}

/// Decompress a Zstandard-compressed buffer when the decompressed size is
/// known ahead of time.
///
/// Pre-allocating with `decompressed_size` avoids incremental `Vec`
/// reallocations, which matters for archives holding large asset packs.
///
/// Returns [`Error::Zstd`] if the decoder cannot be initialised, or
/// [`Error::Io`] if streaming the output fails.
pub fn decompress_zstd_with_size(data: &[u8], decompressed_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(decompressed_size);
    let mut decoder = zstd::Decoder::new(data)?;
    io::copy(&mut decoder, &mut out)?;
    Ok(out)
}

/// Compress a buffer as one Zstandard stream at the given level.
///
/// Returns [`Error::Zstd`] on any compression failure.
pub fn compress_zstd(data: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::encode_all(data, level).map_err(|_| Error::Zstd)
}
