//! Compression method detection and (feature-gated) codecs.
//!
//! Containers embed compressed payloads without any format-level flag; the
//! method is discovered by peeking the first bytes of the file's region.
//! The tree/layout core never compresses or decompresses anything - it
//! only records what [`probe`] reports alongside a file's byte range so
//! callers can pick a codec.
//!
//! The actual codecs are gated behind the `compression` Cargo feature so
//! the core library compiles without them:
//!
//! ```toml
//! [dependencies]
//! arckit = { version = "0.1", features = ["compression"] }
//! ```
//!
//! ## Recognized framings
//!
//! | Tag bytes | Method | Declared size |
//! |-----------|--------|---------------|
//! | `0x10`    | LZ10 (LZSS) | u24 LE after the tag |
//! | `0x11`    | LZ11        | u24 LE after the tag (0 = u32 LE follows) |
//! | `0x24`    | Huffman, 4-bit | u24 LE after the tag |
//! | `0x28`    | Huffman, 8-bit | u24 LE after the tag |
//! | `0x30`    | RLE         | u24 LE after the tag |
//! | `"Yaz0"`  | Yaz0        | u32 BE at offset 4 |
//! | `28 B5 2F FD` | Zstandard | in the frame header (not peeked) |

#[cfg(feature = "compression")]
pub mod lz4;

#[cfg(feature = "compression")]
pub mod zstd;

/// A compression method identified from a payload's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// LZSS with the DS-family `0x10` framing.
    Lz10,
    /// Extended LZSS with the `0x11` framing.
    Lz11,
    /// Huffman coding, 4-bit symbols.
    Huffman4,
    /// Huffman coding, 8-bit symbols.
    Huffman8,
    /// Run-length encoding.
    Rle,
    /// Yaz0 (SZS) framing.
    Yaz0,
    /// Zstandard frame.
    Zstd,
}

/// What a peek at a compressed payload revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionInfo {
    /// Detected method.
    pub method: CompressionMethod,
    /// Stored (compressed) byte length, as passed by the caller.
    pub compressed_len: u64,
    /// Decompressed length declared by the framing, when it carries one.
    pub decompressed_len: Option<u64>,
}

impl CompressionMethod {
    /// Identify the method tag in `head`, if any.
    ///
    /// `head` should hold at least the first 8 bytes of the region; fewer
    /// bytes only reduce what can be recognized.
    pub fn detect(head: &[u8]) -> Option<Self> {
        if head.starts_with(b"Yaz0") {
            return Some(Self::Yaz0);
        }
        if head.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
            return Some(Self::Zstd);
        }
        match head.first() {
            Some(0x10) => Some(Self::Lz10),
            Some(0x11) => Some(Self::Lz11),
            Some(0x24) => Some(Self::Huffman4),
            Some(0x28) => Some(Self::Huffman8),
            Some(0x30) => Some(Self::Rle),
            _ => None,
        }
    }
}

/// Peek `head` and report method plus declared decompressed length.
///
/// Returns [`None`] when no known framing is recognized - the payload is
/// then taken to be stored uncompressed.
pub fn probe(head: &[u8], compressed_len: u64) -> Option<CompressionInfo> {
    let method = CompressionMethod::detect(head)?;
    let decompressed_len = match method {
        CompressionMethod::Lz10
        | CompressionMethod::Huffman4
        | CompressionMethod::Huffman8
        | CompressionMethod::Rle => u24_le(head),
        CompressionMethod::Lz11 => match u24_le(head) {
            // A zero u24 means the real size follows as a full u32.
            Some(0) => head
                .get(4..8)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64),
            other => other,
        },
        CompressionMethod::Yaz0 => head
            .get(4..8)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64),
        CompressionMethod::Zstd => None,
    };
    Some(CompressionInfo {
        method,
        compressed_len,
        decompressed_len,
    })
}

fn u24_le(head: &[u8]) -> Option<u64> {
    head.get(1..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64)
}
