//! U8 - the Wii/WiiU general-purpose archive (`.arc`, `.app` contents).
//!
//! The oldest of the sibling-table containers and the simplest: one
//! big-endian node table in pre-order, ASCII names, no hashing.
//!
//! ## Layout
//! ```text
//! [0x00] Magic 55 AA 38 2D          (4 bytes)
//! [0x04] RootNodeOffset (0x20)      (u32 BE)
//! [0x08] HeaderSize                 (u32 BE) - node table + name table bytes
//! [0x0C] DataOffset                 (u32 BE) - aligned to 0x40
//! [0x10] Padding (zero)             (16 bytes)
//! [0x20] Node table                 (NodeCount × 12 bytes)
//! [...]  Name table                 (null-terminated ASCII)
//! [DataOffset] File data            (each file aligned to 0x20)
//! ```
//!
//! ## Node (12 bytes)
//! ```text
//! [0x00] Type: 0 = file, 1 = directory  (u8)
//! [0x01] NameOffset                     (u24 BE, into the name table)
//! [0x04] File: absolute data offset     (u32 BE)
//!        Dir:  parent node index
//! [0x08] File: data size
//!        Dir:  index of first node past this subtree
//! ```
//! The root node's size field is therefore the total node count.

use std::io::{Read, Seek, SeekFrom, Take};

use tracing::debug;

use crate::flat::flatten::sibling_entries;
use crate::flat::layout::{self, LayoutParams};
use crate::flat::reconstruct::sibling_tree;
use crate::flat::FlatEntry;
use crate::names::{NameEncoding, NameTable};
use crate::tree::Tree;
use crate::utils::{
    be_u24, be_u32, bytesa, bytesv, magic, pad_to, put_be_u24, put_be_u32, put_u8, u8,
};
use crate::{Error, Result};

const U8_MAGIC: &[u8; 4] = b"\x55\xAA\x38\x2D";
const NODE_SIZE: u64 = 12;
const FILE_ALIGN: u64 = 0x20;
const DATA_ALIGN_FLOOR: u64 = 0x40;

/// Parsed U8 archive (metadata only).
#[derive(Debug)]
pub struct U8 {
    /// The reconstructed directory tree; file ranges are absolute offsets
    /// into the stream `parse` read from.
    pub tree: Tree,
}

impl U8 {
    /// Parse a U8 archive from `r`.
    ///
    /// `r` must be positioned at the magic. Only the tables are read; file
    /// contents stay in the stream and are addressed by the tree's byte
    /// ranges.
    pub fn parse<R: Read + Seek>(r: &mut R) -> Result<Self> {
        let base = r.stream_position()?;
        magic(r, U8_MAGIC)?;

        let root_offset = be_u32(r)?;
        let header_size = be_u32(r)? as u64;
        let _data_offset = be_u32(r)?;
        let _padding = bytesa::<16>(r)?;
        if root_offset != 0x20 {
            return Err(Error::Parse("unexpected U8 root node offset"));
        }

        // The root node's size field tells us how many nodes follow.
        r.seek(SeekFrom::Start(base + root_offset as u64))?;
        let mut entries = Vec::new();
        let root = read_node(r, 0)?;
        let count = root.end as u64;
        if count == 0 || count * NODE_SIZE > header_size {
            return Err(Error::FormatViolation {
                offset: root_offset as u64,
                what: "node count inconsistent with header size",
            });
        }
        entries.push(root);
        for index in 1..count {
            entries.push(read_node(r, index)?);
        }

        let name_blob = bytesv(r, (header_size - count * NODE_SIZE) as usize)?;
        let names = NameTable::from_blob(name_blob, NameEncoding::Utf8);

        // Data offsets are archive-relative; lift them to stream-absolute
        // so the tree's ranges work against `r` even when the archive is
        // embedded at a non-zero position.
        for entry in entries.iter_mut().filter(|e| !e.dir) {
            entry.offset += base;
        }

        debug!(nodes = count, "parsed U8 node table");
        let tree = sibling_tree(&entries, &names)?;
        Ok(Self { tree })
    }

    /// Serialize `tree` as a U8 archive, copying file bytes from `src`.
    ///
    /// File data is placed in emission order, each file aligned to 0x20
    /// and the data region itself to 0x40, with zero filler. Parsing the
    /// result reconstructs an equal tree; a parsed-then-rebuilt archive is
    /// byte-identical.
    pub fn build<R: Read + Seek>(tree: &Tree, src: &mut R) -> Result<Vec<u8>> {
        let mut names = NameTable::new(NameEncoding::Utf8);
        let mut entries = sibling_entries(tree, &mut names)?;
        if entries.len() > 0xFFFFFF {
            return Err(Error::Parse("too many nodes for a U8 table"));
        }

        let table_size = entries.len() as u64 * NODE_SIZE;
        let params = LayoutParams {
            header_size: 0x20,
            table_size,
            name_size: names.len() as u64,
            hash_size: 0,
            data_align_floor: DATA_ALIGN_FLOOR,
            fill: 0,
        };
        let files: Vec<(u64, u64)> = entries
            .iter()
            .filter(|e| !e.dir)
            .map(|e| (e.size, FILE_ALIGN))
            .collect();
        let plan = layout::plan(&params, &files)?;

        // Source ranges are still on the entries; swap in the planned
        // output offsets before writing the table.
        let sources: Vec<(u64, u64)> = entries
            .iter()
            .filter(|e| !e.dir)
            .map(|e| (e.offset, e.size))
            .collect();
        for (entry, &offset) in entries
            .iter_mut()
            .filter(|e| !e.dir)
            .zip(&plan.file_offsets)
        {
            entry.offset = offset;
        }

        let mut out = Vec::with_capacity(plan.total_size as usize);
        out.extend_from_slice(U8_MAGIC);
        put_be_u32(&mut out, 0x20)?;
        put_be_u32(&mut out, (table_size + names.len() as u64) as u32)?;
        put_be_u32(&mut out, plan.data_offset as u32)?;
        out.extend_from_slice(&[0u8; 16]);
        for entry in &entries {
            write_node(&mut out, entry)?;
        }
        out.extend_from_slice(names.blob());

        for (&(src_offset, size), &dst_offset) in sources.iter().zip(&plan.file_offsets) {
            out.resize(dst_offset as usize, params.fill);
            src.seek(SeekFrom::Start(src_offset))?;
            let mut taken = src.by_ref().take(size);
            let copied = std::io::copy(&mut taken, &mut out)?;
            if copied != size {
                return Err(Error::UnexpectedEof);
            }
        }
        pad_to(&mut out, FILE_ALIGN, params.fill);

        debug!(bytes = out.len(), "built U8 archive");
        Ok(out)
    }
}

fn read_node<R: Read>(r: &mut R, index: u64) -> Result<FlatEntry> {
    let kind = u8(r)?;
    let name_offset = be_u24(r)?;
    let data = be_u32(r)?;
    let size = be_u32(r)?;
    match kind {
        0 => Ok(FlatEntry::new_file(name_offset, data as u64, size as u64)),
        1 => Ok(FlatEntry::new_dir(name_offset, data, size)),
        _ => Err(Error::FormatViolation {
            offset: 0x20 + index * NODE_SIZE,
            what: "unknown U8 node type",
        }),
    }
}

fn write_node(out: &mut Vec<u8>, entry: &FlatEntry) -> Result<()> {
    put_u8(out, entry.dir as u8)?;
    put_be_u24(out, entry.name_offset)?;
    if entry.dir {
        put_be_u32(out, entry.parent)?;
        put_be_u32(out, entry.end)?;
    } else {
        put_be_u32(out, entry.offset as u32)?;
        put_be_u32(out, entry.size as u32)?;
    }
    Ok(())
}

/// Streaming reader wrapper over a parsed [`U8`] archive.
pub struct U8Reader<R> {
    inner: R,
    /// Parsed metadata.
    pub archive: U8,
}

impl<R: Read + Seek> U8Reader<R> {
    /// Parse a U8 archive and wrap the provided reader.
    pub fn new(mut reader: R) -> Result<Self> {
        let archive = U8::parse(&mut reader)?;
        Ok(Self {
            inner: reader,
            archive,
        })
    }

    /// Open a file for streaming access by its tree index.
    ///
    /// Seeks to the file's start and returns a [`Take`] limited to its
    /// byte range. The borrow ends when the [`Take`] is dropped.
    pub fn read_file(&mut self, file: usize) -> Result<Take<&mut R>> {
        let range = self.archive.tree.file(file).range;
        self.inner.seek(SeekFrom::Start(range.offset))?;
        Ok(self.inner.by_ref().take(range.len))
    }

    /// Open a file by `/`-separated path. Returns [`Error::InvalidRange`]
    /// if the path does not name a file.
    pub fn read_path(&mut self, path: &str) -> Result<Take<&mut R>> {
        let file = self
            .archive
            .tree
            .find_file(path)
            .ok_or(Error::InvalidRange)?;
        self.read_file(file)
    }

    /// Consume the reader, returning the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::tree::{ByteRange, ROOT};

    fn sample() -> (Tree, Vec<u8>) {
        let payload = b"0123456789abcd".to_vec();
        let mut tree = Tree::new();
        tree.add_file(ROOT, "arm9.bin", ByteRange { offset: 0, len: 10 });
        let ovl = tree.add_dir(ROOT, "ovl");
        tree.add_file(ovl, "overlay9_000", ByteRange { offset: 10, len: 4 });
        (tree, payload)
    }

    #[test]
    fn build_parse_roundtrip() {
        let (tree, payload) = sample();
        let built = U8::build(&tree, &mut Cursor::new(&payload)).unwrap();
        assert_eq!(&built[..4], U8_MAGIC);

        let parsed = U8::parse(&mut Cursor::new(&built)).unwrap();
        assert!(parsed.tree.find_file("arm9.bin").is_some());
        assert!(parsed.tree.find_file("ovl/overlay9_000").is_some());

        // Unmodified parse -> build reproduces the archive byte for byte.
        let rebuilt = U8::build(&parsed.tree, &mut Cursor::new(&built)).unwrap();
        assert_eq!(built, rebuilt);
    }

    #[test]
    fn data_is_aligned_and_reachable() {
        let (tree, payload) = sample();
        let built = U8::build(&tree, &mut Cursor::new(&payload)).unwrap();
        let mut reader = U8Reader::new(Cursor::new(&built)).unwrap();

        let range = reader.archive.tree.file(0).range;
        assert_eq!(range.offset % FILE_ALIGN, 0);

        let mut buf = String::new();
        reader.read_path("arm9.bin").unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "0123456789");
        buf.clear();
        reader
            .read_path("ovl/overlay9_000")
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, "abcd");
    }

    #[test]
    fn root_file_precedes_subdir_marker() {
        // The table must preserve the tree's enumeration: root's own files
        // come before the subdirectory markers.
        let (tree, payload) = sample();
        let built = U8::build(&tree, &mut Cursor::new(&payload)).unwrap();
        // Node 1 (offset 0x2C) is the file, node 2 (0x38) the directory.
        assert_eq!(built[0x2C], 0);
        assert_eq!(built[0x38], 1);
    }

    #[test]
    fn rejects_truncated_table() {
        let (tree, payload) = sample();
        let mut built = U8::build(&tree, &mut Cursor::new(&payload)).unwrap();
        built.truncate(0x30);
        assert!(U8::parse(&mut Cursor::new(&built)).is_err());
    }

    #[test]
    fn rejects_unknown_node_type() {
        let (tree, payload) = sample();
        let mut built = U8::build(&tree, &mut Cursor::new(&payload)).unwrap();
        built[0x2C] = 7;
        assert!(matches!(
            U8::parse(&mut Cursor::new(&built)),
            Err(Error::FormatViolation { what: "unknown U8 node type", .. })
        ));
    }
}
