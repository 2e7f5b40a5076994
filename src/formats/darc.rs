//! DARC - the 3DS general-purpose archive (`.darc`, `.arc`).
//!
//! Structurally the little-endian sibling of U8: the same pre-order entry
//! table with parent/subtree-end back-references, but UTF-16 names and a
//! BOM in the header. Everything except the record layout is shared with
//! [`crate::formats::u8`] through the generic core.
//!
//! ## Layout
//! ```text
//! [0x00] Magic "darc"            (4 bytes)
//! [0x04] BOM (0xFFFE = LE)       (u16 LE)
//! [0x06] HeaderSize (0x1C)       (u16)
//! [0x08] Version (0x01000000)    (u32)
//! [0x0C] FileSize                (u32)
//! [0x10] TableOffset (0x1C)      (u32)
//! [0x14] TableLength             (u32) - entries + name table
//! [0x18] DataOffset              (u32)
//! [0x1C] Entry table             (EntryCount × 12 bytes)
//! [...]  Name table              (null-terminated UTF-16, same endianness)
//! [DataOffset] File data
//! ```
//!
//! ## Entry (12 bytes)
//! ```text
//! [0x00] NameOffset (u24) | Flags (u8, 0x01 = directory)   (u32)
//! [0x04] File: absolute data offset   Dir: parent entry index
//! [0x08] File: data size              Dir: first entry index past subtree
//! ```
//! The root entry's subtree-end field is the total entry count.

use std::io::{Read, Seek, SeekFrom, Take};

use tracing::debug;

use crate::flat::FlatEntry;
use crate::flat::flatten::sibling_entries;
use crate::flat::layout::{self, AlignPolicy, FixedAlign, LayoutParams};
use crate::flat::reconstruct::sibling_tree;
use crate::names::{NameEncoding, NameTable};
use crate::tree::Tree;
use crate::utils::{bytesv, end_u16, end_u32, magic, put_le_u16, put_le_u32};
use crate::{Error, Result};

const DARC_MAGIC: &[u8; 4] = b"darc";
const HEADER_SIZE: u64 = 0x1C;
const ENTRY_SIZE: u64 = 12;
const DEFAULT_ALIGN: u64 = 4;

/// Parsed DARC archive (metadata only).
#[derive(Debug)]
pub struct Darc {
    /// The reconstructed directory tree; file ranges are absolute offsets
    /// into the stream `parse` read from.
    pub tree: Tree,
    /// Whether the archive uses little-endian encoding.
    pub le: bool,
}

impl Darc {
    /// Parse a DARC archive from `r`.
    ///
    /// `r` must be positioned at the magic.
    pub fn parse<R: Read + Seek>(r: &mut R) -> Result<Self> {
        let base = r.stream_position()?;
        magic(r, DARC_MAGIC)?;

        // BOM is written in little-endian regardless of archive order.
        let bom = end_u16(r, true)?;
        let le = match bom {
            0xFFFE => true,
            0xFEFF => false,
            _ => return Err(Error::Parse("invalid DARC BOM")),
        };
        let header_size = end_u16(r, le)?;
        if header_size as u64 != HEADER_SIZE {
            return Err(Error::Parse("unexpected DARC header size"));
        }
        let _version = end_u32(r, le)?;
        let _file_size = end_u32(r, le)?;
        let table_offset = end_u32(r, le)?;
        let table_length = end_u32(r, le)? as u64;
        let _data_offset = end_u32(r, le)?;

        r.seek(SeekFrom::Start(base + table_offset as u64))?;
        let root = read_entry(r, le, 0)?;
        let count = root.end as u64;
        if count == 0 || count * ENTRY_SIZE > table_length {
            return Err(Error::FormatViolation {
                offset: table_offset as u64,
                what: "entry count inconsistent with table length",
            });
        }
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(root);
        for index in 1..count {
            entries.push(read_entry(r, le, index)?);
        }

        let name_blob = bytesv(r, (table_length - count * ENTRY_SIZE) as usize)?;
        let encoding = if le {
            NameEncoding::Utf16Le
        } else {
            NameEncoding::Utf16Be
        };
        let names = NameTable::from_blob(name_blob, encoding);

        // Lift archive-relative data offsets to stream-absolute positions.
        for entry in entries.iter_mut().filter(|e| !e.dir) {
            entry.offset += base;
        }

        debug!(entries = count, le, "parsed DARC entry table");
        let tree = sibling_tree(&entries, &names)?;
        Ok(Self { tree, le })
    }

    /// Serialize `tree` as a little-endian DARC with the default 4-byte
    /// data alignment.
    pub fn build<R: Read + Seek>(tree: &Tree, src: &mut R) -> Result<Vec<u8>> {
        Self::build_with_policy(tree, src, &FixedAlign(DEFAULT_ALIGN))
    }

    /// Serialize `tree` with a caller-chosen alignment policy.
    ///
    /// The policy sees each file's name and the first 8 bytes of its
    /// payload; archives carrying GPU textures typically want those on a
    /// 0x80 boundary while everything else stays at 4.
    pub fn build_with_policy<R: Read + Seek>(
        tree: &Tree,
        src: &mut R,
        policy: &dyn AlignPolicy,
    ) -> Result<Vec<u8>> {
        let mut names = NameTable::new(NameEncoding::Utf16Le);
        let mut entries = sibling_entries(tree, &mut names)?;
        if entries.len() > 0xFFFFFF {
            return Err(Error::Parse("too many entries for a DARC table"));
        }

        let table_size = entries.len() as u64 * ENTRY_SIZE;
        let params = LayoutParams {
            header_size: HEADER_SIZE,
            table_size,
            name_size: names.len() as u64,
            hash_size: 0,
            data_align_floor: DEFAULT_ALIGN,
            fill: 0,
        };

        let mut files = Vec::new();
        let mut sources = Vec::new();
        for entry in entries.iter().filter(|e| !e.dir) {
            let align = policy.alignment(
                &names.get(entry.name_offset)?,
                &read_head(src, entry.offset, entry.size)?,
            );
            files.push((entry.size, align));
            sources.push((entry.offset, entry.size));
        }
        let plan = layout::plan(&params, &files)?;
        for (entry, &offset) in entries
            .iter_mut()
            .filter(|e| !e.dir)
            .zip(&plan.file_offsets)
        {
            entry.offset = offset;
        }

        let mut out = Vec::with_capacity(plan.total_size as usize);
        out.extend_from_slice(DARC_MAGIC);
        put_le_u16(&mut out, 0xFFFE)?;
        put_le_u16(&mut out, HEADER_SIZE as u16)?;
        put_le_u32(&mut out, 0x0100_0000)?;
        put_le_u32(&mut out, plan.total_size as u32)?;
        put_le_u32(&mut out, HEADER_SIZE as u32)?;
        put_le_u32(&mut out, (table_size + names.len() as u64) as u32)?;
        put_le_u32(&mut out, plan.data_offset as u32)?;
        for entry in &entries {
            write_entry(&mut out, entry)?;
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

        debug!(bytes = out.len(), "built DARC archive");
        Ok(out)
    }
}

fn read_entry<R: Read>(r: &mut R, le: bool, index: u64) -> Result<FlatEntry> {
    let name_and_flags = end_u32(r, le)?;
    let data = end_u32(r, le)?;
    let size = end_u32(r, le)?;
    let name_offset = name_and_flags & 0x00FF_FFFF;
    match name_and_flags >> 24 {
        0 => Ok(FlatEntry::new_file(name_offset, data as u64, size as u64)),
        1 => Ok(FlatEntry::new_dir(name_offset, data, size)),
        _ => Err(Error::FormatViolation {
            offset: HEADER_SIZE + index * ENTRY_SIZE,
            what: "unknown DARC entry flags",
        }),
    }
}

fn write_entry(out: &mut Vec<u8>, entry: &FlatEntry) -> Result<()> {
    let flags = if entry.dir { 1u32 } else { 0 };
    put_le_u32(out, entry.name_offset | (flags << 24))?;
    if entry.dir {
        put_le_u32(out, entry.parent)?;
        put_le_u32(out, entry.end)?;
    } else {
        put_le_u32(out, entry.offset as u32)?;
        put_le_u32(out, entry.size as u32)?;
    }
    Ok(())
}

fn read_head<R: Read + Seek>(src: &mut R, offset: u64, size: u64) -> Result<Vec<u8>> {
    let len = size.min(8);
    src.seek(SeekFrom::Start(offset))?;
    bytesv(src, len as usize)
}

/// Streaming reader wrapper over a parsed [`Darc`] archive.
pub struct DarcReader<R> {
    inner: R,
    /// Parsed metadata.
    pub archive: Darc,
}

impl<R: Read + Seek> DarcReader<R> {
    /// Parse a DARC archive and wrap the provided reader.
    pub fn new(mut reader: R) -> Result<Self> {
        let archive = Darc::parse(&mut reader)?;
        Ok(Self {
            inner: reader,
            archive,
        })
    }

    /// Open a file for streaming access by its tree index.
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
