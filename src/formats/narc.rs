//! NARC - the DS Nitro ARChive.
//!
//! The FNT-style representative: the hierarchy lives in a name table of
//! length-prefixed entries plus a directory meta-table, and files are
//! numbered by dense sequential id into a separate allocation table.
//!
//! ## Layout
//! ```text
//! [0x00] Magic "NARC"            (4 bytes)
//! [0x04] BOM (0xFFFE = LE)       (u16)
//! [0x06] Version (0x0100)        (u16)
//! [0x08] FileSize                (u32)
//! [0x0C] HeaderSize (0x10)       (u16)
//! [0x0E] ChunkCount (3)          (u16)
//! ```
//! followed by three chunks, each `magic (4) + size (u32)`:
//!
//! * **BTAF** - allocation table: `FileCount (u16) + reserved (u16)`,
//!   then `FileCount × (start u32, end u32)`, offsets relative to the
//!   GMIF data area.
//! * **BTNF** - the FNT region (see [`crate::flat::reconstruct`]).
//!   Nameless archives carry only the 8-byte root record, whose
//!   first-file-id low byte doubles as the empty sub-table terminator.
//! * **GMIF** - raw file data; each file starts on a 4-byte boundary and
//!   gaps are filled with 0xFF.

use std::io::{Read, Seek, SeekFrom, Take};

use tracing::debug;

use crate::flat::flatten::fnt_blob;
use crate::flat::reconstruct::fnt_tree;
use crate::tree::{ByteRange, ROOT, Tree};
use crate::utils::{align_up, bytesv, le_u16, le_u32, magic, pad_to, put_le_u16, put_le_u32};
use crate::{Error, Result};

const NARC_MAGIC: &[u8; 4] = b"NARC";
const BTAF_MAGIC: &[u8; 4] = b"BTAF";
const BTNF_MAGIC: &[u8; 4] = b"BTNF";
const GMIF_MAGIC: &[u8; 4] = b"GMIF";
const FILE_ALIGN: u64 = 4;
const DATA_FILL: u8 = 0xFF;

/// Parsed NARC archive (metadata only).
#[derive(Debug)]
pub struct Narc {
    /// The reconstructed tree; file ranges are absolute offsets into the
    /// stream `parse` read from.
    pub tree: Tree,
    /// Whether the archive carried a real name table. Nameless archives
    /// get synthetic `NNNN.bin` names on parse and are written back
    /// nameless.
    pub named: bool,
}

impl Narc {
    /// Parse a NARC archive from `r`.
    ///
    /// `r` must be positioned at the magic.
    pub fn parse<R: Read + Seek>(r: &mut R) -> Result<Self> {
        let base = r.stream_position()?;
        magic(r, NARC_MAGIC)?;
        let bom = le_u16(r)?;
        if bom != 0xFFFE {
            return Err(Error::Parse("invalid NARC BOM"));
        }
        let _version = le_u16(r)?;
        let _file_size = le_u32(r)?;
        let header_size = le_u16(r)?;
        let chunk_count = le_u16(r)?;
        if header_size != 0x10 || chunk_count != 3 {
            return Err(Error::Parse("unexpected NARC header fields"));
        }

        // BTAF: allocation table.
        magic(r, BTAF_MAGIC)?;
        let btaf_size = le_u32(r)?;
        let file_count = le_u16(r)? as usize;
        let _reserved = le_u16(r)?;
        if btaf_size as u64 != 12 + file_count as u64 * 8 {
            return Err(Error::Parse("BTAF size does not match its file count"));
        }
        let mut fat_rel = Vec::with_capacity(file_count);
        for _ in 0..file_count {
            let start = le_u32(r)?;
            let end = le_u32(r)?;
            if end < start {
                return Err(Error::InvalidRange);
            }
            fat_rel.push((start, end));
        }

        // BTNF: the FNT region.
        magic(r, BTNF_MAGIC)?;
        let btnf_size = le_u32(r)?;
        if btnf_size < 8 {
            return Err(Error::Parse("BTNF chunk too small"));
        }
        let fnt = bytesv(r, btnf_size as usize - 8)?;

        // GMIF: data area; FAT offsets are relative to its payload.
        magic(r, GMIF_MAGIC)?;
        let _gmif_size = le_u32(r)?;
        let data_base = r.stream_position()? - base;

        let fat: Vec<ByteRange> = fat_rel
            .iter()
            .map(|&(start, end)| ByteRange {
                offset: base + data_base + start as u64,
                len: (end - start) as u64,
            })
            .collect();

        let mut tree = fnt_tree(&fnt, &fat)?;
        let named = tree.file_count() == fat.len();
        if !named {
            if tree.file_count() != 0 {
                return Err(Error::Parse("partial NARC name table"));
            }
            // Nameless archive: mount the allocation table directly under
            // the root with synthetic names in id order.
            for (id, &range) in fat.iter().enumerate() {
                tree.add_file(ROOT, format!("{id:04}.bin"), range);
            }
        }

        debug!(files = fat.len(), named, "parsed NARC");
        Ok(Self { tree, named })
    }

    /// Serialize `tree` as a NARC, copying file bytes from `src`.
    ///
    /// With `named` false the BTNF shrinks to the bare root record and
    /// only the allocation table orders the files.
    pub fn build<R: Read + Seek>(tree: &Tree, src: &mut R, named: bool) -> Result<Vec<u8>> {
        let (fnt, file_order) = if named {
            let flat = fnt_blob(tree, 0)?;
            (flat.bytes, flat.file_order)
        } else {
            // Root record only: sub-table offset 4 lands on the zero low
            // byte of the first-file-id field, terminating immediately.
            let mut bytes = Vec::with_capacity(8);
            bytes.extend_from_slice(&4u32.to_le_bytes());
            bytes.extend_from_slice(&0u16.to_le_bytes());
            bytes.extend_from_slice(&1u16.to_le_bytes());
            let order = tree.walk_files().into_iter().map(|(_, f)| f).collect();
            (bytes, order)
        };
        if file_order.len() > 0xFFFF {
            return Err(Error::Parse("too many files for a NARC table"));
        }

        // Allocation table entries are relative to the GMIF payload; plan
        // them with the shared alignment rule (4-byte starts, 0xFF fill).
        let mut fat_rel = Vec::with_capacity(file_order.len());
        let mut cursor = 0u64;
        for &f in &file_order {
            let start = align_up(cursor, FILE_ALIGN);
            let len = tree.file(f).range.len;
            fat_rel.push((start as u32, (start + len) as u32));
            cursor = start + len;
        }
        let data_size = align_up(cursor, FILE_ALIGN);

        let btaf_size = 12 + file_order.len() as u32 * 8;
        let btnf_size = 8 + align_up(fnt.len() as u64, 4) as u32;
        let gmif_size = 8 + data_size as u32;
        let total = 0x10 + btaf_size + btnf_size + gmif_size;

        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(NARC_MAGIC);
        put_le_u16(&mut out, 0xFFFE)?;
        put_le_u16(&mut out, 0x0100)?;
        put_le_u32(&mut out, total)?;
        put_le_u16(&mut out, 0x10)?;
        put_le_u16(&mut out, 3)?;

        out.extend_from_slice(BTAF_MAGIC);
        put_le_u32(&mut out, btaf_size)?;
        put_le_u16(&mut out, file_order.len() as u16)?;
        put_le_u16(&mut out, 0)?;
        for &(start, end) in &fat_rel {
            put_le_u32(&mut out, start)?;
            put_le_u32(&mut out, end)?;
        }

        out.extend_from_slice(BTNF_MAGIC);
        put_le_u32(&mut out, btnf_size)?;
        out.extend_from_slice(&fnt);
        pad_to(&mut out, 4, 0);

        out.extend_from_slice(GMIF_MAGIC);
        put_le_u32(&mut out, gmif_size)?;
        let data_base = out.len() as u64;
        for (&f, &(start, _)) in file_order.iter().zip(&fat_rel) {
            out.resize((data_base + start as u64) as usize, DATA_FILL);
            let range = tree.file(f).range;
            src.seek(SeekFrom::Start(range.offset))?;
            let mut taken = src.by_ref().take(range.len);
            let copied = std::io::copy(&mut taken, &mut out)?;
            if copied != range.len {
                return Err(Error::UnexpectedEof);
            }
        }
        out.resize((data_base + data_size) as usize, DATA_FILL);

        debug!(bytes = out.len(), named, "built NARC");
        Ok(out)
    }
}

/// Streaming reader wrapper over a parsed [`Narc`] archive.
pub struct NarcReader<R> {
    inner: R,
    /// Parsed metadata.
    pub archive: Narc,
}

impl<R: Read + Seek> NarcReader<R> {
    /// Parse a NARC archive and wrap the provided reader.
    pub fn new(mut reader: R) -> Result<Self> {
        let archive = Narc::parse(&mut reader)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> (Tree, Vec<u8>) {
        let payload = b"0123456789abcd".to_vec();
        let mut tree = Tree::new();
        tree.add_file(ROOT, "arm9.bin", ByteRange { offset: 0, len: 10 });
        let ovl = tree.add_dir(ROOT, "ovl");
        tree.add_file(ovl, "overlay9_000", ByteRange { offset: 10, len: 4 });
        (tree, payload)
    }

    #[test]
    fn named_roundtrip() {
        let (tree, payload) = sample();
        let built = Narc::build(&tree, &mut Cursor::new(&payload), true).unwrap();
        let parsed = Narc::parse(&mut Cursor::new(&built)).unwrap();
        assert!(parsed.named);
        assert!(parsed.tree.find_file("ovl/overlay9_000").is_some());

        let rebuilt = Narc::build(&parsed.tree, &mut Cursor::new(&built), true).unwrap();
        assert_eq!(built, rebuilt);
    }

    #[test]
    fn nameless_roundtrip() {
        let (tree, payload) = sample();
        let built = Narc::build(&tree, &mut Cursor::new(&payload), false).unwrap();
        let parsed = Narc::parse(&mut Cursor::new(&built)).unwrap();
        assert!(!parsed.named);
        // Files surface under synthetic names in id order.
        assert!(parsed.tree.find_file("0000.bin").is_some());
        assert!(parsed.tree.find_file("0001.bin").is_some());

        let rebuilt = Narc::build(&parsed.tree, &mut Cursor::new(&built), false).unwrap();
        assert_eq!(built, rebuilt);
    }

    #[test]
    fn data_gaps_are_ff_filled() {
        let (tree, payload) = sample();
        let built = Narc::build(&tree, &mut Cursor::new(&payload), true).unwrap();
        let parsed = Narc::parse(&mut Cursor::new(&built)).unwrap();
        let arm9 = parsed.tree.find_file("arm9.bin").unwrap();
        let end = parsed.tree.file(arm9).range.end() as usize;
        // arm9.bin is 10 bytes; the next file starts on the next 4-byte
        // boundary, so exactly two filler bytes follow it.
        assert_eq!(&built[end..end + 2], &[0xFF, 0xFF]);
    }

    #[test]
    fn file_contents_are_reachable() {
        let (tree, payload) = sample();
        let built = Narc::build(&tree, &mut Cursor::new(&payload), true).unwrap();
        let mut reader = NarcReader::new(Cursor::new(&built)).unwrap();
        let mut buf = String::new();
        reader
            .read_path("ovl/overlay9_000")
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, "abcd");
    }

    #[test]
    fn rejects_inverted_fat_ranges() {
        let (tree, payload) = sample();
        let mut built = Narc::build(&tree, &mut Cursor::new(&payload), true).unwrap();
        // BTAF's first entry starts at 0x1C: make end < start.
        built[0x1C] = 0xFF;
        assert!(matches!(
            Narc::parse(&mut Cursor::new(&built)),
            Err(Error::InvalidRange)
        ));
    }
}
