//! NCCH RomFS level 3 - the hash-indexed filesystem region.
//!
//! The hardest of the container families: directories and files live in
//! two independent meta tables linked by explicit first-child /
//! next-sibling offsets, a pair of open hash tables gives O(1)-ish
//! existence checks without scanning names, and the whole serialized
//! region is protected by the IVFC cascading hash tree
//! ([`crate::hash::ivfc`]).
//!
//! Traversal never follows hash buckets - they exist only for lookup by
//! name; the sibling chains are the structure.
//!
//! ## Level header (0x28 bytes, all u32 LE)
//! ```text
//! [0x00] HeaderLength (0x28)
//! [0x04] DirHashTableOffset    [0x08] DirHashTableSize
//! [0x0C] DirMetaTableOffset    [0x10] DirMetaTableSize
//! [0x14] FileHashTableOffset   [0x18] FileHashTableSize
//! [0x1C] FileMetaTableOffset   [0x20] FileMetaTableSize
//! [0x24] FileDataOffset
//! ```
//!
//! ## Directory meta record (0x18 bytes + name)
//! ```text
//! [0x00] ParentOffset   (root points at itself, offset 0)
//! [0x04] NextSiblingOffset
//! [0x08] FirstChildDirOffset
//! [0x0C] FirstFileOffset
//! [0x10] NextInHashBucket
//! [0x14] NameLength (bytes)
//! [0x18] Name, UTF-16LE, zero-padded to a 4-byte boundary
//! ```
//!
//! ## File meta record (0x20 bytes + name)
//! ```text
//! [0x00] ParentDirOffset
//! [0x04] NextSiblingOffset
//! [0x08] DataOffset (u64, relative to FileDataOffset)
//! [0x10] DataSize   (u64)
//! [0x18] NextInHashBucket
//! [0x1C] NameLength (bytes)
//! [0x20] Name, UTF-16LE, zero-padded to a 4-byte boundary
//! ```
//! All table-internal offsets are relative to their own table;
//! 0xFFFFFFFF means "no such record".

use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::flat::NO_ENTRY;
use crate::flat::layout::{self, LayoutParams};
use crate::hash::bucket::{HashBucketIndex, name_hash};
use crate::hash::ivfc::{self, IvfcTree};
use crate::tree::{ByteRange, ROOT, Tree};
use crate::utils::align_up;
use crate::{Error, Result};

const HEADER_LEN: u32 = 0x28;
const DIR_META_FIXED: u32 = 0x18;
const FILE_META_FIXED: u32 = 0x20;
const DATA_ALIGN: u64 = 0x10;

/// Parsed RomFS level-3 region (metadata only).
#[derive(Debug)]
pub struct RomFs {
    /// The reconstructed tree; file ranges are offsets into the region
    /// passed to [`RomFs::parse`].
    pub tree: Tree,
}

/// The five table regions read out of a level header.
#[derive(Debug, Clone, Copy)]
struct Header {
    dir_hash: (u32, u32),
    dir_meta: (u32, u32),
    file_hash: (u32, u32),
    file_meta: (u32, u32),
    data: u32,
}

fn read_header(region: &[u8]) -> Result<Header> {
    if region.len() < HEADER_LEN as usize {
        return Err(Error::UnexpectedEof);
    }
    let word = |i: usize| u32::from_le_bytes(region[i * 4..i * 4 + 4].try_into().unwrap());
    let header_len = word(0);
    if header_len != HEADER_LEN {
        return Err(Error::UnsupportedVariant(header_len));
    }
    Ok(Header {
        dir_hash: (word(1), word(2)),
        dir_meta: (word(3), word(4)),
        file_hash: (word(5), word(6)),
        file_meta: (word(7), word(8)),
        data: word(9),
    })
}

fn table<'a>(region: &'a [u8], (offset, size): (u32, u32)) -> Result<&'a [u8]> {
    region
        .get(offset as usize..(offset as usize + size as usize))
        .ok_or(Error::FormatViolation {
            offset: offset as u64,
            what: "table region outside the level",
        })
}

/// Decode a length-prefixed UTF-16LE name at `at` within a meta table.
fn meta_name(meta: &[u8], at: usize, len: u32) -> Result<String> {
    if len % 2 != 0 {
        return Err(Error::FormatViolation {
            offset: at as u64,
            what: "odd name length",
        });
    }
    let bytes = meta
        .get(at..at + len as usize)
        .ok_or(Error::UnterminatedName)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|p| u16::from_le_bytes([p[0], p[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

impl RomFs {
    /// Parse a level-3 region.
    ///
    /// File ranges on the returned tree are absolute offsets into
    /// `region`, so a [`std::io::Cursor`] over the same buffer serves as
    /// the source stream for editing and rebuilding.
    pub fn parse(region: &[u8]) -> Result<Self> {
        let header = read_header(region)?;
        let dir_meta = table(region, header.dir_meta)?;
        let file_meta = table(region, header.file_meta)?;

        let mut tree = Tree::new();
        let mut visiting = vec![false; dir_meta.len()];
        walk_dir(
            dir_meta,
            file_meta,
            header.data,
            0,
            ROOT,
            &mut tree,
            &mut visiting,
        )?;
        debug!(
            dirs = tree.dir_count(),
            files = tree.file_count(),
            "parsed RomFS metadata"
        );
        Ok(Self { tree })
    }

    /// Serialize `tree` as a level-3 region, copying file bytes from
    /// `src`.
    ///
    /// Directory and file metadata are emitted in pre-order; the two hash
    /// tables are rebuilt from scratch with bucket counts sized to the
    /// entry counts. File data is aligned to 0x10 with zero filler.
    pub fn build<R: Read + Seek>(tree: &Tree, src: &mut R) -> Result<Vec<u8>> {
        // Pre-order collection; metadata offsets accumulate as records are
        // measured.
        let mut dirs = Vec::new();
        let mut dir_off = vec![NO_ENTRY; tree.dir_count()];
        let mut cursor = 0u32;
        collect_dirs(tree, ROOT, &mut dirs, &mut dir_off, &mut cursor);
        let dir_meta_size = cursor;

        let mut files = Vec::new();
        let mut file_off = vec![NO_ENTRY; tree.file_count()];
        let mut cursor = 0u32;
        for &d in &dirs {
            for &f in &tree.dir(d).files {
                file_off[f] = cursor;
                files.push(f);
                cursor += FILE_META_FIXED + align_up(utf16_len(&tree.file(f).name), 4) as u32;
            }
        }
        let file_meta_size = cursor;

        // Hash tables: heads sized to the record counts, chains written
        // into the records as they are inserted (most recent first).
        let mut dir_buckets = HashBucketIndex::new(dirs.len() as u32);
        let mut dir_hash_next = vec![NO_ENTRY; tree.dir_count()];
        for &d in &dirs {
            let parent = tree.dir(d).parent.map_or(0, |p| dir_off[p]);
            let hash = name_hash(parent, &tree.dir(d).name);
            dir_hash_next[d] = dir_buckets.insert(hash, dir_off[d]);
        }
        let mut file_buckets = HashBucketIndex::new(files.len() as u32);
        let mut file_hash_next = vec![NO_ENTRY; tree.file_count()];
        for &f in &files {
            let parent = dir_off[tree.file(f).parent];
            let hash = name_hash(parent, &tree.file(f).name);
            file_hash_next[f] = file_buckets.insert(hash, file_off[f]);
        }

        let dir_hash_size = dir_buckets.bucket_count() * 4;
        let file_hash_size = file_buckets.bucket_count() * 4;
        let params = LayoutParams {
            header_size: HEADER_LEN as u64,
            table_size: (dir_meta_size + file_meta_size) as u64,
            name_size: 0,
            hash_size: (dir_hash_size + file_hash_size) as u64,
            data_align_floor: DATA_ALIGN,
            fill: 0,
        };
        let placements: Vec<(u64, u64)> = files
            .iter()
            .map(|&f| (tree.file(f).range.len, DATA_ALIGN))
            .collect();
        let plan = layout::plan(&params, &placements)?;

        // Region order: dir hash, dir meta, file hash, file meta, data.
        let dir_hash_off = HEADER_LEN;
        let dir_meta_off = dir_hash_off + dir_hash_size;
        let file_hash_off = dir_meta_off + dir_meta_size;
        let file_meta_off = file_hash_off + file_hash_size;
        let data_off = plan.data_offset as u32;

        let mut out = Vec::with_capacity(plan.total_size as usize);
        for v in [
            HEADER_LEN,
            dir_hash_off,
            dir_hash_size,
            dir_meta_off,
            dir_meta_size,
            file_hash_off,
            file_hash_size,
            file_meta_off,
            file_meta_size,
            data_off,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }

        for &head in dir_buckets.heads() {
            out.extend_from_slice(&head.to_le_bytes());
        }
        for (i, &d) in dirs.iter().enumerate() {
            let node = tree.dir(d);
            let parent = node.parent.map_or(0, |p| dir_off[p]);
            let sibling = next_sibling(tree, node.parent, d, &dir_off);
            let child = node.dirs.first().map_or(NO_ENTRY, |&c| dir_off[c]);
            let first_file = node.files.first().map_or(NO_ENTRY, |&f| file_off[f]);
            debug_assert_eq!(out.len() as u32 - dir_meta_off, dir_off[d], "dir {i}");
            for v in [parent, sibling, child, first_file, dir_hash_next[d]] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            push_name(&mut out, &node.name);
        }

        for &head in file_buckets.heads() {
            out.extend_from_slice(&head.to_le_bytes());
        }
        for (i, (&f, &(len, _))) in files.iter().zip(&placements).enumerate() {
            let node = tree.file(f);
            let sibling = next_file_sibling(tree, node.parent, f, &file_off);
            out.extend_from_slice(&dir_off[node.parent].to_le_bytes());
            out.extend_from_slice(&sibling.to_le_bytes());
            let rel = plan.file_offsets[i] - plan.data_offset;
            out.extend_from_slice(&rel.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&file_hash_next[f].to_le_bytes());
            push_name(&mut out, &node.name);
        }

        for (&f, &offset) in files.iter().zip(&plan.file_offsets) {
            out.resize(offset as usize, 0);
            let range = tree.file(f).range;
            src.seek(SeekFrom::Start(range.offset))?;
            let mut taken = src.by_ref().take(range.len);
            let copied = std::io::copy(&mut taken, &mut out)?;
            if copied != range.len {
                return Err(Error::UnexpectedEof);
            }
        }
        // An archive with no files still declares a (then empty) data
        // region; make the buffer reach it.
        if out.len() < plan.data_offset as usize {
            out.resize(plan.data_offset as usize, 0);
        }

        debug!(bytes = out.len(), "built RomFS level 3");
        Ok(out)
    }

    /// Build the region and the IVFC tree protecting it in one step.
    pub fn build_with_ivfc<R: Read + Seek>(
        tree: &Tree,
        src: &mut R,
    ) -> Result<(Vec<u8>, IvfcTree)> {
        let region = Self::build(tree, src)?;
        let hashes = ivfc::build(&region)?;
        Ok((region, hashes))
    }

    /// Verify a region against a previously computed IVFC tree.
    ///
    /// Mismatches are reported, never repaired.
    pub fn verify(region: &[u8], hashes: &IvfcTree) -> Result<()> {
        ivfc::verify(region, hashes)
    }
}

/// Hash-table lookup of a file inside a parsed region: "does the directory
/// whose meta record sits at `dir_meta_offset` contain `name`?"
///
/// Returns the file's meta offset without touching the sibling chains or
/// the name blob of any non-colliding entry.
pub fn lookup_file(region: &[u8], dir_meta_offset: u32, name: &str) -> Result<Option<u32>> {
    let header = read_header(region)?;
    let heads = table(region, header.file_hash)?;
    let file_meta = table(region, header.file_meta)?;
    let bucket_count = heads.len() as u32 / 4;
    if bucket_count == 0 {
        return Ok(None);
    }

    let hash = name_hash(dir_meta_offset, name);
    let at = ((hash % bucket_count) * 4) as usize;
    let mut cur = u32::from_le_bytes(heads[at..at + 4].try_into().unwrap());
    let max_chain = file_meta.len() / FILE_META_FIXED as usize + 1;
    let mut steps = 0;
    while cur != NO_ENTRY {
        steps += 1;
        if steps > max_chain {
            return Err(Error::FormatViolation {
                offset: cur as u64,
                what: "hash chain cycle",
            });
        }
        let rec = file_meta
            .get(cur as usize..cur as usize + FILE_META_FIXED as usize)
            .ok_or(Error::FormatViolation {
                offset: cur as u64,
                what: "hash chain points outside the file meta table",
            })?;
        let parent = u32::from_le_bytes(rec[0..4].try_into().unwrap());
        let name_len = u32::from_le_bytes(rec[0x1C..0x20].try_into().unwrap());
        if parent == dir_meta_offset
            && meta_name(file_meta, cur as usize + FILE_META_FIXED as usize, name_len)? == name
        {
            return Ok(Some(cur));
        }
        cur = u32::from_le_bytes(rec[0x18..0x1C].try_into().unwrap());
    }
    Ok(None)
}

fn walk_dir(
    dir_meta: &[u8],
    file_meta: &[u8],
    data_off: u32,
    offset: u32,
    tree_dir: usize,
    tree: &mut Tree,
    visiting: &mut [bool],
) -> Result<()> {
    let rec = dir_meta
        .get(offset as usize..offset as usize + DIR_META_FIXED as usize)
        .ok_or(Error::FormatViolation {
            offset: offset as u64,
            what: "directory offset outside the meta table",
        })?;
    if std::mem::replace(&mut visiting[offset as usize], true) {
        return Err(Error::FormatViolation {
            offset: offset as u64,
            what: "directory metadata cycle",
        });
    }
    let word = |i: usize| u32::from_le_bytes(rec[i * 4..i * 4 + 4].try_into().unwrap());
    let first_file = word(3);

    // Files first, then subdirectories, matching emission order. The
    // iteration cap turns a corrupted sibling cycle into an error instead
    // of a hang.
    let max_files = file_meta.len() / FILE_META_FIXED as usize + 1;
    let mut seen = 0;
    let mut file = first_file;
    while file != NO_ENTRY {
        seen += 1;
        if seen > max_files {
            return Err(Error::FormatViolation {
                offset: file as u64,
                what: "file sibling chain cycle",
            });
        }
        let rec = file_meta
            .get(file as usize..file as usize + FILE_META_FIXED as usize)
            .ok_or(Error::FormatViolation {
                offset: file as u64,
                what: "file offset outside the meta table",
            })?;
        let sibling = u32::from_le_bytes(rec[4..8].try_into().unwrap());
        let data = u64::from_le_bytes(rec[8..16].try_into().unwrap());
        let size = u64::from_le_bytes(rec[16..24].try_into().unwrap());
        let name_len = u32::from_le_bytes(rec[0x1C..0x20].try_into().unwrap());
        let name = meta_name(file_meta, file as usize + FILE_META_FIXED as usize, name_len)?;
        tree.add_file(
            tree_dir,
            name,
            ByteRange {
                offset: data_off as u64 + data,
                len: size,
            },
        );
        file = sibling;
    }

    let mut child = word(2);
    while child != NO_ENTRY {
        let child_rec = dir_meta
            .get(child as usize..child as usize + DIR_META_FIXED as usize)
            .ok_or(Error::FormatViolation {
                offset: child as u64,
                what: "directory offset outside the meta table",
            })?;
        let name_len = u32::from_le_bytes(child_rec[0x14..0x18].try_into().unwrap());
        let sibling = u32::from_le_bytes(child_rec[4..8].try_into().unwrap());
        let name = meta_name(dir_meta, child as usize + DIR_META_FIXED as usize, name_len)?;
        let sub = tree.add_dir(tree_dir, name);
        walk_dir(dir_meta, file_meta, data_off, child, sub, tree, visiting)?;
        child = sibling;
    }
    Ok(())
}

fn collect_dirs(
    tree: &Tree,
    dir: usize,
    order: &mut Vec<usize>,
    offsets: &mut [u32],
    cursor: &mut u32,
) {
    offsets[dir] = *cursor;
    order.push(dir);
    *cursor += DIR_META_FIXED + align_up(utf16_len(&tree.dir(dir).name), 4) as u32;
    for &d in &tree.dir(dir).dirs {
        collect_dirs(tree, d, order, offsets, cursor);
    }
}

fn utf16_len(name: &str) -> u64 {
    name.encode_utf16().count() as u64 * 2
}

fn push_name(out: &mut Vec<u8>, name: &str) {
    let len = utf16_len(name) as u32;
    // NameLength precedes the name in both record layouts.
    out.extend_from_slice(&len.to_le_bytes());
    for unit in name.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    let padded = align_up(len as u64, 4);
    out.extend(std::iter::repeat_n(0u8, (padded - len as u64) as usize));
}

fn next_sibling(tree: &Tree, parent: Option<usize>, dir: usize, offsets: &[u32]) -> u32 {
    let Some(parent) = parent else {
        return NO_ENTRY;
    };
    let siblings = &tree.dir(parent).dirs;
    let at = siblings.iter().position(|&d| d == dir).unwrap();
    siblings.get(at + 1).map_or(NO_ENTRY, |&d| offsets[d])
}

fn next_file_sibling(tree: &Tree, parent: usize, file: usize, offsets: &[u32]) -> u32 {
    let siblings = &tree.dir(parent).files;
    let at = siblings.iter().position(|&f| f == file).unwrap();
    siblings.get(at + 1).map_or(NO_ENTRY, |&f| offsets[f])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> (Tree, Vec<u8>) {
        let payload = b"code-segment....icon-data.......savedata".to_vec();
        let mut tree = Tree::new();
        tree.add_file(ROOT, "code.bin", ByteRange { offset: 0, len: 16 });
        let sys = tree.add_dir(ROOT, "system");
        tree.add_file(sys, "icon.icn", ByteRange { offset: 16, len: 16 });
        tree.add_file(sys, "save.bin", ByteRange { offset: 32, len: 8 });
        (tree, payload)
    }

    #[test]
    fn build_parse_roundtrip() {
        let (tree, payload) = sample();
        let region = RomFs::build(&tree, &mut Cursor::new(&payload)).unwrap();
        let parsed = RomFs::parse(&region).unwrap();
        // Planning reassigned data offsets; compare structure by path and
        // size.
        let shape = |t: &Tree| -> Vec<(String, u64)> {
            t.walk_files()
                .into_iter()
                .map(|(p, f)| (p, t.file(f).range.len))
                .collect()
        };
        assert_eq!(shape(&tree), shape(&parsed.tree));

        let rebuilt = RomFs::build(&parsed.tree, &mut Cursor::new(&region)).unwrap();
        assert_eq!(region, rebuilt);
    }

    #[test]
    fn header_fields_are_consistent() {
        let (tree, payload) = sample();
        let region = RomFs::build(&tree, &mut Cursor::new(&payload)).unwrap();
        let word = |i: usize| u32::from_le_bytes(region[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(word(0), 0x28);
        // Regions tile the metadata area without gaps.
        assert_eq!(word(1), 0x28);
        assert_eq!(word(3), word(1) + word(2));
        assert_eq!(word(5), word(3) + word(4));
        assert_eq!(word(7), word(5) + word(6));
        assert_eq!(word(9) % DATA_ALIGN as u32, 0);
    }

    #[test]
    fn hash_lookup_finds_files_without_traversal() {
        let (tree, payload) = sample();
        let region = RomFs::build(&tree, &mut Cursor::new(&payload)).unwrap();

        // Root's meta record sits at offset 0; "system" is its first child.
        assert!(lookup_file(&region, 0, "code.bin").unwrap().is_some());
        assert!(lookup_file(&region, 0, "missing.bin").unwrap().is_none());

        // Find the system directory's meta offset out of the root record.
        let header = read_header(&region).unwrap();
        let dir_meta = table(&region, header.dir_meta).unwrap();
        let sys_off = u32::from_le_bytes(dir_meta[8..12].try_into().unwrap());
        assert_ne!(sys_off, NO_ENTRY);
        assert!(lookup_file(&region, sys_off, "icon.icn").unwrap().is_some());
        // Same name under the wrong parent misses: hashes are parent-scoped.
        assert!(lookup_file(&region, 0, "icon.icn").unwrap().is_none());
    }

    #[test]
    fn ivfc_protects_the_region() {
        let (tree, payload) = sample();
        let (region, hashes) =
            RomFs::build_with_ivfc(&tree, &mut Cursor::new(&payload)).unwrap();
        RomFs::verify(&region, &hashes).unwrap();

        let mut bad = region.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        assert!(matches!(
            RomFs::verify(&bad, &hashes),
            Err(Error::IntegrityMismatch { level: 1, .. })
        ));
    }

    #[test]
    fn utf16_names_roundtrip() {
        let payload = [0u8; 4];
        let mut tree = Tree::new();
        let dir = tree.add_dir(ROOT, "データ");
        tree.add_file(dir, "セーブ.bin", ByteRange { offset: 0, len: 4 });
        let region = RomFs::build(&tree, &mut Cursor::new(&payload[..])).unwrap();
        let parsed = RomFs::parse(&region).unwrap();
        assert!(parsed.tree.find_file("データ/セーブ.bin").is_some());
    }

    #[test]
    fn unknown_header_length_is_surfaced() {
        let (tree, payload) = sample();
        let mut region = RomFs::build(&tree, &mut Cursor::new(&payload)).unwrap();
        region[0] = 0x2C;
        assert!(matches!(
            RomFs::parse(&region),
            Err(Error::UnsupportedVariant(0x2C))
        ));
    }
}
