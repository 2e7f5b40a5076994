//! Tree reconstruction: flat entry tables back into an editable tree.
//!
//! Two reconstruction algorithms, one per table style (see the module docs
//! of [`crate::flat`]). Both are single forward passes; neither touches
//! file content.

use crate::names::NameTable;
use crate::tree::{ByteRange, ROOT, Tree};
use crate::{Error, Result};

use super::FlatEntry;

/// Accumulator threaded through the sibling-table scan.
///
/// Kept explicit (rather than loop-local mutable state) so a single step is
/// a pure function of the previous state and the next entry.
struct Scan {
    tree: Tree,
    /// Open directory scopes as `(subtree end, tree dir index)`. The root
    /// scope spans the whole table and is never popped.
    scopes: Vec<(u32, usize)>,
    /// Tree dir index for each directory entry seen so far, keyed by entry
    /// index.
    dir_of_entry: Vec<Option<usize>>,
}

/// Rebuild a tree from a sibling-style entry table (U8, DARC, GC FST).
///
/// Entry 0 must be the root directory and its `end` must span the whole
/// table. Directory entries attach to the parent named by their `parent`
/// index field; file entries carry no parent and attach to the most
/// recently opened directory whose subtree still covers them. The format's
/// pre-order layout guarantees that directory to be the correct owner; the
/// subtree-end check extends the rule to tables whose last directories are
/// empty, where the most recent directory alone would be ambiguous.
pub fn sibling_tree(entries: &[FlatEntry], names: &NameTable) -> Result<Tree> {
    let root = entries.first().ok_or(Error::Parse("empty entry table"))?;
    let len = entries.len() as u32;
    if !root.dir {
        return Err(Error::FormatViolation {
            offset: 0,
            what: "entry 0 is not a directory",
        });
    }
    if root.end != len {
        return Err(Error::FormatViolation {
            offset: 0,
            what: "root subtree does not span the entry table",
        });
    }

    let mut dir_of_entry = vec![None; entries.len()];
    dir_of_entry[0] = Some(ROOT);
    let init = Scan {
        tree: Tree::new(),
        scopes: vec![(len, ROOT)],
        dir_of_entry,
    };

    let scan = entries
        .iter()
        .enumerate()
        .skip(1)
        .try_fold(init, |acc, (index, entry)| {
            scan_entry(acc, index, entry, names, len)
        })?;
    Ok(scan.tree)
}

/// Process one entry of a sibling table.
fn scan_entry(
    mut scan: Scan,
    index: usize,
    entry: &FlatEntry,
    names: &NameTable,
    len: u32,
) -> Result<Scan> {
    // Close every scope whose subtree ended before this entry.
    while scan.scopes.len() > 1 && index as u32 >= scan.scopes.last().unwrap().0 {
        scan.scopes.pop();
    }

    let name = names.get(entry.name_offset)?;
    if entry.dir {
        let parent_entry = entry.parent as usize;
        if parent_entry >= index {
            return Err(Error::FormatViolation {
                offset: index as u64,
                what: "directory parent index out of table bounds",
            });
        }
        let parent_dir = scan.dir_of_entry[parent_entry].ok_or(Error::FormatViolation {
            offset: index as u64,
            what: "directory parent entry is not a directory",
        })?;
        let enclosing_end = scan.scopes.last().unwrap().0;
        if entry.end <= index as u32 || entry.end > len || entry.end > enclosing_end {
            return Err(Error::FormatViolation {
                offset: index as u64,
                what: "directory subtree end out of bounds",
            });
        }
        let dir = scan.tree.add_dir(parent_dir, name);
        scan.dir_of_entry[index] = Some(dir);
        scan.scopes.push((entry.end, dir));
    } else {
        let (_, dir) = *scan.scopes.last().unwrap();
        scan.tree.add_file(
            dir,
            name,
            ByteRange {
                offset: entry.offset,
                len: entry.size,
            },
        );
    }
    Ok(scan)
}

/// Base value of `0xF000`-tagged directory ids in FNT tables.
pub const FNT_DIR_BASE: u16 = 0xF000;

/// One record of an FNT main directory table (8 bytes, little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FntDir {
    /// Byte offset of this directory's name sub-table, relative to the
    /// start of the FNT region.
    pub sub_table_offset: u32,
    /// Id of the first file named in the sub-table.
    pub first_file_id: u16,
    /// Parent directory id (`0xF000`-based); the root record stores the
    /// total directory count here instead.
    pub parent: u16,
}

/// Parse an FNT main table.
///
/// The directory count is taken from the root record's parent field, as
/// the format defines it.
pub fn read_fnt_dirs(fnt: &[u8]) -> Result<Vec<FntDir>> {
    if fnt.len() < 8 {
        return Err(Error::UnexpectedEof);
    }
    let count = u16::from_le_bytes([fnt[6], fnt[7]]) as usize;
    if count == 0 || count > 0x1000 {
        return Err(Error::FormatViolation {
            offset: 6,
            what: "directory count out of range",
        });
    }
    if fnt.len() < count * 8 {
        return Err(Error::UnexpectedEof);
    }
    let mut dirs = Vec::with_capacity(count);
    for i in 0..count {
        let rec = &fnt[i * 8..(i + 1) * 8];
        dirs.push(FntDir {
            sub_table_offset: u32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]),
            first_file_id: u16::from_le_bytes([rec[4], rec[5]]),
            parent: u16::from_le_bytes([rec[6], rec[7]]),
        });
    }
    Ok(dirs)
}

/// Rebuild a tree from an FNT region and a file allocation table.
///
/// `fat` is indexed by absolute file id; formats that reserve low ids for
/// non-tree content (NDS overlays) simply pass the full table, and the
/// sub-tables' own first-file ids skip past the reserved range.
pub fn fnt_tree(fnt: &[u8], fat: &[ByteRange]) -> Result<Tree> {
    let dirs = read_fnt_dirs(fnt)?;
    let mut tree = Tree::new();
    let mut visited = vec![false; dirs.len()];
    descend_fnt(fnt, &dirs, fat, 0, ROOT, &mut tree, &mut visited)?;
    Ok(tree)
}

fn descend_fnt(
    fnt: &[u8],
    dirs: &[FntDir],
    fat: &[ByteRange],
    dir_index: usize,
    tree_dir: usize,
    tree: &mut Tree,
    visited: &mut [bool],
) -> Result<()> {
    if visited[dir_index] {
        return Err(Error::FormatViolation {
            offset: (dir_index * 8) as u64,
            what: "directory table cycle",
        });
    }
    visited[dir_index] = true;

    let rec = dirs[dir_index];
    let mut pos = rec.sub_table_offset as usize;
    let mut file_id = rec.first_file_id as usize;
    loop {
        let len_byte = *fnt.get(pos).ok_or(Error::UnexpectedEof)?;
        pos += 1;
        match len_byte {
            0x00 => break,
            0x80 => {
                return Err(Error::FormatViolation {
                    offset: (pos - 1) as u64,
                    what: "reserved FNT length byte",
                });
            }
            0x01..=0x7F => {
                let n = len_byte as usize;
                let name_bytes = fnt.get(pos..pos + n).ok_or(Error::UnexpectedEof)?;
                let name = String::from_utf8_lossy(name_bytes).into_owned();
                pos += n;
                let range = *fat.get(file_id).ok_or(Error::FormatViolation {
                    offset: (pos - n - 1) as u64,
                    what: "file id past the allocation table",
                })?;
                tree.add_file(tree_dir, name, range);
                file_id += 1;
            }
            _ => {
                let n = (len_byte & 0x7F) as usize;
                let name_bytes = fnt.get(pos..pos + n).ok_or(Error::UnexpectedEof)?;
                let name = String::from_utf8_lossy(name_bytes).into_owned();
                pos += n;
                let id_bytes = fnt.get(pos..pos + 2).ok_or(Error::UnexpectedEof)?;
                let sub = u16::from_le_bytes([id_bytes[0], id_bytes[1]]);
                pos += 2;
                let sub_index = (sub & 0x0FFF) as usize;
                if sub_index == 0 || sub_index >= dirs.len() {
                    return Err(Error::FormatViolation {
                        offset: (pos - 2) as u64,
                        what: "directory index out of table bounds",
                    });
                }
                let child = tree.add_dir(tree_dir, name);
                descend_fnt(fnt, dirs, fat, sub_index, child, tree, visited)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NameEncoding;

    fn names_for(list: &[&str]) -> (NameTable, Vec<u32>) {
        let mut t = NameTable::new(NameEncoding::Utf8);
        let offsets = list.iter().map(|n| t.push(n)).collect();
        (t, offsets)
    }

    #[test]
    fn sibling_basic_tree() {
        let (names, o) = names_for(&["", "arm9.bin", "ovl", "overlay9_000"]);
        let entries = [
            FlatEntry::new_dir(o[0], 0, 4),
            FlatEntry::new_file(o[1], 0x40, 10),
            FlatEntry::new_dir(o[2], 0, 4),
            FlatEntry::new_file(o[3], 0x50, 4),
        ];
        let tree = sibling_tree(&entries, &names).unwrap();
        assert_eq!(tree.find_file("arm9.bin").map(|f| tree.file(f).range.len), Some(10));
        assert_eq!(
            tree.find_file("ovl/overlay9_000").map(|f| tree.file(f).range.offset),
            Some(0x50)
        );
    }

    #[test]
    fn sibling_file_after_closed_subtree_attaches_to_ancestor() {
        // root { a { b {} } } followed by a file: both scopes are closed by
        // the time the file entry is scanned, so it belongs to the root even
        // though "b" was the most recently seen directory.
        let (names, o) = names_for(&["", "a", "b", "tail.bin"]);
        let entries = [
            FlatEntry::new_dir(o[0], 0, 4),
            FlatEntry::new_dir(o[1], 0, 3),
            FlatEntry::new_dir(o[2], 1, 3),
            FlatEntry::new_file(o[3], 0, 1),
        ];
        let tree = sibling_tree(&entries, &names).unwrap();
        assert!(tree.find_file("tail.bin").is_some());
        assert!(tree.find_file("a/b/tail.bin").is_none());
    }

    #[test]
    fn sibling_rejects_forward_parent() {
        let (names, o) = names_for(&["", "x"]);
        let entries = [
            FlatEntry::new_dir(o[0], 0, 2),
            FlatEntry::new_dir(o[1], 1, 2),
        ];
        assert!(matches!(
            sibling_tree(&entries, &names),
            Err(Error::FormatViolation { offset: 1, .. })
        ));
    }

    #[test]
    fn sibling_rejects_escaping_subtree() {
        let (names, o) = names_for(&["", "a", "b"]);
        // "b" claims a subtree end beyond its enclosing directory "a".
        let entries = [
            FlatEntry::new_dir(o[0], 0, 4),
            FlatEntry::new_dir(o[1], 0, 3),
            FlatEntry::new_dir(o[2], 1, 4),
            FlatEntry::new_file(0, 0, 0),
        ];
        assert!(matches!(
            sibling_tree(&entries, &names),
            Err(Error::FormatViolation { offset: 2, .. })
        ));
    }

    #[test]
    fn sibling_rejects_short_root_span() {
        let (names, o) = names_for(&[""]);
        let entries = [FlatEntry::new_dir(o[0], 0, 3), FlatEntry::new_file(0, 0, 0)];
        assert!(sibling_tree(&entries, &names).is_err());
    }

    fn fat(ranges: &[(u64, u64)]) -> Vec<ByteRange> {
        ranges
            .iter()
            .map(|&(offset, len)| ByteRange { offset, len })
            .collect()
    }

    #[test]
    fn fnt_basic_tree() {
        // Root (dir 0) holds "arm9.bin" and subdir "ovl"; "ovl" holds one
        // file. Main table: 2 records; sub-tables follow.
        let mut fnt = Vec::new();
        fnt.extend_from_slice(&16u32.to_le_bytes()); // root sub-table at 16
        fnt.extend_from_slice(&0u16.to_le_bytes()); // first file id 0
        fnt.extend_from_slice(&2u16.to_le_bytes()); // dir count
        fnt.extend_from_slice(&32u32.to_le_bytes()); // "ovl" sub-table
        fnt.extend_from_slice(&1u16.to_le_bytes()); // first file id 1
        fnt.extend_from_slice(&0xF000u16.to_le_bytes()); // parent = root
        // Root sub-table: file "arm9.bin", dir "ovl" -> 0xF001, end.
        fnt.push(8);
        fnt.extend_from_slice(b"arm9.bin");
        fnt.push(0x80 | 3);
        fnt.extend_from_slice(b"ovl");
        fnt.extend_from_slice(&0xF001u16.to_le_bytes());
        fnt.push(0);
        assert_eq!(fnt.len(), 32);
        // "ovl" sub-table: file "overlay9_000", end.
        fnt.push(12);
        fnt.extend_from_slice(b"overlay9_000");
        fnt.push(0);

        let tree = fnt_tree(&fnt, &fat(&[(0, 10), (16, 4)])).unwrap();
        assert_eq!(tree.find_file("arm9.bin").map(|f| tree.file(f).range.len), Some(10));
        assert_eq!(
            tree.find_file("ovl/overlay9_000").map(|f| tree.file(f).range.offset),
            Some(16)
        );
    }

    #[test]
    fn fnt_rejects_reserved_length_byte() {
        let mut fnt = Vec::new();
        fnt.extend_from_slice(&8u32.to_le_bytes());
        fnt.extend_from_slice(&0u16.to_le_bytes());
        fnt.extend_from_slice(&1u16.to_le_bytes());
        fnt.push(0x80);
        let err = fnt_tree(&fnt, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::FormatViolation { offset: 8, what: "reserved FNT length byte" }
        ));
    }

    #[test]
    fn fnt_rejects_out_of_bounds_dir_index() {
        let mut fnt = Vec::new();
        fnt.extend_from_slice(&8u32.to_le_bytes());
        fnt.extend_from_slice(&0u16.to_le_bytes());
        fnt.extend_from_slice(&1u16.to_le_bytes());
        fnt.push(0x80 | 1);
        fnt.push(b'x');
        fnt.extend_from_slice(&0xF005u16.to_le_bytes());
        fnt.push(0);
        assert!(matches!(
            fnt_tree(&fnt, &[]),
            Err(Error::FormatViolation { what: "directory index out of table bounds", .. })
        ));
    }

    #[test]
    fn fnt_rejects_file_id_past_fat() {
        let mut fnt = Vec::new();
        fnt.extend_from_slice(&8u32.to_le_bytes());
        fnt.extend_from_slice(&3u16.to_le_bytes()); // first file id 3, FAT has 1 entry
        fnt.extend_from_slice(&1u16.to_le_bytes());
        fnt.push(1);
        fnt.push(b'f');
        fnt.push(0);
        assert!(matches!(
            fnt_tree(&fnt, &fat(&[(0, 1)])),
            Err(Error::FormatViolation { what: "file id past the allocation table", .. })
        ));
    }
}
