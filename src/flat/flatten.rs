//! Tree flattening: editable tree → flat entry tables.
//!
//! Each function here is the structural inverse of its counterpart in
//! [`crate::flat::reconstruct`]: feeding the output back through
//! reconstruction yields an equal tree, and for an unmodified tree the
//! entries come back identical, field for field.

use crate::names::NameTable;
use crate::tree::{ROOT, Tree};
use crate::{Error, Result};

use super::FlatEntry;

/// Flatten a tree into a sibling-style entry table, appending names to
/// `names`.
///
/// Entries are emitted in pre-order: a directory, then its files (in
/// order, each taking the next content id), then its subdirectories
/// recursively. Every directory's `end` field is back-patched to the entry
/// count after its whole subtree has been emitted. File entries keep the
/// byte ranges currently on the tree; reassigning output offsets is the
/// planner's job ([`crate::flat::layout`]).
pub fn sibling_entries(tree: &Tree, names: &mut NameTable) -> Result<Vec<FlatEntry>> {
    let mut entries = Vec::with_capacity(1 + tree.dir_count() + tree.file_count());
    emit_dir(tree, ROOT, 0, &mut entries, names)?;
    Ok(entries)
}

fn emit_dir(
    tree: &Tree,
    dir: usize,
    parent_entry: u32,
    entries: &mut Vec<FlatEntry>,
    names: &mut NameTable,
) -> Result<()> {
    let index = entries.len();
    if index > u32::MAX as usize {
        return Err(Error::Parse("entry table too large"));
    }
    let name_offset = names.push(&tree.dir(dir).name);
    entries.push(FlatEntry::new_dir(name_offset, parent_entry, 0));

    let node = tree.dir(dir);
    for &f in &node.files {
        let file = tree.file(f);
        let name_offset = names.push(&file.name);
        entries.push(FlatEntry::new_file(
            name_offset,
            file.range.offset,
            file.range.len,
        ));
    }
    for &d in &node.dirs {
        emit_dir(tree, d, index as u32, entries, names)?;
    }

    entries[index].end = entries.len() as u32;
    Ok(())
}

/// Flat form of an FNT region plus the file ordering it implies.
#[derive(Debug)]
pub struct FntBlob {
    /// Main directory table followed by the name sub-tables, ready to be
    /// written as one region.
    pub bytes: Vec<u8>,
    /// Tree file indices in file-id order; `file_order[k]` was assigned id
    /// `base_id + k`. The allocation table must be built in this order.
    pub file_order: Vec<usize>,
}

/// Flatten a tree into an FNT region.
///
/// Two passes, as the table demands: the directory count fixes the size of
/// the main table, then the walk appends one name sub-table per directory
/// while handing out dense sequential file ids starting at `base_id`
/// (non-zero when the surrounding format reserves low ids for content
/// outside the tree, such as NDS overlays).
pub fn fnt_blob(tree: &Tree, base_id: u16) -> Result<FntBlob> {
    // Pass 1: number the reachable directories in visit order.
    let mut dir_ids = vec![usize::MAX; tree.dir_count()];
    let mut order = Vec::new();
    number_dirs(tree, ROOT, &mut dir_ids, &mut order);
    let dir_count = order.len();
    if dir_count > 0x1000 {
        return Err(Error::Parse("too many directories for an FNT table"));
    }

    // Pass 2: write sub-tables behind the (pre-sized) main table, patching
    // each directory's record as its offset becomes known.
    let mut bytes = vec![0u8; dir_count * 8];
    let mut file_order = Vec::with_capacity(tree.file_count());
    let mut next_id = base_id;
    for (fnt_id, &dir) in order.iter().enumerate() {
        let sub_table_offset = bytes.len() as u32;
        let first_file_id = next_id;

        let node = tree.dir(dir);
        for &f in &node.files {
            let name = tree.file(f).name.as_bytes();
            if name.is_empty() || name.len() > 0x7F {
                return Err(Error::Parse("file name length unencodable in FNT"));
            }
            bytes.push(name.len() as u8);
            bytes.extend_from_slice(name);
            file_order.push(f);
            next_id = next_id
                .checked_add(1)
                .ok_or(Error::Parse("file id space exhausted"))?;
        }
        for &d in &node.dirs {
            let name = tree.dir(d).name.as_bytes();
            if name.is_empty() || name.len() > 0x7F {
                return Err(Error::Parse("directory name length unencodable in FNT"));
            }
            bytes.push(0x80 | name.len() as u8);
            bytes.extend_from_slice(name);
            let child_id = super::reconstruct::FNT_DIR_BASE | dir_ids[d] as u16;
            bytes.extend_from_slice(&child_id.to_le_bytes());
        }
        bytes.push(0);

        let parent = match tree.dir(dir).parent {
            // The root record stores the directory count in place of a
            // parent id.
            None => dir_count as u16,
            Some(p) => super::reconstruct::FNT_DIR_BASE | dir_ids[p] as u16,
        };
        let rec = &mut bytes[fnt_id * 8..(fnt_id + 1) * 8];
        rec[0..4].copy_from_slice(&sub_table_offset.to_le_bytes());
        rec[4..6].copy_from_slice(&first_file_id.to_le_bytes());
        rec[6..8].copy_from_slice(&parent.to_le_bytes());
    }

    Ok(FntBlob { bytes, file_order })
}

fn number_dirs(tree: &Tree, dir: usize, dir_ids: &mut [usize], order: &mut Vec<usize>) {
    dir_ids[dir] = order.len();
    order.push(dir);
    for &d in &tree.dir(dir).dirs {
        number_dirs(tree, d, dir_ids, order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::reconstruct::{fnt_tree, sibling_tree};
    use crate::names::NameEncoding;
    use crate::tree::ByteRange;

    fn sample() -> Tree {
        let mut t = Tree::new();
        t.add_file(ROOT, "arm9.bin", ByteRange { offset: 0x40, len: 10 });
        let ovl = t.add_dir(ROOT, "ovl");
        t.add_file(ovl, "overlay9_000", ByteRange { offset: 0x50, len: 4 });
        t
    }

    #[test]
    fn sibling_emission_order_follows_the_tree() {
        let tree = sample();
        let mut names = NameTable::new(NameEncoding::Utf8);
        let entries = sibling_entries(&tree, &mut names).unwrap();
        // Root, root's file, then the subdirectory and its file.
        assert_eq!(entries.len(), 4);
        assert!(entries[0].dir && entries[0].end == 4);
        assert!(!entries[1].dir);
        assert_eq!(names.get(entries[1].name_offset).unwrap(), "arm9.bin");
        assert!(entries[2].dir && entries[2].parent == 0 && entries[2].end == 4);
        assert_eq!(names.get(entries[3].name_offset).unwrap(), "overlay9_000");
    }

    #[test]
    fn sibling_roundtrip_identity() {
        let tree = sample();
        let mut names = NameTable::new(NameEncoding::Utf8);
        let entries = sibling_entries(&tree, &mut names).unwrap();
        let rebuilt = sibling_tree(&entries, &names).unwrap();
        assert!(tree.same_shape(&rebuilt));

        // Unmodified tree: a second flatten reproduces the table exactly.
        let mut names2 = NameTable::new(NameEncoding::Utf8);
        let entries2 = sibling_entries(&rebuilt, &mut names2).unwrap();
        assert_eq!(entries, entries2);
        assert_eq!(names.blob(), names2.blob());
    }

    #[test]
    fn sibling_empty_tail_dirs_roundtrip() {
        let mut tree = Tree::new();
        tree.add_file(ROOT, "only.bin", ByteRange { offset: 0, len: 1 });
        let a = tree.add_dir(ROOT, "a");
        tree.add_dir(a, "b");
        tree.add_dir(ROOT, "c");
        let mut names = NameTable::new(NameEncoding::Utf8);
        let entries = sibling_entries(&tree, &mut names).unwrap();
        let rebuilt = sibling_tree(&entries, &names).unwrap();
        assert!(tree.same_shape(&rebuilt));
    }

    #[test]
    fn fnt_roundtrip_identity() {
        let tree = sample();
        let flat = fnt_blob(&tree, 0).unwrap();
        // FAT in file-id order, taken straight from the tree ranges.
        let fat: Vec<ByteRange> = flat
            .file_order
            .iter()
            .map(|&f| tree.file(f).range)
            .collect();
        let rebuilt = fnt_tree(&flat.bytes, &fat).unwrap();
        assert!(tree.same_shape(&rebuilt));

        let flat2 = fnt_blob(&rebuilt, 0).unwrap();
        assert_eq!(flat.bytes, flat2.bytes);
    }

    #[test]
    fn fnt_base_id_offsets_first_file_ids() {
        let tree = sample();
        let flat = fnt_blob(&tree, 5).unwrap();
        // Root record's first file id reflects the caller-supplied base.
        assert_eq!(u16::from_le_bytes([flat.bytes[4], flat.bytes[5]]), 5);
        // The FAT indexed by absolute id still lines up on reconstruction.
        let mut fat = vec![ByteRange::default(); 5];
        fat.extend(flat.file_order.iter().map(|&f| tree.file(f).range));
        let rebuilt = fnt_tree(&flat.bytes, &fat).unwrap();
        assert!(tree.same_shape(&rebuilt));
    }

    #[test]
    fn fnt_rejects_oversized_names() {
        let mut tree = Tree::new();
        tree.add_file(ROOT, "x".repeat(0x80), ByteRange::default());
        assert!(fnt_blob(&tree, 0).is_err());
    }
}
