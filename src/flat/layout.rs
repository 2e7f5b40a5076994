//! Byte-offset planning for serialized archives.
//!
//! Every container writes its regions in the same order: header, entry
//! table(s), name blob, optional hash tables, then file data. The planner
//! turns region sizes plus per-file alignment requirements into absolute
//! offsets; serialization afterwards is a straight copy with filler bytes
//! between the planned positions.
//!
//! Alignment is format business: a fixed constant for most containers, but
//! some key it off the payload itself (SARC aligns GPU textures and fonts
//! harder than plain data), so the requirement is resolved through
//! [`AlignPolicy`] before planning. Filler is a per-format constant too -
//! 0x00 for most, 0xFF for NARC-family data regions.

use crate::utils::align_up;
use crate::{Error, Result};

/// Resolves the start-offset alignment a file's data requires.
pub trait AlignPolicy {
    /// Alignment for a file, given its name and up to the first few bytes
    /// of its payload (`head` may be shorter than requested for small
    /// files, or empty when the payload is unavailable).
    fn alignment(&self, name: &str, head: &[u8]) -> u64;
}

/// The common case: one alignment for every file.
#[derive(Debug, Clone, Copy)]
pub struct FixedAlign(pub u64);

impl AlignPolicy for FixedAlign {
    fn alignment(&self, _name: &str, _head: &[u8]) -> u64 {
        self.0
    }
}

/// Sizes of the metadata regions preceding file data, plus the filler byte
/// written between planned positions.
#[derive(Debug, Clone, Copy)]
pub struct LayoutParams {
    /// Fixed header size in bytes.
    pub header_size: u64,
    /// Entry table size in bytes.
    pub table_size: u64,
    /// Name blob size in bytes.
    pub name_size: u64,
    /// Hash table region size in bytes (0 when the format has none).
    pub hash_size: u64,
    /// Minimum alignment of the data region start, regardless of the first
    /// file's own requirement (1 = none).
    pub data_align_floor: u64,
    /// Filler byte for padding gaps.
    pub fill: u8,
}

/// One file to place: `(size, alignment)`, in emission order.
pub type FilePlacement = (u64, u64);

/// Absolute offsets computed for one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Start of the entry table (= header size).
    pub table_offset: u64,
    /// Start of the name blob.
    pub name_offset: u64,
    /// Start of the hash table region (equals `data_offset` when absent).
    pub hash_offset: u64,
    /// Start of the data region, aligned to the first file's requirement
    /// (and at least to `data_align_floor`).
    pub data_offset: u64,
    /// Absolute start offset of each file, in the order given.
    pub file_offsets: Vec<u64>,
    /// Offset one past the last file's data.
    pub total_size: u64,
}

/// Plan absolute offsets for the fixed region order.
///
/// `files` holds `(size, alignment)` pairs in emission order; alignments
/// must be non-zero. The metadata region (header + table + names + hash
/// tables) is rounded up to the first file's alignment before data begins,
/// then each file's start is rounded up to its own requirement.
pub fn plan(params: &LayoutParams, files: &[FilePlacement]) -> Result<Layout> {
    if files.iter().any(|&(_, align)| align == 0) || params.data_align_floor == 0 {
        return Err(Error::Parse("zero alignment"));
    }

    let table_offset = params.header_size;
    let name_offset = table_offset + params.table_size;
    let hash_offset = name_offset + params.name_size;
    let meta_end = hash_offset + params.hash_size;

    let first_align = files.first().map_or(1, |&(_, align)| align);
    let data_offset = align_up(meta_end, first_align.max(params.data_align_floor));

    let mut file_offsets = Vec::with_capacity(files.len());
    let mut cursor = data_offset;
    for &(size, align) in files {
        let offset = align_up(cursor, align);
        file_offsets.push(offset);
        cursor = offset + size;
    }

    Ok(Layout {
        table_offset,
        name_offset,
        hash_offset,
        data_offset,
        file_offsets,
        total_size: cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: LayoutParams = LayoutParams {
        header_size: 0x10,
        table_size: 0x30,
        name_size: 0x0D,
        hash_size: 0,
        data_align_floor: 1,
        fill: 0,
    };

    #[test]
    fn regions_are_contiguous() {
        let layout = plan(&PARAMS, &[]).unwrap();
        assert_eq!(layout.table_offset, 0x10);
        assert_eq!(layout.name_offset, 0x40);
        assert_eq!(layout.hash_offset, 0x4D);
        assert_eq!(layout.data_offset, 0x4D);
        assert_eq!(layout.total_size, 0x4D);
    }

    #[test]
    fn data_region_rounds_to_first_file_alignment() {
        let layout = plan(&PARAMS, &[(10, 0x20), (4, 4)]).unwrap();
        // Metadata ends at 0x4D; first file wants 0x20.
        assert_eq!(layout.data_offset, 0x60);
        assert_eq!(layout.file_offsets, [0x60, 0x6A + 2]);
        assert_eq!(layout.total_size, 0x70);
    }

    #[test]
    fn every_offset_honors_its_alignment() {
        let files = [(3, 4u64), (7, 0x20), (1, 0x80), (4096, 0x200), (5, 4)];
        let layout = plan(&PARAMS, &files).unwrap();
        for (&(_, align), &offset) in files.iter().zip(&layout.file_offsets) {
            assert_eq!(offset % align, 0, "offset {offset:#x} vs align {align:#x}");
        }
        // Files never overlap and never precede the data region.
        let mut prev_end = layout.data_offset;
        for (&(size, _), &offset) in files.iter().zip(&layout.file_offsets) {
            assert!(offset >= prev_end);
            prev_end = offset + size;
        }
    }

    #[test]
    fn floor_overrides_small_first_alignment() {
        let mut params = PARAMS;
        params.data_align_floor = 0x40;
        let layout = plan(&params, &[(10, 4)]).unwrap();
        assert_eq!(layout.data_offset, 0x80);
    }

    #[test]
    fn zero_alignment_is_rejected() {
        assert!(plan(&PARAMS, &[(1, 0)]).is_err());
    }
}
