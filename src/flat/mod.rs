//! The flat, index-addressed form a directory tree takes on disk, and the
//! algorithms that convert between it and [`crate::tree::Tree`].
//!
//! Every container in this library linearizes its hierarchy the same way:
//! an ordered entry table where entry 0 is the root directory, directory
//! entries carry index back-references into the same table, and file
//! entries carry a byte range into the data region. Formats differ in
//! field widths, endianness, and name encoding - not in structure - so the
//! conversion algorithms live here once and the format adapters only map
//! their record layouts onto [`FlatEntry`].
//!
//! * [`reconstruct`] - flat entries → tree (load direction).
//! * [`flatten`] - tree → flat entries + name blob (save direction).
//! * [`layout`] - byte-offset planning for the serialized regions.
//!
//! Two table styles are covered:
//!
//! * **Sibling style** (U8, DARC, GameCube FST): one homogeneous table in
//!   pre-order; directories reference their parent and the end of their
//!   subtree; files belong to the nearest open directory.
//! * **FNT style** (NARC, NDS ROM, GARC): a directory meta-table plus
//!   length-prefixed name sub-tables; files are numbered by sequential id
//!   into a separate allocation table.
//!
//! RomFS-style linked metadata (explicit first-child/next-sibling chains)
//! is format-specific enough to live with its adapter in
//! [`crate::formats::romfs`].

pub mod flatten;
pub mod layout;
pub mod reconstruct;

/// Sentinel index meaning "no such entry" in on-disk relation fields.
pub const NO_ENTRY: u32 = u32::MAX;

/// One record of a linearized tree, in sibling-table form.
///
/// The same struct carries both entry kinds; which fields are meaningful
/// depends on `dir`:
///
/// | field         | directory entry              | file entry          |
/// |---------------|------------------------------|---------------------|
/// | `name_offset` | offset into the name blob    | offset into the name blob |
/// | `parent`      | entry index of the parent (root: 0, itself) | unused (0) |
/// | `end`         | one-past-last entry index of the subtree | unused (0) |
/// | `offset`      | unused (0)                   | data byte offset    |
/// | `size`        | unused (0)                   | data byte length    |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatEntry {
    /// Directory marker (`true`) or file marker (`false`).
    pub dir: bool,
    /// Byte offset of this entry's name in the name blob.
    pub name_offset: u32,
    /// Directories: entry index of the parent directory.
    pub parent: u32,
    /// Directories: index of the first entry after this subtree.
    pub end: u32,
    /// Files: byte offset of the content.
    pub offset: u64,
    /// Files: byte length of the content.
    pub size: u64,
}

impl FlatEntry {
    /// Construct a directory marker.
    pub fn new_dir(name_offset: u32, parent: u32, end: u32) -> Self {
        Self {
            dir: true,
            name_offset,
            parent,
            end,
            offset: 0,
            size: 0,
        }
    }

    /// Construct a file marker.
    pub fn new_file(name_offset: u32, offset: u64, size: u64) -> Self {
        Self {
            dir: false,
            name_offset,
            parent: 0,
            end: 0,
            offset,
            size,
        }
    }
}
