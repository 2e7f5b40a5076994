//! **arckit** - reusable tree/flat-table machinery for Nintendo archive
//! container formats.
//!
//! Nearly every container on these platforms solves the same problem: a
//! directory/file hierarchy stored as a flat, offset- and index-addressed
//! table that must be rebuilt into an editable tree on load and
//! re-flattened - byte-exact, padding included - on save. arckit
//! implements that shared machinery once and adapts it per format:
//!
//! | Module | Role |
//! |--------|------|
//! | [`tree`]        | Editable arena-backed directory/file tree |
//! | [`flat`]        | Flat entry model, reconstruction, flattening, layout planning |
//! | [`names`]       | Name-table blobs (UTF-8 / UTF-16, aligned variants) |
//! | [`hash`]        | Bucket-chained name index and the IVFC integrity hash tree |
//! | [`formats`]     | Per-format adapters: U8, DARC, NARC, SARC, NCCH RomFS |
//! | [`compression`] | Method-tag detection; LZ4/Zstd codecs behind the `compression` feature |
//!
//! # Example
//! ```no_run
//! use std::fs::File;
//! use std::io::Cursor;
//!
//! use arckit::Result;
//! use arckit::formats::narc::Narc;
//!
//! fn main() -> Result<()> {
//!     let data = std::fs::read("map.narc")?;
//!     let narc = Narc::parse(&mut Cursor::new(&data))?;
//!     for (path, file) in narc.tree.walk_files() {
//!         println!("{path}: {} bytes", narc.tree.file(file).range.len);
//!     }
//!     let rebuilt = Narc::build(&narc.tree, &mut Cursor::new(&data), narc.named)?;
//!     std::io::copy(&mut Cursor::new(rebuilt), &mut File::create("map.out.narc")?)?;
//!     Ok(())
//! }
//! ```

pub mod compression;
pub mod error;
pub mod flat;
pub mod formats;
pub mod hash;
pub mod names;
pub mod tree;
pub mod utils;

pub use error::{Error, Result};
