//! IVFC - the cascading multi-level block-hash tree protecting RomFS
//! images.
//!
//! The protected region (flattened metadata + file data) is hashed in
//! 4096-byte blocks; the concatenated digests form the next level, which
//! is hashed the same way, and so on for a fixed number of levels. The
//! last level must shrink to a single block - the **master hash** - which
//! is the root of trust: it is stored outside the cascading region and
//! referenced directly by the container header.
//!
//! ## Level geometry
//! ```text
//! level 0          the protected region itself (length L)
//! level k (k > 0)  ceil(size(k-1) / 4096) * 32 bytes of digests,
//!                  zero-padded up to the next 4096 boundary
//! master           the final level; exactly one block after padding
//! ```
//!
//! Two rules matter for byte-exactness:
//!
//! * A short trailing block is hashed **as-is** - the digest covers only
//!   the bytes present, never imaginary zero padding. (Hash levels are
//!   materialized padded, so from level 1 upward every block is full.)
//! * Levels build strictly bottom-up: level *k* is a function of the fully
//!   written level *k-1*.
//!
//! Digests within one level are independent, so each level is hashed in
//! parallel; the levels themselves stay sequential.

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Hash block size. Fixed for every observed container.
pub const BLOCK_SIZE: u64 = 4096;

/// SHA-256 digest size.
pub const DIGEST_SIZE: u64 = 32;

/// Hash level count (master included) used by NCCH RomFS.
pub const LEVEL_COUNT: usize = 3;

/// One materialized hash level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashLevel {
    /// Byte position of this level within the cascading region (level 1
    /// starts at 0; the master is stored elsewhere and has no position).
    pub position: u64,
    /// Padded size in bytes (a multiple of [`BLOCK_SIZE`]).
    pub size: u64,
    /// Raw digest bytes before padding.
    pub raw_size: u64,
    /// The level's bytes, zero-padded to `size`.
    pub data: Vec<u8>,
}

/// A computed IVFC tree: the cascading hash levels plus the master block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfcTree {
    /// Cascading levels in bottom-up order: `levels[0]` protects the input
    /// region, each later level protects the one before it.
    pub levels: Vec<HashLevel>,
    /// The master hash level, exactly one block, zero-padded.
    pub master: HashLevel,
}

impl IvfcTree {
    /// Total size of the cascading region (master excluded).
    pub fn cascade_size(&self) -> u64 {
        self.levels.iter().map(|l| l.size).sum()
    }
}

/// Hash every [`BLOCK_SIZE`] block of `region`; the trailing block may be
/// short and is hashed as-is.
fn hash_blocks(region: &[u8]) -> Vec<[u8; 32]> {
    region
        .par_chunks(BLOCK_SIZE as usize)
        .map(|block| Sha256::digest(block).into())
        .collect()
}

/// Build the hash tree over `region` with the standard [`LEVEL_COUNT`].
pub fn build(region: &[u8]) -> Result<IvfcTree> {
    build_with_levels(region, LEVEL_COUNT)
}

/// Build the hash tree over `region` with an explicit level count
/// (master included).
///
/// Fails with [`Error::Parse`] if the region is empty or too large for the
/// final level to shrink to a single master block.
pub fn build_with_levels(region: &[u8], level_count: usize) -> Result<IvfcTree> {
    if region.is_empty() {
        return Err(Error::Parse("cannot hash an empty region"));
    }
    if level_count < 2 {
        return Err(Error::Parse("hash tree needs at least two levels"));
    }

    let mut levels: Vec<HashLevel> = Vec::with_capacity(level_count - 1);
    for level in 1..=level_count {
        let digests = match levels.last() {
            None => hash_blocks(region),
            Some(below) => hash_blocks(&below.data),
        };
        let raw_size = digests.len() as u64 * DIGEST_SIZE;
        let size = raw_size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let mut data = Vec::with_capacity(size as usize);
        for d in &digests {
            data.extend_from_slice(d);
        }
        data.resize(size as usize, 0);
        debug!(level, blocks = digests.len(), size, "hash level built");

        if level == level_count {
            if size != BLOCK_SIZE {
                return Err(Error::Parse("master hash does not fit one block"));
            }
            return Ok(IvfcTree {
                levels,
                master: HashLevel {
                    position: 0,
                    size,
                    raw_size,
                    data,
                },
            });
        }

        let position = levels.iter().map(|l| l.size).sum();
        levels.push(HashLevel {
            position,
            size,
            raw_size,
            data,
        });
    }
    unreachable!("loop returns at the final level");
}

/// Re-derive every level from `region` and compare against `tree`.
///
/// All levels are checked; the first mismatch is returned after the scan
/// so a caller sees the lowest affected level. Nothing is corrected -
/// rewriting a stored hash could mask genuine corruption.
pub fn verify(region: &[u8], tree: &IvfcTree) -> Result<()> {
    let mut first_mismatch: Option<(usize, u64)> = None;
    let mut current: &[u8] = region;
    let total = tree.levels.len() + 1;
    for level in 1..=total {
        let stored = if level == total {
            &tree.master
        } else {
            &tree.levels[level - 1]
        };
        let computed = hash_blocks(current);
        for (block, digest) in computed.iter().enumerate() {
            let at = block * DIGEST_SIZE as usize;
            if stored.data.get(at..at + DIGEST_SIZE as usize) != Some(&digest[..]) {
                warn!(level, block, "hash mismatch");
                first_mismatch.get_or_insert((level, block as u64));
            }
        }
        if level < total {
            current = &tree.levels[level - 1].data;
        }
    }
    match first_mismatch {
        Some((level, block)) => Err(Error::IntegrityMismatch { level, block }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn level_geometry_for_9000_bytes() {
        let data = region(9000);
        let tree = build(&data).unwrap();

        // Three blocks of input (last one short) -> three digests.
        assert_eq!(tree.levels.len(), 2);
        assert_eq!(tree.levels[0].raw_size, 3 * DIGEST_SIZE);
        assert_eq!(tree.levels[0].size, BLOCK_SIZE);
        // The short trailing block is hashed over its 808 real bytes only.
        let tail: [u8; 32] = Sha256::digest(&data[8192..]).into();
        assert_eq!(&tree.levels[0].data[64..96], &tail);
        // Everything after the third digest is zero filler.
        assert!(tree.levels[0].data[96..].iter().all(|&b| b == 0));

        // One block of level 1 -> one digest, padded to a block.
        assert_eq!(tree.levels[1].raw_size, DIGEST_SIZE);
        assert_eq!(tree.levels[1].size, BLOCK_SIZE);
        assert_eq!(tree.levels[1].position, BLOCK_SIZE);

        // Master: one digest of level 2, exactly one block.
        assert_eq!(tree.master.size, BLOCK_SIZE);
        let expected: [u8; 32] = Sha256::digest(&tree.levels[1].data).into();
        assert_eq!(&tree.master.data[..32], &expected);
    }

    #[test]
    fn levels_shrink_monotonically() {
        let data = region(700_000);
        let tree = build_with_levels(&data, 4).unwrap();
        let mut prev = data.len() as u64;
        for level in &tree.levels {
            let expected = prev.div_ceil(BLOCK_SIZE) * DIGEST_SIZE;
            assert_eq!(level.raw_size, expected);
            if prev > BLOCK_SIZE * DIGEST_SIZE {
                assert!(level.raw_size < prev);
            }
            prev = level.size;
        }
    }

    #[test]
    fn sub_block_region_hashes_as_is() {
        let data = region(100);
        let tree = build(&data).unwrap();
        let expected: [u8; 32] = Sha256::digest(&data).into();
        assert_eq!(&tree.levels[0].data[..32], &expected);
        assert_eq!(tree.levels[0].raw_size, DIGEST_SIZE);
    }

    #[test]
    fn verify_accepts_untouched_data() {
        let data = region(20_000);
        let tree = build(&data).unwrap();
        verify(&data, &tree).unwrap();
    }

    #[test]
    fn verify_pinpoints_corruption() {
        let data = region(20_000);
        let tree = build(&data).unwrap();
        let mut bad = data.clone();
        bad[5000] ^= 0xFF; // inside block 1
        match verify(&bad, &tree) {
            Err(Error::IntegrityMismatch { level: 1, block: 1 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn master_must_fit_one_block() {
        // Two levels over a region large enough that the digests of its
        // blocks overflow a single block.
        let data = region((BLOCK_SIZE * (BLOCK_SIZE / DIGEST_SIZE + 1)) as usize);
        assert!(matches!(
            build_with_levels(&data, 2),
            Err(Error::Parse("master hash does not fit one block"))
        ));
    }

    #[test]
    fn empty_region_is_rejected() {
        assert!(build(&[]).is_err());
    }
}
