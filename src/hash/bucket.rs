//! RomFS-style open hash table with inline chaining.
//!
//! The table itself is only an array of chain heads; the links live inside
//! the entries (their `next_in_bucket` field), so building the index is a
//! cooperation: [`HashBucketIndex::insert`] updates the head and hands back
//! the previous one, which the caller stores into the entry it is writing.
//!
//! Chains end up most-recently-inserted-first and the head always points
//! at the last entry inserted into that bucket. Readers on the target
//! platform depend on exactly this ordering, so it is part of the on-disk
//! contract, not an implementation detail.
//!
//! Lookups are always scoped to a directory ("does directory D contain a
//! child named N"), so the hash mixes the parent's identity in as a seed -
//! two same-named entries in different directories land on different
//! chains.

use crate::flat::NO_ENTRY;

/// Initial value the parent key is mixed into.
pub const HASH_SEED: u32 = 0x075B_CD15;

/// Parent-scoped name hash over UTF-16 code units.
///
/// Starts from `parent ^ HASH_SEED`, then folds each code unit in with a
/// rotate-right by 5 and an XOR.
pub fn name_hash(parent: u32, name: &str) -> u32 {
    let mut hash = parent ^ HASH_SEED;
    for unit in name.encode_utf16() {
        hash = hash.rotate_right(5) ^ u32::from(unit);
    }
    hash
}

/// Bucket count for a table of `entries` entries.
///
/// Approximates a prime-sized table cheaply: at least 3, odd below 19, and
/// above that the next value with no factor in {2, 3, 5, 7, 11, 13, 17}.
pub fn bucket_count(entries: u32) -> u32 {
    const SMALL_PRIMES: [u32; 7] = [2, 3, 5, 7, 11, 13, 17];
    if entries < 3 {
        3
    } else if entries < 19 {
        entries | 1
    } else {
        let mut count = entries;
        while SMALL_PRIMES.iter().any(|&p| count % p == 0) {
            count += 1;
        }
        count
    }
}

/// A bucket-head array under construction (or parsed back for lookup).
#[derive(Debug, Clone)]
pub struct HashBucketIndex {
    buckets: Vec<u32>,
}

impl HashBucketIndex {
    /// Create an empty index sized for `entries` entries via
    /// [`bucket_count`].
    pub fn new(entries: u32) -> Self {
        Self::with_buckets(bucket_count(entries))
    }

    /// Create an empty index with an explicit bucket count.
    pub fn with_buckets(count: u32) -> Self {
        Self {
            buckets: vec![NO_ENTRY; count.max(1) as usize],
        }
    }

    /// Wrap an on-disk bucket-head array for lookups.
    pub fn from_heads(heads: Vec<u32>) -> Self {
        Self { buckets: heads }
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> u32 {
        self.buckets.len() as u32
    }

    /// Record `entry` as the new head of its hash's bucket.
    ///
    /// Returns the previous head - the value the caller must store in the
    /// entry's `next_in_bucket` field ([`NO_ENTRY`] if the chain was
    /// empty).
    pub fn insert(&mut self, hash: u32, entry: u32) -> u32 {
        let bucket = (hash % self.bucket_count()) as usize;
        std::mem::replace(&mut self.buckets[bucket], entry)
    }

    /// Chain head for `hash`, or [`NO_ENTRY`] for an empty bucket.
    pub fn head(&self, hash: u32) -> u32 {
        self.buckets[(hash % self.bucket_count()) as usize]
    }

    /// The raw head array, ready to serialize.
    pub fn heads(&self) -> &[u32] {
        &self.buckets
    }

    /// Walk the chain for `hash`, resolving each entry's `next_in_bucket`
    /// through `next`.
    pub fn chain<'a, F>(&'a self, hash: u32, next: F) -> impl Iterator<Item = u32> + 'a
    where
        F: Fn(u32) -> u32 + 'a,
    {
        let mut cur = self.head(hash);
        std::iter::from_fn(move || {
            if cur == NO_ENTRY {
                return None;
            }
            let entry = cur;
            cur = next(entry);
            Some(entry)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_avoid_small_prime_factors() {
        assert_eq!(bucket_count(0), 3);
        assert_eq!(bucket_count(3), 3);
        assert_eq!(bucket_count(8), 9);
        assert_eq!(bucket_count(19), 19);
        assert_eq!(bucket_count(20), 23);
        for entries in [19u32, 100, 1000, 4321] {
            let count = bucket_count(entries);
            assert!(count >= entries);
            for p in [2u32, 3, 5, 7, 11, 13, 17] {
                assert_ne!(count % p, 0, "{count} divisible by {p}");
            }
        }
    }

    #[test]
    fn parent_scoping_changes_the_hash() {
        assert_ne!(name_hash(0x18, "data.bin"), name_hash(0x40, "data.bin"));
        assert_ne!(name_hash(0, "a"), name_hash(0, "b"));
    }

    #[test]
    fn chain_order_is_reverse_insertion() {
        // Three entries whose hashes land in buckets 1, 1, and 2.
        let mut index = HashBucketIndex::with_buckets(3);
        let mut next_links = [NO_ENTRY; 3];
        next_links[0] = index.insert(1, 0);
        next_links[1] = index.insert(4, 1); // 4 % 3 == 1
        next_links[2] = index.insert(2, 2);

        // Head of bucket 1 is the last entry inserted into it; its link
        // leads back to the first, which terminates the chain.
        assert_eq!(index.head(1), 1);
        assert_eq!(next_links[1], 0);
        assert_eq!(next_links[0], NO_ENTRY);
        assert_eq!(index.head(2), 2);
        assert_eq!(next_links[2], NO_ENTRY);

        let chain: Vec<u32> = index.chain(1, |e| next_links[e as usize]).collect();
        assert_eq!(chain, [1, 0]);
    }

    #[test]
    fn every_entry_is_reachable_exactly_once() {
        let names: Vec<String> = (0..57).map(|i| format!("file_{i:03}.bin")).collect();
        let mut index = HashBucketIndex::new(names.len() as u32);
        let mut links = vec![NO_ENTRY; names.len()];
        let hashes: Vec<u32> = names.iter().map(|n| name_hash(0x18, n)).collect();
        for (i, &h) in hashes.iter().enumerate() {
            links[i] = index.insert(h, i as u32);
        }

        let mut seen = vec![0u32; names.len()];
        for &h in &hashes {
            for entry in index.chain(h, |e| links[e as usize]) {
                // Chains may hold several entries; count a visit only for
                // the entry we are looking up.
                seen[entry as usize] += 1;
            }
        }
        // Each entry appears in its own chain, and walking a chain of k
        // colliding entries visits each of them k times total here.
        for (i, &h) in hashes.iter().enumerate() {
            let in_chain = index
                .chain(h, |e| links[e as usize])
                .filter(|&e| e == i as u32)
                .count();
            assert_eq!(in_chain, 1, "entry {i} not visited exactly once");
        }
        assert!(seen.iter().all(|&c| c >= 1));
    }
}
