//! The fixed, zero-indexed set of reference positions globally ignored in
//! all comparisons.

use bitvec::prelude::{BitVec, Lsb0};

/// Mask membership is checked once per position for every compress/uncompress
/// call over the whole genome, so it is always backed by a dense bitset
/// regardless of how sparse the excluded set is (unlike the per-record
/// variant sets in `positions::PositionSet`, which auto-select).
#[derive(Clone, Debug)]
pub struct Mask {
    bits: BitVec<u64, Lsb0>,
    hash: [u8; 32],
}

impl Mask {
    pub fn new(genome_len: usize, excluded: impl IntoIterator<Item = usize>) -> Self {
        let mut bits: BitVec<u64, Lsb0> = BitVec::repeat(false, genome_len);
        let mut sorted: Vec<usize> = excluded
            .into_iter()
            .filter(|&p| p < genome_len)
            .collect();
        sorted.sort_unstable();
        sorted.dedup();
        for p in &sorted {
            bits.set(*p, true);
        }
        let hash = Self::stable_hash(&sorted);
        Self { bits, hash }
    }

    pub fn empty(genome_len: usize) -> Self {
        Self::new(genome_len, std::iter::empty())
    }

    #[inline]
    pub fn contains(&self, p: usize) -> bool {
        self.bits.get(p).map(|b| *b).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn genome_len(&self) -> usize {
        self.bits.len()
    }

    /// Stable content digest of the sorted position list, used as a
    /// compatibility tag for externally stored artifacts.
    pub fn hash(&self) -> String {
        hex_encode(&self.hash)
    }

    fn stable_hash(sorted_positions: &[usize]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for &p in sorted_positions {
            hasher.update(&(p as u64).to_le_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).unwrap();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_and_hash_stability() {
        let m1 = Mask::new(10, [3, 7]);
        let m2 = Mask::new(10, [7, 3, 3]);
        assert!(m1.contains(3));
        assert!(!m1.contains(4));
        assert_eq!(m1.hash(), m2.hash());
    }

    #[test]
    fn different_masks_hash_differently() {
        let m1 = Mask::new(10, [3]);
        let m2 = Mask::new(10, [4]);
        assert_ne!(m1.hash(), m2.hash());
    }

    #[test]
    fn empty_mask_excludes_nothing() {
        let m = Mask::empty(10);
        assert_eq!(m.len(), 0);
        for p in 0..10 {
            assert!(!m.contains(p));
        }
    }
}
