//! `PositionSet`: the dominant datum in this crate is "a set of positions in
//! `[0, L)`". A sorted vector is cheap for the handful of variants a typical
//! sample carries; a bitset is cheap once a set covers a sizeable fraction of
//! the genome. `PositionSet` auto-selects between the two based on
//! cardinality, transparently to callers.

use bitvec::prelude::{BitVec, Lsb0};

/// Once a sparse set holds more than `L / DENSIFY_DIVISOR` members, it is
/// converted to a dense bitset: at that density, a `Vec<u32>` costs more
/// bytes than one bit per genome position.
const DENSIFY_DIVISOR: usize = 8;

#[derive(Clone, Debug)]
pub enum PositionSet {
    Sparse(Vec<u32>),
    Dense(BitVec<u64, Lsb0>),
}

impl Default for PositionSet {
    fn default() -> Self {
        PositionSet::Sparse(Vec::new())
    }
}

impl PositionSet {
    pub fn empty() -> Self {
        PositionSet::Sparse(Vec::new())
    }

    /// Builds a set from an arbitrary (not necessarily sorted or deduped)
    /// iterator of positions, choosing the cheaper representation for the
    /// given genome length.
    pub fn from_positions<I: IntoIterator<Item = u32>>(
        positions: I,
        genome_len: usize,
    ) -> Self {
        let mut sorted: Vec<u32> = positions.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();
        Self::from_sorted_dedup(sorted, genome_len)
    }

    fn from_sorted_dedup(sorted: Vec<u32>, genome_len: usize) -> Self {
        if Self::should_densify(sorted.len(), genome_len) {
            let mut bits: BitVec<u64, Lsb0> = BitVec::repeat(false, genome_len);
            for p in sorted {
                bits.set(p as usize, true);
            }
            PositionSet::Dense(bits)
        } else {
            PositionSet::Sparse(sorted)
        }
    }

    fn should_densify(cardinality: usize, genome_len: usize) -> bool {
        genome_len > 0 && cardinality > genome_len / DENSIFY_DIVISOR
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PositionSet::Sparse(v) => v.is_empty(),
            PositionSet::Dense(b) => !b.any(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PositionSet::Sparse(v) => v.len(),
            PositionSet::Dense(b) => b.count_ones(),
        }
    }

    pub fn contains(&self, p: u32) -> bool {
        match self {
            PositionSet::Sparse(v) => v.binary_search(&p).is_ok(),
            PositionSet::Dense(b) => {
                b.get(p as usize).map(|b| *b).unwrap_or(false)
            }
        }
    }

    pub fn insert(&mut self, p: u32, genome_len: usize) {
        match self {
            PositionSet::Sparse(v) => {
                if let Err(idx) = v.binary_search(&p) {
                    v.insert(idx, p);
                }
                if Self::should_densify(v.len(), genome_len) {
                    let taken = std::mem::take(v);
                    *self = Self::from_sorted_dedup(taken, genome_len);
                }
            }
            PositionSet::Dense(b) => {
                if (p as usize) < b.len() {
                    b.set(p as usize, true);
                }
            }
        }
    }

    /// Sorted ascending iterator over member positions.
    pub fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            PositionSet::Sparse(v) => Box::new(v.iter().copied()),
            PositionSet::Dense(b) => {
                Box::new(b.iter_ones().map(|i| i as u32))
            }
        }
    }

    pub fn to_sorted_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    pub fn union(&self, other: &Self, genome_len: usize) -> Self {
        Self::from_sorted_dedup(
            merge_sorted(self.iter(), other.iter(), MergeOp::Union),
            genome_len,
        )
    }

    /// `self \ other`
    pub fn difference(&self, other: &Self, genome_len: usize) -> Self {
        Self::from_sorted_dedup(
            merge_sorted(self.iter(), other.iter(), MergeOp::Difference),
            genome_len,
        )
    }

    pub fn intersection(&self, other: &Self, genome_len: usize) -> Self {
        Self::from_sorted_dedup(
            merge_sorted(self.iter(), other.iter(), MergeOp::Intersection),
            genome_len,
        )
    }

    pub fn symmetric_difference(&self, other: &Self, genome_len: usize) -> Self {
        Self::from_sorted_dedup(
            merge_sorted(self.iter(), other.iter(), MergeOp::SymmetricDifference),
            genome_len,
        )
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        let (mut a, mut b) = (self.iter().peekable(), other.iter().peekable());
        loop {
            match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => {
                    if x == y {
                        return false;
                    } else if x < y {
                        a.next();
                    } else {
                        b.next();
                    }
                }
                _ => return true,
            }
        }
    }
}

enum MergeOp {
    Union,
    Difference,
    Intersection,
    SymmetricDifference,
}

fn merge_sorted(
    a: Box<dyn Iterator<Item = u32> + '_>,
    b: Box<dyn Iterator<Item = u32> + '_>,
    op: MergeOp,
) -> Vec<u32> {
    let mut a = a.peekable();
    let mut b = b.peekable();
    let mut out = Vec::new();
    loop {
        match (a.peek(), b.peek()) {
            (Some(&x), Some(&y)) => {
                if x == y {
                    match op {
                        MergeOp::Union | MergeOp::Intersection => out.push(x),
                        MergeOp::Difference | MergeOp::SymmetricDifference => {}
                    }
                    a.next();
                    b.next();
                } else if x < y {
                    match op {
                        MergeOp::Union
                        | MergeOp::Difference
                        | MergeOp::SymmetricDifference => out.push(x),
                        MergeOp::Intersection => {}
                    }
                    a.next();
                } else {
                    match op {
                        MergeOp::Union | MergeOp::SymmetricDifference => {
                            out.push(y)
                        }
                        MergeOp::Difference | MergeOp::Intersection => {}
                    }
                    b.next();
                }
            }
            (Some(&x), None) => {
                match op {
                    MergeOp::Union
                    | MergeOp::Difference
                    | MergeOp::SymmetricDifference => out.push(x),
                    MergeOp::Intersection => {}
                }
                a.next();
            }
            (None, Some(&y)) => {
                match op {
                    MergeOp::Union | MergeOp::SymmetricDifference => out.push(y),
                    MergeOp::Difference | MergeOp::Intersection => {}
                }
                b.next();
            }
            (None, None) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_roundtrip() {
        let s = PositionSet::from_positions([5u32, 1, 3, 1], 1000);
        assert_eq!(s.to_sorted_vec(), vec![1, 3, 5]);
        assert!(matches!(s, PositionSet::Sparse(_)));
    }

    #[test]
    fn densifies_past_threshold() {
        let many: Vec<u32> = (0..200).collect();
        let s = PositionSet::from_positions(many, 400);
        assert!(matches!(s, PositionSet::Dense(_)));
    }

    #[test]
    fn set_algebra() {
        let l = 100;
        let a = PositionSet::from_positions([1u32, 2, 3, 4], l);
        let b = PositionSet::from_positions([3u32, 4, 5], l);
        assert_eq!(a.union(&b, l).to_sorted_vec(), vec![1, 2, 3, 4, 5]);
        assert_eq!(a.difference(&b, l).to_sorted_vec(), vec![1, 2]);
        assert_eq!(a.intersection(&b, l).to_sorted_vec(), vec![3, 4]);
        assert_eq!(
            a.symmetric_difference(&b, l).to_sorted_vec(),
            vec![1, 2, 5]
        );
    }

    #[test]
    fn disjointness() {
        let l = 10;
        let a = PositionSet::from_positions([1u32, 2], l);
        let b = PositionSet::from_positions([3u32, 4], l);
        let c = PositionSet::from_positions([2u32, 5], l);
        assert!(a.is_disjoint(&b));
        assert!(!a.is_disjoint(&c));
    }
}
