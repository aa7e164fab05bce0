//! Pairwise SNP distance and the one-vs-many parallel neighbour search.

use rayon::prelude::*;

use crate::compressor::{Compressor, DirectRecord, Symbol};
use crate::errs::CoreResult;
use crate::store::Store;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NOverlap {
    pub n_self: usize,
    pub n_other: usize,
    pub n_both: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeighbourResult {
    pub guid: String,
    pub distance: usize,
    pub overlap: NOverlap,
}

/// Set-algebra distance between two already-decoded Direct records.
/// `None` if either is invalid or the true distance exceeds `cutoff`.
/// Cost is O(|variants|), independent of genome length, because every
/// operation is a merge over sorted position lists.
pub fn direct_distance(
    a: &DirectRecord,
    b: &DirectRecord,
    genome_len: usize,
    cutoff: usize,
) -> Option<(usize, NOverlap)> {
    if a.invalid || b.invalid {
        return None;
    }

    let mut differing = crate::positions::PositionSet::empty();
    for symbol in [Symbol::A, Symbol::C, Symbol::G, Symbol::T] {
        let a_s = a.sets.get(symbol);
        let b_s = b.sets.get(symbol);
        let nonn_a = a_s.difference(&b.sets.n, genome_len);
        let nonn_b = b_s.difference(&a.sets.n, genome_len);
        let xor = nonn_a.symmetric_difference(&nonn_b, genome_len);
        differing = differing.union(&xor, genome_len);
    }

    let dist = differing.len();
    if dist > cutoff {
        return None;
    }

    let n_self = a.sets.n.len();
    let n_other = b.sets.n.len();
    let n_both = a.sets.n.union(&b.sets.n, genome_len).len();
    Some((dist, NOverlap { n_self, n_other, n_both }))
}

pub struct Comparator {
    genome_len: usize,
}

impl Comparator {
    pub fn new(genome_len: usize) -> Self {
        Self { genome_len }
    }

    pub fn distance(
        &self,
        compressor: &Compressor,
        store: &Store,
        a: &str,
        b: &str,
        cutoff: usize,
    ) -> CoreResult<Option<usize>> {
        let a_direct = compressor.decode_direct(store.load(a)?, store.consensi())?;
        let b_direct = compressor.decode_direct(store.load(b)?, store.consensi())?;
        Ok(direct_distance(&a_direct, &b_direct, self.genome_len, cutoff).map(|(d, _)| d))
    }

    /// Runs `distance(guid, h, cutoff)` against every candidate, using a
    /// bounded worker pool over disjoint chunks of the candidate list.
    /// Ordering of the output is not guaranteed.
    pub fn compare_one_to_many(
        &self,
        compressor: &Compressor,
        store: &Store,
        guid: &str,
        candidates: &[String],
        cutoff: usize,
        num_workers: usize,
    ) -> CoreResult<Vec<NeighbourResult>> {
        let seed = compressor.decode_direct(store.load(guid)?, store.consensi())?.into_owned();
        if seed.invalid {
            return Ok(Vec::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .build()
            .expect("thread pool construction");

        let genome_len = self.genome_len;
        let results: Vec<NeighbourResult> = pool.install(|| {
            candidates
                .par_iter()
                .filter(|h| h.as_str() != guid)
                .filter_map(|h| {
                    let record = store.load(h).ok()?;
                    let other = compressor.decode_direct(record, store.consensi()).ok()?;
                    direct_distance(&seed, &other, genome_len, cutoff).map(|(dist, overlap)| {
                        NeighbourResult { guid: h.clone(), distance: dist, overlap }
                    })
                })
                .collect()
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::Mask;
    use crate::positions::PositionSet;
    use crate::reference::Reference;

    #[test]
    fn symmetry_and_n_tolerance() {
        let reference = Reference::new("ACTG").unwrap();
        let mask = Mask::empty(4);
        let compressor = Compressor::new(&reference, &mask, 4);
        let a = compressor.compress("ACTG").unwrap();
        let b = compressor.compress("NCTG").unwrap();
        let (d_ab, _) = direct_distance(&a, &b, 4, 10).unwrap();
        let (d_ba, _) = direct_distance(&b, &a, 4, 10).unwrap();
        assert_eq!(d_ab, 0);
        assert_eq!(d_ab, d_ba);

        // replacing a[0] with any symbol shouldn't increase distance since b[0]=N
        let a2 = compressor.compress("GCTG").unwrap();
        let (d_a2b, _) = direct_distance(&a2, &b, 4, 10).unwrap();
        assert_eq!(d_a2b, 0);
    }

    #[test]
    fn threshold_honesty_across_worker_counts() {
        let reference = Reference::new("ACTGACTG").unwrap();
        let mask = Mask::empty(8);
        let compressor = Compressor::new(&reference, &mask, 4);
        let mut store = Store::new(8, 10);
        let seqs = [
            ("g", "ACTGACTG"),
            ("near1", "ACTAACTG"), // dist 1
            ("near2", "ACTAACTA"), // dist 2
            ("far", "TCTGTCTG"),   // dist 2
            ("distant", "TTTTTTTT"), // dist 8
        ];
        for (g, s) in seqs {
            let rec = compressor.compress(s).unwrap();
            let q = compressor.examine(s).unwrap();
            store.persist(g, rec, PositionSet::empty(), q).unwrap();
        }
        let comparator = Comparator::new(8);
        let candidates: Vec<String> =
            store.guids().filter(|g| *g != "g").map(|s| s.to_string()).collect();

        for workers in [1, 2, 4] {
            let mut results = comparator
                .compare_one_to_many(&compressor, &store, "g", &candidates, 2, workers)
                .unwrap();
            results.sort_by(|a, b| a.guid.cmp(&b.guid));
            let guids: Vec<&str> = results.iter().map(|r| r.guid.as_str()).collect();
            assert_eq!(guids, vec!["near1", "near2"]);
        }
    }
}
