//! Converts a raw aligned sequence into a reference-compressed record and
//! back, and classifies per-sequence quality.

use std::collections::HashMap;

use crate::errs::{CoreError, CoreResult};
use crate::mask::Mask;
use crate::positions::PositionSet;
use crate::reference::Reference;

/// The five disjoint position sets a Direct record carries, one per symbol.
#[derive(Clone, Debug, Default)]
pub struct SymbolSets {
    pub a: PositionSet,
    pub c: PositionSet,
    pub g: PositionSet,
    pub t: PositionSet,
    pub n: PositionSet,
}

impl SymbolSets {
    pub fn get(&self, symbol: Symbol) -> &PositionSet {
        match symbol {
            Symbol::A => &self.a,
            Symbol::C => &self.c,
            Symbol::G => &self.g,
            Symbol::T => &self.t,
            Symbol::N => &self.n,
        }
    }

    pub fn get_mut(&mut self, symbol: Symbol) -> &mut PositionSet {
        match symbol {
            Symbol::A => &mut self.a,
            Symbol::C => &mut self.c,
            Symbol::G => &mut self.g,
            Symbol::T => &mut self.t,
            Symbol::N => &mut self.n,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &PositionSet)> {
        [
            (Symbol::A, &self.a),
            (Symbol::C, &self.c),
            (Symbol::G, &self.g),
            (Symbol::T, &self.t),
            (Symbol::N, &self.n),
        ]
        .into_iter()
    }

    pub fn total_variants(&self) -> usize {
        self.a.len() + self.c.len() + self.g.len() + self.t.len() + self.n.len()
    }

    /// None of the five sets may intersect each other or the mask.
    pub fn is_pairwise_disjoint(&self) -> bool {
        let sets = [&self.a, &self.c, &self.g, &self.t, &self.n];
        for i in 0..sets.len() {
            for j in (i + 1)..sets.len() {
                if !sets[i].is_disjoint(sets[j]) {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Symbol {
    A,
    C,
    G,
    T,
    N,
}

impl Symbol {
    fn from_base(b: u8) -> Option<Symbol> {
        match b {
            b'A' => Some(Symbol::A),
            b'C' => Some(Symbol::C),
            b'G' => Some(Symbol::G),
            b'T' => Some(Symbol::T),
            b'N' | b'-' => Some(Symbol::N),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Symbol::A => b'A',
            Symbol::C => b'C',
            Symbol::G => b'G',
            Symbol::T => b'T',
            Symbol::N => b'N',
        }
    }
}

/// IUPAC ambiguity codes other than plain N. Raw inputs carrying these are
/// folded into the N bucket of the CompressedRecord (so the record keeps
/// its fixed five-set shape), while the positions are additionally
/// recorded so the mixture test's `uncertain_base_type = M` / `N_or_M`
/// policies can examine them separately from plain no-calls.
fn is_iupac_ambiguity_code(b: u8) -> bool {
    matches!(
        b,
        b'R' | b'Y' | b'S' | b'W' | b'K' | b'M' | b'B' | b'D' | b'H' | b'V'
    )
}

#[derive(Clone, Debug)]
pub struct DirectRecord {
    pub sets: SymbolSets,
    pub invalid: bool,
    /// Positions where the raw input carried an IUPAC ambiguity code other
    /// than N/gap (see `is_iupac_ambiguity_code`); empty for invalid records.
    pub m_positions: PositionSet,
}

#[derive(Clone, Debug)]
pub struct Patch {
    pub add: SymbolSets,
    pub subtract: SymbolSets,
}

#[derive(Clone, Debug)]
pub struct PatchedRecord {
    pub consensus_id: String,
    pub patch: Patch,
}

#[derive(Clone, Debug)]
pub enum CompressedRecord {
    Direct(DirectRecord),
    Patched(PatchedRecord),
}

impl CompressedRecord {
    pub fn is_patched(&self) -> bool {
        matches!(self, CompressedRecord::Patched(_))
    }
}

/// A synthetic majority-vote record; never itself invalid.
#[derive(Clone, Debug)]
pub struct Consensus {
    pub sets: SymbolSets,
    id: String,
}

impl Consensus {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Content-hash id, stable across runs: identical variant sets always
    /// hash to the same id.
    fn compute_id(sets: &SymbolSets) -> String {
        let mut hasher = blake3::Hasher::new();
        for (_, set) in sets.iter() {
            hasher.update(b"|");
            for p in set.iter() {
                hasher.update(&p.to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn from_sets(sets: SymbolSets) -> Self {
        let id = Self::compute_id(&sets);
        Self { sets, id }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Quality {
    /// Proportion of bases in {A,C,G,T}; 1 minus the N-fraction, counting
    /// `-` as N.
    pub acgt_fraction: f64,
    pub examined_at: std::time::SystemTime,
}

pub struct Compressor<'a> {
    reference: &'a Reference,
    mask: &'a Mask,
    max_ns: usize,
}

impl<'a> Compressor<'a> {
    pub fn new(reference: &'a Reference, mask: &'a Mask, max_ns: usize) -> Self {
        Self { reference, mask, max_ns }
    }

    pub fn compress(&self, raw: &str) -> CoreResult<DirectRecord> {
        let raw = raw.as_bytes();
        if raw.len() != self.reference.len() {
            return Err(CoreError::LengthMismatch {
                expected: self.reference.len(),
                found: raw.len(),
            });
        }

        let mut buckets: [Vec<u32>; 5] = Default::default();
        let mut m_positions: Vec<u32> = Vec::new();

        for (pos, &raw_base) in raw.iter().enumerate() {
            if self.mask.contains(pos) {
                continue;
            }
            let raw_base = raw_base.to_ascii_uppercase();
            let effective = if is_iupac_ambiguity_code(raw_base) {
                m_positions.push(pos as u32);
                b'N'
            } else {
                raw_base
            };
            let symbol = Symbol::from_base(effective)
                .ok_or(CoreError::DisallowedSymbol(raw_base as char))?;
            let ref_base = self.reference.base_at(pos);
            if effective != ref_base {
                buckets[symbol_index(symbol)].push(pos as u32);
            }
        }

        let n_count = buckets[symbol_index(Symbol::N)].len();
        let l = self.reference.len();
        if n_count > self.max_ns {
            return Ok(DirectRecord {
                sets: SymbolSets::default(),
                invalid: true,
                m_positions: PositionSet::empty(),
            });
        }

        let [a, c, g, t, n] = buckets;
        let sets = SymbolSets {
            a: PositionSet::from_positions(a, l),
            c: PositionSet::from_positions(c, l),
            g: PositionSet::from_positions(g, l),
            t: PositionSet::from_positions(t, l),
            n: PositionSet::from_positions(n, l),
        };
        Ok(DirectRecord {
            sets,
            invalid: false,
            m_positions: PositionSet::from_positions(m_positions, l),
        })
    }

    pub fn examine(&self, raw: &str) -> CoreResult<Quality> {
        let raw = raw.as_bytes();
        if raw.len() != self.reference.len() {
            return Err(CoreError::LengthMismatch {
                expected: self.reference.len(),
                found: raw.len(),
            });
        }
        let acgt = raw
            .iter()
            .filter(|b| matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T'))
            .count();
        Ok(Quality {
            acgt_fraction: acgt as f64 / raw.len() as f64,
            examined_at: std::time::SystemTime::now(),
        })
    }

    /// Resolves a record (Direct or Patched) to its Direct form, fetching
    /// the consensus from `consensi` when needed.
    pub fn decode_direct<'c, S: std::hash::BuildHasher>(
        &self,
        record: &'c CompressedRecord,
        consensi: &'c HashMap<String, Consensus, S>,
    ) -> CoreResult<std::borrow::Cow<'c, DirectRecord>> {
        match record {
            CompressedRecord::Direct(d) => Ok(std::borrow::Cow::Borrowed(d)),
            CompressedRecord::Patched(p) => {
                let consensus = consensi
                    .get(&p.consensus_id)
                    .ok_or_else(|| CoreError::UnknownConsensus(p.consensus_id.clone()))?;
                Ok(std::borrow::Cow::Owned(apply_patch(
                    &p.patch,
                    consensus,
                    self.reference.len(),
                )))
            }
        }
    }

    pub fn uncompress<S: std::hash::BuildHasher>(
        &self,
        record: &CompressedRecord,
        consensi: &HashMap<String, Consensus, S>,
    ) -> CoreResult<String> {
        let direct = self.decode_direct(record, consensi)?;
        if direct.invalid {
            return Err(CoreError::InvalidSequence);
        }
        let mut out = self.reference.as_bytes().to_vec();
        for p in 0..out.len() {
            if self.mask.contains(p) {
                out[p] = b'N';
            }
        }
        for (symbol, set) in direct.sets.iter() {
            for p in set.iter() {
                out[p as usize] = symbol.as_byte();
            }
        }
        Ok(String::from_utf8(out).expect("reference bytes are ASCII"))
    }
}

fn symbol_index(s: Symbol) -> usize {
    match s {
        Symbol::A => 0,
        Symbol::C => 1,
        Symbol::G => 2,
        Symbol::T => 3,
        Symbol::N => 4,
    }
}

/// `(consensus[s] ∪ add[s]) \ subtract[s]` per symbol.
fn apply_patch(patch: &Patch, consensus: &Consensus, genome_len: usize) -> DirectRecord {
    let mut sets = SymbolSets::default();
    for symbol in [Symbol::A, Symbol::C, Symbol::G, Symbol::T, Symbol::N] {
        let unioned = consensus
            .sets
            .get(symbol)
            .union(patch.add.get(symbol), genome_len);
        let resolved = unioned.difference(patch.subtract.get(symbol), genome_len);
        *sets.get_mut(symbol) = resolved;
    }
    DirectRecord { sets, invalid: false, m_positions: PositionSet::empty() }
}

/// Minimum add/subtract sets such that `apply_patch(diff(m, c), c) == m`.
pub fn diff(member: &DirectRecord, consensus: &Consensus, genome_len: usize) -> Patch {
    let mut add = SymbolSets::default();
    let mut subtract = SymbolSets::default();
    for symbol in [Symbol::A, Symbol::C, Symbol::G, Symbol::T, Symbol::N] {
        let m_set = member.sets.get(symbol);
        let c_set = consensus.sets.get(symbol);
        *add.get_mut(symbol) = m_set.difference(c_set, genome_len);
        *subtract.get_mut(symbol) = c_set.difference(m_set, genome_len);
    }
    Patch { add, subtract }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(mask_positions: &[usize]) -> (Reference, Mask) {
        let reference = Reference::new("ACTG").unwrap();
        let mask = Mask::new(4, mask_positions.iter().copied());
        (reference, mask)
    }

    #[test]
    fn identical_sequence_has_no_variants() {
        let (reference, mask) = setup(&[]);
        let compressor = Compressor::new(&reference, &mask, 2);
        let rec = compressor.compress("ACTG").unwrap();
        assert_eq!(rec.sets.total_variants(), 0);
        assert!(!rec.invalid);
    }

    #[test]
    fn masked_position_difference_is_not_recorded() {
        let (reference, mask) = setup(&[3]);
        let compressor = Compressor::new(&reference, &mask, 2);
        let rec = compressor.compress("ACTA").unwrap();
        // position 3 is masked, so the 'A' substitution there is not recorded
        assert_eq!(rec.sets.total_variants(), 0);
    }

    #[test]
    fn n_base_is_recorded_and_roundtrips() {
        let (reference, mask) = setup(&[]);
        let compressor = Compressor::new(&reference, &mask, 2);
        let rec = compressor.compress("NCTG").unwrap();
        assert_eq!(rec.sets.n.to_sorted_vec(), vec![0]);
        let consensi = HashMap::new();
        let raw = compressor
            .uncompress(&CompressedRecord::Direct(rec), &consensi)
            .unwrap();
        assert_eq!(raw, "NCTG");
    }

    #[test]
    fn excess_n_density_marks_record_invalid() {
        let (reference, mask) = setup(&[]);
        let compressor = Compressor::new(&reference, &mask, 2);
        let rec = compressor.compress("NNNN").unwrap();
        assert!(rec.invalid);
        let consensi = HashMap::new();
        let err = compressor
            .uncompress(&CompressedRecord::Direct(rec), &consensi)
            .unwrap_err();
        assert_eq!(err.kind(), crate::errs::ErrorKind::InvalidSequence);
    }

    #[test]
    fn length_mismatch_rejected() {
        let (reference, mask) = setup(&[]);
        let compressor = Compressor::new(&reference, &mask, 2);
        assert!(compressor.compress("ACT").is_err());
    }

    #[test]
    fn patch_roundtrip() {
        let (reference, mask) = setup(&[]);
        let compressor = Compressor::new(&reference, &mask, 4);
        let member = compressor.compress("ACTA").unwrap();
        let consensus = Consensus::from_sets(SymbolSets::default());
        let patch = diff(&member, &consensus, 4);
        let mut consensi = HashMap::new();
        consensi.insert(consensus.id().to_string(), consensus.clone());
        let patched = CompressedRecord::Patched(PatchedRecord {
            consensus_id: consensus.id().to_string(),
            patch,
        });
        let direct = compressor.decode_direct(&patched, &consensi).unwrap();
        assert_eq!(direct.sets.total_variants(), member.sets.total_variants());
        let raw = compressor.uncompress(&patched, &consensi).unwrap();
        assert_eq!(raw, "ACTA");
    }
}
