//! Ungapped multiple-sequence-alignment helper shared by the mixture test
//! and the `/multi-sequence-alignment` service surface.

use crate::compressor::DirectRecord;
use crate::reference::Reference;

#[inline]
pub fn symbol_at(record: &DirectRecord, pos: u32, reference: &Reference) -> u8 {
    for (symbol, set) in record.sets.iter() {
        if set.contains(pos) {
            return symbol.as_byte();
        }
    }
    reference.base_at(pos as usize)
}

/// Positions at which at least two of `members` carry a different symbol.
/// Only positions where some member deviates from the reference are
/// examined: any position entirely
/// unmentioned by every member's variant buckets is, by construction,
/// reference in all of them, hence never a variant site.
pub fn variant_positions(
    members: &[&DirectRecord],
    reference: &Reference,
) -> Vec<u32> {
    let genome_len = reference.len();
    let mut candidates = crate::positions::PositionSet::empty();
    for member in members {
        for (_, set) in member.sets.iter() {
            candidates = candidates.union(set, genome_len);
        }
    }

    let mut variants = Vec::new();
    for p in candidates.iter() {
        let mut symbols = members.iter().map(|m| symbol_at(m, p, reference));
        let first = symbols.next().expect("at least one member");
        if symbols.any(|s| s != first) {
            variants.push(p);
        }
    }
    variants
}

/// The aligned string for one member over the (already sorted) variant
/// positions.
pub fn aligned_string(
    record: &DirectRecord,
    variant_positions: &[u32],
    reference: &Reference,
) -> String {
    variant_positions
        .iter()
        .map(|&p| symbol_at(record, p, reference) as char)
        .collect()
}
