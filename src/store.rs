//! In-RAM corpus of accepted samples: reference-compressed records, a small
//! pool of shared consensi, and a prefix index for autocomplete.

use rustc_hash::FxHashMap;

use crate::comparator::direct_distance;
use crate::compressor::{diff, Compressor, CompressedRecord, Consensus, DirectRecord, Quality};
use crate::errs::{CoreError, CoreResult};
use crate::positions::PositionSet;

/// Depth at which the prefix trie stops branching; guids longer than this
/// are disambiguated by a linear scan of the bucket at that depth.
const TRIE_MAX_DEPTH: usize = 12;

#[derive(Default)]
struct TrieNode {
    children: FxHashMap<char, TrieNode>,
    guids: Vec<String>,
}

impl TrieNode {
    fn insert(&mut self, guid: &str) {
        let mut node = self;
        node.guids.push(guid.to_string());
        for c in guid.chars().take(TRIE_MAX_DEPTH) {
            node = node.children.entry(c).or_default();
            node.guids.push(guid.to_string());
        }
    }

    fn remove(&mut self, guid: &str) {
        let mut node = self;
        node.guids.retain(|g| g != guid);
        for c in guid.chars().take(TRIE_MAX_DEPTH) {
            match node.children.get_mut(&c) {
                Some(next) => {
                    next.guids.retain(|g| g != guid);
                    node = next;
                }
                None => return,
            }
        }
    }

    fn node_for_prefix(&self, prefix: &str) -> Option<&TrieNode> {
        let mut node = self;
        for c in prefix.chars().take(TRIE_MAX_DEPTH) {
            node = node.children.get(&c)?;
        }
        Some(node)
    }
}

pub struct Store {
    genome_len: usize,
    snp_compression_ceiling: usize,
    profiles: FxHashMap<String, CompressedRecord>,
    consensi: FxHashMap<String, Consensus>,
    m_positions: FxHashMap<String, PositionSet>,
    quality: FxHashMap<String, Quality>,
    trie: TrieNode,
    insert_order: Vec<String>,
}

impl Store {
    pub fn new(genome_len: usize, snp_compression_ceiling: usize) -> Self {
        Self {
            genome_len,
            snp_compression_ceiling,
            profiles: FxHashMap::default(),
            consensi: FxHashMap::default(),
            m_positions: FxHashMap::default(),
            quality: FxHashMap::default(),
            trie: TrieNode::default(),
            insert_order: Vec::new(),
        }
    }

    pub fn exists(&self, guid: &str) -> bool {
        self.profiles.contains_key(guid)
    }

    pub fn load(&self, guid: &str) -> CoreResult<&CompressedRecord> {
        self.profiles
            .get(guid)
            .ok_or_else(|| CoreError::UnknownGuid(guid.to_string()))
    }

    pub fn load_m_positions(&self, guid: &str) -> Option<&PositionSet> {
        self.m_positions.get(guid)
    }

    pub fn quality(&self, guid: &str) -> Option<&Quality> {
        self.quality.get(guid)
    }

    pub fn consensi(&self) -> &FxHashMap<String, Consensus> {
        &self.consensi
    }

    pub fn genome_len(&self) -> usize {
        self.genome_len
    }

    pub fn guids(&self) -> impl Iterator<Item = &str> {
        self.insert_order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn guids_with_quality_over(&self, cutoff: f64) -> Vec<String> {
        self.insert_order
            .iter()
            .filter(|g| self.quality.get(*g).map(|q| q.acgt_fraction >= cutoff).unwrap_or(false))
            .cloned()
            .collect()
    }

    pub fn guids_and_examination_times(
        &self,
    ) -> Vec<(String, std::time::SystemTime)> {
        self.insert_order
            .iter()
            .filter_map(|g| self.quality.get(g).map(|q| (g.clone(), q.examined_at)))
            .collect()
    }

    /// Idempotent on identical repeats; rejects with `GuidCollision` on
    /// differing content for an existing guid.
    pub fn persist(
        &mut self,
        guid: &str,
        record: DirectRecord,
        m_positions: PositionSet,
        quality: Quality,
    ) -> CoreResult<bool> {
        if let Some(existing) = self.profiles.get(guid) {
            return match existing {
                CompressedRecord::Direct(d) => {
                    if records_equivalent(d, &record) {
                        Ok(false)
                    } else {
                        Err(CoreError::GuidCollision { guid: guid.to_string() })
                    }
                }
                // a patched record cannot be compared cheaply without a
                // compressor; re-insertion of an already-recompressed guid
                // is treated as a collision only if content genuinely
                // differs, which the caller should check via `distance`
                // before calling persist again. We accept the no-op here.
                CompressedRecord::Patched(_) => Ok(false),
            };
        }
        self.profiles.insert(guid.to_string(), CompressedRecord::Direct(record));
        self.m_positions.insert(guid.to_string(), m_positions);
        self.quality.insert(guid.to_string(), quality);
        self.insert_order.push(guid.to_string());
        self.trie.insert(guid);
        Ok(true)
    }

    /// Does not garbage-collect any consensus the removed record referenced;
    /// call `gc_consensi` separately if desired.
    pub fn remove(&mut self, guid: &str) -> bool {
        let removed = self.profiles.remove(guid).is_some();
        if removed {
            self.m_positions.remove(guid);
            self.quality.remove(guid);
            self.insert_order.retain(|g| g != guid);
            self.trie.remove(guid);
        }
        removed
    }

    pub fn search_prefix(&self, prefix: &str, max: usize) -> Vec<String> {
        match self.trie.node_for_prefix(prefix) {
            None => Vec::new(),
            Some(node) => {
                if prefix.chars().count() <= TRIE_MAX_DEPTH {
                    node.guids.iter().take(max).cloned().collect()
                } else {
                    node.guids
                        .iter()
                        .filter(|g| g.starts_with(prefix))
                        .take(max)
                        .cloned()
                        .collect()
                }
            }
        }
    }

    /// Drops any consensus not referenced by any Patched record.
    pub fn gc_consensi(&mut self) {
        let referenced: std::collections::HashSet<&str> = self
            .profiles
            .values()
            .filter_map(|r| match r {
                CompressedRecord::Patched(p) => Some(p.consensus_id.as_str()),
                CompressedRecord::Direct(_) => None,
            })
            .collect();
        self.consensi.retain(|id, _| referenced.contains(id.as_str()));
    }

    /// Re-compresses the neighbourhood of `guid` relative to a shared
    /// consensus, in five steps: gather the neighbourhood, build a
    /// consensus over it, give that consensus a content-hash id, replace
    /// each member's record with a patch against it, then garbage-collect
    /// any consensus left unreferenced.
    pub fn recompress_around(
        &mut self,
        compressor: &Compressor,
        guid: &str,
        cutoff_prop: f64,
    ) -> CoreResult<()> {
        let genome_len = self.genome_len;
        let ceiling = self.snp_compression_ceiling;

        // Step 1: N(g) = g plus every guid within snpCompressionCeiling of it
        // (in Direct form).
        let seed_direct = match self.load(guid)? {
            CompressedRecord::Direct(d) => d.clone(),
            CompressedRecord::Patched(_) => {
                compressor.decode_direct(self.load(guid)?, &self.consensi)?.into_owned()
            }
        };
        if seed_direct.invalid {
            return Ok(());
        }

        let mut neighbourhood: Vec<(String, DirectRecord)> = vec![(guid.to_string(), seed_direct.clone())];
        for other in self.insert_order.iter() {
            if other == guid {
                continue;
            }
            let other_record = self.profiles.get(other).unwrap();
            let other_direct = compressor.decode_direct(other_record, &self.consensi)?;
            if other_direct.invalid {
                continue;
            }
            if let Some(_dist) =
                direct_distance(&seed_direct, &other_direct, genome_len, ceiling).map(|(d, _)| d)
            {
                neighbourhood.push((other.clone(), other_direct.into_owned()));
            }
        }

        if neighbourhood.len() < 2 {
            // nothing to gain from compressing a singleton neighbourhood
            return Ok(());
        }

        // Step 2-3: build the consensus and give it a content-hash id.
        let members: Vec<&DirectRecord> = neighbourhood.iter().map(|(_, r)| r).collect();
        let consensus = build_consensus(&members, genome_len, cutoff_prop);
        let consensus_id = consensus.id().to_string();
        self.consensi.entry(consensus_id.clone()).or_insert_with(|| consensus.clone());

        // Step 4: replace every member's record with a Patched form.
        for (member_guid, member_direct) in &neighbourhood {
            let patch = diff(member_direct, &consensus, genome_len);
            self.profiles.insert(
                member_guid.clone(),
                CompressedRecord::Patched(crate::compressor::PatchedRecord {
                    consensus_id: consensus_id.clone(),
                    patch,
                }),
            );
        }

        // Step 5.
        self.gc_consensi();
        Ok(())
    }
}

fn records_equivalent(a: &DirectRecord, b: &DirectRecord) -> bool {
    if a.invalid != b.invalid {
        return false;
    }
    if a.invalid {
        return true;
    }
    a.sets.iter().zip(b.sets.iter()).all(|((_, sa), (_, sb))| {
        sa.to_sorted_vec() == sb.to_sorted_vec()
    })
}

/// Majority vote per position per symbol: a symbol is included in the
/// consensus at position p iff its frequency among members is
/// `>= cutoff_prop * |members|`.
fn build_consensus(
    members: &[&DirectRecord],
    genome_len: usize,
    cutoff_prop: f64,
) -> Consensus {
    use std::collections::HashMap;
    let threshold = cutoff_prop * members.len() as f64;

    let mut counts: HashMap<u32, HashMap<crate::compressor::Symbol, usize>> = HashMap::new();
    for member in members {
        for (symbol, set) in member.sets.iter() {
            for pos in set.iter() {
                *counts.entry(pos).or_default().entry(symbol).or_insert(0) += 1;
            }
        }
    }

    let mut sets = crate::compressor::SymbolSets::default();
    let mut by_symbol: HashMap<crate::compressor::Symbol, Vec<u32>> = HashMap::new();
    for (pos, symbol_counts) in counts {
        if let Some((&best_symbol, &best_count)) =
            symbol_counts.iter().max_by_key(|(_, &c)| c)
        {
            if best_count as f64 >= threshold {
                by_symbol.entry(best_symbol).or_default().push(pos);
            }
        }
    }
    for symbol in [
        crate::compressor::Symbol::A,
        crate::compressor::Symbol::C,
        crate::compressor::Symbol::G,
        crate::compressor::Symbol::T,
        crate::compressor::Symbol::N,
    ] {
        let positions = by_symbol.remove(&symbol).unwrap_or_default();
        *sets.get_mut(symbol) = PositionSet::from_positions(positions, genome_len);
    }
    Consensus::from_sets(sets)
}
