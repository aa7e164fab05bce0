//! `NeighbourFindService`: the value type that owns a `Store`, a
//! `Comparator`, one `ClusterGraph` per configured policy and a handle to
//! the durable collaborator. Implements the insert-driven update loop and
//! the single-writer/multi-reader discipline the whole service runs
//! under.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::comparator::{Comparator, NeighbourResult};
use crate::compressor::{Compressor, DirectRecord, Quality};
use crate::durable::{DurableStore, LinkFormat, LinkRecord};
use crate::errs::{CoreError, CoreResult};
use crate::graph::{assess_mixture, ClusterGraph, ClusterPolicy, MixturePValues, UncertainBaseType};
use crate::mask::Mask;
use crate::reference::Reference;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { links: usize },
    AlreadyPresent,
    /// accepted, but stored with `invalid=true`; never compared against
    /// other samples.
    Invalid,
}

struct Inner {
    store: Store,
    graphs: HashMap<String, ClusterGraph>,
    insert_count: usize,
}

pub struct NeighbourFindService {
    reference: Reference,
    mask: Mask,
    max_ns: usize,
    snp_ceiling: usize,
    recompress_frequency: usize,
    recompress_cutoff_prop: f64,
    num_workers: usize,
    comparator: Comparator,
    durable: Arc<dyn DurableStore>,
    policy_order: Vec<String>,
    inner: RwLock<Inner>,
}

impl NeighbourFindService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reference: Reference,
        mask: Mask,
        max_ns: usize,
        snp_ceiling: usize,
        snp_compression_ceiling: usize,
        recompress_frequency: usize,
        recompress_cutoff_prop: f64,
        policies: Vec<ClusterPolicy>,
        durable: Arc<dyn DurableStore>,
        num_workers: usize,
    ) -> Self {
        let genome_len = reference.len();
        let policy_order = policies.iter().map(|p| p.name.clone()).collect();
        let graphs = policies
            .into_iter()
            .map(|p| (p.name.clone(), ClusterGraph::new(p)))
            .collect();
        Self {
            reference,
            mask,
            max_ns,
            snp_ceiling,
            recompress_frequency,
            recompress_cutoff_prop,
            num_workers: num_workers.max(1),
            comparator: Comparator::new(genome_len),
            durable,
            policy_order,
            inner: RwLock::new(Inner {
                store: Store::new(genome_len, snp_compression_ceiling),
                graphs,
                insert_count: 0,
            }),
        }
    }

    fn compressor(&self) -> Compressor<'_> {
        Compressor::new(&self.reference, &self.mask, self.max_ns)
    }

    /// Runs the full insert-driven update loop. Any failure from the
    /// comparison step onward rolls the RAM insert back so the Store never
    /// diverges from the last durably-persisted state.
    pub fn insert(&self, guid: &str, raw: &str) -> CoreResult<InsertOutcome> {
        let compressor = self.compressor();
        let record = compressor.compress(raw)?;
        let quality = compressor.examine(raw)?;
        let m_positions = record.m_positions.clone();
        let invalid = record.invalid;
        let record_value = direct_to_value(&record);

        let mut inner = self.inner.write();
        if inner.store.exists(guid) {
            inner.store.persist(guid, record, m_positions, quality)?;
            return Ok(InsertOutcome::AlreadyPresent);
        }

        inner.store.persist(guid, record, m_positions, quality.clone())?;
        if let Err(e) = self.durable.put_compressed(guid, &record_value) {
            inner.store.remove(guid);
            return Err(e);
        }

        if invalid {
            return Ok(InsertOutcome::Invalid);
        }

        match self.continue_insert(&mut inner, &compressor, guid, &quality) {
            Ok(results) => Ok(InsertOutcome::Inserted { links: results.len() }),
            Err(e) => {
                inner.store.remove(guid);
                Err(e)
            }
        }
    }

    fn continue_insert(
        &self,
        inner: &mut Inner,
        compressor: &Compressor,
        guid: &str,
        quality: &Quality,
    ) -> CoreResult<Vec<NeighbourResult>> {
        self.durable.put_annotation(guid, "quality", &quality_to_value(quality))?;

        let candidates: Vec<String> =
            inner.store.guids().filter(|g| *g != guid).map(String::from).collect();
        let results = self.comparator.compare_one_to_many(
            compressor,
            &inner.store,
            guid,
            &candidates,
            self.snp_ceiling,
            self.num_workers,
        )?;

        let mut link_map = HashMap::new();
        for r in &results {
            link_map.insert(
                r.guid.clone(),
                LinkRecord {
                    distance: r.distance,
                    n1: r.overlap.n_self,
                    n2: r.overlap.n_other,
                    n_both: r.overlap.n_both,
                },
            );
        }
        self.durable.append_links(guid, &link_map)?;

        inner.insert_count += 1;
        if self.recompress_frequency > 0 && inner.insert_count % self.recompress_frequency == 0 {
            inner.store.recompress_around(compressor, guid, self.recompress_cutoff_prop)?;
        }

        for policy_name in &self.policy_order {
            let graph = inner
                .graphs
                .get_mut(policy_name)
                .expect("a graph exists for every configured policy");
            let threshold = graph.policy().snv_threshold;
            let edges: Vec<(String, usize)> = results
                .iter()
                .filter(|r| r.distance <= threshold)
                .map(|r| (r.guid.clone(), r.distance))
                .collect();
            let mutated = graph.add_sample(guid, &edges);
            if !mutated {
                continue;
            }

            let changed_clusters = graph.cluster_containing(guid);
            let policy = graph.policy().clone();
            let mut rng = rand::thread_rng();
            for cluster in &changed_clusters {
                let mixture = assess_mixture(
                    &cluster.members,
                    &inner.store,
                    compressor,
                    &self.reference,
                    &self.mask,
                    &policy,
                    &mut rng,
                )?;
                for (member, result) in mixture {
                    graph.set_mixed(&member, result.is_mixed(policy.mixture_criterion, policy.cutoff));
                }
            }

            let snapshot = cluster_snapshot_value(graph);
            self.durable.put_cluster_snapshot(policy_name, &snapshot)?;
        }

        Ok(results)
    }

    // --- read-only surface ---

    pub fn exists(&self, guid: &str) -> bool {
        self.inner.read().store.exists(guid)
    }

    pub fn distance(&self, a: &str, b: &str, cutoff: usize) -> CoreResult<Option<usize>> {
        let inner = self.inner.read();
        self.comparator.distance(&self.compressor(), &inner.store, a, b, cutoff)
    }

    pub fn sequence(&self, guid: &str) -> CoreResult<String> {
        let inner = self.inner.read();
        let record = inner.store.load(guid)?;
        self.compressor().uncompress(record, inner.store.consensi())
    }

    pub fn annotation(&self, guid: &str) -> CoreResult<Quality> {
        self.inner
            .read()
            .store
            .quality(guid)
            .cloned()
            .ok_or_else(|| CoreError::UnknownGuid(guid.to_string()))
    }

    pub fn guids(&self) -> Vec<String> {
        self.inner.read().store.guids().map(String::from).collect()
    }

    pub fn guids_with_quality_over(&self, cutoff: f64) -> Vec<String> {
        self.inner.read().store.guids_with_quality_over(cutoff)
    }

    pub fn guids_and_examination_times(&self) -> Vec<(String, std::time::SystemTime)> {
        self.inner.read().store.guids_and_examination_times()
    }

    pub fn guids_beginning_with(&self, prefix: &str, max: usize) -> Vec<String> {
        self.inner.read().store.search_prefix(prefix, max)
    }

    /// Filters the durably-persisted link list by the live (RAM) quality
    /// annotation; unknown guids surface as `UnknownGuid` rather than an
    /// empty list, so callers can tell "no neighbours" from "no such
    /// sample".
    pub fn neighbours_within(
        &self,
        guid: &str,
        threshold: usize,
        quality_cutoff: f64,
        format: LinkFormat,
    ) -> CoreResult<Vec<Value>> {
        let inner = self.inner.read();
        if !inner.store.exists(guid) {
            return Err(CoreError::UnknownGuid(guid.to_string()));
        }
        let links = self.durable.get_links(guid, threshold, format)?;
        Ok(links
            .into_iter()
            .filter(|v| {
                extract_guid(v)
                    .and_then(|g| inner.store.quality(g))
                    .map(|q| q.acgt_fraction >= quality_cutoff)
                    .unwrap_or(false)
            })
            .collect())
    }

    pub fn multi_sequence_alignment(
        &self,
        policy_name: &str,
        guids: &[String],
    ) -> CoreResult<HashMap<String, MixturePValues>> {
        let inner = self.inner.read();
        let policy = inner
            .graphs
            .get(policy_name)
            .ok_or_else(|| CoreError::PolicyMiss(policy_name.to_string()))?
            .policy()
            .clone();
        let compressor = self.compressor();
        let mut rng = rand::thread_rng();
        assess_mixture(guids, &inner.store, &compressor, &self.reference, &self.mask, &policy, &mut rng)
    }

    pub fn multi_sequence_alignment_for_cluster(
        &self,
        policy_name: &str,
        cluster_id: &str,
    ) -> CoreResult<HashMap<String, MixturePValues>> {
        let members = self.cluster_members(policy_name, cluster_id)?;
        self.multi_sequence_alignment(policy_name, &members)
    }

    pub fn algorithms(&self) -> Vec<String> {
        self.policy_order.clone()
    }

    pub fn change_id(&self, policy_name: &str) -> CoreResult<u64> {
        Ok(self.graph(policy_name)?.change_id())
    }

    pub fn guid_to_clusters(&self, policy_name: &str, guid: &str) -> CoreResult<Vec<String>> {
        Ok(self.graph(policy_name)?.cluster_containing(guid).into_iter().map(|c| c.id).collect())
    }

    pub fn cluster_ids(&self, policy_name: &str) -> CoreResult<Vec<String>> {
        Ok(self.graph(policy_name)?.clusters().into_iter().map(|c| c.id).collect())
    }

    pub fn cluster_members(&self, policy_name: &str, cluster_id: &str) -> CoreResult<Vec<String>> {
        Ok(self
            .graph(policy_name)?
            .clusters()
            .into_iter()
            .find(|c| c.id == cluster_id)
            .map(|c| c.members)
            .unwrap_or_default())
    }

    pub fn what_tested(&self, policy_name: &str) -> CoreResult<UncertainBaseType> {
        Ok(self.graph(policy_name)?.policy().uncertain_base_type)
    }

    pub fn network_for_cluster(
        &self,
        policy_name: &str,
        cluster_id: &str,
    ) -> CoreResult<Vec<(String, String, usize)>> {
        let members = self.cluster_members(policy_name, cluster_id)?;
        Ok(self.graph(policy_name)?.edges_among(&members))
    }

    pub fn minimum_spanning_tree_for_cluster(
        &self,
        policy_name: &str,
        cluster_id: &str,
    ) -> CoreResult<Vec<(String, String, usize)>> {
        let members = self.cluster_members(policy_name, cluster_id)?;
        Ok(self.graph(policy_name)?.minimum_spanning_tree_among(&members))
    }

    pub fn nucleotides_excluded(&self) -> (String, Vec<usize>) {
        (self.mask.hash(), self.mask.positions().collect())
    }

    /// Read half of the server-monitoring write/read pair; rendering stays
    /// out of scope, this just forwards to the durable collaborator.
    pub fn recent_events(&self, max: usize) -> CoreResult<Vec<Value>> {
        self.durable.recent_events(max)
    }

    fn graph(&self, policy_name: &str) -> CoreResult<parking_lot::MappedRwLockReadGuard<'_, ClusterGraph>> {
        parking_lot::RwLockReadGuard::try_map(self.inner.read(), |inner| inner.graphs.get(policy_name))
            .map_err(|_| CoreError::PolicyMiss(policy_name.to_string()))
    }
}

fn extract_guid(v: &Value) -> Option<&str> {
    match v {
        Value::Array(arr) => arr.first().and_then(|x| x.as_str()),
        Value::Object(map) => map.get("guid").and_then(|x| x.as_str()),
        _ => None,
    }
}

fn direct_to_value(record: &DirectRecord) -> Value {
    json!({
        "invalid": record.invalid,
        "a": record.sets.a.to_sorted_vec(),
        "c": record.sets.c.to_sorted_vec(),
        "g": record.sets.g.to_sorted_vec(),
        "t": record.sets.t.to_sorted_vec(),
        "n": record.sets.n.to_sorted_vec(),
        "m": record.m_positions.to_sorted_vec(),
    })
}

fn quality_to_value(quality: &Quality) -> Value {
    let examined_at = quality
        .examined_at
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    json!({ "acgt_fraction": quality.acgt_fraction, "examined_at": examined_at })
}

fn cluster_snapshot_value(graph: &ClusterGraph) -> Value {
    let clusters = graph.clusters();
    json!({
        "change_id": graph.change_id(),
        "clusters": clusters
            .into_iter()
            .map(|c| json!({ "id": c.id, "members": c.members }))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::memory::MemoryStore;
    use crate::graph::{MixedSampleManagement, MixtureCriterion};

    fn service(threshold: usize) -> NeighbourFindService {
        let reference = Reference::new("ACTG").unwrap();
        let mask = Mask::empty(4);
        let policy = ClusterPolicy {
            name: "default".to_string(),
            snv_threshold: threshold,
            uncertain_base_type: UncertainBaseType::N,
            mixed_sample_management: MixedSampleManagement::Ignore,
            mixture_criterion: MixtureCriterion::PValue1,
            cutoff: 0.001,
        };
        NeighbourFindService::new(
            reference,
            mask,
            2,
            3,
            10,
            0,
            0.5,
            vec![policy],
            Arc::new(MemoryStore::new()),
            2,
        )
    }

    #[test]
    fn identity_insert_has_no_neighbours() {
        let svc = service(3);
        let outcome = svc.insert("g1", "ACTG").unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted { links: 0 });
        assert!(svc.exists("g1"));
        assert!(svc.neighbours_within("g1", 3, 0.0, LinkFormat::GuidOnly).unwrap().is_empty());
    }

    #[test]
    fn invalid_sequence_insert_is_never_compared() {
        let svc = service(3);
        let outcome = svc.insert("g1", "NNNN").unwrap();
        assert_eq!(outcome, InsertOutcome::Invalid);
        assert!(svc.neighbours_within("g1", 10, 0.0, LinkFormat::GuidOnly).unwrap().is_empty());
        assert!(svc.sequence("g1").is_err());
    }

    #[test]
    fn repeat_insert_is_idempotent() {
        let svc = service(3);
        let first = svc.insert("g1", "ACTG").unwrap();
        let second = svc.insert("g1", "ACTG").unwrap();
        assert_eq!(first, InsertOutcome::Inserted { links: 0 });
        assert_eq!(second, InsertOutcome::AlreadyPresent);
    }

    #[test]
    fn clustering_transitivity_through_insert() {
        let svc = service(1);
        svc.insert("a", "ACTG").unwrap();
        svc.insert("b", "ACTA").unwrap();
        svc.insert("c", "ACAA").unwrap();

        let clusters = svc.cluster_ids("default").unwrap();
        assert_eq!(clusters.len(), 1);
        let members = svc.cluster_members("default", &clusters[0]).unwrap();
        let mut members = members;
        members.sort();
        assert_eq!(members, vec!["a", "b", "c"]);
        assert_eq!(svc.change_id("default").unwrap(), 3);
    }

    #[test]
    fn unknown_policy_is_policy_miss() {
        let svc = service(1);
        svc.insert("a", "ACTG").unwrap();
        let err = svc.cluster_ids("nope").unwrap_err();
        assert_eq!(err.kind(), crate::errs::ErrorKind::PolicyMiss);
    }
}
