//! Per-policy neighbour graph, connected-component clustering and the
//! mixture-test update loop.

pub mod mixture;

use std::collections::HashMap;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;

use crate::compressor::{Compressor, DirectRecord};
use crate::errs::CoreResult;
use crate::mask::Mask;
use crate::msa;
use crate::positions::PositionSet;
use crate::reference::Reference;
use crate::store::Store;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UncertainBaseType {
    N,
    M,
    NOrM,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixedSampleManagement {
    Ignore,
    Include,
    Exclude,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixtureCriterion {
    PValue1,
    PValue2,
    PValue3,
}

#[derive(Clone, Debug)]
pub struct ClusterPolicy {
    pub name: String,
    pub snv_threshold: usize,
    pub uncertain_base_type: UncertainBaseType,
    pub mixed_sample_management: MixedSampleManagement,
    pub mixture_criterion: MixtureCriterion,
    pub cutoff: f64,
}

#[derive(Clone, Debug)]
struct VertexData {
    guid: String,
    is_mixed: bool,
}

#[derive(Clone, Debug)]
pub struct Cluster {
    pub id: String,
    pub members: Vec<String>,
}

pub struct ClusterGraph {
    policy: ClusterPolicy,
    graph: UnGraph<VertexData, usize>,
    index: FxHashMap<String, NodeIndex>,
    change_id: u64,
}

impl ClusterGraph {
    pub fn new(policy: ClusterPolicy) -> Self {
        Self { policy, graph: UnGraph::new_undirected(), index: FxHashMap::default(), change_id: 0 }
    }

    pub fn policy(&self) -> &ClusterPolicy {
        &self.policy
    }

    pub fn change_id(&self) -> u64 {
        self.change_id
    }

    fn neighbour_set(&self, node: NodeIndex) -> Vec<(String, usize)> {
        self.graph
            .edges(node)
            .map(|e| {
                let other = if e.source() == node { e.target() } else { e.source() };
                (self.graph[other].guid.clone(), *e.weight())
            })
            .collect()
    }

    /// Adds `guid` plus edges to candidates within the policy threshold.
    /// Idempotent if `guid` already exists with the same thresholded edge
    /// set. Returns `true` if the graph was mutated.
    pub fn add_sample(&mut self, guid: &str, edges: &[(String, usize)]) -> bool {
        let thresholded: Vec<(String, usize)> = edges
            .iter()
            .filter(|(_, d)| *d <= self.policy.snv_threshold)
            .cloned()
            .collect();

        if let Some(&node) = self.index.get(guid) {
            let mut existing = self.neighbour_set(node);
            existing.sort();
            let mut incoming = thresholded.clone();
            incoming.sort();
            if existing == incoming {
                return false;
            }
            // edges differ for a repeat insert with the same guid: this
            // should not happen in practice (guids are content-immutable
            // once accepted), but if it does, reconcile by adding any
            // missing edges rather than silently dropping information.
            for (h, dist) in &thresholded {
                if let Some(&target) = self.index.get(h) {
                    if !self.graph.contains_edge(node, target) {
                        self.graph.add_edge(node, target, *dist);
                    }
                }
            }
            self.change_id += 1;
            return true;
        }

        let node = self.graph.add_node(VertexData { guid: guid.to_string(), is_mixed: false });
        self.index.insert(guid.to_string(), node);
        for (h, dist) in &thresholded {
            if let Some(&target) = self.index.get(h) {
                self.graph.add_edge(node, target, *dist);
            }
        }
        self.change_id += 1;
        true
    }

    pub fn set_mixed(&mut self, guid: &str, is_mixed: bool) -> bool {
        if let Some(&node) = self.index.get(guid) {
            if self.graph[node].is_mixed != is_mixed {
                self.graph[node].is_mixed = is_mixed;
                self.change_id += 1;
                return true;
            }
        }
        false
    }

    pub fn is_mixed(&self, guid: &str) -> Option<bool> {
        self.index.get(guid).map(|&n| self.graph[n].is_mixed)
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.index.contains_key(guid)
    }

    /// Connected components under the policy's `mixed_sample_management`
    /// rule.
    pub fn clusters(&self) -> Vec<Cluster> {
        match self.policy.mixed_sample_management {
            MixedSampleManagement::Ignore => self.clusters_ignore(),
            MixedSampleManagement::Exclude => self.clusters_exclude(),
            MixedSampleManagement::Include => self.clusters_include(),
        }
    }

    fn components_over<F: Fn(NodeIndex) -> bool>(&self, include_node: F) -> Vec<Vec<NodeIndex>> {
        let mut uf = UnionFind::new(self.graph.node_count());
        for edge in self.graph.edge_indices() {
            let (a, b) = self.graph.edge_endpoints(edge).unwrap();
            if include_node(a) && include_node(b) {
                uf.union(a.index(), b.index());
            }
        }
        let mut groups: HashMap<usize, Vec<NodeIndex>> = HashMap::new();
        for node in self.graph.node_indices() {
            if include_node(node) {
                groups.entry(uf.find(node.index())).or_default().push(node);
            }
        }
        groups.into_values().collect()
    }

    fn clusters_ignore(&self) -> Vec<Cluster> {
        self.components_over(|_| true)
            .into_iter()
            .map(|nodes| self.to_cluster(nodes))
            .collect()
    }

    fn clusters_exclude(&self) -> Vec<Cluster> {
        self.components_over(|n| !self.graph[n].is_mixed)
            .into_iter()
            .map(|nodes| self.to_cluster(nodes))
            .collect()
    }

    fn clusters_include(&self) -> Vec<Cluster> {
        let base = self.components_over(|n| !self.graph[n].is_mixed);
        let mut node_to_cluster: HashMap<NodeIndex, usize> = HashMap::new();
        for (idx, nodes) in base.iter().enumerate() {
            for &n in nodes {
                node_to_cluster.insert(n, idx);
            }
        }
        let mut members_by_cluster: Vec<Vec<String>> =
            base.iter().map(|nodes| nodes.iter().map(|&n| self.graph[n].guid.clone()).collect()).collect();

        for node in self.graph.node_indices() {
            if !self.graph[node].is_mixed {
                continue;
            }
            let mut touched: Vec<usize> = self
                .graph
                .neighbors(node)
                .filter_map(|n| node_to_cluster.get(&n).copied())
                .collect();
            touched.sort_unstable();
            touched.dedup();
            if touched.is_empty() {
                members_by_cluster.push(vec![self.graph[node].guid.clone()]);
            } else {
                for cluster_idx in touched {
                    members_by_cluster[cluster_idx].push(self.graph[node].guid.clone());
                }
            }
        }

        members_by_cluster
            .into_iter()
            .filter(|m| !m.is_empty())
            .map(|members| {
                let id = members.iter().min().cloned().unwrap_or_default();
                Cluster { id, members }
            })
            .collect()
    }

    fn to_cluster(&self, nodes: Vec<NodeIndex>) -> Cluster {
        let mut members: Vec<String> = nodes.into_iter().map(|n| self.graph[n].guid.clone()).collect();
        members.sort();
        let id = members.first().cloned().unwrap_or_default();
        Cluster { id, members }
    }

    pub fn cluster_containing(&self, guid: &str) -> Vec<Cluster> {
        self.clusters().into_iter().filter(|c| c.members.iter().any(|m| m == guid)).collect()
    }

    /// Edges with both endpoints in `members`, shaped for the cytoscape
    /// "network" surface endpoint.
    pub fn edges_among(&self, members: &[String]) -> Vec<(String, String, usize)> {
        let member_set: std::collections::HashSet<&str> =
            members.iter().map(|s| s.as_str()).collect();
        let mut out = Vec::new();
        for e in self.graph.edge_indices() {
            let (a, b) = self.graph.edge_endpoints(e).unwrap();
            let ga = &self.graph[a].guid;
            let gb = &self.graph[b].guid;
            if member_set.contains(ga.as_str()) && member_set.contains(gb.as_str()) {
                out.push((ga.clone(), gb.clone(), self.graph[e]));
            }
        }
        out
    }

    /// Kruskal's algorithm over `edges_among`; used by the "minimum
    /// spanning tree" surface endpoint.
    pub fn minimum_spanning_tree_among(&self, members: &[String]) -> Vec<(String, String, usize)> {
        let mut edges = self.edges_among(members);
        edges.sort_by_key(|(_, _, w)| *w);

        let mut index: HashMap<&str, usize> = HashMap::new();
        for m in members {
            let next = index.len();
            index.entry(m.as_str()).or_insert(next);
        }
        let mut uf = UnionFind::new(index.len().max(1));
        let mut mst = Vec::new();
        for (a, b, w) in edges {
            let (ia, ib) = (index[a.as_str()], index[b.as_str()]);
            if uf.find(ia) != uf.find(ib) {
                uf.union(ia, ib);
                mst.push((a, b, w));
            }
        }
        mst
    }
}

/// Per-guid mixture-test result.
#[derive(Clone, Debug)]
pub struct MixturePValues {
    pub aligned_seq: String,
    pub all_n: usize,
    pub align_n: usize,
    pub p_value1: Option<f64>,
    pub p_value2: Option<f64>,
    pub p_value3: Option<f64>,
}

impl MixturePValues {
    pub fn p_for(&self, criterion: MixtureCriterion) -> Option<f64> {
        match criterion {
            MixtureCriterion::PValue1 => self.p_value1,
            MixtureCriterion::PValue2 => self.p_value2,
            MixtureCriterion::PValue3 => self.p_value3,
        }
    }

    pub fn is_mixed(&self, criterion: MixtureCriterion, cutoff: f64) -> bool {
        self.p_for(criterion).map(|p| p <= cutoff).unwrap_or(false)
    }
}

fn uncertain_positions(
    direct: &DirectRecord,
    m_positions: &PositionSet,
    uncertain: UncertainBaseType,
    genome_len: usize,
) -> PositionSet {
    match uncertain {
        UncertainBaseType::N => direct.sets.n.clone(),
        UncertainBaseType::M => m_positions.clone(),
        UncertainBaseType::NOrM => direct.sets.n.union(m_positions, genome_len),
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Runs the multi-sequence-alignment binomial mixture test over `guids`.
/// Returns one `MixturePValues` per guid examined.
pub fn assess_mixture(
    candidate_guids: &[String],
    store: &Store,
    compressor: &Compressor,
    reference: &Reference,
    mask: &Mask,
    policy: &ClusterPolicy,
    rng: &mut impl rand::Rng,
) -> CoreResult<HashMap<String, MixturePValues>> {
    let genome_len = reference.len();

    let mut members: Vec<(String, DirectRecord)> = Vec::new();
    for g in candidate_guids {
        let direct = compressor.decode_direct(store.load(g)?, store.consensi())?;
        if !direct.invalid {
            members.push((g.clone(), direct.into_owned()));
        }
    }
    if members.len() < 2 {
        return Ok(HashMap::new());
    }

    let refs: Vec<&DirectRecord> = members.iter().map(|(_, d)| d).collect();
    let mut variants = msa::variant_positions(&refs, reference);
    variants.sort_unstable();
    let v_len = variants.len();

    // Population sample for p1/p2: up to 30 valid stored guids.
    let mut all_guids: Vec<String> = store.guids().map(|s| s.to_string()).collect();
    all_guids.shuffle(rng);
    let mut sample_whole_n: Vec<f64> = Vec::new();
    let mut sample_aligned_n: Vec<f64> = Vec::new();
    for g in &all_guids {
        if sample_whole_n.len() >= 30 {
            break;
        }
        let direct = match compressor.decode_direct(store.load(g)?, store.consensi()) {
            Ok(d) if !d.invalid => d,
            _ => continue,
        };
        let m_pos = store.load_m_positions(g).cloned().unwrap_or_else(PositionSet::empty);
        let uncertain = uncertain_positions(&direct, &m_pos, policy.uncertain_base_type, genome_len);
        sample_whole_n.push(uncertain.len() as f64 / genome_len as f64);
        if v_len > 0 {
            let in_v = variants.iter().filter(|&&p| uncertain.contains(p)).count();
            sample_aligned_n.push(in_v as f64 / v_len as f64);
        }
    }
    let expected_p1 = median(sample_whole_n);
    let expected_p2 = if v_len > 0 { median(sample_aligned_n) } else { None };
    let _ = mask;

    let mut results = HashMap::new();
    for (guid, direct) in &members {
        let aligned_seq = msa::aligned_string(direct, &variants, reference);
        let m_pos = store.load_m_positions(guid).cloned().unwrap_or_else(PositionSet::empty);
        let uncertain = uncertain_positions(direct, &m_pos, policy.uncertain_base_type, genome_len);
        let all_n = uncertain.len();
        let align_n = variants.iter().filter(|&&p| uncertain.contains(p)).count();

        let p_value1 = if v_len > 0 {
            expected_p1.map(|p| mixture::binomial_two_sided_pvalue(align_n as u64, v_len as u64, p))
        } else {
            None
        };
        let p_value2 = if v_len > 0 {
            expected_p2.map(|p| mixture::binomial_two_sided_pvalue(align_n as u64, v_len as u64, p))
        } else {
            None
        };
        let off_alignment_trials = genome_len.saturating_sub(v_len);
        let p_value3 = if off_alignment_trials > 0 && all_n >= align_n {
            let expected_p3 = (all_n - align_n) as f64 / off_alignment_trials as f64;
            Some(mixture::binomial_two_sided_pvalue(align_n as u64, v_len as u64, expected_p3))
        } else {
            None
        };

        results.insert(
            guid.clone(),
            MixturePValues { aligned_seq, all_n, align_n, p_value1, p_value2, p_value3 },
        );
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::Compressor;

    fn policy(threshold: usize) -> ClusterPolicy {
        ClusterPolicy {
            name: "default".to_string(),
            snv_threshold: threshold,
            uncertain_base_type: UncertainBaseType::N,
            mixed_sample_management: MixedSampleManagement::Ignore,
            mixture_criterion: MixtureCriterion::PValue1,
            cutoff: 0.001,
        }
    }

    #[test]
    fn transitivity_under_ignore() {
        let mut graph = ClusterGraph::new(policy(1));
        assert!(graph.add_sample("a", &[]));
        assert!(graph.add_sample("b", &[("a".to_string(), 1)]));
        assert!(graph.add_sample("c", &[("b".to_string(), 1), ("a".to_string(), 2)]));
        assert_eq!(graph.change_id(), 3);

        let clusters = graph.clusters();
        assert_eq!(clusters.len(), 1);
        let mut members = clusters[0].members.clone();
        members.sort();
        assert_eq!(members, vec!["a", "b", "c"]);
    }

    #[test]
    fn idempotent_repeat_insert_does_not_bump_change_id() {
        let mut graph = ClusterGraph::new(policy(1));
        graph.add_sample("a", &[]);
        graph.add_sample("b", &[("a".to_string(), 1)]);
        let before = graph.change_id();
        let mutated = graph.add_sample("b", &[("a".to_string(), 1)]);
        assert!(!mutated);
        assert_eq!(graph.change_id(), before);
    }

    #[test]
    fn exclude_removes_mixed_vertices() {
        let mut graph = ClusterGraph::new(ClusterPolicy {
            mixed_sample_management: MixedSampleManagement::Exclude,
            ..policy(1)
        });
        graph.add_sample("a", &[]);
        graph.add_sample("b", &[("a".to_string(), 1)]);
        graph.add_sample("c", &[("b".to_string(), 1)]);
        graph.set_mixed("b", true);
        let clusters = graph.clusters();
        // removing b as a cut vertex leaves a and c singletons
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.members.len() == 1));
    }

    #[test]
    fn include_duplicates_mixed_cut_vertex() {
        let mut graph = ClusterGraph::new(ClusterPolicy {
            mixed_sample_management: MixedSampleManagement::Include,
            ..policy(1)
        });
        graph.add_sample("a", &[]);
        graph.add_sample("b", &[("a".to_string(), 1)]);
        graph.add_sample("c", &[("b".to_string(), 1)]);
        graph.set_mixed("b", true);
        let clusters = graph.clusters();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.members.contains(&"b".to_string())));
        assert!(clusters.iter().any(|c| c.members.contains(&"a".to_string())));
        assert!(clusters.iter().any(|c| c.members.contains(&"c".to_string())));
    }

    #[test]
    fn mixture_test_flags_all_n_variant_sample() {
        let reference = Reference::new(&"A".repeat(20)).unwrap();
        let mask = Mask::empty(20);
        let compressor = Compressor::new(&reference, &mask, 20);
        let mut store = Store::new(20, 10);

        // ~40 non-mixed variants differing at 1-3 sites by substitution
        for i in 0..40 {
            let mut seq: Vec<u8> = reference.as_bytes().to_vec();
            seq[i % 18] = b'C';
            let s = String::from_utf8(seq).unwrap();
            let rec = compressor.compress(&s).unwrap();
            let q = compressor.examine(&s).unwrap();
            store.persist(&format!("v{i}"), rec, PositionSet::empty(), q).unwrap();
        }
        // one sample whose variant sites are all N
        let mut mixed_seq: Vec<u8> = reference.as_bytes().to_vec();
        for p in [0usize, 1, 2] {
            mixed_seq[p] = b'N';
        }
        let s = String::from_utf8(mixed_seq).unwrap();
        let rec = compressor.compress(&s).unwrap();
        let q = compressor.examine(&s).unwrap();
        store.persist("mixed", rec, PositionSet::empty(), q).unwrap();

        let candidates: Vec<String> = store.guids().map(|s| s.to_string()).collect();
        let policy = policy(20);
        let mut rng = rand::thread_rng();
        let results =
            assess_mixture(&candidates, &store, &compressor, &reference, &mask, &policy, &mut rng)
                .unwrap();

        let mixed_result = &results["mixed"];
        assert!(mixed_result.is_mixed(MixtureCriterion::PValue1, 0.001));
        for i in 0..40 {
            let g = format!("v{i}");
            if let Some(r) = results.get(&g) {
                assert!(!r.is_mixed(MixtureCriterion::PValue1, 0.001));
            }
        }
    }
}
