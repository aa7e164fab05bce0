use std::sync::Arc;

use neighbourfind::durable::memory::MemoryStore;
use neighbourfind::durable::DurableStore;
use neighbourfind::graph::{ClusterPolicy, MixedSampleManagement, MixtureCriterion, UncertainBaseType};
use neighbourfind::mask::Mask;
use neighbourfind::reference::Reference;
use neighbourfind::NeighbourFindService;

pub fn policy(name: &str, snv_threshold: usize) -> ClusterPolicy {
    ClusterPolicy {
        name: name.to_string(),
        snv_threshold,
        uncertain_base_type: UncertainBaseType::N,
        mixed_sample_management: MixedSampleManagement::Ignore,
        mixture_criterion: MixtureCriterion::PValue1,
        cutoff: 0.001,
    }
}

/// A service over a short, fully-resolved reference with no masked positions,
/// one "default" policy at `snv_threshold`, backed by an in-process
/// `MemoryStore`.
pub fn service_with_reference(reference_seq: &str, snv_threshold: usize) -> NeighbourFindService {
    service_with_policies(reference_seq, vec![policy("default", snv_threshold)])
}

pub fn service_with_policies(reference_seq: &str, policies: Vec<ClusterPolicy>) -> NeighbourFindService {
    let reference = Reference::new(reference_seq).unwrap();
    let mask = Mask::empty(reference.len());
    NeighbourFindService::new(
        reference,
        mask,
        reference_seq.len(),
        reference_seq.len(),
        reference_seq.len(),
        0,
        0.5,
        policies,
        Arc::new(MemoryStore::new()) as Arc<dyn DurableStore>,
        2,
    )
}

pub fn service_with_max_ns(reference_seq: &str, max_ns: usize, snv_threshold: usize) -> NeighbourFindService {
    let reference = Reference::new(reference_seq).unwrap();
    let mask = Mask::empty(reference.len());
    NeighbourFindService::new(
        reference,
        mask,
        max_ns,
        reference_seq.len(),
        reference_seq.len(),
        0,
        0.5,
        vec![policy("default", snv_threshold)],
        Arc::new(MemoryStore::new()) as Arc<dyn DurableStore>,
        2,
    )
}

pub fn service_with_mask(reference_seq: &str, masked: Vec<usize>, snv_threshold: usize) -> NeighbourFindService {
    let reference = Reference::new(reference_seq).unwrap();
    let mask = Mask::new(reference.len(), masked);
    NeighbourFindService::new(
        reference,
        mask,
        reference_seq.len(),
        reference_seq.len(),
        reference_seq.len(),
        0,
        0.5,
        vec![policy("default", snv_threshold)],
        Arc::new(MemoryStore::new()) as Arc<dyn DurableStore>,
        2,
    )
}
