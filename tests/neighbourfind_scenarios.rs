//! End-to-end coverage of the service's observable behaviour, exercised
//! entirely through `NeighbourFindService` rather than any single module
//! in isolation.

mod common;

use neighbourfind::durable::LinkFormat;
use neighbourfind::service::InsertOutcome;

/// Inserting a sequence identical to the reference stores it with zero
/// variants and zero neighbours.
#[test]
fn identity_sequence_roundtrips_and_has_no_neighbours() {
    let svc = common::service_with_reference("ACGTACGTACGT", 5);
    let outcome = svc.insert("ref_like", "ACGTACGTACGT").unwrap();
    assert_eq!(outcome, InsertOutcome::Inserted { links: 0 });
    assert_eq!(svc.sequence("ref_like").unwrap(), "ACGTACGTACGT");
    assert!(svc.neighbours_within("ref_like", 5, 0.0, LinkFormat::GuidOnly).unwrap().is_empty());
}

/// A masked position differing from the reference must never count
/// toward distance.
#[test]
fn masked_positions_are_excluded_from_distance() {
    let svc = common::service_with_mask("ACGTACGT", vec![3], 0);
    svc.insert("a", "ACGTACGT").unwrap();
    // position 3 (T->A) is masked; every other base matches.
    svc.insert("b", "ACGAACGT").unwrap();
    let d = svc.distance("a", "b", usize::MAX).unwrap();
    assert_eq!(d, Some(0));
}

/// N bases never contribute to distance against any concrete base.
#[test]
fn n_positions_are_excluded_from_distance() {
    let svc = common::service_with_reference("ACGTACGT", 8);
    svc.insert("a", "ACGTACGT").unwrap();
    svc.insert("b", "ACGTNCGT").unwrap();
    let d = svc.distance("a", "b", usize::MAX).unwrap();
    assert_eq!(d, Some(0));
}

/// A sequence exceeding the N ceiling is stored as invalid and never
/// compared against, but the insert itself succeeds and is idempotent.
#[test]
fn excess_n_sequence_is_stored_but_never_compared() {
    let all_n = common::service_with_max_ns("ACGTACGT", 2, 8);
    all_n.insert("good", "ACGTACGT").unwrap();
    let outcome = all_n.insert("bad", "NNNNNNNN").unwrap();
    assert_eq!(outcome, InsertOutcome::Invalid);
    assert!(all_n.sequence("bad").is_err());
    assert!(all_n.neighbours_within("bad", usize::MAX, 0.0, LinkFormat::GuidOnly).unwrap().is_empty());

    // re-inserting the same invalid guid does not panic or flip state.
    let again = all_n.insert("bad", "NNNNNNNN").unwrap();
    assert_eq!(again, InsertOutcome::AlreadyPresent);
}

/// Three pairwise-close samples form one transitive cluster under the
/// Ignore mixed-sample policy, and `change_id` advances once per sample that
/// actually joins the graph.
#[test]
fn clustering_is_transitive_under_ignore() {
    let svc = common::service_with_reference("ACGTACGT", 1);
    svc.insert("a", "ACGTACGT").unwrap();
    svc.insert("b", "ACGAACGT").unwrap(); // 1 SNP from a
    svc.insert("c", "ACGAACGA").unwrap(); // 1 SNP from b, 2 from a

    let clusters = svc.cluster_ids("default").unwrap();
    assert_eq!(clusters.len(), 1);
    let mut members = svc.cluster_members("default", &clusters[0]).unwrap();
    members.sort();
    assert_eq!(members, vec!["a", "b", "c"]);
    assert_eq!(svc.change_id("default").unwrap(), 3);
}

/// Samples above the cluster threshold from everything else form their
/// own singleton clusters rather than being folded into an existing one.
#[test]
fn distant_samples_stay_in_separate_clusters() {
    let svc = common::service_with_reference("ACGTACGT", 1);
    svc.insert("a", "ACGTACGT").unwrap();
    svc.insert("far", "TTTTTTTT").unwrap();

    let clusters = svc.cluster_ids("default").unwrap();
    assert_eq!(clusters.len(), 2);
}

/// Distance is symmetric regardless of insertion order.
#[test]
fn distance_is_symmetric() {
    let svc = common::service_with_reference("ACGTACGT", 8);
    svc.insert("a", "ACGTACGT").unwrap();
    svc.insert("b", "ACGAACGT").unwrap();
    assert_eq!(svc.distance("a", "b", usize::MAX).unwrap(), svc.distance("b", "a", usize::MAX).unwrap());
}

/// Re-inserting an existing guid with the same sequence never creates a
/// second link or mutates cluster membership (insert idempotence).
#[test]
fn repeat_insert_does_not_duplicate_links_or_clusters() {
    let svc = common::service_with_reference("ACGTACGT", 8);
    svc.insert("a", "ACGTACGT").unwrap();
    svc.insert("b", "ACGAACGT").unwrap();

    let before = svc.neighbours_within("b", 8, 0.0, LinkFormat::GuidOnly).unwrap();
    svc.insert("b", "ACGAACGT").unwrap();
    let after = svc.neighbours_within("b", 8, 0.0, LinkFormat::GuidOnly).unwrap();
    assert_eq!(before, after);

    let before_change_id = svc.change_id("default").unwrap();
    svc.insert("b", "ACGAACGT").unwrap();
    assert_eq!(svc.change_id("default").unwrap(), before_change_id);
}

/// A comparison threshold that the distance exceeds never produces a link,
/// and does not fold the two guids into a shared cluster.
#[test]
fn threshold_honesty() {
    let svc = common::service_with_reference("ACGTACGT", 1);
    svc.insert("a", "ACGTACGT").unwrap();
    svc.insert("b", "AAAAACGT").unwrap(); // 3 SNPs, above snv_threshold=1
    assert!(svc.neighbours_within("a", 1, 0.0, LinkFormat::GuidOnly).unwrap().is_empty());
    let clusters = svc.cluster_ids("default").unwrap();
    assert_eq!(clusters.len(), 2);
}

/// An unknown policy name surfaces as a `PolicyMiss`, never a panic or a
/// silently empty result.
#[test]
fn unknown_policy_surfaces_policy_miss() {
    let svc = common::service_with_reference("ACGT", 1);
    svc.insert("a", "ACGT").unwrap();
    let err = svc.cluster_ids("no-such-policy").unwrap_err();
    assert_eq!(err.kind(), neighbourfind::ErrorKind::PolicyMiss);
}

/// An unknown guid surfaces as `UnknownGuid`, not an empty neighbour list.
#[test]
fn unknown_guid_surfaces_as_error_not_empty_list() {
    let svc = common::service_with_reference("ACGT", 1);
    svc.insert("a", "ACGT").unwrap();
    let err = svc.neighbours_within("ghost", 10, 0.0, LinkFormat::GuidOnly).unwrap_err();
    assert_eq!(err.kind(), neighbourfind::ErrorKind::InputRejected);
}

/// Periodic recompression must not change any pairwise distance it governs.
#[test]
fn recompression_preserves_pairwise_distances() {
    let reference = reference_seq();
    let svc = neighbourfind_with_recompress(&reference, 3, 1);

    svc.insert("s0", &reference).unwrap();
    let mut mutated = reference.clone().into_bytes();
    mutated[0] = if mutated[0] == b'A' { b'C' } else { b'A' };
    let s1 = String::from_utf8(mutated).unwrap();
    svc.insert("s1", &s1).unwrap();

    let before = svc.distance("s0", "s1", usize::MAX).unwrap();
    // a third insert crosses `recompress_frequency`, triggering
    // `Store::recompress_around` inside the insert loop.
    svc.insert("s2", &reference).unwrap();
    let after = svc.distance("s0", "s1", usize::MAX).unwrap();
    assert_eq!(before, after);
}

fn reference_seq() -> String {
    "ACGTACGTACGTACGTACGT".to_string()
}

fn neighbourfind_with_recompress(
    reference_seq: &str,
    recompress_frequency: usize,
    snv_threshold: usize,
) -> neighbourfind::NeighbourFindService {
    use std::sync::Arc;

    use neighbourfind::durable::memory::MemoryStore;
    use neighbourfind::durable::DurableStore;
    use neighbourfind::mask::Mask;
    use neighbourfind::reference::Reference;

    let reference = Reference::new(reference_seq).unwrap();
    let mask = Mask::empty(reference.len());
    neighbourfind::NeighbourFindService::new(
        reference,
        mask,
        reference_seq.len(),
        reference_seq.len(),
        reference_seq.len(),
        recompress_frequency,
        0.5,
        vec![common::policy("default", snv_threshold)],
        Arc::new(MemoryStore::new()) as Arc<dyn DurableStore>,
        2,
    )
}
