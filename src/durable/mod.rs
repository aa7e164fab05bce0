//! The narrow external-collaborator interface for the durable
//! key-value/document store: crash recovery and link persistence live
//! behind this trait, never inside the core.
//!
//! Wire data at this boundary is abstract (`serde_json::Value`) rather than
//! the core's own types, so the core never has to know how its
//! collaborator serialises anything.

pub mod memory;
pub mod sled_store;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errs::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyExists,
}

/// One neighbour link as stored at the durable boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub distance: usize,
    pub n1: usize,
    pub n2: usize,
    pub n_both: usize,
}

/// The four output shapes `get_links` can render a link in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFormat {
    /// `[guid, dist]`
    PairDistance,
    /// `[guid, dist, n1, n2, nboth]`
    Full,
    /// `[guid]`
    GuidOnly,
    /// `{guid, snv: dist}`
    Dict,
}

/// The narrow crash-recovery/persistence collaborator.
/// Every operation must be safe to repeat (at-least-once semantics); the
/// core never retries a write on its own, but it does assume repeating one
/// is harmless.
pub trait DurableStore: Send + Sync {
    fn put_compressed(&self, guid: &str, record: &Value) -> CoreResult<PutOutcome>;

    /// Replace-upsert; always succeeds for a reachable backend.
    fn put_annotation(&self, guid: &str, namespace: &str, dict: &Value) -> CoreResult<()>;

    /// Deduplicating append: re-appending an already-stored (guid, other)
    /// pair is a no-op.
    fn append_links(&self, guid: &str, links: &HashMap<String, LinkRecord>) -> CoreResult<()>;

    fn get_links(&self, guid: &str, cutoff: usize, format: LinkFormat) -> CoreResult<Vec<Value>>;

    /// Background storage-side compaction; safe to run concurrently with
    /// readers and idempotent under concurrent invocation.
    fn repack(&self, guid: &str) -> CoreResult<()>;

    fn put_cluster_snapshot(&self, policy: &str, blob: &Value) -> CoreResult<()>;
    fn get_cluster_snapshot(&self, policy: &str) -> CoreResult<Option<Value>>;

    fn put_config(&self, key: &str, dict: &Value) -> CoreResult<()>;
    fn get_config(&self, key: &str) -> CoreResult<Option<Value>>;
    fn is_first_run(&self) -> CoreResult<bool>;

    /// Server-monitoring write/read pair; rendering is out of scope, only
    /// the contract is implemented.
    fn record_event(&self, event: &Value) -> CoreResult<()>;
    fn recent_events(&self, max: usize) -> CoreResult<Vec<Value>>;
}

pub(crate) fn format_link(guid: &str, link: &LinkRecord, format: LinkFormat) -> Value {
    match format {
        LinkFormat::PairDistance => serde_json::json!([guid, link.distance]),
        LinkFormat::Full => {
            serde_json::json!([guid, link.distance, link.n1, link.n2, link.n_both])
        }
        LinkFormat::GuidOnly => serde_json::json!([guid]),
        LinkFormat::Dict => serde_json::json!({ "guid": guid, "snv": link.distance }),
    }
}
