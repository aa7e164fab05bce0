//! In-process `DurableStore`, used by tests and `--ephemeral` runs where no
//! crash-recovery guarantee is actually needed.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use super::{format_link, DurableStore, LinkFormat, LinkRecord, PutOutcome};
use crate::errs::CoreResult;

#[derive(Default)]
struct State {
    compressed: HashMap<String, Value>,
    annotations: HashMap<(String, String), Value>,
    links: HashMap<String, HashMap<String, LinkRecord>>,
    cluster_snapshots: HashMap<String, Value>,
    config: HashMap<String, Value>,
    events: Vec<Value>,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for MemoryStore {
    fn put_compressed(&self, guid: &str, record: &Value) -> CoreResult<PutOutcome> {
        let mut state = self.state.lock();
        if state.compressed.contains_key(guid) {
            return Ok(PutOutcome::AlreadyExists);
        }
        state.compressed.insert(guid.to_string(), record.clone());
        Ok(PutOutcome::Inserted)
    }

    fn put_annotation(&self, guid: &str, namespace: &str, dict: &Value) -> CoreResult<()> {
        self.state
            .lock()
            .annotations
            .insert((guid.to_string(), namespace.to_string()), dict.clone());
        Ok(())
    }

    fn append_links(&self, guid: &str, links: &HashMap<String, LinkRecord>) -> CoreResult<()> {
        let mut state = self.state.lock();
        let entry = state.links.entry(guid.to_string()).or_default();
        for (other, link) in links {
            entry.entry(other.clone()).or_insert(*link);
        }
        Ok(())
    }

    fn get_links(&self, guid: &str, cutoff: usize, format: LinkFormat) -> CoreResult<Vec<Value>> {
        let state = self.state.lock();
        let out = state
            .links
            .get(guid)
            .map(|links| {
                links
                    .iter()
                    .filter(|(_, l)| l.distance <= cutoff)
                    .map(|(other, l)| format_link(other, l, format))
                    .collect()
            })
            .unwrap_or_default();
        Ok(out)
    }

    /// No-op: the in-memory backend never accumulates the many small
    /// per-neighbour documents a real backend would coalesce, but the
    /// operation must still be idempotent, which a no-op trivially is.
    fn repack(&self, _guid: &str) -> CoreResult<()> {
        Ok(())
    }

    fn put_cluster_snapshot(&self, policy: &str, blob: &Value) -> CoreResult<()> {
        self.state.lock().cluster_snapshots.insert(policy.to_string(), blob.clone());
        Ok(())
    }

    fn get_cluster_snapshot(&self, policy: &str) -> CoreResult<Option<Value>> {
        Ok(self.state.lock().cluster_snapshots.get(policy).cloned())
    }

    fn put_config(&self, key: &str, dict: &Value) -> CoreResult<()> {
        self.state.lock().config.insert(key.to_string(), dict.clone());
        Ok(())
    }

    fn get_config(&self, key: &str) -> CoreResult<Option<Value>> {
        Ok(self.state.lock().config.get(key).cloned())
    }

    fn is_first_run(&self) -> CoreResult<bool> {
        Ok(self.state.lock().config.is_empty())
    }

    fn record_event(&self, event: &Value) -> CoreResult<()> {
        self.state.lock().events.push(event.clone());
        Ok(())
    }

    fn recent_events(&self, max: usize) -> CoreResult<Vec<Value>> {
        let state = self.state.lock();
        let n = state.events.len();
        Ok(state.events[n.saturating_sub(max)..].to_vec())
    }
}
