//! Embedded-document-store adapter: `sled` trees holding `serde_json` blobs.
//! The crate's concrete durable collaborator for anything other than tests.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use sled::{Db, Tree};

use super::{format_link, DurableStore, LinkFormat, LinkRecord, PutOutcome};
use crate::errs::{CoreError, CoreResult};

fn backend_err(e: sled::Error) -> CoreError {
    CoreError::TransientBackend(e.to_string())
}

fn encode(v: &Value) -> Vec<u8> {
    serde_json::to_vec(v).expect("Value always serialises")
}

fn decode(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

/// A single `append_links` call is first written as one small "fragment"
/// document per neighbour; `repack` later folds the fragments for a guid
/// into as few multi-neighbour documents as `max_neighbours_per_document`
/// allows.
pub struct SledStore {
    compressed: Tree,
    annotations: Tree,
    link_fragments: Tree,
    link_docs: Tree,
    cluster_snapshots: Tree,
    config: Tree,
    events: Tree,
    db: Db,
    max_neighbours_per_document: usize,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>, max_neighbours_per_document: usize) -> CoreResult<Self> {
        let db = sled::open(path).map_err(backend_err)?;
        Ok(Self {
            compressed: db.open_tree("compressed").map_err(backend_err)?,
            annotations: db.open_tree("annotations").map_err(backend_err)?,
            link_fragments: db.open_tree("link_fragments").map_err(backend_err)?,
            link_docs: db.open_tree("link_docs").map_err(backend_err)?,
            cluster_snapshots: db.open_tree("cluster_snapshots").map_err(backend_err)?,
            config: db.open_tree("config").map_err(backend_err)?,
            events: db.open_tree("events").map_err(backend_err)?,
            db,
            max_neighbours_per_document: max_neighbours_per_document.max(1),
        })
    }

    fn fragment_key(guid: &str, other: &str) -> Vec<u8> {
        format!("{guid}\0{other}").into_bytes()
    }

    fn doc_prefix(guid: &str) -> Vec<u8> {
        format!("{guid}\0").into_bytes()
    }

    fn doc_key(guid: &str, doc_idx: usize) -> Vec<u8> {
        format!("{guid}\0{doc_idx:08}").into_bytes()
    }

    fn scan_prefix(tree: &Tree, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Value)>> {
        tree.scan_prefix(prefix)
            .map(|r| r.map_err(backend_err).map(|(k, v)| (k.to_vec(), decode(&v))))
            .collect()
    }
}

impl DurableStore for SledStore {
    fn put_compressed(&self, guid: &str, record: &Value) -> CoreResult<PutOutcome> {
        if self.compressed.contains_key(guid).map_err(backend_err)? {
            return Ok(PutOutcome::AlreadyExists);
        }
        self.compressed.insert(guid, encode(record)).map_err(backend_err)?;
        Ok(PutOutcome::Inserted)
    }

    fn put_annotation(&self, guid: &str, namespace: &str, dict: &Value) -> CoreResult<()> {
        let key = format!("{guid}\0{namespace}");
        self.annotations.insert(key, encode(dict)).map_err(backend_err)?;
        Ok(())
    }

    fn append_links(&self, guid: &str, links: &HashMap<String, LinkRecord>) -> CoreResult<()> {
        for (other, link) in links {
            let key = Self::fragment_key(guid, other);
            if !self.link_fragments.contains_key(&key).map_err(backend_err)? {
                let value = serde_json::to_value(link).expect("LinkRecord always serialises");
                self.link_fragments.insert(key, encode(&value)).map_err(backend_err)?;
            }
        }
        Ok(())
    }

    fn get_links(&self, guid: &str, cutoff: usize, format: LinkFormat) -> CoreResult<Vec<Value>> {
        let prefix = Self::doc_prefix(guid);
        let mut merged: HashMap<String, LinkRecord> = HashMap::new();

        for (_, value) in Self::scan_prefix(&self.link_docs, &prefix)? {
            if let Ok(doc) = serde_json::from_value::<HashMap<String, LinkRecord>>(value) {
                merged.extend(doc);
            }
        }
        for (key, value) in Self::scan_prefix(&self.link_fragments, &prefix)? {
            let other = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            if let Ok(link) = serde_json::from_value::<LinkRecord>(value) {
                merged.entry(other).or_insert(link);
            }
        }

        Ok(merged
            .iter()
            .filter(|(_, l)| l.distance <= cutoff)
            .map(|(other, l)| format_link(other, l, format))
            .collect())
    }

    fn repack(&self, guid: &str) -> CoreResult<()> {
        let prefix = Self::doc_prefix(guid);
        let mut merged: HashMap<String, LinkRecord> = HashMap::new();

        let existing_docs = Self::scan_prefix(&self.link_docs, &prefix)?;
        for (_, value) in &existing_docs {
            if let Ok(doc) = serde_json::from_value::<HashMap<String, LinkRecord>>(value.clone()) {
                merged.extend(doc);
            }
        }
        let fragments = Self::scan_prefix(&self.link_fragments, &prefix)?;
        for (key, value) in &fragments {
            let other = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            if let Ok(link) = serde_json::from_value::<LinkRecord>(value.clone()) {
                merged.entry(other).or_insert(link);
            }
        }
        if merged.is_empty() {
            return Ok(());
        }

        let mut sorted_others: Vec<&String> = merged.keys().collect();
        sorted_others.sort();
        let chunks: Vec<HashMap<String, LinkRecord>> = sorted_others
            .chunks(self.max_neighbours_per_document)
            .map(|chunk| chunk.iter().map(|&o| (o.clone(), merged[o])).collect())
            .collect();

        for (idx, chunk) in chunks.iter().enumerate() {
            let key = Self::doc_key(guid, idx);
            let value = serde_json::to_value(chunk).expect("chunk always serialises");
            self.link_docs.insert(key, encode(&value)).map_err(backend_err)?;
        }
        // drop any stale doc beyond the new chunk count, then the now-folded
        // fragments: both batches are safe to repeat if a crash interrupts
        // this loop, since merged is recomputed from whatever survives.
        for (idx, _) in existing_docs.iter().enumerate().skip(chunks.len()) {
            self.link_docs.remove(Self::doc_key(guid, idx)).map_err(backend_err)?;
        }
        for (key, _) in &fragments {
            self.link_fragments.remove(key).map_err(backend_err)?;
        }
        Ok(())
    }

    fn put_cluster_snapshot(&self, policy: &str, blob: &Value) -> CoreResult<()> {
        self.cluster_snapshots.insert(policy, encode(blob)).map_err(backend_err)?;
        Ok(())
    }

    fn get_cluster_snapshot(&self, policy: &str) -> CoreResult<Option<Value>> {
        Ok(self
            .cluster_snapshots
            .get(policy)
            .map_err(backend_err)?
            .map(|v| decode(&v)))
    }

    fn put_config(&self, key: &str, dict: &Value) -> CoreResult<()> {
        self.config.insert(key, encode(dict)).map_err(backend_err)?;
        Ok(())
    }

    fn get_config(&self, key: &str) -> CoreResult<Option<Value>> {
        Ok(self.config.get(key).map_err(backend_err)?.map(|v| decode(&v)))
    }

    fn is_first_run(&self) -> CoreResult<bool> {
        Ok(self.config.is_empty())
    }

    fn record_event(&self, event: &Value) -> CoreResult<()> {
        let id = self.db.generate_id().map_err(backend_err)?;
        self.events.insert(id.to_be_bytes(), encode(event)).map_err(backend_err)?;
        Ok(())
    }

    fn recent_events(&self, max: usize) -> CoreResult<Vec<Value>> {
        let mut out: Vec<Value> = self
            .events
            .iter()
            .rev()
            .take(max)
            .map(|r| r.map_err(backend_err).map(|(_, v)| decode(&v)))
            .collect::<CoreResult<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }
}
