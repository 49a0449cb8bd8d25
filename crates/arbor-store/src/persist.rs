//! Snapshot persistence.
//!
//! A snapshot is a JSON-lines stream: one header line followed by one
//! [`NodeRecord`] per node in depth-first order, parents before children.
//!
//! ```text
//! {"magic":"ARBOR-SNAPSHOT","version":1,"next_address":12}
//! {"address":1,"parent":0,"segment":"records",...}
//! {"address":2,"parent":1,"segment":"1","history":[[17..,{"payload":[..],"relationships":[]}]],...}
//! ```
//!
//! Loading parses and checks the whole stream before anything is
//! replaced; a rejected snapshot leaves the store as it was.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use arbor_common::constants::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Address, Segment, StoreKey, Timestamp};

use crate::exclusive::{detach_all, ExclusiveSection};
use crate::level::{new_level, LevelData, LevelRef};
use crate::node::{Node, ValueInstance};
use crate::registry::{NodeLocation, Registry, RegistryOp};
use crate::schema::IndexDefinition;
use crate::store::Store;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    magic: String,
    version: u32,
    next_address: u64,
}

/// One node as written to a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Permanent address.
    pub address: Address,
    /// Address of the parent node, zero for children of the root.
    pub parent: Address,
    /// Escaped segment text.
    pub segment: String,
    /// History entries, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<(Timestamp, ValueInstance)>,
    /// Timestamp of the current entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Timestamp>,
    /// Absolute expiration, zero for never.
    pub expiration: Timestamp,
    /// Metadata attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Index definitions stored on the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
}

impl NodeRecord {
    fn capture(owner: Address, segment: &Segment, node: &Node) -> Self {
        Self {
            address: node.address,
            parent: owner,
            segment: segment.escape(),
            history: node.history_entries(),
            current: node.current,
            expiration: node.expiration,
            metadata: node.metadata.clone(),
            indexes: node.indexes.clone(),
        }
    }

    fn into_node(self) -> Node {
        let mut node = Node::new(self.address);
        for (timestamp, instance) in self.history {
            node.record(timestamp, instance);
        }
        node.current = self.current;
        node.expiration = self.expiration;
        node.metadata = self.metadata;
        node.indexes = self.indexes;
        node
    }
}

/// A record that passed validation, with its line for error messages.
struct Parsed {
    line: usize,
    segment: Segment,
    record: NodeRecord,
}

impl Store {
    /// Writes a snapshot of the whole store. Returns the number of nodes.
    pub fn save<W: Write>(&self, writer: W) -> ArborResult<usize> {
        self.exclusive(|section| section.save(writer))
    }

    /// Replaces the whole store with a snapshot. Returns the number of
    /// nodes loaded.
    pub fn load<R: BufRead>(&self, reader: R) -> ArborResult<usize> {
        self.exclusive(|section| section.load(reader))
    }

    /// Writes a snapshot to a file, replacing it.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> ArborResult<usize> {
        let file = File::create(path.as_ref())?;
        self.save(file)
    }

    /// Loads a snapshot from a file.
    pub fn load_from_path(&self, path: impl AsRef<Path>) -> ArborResult<usize> {
        let file = File::open(path.as_ref())?;
        self.load(BufReader::new(file))
    }
}

impl ExclusiveSection<'_> {
    /// Writes a snapshot of the quiesced store.
    pub fn save<W: Write>(&self, writer: W) -> ArborResult<usize> {
        let mut out = BufWriter::new(writer);
        let header = SnapshotHeader {
            magic: SNAPSHOT_MAGIC.to_string(),
            version: SNAPSHOT_VERSION,
            next_address: self.store.next_address.load(Ordering::SeqCst),
        };
        write_line(&mut out, &header)?;
        let mut count = 0;
        save_level(&mut out, &self.root, &mut count)?;
        out.flush()?;
        tracing::info!(nodes = count, "snapshot saved");
        Ok(count)
    }

    /// Replaces the tree with a snapshot. On error nothing changes.
    pub fn load<R: BufRead>(&mut self, reader: R) -> ArborResult<usize> {
        let (header, records) = parse_snapshot(reader)?;
        let count = records.len();
        let newest = records
            .iter()
            .flat_map(|p| p.record.history.iter().map(|(ts, _)| *ts))
            .max();
        let highest = records
            .iter()
            .map(|p| p.record.address.as_u64())
            .max()
            .unwrap_or(0);

        let mut by_parent: HashMap<Address, Vec<Parsed>> = HashMap::new();
        for parsed in records {
            by_parent.entry(parsed.record.parent).or_default().push(parsed);
        }
        let mut registry = Registry::new();
        let root_ref = self.root.level_ref();
        let data = build_level(
            Address::ROOT_OWNER,
            &StoreKey::root(),
            &root_ref,
            &mut by_parent,
            &mut registry,
        );
        if let Some(orphans) = by_parent.values().next() {
            let line = orphans.first().map_or(0, |p| p.line);
            return Err(ArborError::serialization(line, "record parent is not in the snapshot"));
        }

        let old = std::mem::replace(&mut *self.root, data);
        detach_all(&old);
        *self.store.registry.write() = registry;
        let next = header.next_address.max(highest + 1);
        self.store.next_address.fetch_max(next, Ordering::SeqCst);
        if let Some(ts) = newest {
            self.store.clock.observe(ts);
        }
        self.reset = true;
        tracing::info!(nodes = count, next_address = next, "snapshot loaded");
        Ok(count)
    }
}

fn write_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> ArborResult<()> {
    serde_json::to_writer(&mut *out, value).map_err(|e| ArborError::serialization(0, e.to_string()))?;
    out.write_all(b"\n")?;
    Ok(())
}

fn save_level<W: Write>(out: &mut W, level: &LevelData, count: &mut usize) -> ArborResult<()> {
    for (segment, node) in level.children.iter() {
        let record = NodeRecord::capture(level.owner, &Segment::new(segment.clone()), node);
        write_line(out, &record)?;
        *count += 1;
        if let Some(child) = &node.child {
            save_level(out, &child.read(), count)?;
        }
    }
    Ok(())
}

fn parse_snapshot<R: BufRead>(reader: R) -> ArborResult<(SnapshotHeader, Vec<Parsed>)> {
    let mut lines = reader.lines();
    let header_text = lines
        .next()
        .transpose()?
        .ok_or_else(|| ArborError::corruption("snapshot is empty"))?;
    let header: SnapshotHeader =
        serde_json::from_str(&header_text).map_err(|e| ArborError::serialization(1, e.to_string()))?;
    if header.magic != SNAPSHOT_MAGIC {
        return Err(ArborError::corruption(format!("bad snapshot magic '{}'", header.magic)));
    }
    if header.version != SNAPSHOT_VERSION {
        return Err(ArborError::corruption(format!(
            "unsupported snapshot version {}",
            header.version
        )));
    }

    let mut seen: HashSet<Address> = HashSet::new();
    let mut names: HashSet<(Address, Segment)> = HashSet::new();
    let mut with_children: HashSet<Address> = HashSet::new();
    let mut parsed = Vec::new();
    for (index, text) in lines.enumerate() {
        let line = index + 2;
        let text = text?;
        if text.trim().is_empty() {
            continue;
        }
        let record: NodeRecord =
            serde_json::from_str(&text).map_err(|e| ArborError::serialization(line, e.to_string()))?;
        let segment = Segment::unescape(&record.segment)
            .map_err(|e| ArborError::serialization(line, e.to_string()))?;

        if !record.address.is_valid() || !seen.insert(record.address) {
            return Err(reject(line, format!("duplicate or invalid address {}", record.address)));
        }
        if record.parent != Address::ROOT_OWNER && !seen.contains(&record.parent) {
            return Err(reject(line, format!("parent {} not seen before child", record.parent)));
        }
        if !names.insert((record.parent, segment.clone())) {
            return Err(reject(line, format!("duplicate segment '{}'", record.segment)));
        }
        if let Some(current) = record.current {
            if !record.history.iter().any(|(ts, _)| *ts == current) {
                return Err(reject(line, "current entry missing from history".to_string()));
            }
        }
        for definition in &record.indexes {
            definition
                .validate()
                .map_err(|e| ArborError::serialization(line, e.to_string()))?;
        }
        with_children.insert(record.parent);
        parsed.push(Parsed {
            line,
            segment,
            record,
        });
    }

    // A node with nothing to keep it alive cannot have been saved.
    for p in &parsed {
        let r = &p.record;
        if r.history.is_empty() && r.indexes.is_empty() && !with_children.contains(&r.address) {
            return Err(reject(p.line, format!("vacant node {}", r.address)));
        }
    }
    Ok((header, parsed))
}

fn reject(line: usize, message: String) -> ArborError {
    tracing::warn!(line, %message, "rejecting snapshot record");
    ArborError::corruption(format!("line {line}: {message}"))
}

/// Builds the level owned by `owner` from the parsed records, recording
/// every node in `registry`. `level_ref` is the lock the data will live in.
fn build_level(
    owner: Address,
    prefix: &StoreKey,
    level_ref: &LevelRef,
    by_parent: &mut HashMap<Address, Vec<Parsed>>,
    registry: &mut Registry,
) -> LevelData {
    let mut data = LevelData::new(owner);
    for parsed in by_parent.remove(&owner).unwrap_or_default() {
        let key = prefix.child(parsed.segment.clone());
        let address = parsed.record.address;
        let mut node = parsed.record.into_node();
        if by_parent.contains_key(&address) {
            let child = new_level(address);
            let built = build_level(address, &key, &child, by_parent, registry);
            *child.write() = built;
            node.child = Some(child);
        }
        registry.apply(RegistryOp::Insert(
            address,
            NodeLocation {
                key: key.clone(),
                level: Arc::clone(level_ref),
            },
        ));
        if node.has_value() {
            registry.apply(RegistryOp::SetPath(key, address));
        }
        data.children.insert(parsed.segment.into_bytes(), node);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::StoreConfig;

    fn key(text: &str) -> StoreKey {
        StoreKey::parse(text).unwrap()
    }

    fn populated() -> Store {
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        let user = store.set_value(&key("/users/1"), "ada").unwrap().address;
        store.set_value(&key("/users/1"), "ada lovelace").unwrap();
        store
            .set_instance(&key("/orders/7"), ValueInstance::with_relationships("o", vec![user]))
            .unwrap();
        store.set_metadata(&key("/orders/7"), "state", "open").unwrap();
        store.set_value(&key("/odd").child("a/b\\c"), "escaped").unwrap();
        store
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = populated();
        let mut buffer = Vec::new();
        let saved = store.save(&mut buffer).unwrap();
        assert_eq!(saved, store.node_count());

        let restored = Store::new(StoreConfig::for_testing()).unwrap();
        let loaded = restored.load(buffer.as_slice()).unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(restored.get(&key("/users/1")).unwrap().payload, "ada lovelace");
        assert_eq!(restored.history(&key("/users/1")).len(), 2);
        assert_eq!(restored.follow(&key("/orders/7"), 0), Some(key("/users/1")));
        assert_eq!(restored.metadata_value(&key("/orders/7"), "state").as_deref(), Some("open"));
        assert_eq!(restored.address_of(&key("/users/1")), store.address_of(&key("/users/1")));
        assert!(restored.exists(&key("/odd").child("a/b\\c")));

        let fresh = restored.set_value(&key("/new"), "n").unwrap();
        assert!(fresh.address.as_u64() > store.node_count() as u64);
    }

    #[test]
    fn test_load_rejects_bad_header() {
        let store = populated();
        let before = store.node_count();
        let err = store.load(&b"{\"magic\":\"NOPE\",\"version\":1,\"next_address\":1}\n"[..]).unwrap_err();
        assert!(matches!(err, ArborError::Corruption { .. }));
        let err = store.load(&b""[..]).unwrap_err();
        assert!(matches!(err, ArborError::Corruption { .. }));
        assert_eq!(store.node_count(), before);
    }

    #[test]
    fn test_load_failure_leaves_store_untouched() {
        let store = populated();
        let mut buffer = Vec::new();
        store.save(&mut buffer).unwrap();
        let mut text = String::from_utf8(buffer).unwrap();
        text.push_str("{not json}\n");

        let target = Store::new(StoreConfig::for_testing()).unwrap();
        target.set_value(&key("/keep"), "me").unwrap();
        let err = target.load(text.as_bytes()).unwrap_err();
        match err {
            ArborError::Serialization { line, .. } => assert!(line > 1),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(target.get(&key("/keep")).unwrap().payload, "me");
        assert_eq!(target.node_count(), 1);
    }

    #[test]
    fn test_load_rejects_orphan_and_duplicate() {
        let header = "{\"magic\":\"ARBOR-SNAPSHOT\",\"version\":1,\"next_address\":5}\n";
        let orphan = format!(
            "{header}{{\"address\":2,\"parent\":9,\"segment\":\"x\",\"history\":[[1,{{\"payload\":[],\"relationships\":[]}}]],\"current\":1,\"expiration\":0}}\n"
        );
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        assert!(matches!(store.load(orphan.as_bytes()), Err(ArborError::Corruption { .. })));

        let record = "{\"address\":2,\"parent\":0,\"segment\":\"x\",\"history\":[[1,{\"payload\":[],\"relationships\":[]}]],\"current\":1,\"expiration\":0}\n";
        let duplicate = format!("{header}{record}{record}");
        assert!(matches!(store.load(duplicate.as_bytes()), Err(ArborError::Corruption { .. })));

        let single = format!("{header}{record}");
        assert_eq!(store.load(single.as_bytes()).unwrap(), 1);
        assert_eq!(store.address_of(&key("/x")), Some(Address::new(2)));
    }

    #[test]
    fn test_save_to_path() {
        let store = populated();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.snapshot");
        let saved = store.save_to_path(&path).unwrap();

        let restored = Store::new(StoreConfig::for_testing()).unwrap();
        assert_eq!(restored.load_from_path(&path).unwrap(), saved);
        assert_eq!(restored.walk(&StoreKey::root(), |_| {}), store.walk(&StoreKey::root(), |_| {}));
    }
}
