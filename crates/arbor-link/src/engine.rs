//! The auto-link engine.
//!
//! The engine keeps a mirror of every index definition in the store and
//! reacts to node events. Each batch is grouped per record. For every
//! affected record and definition the engine recomputes the combinations
//! from the tree, diffs them against the combinations it last applied for
//! the record's address, and adds or removes entries for the difference.
//!
//! Batches reach the engine one at a time, so the applied ledger always
//! matches the entries it wrote. Events of exclusive sections (relocation,
//! snapshot load) are handled inside the section, before readers can see
//! the result.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Address, Segment, StoreKey};
use arbor_store::{
    ExclusiveSection, IndexDefinition, NodeEvent, NodeObserver, Relationship, Store, ValueInstance,
};

use crate::access::{TreeRead, TreeWrite};
use crate::config::LinkConfig;
use crate::fields::{entry_key, record_combinations};

type Definitions = HashMap<StoreKey, Vec<IndexDefinition>>;

/// Combinations last applied per (index root, record address).
type Applied = HashMap<(StoreKey, Address), BTreeSet<Vec<Segment>>>;

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of auto-link counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Index entries written or re-pointed.
    pub entries_added: u64,
    /// Index entries deleted.
    pub entries_removed: u64,
    /// Removed entries re-pointed at another record with the same values.
    pub entries_repaired: u64,
    /// Event batches that touched at least one record.
    pub batches: u64,
    /// Batches handled inside an exclusive section.
    pub section_batches: u64,
}

#[derive(Debug, Default)]
struct LinkCounters {
    entries_added: AtomicU64,
    entries_removed: AtomicU64,
    entries_repaired: AtomicU64,
    batches: AtomicU64,
    section_batches: AtomicU64,
}

impl LinkCounters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LinkStats {
        LinkStats {
            entries_added: self.entries_added.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            entries_repaired: self.entries_repaired.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            section_batches: self.section_batches.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Batch Grouping
// =============================================================================

/// Events of one batch that fall inside one record.
#[derive(Debug, Default)]
struct RecordChange {
    /// The record node itself was created or removed.
    record_level: bool,
    /// Addresses the record node had when the batch removed it.
    retired: Vec<Address>,
    /// Paths below the record that were created or removed.
    touched: Vec<Vec<Segment>>,
}

impl RecordChange {
    fn note(&mut self, event: &NodeEvent, relative: &[Segment]) {
        if !relative.is_empty() {
            self.touched.push(relative.to_vec());
            return;
        }
        self.record_level = true;
        if let NodeEvent::Removed { address, .. } = event {
            self.retired.push(*address);
        }
    }

    /// Returns true if the change can alter the combinations of `definition`.
    fn affects(&self, definition: &IndexDefinition) -> bool {
        self.record_level
            || self
                .touched
                .iter()
                .any(|path| definition.fields.iter().any(|field| field.touches(path)))
    }
}

/// Longest declared parent strictly above `key`.
fn nearest_parent(definitions: &Definitions, key: &StoreKey) -> Option<usize> {
    (1..key.len())
        .rev()
        .find(|&depth| definitions.contains_key(&key.prefix(depth)))
}

// =============================================================================
// Engine
// =============================================================================

/// Maintains index entries for every index definition in a store.
///
/// # Example
///
/// ```rust
/// use arbor_common::types::StoreKey;
/// use arbor_link::{LinkConfig, LinkEngine};
/// use arbor_store::{IndexDefinition, Store};
///
/// let store = Store::default();
/// let engine = LinkEngine::attach(&store, LinkConfig::default());
/// let records = StoreKey::parse("/records").unwrap();
/// engine
///     .define_index(&store, &records, IndexDefinition::parse("/by-user", &["user"]).unwrap())
///     .unwrap();
///
/// store.set_value(&StoreKey::parse("/records/1/user/joe").unwrap(), "").unwrap();
/// assert_eq!(
///     store.follow(&StoreKey::parse("/by-user/joe").unwrap(), 0),
///     Some(StoreKey::parse("/records/1").unwrap())
/// );
/// ```
pub struct LinkEngine {
    config: LinkConfig,
    /// Parent key to definitions. Replaced wholesale; readers clone the Arc
    /// and never hold the lock across store calls.
    definitions: RwLock<Arc<Definitions>>,
    /// Only touched while the store's dispatch lock is held. Never held
    /// across store calls, which may re-enter the engine.
    applied: Mutex<Applied>,
    counters: LinkCounters,
}

impl LinkEngine {
    /// Creates a detached engine.
    #[must_use]
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            definitions: RwLock::new(Arc::new(Definitions::new())),
            applied: Mutex::new(Applied::new()),
            counters: LinkCounters::default(),
        }
    }

    /// Creates an engine, subscribes it to `store`, loads the definitions
    /// already stored there and brings their entries up to date.
    pub fn attach(store: &Store, config: LinkConfig) -> Arc<Self> {
        let engine = Arc::new(Self::new(config));
        let observer: Arc<dyn NodeObserver> = engine.clone();
        store.serialized(|| {
            store.subscribe(observer);
            engine.resync(&mut &*store);
        });
        engine
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    /// Definitions attached to `parent`.
    #[must_use]
    pub fn definitions(&self, parent: &StoreKey) -> Vec<IndexDefinition> {
        self.definitions
            .read()
            .get(parent)
            .cloned()
            .unwrap_or_default()
    }

    /// Every parent carrying definitions, in key order.
    #[must_use]
    pub fn parents(&self) -> Vec<StoreKey> {
        let mut parents: Vec<StoreKey> = self.definitions.read().keys().cloned().collect();
        parents.sort();
        parents
    }

    fn snapshot(&self) -> Arc<Definitions> {
        Arc::clone(&self.definitions.read())
    }

    fn update(&self, f: impl FnOnce(&mut Definitions)) {
        let mut guard = self.definitions.write();
        let mut next = Definitions::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    // =========================================================================
    // Definition Management
    // =========================================================================

    /// Attaches `definition` to `parent` and indexes the existing records.
    /// Returns the number of entries written.
    pub fn define_index(
        &self,
        store: &Store,
        parent: &StoreKey,
        definition: IndexDefinition,
    ) -> ArborResult<usize> {
        definition.validate()?;
        if definition.index_root.starts_with(parent) || parent.starts_with(&definition.index_root) {
            return Err(ArborError::invalid_argument(format!(
                "index root {} overlaps record parent {}",
                definition.index_root, parent
            )));
        }
        store.serialized(|| {
            let mut stored = store.index_definitions(parent);
            if stored.iter().any(|d| d.index_root == definition.index_root) {
                return Err(ArborError::IndexExists {
                    parent: parent.to_string(),
                    index_root: definition.index_root.to_string(),
                });
            }
            stored.push(definition.clone());
            store.set_index_definitions(parent, stored.clone())?;
            self.update(|defs| {
                defs.insert(parent.clone(), stored);
            });
            tracing::info!(
                parent = %parent,
                index_root = %definition.index_root,
                fields = definition.fields.len(),
                "index defined"
            );
            Ok(self.backfill(&mut &*store, parent, std::slice::from_ref(&definition)))
        })
    }

    /// Detaches the definition rooted at `index_root` from `parent` and
    /// deletes its entries.
    pub fn remove_index(&self, store: &Store, parent: &StoreKey, index_root: &StoreKey) -> ArborResult<()> {
        store.serialized(|| {
            let mut stored = store.index_definitions(parent);
            let Some(position) = stored.iter().position(|d| &d.index_root == index_root) else {
                return Err(ArborError::IndexNotFound {
                    parent: parent.to_string(),
                    index_root: index_root.to_string(),
                });
            };
            stored.remove(position);
            store.set_index_definitions(parent, stored.clone())?;
            self.update(|defs| {
                if stored.is_empty() {
                    defs.remove(parent);
                } else {
                    defs.insert(parent.clone(), stored);
                }
            });
            self.applied.lock().retain(|(root, _), _| root != index_root);
            store.delete(index_root);
            tracing::info!(parent = %parent, index_root = %index_root, "index removed");
            Ok(())
        })
    }

    /// Deletes and recomputes every index of `parent`. Returns the number of
    /// entries written.
    pub fn rebuild(&self, store: &Store, parent: &StoreKey) -> ArborResult<usize> {
        store.serialized(|| {
            let definitions = self.definitions(parent);
            if definitions.is_empty() {
                return Err(ArborError::invalid_argument(format!("no indexes defined on {parent}")));
            }
            for definition in &definitions {
                store.delete(&definition.index_root);
                self.applied
                    .lock()
                    .retain(|(root, _), _| root != &definition.index_root);
            }
            Ok(self.backfill(&mut &*store, parent, &definitions))
        })
    }

    /// Replaces the mirror with the definitions currently in `store`.
    pub fn reload(&self, store: &Store) {
        self.reload_from(store);
    }

    fn reload_from<T: TreeRead + ?Sized>(&self, tree: &T) {
        let loaded: Definitions = tree.all_index_definitions().into_iter().collect();
        tracing::debug!(parents = loaded.len(), "index definitions loaded");
        *self.definitions.write() = Arc::new(loaded);
    }

    /// Reloads the mirror, forgets the ledger and re-derives it from every
    /// record, writing entries that are missing.
    fn resync<W: TreeWrite>(&self, tree: &mut W) {
        self.reload_from(&*tree);
        self.applied.lock().clear();
        let definitions = self.snapshot();
        for (parent, defs) in definitions.iter() {
            self.backfill(tree, parent, defs);
        }
    }

    /// Writes the entries of every current record of `parent` and records
    /// them in the ledger.
    fn backfill<W: TreeWrite>(&self, tree: &mut W, parent: &StoreKey, definitions: &[IndexDefinition]) -> usize {
        let mut written = 0;
        let records = tree.children(parent);
        for record in &records {
            let record_key = parent.child(record.clone());
            let Some(address) = tree.address_of(&record_key) else {
                continue;
            };
            for definition in definitions {
                let combos = record_combinations(&*tree, &record_key, definition);
                for combo in &combos {
                    if self.add_entry(tree, definition, combo, address) {
                        written += 1;
                    }
                }
                self.remember(definition, address, combos);
            }
        }
        tracing::debug!(
            parent = %parent,
            records = records.len(),
            entries = written,
            "index backfill complete"
        );
        written
    }

    // =========================================================================
    // Applied Ledger
    // =========================================================================

    fn remember(&self, definition: &IndexDefinition, record: Address, combos: BTreeSet<Vec<Segment>>) {
        let slot = (definition.index_root.clone(), record);
        let mut applied = self.applied.lock();
        if combos.is_empty() {
            applied.remove(&slot);
        } else {
            applied.insert(slot, combos);
        }
    }

    fn forget(&self, definition: &IndexDefinition, record: Address) -> BTreeSet<Vec<Segment>> {
        self.applied
            .lock()
            .remove(&(definition.index_root.clone(), record))
            .unwrap_or_default()
    }

    // =========================================================================
    // Entry Maintenance
    // =========================================================================

    /// Points the entry for `combo` at `record` unless it already points at
    /// a live node. Returns true if the entry was written.
    fn add_entry<W: TreeWrite>(
        &self,
        tree: &mut W,
        definition: &IndexDefinition,
        combo: &[Segment],
        record: Address,
    ) -> bool {
        let entry = entry_key(definition, combo);
        let instance = ValueInstance::with_relationships(Bytes::new(), vec![record]);
        let written = match tree.set_if_absent(&entry, instance) {
            Ok(true) => true,
            Ok(false) => {
                let live = tree
                    .relationships(&entry)
                    .first()
                    .is_some_and(Relationship::is_live);
                !live && tree.set_relationship(&entry, 0, record).unwrap_or(false)
            }
            Err(err) => {
                tracing::warn!(entry = %entry, error = %err, "failed to write index entry");
                false
            }
        };
        if written {
            LinkCounters::bump(&self.counters.entries_added);
        }
        written
    }

    /// Deletes the entry for `combo` if it still points at `record`, then
    /// looks for another record of `parent` to take it over.
    fn remove_entry<W: TreeWrite>(
        &self,
        tree: &mut W,
        parent: &StoreKey,
        definition: &IndexDefinition,
        combo: &[Segment],
        record: Address,
    ) {
        let entry = entry_key(definition, combo);
        if !tree.delete_where(&entry, |view| view.relationship(0) == Some(record)) {
            return;
        }
        LinkCounters::bump(&self.counters.entries_removed);
        if !self.config.repair_collisions {
            return;
        }
        for other in tree.children(parent) {
            let other_key = parent.child(other);
            let Some(address) = tree.address_of(&other_key) else {
                continue;
            };
            if address == record {
                continue;
            }
            let combos = record_combinations(&*tree, &other_key, definition);
            if combos.iter().any(|c| c.as_slice() == combo) && self.add_entry(tree, definition, combo, address) {
                LinkCounters::bump(&self.counters.entries_repaired);
                tracing::trace!(entry = %entry, record = %other_key, "index entry repaired");
                return;
            }
        }
    }

    /// Brings the entries of one record in line with the tree.
    fn apply_change<W: TreeWrite>(
        &self,
        tree: &mut W,
        parent: &StoreKey,
        record: &Segment,
        change: &RecordChange,
        definitions: &[IndexDefinition],
    ) {
        let record_key = parent.child(record.clone());
        let current = tree.address_of(&record_key);

        for definition in definitions.iter().filter(|d| change.affects(d)) {
            for &retired in change.retired.iter().filter(|&&a| Some(a) != current) {
                for combo in &self.forget(definition, retired) {
                    self.remove_entry(tree, parent, definition, combo, retired);
                }
            }
            let Some(address) = current else {
                continue;
            };
            let before = self.forget(definition, address);
            let after = record_combinations(&*tree, &record_key, definition);
            for combo in before.difference(&after) {
                self.remove_entry(tree, parent, definition, combo, address);
            }
            for combo in after.difference(&before) {
                self.add_entry(tree, definition, combo, address);
            }
            self.remember(definition, address, after);
        }
    }

    /// Handles one batch of events through `tree`. Returns false if the
    /// batch touched no record.
    fn maintain<W: TreeWrite>(&self, tree: &mut W, events: &[NodeEvent]) -> bool {
        let definitions = self.snapshot();
        if definitions.is_empty() {
            return false;
        }

        let mut changes: BTreeMap<(StoreKey, Segment), RecordChange> = BTreeMap::new();
        let mut parents_removed = false;
        for event in events {
            let key = event.key();
            if !event.is_created() && definitions.keys().any(|parent| parent.starts_with(key)) {
                parents_removed = true;
            }
            let Some(depth) = nearest_parent(&definitions, key) else {
                continue;
            };
            let segments = key.segments();
            changes
                .entry((key.prefix(depth), segments[depth].clone()))
                .or_default()
                .note(event, &segments[depth + 1..]);
        }

        if !changes.is_empty() {
            LinkCounters::bump(&self.counters.batches);
            tracing::trace!(records = changes.len(), events = events.len(), "applying index changes");
        }
        for ((parent, record), change) in &changes {
            if let Some(defs) = definitions.get(parent) {
                self.apply_change(tree, parent, record, change, defs);
            }
        }

        if parents_removed {
            self.reload_from(&*tree);
            let current = self.snapshot();
            let roots: BTreeSet<&StoreKey> = current.values().flatten().map(|d| &d.index_root).collect();
            self.applied.lock().retain(|(root, _), _| roots.contains(root));
            for (parent, defs) in current.iter() {
                if !definitions.contains_key(parent) {
                    self.backfill(tree, parent, defs);
                }
            }
        }
        !changes.is_empty()
    }
}

impl NodeObserver for LinkEngine {
    fn on_events(&self, store: &Store, events: &[NodeEvent]) {
        self.maintain(&mut &*store, events);
    }

    fn on_section_events(&self, section: &mut ExclusiveSection<'_>, events: &[NodeEvent]) -> bool {
        if self.maintain(section, events) {
            LinkCounters::bump(&self.counters.section_batches);
        }
        true
    }

    fn on_reset(&self, store: &Store) {
        self.resync(&mut &*store);
    }
}

impl std::fmt::Debug for LinkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkEngine")
            .field("config", &self.config)
            .field("parents", &self.definitions.read().len())
            .field("stats", &self.stats())
            .finish()
    }
}
