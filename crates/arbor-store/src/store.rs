//! The concurrent key tree.
//!
//! Lock discipline:
//!
//! - reads lock-couple shared guards from the root down, two levels at most;
//! - single-node writes read-couple to the deepest level that must change,
//!   then upgrade by releasing and taking the exclusive lock, re-validating
//!   a probe of the target before mutating;
//! - removals hold exclusive guards on the whole path from the root so
//!   emptied levels can be pruned upward;
//! - the registry lock is taken after level locks, except on the address
//!   fast path, which only ever tries the level lock.
//!
//! Every guard a store operation takes is counted in `active`. An
//! exclusive section raises `exclusive` and waits for the count to drain.
//! Operations check the flag right after their first acquisition and back
//! off while it is set; acquisitions made while already holding a counted
//! guard do not check, so a running operation always completes.
//!
//! Observer callbacks run one batch at a time under the dispatch lock.
//! Exclusive sections take it before the root lock and keep it until their
//! own events are delivered, so observers never see a section half applied.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{ReentrantMutex, RwLock};

use arbor_common::config::StoreConfig;
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Address, MonotonicClock, Segment, StoreKey, Timestamp};

use crate::latch::{LevelReadGuard, LevelWriteGuard};
use crate::level::{new_level, LevelData, LevelRef};
use crate::node::{Node, ValueInstance};
use crate::observer::{NodeEvent, NodeObserver};
use crate::ops::{
    apply_at, chain_apply, collect_subtree, remove_child, reach_level, Mutation, NodeSlot, Reach,
    ReadStart,
};
use crate::registry::Registry;
use crate::schema::IndexDefinition;
use crate::stats::{StatsCounters, StoreStats};
use crate::view::{AsOf, Lookup, NodeView, Relationship, WriteOutcome};

/// What a write traversal saw at the level it is about to upgrade.
enum Probe {
    Absent,
    Present {
        address: Address,
        child: Option<LevelRef>,
    },
}

impl Probe {
    fn of(node: Option<&Node>) -> Self {
        match node {
            None => Self::Absent,
            Some(node) => Self::Present {
                address: node.address,
                child: node.child.clone(),
            },
        }
    }

    fn matches(&self, node: Option<&Node>) -> bool {
        match (self, node) {
            (Self::Absent, None) => true,
            (Self::Present { address, child }, Some(node)) => {
                *address == node.address
                    && match (child, &node.child) {
                        (None, None) => true,
                        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                        _ => false,
                    }
            }
            _ => false,
        }
    }
}

/// Result of looking up one node by path.
enum NodeRead<R> {
    Found(R),
    Missing,
    Expired,
}

/// An in-process hierarchical key-value store.
///
/// # Example
///
/// ```rust
/// use arbor_store::Store;
/// use arbor_common::types::StoreKey;
///
/// let store = Store::default();
/// let key = StoreKey::parse("/users/42/name").unwrap();
/// store.set_value(&key, "Ada").unwrap();
///
/// assert_eq!(store.get(&key).unwrap().payload, "Ada");
/// assert!(store.exists(&StoreKey::parse("/users/42").unwrap()));
/// ```
pub struct Store {
    pub(crate) config: StoreConfig,
    /// The root level. Its identity never changes; load and purge replace
    /// its contents.
    pub(crate) root: LevelRef,
    pub(crate) registry: RwLock<Registry>,
    observers: RwLock<Vec<Arc<dyn NodeObserver>>>,
    /// Serializes observer callbacks and exclusive sections. Never taken
    /// while a level guard is held.
    pub(crate) dispatch_lock: ReentrantMutex<()>,
    pub(crate) clock: MonotonicClock,
    pub(crate) next_address: AtomicU64,
    /// Counted level guards currently held.
    pub(crate) active: AtomicUsize,
    /// Raised while an exclusive section waits or runs.
    pub(crate) exclusive: AtomicBool,
    /// Bumped at the end of every exclusive section.
    pub(crate) epoch: AtomicU64,
    pub(crate) stats: StatsCounters,
}

impl Store {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> ArborResult<Self> {
        config.validate().map_err(ArborError::invalid_argument)?;
        tracing::debug!(
            max_key_depth = config.max_key_depth,
            max_segment_size = config.max_segment_size,
            "creating store"
        );
        Ok(Self::build(config))
    }

    fn build(config: StoreConfig) -> Self {
        Self {
            config,
            root: new_level(Address::ROOT_OWNER),
            registry: RwLock::new(Registry::new()),
            observers: RwLock::new(Vec::new()),
            dispatch_lock: ReentrantMutex::new(()),
            clock: MonotonicClock::new(),
            next_address: AtomicU64::new(Address::FIRST.as_u64()),
            active: AtomicUsize::new(0),
            exclusive: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            stats: StatsCounters::default(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns a snapshot of the contention counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.stats.snapshot()
    }

    /// Number of nodes in the tree, including intermediate ones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.registry.read().node_count()
    }

    /// Number of nodes that currently hold a value.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.registry.read().valued_count()
    }

    /// Registers an observer for node events.
    pub fn subscribe(&self, observer: Arc<dyn NodeObserver>) {
        self.observers.write().push(observer);
    }

    /// Runs `f` while no observer callback or exclusive section runs on
    /// another thread. Store calls made by `f` deliver their events on this
    /// thread before returning, as usual.
    pub fn serialized<R>(&self, f: impl FnOnce() -> R) -> R {
        let _serial = self.dispatch_lock.lock();
        f()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    pub(crate) fn allocate_address(&self) -> Address {
        Address::new(self.next_address.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn check_key(&self, key: &StoreKey) -> ArborResult<()> {
        if key.is_root() {
            return Err(ArborError::EmptyKey);
        }
        key.validate(&self.config)
    }

    /// Counts a back-off and sleeps until the exclusive flag drops.
    fn back_off(&self) {
        StatsCounters::bump(&self.stats.exclusive_backoffs);
        wait_until(self.config.quiesce_backoff, self.config.quiesce_backoff_max, || {
            !self.exclusive.load(Ordering::SeqCst)
        });
    }

    fn enter_read(&self) -> Option<LevelReadGuard<'_>> {
        let guard = LevelReadGuard::acquire(&self.root, Some(&self.active));
        if self.exclusive.load(Ordering::SeqCst) {
            drop(guard);
            self.back_off();
            return None;
        }
        Some(guard)
    }

    fn enter_write(&self, level: &LevelRef) -> Option<LevelWriteGuard<'_>> {
        let guard = LevelWriteGuard::acquire(level, Some(&self.active));
        if self.exclusive.load(Ordering::SeqCst) {
            drop(guard);
            self.back_off();
            return None;
        }
        Some(guard)
    }

    pub(crate) fn observers(&self) -> Vec<Arc<dyn NodeObserver>> {
        self.observers.read().clone()
    }

    pub(crate) fn dispatch(&self, events: Vec<NodeEvent>) {
        self.dispatch_to(&self.observers(), &events);
    }

    pub(crate) fn dispatch_to(&self, observers: &[Arc<dyn NodeObserver>], events: &[NodeEvent]) {
        if events.is_empty() || observers.is_empty() {
            return;
        }
        let _serial = self.dispatch_lock.lock();
        for observer in observers {
            observer.on_events(self, events);
        }
    }

    pub(crate) fn notify_reset(&self) {
        let observers = self.observers();
        let _serial = self.dispatch_lock.lock();
        for observer in &observers {
            observer.on_reset(self);
        }
    }

    /// Lock-couples to the children of `segments` and runs `f` there.
    fn read_level<R>(&self, segments: &[Segment], now: Timestamp, f: impl FnOnce(&LevelData) -> R) -> Reach<R> {
        loop {
            let Some(root) = self.enter_read() else {
                continue;
            };
            return reach_level(ReadStart::Guard(root), Some(&self.active), segments, now, f);
        }
    }

    /// Reads one node by path. Returns the closure result and the number
    /// of leading segments that resolved.
    fn read_node<R>(&self, key: &StoreKey, f: impl FnOnce(&Node) -> R) -> (Option<R>, usize) {
        let Some((last, parent)) = key.segments().split_last() else {
            return (None, 0);
        };
        let now = Timestamp::now();
        let reach = self.read_level(parent, now, |level| match level.get(last) {
            None => NodeRead::Missing,
            Some(node) if node.is_expired(now) => NodeRead::Expired,
            Some(node) => NodeRead::Found(f(node)),
        });
        match reach {
            Reach::Found(NodeRead::Found(r)) => (Some(r), key.len()),
            Reach::Found(NodeRead::Missing) => (None, parent.len()),
            Reach::Found(NodeRead::Expired) => {
                self.schedule_eviction(key, Some(key.len()));
                (None, parent.len())
            }
            Reach::Missing { matched, expired } => {
                self.schedule_eviction(key, expired);
                (None, matched)
            }
        }
    }

    /// Removes the expired node a read ran into, after the read released
    /// its locks.
    fn schedule_eviction(&self, key: &StoreKey, expired_depth: Option<usize>) {
        if let Some(depth) = expired_depth.filter(|_| self.config.lazy_eviction) {
            self.evict_expired(&key.prefix(depth));
        }
    }

    fn evict_expired(&self, key: &StoreKey) {
        // The chain walk evicts whatever expired node it meets on the way.
        self.chain(key, |_, _, _, _| ());
    }

    /// Single-node write protocol. `f` runs under the exclusive lock of the
    /// level holding the target; `None` means the target did not exist and
    /// `create` was false.
    pub(crate) fn write_node<R>(
        &self,
        key: &StoreKey,
        create: bool,
        f: impl for<'m, 'n> FnOnce(&mut Mutation<'m>, NodeSlot<'n>) -> R,
    ) -> ArborResult<Option<R>> {
        self.check_key(key)?;
        let segments = key.segments();
        let last = segments.len() - 1;

        loop {
            let epoch = self.epoch.load(Ordering::SeqCst);
            let now = Timestamp::now();
            let Some(root) = self.enter_read() else {
                continue;
            };

            // Read-couple to the deepest level that has to change.
            let mut guard = root;
            let mut depth = 0;
            let (probe, expired) = loop {
                let node = guard.get(&segments[depth]);
                let expired = node.is_some_and(|n| n.is_expired(now));
                if let Some(n) = node.filter(|_| depth < last && !expired) {
                    if let Some(child) = n.child.clone() {
                        guard = LevelReadGuard::acquire(&child, Some(&self.active));
                        depth += 1;
                        continue;
                    }
                }
                break (Probe::of(node), expired);
            };
            let level = Arc::clone(guard.level());
            drop(guard);

            if !create && (depth < last || expired || matches!(probe, Probe::Absent)) {
                if expired {
                    self.schedule_eviction(key, Some(depth + 1));
                }
                return Ok(None);
            }

            // Upgrade and re-validate.
            let Some(mut guard) = self.enter_write(&level) else {
                continue;
            };
            if guard.detached
                || self.epoch.load(Ordering::SeqCst) != epoch
                || !probe.matches(guard.get(&segments[depth]))
            {
                drop(guard);
                StatsCounters::bump(&self.stats.traversal_retries);
                tracing::trace!(key = %key, depth, "write probe changed, restarting traversal");
                continue;
            }

            let mut m = Mutation::new(self, Some(&self.active), now);
            let result = apply_at(&mut m, &mut guard, &key.prefix(depth), &segments[depth..], create, f);
            m.commit();
            drop(guard);
            self.dispatch(m.into_events());
            return Ok(result);
        }
    }

    /// Whole-path protocol: exclusive guards from the root to the target.
    pub(crate) fn chain<R>(
        &self,
        key: &StoreKey,
        op: impl for<'m> FnOnce(&mut Mutation<'m>, &mut LevelData, &Segment, &StoreKey) -> R,
    ) -> Option<R> {
        if key.is_root() {
            return None;
        }
        loop {
            let Some(mut root) = self.enter_write(&self.root) else {
                continue;
            };
            let mut m = Mutation::new(self, Some(&self.active), Timestamp::now());
            let result = chain_apply(&mut m, &mut root, key.segments(), op);
            m.commit();
            drop(root);
            self.dispatch(m.into_events());
            return result;
        }
    }

    fn resolve(&self, addresses: &[Address]) -> Vec<Relationship> {
        let registry = self.registry.read();
        addresses
            .iter()
            .map(|&address| match registry.key_of(address) {
                Some(key) if address.is_valid() => Relationship::Live {
                    address,
                    key: key.clone(),
                },
                _ => Relationship::Broken { address },
            })
            .collect()
    }

    // =========================================================================
    // Value Writes
    // =========================================================================

    /// Sets the value of `key`, creating the node and its ancestors as needed.
    pub fn set_value(&self, key: &StoreKey, payload: impl Into<Bytes>) -> ArborResult<WriteOutcome> {
        self.set_instance(key, ValueInstance::new(payload))
    }

    /// Sets the value of `key` including relationships.
    pub fn set_instance(&self, key: &StoreKey, instance: ValueInstance) -> ArborResult<WriteOutcome> {
        let outcome = self.write_node(key, true, |m, slot| {
            let timestamp = m.store.clock.tick();
            slot.node.record(timestamp, instance);
            WriteOutcome {
                address: slot.node.address,
                timestamp,
                created: slot.created,
            }
        })?;
        outcome.ok_or_else(|| ArborError::internal("creating write produced no node"))
    }

    /// Inserts a history entry at an explicit timestamp. The current value
    /// moves only if `timestamp` is the newest entry.
    pub fn set_history_entry(
        &self,
        key: &StoreKey,
        timestamp: Timestamp,
        instance: ValueInstance,
    ) -> ArborResult<WriteOutcome> {
        self.clock.observe(timestamp);
        let outcome = self.write_node(key, true, |_, slot| {
            slot.node.record(timestamp, instance);
            WriteOutcome {
                address: slot.node.address,
                timestamp,
                created: slot.created,
            }
        })?;
        outcome.ok_or_else(|| ArborError::internal("creating write produced no node"))
    }

    /// Writes only if `key` holds no value.
    pub fn set_if_absent(&self, key: &StoreKey, instance: ValueInstance) -> ArborResult<Option<WriteOutcome>> {
        let outcome = self.write_node(key, true, |m, slot| {
            if slot.node.has_value() {
                return None;
            }
            let timestamp = m.store.clock.tick();
            slot.node.record(timestamp, instance);
            Some(WriteOutcome {
                address: slot.node.address,
                timestamp,
                created: slot.created,
            })
        })?;
        Ok(outcome.flatten())
    }

    /// Writes only if `key` already holds a value.
    pub fn update_if_present(&self, key: &StoreKey, instance: ValueInstance) -> ArborResult<Option<WriteOutcome>> {
        let outcome = self.write_node(key, false, |m, slot| {
            if !slot.node.has_value() {
                return None;
            }
            let timestamp = m.store.clock.tick();
            slot.node.record(timestamp, instance);
            Some(WriteOutcome {
                address: slot.node.address,
                timestamp,
                created: false,
            })
        })?;
        Ok(outcome.flatten())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current value of `key`.
    #[must_use]
    pub fn get(&self, key: &StoreKey) -> Option<ValueInstance> {
        self.read_node(key, |node| node.current_value().cloned()).0.flatten()
    }

    /// Value of `key` in effect at the given point in time.
    #[must_use]
    pub fn get_at(&self, key: &StoreKey, as_of: AsOf) -> Option<ValueInstance> {
        let ts = as_of.resolve(Timestamp::now());
        self.read_node(key, |node| node.value_at(ts).map(|(_, v)| v.clone()))
            .0
            .flatten()
    }

    /// Full value history of `key`, oldest first.
    #[must_use]
    pub fn history(&self, key: &StoreKey) -> Vec<(Timestamp, ValueInstance)> {
        self.read_node(key, Node::history_entries).0.unwrap_or_default()
    }

    /// Looks up `key`, reporting how many leading segments resolved.
    #[must_use]
    pub fn locate(&self, key: &StoreKey) -> Lookup {
        let (view, matched) = self.read_node(key, |node| NodeView::capture(key.clone(), node));
        Lookup { view, matched }
    }

    /// Returns true if a visible node exists at `key`. The root always exists.
    #[must_use]
    pub fn exists(&self, key: &StoreKey) -> bool {
        key.is_root() || self.read_node(key, |_| ()).0.is_some()
    }

    /// Permanent address of the node at `key`.
    #[must_use]
    pub fn address_of(&self, key: &StoreKey) -> Option<Address> {
        self.read_node(key, |node| node.address).0
    }

    /// Current path of the node with `address`.
    #[must_use]
    pub fn path_of(&self, address: Address) -> Option<StoreKey> {
        self.registry.read().key_of(address).cloned()
    }

    /// Address of the node at `key` if it holds a value, from the path map.
    #[must_use]
    pub fn value_address(&self, key: &StoreKey) -> Option<Address> {
        self.registry.read().valued_address(key)
    }

    /// Looks a node up by address without walking its path.
    ///
    /// Only the node's own expiration is checked.
    #[must_use]
    pub fn view_by_address(&self, address: Address) -> Option<NodeView> {
        loop {
            let registry = self.registry.read();
            let location = registry.location(address)?;
            let key = location.key.clone();
            let Some(guard) = LevelReadGuard::try_acquire(&location.level, Some(&self.active)) else {
                drop(registry);
                StatsCounters::bump(&self.stats.fast_path_restarts);
                tracing::trace!(address = %address, "fast path level busy, restarting");
                if self.config.fast_path_yield {
                    std::thread::yield_now();
                }
                continue;
            };
            drop(registry);
            if self.exclusive.load(Ordering::SeqCst) {
                drop(guard);
                self.back_off();
                continue;
            }
            let node = guard
                .get(key.last()?)
                .filter(|n| n.address == address && !n.is_expired(Timestamp::now()))?;
            return Some(NodeView::capture(key, node));
        }
    }

    /// Segments of the visible children of `key`, in order.
    #[must_use]
    pub fn children(&self, key: &StoreKey) -> Vec<Segment> {
        let now = Timestamp::now();
        match self.read_level(key.segments(), now, |level| {
            level
                .children
                .iter()
                .filter(|(_, node)| !node.is_expired(now))
                .map(|(seg, _)| Segment::new(seg.clone()))
                .collect::<Vec<_>>()
        }) {
            Reach::Found(children) => children,
            Reach::Missing { .. } => Vec::new(),
        }
    }

    /// Largest visible child segment of `key` that is `<= segment`.
    #[must_use]
    pub fn child_floor(&self, key: &StoreKey, segment: &Segment) -> Option<Segment> {
        let now = Timestamp::now();
        match self.read_level(key.segments(), now, |level| {
            level
                .children
                .range_back_from(segment.as_bytes())
                .find(|(_, node)| !node.is_expired(now))
                .map(|(seg, _)| Segment::new(seg.clone()))
        }) {
            Reach::Found(found) => found,
            Reach::Missing { .. } => None,
        }
    }

    /// Smallest visible child segment of `key` that is `>= segment`.
    #[must_use]
    pub fn child_ceiling(&self, key: &StoreKey, segment: &Segment) -> Option<Segment> {
        let now = Timestamp::now();
        match self.read_level(key.segments(), now, |level| {
            level
                .children
                .range_from(segment.as_bytes())
                .find(|(_, node)| !node.is_expired(now))
                .map(|(seg, _)| Segment::new(seg.clone()))
        }) {
            Reach::Found(found) => found,
            Reach::Missing { .. } => None,
        }
    }

    /// Visits the node at `key` (unless it is the root) and every visible
    /// descendant in pre-order, from one consistent snapshot. Returns the
    /// number of nodes visited.
    pub fn walk(&self, key: &StoreKey, mut visitor: impl FnMut(&NodeView)) -> usize {
        let now = Timestamp::now();
        let counter = Some(&self.active);
        let views = match key.segments().split_last() {
            None => self.read_level(&[], now, |level| {
                let mut out = Vec::new();
                collect_subtree(level, key, counter, now, &mut out);
                out
            }),
            Some((last, parent)) => self.read_level(parent, now, |level| {
                let mut out = Vec::new();
                let Some(node) = level.get(last).filter(|n| !n.is_expired(now)) else {
                    return out;
                };
                out.push(NodeView::capture(key.clone(), node));
                if let Some(child) = &node.child {
                    let guard = LevelReadGuard::acquire(child, counter);
                    collect_subtree(&guard, key, counter, now, &mut out);
                }
                out
            }),
        };
        let Reach::Found(views) = views else {
            return 0;
        };
        views.iter().for_each(&mut visitor);
        views.len()
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Removes `key` with its whole subtree and prunes emptied ancestors.
    pub fn delete(&self, key: &StoreKey) -> bool {
        self.chain(key, |m, level, segment, k| remove_child(m, level, segment, k).is_some())
            .unwrap_or(false)
    }

    /// Removes the value and history of `key`, keeping its children.
    pub fn delete_value(&self, key: &StoreKey) -> bool {
        self.chain(key, |m, level, segment, k| {
            let Some(node) = level.get_mut(segment) else {
                return false;
            };
            let had = node.has_value();
            let cleared = node.clear_value();
            m.value_changed(k, node.address, had, false);
            cleared
        })
        .unwrap_or(false)
    }

    /// Removes the subtree at `key` if `predicate` accepts the node.
    pub fn delete_where(&self, key: &StoreKey, predicate: impl FnOnce(&NodeView) -> bool) -> bool {
        self.chain(key, |m, level, segment, k| {
            let accept = level
                .get(segment)
                .is_some_and(|node| predicate(&NodeView::capture(k.clone(), node)));
            accept && remove_child(m, level, segment, k).is_some()
        })
        .unwrap_or(false)
    }

    // =========================================================================
    // Expiration, Relationships, Metadata
    // =========================================================================

    /// Sets the absolute expiration of an existing node; zero clears it.
    pub fn set_expiration(&self, key: &StoreKey, expiration: Timestamp) -> ArborResult<bool> {
        let updated = self.write_node(key, false, |_, slot| slot.node.expiration = expiration)?;
        Ok(updated.is_some())
    }

    /// Expiration of `key`; zero means never.
    #[must_use]
    pub fn expiration(&self, key: &StoreKey) -> Option<Timestamp> {
        self.read_node(key, |node| node.expiration).0
    }

    /// Replaces the relationships of the current value in place.
    pub fn set_relationships(&self, key: &StoreKey, relationships: Vec<Address>) -> ArborResult<bool> {
        let updated = self.write_node(key, false, |_, slot| {
            slot.node
                .current_value_mut()
                .map(|value| value.relationships = relationships)
                .is_some()
        })?;
        Ok(updated.unwrap_or(false))
    }

    /// Sets one relationship slot of the current value in place.
    pub fn set_relationship(&self, key: &StoreKey, slot: usize, address: Address) -> ArborResult<bool> {
        let updated = self.write_node(key, false, |_, target| {
            target
                .node
                .current_value_mut()
                .map(|value| value.set_relationship(slot, address))
                .is_some()
        })?;
        Ok(updated.unwrap_or(false))
    }

    /// Relationships of the current value, resolved against the tree while
    /// the node is still locked.
    #[must_use]
    pub fn relationships(&self, key: &StoreKey) -> Vec<Relationship> {
        self.read_node(key, |node| {
            node.current_value()
                .map(|v| self.resolve(&v.relationships))
                .unwrap_or_default()
        })
        .0
        .unwrap_or_default()
    }

    /// Current path of the node referenced by relationship `slot`.
    #[must_use]
    pub fn follow(&self, key: &StoreKey, slot: usize) -> Option<StoreKey> {
        self.read_node(key, |node| {
            node.current_value()
                .and_then(|v| v.relationship(slot))
                .and_then(|address| self.path_of(address))
        })
        .0
        .flatten()
    }

    /// All metadata attributes of `key`.
    #[must_use]
    pub fn metadata(&self, key: &StoreKey) -> Option<BTreeMap<String, String>> {
        self.read_node(key, |node| node.metadata.clone()).0
    }

    /// One metadata attribute of `key`.
    #[must_use]
    pub fn metadata_value(&self, key: &StoreKey, name: &str) -> Option<String> {
        self.read_node(key, |node| node.metadata.get(name).cloned())
            .0
            .flatten()
    }

    /// Sets a metadata attribute on an existing node.
    pub fn set_metadata(&self, key: &StoreKey, name: impl Into<String>, value: impl Into<String>) -> ArborResult<bool> {
        let (name, value) = (name.into(), value.into());
        let updated = self.write_node(key, false, |_, slot| {
            slot.node.metadata.insert(name, value);
        })?;
        Ok(updated.is_some())
    }

    /// Removes a metadata attribute. Returns true if it was present.
    pub fn clear_metadata(&self, key: &StoreKey, name: &str) -> ArborResult<bool> {
        let removed = self.write_node(key, false, |_, slot| slot.node.metadata.remove(name).is_some())?;
        Ok(removed.unwrap_or(false))
    }

    // =========================================================================
    // Index Definitions
    // =========================================================================

    /// Replaces the index definitions stored on `key`. A non-empty list
    /// materializes the node; an empty one may let it be pruned.
    pub fn set_index_definitions(&self, key: &StoreKey, definitions: Vec<IndexDefinition>) -> ArborResult<()> {
        self.check_key(key)?;
        for definition in &definitions {
            definition.validate()?;
        }
        if definitions.is_empty() {
            self.chain(key, |_, level, segment, _| {
                if let Some(node) = level.get_mut(segment) {
                    node.indexes.clear();
                }
            });
            return Ok(());
        }
        self.write_node(key, true, |_, slot| slot.node.indexes = definitions)?;
        Ok(())
    }

    /// Index definitions stored on `key`.
    #[must_use]
    pub fn index_definitions(&self, key: &StoreKey) -> Vec<IndexDefinition> {
        self.read_node(key, |node| node.indexes.clone())
            .0
            .unwrap_or_default()
    }

    /// Every node carrying index definitions, with its definitions.
    #[must_use]
    pub fn all_index_definitions(&self) -> Vec<(StoreKey, Vec<IndexDefinition>)> {
        let mut found = Vec::new();
        self.walk(&StoreKey::root(), |view| {
            if !view.indexes.is_empty() {
                found.push((view.key.clone(), view.indexes.clone()));
            }
        });
        found
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::build(StoreConfig::default())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("nodes", &self.node_count())
            .field("next_address", &self.next_address.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Sleeps with exponential backoff until `done` returns true. Returns the
/// number of sleep rounds.
pub(crate) fn wait_until(initial: Duration, max: Duration, mut done: impl FnMut() -> bool) -> u64 {
    let mut delay = initial;
    let mut rounds = 0;
    while !done() {
        std::thread::sleep(delay);
        delay = (delay * 2).min(max);
        rounds += 1;
    }
    rounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    fn key(text: &str) -> StoreKey {
        StoreKey::parse(text).unwrap()
    }

    fn store() -> Store {
        Store::new(StoreConfig::for_testing()).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<NodeEvent>>,
    }

    impl NodeObserver for Recorder {
        fn on_events(&self, _store: &Store, events: &[NodeEvent]) {
            self.events.lock().extend_from_slice(events);
        }
    }

    #[test]
    fn test_set_and_get() {
        let store = store();
        let outcome = store.set_value(&key("/a/b"), "hello").unwrap();
        assert!(outcome.created);
        assert_eq!(store.get(&key("/a/b")).unwrap().payload, "hello");
        assert!(store.get(&key("/a")).is_none());
        assert!(store.exists(&key("/a")));
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.value_count(), 1);

        let again = store.set_value(&key("/a/b"), "world").unwrap();
        assert!(!again.created);
        assert_eq!(again.address, outcome.address);
        assert!(again.timestamp > outcome.timestamp);
        assert_eq!(store.history(&key("/a/b")).len(), 2);
    }

    #[test]
    fn test_root_key_rejected_for_writes() {
        let store = store();
        let err = store.set_value(&StoreKey::root(), "x").unwrap_err();
        assert!(matches!(err, ArborError::EmptyKey));
        assert!(store.exists(&StoreKey::root()));
    }

    #[test]
    fn test_key_limits_enforced() {
        let store = Store::new(StoreConfig::for_testing().with_max_key_depth(2)).unwrap();
        let err = store.set_value(&key("/a/b/c"), "x").unwrap_err();
        assert!(matches!(err, ArborError::KeyTooDeep { depth: 3, .. }));
    }

    #[test]
    fn test_locate_reports_matched() {
        let store = store();
        store.set_value(&key("/a/b"), "v").unwrap();
        let lookup = store.locate(&key("/a/x/y"));
        assert!(!lookup.is_found());
        assert_eq!(lookup.matched, 1);
        let lookup = store.locate(&key("/a/b"));
        assert_eq!(lookup.matched, 2);
        assert_eq!(lookup.view.unwrap().key, key("/a/b"));
    }

    #[test]
    fn test_guards() {
        let store = store();
        let k = key("/g");
        assert!(store.update_if_present(&k, ValueInstance::new("x")).unwrap().is_none());
        assert!(!store.exists(&k));
        assert!(store.set_if_absent(&k, ValueInstance::new("first")).unwrap().is_some());
        assert!(store.set_if_absent(&k, ValueInstance::new("second")).unwrap().is_none());
        assert_eq!(store.get(&k).unwrap().payload, "first");
        assert!(store.update_if_present(&k, ValueInstance::new("third")).unwrap().is_some());
        assert_eq!(store.get(&k).unwrap().payload, "third");
    }

    #[test]
    fn test_history_entry_and_get_at() {
        let store = store();
        let k = key("/h");
        let t1 = Timestamp::from_nanos(1_000);
        let t2 = Timestamp::from_nanos(2_000);
        store.set_history_entry(&k, t2, ValueInstance::new("two")).unwrap();
        store.set_history_entry(&k, t1, ValueInstance::new("one")).unwrap();
        assert_eq!(store.get(&k).unwrap().payload, "two");
        assert_eq!(store.get_at(&k, AsOf::At(Timestamp::from_nanos(1_500))).unwrap().payload, "one");
        assert!(store.get_at(&k, AsOf::At(Timestamp::from_nanos(10))).is_none());

        // Later ticks must be newer than any observed entry.
        let outcome = store.set_value(&k, "three").unwrap();
        assert!(outcome.timestamp > t2);
    }

    #[test]
    fn test_delete_prunes_and_retires_address() {
        let store = store();
        let target = store.set_value(&key("/a/b/c"), "v").unwrap().address;
        let pointer = ValueInstance::with_relationships("", vec![target]);
        store.set_instance(&key("/ptr"), pointer).unwrap();

        assert!(store.delete(&key("/a/b/c")));
        assert!(!store.exists(&key("/a")));
        assert!(store.path_of(target).is_none());
        assert_eq!(store.relationships(&key("/ptr")), vec![Relationship::Broken { address: target }]);

        let recreated = store.set_value(&key("/a/b/c"), "v").unwrap().address;
        assert!(recreated > target);
        assert!(!store.delete(&key("/missing")));
    }

    #[test]
    fn test_delete_value_keeps_children() {
        let store = store();
        store.set_value(&key("/p"), "parent").unwrap();
        store.set_value(&key("/p/c"), "child").unwrap();
        assert!(store.delete_value(&key("/p")));
        assert!(store.get(&key("/p")).is_none());
        assert!(store.exists(&key("/p")));
        assert!(store.value_address(&key("/p")).is_none());

        // A leaf without value or children disappears.
        assert!(store.delete_value(&key("/p/c")));
        assert!(!store.exists(&key("/p")));
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn test_delete_where() {
        let store = store();
        let a = store.set_value(&key("/t"), "x").unwrap().address;
        let other = store.set_value(&key("/o"), "y").unwrap().address;
        store
            .set_instance(&key("/idx"), ValueInstance::with_relationships("", vec![a]))
            .unwrap();
        assert!(!store.delete_where(&key("/idx"), |v| v.relationship(0) == Some(other)));
        assert!(store.delete_where(&key("/idx"), |v| v.relationship(0) == Some(a)));
        assert!(!store.exists(&key("/idx")));
    }

    #[test]
    fn test_expiration_hides_and_evicts() {
        let store = store();
        store.set_value(&key("/e/child"), "v").unwrap();
        assert!(store.set_expiration(&key("/e"), Timestamp::from_nanos(1)).unwrap());
        assert!(store.get(&key("/e/child")).is_none());
        assert!(!store.exists(&key("/e")));
        assert!(store.children(&StoreKey::root()).is_empty());
        // The read scheduled eviction.
        assert_eq!(store.node_count(), 0);
        assert_eq!(store.stats().evictions, 1);
        assert!(!store.set_expiration(&key("/e"), Timestamp::ZERO).unwrap());
    }

    #[test]
    fn test_write_through_expired_node_recreates() {
        let store = Store::new(StoreConfig::for_testing().with_lazy_eviction(false)).unwrap();
        let old = store.set_value(&key("/x"), "v").unwrap().address;
        store.set_expiration(&key("/x"), Timestamp::from_nanos(1)).unwrap();
        assert!(store.get(&key("/x")).is_none());
        assert_eq!(store.node_count(), 1);
        let outcome = store.set_value(&key("/x"), "w").unwrap();
        assert!(outcome.created);
        assert_ne!(outcome.address, old);
    }

    #[test]
    fn test_relationships_and_follow() {
        let store = store();
        let target = store.set_value(&key("/users/1"), "ada").unwrap().address;
        store.set_value(&key("/orders/9"), "order").unwrap();
        assert!(store.set_relationship(&key("/orders/9"), 1, target).unwrap());
        assert_eq!(store.follow(&key("/orders/9"), 1), Some(key("/users/1")));
        assert_eq!(store.follow(&key("/orders/9"), 0), None);
        let rels = store.relationships(&key("/orders/9"));
        assert_eq!(rels.len(), 2);
        assert!(!rels[0].is_live());
        assert!(rels[1].is_live());
        assert!(!store.set_relationships(&key("/nothing"), vec![target]).unwrap());
    }

    #[test]
    fn test_metadata() {
        let store = store();
        assert!(!store.set_metadata(&key("/m"), "k", "v").unwrap());
        store.set_value(&key("/m"), "x").unwrap();
        assert!(store.set_metadata(&key("/m"), "k", "v").unwrap());
        assert_eq!(store.metadata_value(&key("/m"), "k").as_deref(), Some("v"));
        assert_eq!(store.metadata(&key("/m")).unwrap().len(), 1);
        assert!(store.clear_metadata(&key("/m"), "k").unwrap());
        assert!(!store.clear_metadata(&key("/m"), "k").unwrap());
    }

    #[test]
    fn test_children_floor_ceiling() {
        let store = store();
        for name in ["b", "d", "f"] {
            store.set_value(&key("/p").child(name), "v").unwrap();
        }
        let names: Vec<String> = store
            .children(&key("/p"))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["b", "d", "f"]);
        assert_eq!(store.child_floor(&key("/p"), &Segment::from("e")), Some(Segment::from("d")));
        assert_eq!(store.child_ceiling(&key("/p"), &Segment::from("e")), Some(Segment::from("f")));
        assert_eq!(store.child_floor(&key("/p"), &Segment::from("a")), None);
        assert!(store.children(&key("/none")).is_empty());
    }

    #[test]
    fn test_walk() {
        let store = store();
        store.set_value(&key("/w/a"), "1").unwrap();
        store.set_value(&key("/w/a/x"), "2").unwrap();
        store.set_value(&key("/w/b"), "3").unwrap();
        let mut seen = Vec::new();
        let count = store.walk(&key("/w"), |view| seen.push(view.key.to_string()));
        assert_eq!(count, 4);
        assert_eq!(seen, vec!["/w", "/w/a", "/w/a/x", "/w/b"]);
        assert_eq!(store.walk(&StoreKey::root(), |_| {}), 4);
    }

    #[test]
    fn test_view_by_address() {
        let store = store();
        let address = store.set_value(&key("/v/1"), "x").unwrap().address;
        let view = store.view_by_address(address).unwrap();
        assert_eq!(view.key, key("/v/1"));
        assert_eq!(view.value.unwrap().payload, "x");
        store.delete(&key("/v/1"));
        assert!(store.view_by_address(address).is_none());
    }

    #[test]
    fn test_index_definitions_keep_node_alive() {
        let store = store();
        let def = IndexDefinition::parse("/by-name", &["name"]).unwrap();
        store.set_index_definitions(&key("/people"), vec![def.clone()]).unwrap();
        assert!(store.exists(&key("/people")));
        assert_eq!(store.index_definitions(&key("/people")), vec![def]);
        assert_eq!(store.all_index_definitions().len(), 1);
        store.set_index_definitions(&key("/people"), Vec::new()).unwrap();
        assert!(!store.exists(&key("/people")));
    }

    #[test]
    fn test_observer_receives_events() {
        let store = store();
        let recorder = Arc::new(Recorder::default());
        store.subscribe(recorder.clone());
        store.set_value(&key("/a/b"), "v").unwrap();
        store.delete(&key("/a"));
        let events = recorder.events.lock();
        let created = events.iter().filter(|e| e.is_created()).count();
        assert_eq!(created, 2);
        assert_eq!(events.len(), 4);
        assert_eq!(events[2].key(), &key("/a/b"));
    }

    #[test]
    fn test_concurrent_writers_same_parent() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..200 {
                        let k = key("/shared").child(format!("{t}-{i}"));
                        store.set_value(&k, "v").unwrap();
                        if i % 3 == 0 {
                            store.delete(&k);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let remaining = store.children(&key("/shared")).len();
        assert_eq!(remaining, 4 * (200 - 67));
        assert_eq!(store.active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wait_until_counts_rounds() {
        let mut polls = 0;
        let rounds = wait_until(Duration::from_micros(1), Duration::from_micros(4), || {
            polls += 1;
            polls > 3
        });
        assert_eq!(rounds, 3);
    }
}
