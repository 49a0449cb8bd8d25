//! Whole-store exclusive sections.
//!
//! An exclusive section holds the root level's write lock, raises the
//! store's exclusive flag and waits until no counted level guard is held
//! anywhere. The closure then sees a quiesced store and works on it through
//! [`ExclusiveSection`]. Observers that handle section events run against
//! the same section before it ends; the rest get the events afterwards.
//!
//! Sections do not nest: calling a [`Store`] method from inside the closure,
//! or from `on_section_events`, blocks forever on the root lock.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Address, Segment, StoreKey, Timestamp};

use crate::latch::LevelWriteGuard;
use crate::level::LevelData;
use crate::node::{Node, ValueInstance};
use crate::observer::{NodeEvent, NodeObserver};
use crate::ops::{
    apply_at, chain_apply, collect_subtree, reach_level, remove_child, Mutation, NodeSlot, Reach, ReadStart,
};
use crate::schema::IndexDefinition;
use crate::stats::StatsCounters;
use crate::store::{wait_until, Store};
use crate::view::{NodeView, Relationship, WriteOutcome};

/// Lowers the exclusive flag when dropped, also on unwind.
struct ExclusiveFlag<'s> {
    store: &'s Store,
}

impl<'s> ExclusiveFlag<'s> {
    fn raise(store: &'s Store) -> Self {
        store.exclusive.store(true, Ordering::SeqCst);
        Self { store }
    }
}

impl Drop for ExclusiveFlag<'_> {
    fn drop(&mut self) {
        self.store.epoch.fetch_add(1, Ordering::SeqCst);
        self.store.exclusive.store(false, Ordering::SeqCst);
    }
}

/// Access to a quiesced store.
pub struct ExclusiveSection<'s> {
    pub(crate) store: &'s Store,
    pub(crate) root: LevelWriteGuard<'s>,
    pub(crate) events: Vec<NodeEvent>,
    /// Set when the whole tree was replaced.
    pub(crate) reset: bool,
}

impl Store {
    /// Runs `f` with every other operation on the store drained and held
    /// off.
    ///
    /// # Example
    ///
    /// ```rust
    /// use arbor_store::Store;
    /// use arbor_common::types::StoreKey;
    ///
    /// let store = Store::default();
    /// let a = StoreKey::parse("/a").unwrap();
    /// let b = StoreKey::parse("/b").unwrap();
    /// store.exclusive(|section| {
    ///     section.set_value(&a, "1").unwrap();
    ///     section.set_value(&b, "2").unwrap();
    /// });
    /// assert_eq!(store.value_count(), 2);
    /// ```
    pub fn exclusive<R>(&self, f: impl FnOnce(&mut ExclusiveSection<'_>) -> R) -> R {
        let serial = self.dispatch_lock.lock();
        let root = LevelWriteGuard::acquire(&self.root, None);
        let flag = ExclusiveFlag::raise(self);
        let spins = wait_until(self.config.quiesce_backoff, self.config.quiesce_backoff_max, || {
            self.active.load(Ordering::SeqCst) == 0
        });
        StatsCounters::bump(&self.stats.exclusive_sections);
        StatsCounters::add(&self.stats.exclusive_wait_spins, spins);
        tracing::debug!(spins, "store quiesced for exclusive section");

        let mut section = ExclusiveSection {
            store: self,
            root,
            events: Vec::new(),
            reset: false,
        };
        let result = f(&mut section);
        let deferred = if section.reset {
            self.observers()
        } else {
            section.offer_events(self.observers())
        };
        let ExclusiveSection {
            root, events, reset, ..
        } = section;
        drop(flag);
        drop(root);

        if reset {
            self.notify_reset();
        }
        self.dispatch_to(&deferred, &events);
        drop(serial);
        result
    }

    /// Removes every node.
    pub fn purge(&self) -> usize {
        self.exclusive(|section| section.purge())
    }
}

impl<'s> ExclusiveSection<'s> {
    /// Hands the section's events to observers that handle them in place,
    /// repeating for events their own writes add. Returns the observers
    /// that declined.
    fn offer_events(&mut self, observers: Vec<Arc<dyn NodeObserver>>) -> Vec<Arc<dyn NodeObserver>> {
        let mut handling = observers;
        let mut declined = Vec::new();
        let mut offered = 0;
        while offered < self.events.len() && !handling.is_empty() {
            let batch = self.events[offered..].to_vec();
            offered = self.events.len();
            let mut kept = Vec::with_capacity(handling.len());
            for observer in handling {
                if observer.on_section_events(self, &batch) {
                    kept.push(observer);
                } else {
                    declined.push(observer);
                }
            }
            handling = kept;
        }
        tracing::trace!(events = self.events.len(), declined = declined.len(), "section events offered");
        declined
    }

    pub(crate) fn read_node<R>(&self, key: &StoreKey, f: impl FnOnce(&Node) -> R) -> Option<R> {
        let (last, parent) = key.segments().split_last()?;
        let now = Timestamp::now();
        let reach = reach_level(ReadStart::Data(&*self.root), None, parent, now, |level| {
            level.get(last).filter(|n| !n.is_expired(now)).map(f)
        });
        match reach {
            Reach::Found(found) => found,
            Reach::Missing { .. } => None,
        }
    }

    pub(crate) fn write<R>(
        &mut self,
        key: &StoreKey,
        create: bool,
        f: impl for<'m, 'n> FnOnce(&mut Mutation<'m>, NodeSlot<'n>) -> R,
    ) -> ArborResult<Option<R>> {
        self.store.check_key(key)?;
        let mut m = Mutation::new(self.store, None, Timestamp::now());
        let result = apply_at(&mut m, &mut self.root, &StoreKey::root(), key.segments(), create, f);
        m.commit();
        self.events.extend(m.into_events());
        Ok(result)
    }

    pub(crate) fn chain<R>(
        &mut self,
        key: &StoreKey,
        op: impl for<'m> FnOnce(&mut Mutation<'m>, &mut LevelData, &Segment, &StoreKey) -> R,
    ) -> Option<R> {
        let mut m = Mutation::new(self.store, None, Timestamp::now());
        let result = chain_apply(&mut m, &mut self.root, key.segments(), op);
        m.commit();
        self.events.extend(m.into_events());
        result
    }

    /// Current value of `key`.
    #[must_use]
    pub fn get(&self, key: &StoreKey) -> Option<ValueInstance> {
        self.read_node(key, |node| node.current_value().cloned()).flatten()
    }

    /// Snapshot of the node at `key`.
    #[must_use]
    pub fn view(&self, key: &StoreKey) -> Option<NodeView> {
        self.read_node(key, |node| NodeView::capture(key.clone(), node))
    }

    /// Returns true if a visible node exists at `key`.
    #[must_use]
    pub fn exists(&self, key: &StoreKey) -> bool {
        key.is_root() || self.read_node(key, |_| ()).is_some()
    }

    /// Address of the node at `key`.
    #[must_use]
    pub fn address_of(&self, key: &StoreKey) -> Option<Address> {
        self.read_node(key, |node| node.address)
    }

    /// Current path of `address`.
    #[must_use]
    pub fn path_of(&self, address: Address) -> Option<StoreKey> {
        self.store.path_of(address)
    }

    /// Visible children of `key`.
    #[must_use]
    pub fn children(&self, key: &StoreKey) -> Vec<Segment> {
        let now = Timestamp::now();
        let reach = reach_level(ReadStart::Data(&*self.root), None, key.segments(), now, |level| {
            level
                .children
                .iter()
                .filter(|(_, node)| !node.is_expired(now))
                .map(|(seg, _)| Segment::new(seg.clone()))
                .collect::<Vec<_>>()
        });
        match reach {
            Reach::Found(children) => children,
            Reach::Missing { .. } => Vec::new(),
        }
    }

    /// Relationships of the current value of `key`, resolved.
    #[must_use]
    pub fn relationships(&self, key: &StoreKey) -> Vec<Relationship> {
        let addresses = self
            .read_node(key, |node| {
                node.current_value()
                    .map(|v| v.relationships.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        addresses
            .into_iter()
            .map(|address| match self.store.path_of(address) {
                Some(key) if address.is_valid() => Relationship::Live { address, key },
                _ => Relationship::Broken { address },
            })
            .collect()
    }

    /// Sets the value of `key`.
    pub fn set_value(&mut self, key: &StoreKey, payload: impl Into<Bytes>) -> ArborResult<WriteOutcome> {
        self.set_instance(key, ValueInstance::new(payload))
    }

    /// Sets the value of `key` including relationships.
    pub fn set_instance(&mut self, key: &StoreKey, instance: ValueInstance) -> ArborResult<WriteOutcome> {
        let outcome = self.write(key, true, |m, slot| {
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

    /// Sets one relationship slot of the current value of `key`.
    pub fn set_relationship(&mut self, key: &StoreKey, slot: usize, address: Address) -> ArborResult<bool> {
        let updated = self.write(key, false, |_, target| {
            target
                .node
                .current_value_mut()
                .map(|value| value.set_relationship(slot, address))
                .is_some()
        })?;
        Ok(updated.unwrap_or(false))
    }

    /// Writes only if `key` holds no value.
    pub fn set_if_absent(&mut self, key: &StoreKey, instance: ValueInstance) -> ArborResult<Option<WriteOutcome>> {
        let outcome = self.write(key, true, |m, slot| {
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

    /// Removes `key` with its subtree.
    pub fn delete(&mut self, key: &StoreKey) -> bool {
        self.chain(key, |m, level, segment, k| remove_child(m, level, segment, k).is_some())
            .unwrap_or(false)
    }

    /// Removes the value and history of `key`.
    pub fn delete_value(&mut self, key: &StoreKey) -> bool {
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
    pub fn delete_where(&mut self, key: &StoreKey, predicate: impl FnOnce(&NodeView) -> bool) -> bool {
        self.chain(key, |m, level, segment, k| {
            let accept = level
                .get(segment)
                .is_some_and(|node| predicate(&NodeView::capture(k.clone(), node)));
            accept && remove_child(m, level, segment, k).is_some()
        })
        .unwrap_or(false)
    }

    /// Every node carrying index definitions, with its definitions.
    #[must_use]
    pub fn all_index_definitions(&self) -> Vec<(StoreKey, Vec<IndexDefinition>)> {
        let mut views = Vec::new();
        collect_subtree(&self.root, &StoreKey::root(), None, Timestamp::now(), &mut views);
        views
            .into_iter()
            .filter(|view| !view.indexes.is_empty())
            .map(|view| (view.key, view.indexes))
            .collect()
    }

    /// Removes every node. Observers get a reset notification instead of
    /// per-node events.
    pub fn purge(&mut self) -> usize {
        let count = self.store.node_count();
        detach_all(&self.root);
        self.root.children.clear();
        self.store.registry.write().clear();
        self.reset = true;
        tracing::info!(nodes = count, "store purged");
        count
    }
}

/// Marks every level below `level` detached.
pub(crate) fn detach_all(level: &LevelData) {
    for node in level.children.values() {
        if let Some(child) = &node.child {
            let mut guard = child.write();
            guard.detached = true;
            detach_all(&guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::StoreConfig;
    use std::sync::Arc;
    use std::thread;

    fn key(text: &str) -> StoreKey {
        StoreKey::parse(text).unwrap()
    }

    #[test]
    fn test_exclusive_section_reads_and_writes() {
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        store.set_value(&key("/a"), "1").unwrap();
        let seen = store.exclusive(|section| {
            let value = section.get(&key("/a")).unwrap();
            section.set_value(&key("/b/c"), value.payload).unwrap();
            assert!(section.delete(&key("/a")));
            section.children(&StoreKey::root()).len()
        });
        assert_eq!(seen, 1);
        assert_eq!(store.get(&key("/b/c")).unwrap().payload, "1");
        assert!(!store.exists(&key("/a")));
        let stats = store.stats();
        assert_eq!(stats.exclusive_sections, 1);
    }

    /// Mirrors every created `/src/...` node under `/mirror`, either inside
    /// the section or afterwards.
    struct Mirror {
        in_section: bool,
        section_calls: parking_lot::Mutex<usize>,
        late_calls: parking_lot::Mutex<usize>,
    }

    impl Mirror {
        fn new(in_section: bool) -> Arc<Self> {
            Arc::new(Self {
                in_section,
                section_calls: parking_lot::Mutex::new(0),
                late_calls: parking_lot::Mutex::new(0),
            })
        }

        fn targets(events: &[NodeEvent]) -> Vec<StoreKey> {
            let src = key("/src");
            events
                .iter()
                .filter(|e| e.is_created() && e.key().starts_with(&src) && e.key() != &src)
                .map(|e| key("/mirror").child(e.key().last().cloned().unwrap_or_default()))
                .collect()
        }
    }

    impl NodeObserver for Mirror {
        fn on_events(&self, store: &Store, events: &[NodeEvent]) {
            *self.late_calls.lock() += 1;
            for target in Self::targets(events) {
                store.set_value(&target, "late").unwrap();
            }
        }

        fn on_section_events(&self, section: &mut ExclusiveSection<'_>, events: &[NodeEvent]) -> bool {
            if !self.in_section {
                return false;
            }
            *self.section_calls.lock() += 1;
            for target in Self::targets(events) {
                section.set_value(&target, "early").unwrap();
            }
            true
        }
    }

    #[test]
    fn test_section_events_handled_before_release() {
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        let mirror = Mirror::new(true);
        store.subscribe(mirror.clone());

        store.exclusive(|section| {
            section.set_value(&key("/src/a"), "1").unwrap();
            section.set_value(&key("/src/b"), "2").unwrap();
        });
        assert_eq!(store.get(&key("/mirror/a")).unwrap().payload, "early");
        assert_eq!(store.get(&key("/mirror/b")).unwrap().payload, "early");
        // One call for the section's own events, one for the mirror writes.
        assert_eq!(*mirror.section_calls.lock(), 2);
        assert_eq!(*mirror.late_calls.lock(), 0);

        // Ordinary writes still go through on_events.
        store.set_value(&key("/src/c"), "3").unwrap();
        assert_eq!(store.get(&key("/mirror/c")).unwrap().payload, "late");
    }

    #[test]
    fn test_declined_section_events_delivered_after() {
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        let mirror = Mirror::new(false);
        store.subscribe(mirror.clone());

        store.exclusive(|section| {
            section.set_value(&key("/src/a"), "1").unwrap();
            assert!(!section.exists(&key("/mirror/a")));
        });
        assert_eq!(store.get(&key("/mirror/a")).unwrap().payload, "late");
        assert_eq!(*mirror.late_calls.lock(), 2);
    }

    #[test]
    fn test_section_conditional_writes() {
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        let first = store.set_value(&key("/e/1"), "one").unwrap().address;
        store.set_index_definitions(&key("/records"), vec![
            IndexDefinition::parse("/idx", &["user"]).unwrap(),
        ]).unwrap();

        store.exclusive(|section| {
            let instance = ValueInstance::new("two");
            assert!(section.set_if_absent(&key("/e/1"), instance.clone()).unwrap().is_none());
            assert!(section.set_if_absent(&key("/e/2"), instance).unwrap().is_some());

            assert!(!section.delete_where(&key("/e/1"), |view| view.address != first));
            assert!(section.delete_where(&key("/e/1"), |view| view.address == first));

            let definitions = section.all_index_definitions();
            assert_eq!(definitions.len(), 1);
            assert_eq!(definitions[0].0, key("/records"));
        });
        assert!(!store.exists(&key("/e/1")));
        assert_eq!(store.get(&key("/e/2")).unwrap().payload, "two");
    }

    #[test]
    fn test_serialized_excludes_observer_callbacks() {
        struct Slow(parking_lot::Mutex<Vec<&'static str>>);
        impl NodeObserver for Slow {
            fn on_events(&self, _store: &Store, _events: &[NodeEvent]) {
                self.0.lock().push("start");
                thread::sleep(std::time::Duration::from_millis(5));
                self.0.lock().push("end");
            }
        }

        let store = Arc::new(Store::new(StoreConfig::for_testing()).unwrap());
        let slow = Arc::new(Slow(parking_lot::Mutex::new(Vec::new())));
        store.subscribe(slow.clone());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..5 {
                        store.set_value(&key("/s").child(format!("{t}-{i}")), "v").unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..5 {
            store.serialized(|| slow.0.lock().push("serialized"));
        }
        for writer in writers {
            writer.join().unwrap();
        }

        // Callbacks never interleave with each other or with serialized
        // closures.
        let log = slow.0.lock();
        let mut open = false;
        for entry in log.iter() {
            match *entry {
                "start" => {
                    assert!(!open);
                    open = true;
                }
                "end" => {
                    assert!(open);
                    open = false;
                }
                _ => assert!(!open),
            }
        }
        assert_eq!(log.iter().filter(|e| **e == "serialized").count(), 5);
    }

    #[test]
    fn test_purge() {
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        store.set_value(&key("/a/b"), "1").unwrap();
        store.set_value(&key("/c"), "2").unwrap();
        assert_eq!(store.purge(), 3);
        assert_eq!(store.node_count(), 0);
        assert!(store.children(&StoreKey::root()).is_empty());
        // Addresses keep increasing after a purge.
        let outcome = store.set_value(&key("/a"), "x").unwrap();
        assert!(outcome.address.as_u64() > 3);
    }

    #[test]
    fn test_flag_cleared_after_panic() {
        let store = Store::new(StoreConfig::for_testing()).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.exclusive(|_| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!store.exclusive.load(Ordering::SeqCst));
        store.set_value(&key("/after"), "ok").unwrap();
    }

    #[test]
    fn test_exclusive_waits_for_concurrent_writers() {
        let store = Arc::new(Store::new(StoreConfig::for_testing()).unwrap());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..300 {
                        let k = key("/w").child(format!("{t}")).child(format!("{i}"));
                        store.set_value(&k, "v").unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..20 {
            store.exclusive(|section| {
                assert_eq!(section.store.active.load(Ordering::SeqCst), 0);
                let _ = section.children(&key("/w"));
            });
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(store.walk(&key("/w"), |_| {}), 1 + 4 + 4 * 300);
    }
}
