//! Tree primitives shared by the concurrent API and the exclusive section.
//!
//! Everything here works on levels that the caller has already locked;
//! child levels are locked top-down with nested guards that share the
//! caller's active-holder counter.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use arbor_common::types::{Address, Segment, StoreKey, Timestamp};

use crate::latch::{LevelReadGuard, LevelWriteGuard};
use crate::level::{new_level, LevelData};
use crate::node::Node;
use crate::observer::NodeEvent;
use crate::registry::{NodeLocation, RegistryOp};
use crate::stats::StatsCounters;
use crate::store::Store;

// =============================================================================
// Mutation Context
// =============================================================================

/// Collects the side effects of one operation: node events for observers
/// and registry changes, committed while the levels are still locked.
pub(crate) struct Mutation<'s> {
    pub(crate) store: &'s Store,
    pub(crate) counter: Option<&'s AtomicUsize>,
    pub(crate) now: Timestamp,
    events: Vec<NodeEvent>,
    registry: Vec<RegistryOp>,
}

impl<'s> Mutation<'s> {
    pub(crate) fn new(store: &'s Store, counter: Option<&'s AtomicUsize>, now: Timestamp) -> Self {
        Self {
            store,
            counter,
            now,
            events: Vec::new(),
            registry: Vec::new(),
        }
    }

    pub(crate) fn created(&mut self, key: StoreKey, address: Address, level: &LevelWriteGuard<'_>) {
        self.registry.push(RegistryOp::Insert(
            address,
            NodeLocation {
                key: key.clone(),
                level: level.level_ref(),
            },
        ));
        self.events.push(NodeEvent::Created { key, address });
    }

    pub(crate) fn removed(&mut self, key: StoreKey, node: &Node) {
        self.registry.push(RegistryOp::Remove(node.address));
        if node.has_value() {
            self.registry.push(RegistryOp::RemovePath(key.clone()));
        }
        self.events.push(NodeEvent::Removed {
            key,
            address: node.address,
        });
    }

    /// Keeps the path map in step with the value state of a node.
    pub(crate) fn value_changed(&mut self, key: &StoreKey, address: Address, had: bool, has: bool) {
        match (had, has) {
            (false, true) => self.registry.push(RegistryOp::SetPath(key.clone(), address)),
            (true, false) => self.registry.push(RegistryOp::RemovePath(key.clone())),
            _ => {}
        }
    }

    pub(crate) fn push_event(&mut self, event: NodeEvent) {
        self.events.push(event);
    }

    pub(crate) fn push_registry(&mut self, op: RegistryOp) {
        self.registry.push(op);
    }

    /// Applies the pending registry changes. Must run before the levels
    /// touched by the operation are released.
    pub(crate) fn commit(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        let mut registry = self.store.registry.write();
        for op in self.registry.drain(..) {
            registry.apply(op);
        }
    }

    pub(crate) fn into_events(self) -> Vec<NodeEvent> {
        self.events
    }
}

/// The target node handed to a write closure.
pub(crate) struct NodeSlot<'a> {
    pub(crate) node: &'a mut Node,
    pub(crate) key: &'a StoreKey,
    /// True if the node was created by this operation.
    pub(crate) created: bool,
}

// =============================================================================
// Writes
// =============================================================================

/// Walks `segments` below `level`, evicting expired nodes and, if `create`
/// is set, materializing missing nodes and levels, then runs `f` on the
/// target node. Returns `None` if the target does not exist and `create`
/// is false.
///
/// `f` must not make the node vacant; removals go through [`chain_apply`].
pub(crate) fn apply_at<'s, R, F>(
    m: &mut Mutation<'s>,
    level: &mut LevelWriteGuard<'s>,
    level_key: &StoreKey,
    segments: &[Segment],
    create: bool,
    f: F,
) -> Option<R>
where
    F: FnOnce(&mut Mutation<'s>, NodeSlot<'_>) -> R,
{
    let (segment, rest) = segments.split_first()?;
    let key = level_key.child(segment.clone());

    if level.get(segment).is_some_and(|n| n.is_expired(m.now)) {
        evict(m, level, segment, &key);
    }

    let mut created = false;
    if level.get(segment).is_none() {
        if !create {
            return None;
        }
        let address = m.store.allocate_address();
        level
            .children
            .insert(segment.clone().into_bytes(), Node::new(address));
        m.created(key.clone(), address, level);
        created = true;
    }

    if rest.is_empty() {
        let node = level.get_mut(segment)?;
        let address = node.address;
        let had = node.has_value();
        let result = f(
            m,
            NodeSlot {
                node,
                key: &key,
                created,
            },
        );
        let has = level.get(segment).is_some_and(Node::has_value);
        m.value_changed(&key, address, had, has);
        return Some(result);
    }

    let child = {
        let node = level.get_mut(segment)?;
        match &node.child {
            Some(child) => Arc::clone(child),
            None if create => {
                let child = new_level(node.address);
                node.child = Some(Arc::clone(&child));
                child
            }
            None => return None,
        }
    };
    let mut guard = LevelWriteGuard::acquire(&child, m.counter);
    apply_at(m, &mut guard, &key, rest, create, f)
}

// =============================================================================
// Removal
// =============================================================================

/// Removes the child under `segment` together with its whole subtree.
pub(crate) fn remove_child(
    m: &mut Mutation<'_>,
    level: &mut LevelData,
    segment: &Segment,
    key: &StoreKey,
) -> Option<Address> {
    let node = level.children.remove(segment.as_bytes())?;
    let address = node.address;
    remove_subtree(m, node, key);
    Some(address)
}

/// Removes an expired node and counts the eviction.
pub(crate) fn evict(m: &mut Mutation<'_>, level: &mut LevelData, segment: &Segment, key: &StoreKey) {
    if let Some(address) = remove_child(m, level, segment, key) {
        StatsCounters::bump(&m.store.stats.evictions);
        tracing::debug!(key = %key, address = %address, "evicted expired node");
    }
}

/// Detaches every level below `node` and emits removals children first.
fn remove_subtree(m: &mut Mutation<'_>, node: Node, key: &StoreKey) {
    if let Some(child) = &node.child {
        let mut guard = LevelWriteGuard::acquire(child, m.counter);
        guard.detached = true;
        let children = std::mem::take(&mut guard.children);
        for (segment, grandchild) in children.into_entries() {
            remove_subtree(m, grandchild, &key.child(Segment::new(segment)));
        }
    }
    m.removed(key.clone(), &node);
}

// =============================================================================
// Whole-path chains
// =============================================================================

/// Write guards on every level from the root down to some depth.
struct Chain<'g, 's> {
    root: &'g mut LevelWriteGuard<'s>,
    below: Vec<LevelWriteGuard<'s>>,
}

impl Chain<'_, '_> {
    fn level(&mut self, depth: usize) -> &mut LevelData {
        if depth == 0 {
            &mut **self.root
        } else {
            &mut *self.below[depth - 1]
        }
    }
}

/// Locks every level from `root` to the one holding the target node, runs
/// `op` on that level, then removes the target if it became vacant and
/// prunes emptied levels upward.
///
/// Expired nodes on the path are evicted and end the walk with `None`.
pub(crate) fn chain_apply<'s, R, F>(
    m: &mut Mutation<'s>,
    root: &mut LevelWriteGuard<'s>,
    segments: &[Segment],
    op: F,
) -> Option<R>
where
    F: FnOnce(&mut Mutation<'s>, &mut LevelData, &Segment, &StoreKey) -> R,
{
    let last = segments.len().checked_sub(1)?;
    let key = StoreKey::from_segments(segments.iter().cloned());
    let mut chain = Chain {
        root,
        below: Vec::with_capacity(last),
    };

    for (depth, segment) in segments.iter().enumerate() {
        let level = chain.level(depth);
        let node = level.get(segment)?;
        if node.is_expired(m.now) {
            evict(m, level, segment, &key.prefix(depth + 1));
            prune(m, &mut chain, segments, depth);
            return None;
        }
        if depth == last {
            break;
        }
        let child = Arc::clone(node.child.as_ref()?);
        chain.below.push(LevelWriteGuard::acquire(&child, m.counter));
    }

    let target = &segments[last];
    let level = chain.level(last);
    let result = op(m, level, target, &key);
    if level.get(target).is_some_and(Node::is_vacant) {
        remove_child(m, level, target, &key);
    }
    prune(m, &mut chain, segments, last);
    Some(result)
}

/// Unlinks empty levels starting at `depth`, removing owners that become
/// vacant, until a level is non-empty or the root is reached.
fn prune(m: &mut Mutation<'_>, chain: &mut Chain<'_, '_>, segments: &[Segment], mut depth: usize) {
    while depth > 0 {
        let level = chain.level(depth);
        if !level.is_empty() {
            break;
        }
        level.detached = true;
        let owner_key = StoreKey::from_segments(segments[..depth].iter().cloned());
        tracing::debug!(owner = %owner_key, "level emptied and detached");

        let parent = chain.level(depth - 1);
        let segment = &segments[depth - 1];
        let Some(owner) = parent.get_mut(segment) else {
            break;
        };
        owner.child = None;
        if !owner.is_vacant() {
            break;
        }
        remove_child(m, parent, segment, &owner_key);
        depth -= 1;
    }
}

// =============================================================================
// Reads
// =============================================================================

/// Where a read traversal begins.
pub(crate) enum ReadStart<'a, 's> {
    /// A counted guard on the root level (concurrent reads).
    Guard(LevelReadGuard<'s>),
    /// Level data already locked by the caller (exclusive section).
    Data(&'a LevelData),
}

/// Outcome of [`reach_level`].
pub(crate) enum Reach<R> {
    Found(R),
    Missing {
        /// Leading segments that resolved to visible nodes.
        matched: usize,
        /// Depth of the expired node that stopped the walk, if any.
        expired: Option<usize>,
    },
}

/// Lock-couples down `segments` and runs `f` on the children of the last
/// node (the root level when `segments` is empty). A node without children
/// yields an empty level.
pub(crate) fn reach_level<'s, R>(
    start: ReadStart<'_, 's>,
    counter: Option<&'s AtomicUsize>,
    segments: &[Segment],
    now: Timestamp,
    f: impl FnOnce(&LevelData) -> R,
) -> Reach<R> {
    let mut held: Option<LevelReadGuard<'s>> = None;
    let mut level: &LevelData = match start {
        ReadStart::Data(data) => data,
        ReadStart::Guard(guard) => &**held.insert(guard),
    };

    for (depth, segment) in segments.iter().enumerate() {
        let Some(node) = level.get(segment) else {
            return Reach::Missing {
                matched: depth,
                expired: None,
            };
        };
        if node.is_expired(now) {
            return Reach::Missing {
                matched: depth,
                expired: Some(depth + 1),
            };
        }
        let Some(child) = node.child.clone() else {
            if depth + 1 == segments.len() {
                return Reach::Found(f(&LevelData::new(node.address)));
            }
            return Reach::Missing {
                matched: depth + 1,
                expired: None,
            };
        };
        let next = LevelReadGuard::acquire(&child, counter);
        level = &**held.insert(next);
    }

    Reach::Found(f(level))
}

/// Collects views of every visible node below `level` in pre-order.
pub(crate) fn collect_subtree(
    level: &LevelData,
    prefix: &StoreKey,
    counter: Option<&AtomicUsize>,
    now: Timestamp,
    out: &mut Vec<crate::view::NodeView>,
) {
    for (segment, node) in level.children.iter() {
        if node.is_expired(now) {
            continue;
        }
        let key = prefix.child(Segment::new(segment.clone()));
        out.push(crate::view::NodeView::capture(key.clone(), node));
        if let Some(child) = &node.child {
            let guard = LevelReadGuard::acquire(child, counter);
            collect_subtree(&guard, &key, counter, now, out);
        }
    }
}

/// Describes a detached subtree: relative path, address and value state of
/// every node, parents first.
pub(crate) fn describe_subtree(
    level: &LevelData,
    prefix: &[Segment],
    out: &mut Vec<(Vec<Segment>, Address, bool)>,
) {
    for (segment, node) in level.children.iter() {
        let mut path = prefix.to_vec();
        path.push(Segment::new(segment.clone()));
        out.push((path.clone(), node.address, node.has_value()));
        if let Some(child) = &node.child {
            describe_subtree(&child.read(), &path, out);
        }
    }
}

/// Runs `f` on every node below `level`, locking child levels for writing.
pub(crate) fn for_each_node_mut(level: &mut LevelData, f: &mut impl FnMut(&mut Node)) {
    for node in level.children.values_mut() {
        f(node);
        if let Some(child) = node.child.clone() {
            for_each_node_mut(&mut child.write(), f);
        }
    }
}
