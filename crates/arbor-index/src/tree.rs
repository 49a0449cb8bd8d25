//! AVL tree implementation.

use std::cmp::Ordering;
use std::fmt;
use std::mem;

use bytes::Bytes;

use crate::arena::{Arena, NodeId};
use crate::iter::{Iter, Keys, RevIter, Values};

/// A tree node. `balance` is `height(right) - height(left)`.
#[derive(Debug, Clone)]
pub(crate) struct Node<V> {
    pub(crate) key: Bytes,
    pub(crate) value: V,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) balance: i8,
}

impl<V> Node<V> {
    fn new(key: Bytes, value: V, parent: Option<NodeId>) -> Self {
        Self {
            key,
            value,
            left: None,
            right: None,
            parent,
            balance: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertMode {
    /// Keep an existing entry untouched.
    KeepExisting,
    /// Replace an existing entry's value.
    Replace,
}

struct InsertOutcome<V> {
    target: Option<NodeId>,
    inserted: bool,
    previous: Option<V>,
}

/// An ordered map from byte-string keys to values, kept balanced as an AVL
/// tree.
///
/// Keys compare lexicographically by raw bytes. All lookups and updates
/// are O(log n).
///
/// # Example
///
/// ```rust
/// use arbor_index::OrderedIndex;
///
/// let mut index = OrderedIndex::new();
/// index.insert("b", 2);
/// index.insert("d", 4);
///
/// assert_eq!(index.find_floor(b"c").map(|(k, v)| (&k[..], *v)), Some((&b"b"[..], 2)));
/// assert_eq!(index.find_ceiling(b"c").map(|(k, v)| (&k[..], *v)), Some((&b"d"[..], 4)));
/// assert!(index.find_floor(b"a").is_none());
/// ```
#[derive(Clone)]
pub struct OrderedIndex<V> {
    pub(crate) arena: Arena<Node<V>>,
    pub(crate) root: Option<NodeId>,
    len: usize,
}

impl<V> Default for OrderedIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> OrderedIndex<V> {
    /// Creates an empty index.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: None,
            len: 0,
        }
    }

    /// Returns the number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the index has no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = None;
        self.len = 0;
    }

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &Node<V> {
        self.arena.get(id)
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<V> {
        self.arena.get_mut(id)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    fn find_id(&self, key: &[u8]) -> Option<NodeId> {
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = self.node(id);
            cur = match key.cmp(&node.key[..]) {
                Ordering::Equal => return Some(id),
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
            };
        }
        None
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn find(&self, key: impl AsRef<[u8]>) -> Option<&V> {
        self.find_id(key.as_ref()).map(|id| &self.node(id).value)
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub fn find_mut(&mut self, key: impl AsRef<[u8]>) -> Option<&mut V> {
        let id = self.find_id(key.as_ref())?;
        Some(&mut self.node_mut(id).value)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> bool {
        self.find_id(key.as_ref()).is_some()
    }

    pub(crate) fn floor_id(&self, key: &[u8]) -> Option<NodeId> {
        let mut best = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = self.node(id);
            cur = match key.cmp(&node.key[..]) {
                Ordering::Equal => return Some(id),
                Ordering::Less => node.left,
                Ordering::Greater => {
                    best = Some(id);
                    node.right
                }
            };
        }
        best
    }

    pub(crate) fn ceiling_id(&self, key: &[u8]) -> Option<NodeId> {
        let mut best = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = self.node(id);
            cur = match key.cmp(&node.key[..]) {
                Ordering::Equal => return Some(id),
                Ordering::Greater => node.right,
                Ordering::Less => {
                    best = Some(id);
                    node.left
                }
            };
        }
        best
    }

    /// Returns the entry with the largest key `<= key`.
    #[must_use]
    pub fn find_floor(&self, key: impl AsRef<[u8]>) -> Option<(&Bytes, &V)> {
        self.floor_id(key.as_ref()).map(|id| self.entry(id))
    }

    /// Returns the entry with the smallest key `>= key`.
    #[must_use]
    pub fn find_ceiling(&self, key: impl AsRef<[u8]>) -> Option<(&Bytes, &V)> {
        self.ceiling_id(key.as_ref()).map(|id| self.entry(id))
    }

    /// Returns the entry with the smallest key.
    #[must_use]
    pub fn first(&self) -> Option<(&Bytes, &V)> {
        self.root.map(|id| self.entry(self.leftmost(id)))
    }

    /// Returns the entry with the largest key.
    #[must_use]
    pub fn last(&self) -> Option<(&Bytes, &V)> {
        self.root.map(|id| self.entry(self.rightmost(id)))
    }

    #[inline]
    pub(crate) fn entry(&self, id: NodeId) -> (&Bytes, &V) {
        let node = self.node(id);
        (&node.key, &node.value)
    }

    pub(crate) fn leftmost(&self, mut id: NodeId) -> NodeId {
        while let Some(left) = self.node(id).left {
            id = left;
        }
        id
    }

    fn rightmost(&self, mut id: NodeId) -> NodeId {
        while let Some(right) = self.node(id).right {
            id = right;
        }
        id
    }

    /// In-order successor, found through parent links.
    pub(crate) fn successor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(right) = self.node(id).right {
            return Some(self.leftmost(right));
        }
        let mut child = id;
        let mut parent = self.node(id).parent;
        while let Some(p) = parent {
            if self.node(p).left == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.node(p).parent;
        }
        None
    }

    /// In-order predecessor, found through parent links.
    pub(crate) fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(left) = self.node(id).left {
            return Some(self.rightmost(left));
        }
        let mut child = id;
        let mut parent = self.node(id).parent;
        while let Some(p) = parent {
            if self.node(p).right == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.node(p).parent;
        }
        None
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterates over entries in ascending key order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, V> {
        Iter::new(self, self.root.map(|id| self.leftmost(id)), self.len)
    }

    /// Iterates over entries with keys `>= key` in ascending order.
    #[must_use]
    pub fn range_from(&self, key: impl AsRef<[u8]>) -> Iter<'_, V> {
        Iter::new(self, self.ceiling_id(key.as_ref()), self.len)
    }

    /// Iterates over entries with keys `<= key` in descending order.
    #[must_use]
    pub fn range_back_from(&self, key: impl AsRef<[u8]>) -> RevIter<'_, V> {
        RevIter::new(self, self.floor_id(key.as_ref()))
    }

    /// Consumes the index and returns its entries in ascending key order.
    #[must_use]
    pub fn into_entries(mut self) -> Vec<(Bytes, V)> {
        let mut ids = Vec::with_capacity(self.len);
        let mut cur = self.root.map(|id| self.leftmost(id));
        while let Some(id) = cur {
            ids.push(id);
            cur = self.successor(id);
        }
        ids.into_iter()
            .map(|id| {
                let node = self.arena.free(id);
                (node.key, node.value)
            })
            .collect()
    }

    /// Iterates over keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> Keys<'_, V> {
        Keys::new(self.iter())
    }

    /// Iterates over values in ascending key order.
    #[must_use]
    pub fn values(&self) -> Values<'_, V> {
        Values::new(self.iter())
    }

    /// Visits every value mutably, in no particular order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.arena.values_mut().map(|node| &mut node.value)
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts `value` under `key` unless the key is present.
    ///
    /// Returns the stored value and whether it was inserted. An existing
    /// entry is left untouched and `value` is dropped.
    pub fn insert_or_get(&mut self, key: impl Into<Bytes>, value: V) -> (&mut V, bool) {
        let outcome = self.insert_with_mode(key.into(), value, InsertMode::KeepExisting);
        let inserted = outcome.inserted;
        let id = outcome.target.unwrap_or_else(|| unreachable!("insert records its target"));
        (&mut self.node_mut(id).value, inserted)
    }

    /// Inserts `value` under `key`, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<Bytes>, value: V) -> Option<V> {
        self.insert_with_mode(key.into(), value, InsertMode::Replace)
            .previous
    }

    fn insert_with_mode(&mut self, key: Bytes, value: V, mode: InsertMode) -> InsertOutcome<V> {
        let mut outcome = InsertOutcome {
            target: None,
            inserted: false,
            previous: None,
        };
        let (root, _) = self.insert_at(self.root, None, key, value, mode, &mut outcome);
        self.set_root(Some(root));
        outcome
    }

    /// Inserts below `at`; returns the new subtree root and whether the
    /// subtree grew taller.
    fn insert_at(
        &mut self,
        at: Option<NodeId>,
        parent: Option<NodeId>,
        key: Bytes,
        value: V,
        mode: InsertMode,
        outcome: &mut InsertOutcome<V>,
    ) -> (NodeId, bool) {
        let Some(id) = at else {
            let id = self.arena.alloc(Node::new(key, value, parent));
            self.len += 1;
            outcome.target = Some(id);
            outcome.inserted = true;
            return (id, true);
        };

        match key[..].cmp(&self.node(id).key[..]) {
            Ordering::Equal => {
                outcome.target = Some(id);
                if mode == InsertMode::Replace {
                    outcome.previous = Some(mem::replace(&mut self.node_mut(id).value, value));
                }
                (id, false)
            }
            Ordering::Less => {
                let left = self.node(id).left;
                let (child, grew) = self.insert_at(left, Some(id), key, value, mode, outcome);
                self.set_left(id, Some(child));
                if !grew {
                    return (id, false);
                }
                let balance = self.shift_balance(id, -1);
                match balance {
                    0 => (id, false),
                    -1 => (id, true),
                    _ => (self.rebalance_left_heavy(id), false),
                }
            }
            Ordering::Greater => {
                let right = self.node(id).right;
                let (child, grew) = self.insert_at(right, Some(id), key, value, mode, outcome);
                self.set_right(id, Some(child));
                if !grew {
                    return (id, false);
                }
                let balance = self.shift_balance(id, 1);
                match balance {
                    0 => (id, false),
                    1 => (id, true),
                    _ => (self.rebalance_right_heavy(id), false),
                }
            }
        }
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Option<V> {
        let mut removed = None;
        let (root, _) = self.remove_at(self.root, key.as_ref(), &mut removed);
        self.set_root(root);
        removed
    }

    /// Removes `key` below `at`; returns the new subtree root and whether
    /// the subtree became shorter.
    fn remove_at(
        &mut self,
        at: Option<NodeId>,
        key: &[u8],
        removed: &mut Option<V>,
    ) -> (Option<NodeId>, bool) {
        let Some(id) = at else {
            return (None, false);
        };

        match key.cmp(&self.node(id).key[..]) {
            Ordering::Less => {
                let left = self.node(id).left;
                let (child, shrank) = self.remove_at(left, key, removed);
                self.set_left(id, child);
                if shrank {
                    self.left_shrank(id)
                } else {
                    (Some(id), false)
                }
            }
            Ordering::Greater => {
                let right = self.node(id).right;
                let (child, shrank) = self.remove_at(right, key, removed);
                self.set_right(id, child);
                if shrank {
                    self.right_shrank(id)
                } else {
                    (Some(id), false)
                }
            }
            Ordering::Equal => {
                let (left, right) = {
                    let node = self.node(id);
                    (node.left, node.right)
                };
                match (left, right) {
                    (Some(left), Some(_)) => {
                        // Trade places with the in-order predecessor. The
                        // doomed entry is then the largest key of the left
                        // subtree, so the descent below still finds it.
                        let pred = self.rightmost(left);
                        {
                            let (node, pred_node) = self.arena.pair_mut(id, pred);
                            mem::swap(&mut node.key, &mut pred_node.key);
                            mem::swap(&mut node.value, &mut pred_node.value);
                        }
                        let (child, shrank) = self.remove_at(Some(left), key, removed);
                        self.set_left(id, child);
                        if shrank {
                            self.left_shrank(id)
                        } else {
                            (Some(id), false)
                        }
                    }
                    (only, None) | (None, only) => {
                        let node = self.arena.free(id);
                        self.len -= 1;
                        *removed = Some(node.value);
                        (only, true)
                    }
                }
            }
        }
    }

    fn left_shrank(&mut self, id: NodeId) -> (Option<NodeId>, bool) {
        match self.shift_balance(id, 1) {
            1 => (Some(id), false),
            0 => (Some(id), true),
            _ => {
                let root = self.rebalance_right_heavy(id);
                (Some(root), self.node(root).balance == 0)
            }
        }
    }

    fn right_shrank(&mut self, id: NodeId) -> (Option<NodeId>, bool) {
        match self.shift_balance(id, -1) {
            -1 => (Some(id), false),
            0 => (Some(id), true),
            _ => {
                let root = self.rebalance_left_heavy(id);
                (Some(root), self.node(root).balance == 0)
            }
        }
    }

    // =========================================================================
    // Rotations
    // =========================================================================

    fn shift_balance(&mut self, id: NodeId, delta: i8) -> i8 {
        let node = self.node_mut(id);
        node.balance += delta;
        node.balance
    }

    fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
        if let Some(id) = root {
            self.node_mut(id).parent = None;
        }
    }

    fn set_left(&mut self, id: NodeId, child: Option<NodeId>) {
        self.node_mut(id).left = child;
        if let Some(c) = child {
            self.node_mut(c).parent = Some(id);
        }
    }

    fn set_right(&mut self, id: NodeId, child: Option<NodeId>) {
        self.node_mut(id).right = child;
        if let Some(c) = child {
            self.node_mut(c).parent = Some(id);
        }
    }

    /// Fixes a node with balance -2. Returns the new subtree root.
    fn rebalance_left_heavy(&mut self, id: NodeId) -> NodeId {
        let left = self.child(id, Side::Left);
        if self.node(left).balance > 0 {
            let new_left = self.rotate_left(left);
            self.set_left(id, Some(new_left));
        }
        self.rotate_right(id)
    }

    /// Fixes a node with balance +2. Returns the new subtree root.
    fn rebalance_right_heavy(&mut self, id: NodeId) -> NodeId {
        let right = self.child(id, Side::Right);
        if self.node(right).balance < 0 {
            let new_right = self.rotate_right(right);
            self.set_right(id, Some(new_right));
        }
        self.rotate_left(id)
    }

    fn child(&self, id: NodeId, side: Side) -> NodeId {
        let node = self.node(id);
        let child = match side {
            Side::Left => node.left,
            Side::Right => node.right,
        };
        child.unwrap_or_else(|| unreachable!("unbalanced node is missing its heavy child"))
    }

    /// ```text
    ///   a              b
    ///  / \            / \
    /// x   b    =>    a   z
    ///    / \        / \
    ///   y   z      x   y
    /// ```
    fn rotate_left(&mut self, a: NodeId) -> NodeId {
        let b = self.child(a, Side::Right);
        let parent = self.node(a).parent;
        let inner = self.node(b).left;
        self.set_right(a, inner);
        self.set_left(b, Some(a));
        self.node_mut(b).parent = parent;

        let b_bal = self.node(b).balance;
        let a_bal = self.node(a).balance - 1 - b_bal.max(0);
        self.node_mut(a).balance = a_bal;
        self.node_mut(b).balance = b_bal - 1 + a_bal.min(0);
        b
    }

    /// ```text
    ///     a          b
    ///    / \        / \
    ///   b   z  =>  x   a
    ///  / \            / \
    /// x   y          y   z
    /// ```
    fn rotate_right(&mut self, a: NodeId) -> NodeId {
        let b = self.child(a, Side::Left);
        let parent = self.node(a).parent;
        let inner = self.node(b).right;
        self.set_left(a, inner);
        self.set_right(b, Some(a));
        self.node_mut(b).parent = parent;

        let b_bal = self.node(b).balance;
        let a_bal = self.node(a).balance + 1 - b_bal.min(0);
        self.node_mut(a).balance = a_bal;
        self.node_mut(b).balance = b_bal + 1 + a_bal.max(0);
        b
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Returns the entry stored at the root of the tree.
    #[must_use]
    pub fn root_entry(&self) -> Option<(&Bytes, &V)> {
        self.root.map(|id| self.entry(id))
    }

    /// Returns the height of the tree (0 when empty).
    #[must_use]
    pub fn height(&self) -> usize {
        fn walk<V>(tree: &OrderedIndex<V>, id: Option<NodeId>) -> usize {
            id.map_or(0, |id| {
                let node = tree.node(id);
                1 + walk(tree, node.left).max(walk(tree, node.right))
            })
        }
        walk(self, self.root)
    }

    /// Checks ordering, parent links, stored balance factors and the AVL
    /// height bound. Returns the tree height.
    pub fn validate(&self) -> Result<usize, String> {
        let mut count = 0;
        let height = self.validate_at(self.root, None, None, None, &mut count)?;
        if count != self.len {
            return Err(format!("len is {} but {} nodes are reachable", self.len, count));
        }
        Ok(height)
    }

    fn validate_at(
        &self,
        at: Option<NodeId>,
        parent: Option<NodeId>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        count: &mut usize,
    ) -> Result<usize, String> {
        let Some(id) = at else {
            return Ok(0);
        };
        let node = self.node(id);
        *count += 1;

        if node.parent != parent {
            return Err(format!("bad parent link at key {:?}", node.key));
        }
        if lower.is_some_and(|lo| &node.key[..] <= lo) {
            return Err(format!("key {:?} out of order (too small)", node.key));
        }
        if upper.is_some_and(|hi| &node.key[..] >= hi) {
            return Err(format!("key {:?} out of order (too large)", node.key));
        }

        let left = self.validate_at(node.left, Some(id), lower, Some(&node.key[..]), count)?;
        let right = self.validate_at(node.right, Some(id), Some(&node.key[..]), upper, count)?;
        let diff = right as i64 - left as i64;
        if diff.abs() > 1 {
            return Err(format!("key {:?} has height difference {}", node.key, diff));
        }
        if diff != i64::from(node.balance) {
            return Err(format!(
                "key {:?} stores balance {} but heights differ by {}",
                node.key, node.balance, diff
            ));
        }
        Ok(1 + left.max(right))
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Left,
    Right,
}

impl<V: fmt::Debug> fmt::Debug for OrderedIndex<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Into<Bytes>, V> FromIterator<(K, V)> for OrderedIndex<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut index = Self::new();
        for (key, value) in iter {
            index.insert(key, value);
        }
        index
    }
}

impl<K: Into<Bytes>, V> Extend<(K, V)> for OrderedIndex<V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, V> IntoIterator for &'a OrderedIndex<V> {
    type Item = (&'a Bytes, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn keys_of<V>(index: &OrderedIndex<V>) -> Vec<Vec<u8>> {
        index.keys().map(|k| k.to_vec()).collect()
    }

    #[test]
    fn test_empty() {
        let index: OrderedIndex<u32> = OrderedIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.height(), 0);
        assert!(index.find(b"a").is_none());
        assert!(index.find_floor(b"a").is_none());
        assert!(index.first().is_none());
        assert_eq!(index.validate(), Ok(0));
    }

    #[test]
    fn test_three_inserts_rotate_to_middle_root() {
        let mut index = OrderedIndex::new();
        index.insert("30", 30);
        index.insert("20", 20);
        index.insert("10", 10);

        let root = index.root.unwrap();
        assert_eq!(index.node(root).key.as_ref(), b"20");
        assert_eq!(index.validate(), Ok(2));
        assert_eq!(keys_of(&index), vec![b"10".to_vec(), b"20".to_vec(), b"30".to_vec()]);
    }

    #[test]
    fn test_double_rotation() {
        let mut index = OrderedIndex::new();
        index.insert("a", 1);
        index.insert("c", 3);
        index.insert("b", 2);
        let root = index.root.unwrap();
        assert_eq!(index.node(root).key.as_ref(), b"b");
        assert_eq!(index.validate(), Ok(2));
    }

    #[test]
    fn test_insert_or_get_keeps_existing() {
        let mut index = OrderedIndex::new();
        let (value, inserted) = index.insert_or_get("k", 1);
        assert!(inserted);
        *value += 10;

        let (value, inserted) = index.insert_or_get("k", 99);
        assert!(!inserted);
        assert_eq!(*value, 11);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_insert_replaces() {
        let mut index = OrderedIndex::new();
        assert_eq!(index.insert("k", 1), None);
        assert_eq!(index.insert("k", 2), Some(1));
        assert_eq!(index.find("k"), Some(&2));
    }

    #[test]
    fn test_remove_cases() {
        let mut index: OrderedIndex<u32> = (0u32..32).map(|i| (format!("{i:02}"), i)).collect();
        assert_eq!(index.validate().map(|_| ()), Ok(()));

        // leaf, single child, two children, root
        for key in ["31", "30", "08", "15"] {
            let expected: u32 = key.parse().unwrap();
            assert_eq!(index.remove(key), Some(expected));
            assert!(index.validate().is_ok(), "{:?}", index.validate());
            assert!(!index.contains_key(key));
        }
        assert_eq!(index.remove("nope"), None);
        assert_eq!(index.len(), 28);
    }

    #[test]
    fn test_remove_all() {
        let mut index: OrderedIndex<usize> = (0..100).map(|i| (format!("{i:03}"), i)).collect();
        for i in (0..100).rev().step_by(2).chain((0..100).step_by(2)) {
            index.remove(format!("{i:03}"));
            index.validate().unwrap();
        }
        assert!(index.is_empty());
        assert_eq!(index.root, None);
    }

    #[test]
    fn test_floor_and_ceiling() {
        let index: OrderedIndex<u32> = [("b", 1), ("d", 2), ("f", 3)].into_iter().collect();

        assert!(index.find_floor(b"a").is_none());
        assert_eq!(index.find_floor(b"b").unwrap().1, &1);
        assert_eq!(index.find_floor(b"c").unwrap().1, &1);
        assert_eq!(index.find_floor(b"z").unwrap().1, &3);

        assert_eq!(index.find_ceiling(b"a").unwrap().1, &1);
        assert_eq!(index.find_ceiling(b"d").unwrap().1, &2);
        assert_eq!(index.find_ceiling(b"e").unwrap().1, &3);
        assert!(index.find_ceiling(b"g").is_none());
    }

    #[test]
    fn test_byte_order_not_string_order() {
        let mut index = OrderedIndex::new();
        index.insert(vec![0x80u8], "high");
        index.insert(vec![0x7Fu8], "low");
        index.insert(vec![0x7Fu8, 0x00], "low-ext");
        let values: Vec<_> = index.values().copied().collect();
        assert_eq!(values, vec!["low", "low-ext", "high"]);
    }

    #[test]
    fn test_range_from() {
        let index: OrderedIndex<u32> = (0u32..10).map(|i| (format!("k{i}"), i)).collect();
        let got: Vec<u32> = index.range_from("k5").map(|(_, v)| *v).collect();
        assert_eq!(got, vec![5, 6, 7, 8, 9]);
        let got: Vec<u32> = index.range_from("k45").map(|(_, v)| *v).collect();
        assert_eq!(got, vec![5, 6, 7, 8, 9]);
        assert_eq!(index.range_from("z").count(), 0);
    }

    #[test]
    fn test_range_back_from() {
        let index: OrderedIndex<u32> = (0u32..10).map(|i| (format!("k{i}"), i)).collect();
        let got: Vec<u32> = index.range_back_from("k45").map(|(_, v)| *v).collect();
        assert_eq!(got, vec![4, 3, 2, 1, 0]);
        assert_eq!(index.range_back_from("a").count(), 0);
        assert_eq!(index.range_back_from("z").next().map(|(_, v)| *v), Some(9));
    }

    #[test]
    fn test_into_entries() {
        let index: OrderedIndex<u32> = [("c", 3), ("a", 1), ("b", 2)].into_iter().collect();
        let entries = index.into_entries();
        let values: Vec<u32> = entries.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(&entries[0].0[..], b"a");
    }

    #[test]
    fn test_values_mut() {
        let mut index: OrderedIndex<u32> = (0u32..5).map(|i| (format!("{i}"), i)).collect();
        for v in index.values_mut() {
            *v *= 2;
        }
        assert_eq!(index.values().copied().collect::<Vec<_>>(), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_height_bound_sequential() {
        let mut index = OrderedIndex::new();
        for i in 0u32..1024 {
            index.insert(i.to_be_bytes().to_vec(), i);
        }
        // AVL height is at most 1.44 log2(n + 2).
        let height = index.validate().unwrap();
        assert!(height <= 15, "height {height}");
        assert_eq!(index.first().unwrap().1, &0);
        assert_eq!(index.last().unwrap().1, &1023);
    }

    #[test]
    fn test_random_against_btreemap() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut index = OrderedIndex::new();
        let mut reference = std::collections::BTreeMap::new();
        for _ in 0..5_000 {
            let key = vec![rng.gen_range(0u8..64), rng.gen_range(0u8..4)];
            if rng.gen_bool(0.6) {
                assert_eq!(index.insert(key.clone(), key[0]), reference.insert(key.clone(), key[0]));
            } else {
                assert_eq!(index.remove(&key), reference.remove(&key));
            }
        }
        index.validate().unwrap();
        let ours: Vec<_> = index.iter().map(|(k, v)| (k.to_vec(), *v)).collect();
        let theirs: Vec<_> = reference.into_iter().collect();
        assert_eq!(ours, theirs);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(Vec<u8>),
        Remove(Vec<u8>),
    }

    fn arb_key() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(0u8..8, 0..4)
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => arb_key().prop_map(Op::Insert),
            2 => arb_key().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_invariants_hold_after_every_op(ops in prop::collection::vec(arb_op(), 1..300)) {
            let mut index = OrderedIndex::new();
            for op in ops {
                match op {
                    Op::Insert(k) => { index.insert(k, ()); }
                    Op::Remove(k) => { index.remove(&k); }
                }
                prop_assert!(index.validate().is_ok(), "{:?}", index.validate());
            }
        }

        #[test]
        fn prop_floor_ceiling_match_sorted_array(
            ops in prop::collection::vec(arb_op(), 1000..1200),
            probes in prop::collection::vec(arb_key(), 20),
        ) {
            let mut index = OrderedIndex::new();
            let mut sorted: Vec<Vec<u8>> = Vec::new();
            for op in ops {
                match op {
                    Op::Insert(k) => {
                        if let Err(pos) = sorted.binary_search(&k) {
                            sorted.insert(pos, k.clone());
                        }
                        index.insert(k, ());
                    }
                    Op::Remove(k) => {
                        if let Ok(pos) = sorted.binary_search(&k) {
                            sorted.remove(pos);
                        }
                        index.remove(&k);
                    }
                }
            }
            for probe in probes {
                let floor = match sorted.binary_search(&probe) {
                    Ok(i) => Some(&sorted[i]),
                    Err(0) => None,
                    Err(i) => Some(&sorted[i - 1]),
                };
                let ceiling = match sorted.binary_search(&probe) {
                    Ok(i) => Some(&sorted[i]),
                    Err(i) => sorted.get(i),
                };
                prop_assert_eq!(index.find_floor(&probe).map(|(k, _)| k.to_vec()), floor.cloned());
                prop_assert_eq!(index.find_ceiling(&probe).map(|(k, _)| k.to_vec()), ceiling.cloned());
            }
            prop_assert_eq!(index.len(), sorted.len());
        }
    }
}
