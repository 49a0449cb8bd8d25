//! In-order iterators over an [`OrderedIndex`].
//!
//! Iteration follows parent links from node to successor, so it needs no
//! auxiliary stack.

use bytes::Bytes;

use crate::arena::NodeId;
use crate::tree::OrderedIndex;

/// Iterator over `(key, value)` pairs in ascending key order.
pub struct Iter<'a, V> {
    tree: &'a OrderedIndex<V>,
    next: Option<NodeId>,
    /// Upper bound on the entries still to be yielded.
    remaining: usize,
}

impl<'a, V> Iter<'a, V> {
    pub(crate) fn new(tree: &'a OrderedIndex<V>, start: Option<NodeId>, bound: usize) -> Self {
        Self {
            tree,
            next: start,
            remaining: if start.is_some() { bound } else { 0 },
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a Bytes, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.successor(id);
        self.remaining = self.remaining.saturating_sub(1);
        Some(self.tree.entry(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let lower = usize::from(self.next.is_some());
        (lower, Some(self.remaining))
    }
}

impl<V> Clone for Iter<'_, V> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree,
            next: self.next,
            remaining: self.remaining,
        }
    }
}

/// Iterator over `(key, value)` pairs in descending key order.
pub struct RevIter<'a, V> {
    tree: &'a OrderedIndex<V>,
    next: Option<NodeId>,
}

impl<'a, V> RevIter<'a, V> {
    pub(crate) fn new(tree: &'a OrderedIndex<V>, start: Option<NodeId>) -> Self {
        Self { tree, next: start }
    }
}

impl<'a, V> Iterator for RevIter<'a, V> {
    type Item = (&'a Bytes, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.predecessor(id);
        Some(self.tree.entry(id))
    }
}

/// Iterator over keys in ascending order.
pub struct Keys<'a, V> {
    inner: Iter<'a, V>,
}

impl<'a, V> Keys<'a, V> {
    pub(crate) fn new(inner: Iter<'a, V>) -> Self {
        Self { inner }
    }
}

impl<'a, V> Iterator for Keys<'a, V> {
    type Item = &'a Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Iterator over values in ascending key order.
pub struct Values<'a, V> {
    inner: Iter<'a, V>,
}

impl<'a, V> Values<'a, V> {
    pub(crate) fn new(inner: Iter<'a, V>) -> Self {
        Self { inner }
    }
}

impl<'a, V> Iterator for Values<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
