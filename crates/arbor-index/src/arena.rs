//! Slot arena backing the ordered index.
//!
//! Tree nodes live in a `Vec` of slots and refer to each other by
//! [`NodeId`] handles. Freed slots go on a free list and are reused by the
//! next allocation, so handles are only stable while their node is alive.

/// Handle to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Vec-backed slot arena with a free list.
#[derive(Debug, Clone)]
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores `value` and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` slots are in use.
    pub(crate) fn alloc(&mut self, value: T) -> NodeId {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(value);
            return NodeId(index);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("ordered index exceeded {} entries", u32::MAX);
        });
        self.slots.push(Some(value));
        NodeId(index)
    }

    /// Removes the value in `id` and returns it.
    pub(crate) fn free(&mut self, id: NodeId) -> T {
        let value = self.slots[id.index()]
            .take()
            .unwrap_or_else(|| panic!("double free of arena slot {}", id.0));
        self.free.push(id.0);
        value
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &T {
        match &self.slots[id.index()] {
            Some(value) => value,
            None => panic!("dangling arena handle {}", id.0),
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut T {
        match &mut self.slots[id.index()] {
            Some(value) => value,
            None => panic!("dangling arena handle {}", id.0),
        }
    }

    /// Returns mutable references to two distinct slots.
    pub(crate) fn pair_mut(&mut self, a: NodeId, b: NodeId) -> (&mut T, &mut T) {
        assert_ne!(a, b, "pair_mut on the same slot");
        let (low, high, swapped) = if a.0 < b.0 { (a, b, false) } else { (b, a, true) };
        let (head, tail) = self.slots.split_at_mut(high.index());
        let low_ref = head[low.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("dangling arena handle {}", low.0));
        let high_ref = tail[0]
            .as_mut()
            .unwrap_or_else(|| panic!("dangling arena handle {}", high.0));
        if swapped {
            (high_ref, low_ref)
        } else {
            (low_ref, high_ref)
        }
    }

    /// Iterates over live values in slot order.
    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    /// Number of slots, live or free.
    #[cfg(test)]
    pub(crate) fn capacity_used(&self) -> usize {
        self.slots.len()
    }
}
