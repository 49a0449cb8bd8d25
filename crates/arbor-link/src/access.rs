//! Tree access shared by ordinary store calls and exclusive sections.
//!
//! Index maintenance runs either from `on_events`, through a plain
//! [`Store`], or inside an exclusive section before it ends. Both go through
//! these traits so the same code serves both paths.

use arbor_common::error::ArborResult;
use arbor_common::types::{Address, Segment, StoreKey};
use arbor_store::{ExclusiveSection, IndexDefinition, NodeView, Relationship, Store, ValueInstance};

/// Reads needed to compute field values and index entries.
pub trait TreeRead {
    /// Returns true if a visible node exists at `key`.
    fn exists(&self, key: &StoreKey) -> bool;
    /// Address of the node at `key`.
    fn address_of(&self, key: &StoreKey) -> Option<Address>;
    /// Visible children of `key`.
    fn children(&self, key: &StoreKey) -> Vec<Segment>;
    /// Resolved relationships of the current value of `key`.
    fn relationships(&self, key: &StoreKey) -> Vec<Relationship>;
    /// Every node carrying index definitions.
    fn all_index_definitions(&self) -> Vec<(StoreKey, Vec<IndexDefinition>)>;
}

/// Writes needed to maintain index entries.
pub trait TreeWrite: TreeRead {
    /// Writes only if `key` holds no value. Returns true if it wrote.
    fn set_if_absent(&mut self, key: &StoreKey, instance: ValueInstance) -> ArborResult<bool>;
    /// Sets one relationship slot of an existing value.
    fn set_relationship(&mut self, key: &StoreKey, slot: usize, address: Address) -> ArborResult<bool>;
    /// Removes the subtree at `key` if `predicate` accepts the node.
    fn delete_where<P: FnOnce(&NodeView) -> bool>(&mut self, key: &StoreKey, predicate: P) -> bool;
}

impl<T: TreeRead + ?Sized> TreeRead for &T {
    fn exists(&self, key: &StoreKey) -> bool {
        (**self).exists(key)
    }

    fn address_of(&self, key: &StoreKey) -> Option<Address> {
        (**self).address_of(key)
    }

    fn children(&self, key: &StoreKey) -> Vec<Segment> {
        (**self).children(key)
    }

    fn relationships(&self, key: &StoreKey) -> Vec<Relationship> {
        (**self).relationships(key)
    }

    fn all_index_definitions(&self) -> Vec<(StoreKey, Vec<IndexDefinition>)> {
        (**self).all_index_definitions()
    }
}

// =============================================================================
// Store
// =============================================================================

impl TreeRead for Store {
    fn exists(&self, key: &StoreKey) -> bool {
        Store::exists(self, key)
    }

    fn address_of(&self, key: &StoreKey) -> Option<Address> {
        Store::address_of(self, key)
    }

    fn children(&self, key: &StoreKey) -> Vec<Segment> {
        Store::children(self, key)
    }

    fn relationships(&self, key: &StoreKey) -> Vec<Relationship> {
        Store::relationships(self, key)
    }

    fn all_index_definitions(&self) -> Vec<(StoreKey, Vec<IndexDefinition>)> {
        Store::all_index_definitions(self)
    }
}

impl TreeWrite for &Store {
    fn set_if_absent(&mut self, key: &StoreKey, instance: ValueInstance) -> ArborResult<bool> {
        Ok(Store::set_if_absent(*self, key, instance)?.is_some())
    }

    fn set_relationship(&mut self, key: &StoreKey, slot: usize, address: Address) -> ArborResult<bool> {
        Store::set_relationship(*self, key, slot, address)
    }

    fn delete_where<P: FnOnce(&NodeView) -> bool>(&mut self, key: &StoreKey, predicate: P) -> bool {
        Store::delete_where(*self, key, predicate)
    }
}

// =============================================================================
// Exclusive Section
// =============================================================================

impl TreeRead for ExclusiveSection<'_> {
    fn exists(&self, key: &StoreKey) -> bool {
        ExclusiveSection::exists(self, key)
    }

    fn address_of(&self, key: &StoreKey) -> Option<Address> {
        ExclusiveSection::address_of(self, key)
    }

    fn children(&self, key: &StoreKey) -> Vec<Segment> {
        ExclusiveSection::children(self, key)
    }

    fn relationships(&self, key: &StoreKey) -> Vec<Relationship> {
        ExclusiveSection::relationships(self, key)
    }

    fn all_index_definitions(&self) -> Vec<(StoreKey, Vec<IndexDefinition>)> {
        ExclusiveSection::all_index_definitions(self)
    }
}

impl TreeWrite for ExclusiveSection<'_> {
    fn set_if_absent(&mut self, key: &StoreKey, instance: ValueInstance) -> ArborResult<bool> {
        Ok(ExclusiveSection::set_if_absent(self, key, instance)?.is_some())
    }

    fn set_relationship(&mut self, key: &StoreKey, slot: usize, address: Address) -> ArborResult<bool> {
        ExclusiveSection::set_relationship(self, key, slot, address)
    }

    fn delete_where<P: FnOnce(&NodeView) -> bool>(&mut self, key: &StoreKey, predicate: P) -> bool {
        ExclusiveSection::delete_where(self, key, predicate)
    }
}
