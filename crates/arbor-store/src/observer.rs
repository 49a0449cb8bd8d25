//! Node lifecycle events and their observers.
//!
//! Every operation collects one event per node it creates or removes and
//! hands the batch to the registered observers on the calling thread, after
//! all of its level locks are released. Observers may therefore call back
//! into the store. Batches are delivered one at a time across the whole
//! store.
//!
//! Exclusive sections first offer their events to
//! [`NodeObserver::on_section_events`] while the store is still quiesced.
//! Observers that decline get them through `on_events` once the section
//! has ended.

use arbor_common::types::{Address, StoreKey};

use crate::exclusive::ExclusiveSection;
use crate::store::Store;

/// A structural change to the key tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A node was created at `key`.
    Created {
        /// Path of the new node.
        key: StoreKey,
        /// Its address.
        address: Address,
    },
    /// A node was removed from `key`.
    Removed {
        /// Path the node had.
        key: StoreKey,
        /// Its address, now retired.
        address: Address,
    },
}

impl NodeEvent {
    /// Returns the path the event refers to.
    #[must_use]
    pub fn key(&self) -> &StoreKey {
        match self {
            Self::Created { key, .. } | Self::Removed { key, .. } => key,
        }
    }

    /// Returns the node address.
    #[must_use]
    pub fn address(&self) -> Address {
        match self {
            Self::Created { address, .. } | Self::Removed { address, .. } => *address,
        }
    }

    /// Returns true for creations.
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

/// Receives node events from a store.
pub trait NodeObserver: Send + Sync {
    /// Called with the events of one operation.
    fn on_events(&self, store: &Store, events: &[NodeEvent]);

    /// Called with the events of an exclusive section before it ends, with
    /// the section itself for follow-up reads and writes. Events those
    /// writes produce are offered again in a later call.
    ///
    /// Returns false to receive the section's events through
    /// [`on_events`](Self::on_events) afterwards instead. The answer must
    /// not change between calls.
    fn on_section_events(&self, _section: &mut ExclusiveSection<'_>, _events: &[NodeEvent]) -> bool {
        false
    }

    /// Called after the whole tree was replaced (purge or load). No
    /// per-node events are sent for those operations.
    fn on_reset(&self, _store: &Store) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let key = StoreKey::parse("/a/b").unwrap();
        let event = NodeEvent::Created {
            key: key.clone(),
            address: Address::new(2),
        };
        assert!(event.is_created());
        assert_eq!(event.key(), &key);
        assert_eq!(event.address(), Address::new(2));
    }
}
