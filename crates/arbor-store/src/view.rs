//! Read-side result types.

use std::collections::BTreeMap;
use std::time::Duration;

use arbor_common::types::{Address, StoreKey, Timestamp};

use crate::node::{Node, ValueInstance};
use crate::schema::IndexDefinition;

/// Snapshot of one node, taken under its level lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    /// Path of the node.
    pub key: StoreKey,
    /// Permanent address.
    pub address: Address,
    /// Current value, if any.
    pub value: Option<ValueInstance>,
    /// Timestamp of the current value.
    pub timestamp: Option<Timestamp>,
    /// Absolute expiration, zero for never.
    pub expiration: Timestamp,
    /// Metadata attributes.
    pub metadata: BTreeMap<String, String>,
    /// Number of direct children.
    pub child_count: usize,
    /// Number of history entries.
    pub history_len: usize,
    /// Index definitions attached to the node.
    pub indexes: Vec<IndexDefinition>,
}

impl NodeView {
    pub(crate) fn capture(key: StoreKey, node: &Node) -> Self {
        let child_count = node.child.as_ref().map_or(0, |c| c.read().len());
        Self {
            key,
            address: node.address,
            value: node.current_value().cloned(),
            timestamp: node.current,
            expiration: node.expiration,
            metadata: node.metadata.clone(),
            child_count,
            history_len: node.history_len(),
            indexes: node.indexes.clone(),
        }
    }

    /// Returns true if the node holds a value.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Returns the address in relationship `slot` of the current value.
    #[must_use]
    pub fn relationship(&self, slot: usize) -> Option<Address> {
        self.value.as_ref()?.relationship(slot)
    }
}

/// Result of a path lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// The node, if every segment resolved to a visible node.
    pub view: Option<NodeView>,
    /// Number of leading segments that resolved.
    pub matched: usize,
}

impl Lookup {
    /// Returns true if the node was found.
    #[must_use]
    pub fn is_found(&self) -> bool {
        self.view.is_some()
    }
}

/// A relationship resolved against the current tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relationship {
    /// The target exists, currently at `key`.
    Live {
        /// Target address.
        address: Address,
        /// Current path of the target.
        key: StoreKey,
    },
    /// The target address no longer exists (or the slot is empty).
    Broken {
        /// The dangling address.
        address: Address,
    },
}

impl Relationship {
    /// Returns the target address.
    #[must_use]
    pub fn address(&self) -> Address {
        match self {
            Self::Live { address, .. } | Self::Broken { address } => *address,
        }
    }

    /// Returns the target path for live relationships.
    #[must_use]
    pub fn key(&self) -> Option<&StoreKey> {
        match self {
            Self::Live { key, .. } => Some(key),
            Self::Broken { .. } => None,
        }
    }

    /// Returns true if the target exists.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

/// Point in time for history reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsOf {
    /// An absolute timestamp.
    At(Timestamp),
    /// A duration before now.
    Ago(Duration),
}

impl AsOf {
    /// Interprets a signed tick: negative values are nanoseconds before
    /// now, anything else is an absolute timestamp.
    ///
    /// # Example
    ///
    /// ```rust
    /// use arbor_store::AsOf;
    /// use arbor_common::types::Timestamp;
    /// use std::time::Duration;
    ///
    /// assert_eq!(AsOf::from_tick(-5), AsOf::Ago(Duration::from_nanos(5)));
    /// assert_eq!(AsOf::from_tick(7), AsOf::At(Timestamp::from_nanos(7)));
    /// ```
    #[must_use]
    pub fn from_tick(tick: i64) -> Self {
        if tick < 0 {
            Self::Ago(Duration::from_nanos(tick.unsigned_abs()))
        } else {
            Self::At(Timestamp::from_nanos(tick.unsigned_abs()))
        }
    }

    /// Resolves to an absolute timestamp relative to `now`.
    #[must_use]
    pub fn resolve(self, now: Timestamp) -> Timestamp {
        match self {
            Self::At(ts) => ts,
            Self::Ago(d) => now.sub(d),
        }
    }
}

/// Result of a value write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Address of the written node.
    pub address: Address,
    /// Timestamp of the new history entry.
    pub timestamp: Timestamp,
    /// True if the node was created by this write.
    pub created: bool,
}
