//! Levels: the sibling sets of the key tree.
//!
//! Each node with children owns one level, an [`OrderedIndex`] of child
//! nodes keyed by segment bytes behind its own reader-writer lock:
//!
//! ```text
//!   root level (owner @0)
//!   ┌────────────────────────────┐
//!   │ "data" @1      "records" @2│
//!   └──────────────────────│─────┘
//!                          ▼
//!             level (owner @2)
//!             ┌──────────────────┐
//!             │ "1" @3    "2" @7 │
//!             └──────────────────┘
//! ```
//!
//! A level is unlinked from its owner and marked detached as soon as it
//! becomes empty. The root level is never detached.

use parking_lot::RwLock;
use std::sync::Arc;

use arbor_common::types::{Address, Segment};
use arbor_index::OrderedIndex;

use crate::node::Node;

/// Shared handle to a level.
pub(crate) type LevelRef = Arc<RwLock<LevelData>>;

/// Contents of a level.
#[derive(Debug)]
pub(crate) struct LevelData {
    /// Address of the node whose children live here.
    pub(crate) owner: Address,
    pub(crate) children: OrderedIndex<Node>,
    /// Set once the level has been unlinked from the tree. Writers that
    /// reach a detached level must start over.
    pub(crate) detached: bool,
}

impl LevelData {
    pub(crate) const fn new(owner: Address) -> Self {
        Self {
            owner,
            children: OrderedIndex::new(),
            detached: false,
        }
    }

    /// Returns the child node stored under `segment`.
    #[inline]
    pub(crate) fn get(&self, segment: &Segment) -> Option<&Node> {
        self.children.find(segment.as_bytes())
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, segment: &Segment) -> Option<&mut Node> {
        self.children.find_mut(segment.as_bytes())
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Creates a fresh, unshared level owned by `owner`.
pub(crate) fn new_level(owner: Address) -> LevelRef {
    Arc::new(RwLock::new(LevelData::new(owner)))
}
