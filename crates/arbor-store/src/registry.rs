//! Address and path registry.
//!
//! Two maps behind one lock, kept separate from the level locks:
//!
//! - address -> location (path plus containing level), for every node;
//! - escaped path -> address, for nodes that currently hold a value.
//!
//! Lock order is level first, registry second. The only code that takes
//! the registry first is the address fast path, which then only tries the
//! level lock and restarts on failure.

use std::collections::HashMap;

use arbor_common::types::{Address, StoreKey};

use crate::level::LevelRef;

/// Where a node lives.
#[derive(Debug, Clone)]
pub(crate) struct NodeLocation {
    pub(crate) key: StoreKey,
    /// Level containing the node.
    pub(crate) level: LevelRef,
}

/// One pending registry change, applied in order.
#[derive(Debug)]
pub(crate) enum RegistryOp {
    Insert(Address, NodeLocation),
    Remove(Address),
    /// Node moved; the level changes only for the moved node itself.
    Relocate {
        address: Address,
        key: StoreKey,
        level: Option<LevelRef>,
    },
    SetPath(StoreKey, Address),
    RemovePath(StoreKey),
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    nodes: HashMap<Address, NodeLocation>,
    paths: HashMap<String, Address>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn location(&self, address: Address) -> Option<&NodeLocation> {
        self.nodes.get(&address)
    }

    pub(crate) fn key_of(&self, address: Address) -> Option<&StoreKey> {
        self.nodes.get(&address).map(|loc| &loc.key)
    }

    pub(crate) fn valued_address(&self, key: &StoreKey) -> Option<Address> {
        self.paths.get(key.path()).copied()
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn valued_count(&self) -> usize {
        self.paths.len()
    }

    pub(crate) fn apply(&mut self, op: RegistryOp) {
        match op {
            RegistryOp::Insert(address, location) => {
                self.nodes.insert(address, location);
            }
            RegistryOp::Remove(address) => {
                self.nodes.remove(&address);
            }
            RegistryOp::Relocate {
                address,
                key,
                level,
            } => {
                if let Some(loc) = self.nodes.get_mut(&address) {
                    loc.key = key;
                    if let Some(level) = level {
                        loc.level = level;
                    }
                }
            }
            RegistryOp::SetPath(key, address) => {
                self.paths.insert(key.path().to_string(), address);
            }
            RegistryOp::RemovePath(key) => {
                self.paths.remove(key.path());
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.paths.clear();
    }
}
