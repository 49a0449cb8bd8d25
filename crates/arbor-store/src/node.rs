//! Nodes of the key tree and their versioned values.
//!
//! A node owns its value history, an ordered index from big-endian
//! timestamps to [`ValueInstance`]s, plus a pointer to the current entry:
//!
//! ```text
//!   history:  t1 ──▶ v1     current = t3
//!             t2 ──▶ v2
//!             t3 ──▶ v3     value_at(t2 + 1) = v2
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use arbor_common::types::{Address, Timestamp};
use arbor_index::OrderedIndex;

use crate::level::LevelRef;
use crate::schema::IndexDefinition;

/// A value: opaque payload plus ordered relationship addresses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueInstance {
    /// The payload bytes.
    pub payload: Bytes,
    /// Directed edges to other nodes, by address.
    pub relationships: Vec<Address>,
}

impl ValueInstance {
    /// Creates a value without relationships.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            relationships: Vec::new(),
        }
    }

    /// Creates a value with relationships.
    #[must_use]
    pub fn with_relationships(payload: impl Into<Bytes>, relationships: Vec<Address>) -> Self {
        Self {
            payload: payload.into(),
            relationships,
        }
    }

    /// Returns the address in relationship `slot`, if set.
    #[must_use]
    pub fn relationship(&self, slot: usize) -> Option<Address> {
        self.relationships
            .get(slot)
            .copied()
            .filter(|a| a.is_valid())
    }

    /// Sets relationship `slot`, padding earlier slots with
    /// [`Address::NONE`].
    pub fn set_relationship(&mut self, slot: usize, address: Address) {
        if self.relationships.len() <= slot {
            self.relationships.resize(slot + 1, Address::NONE);
        }
        self.relationships[slot] = address;
    }

    /// Replaces every occurrence of `from` with `to`. Returns the number of
    /// slots rewritten.
    pub fn rewrite_relationship(&mut self, from: Address, to: Address) -> usize {
        let mut rewritten = 0;
        for slot in &mut self.relationships {
            if *slot == from {
                *slot = to;
                rewritten += 1;
            }
        }
        rewritten
    }
}

/// A node in the key tree.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) address: Address,
    /// Level holding this node's children. Never empty while linked.
    pub(crate) child: Option<LevelRef>,
    /// Timestamp of the current history entry.
    pub(crate) current: Option<Timestamp>,
    pub(crate) history: Option<OrderedIndex<ValueInstance>>,
    /// Absolute expiration; zero means never.
    pub(crate) expiration: Timestamp,
    pub(crate) metadata: BTreeMap<String, String>,
    pub(crate) indexes: Vec<IndexDefinition>,
}

impl Node {
    pub(crate) fn new(address: Address) -> Self {
        Self {
            address,
            child: None,
            current: None,
            history: None,
            expiration: Timestamp::ZERO,
            metadata: BTreeMap::new(),
            indexes: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn has_value(&self) -> bool {
        self.current.is_some()
    }

    /// True once `now` has reached a non-zero expiration.
    #[inline]
    pub(crate) fn is_expired(&self, now: Timestamp) -> bool {
        !self.expiration.is_zero() && now >= self.expiration
    }

    /// True when nothing keeps the node alive and it must be pruned.
    pub(crate) fn is_vacant(&self) -> bool {
        self.current.is_none()
            && self.history.as_ref().map_or(true, OrderedIndex::is_empty)
            && self.child.is_none()
            && self.indexes.is_empty()
    }

    pub(crate) fn current_value(&self) -> Option<&ValueInstance> {
        let ts = self.current?;
        self.history.as_ref()?.find(ts.to_be_bytes())
    }

    pub(crate) fn current_value_mut(&mut self) -> Option<&mut ValueInstance> {
        let ts = self.current?;
        self.history.as_mut()?.find_mut(ts.to_be_bytes())
    }

    /// Records a history entry. The current pointer moves only when `ts` is
    /// the newest entry.
    pub(crate) fn record(&mut self, ts: Timestamp, instance: ValueInstance) {
        self.history
            .get_or_insert_with(OrderedIndex::new)
            .insert(ts.to_be_bytes().to_vec(), instance);
        if self.current.map_or(true, |cur| ts >= cur) {
            self.current = Some(ts);
        }
    }

    /// Entry in effect at `ts`: the newest one recorded at or before it.
    pub(crate) fn value_at(&self, ts: Timestamp) -> Option<(Timestamp, &ValueInstance)> {
        let (key, value) = self.history.as_ref()?.find_floor(ts.to_be_bytes())?;
        Some((Timestamp::from_be_slice(key)?, value))
    }

    pub(crate) fn history_entries(&self) -> Vec<(Timestamp, ValueInstance)> {
        self.history
            .iter()
            .flat_map(|h| h.iter())
            .filter_map(|(k, v)| Some((Timestamp::from_be_slice(k)?, v.clone())))
            .collect()
    }

    pub(crate) fn history_len(&self) -> usize {
        self.history.as_ref().map_or(0, OrderedIndex::len)
    }

    /// Drops the value and its whole history.
    pub(crate) fn clear_value(&mut self) -> bool {
        let had = self.current.is_some() || self.history.is_some();
        self.current = None;
        self.history = None;
        had
    }

    /// Rewrites relationships in every history entry.
    pub(crate) fn rewrite_relationships(&mut self, from: Address, to: Address) -> usize {
        self.history.as_mut().map_or(0, |h| {
            h.values_mut()
                .map(|v| v.rewrite_relationship(from, to))
                .sum()
        })
    }
}
