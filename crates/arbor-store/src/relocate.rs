//! Atomic stage-then-relocate moves.
//!
//! A record is typically staged under a scratch path and then moved into
//! place in one exclusive section, so readers see either the old tree or
//! the final one:
//!
//! ```text
//!   /staging/tmp-17  ──move──▶  /records/17
//!        @40                       @41 (new address)
//!   relationships to @40 anywhere in the store now point at @41
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;

use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Address, Segment, StoreKey, Timestamp};
use arbor_index::OrderedIndex;

use crate::exclusive::ExclusiveSection;
use crate::level::LevelRef;
use crate::node::ValueInstance;
use crate::observer::NodeEvent;
use crate::ops::{describe_subtree, for_each_node_mut, Mutation};
use crate::registry::RegistryOp;
use crate::schema::IndexDefinition;
use crate::store::Store;

/// Options for [`Store::move_referenced_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveOptions {
    /// Keys whose relationship 0 must point at the current destination
    /// (or nowhere) for the move to proceed.
    pub overwrite_guard: Vec<StoreKey>,
    /// Keys whose relationship 0 is pointed at the moved node.
    pub refs: Vec<StoreKey>,
    /// Keys deleted after the move.
    pub unrefs: Vec<StoreKey>,
    /// Carry the source expiration over to the destination.
    pub keep_expiration: bool,
}

impl MoveOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an overwrite guard.
    #[must_use]
    pub fn guard(mut self, key: StoreKey) -> Self {
        self.overwrite_guard.push(key);
        self
    }

    /// Adds a key to point at the destination.
    #[must_use]
    pub fn reference(mut self, key: StoreKey) -> Self {
        self.refs.push(key);
        self
    }

    /// Adds a key to delete.
    #[must_use]
    pub fn unreference(mut self, key: StoreKey) -> Self {
        self.unrefs.push(key);
        self
    }

    /// Keeps the source expiration.
    #[must_use]
    pub fn keep_expiration(mut self, keep: bool) -> Self {
        self.keep_expiration = keep;
        self
    }
}

/// Result of a relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The source now lives at the destination.
    Moved {
        /// Address of the destination node.
        address: Address,
        /// Relationship slots rewritten from the old address.
        rewritten: usize,
    },
    /// Nothing exists at the source.
    SourceMissing,
    /// An overwrite guard points somewhere else; nothing changed.
    Blocked {
        /// The guard that failed.
        guard: StoreKey,
    },
}

impl MoveOutcome {
    /// Returns true if the move happened.
    #[must_use]
    pub fn is_moved(&self) -> bool {
        matches!(self, Self::Moved { .. })
    }
}

/// Everything a node carries except its address and position.
struct Contents {
    address: Address,
    current: Option<Timestamp>,
    history: Option<OrderedIndex<ValueInstance>>,
    expiration: Timestamp,
    metadata: BTreeMap<String, String>,
    indexes: Vec<IndexDefinition>,
    child: Option<LevelRef>,
    /// Relative path, address and value state of every node below.
    descendants: Vec<(Vec<Segment>, Address, bool)>,
}

impl Store {
    /// Moves the node at `src` with its subtree to `dst` in one exclusive
    /// section. See [`ExclusiveSection::move_referenced_key`].
    pub fn move_referenced_key(
        &self,
        src: &StoreKey,
        dst: &StoreKey,
        options: &MoveOptions,
    ) -> ArborResult<MoveOutcome> {
        self.exclusive(|section| section.move_referenced_key(src, dst, options))
    }
}

impl ExclusiveSection<'_> {
    /// Moves the node at `src` with its subtree to `dst`.
    ///
    /// The destination subtree is replaced. The moved node gets a new
    /// address and every relationship in the store that pointed at the old
    /// one is rewritten; descendants keep their addresses.
    pub fn move_referenced_key(
        &mut self,
        src: &StoreKey,
        dst: &StoreKey,
        options: &MoveOptions,
    ) -> ArborResult<MoveOutcome> {
        for key in [src, dst]
            .into_iter()
            .chain(&options.overwrite_guard)
            .chain(&options.refs)
            .chain(&options.unrefs)
        {
            self.store.check_key(key)?;
        }
        if src.starts_with(dst) || dst.starts_with(src) {
            return Err(ArborError::invalid_argument(format!(
                "cannot move '{src}' to overlapping path '{dst}'"
            )));
        }
        if !self.exists(src) {
            return Ok(MoveOutcome::SourceMissing);
        }

        let dst_address = self.address_of(dst);
        for guard in &options.overwrite_guard {
            let target = self.view(guard).and_then(|v| v.relationship(0));
            if let Some(target) = target.filter(|t| Some(*t) != dst_address) {
                tracing::warn!(
                    src = %src,
                    dst = %dst,
                    guard = %guard,
                    target = %target,
                    "relocation blocked by overwrite guard"
                );
                return Ok(MoveOutcome::Blocked {
                    guard: guard.clone(),
                });
            }
        }

        if dst_address.is_some() {
            self.delete(dst);
            tracing::debug!(dst = %dst, "cleared relocation destination");
        }

        let Some(contents) = self.take_contents(src) else {
            return Ok(MoveOutcome::SourceMissing);
        };
        let old_address = contents.address;
        let new_address = self.install(src, dst, contents, options.keep_expiration)?;

        let mut rewritten = 0;
        for_each_node_mut(&mut self.root, &mut |node| {
            rewritten += node.rewrite_relationships(old_address, new_address);
        });
        tracing::debug!(
            src = %src,
            dst = %dst,
            from = %old_address,
            to = %new_address,
            rewritten,
            "relocated node"
        );

        for key in &options.refs {
            self.write(key, true, |m, slot| match slot.node.current_value_mut() {
                Some(value) => value.set_relationship(0, new_address),
                None => {
                    let timestamp = m.store.clock.tick();
                    let instance = ValueInstance::with_relationships(Bytes::new(), vec![new_address]);
                    slot.node.record(timestamp, instance);
                }
            })?;
        }
        for key in &options.unrefs {
            self.delete(key);
        }

        Ok(MoveOutcome::Moved {
            address: new_address,
            rewritten,
        })
    }

    /// Empties the node at `src` into [`Contents`]; the chain walk then
    /// removes the vacant node and prunes its ancestors.
    fn take_contents(&mut self, src: &StoreKey) -> Option<Contents> {
        self.chain(src, |m, level, segment, key| {
            let node = level.get_mut(segment)?;
            let had = node.has_value();
            let mut descendants = Vec::new();
            if let Some(child) = &node.child {
                describe_subtree(&child.read(), &[], &mut descendants);
            }
            let contents = Contents {
                address: node.address,
                current: node.current.take(),
                history: node.history.take(),
                expiration: std::mem::replace(&mut node.expiration, Timestamp::ZERO),
                metadata: std::mem::take(&mut node.metadata),
                indexes: std::mem::take(&mut node.indexes),
                child: node.child.take(),
                descendants,
            };
            m.value_changed(key, contents.address, had, false);
            Some(contents)
        })
        .flatten()
    }

    /// Creates `dst` from `contents` and re-keys the moved descendants.
    fn install(
        &mut self,
        src: &StoreKey,
        dst: &StoreKey,
        contents: Contents,
        keep_expiration: bool,
    ) -> ArborResult<Address> {
        let Contents {
            current,
            history,
            expiration,
            metadata,
            indexes,
            child,
            descendants,
            ..
        } = contents;
        let new_address = self
            .write(dst, true, |_, slot| {
                let node = slot.node;
                node.current = current;
                node.history = history;
                if keep_expiration {
                    node.expiration = expiration;
                }
                node.metadata = metadata;
                node.indexes = indexes;
                if let Some(child) = &child {
                    child.write().owner = node.address;
                }
                node.child = child;
                node.address
            })?
            .ok_or_else(|| ArborError::internal("relocation destination was not created"))?;

        let mut m = Mutation::new(self.store, None, Timestamp::now());
        for (relative, address, valued) in descendants {
            let old_key = StoreKey::from_segments(src.segments().iter().chain(&relative).cloned());
            let new_key = StoreKey::from_segments(dst.segments().iter().chain(&relative).cloned());
            m.push_registry(RegistryOp::Relocate {
                address,
                key: new_key.clone(),
                level: None,
            });
            if valued {
                m.push_registry(RegistryOp::RemovePath(old_key.clone()));
                m.push_registry(RegistryOp::SetPath(new_key.clone(), address));
            }
            m.push_event(NodeEvent::Removed {
                key: old_key,
                address,
            });
            m.push_event(NodeEvent::Created {
                key: new_key,
                address,
            });
        }
        m.commit();
        self.events.extend(m.into_events());
        Ok(new_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::StoreConfig;

    fn key(text: &str) -> StoreKey {
        StoreKey::parse(text).unwrap()
    }

    fn store() -> Store {
        Store::new(StoreConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_move_transfers_value_and_children() {
        let store = store();
        let src = store.set_value(&key("/staging/1"), "record").unwrap().address;
        let child = store.set_value(&key("/staging/1/name"), "ada").unwrap().address;
        store.set_metadata(&key("/staging/1"), "kind", "user").unwrap();

        let outcome = store
            .move_referenced_key(&key("/staging/1"), &key("/records/1"), &MoveOptions::new())
            .unwrap();
        let MoveOutcome::Moved { address, .. } = outcome else {
            panic!("expected a move, got {outcome:?}");
        };
        assert_ne!(address, src);
        assert!(!store.exists(&key("/staging")));
        assert_eq!(store.get(&key("/records/1")).unwrap().payload, "record");
        assert_eq!(store.metadata_value(&key("/records/1"), "kind").as_deref(), Some("user"));
        assert_eq!(store.address_of(&key("/records/1/name")), Some(child));
        assert_eq!(store.path_of(child), Some(key("/records/1/name")));
        assert_eq!(store.value_address(&key("/records/1/name")), Some(child));
        assert!(store.value_address(&key("/staging/1/name")).is_none());
        assert!(store.path_of(src).is_none());
    }

    #[test]
    fn test_move_rewrites_relationships() {
        let store = store();
        let src = store.set_value(&key("/tmp/x"), "x").unwrap().address;
        store
            .set_instance(&key("/pointer"), ValueInstance::with_relationships("", vec![src, src]))
            .unwrap();
        let outcome = store
            .move_referenced_key(&key("/tmp/x"), &key("/final/x"), &MoveOptions::new())
            .unwrap();
        let MoveOutcome::Moved { address, rewritten } = outcome else {
            panic!("expected a move");
        };
        assert_eq!(rewritten, 2);
        assert_eq!(store.follow(&key("/pointer"), 0), Some(key("/final/x")));
        assert_eq!(store.get(&key("/pointer")).unwrap().relationships, vec![address, address]);
    }

    #[test]
    fn test_move_replaces_destination() {
        let store = store();
        store.set_value(&key("/dst/old-child"), "gone").unwrap();
        store.set_value(&key("/dst"), "old").unwrap();
        store.set_value(&key("/src"), "new").unwrap();
        store
            .move_referenced_key(&key("/src"), &key("/dst"), &MoveOptions::new())
            .unwrap();
        assert_eq!(store.get(&key("/dst")).unwrap().payload, "new");
        assert!(!store.exists(&key("/dst/old-child")));
        assert!(!store.exists(&key("/src")));
    }

    #[test]
    fn test_move_guards_refs_and_unrefs() {
        let store = store();
        store.set_value(&key("/src"), "v").unwrap();
        let other = store.set_value(&key("/other"), "o").unwrap().address;
        store
            .set_instance(&key("/guard"), ValueInstance::with_relationships("", vec![other]))
            .unwrap();
        store.set_value(&key("/stale"), "s").unwrap();

        let options = MoveOptions::new()
            .guard(key("/guard"))
            .reference(key("/ref"))
            .unreference(key("/stale"));
        let blocked = store.move_referenced_key(&key("/src"), &key("/dst"), &options).unwrap();
        assert_eq!(blocked, MoveOutcome::Blocked { guard: key("/guard") });
        assert!(store.exists(&key("/src")));

        store.delete(&key("/guard"));
        let moved = store.move_referenced_key(&key("/src"), &key("/dst"), &options).unwrap();
        assert!(moved.is_moved());
        assert_eq!(store.follow(&key("/ref"), 0), Some(key("/dst")));
        assert!(!store.exists(&key("/stale")));
    }

    #[test]
    fn test_move_missing_and_overlapping() {
        let store = store();
        let missing = store
            .move_referenced_key(&key("/nope"), &key("/dst"), &MoveOptions::new())
            .unwrap();
        assert_eq!(missing, MoveOutcome::SourceMissing);
        store.set_value(&key("/a"), "v").unwrap();
        let err = store
            .move_referenced_key(&key("/a"), &key("/a/b"), &MoveOptions::new())
            .unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_move_expiration_option() {
        let store = store();
        let far = Timestamp::now().add(std::time::Duration::from_secs(3600));
        store.set_value(&key("/e1"), "v").unwrap();
        store.set_expiration(&key("/e1"), far).unwrap();
        store.set_value(&key("/e2"), "v").unwrap();
        store.set_expiration(&key("/e2"), far).unwrap();

        store
            .move_referenced_key(&key("/e1"), &key("/d1"), &MoveOptions::new())
            .unwrap();
        store
            .move_referenced_key(&key("/e2"), &key("/d2"), &MoveOptions::new().keep_expiration(true))
            .unwrap();
        assert_eq!(store.expiration(&key("/d1")), Some(Timestamp::ZERO));
        assert_eq!(store.expiration(&key("/d2")), Some(far));
    }
}
