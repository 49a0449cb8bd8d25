//! # arbor-store
//!
//! Concurrent hierarchical key-value store for Arbor.
//!
//! Keys are slash-delimited paths of raw byte segments forming a tree.
//! Every node may hold a versioned value, children, metadata, an
//! expiration and relationships to other nodes by permanent address.
//!
//! This crate provides:
//! - Per-level reader-writer locking with lock coupling
//! - Time-ordered value history with point-in-time reads
//! - Lazy expiration
//! - Whole-store exclusive sections, atomic relocation and snapshots
//! - Node events for observers such as the auto-link engine
//!
//! ## Architecture
//!
//! ```text
//!           ┌───────────────────────── Store ─────────────────────────┐
//!           │                                                         │
//!  path ──▶ │  root level ─▶ level ─▶ level      registry             │
//!           │  (RwLock)     (RwLock)  (RwLock)   address ─▶ location  │
//!           │                                    path    ─▶ address   │
//!           │                                                         │
//!  addr ──▶ │  registry ─▶ try-lock level (fast path)                  │
//!           └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use arbor_store::{Store, ValueInstance};
//! use arbor_common::types::StoreKey;
//!
//! let store = Store::default();
//! let user = StoreKey::parse("/users/1").unwrap();
//! let order = StoreKey::parse("/orders/9").unwrap();
//!
//! let written = store.set_value(&user, "ada").unwrap();
//! store
//!     .set_instance(&order, ValueInstance::with_relationships("order", vec![written.address]))
//!     .unwrap();
//!
//! assert_eq!(store.follow(&order, 0), Some(user));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod exclusive;
mod latch;
mod level;
mod node;
mod observer;
mod ops;
mod persist;
mod registry;
mod relocate;
mod schema;
mod stats;
mod store;
mod view;

pub use exclusive::ExclusiveSection;
pub use node::ValueInstance;
pub use observer::{NodeEvent, NodeObserver};
pub use persist::NodeRecord;
pub use relocate::{MoveOptions, MoveOutcome};
pub use schema::{FieldPath, FieldSegment, IndexDefinition};
pub use stats::StoreStats;
pub use store::Store;
pub use view::{AsOf, Lookup, NodeView, Relationship, WriteOutcome};
