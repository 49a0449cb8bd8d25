//! # arbor-link
//!
//! Reactive secondary indexes ("auto-links") for Arbor stores.
//!
//! Records are the nodes directly under a parent that carries index
//! definitions. For every definition the engine keeps one entry per
//! combination of the record's field values, at
//! `index_root/value_1/value_2/...`, whose value links (relationship slot 0)
//! to the record's permanent address.
//!
//! This crate provides:
//! - Field value enumeration with `*` wildcards and the record-id field
//! - [`LinkEngine`], a [`NodeObserver`](arbor_store::NodeObserver) that keeps
//!   entries in step with node events
//! - Index definition, removal, backfill and rebuild
//! - Maintenance inside exclusive sections, so relocations publish their
//!   index changes atomically
//!
//! ## Example
//!
//! ```rust
//! use arbor_common::types::StoreKey;
//! use arbor_link::{LinkConfig, LinkEngine};
//! use arbor_store::{IndexDefinition, Store};
//!
//! let store = Store::default();
//! let engine = LinkEngine::attach(&store, LinkConfig::default());
//! let people = StoreKey::parse("/people").unwrap();
//! let by_city = IndexDefinition::parse("/people-by-city", &["address/*/city"]).unwrap();
//! engine.define_index(&store, &people, by_city).unwrap();
//!
//! store
//!     .set_value(&StoreKey::parse("/people/ada/address/home/city/london").unwrap(), "")
//!     .unwrap();
//! assert!(store.exists(&StoreKey::parse("/people-by-city/london").unwrap()));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod config;
mod engine;
pub mod fields;

pub use config::LinkConfig;
pub use engine::{LinkEngine, LinkStats};
