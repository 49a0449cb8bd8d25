//! Configuration for Arbor.
//!
//! This module provides configuration structures for the store.

mod store;

pub use store::StoreConfig;
