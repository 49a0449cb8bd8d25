//! Type definitions for Arbor.
//!
//! This module contains all core type definitions used across the store.

mod ids;
mod keys;
mod timestamps;

pub use ids::Address;
pub use keys::{Segment, StoreKey};
pub use timestamps::{MonotonicClock, Timestamp};
