//! # arbor-common
//!
//! Common types, errors, and utilities for Arbor.
//!
//! This crate provides the foundational types and abstractions used across
//! all Arbor components. It includes:
//!
//! - **Types**: Node addresses, path segments and store keys, timestamps
//! - **Errors**: Unified error handling with `ArborError`
//! - **Config**: Store configuration
//! - **Constants**: System-wide limits and tuning defaults
//!
//! ## Example
//!
//! ```rust
//! use arbor_common::types::{Address, StoreKey};
//! use arbor_common::error::ArborResult;
//!
//! fn example() -> ArborResult<()> {
//!     let key = StoreKey::parse("records/1/user")?;
//!     assert_eq!(key.len(), 3);
//!     assert_eq!(key.to_string(), "/records/1/user");
//!     assert!(Address::new(1).is_valid());
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::StoreConfig;
pub use constants::*;
pub use error::{ArborError, ArborResult};
pub use types::{Address, MonotonicClock, Segment, StoreKey, Timestamp};
