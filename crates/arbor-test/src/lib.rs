//! # arbor-test
//!
//! Integration tests for Arbor.
//!
//! This crate contains:
//! - End-to-end scenarios across the index, store and auto-link crates
//! - Relocation atomicity checks under concurrent readers
//! - Concurrency stress workloads
//! - Tree consistency verification

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;

/// Workload generators
pub mod workload;
