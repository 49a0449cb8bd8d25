//! Arbor Performance Benchmarks
//!
//! This crate contains benchmarks for the Arbor components:
//! - Ordered index (AVL tree) inserts, lookups and floor/ceiling queries
//! - Store writes, reads, address lookups and deletes
//! - Auto-link maintenance on record writes
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench -p arbor-bench
//! ```

pub mod utils;
