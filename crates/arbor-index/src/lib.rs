//! # arbor-index
//!
//! Ordered index for Arbor: a generic AVL tree over byte-string keys.
//!
//! One [`OrderedIndex`] holds the children of every node in the key tree,
//! and another one holds each node's value history keyed by big-endian
//! timestamps. Both uses need exact lookup plus floor and ceiling queries.
//!
//! ## Layout
//!
//! ```text
//!   arena slots                     tree
//!   ┌────┬────┬────┬────┐
//!   │ 20 │ 10 │ 30 │free│             20
//!   └────┴────┴────┴────┘            /  \
//!     │ left=1 right=2             10    30
//!     │ parent=None
//! ```
//!
//! Nodes sit in a slot arena and link to each other by `u32` handles. The
//! parent link is a plain handle, so no node owns its parent.
//!
//! ## Example
//!
//! ```rust
//! use arbor_index::OrderedIndex;
//!
//! let mut index = OrderedIndex::new();
//! for key in ["30", "20", "10"] {
//!     index.insert(key, ());
//! }
//! assert_eq!(index.validate(), Ok(2));
//! let keys: Vec<_> = index.keys().map(|k| k.to_vec()).collect();
//! assert_eq!(keys, vec![b"10".to_vec(), b"20".to_vec(), b"30".to_vec()]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod arena;
mod iter;
mod tree;

pub use iter::{Iter, Keys, RevIter, Values};
pub use tree::OrderedIndex;
