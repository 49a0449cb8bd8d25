//! System-wide constants for Arbor.
//!
//! This module defines limits and tuning defaults used across the store.

// =============================================================================
// Key Limits
// =============================================================================

/// Path delimiter between segments in the textual key form.
pub const PATH_DELIMITER: u8 = b'/';

/// Escape character used by the path codec.
pub const ESCAPE_CHAR: u8 = b'\\';

/// Default maximum size of a single path segment in bytes (16 KB).
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 16 * 1024;

/// Default maximum number of segments in a key.
pub const DEFAULT_MAX_KEY_DEPTH: usize = 256;

/// Segment token that matches any child in an index field path.
pub const WILDCARD_SEGMENT: &str = "*";

// =============================================================================
// Address Constants
// =============================================================================

/// First address handed out to a node. Address 0 is reserved for the
/// owner of the root level.
pub const FIRST_NODE_ADDRESS: u64 = 1;

// =============================================================================
// Exclusive Section Tuning
// =============================================================================

/// Initial sleep between polls while waiting for the store to quiesce.
pub const DEFAULT_QUIESCE_BACKOFF_MICROS: u64 = 10;

/// Upper bound for the quiesce backoff.
pub const DEFAULT_QUIESCE_BACKOFF_MAX_MICROS: u64 = 1_000;

// =============================================================================
// Snapshot Format
// =============================================================================

/// Magic string written in the snapshot header line.
pub const SNAPSHOT_MAGIC: &str = "ARBOR-SNAPSHOT";

/// Version number of the snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;
