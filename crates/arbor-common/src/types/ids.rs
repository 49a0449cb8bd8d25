//! Node address type for Arbor.
//!
//! Every node in the key tree carries a permanent address. Addresses are
//! handed out in increasing order and never reused, so a stale reference
//! can always be told apart from a live one.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::FIRST_NODE_ADDRESS;

/// Node address - permanently identifies a node in the key tree.
///
/// Address 0 ([`Address::NONE`]) is never assigned to a node; it names the
/// owner of the root level and marks an empty relationship slot.
///
/// # Example
///
/// ```rust
/// use arbor_common::types::Address;
///
/// let addr = Address::new(42);
/// assert_eq!(addr.as_u64(), 42);
/// assert!(addr.is_valid());
/// assert!(!Address::NONE.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Address(u64);

impl Address {
    /// Sentinel address, never assigned to a node.
    pub const NONE: Self = Self(0);

    /// Owner address recorded on the root level.
    pub const ROOT_OWNER: Self = Self(0);

    /// First address assigned to a node.
    pub const FIRST: Self = Self(FIRST_NODE_ADDRESS);

    /// Creates a new `Address` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next address.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this address can name a node.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::NONE.0
    }

    /// Creates an address from bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Converts to bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            write!(f, "Address(NONE)")
        } else {
            write!(f, "Address({})", self.0)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u64> for Address {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<Address> for u64 {
    #[inline]
    fn from(addr: Address) -> Self {
        addr.0
    }
}
