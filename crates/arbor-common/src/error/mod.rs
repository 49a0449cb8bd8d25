//! Error handling for Arbor.
//!
//! This module provides a unified error type and result alias used
//! across all Arbor components.

mod store;

pub use store::{ArborError, ErrorCode};

/// Result type alias for Arbor operations.
pub type ArborResult<T> = std::result::Result<T, ArborError>;
