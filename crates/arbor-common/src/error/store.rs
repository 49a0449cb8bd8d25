//! Store error types.
//!
//! Routine absence is never an error in Arbor: lookups return `None` or
//! `false`. These errors describe structurally invalid input and I/O
//! failures.

use std::fmt;
use thiserror::Error;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0104,
    /// Encoding or decoding failed.
    Serialization = 0x0105,

    // Key errors (0x0200 - 0x02FF)
    /// Key text could not be decoded.
    InvalidKey = 0x0200,
    /// Operation needs a non-root key.
    EmptyKey = 0x0201,
    /// A segment exceeds the configured size.
    SegmentTooLarge = 0x0202,
    /// A key has too many segments.
    KeyTooDeep = 0x0203,

    // Index errors (0x0300 - 0x03FF)
    /// Field path could not be parsed.
    InvalidFieldPath = 0x0300,
    /// Index already defined.
    IndexExists = 0x0301,
    /// Index not defined.
    IndexNotFound = 0x0302,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Key",
            0x03 => "Index",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Arbor.
///
/// # Example
///
/// ```rust
/// use arbor_common::error::{ArborError, ArborResult, ErrorCode};
///
/// fn parse(text: &str) -> ArborResult<()> {
///     Err(ArborError::InvalidKey {
///         key: text.to_string(),
///         reason: "dangling escape".to_string(),
///     })
/// }
///
/// assert_eq!(parse("a\\").unwrap_err().code(), ErrorCode::InvalidKey);
/// ```
#[derive(Debug, Error)]
pub enum ArborError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Encoding or decoding failed.
    #[error("serialization error at line {line}: {message}")]
    Serialization {
        /// One-based line of the offending record, 0 when unknown.
        line: usize,
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Key Errors
    // ==========================================================================
    /// Key text could not be decoded.
    #[error("invalid key '{key}': {reason}")]
    InvalidKey {
        /// The offending key text.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The operation needs at least one segment.
    #[error("operation requires a non-root key")]
    EmptyKey,

    /// A segment exceeds the configured size.
    #[error("segment size {size} exceeds maximum {max_size}")]
    SegmentTooLarge {
        /// Actual segment size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// A key has too many segments.
    #[error("key depth {depth} exceeds maximum {max_depth}")]
    KeyTooDeep {
        /// Actual number of segments.
        depth: usize,
        /// Maximum allowed number of segments.
        max_depth: usize,
    },

    // ==========================================================================
    // Index Errors
    // ==========================================================================
    /// Field path could not be parsed.
    #[error("invalid field path '{path}': {reason}")]
    InvalidFieldPath {
        /// The offending field path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An index with the same root is already defined on the parent.
    #[error("index rooted at '{index_root}' already defined on '{parent}'")]
    IndexExists {
        /// Record parent path.
        parent: String,
        /// Index root path.
        index_root: String,
    },

    /// No index with the given root is defined on the parent.
    #[error("no index rooted at '{index_root}' on '{parent}'")]
    IndexNotFound {
        /// Record parent path.
        parent: String,
        /// Index root path.
        index_root: String,
    },
}

impl ArborError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::Serialization { .. } => ErrorCode::Serialization,
            Self::InvalidKey { .. } => ErrorCode::InvalidKey,
            Self::EmptyKey => ErrorCode::EmptyKey,
            Self::SegmentTooLarge { .. } => ErrorCode::SegmentTooLarge,
            Self::KeyTooDeep { .. } => ErrorCode::KeyTooDeep,
            Self::InvalidFieldPath { .. } => ErrorCode::InvalidFieldPath,
            Self::IndexExists { .. } => ErrorCode::IndexExists,
            Self::IndexNotFound { .. } => ErrorCode::IndexNotFound,
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// Lock races never surface as errors, so only I/O failures qualify.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Returns true if the error was caused by caller input rather than
    /// by the store or the environment.
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::InvalidKey { .. }
                | Self::EmptyKey
                | Self::SegmentTooLarge { .. }
                | Self::KeyTooDeep { .. }
                | Self::InvalidFieldPath { .. }
        )
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a serialization error for the given one-based line.
    #[must_use]
    pub fn serialization(line: usize, message: impl Into<String>) -> Self {
        Self::Serialization {
            line,
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    #[must_use]
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
