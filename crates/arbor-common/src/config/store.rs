//! Store configuration structures.
//!
//! These structures define all configurable aspects of an Arbor store.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_KEY_DEPTH, DEFAULT_MAX_SEGMENT_SIZE, DEFAULT_QUIESCE_BACKOFF_MAX_MICROS,
    DEFAULT_QUIESCE_BACKOFF_MICROS,
};

/// Store configuration.
///
/// # Example
///
/// ```rust
/// use arbor_common::config::StoreConfig;
///
/// let config = StoreConfig::default();
/// assert_eq!(config.max_key_depth, 256);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum size of one path segment in bytes.
    /// Default: 16384 (16 KB)
    pub max_segment_size: usize,

    /// Maximum number of segments in a key.
    /// Default: 256
    pub max_key_depth: usize,

    /// First sleep interval while an exclusive section waits for active
    /// level-lock holders to drain. Doubles on every poll.
    /// Default: 10us
    #[serde(with = "humantime_serde")]
    pub quiesce_backoff: Duration,

    /// Upper bound for the quiesce sleep interval.
    /// Default: 1ms
    #[serde(with = "humantime_serde")]
    pub quiesce_backoff_max: Duration,

    /// Yield the thread before restarting an address lookup whose
    /// non-blocking level attempt failed.
    /// Default: true
    pub fast_path_yield: bool,

    /// Physically remove expired nodes when a read runs into them.
    /// When false, expired nodes are only removed by writes through
    /// their path.
    /// Default: true
    pub lazy_eviction: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            max_key_depth: DEFAULT_MAX_KEY_DEPTH,
            quiesce_backoff: Duration::from_micros(DEFAULT_QUIESCE_BACKOFF_MICROS),
            quiesce_backoff_max: Duration::from_micros(DEFAULT_QUIESCE_BACKOFF_MAX_MICROS),
            fast_path_yield: true,
            lazy_eviction: true,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration suited to tests: small limits and a short
    /// quiesce backoff so exclusive sections react quickly.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_segment_size: 1024,
            max_key_depth: 64,
            quiesce_backoff: Duration::from_micros(1),
            quiesce_backoff_max: Duration::from_micros(100),
            ..Default::default()
        }
    }

    /// Sets the maximum segment size.
    #[must_use]
    pub fn with_max_segment_size(mut self, size: usize) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the maximum key depth.
    #[must_use]
    pub fn with_max_key_depth(mut self, depth: usize) -> Self {
        self.max_key_depth = depth;
        self
    }

    /// Sets the quiesce backoff range.
    #[must_use]
    pub fn with_quiesce_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.quiesce_backoff = initial;
        self.quiesce_backoff_max = max;
        self
    }

    /// Enables or disables read-triggered eviction of expired nodes.
    #[must_use]
    pub fn with_lazy_eviction(mut self, enable: bool) -> Self {
        self.lazy_eviction = enable;
        self
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_segment_size == 0 {
            return Err("max_segment_size must be greater than 0".to_string());
        }

        if self.max_key_depth == 0 {
            return Err("max_key_depth must be greater than 0".to_string());
        }

        if self.quiesce_backoff.is_zero() {
            return Err("quiesce_backoff must be greater than 0".to_string());
        }

        if self.quiesce_backoff_max < self.quiesce_backoff {
            return Err("quiesce_backoff_max must be at least quiesce_backoff".to_string());
        }

        Ok(())
    }
}

/// Serde helper for Duration using humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        s.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
