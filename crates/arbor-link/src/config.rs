//! Auto-link engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a [`LinkEngine`](crate::LinkEngine).
///
/// # Example
///
/// ```rust
/// use arbor_link::LinkConfig;
///
/// let config = LinkConfig::default().with_repair_collisions(false);
/// assert!(!config.repair_collisions);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// After an index entry is removed, look for another record of the same
    /// parent with the same field values and point the entry at it.
    /// Default: true
    pub repair_collisions: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            repair_collisions: true,
        }
    }
}

impl LinkConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables collision repair.
    #[must_use]
    pub fn with_repair_collisions(mut self, enable: bool) -> Self {
        self.repair_collisions = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!(LinkConfig::new().repair_collisions);
    }

    #[test]
    fn test_serde() {
        let config: LinkConfig = serde_json::from_str(r#"{"repair_collisions":false}"#).unwrap();
        assert_eq!(config, LinkConfig::new().with_repair_collisions(false));
    }
}
