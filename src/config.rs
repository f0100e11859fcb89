//! Configuration for AtlasTree
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};

/// Smallest partition fan-out that still leaves room for an underflow band
pub const MIN_PARTITION_ENTRIES: usize = 4;

/// Main configuration for a tree instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    // -------------------------------------------------------------------------
    // Leaf Configuration
    // -------------------------------------------------------------------------
    /// Byte budget of a data node. A leaf overflows once its page holds this
    /// many bytes of keys and values, and underflows below half of it.
    pub data_node_max_bytes: usize,

    // -------------------------------------------------------------------------
    // Partition Configuration
    // -------------------------------------------------------------------------
    /// Maximum number of child subtrees per partition node. Internal levels
    /// are bounded by fan-out, not by payload weight.
    pub partition_max_entries: usize,

    // -------------------------------------------------------------------------
    // Locking Configuration
    // -------------------------------------------------------------------------
    /// How long a writer waits for a node lock before giving up (milliseconds)
    pub lock_timeout_ms: u64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            data_node_max_bytes: 4 * 1024, // 4 KB
            partition_max_entries: 64,
            lock_timeout_ms: 1000,
        }
    }
}

impl TreeConfig {
    /// Create a new config builder
    pub fn builder() -> TreeConfigBuilder {
        TreeConfigBuilder::default()
    }

    /// Lock acquisition timeout as a `Duration`
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Reject settings the split/merge thresholds cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.data_node_max_bytes == 0 {
            return Err(TreeError::Config(
                "data_node_max_bytes must be greater than zero".to_string(),
            ));
        }

        if self.partition_max_entries < MIN_PARTITION_ENTRIES {
            return Err(TreeError::Config(format!(
                "partition_max_entries must be at least {}, got {}",
                MIN_PARTITION_ENTRIES, self.partition_max_entries
            )));
        }

        if self.lock_timeout_ms == 0 {
            return Err(TreeError::Config(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for TreeConfig
#[derive(Default)]
pub struct TreeConfigBuilder {
    config: TreeConfig,
}

impl TreeConfigBuilder {
    /// Set the data node byte budget
    pub fn data_node_max_bytes(mut self, bytes: usize) -> Self {
        self.config.data_node_max_bytes = bytes;
        self
    }

    /// Set the partition fan-out
    pub fn partition_max_entries(mut self, entries: usize) -> Self {
        self.config.partition_max_entries = entries;
        self
    }

    /// Set the lock timeout (in milliseconds)
    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    pub fn build(self) -> TreeConfig {
        self.config
    }
}
