//! Error types for AtlasTree
//!
//! Provides a unified error type for all tree, node and page operations.
//!
//! Every fallible operation fails before it publishes anything, so an
//! `Err` never leaves a node holding a half-built page.

use thiserror::Error;

/// Result type alias using TreeError
pub type Result<T> = std::result::Result<T, TreeError>;

/// Unified error type for AtlasTree operations
#[derive(Debug, Error)]
pub enum TreeError {
    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    /// The caller broke an operation's precondition (e.g. splitting a page
    /// with fewer than two entries, merging overlapping key ranges).
    #[error("Precondition violated: {0}")]
    Precondition(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    /// A node lock could not be acquired within the configured timeout.
    ///
    /// Node identity may have changed by the time a caller retries, so a
    /// retry must restart from the top of the tree.
    #[error("Timed out after {timeout_ms} ms waiting for {node} lock")]
    LockTimeout { node: &'static str, timeout_ms: u64 },

    // -------------------------------------------------------------------------
    // Structural Faults
    // -------------------------------------------------------------------------
    /// A leaf subtree was paired with a partition subtree.
    #[error("Subtree type mismatch: {0}")]
    TypeMismatch(String),

    /// A structural invariant does not hold.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TreeError {
    /// Whether retrying the whole operation from the root may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TreeError::LockTimeout { .. })
    }
}
