//! # AtlasTree
//!
//! A concurrent, in-memory B+-tree multimap with:
//! - Immutable, copy-on-write pages (every write publishes a new page)
//! - Byte-budget sized leaves, fan-out sized internal levels
//! - Sibling-chained leaves for range scans across page boundaries
//! - Lock-coupled, time-bounded per-node locking for writers
//! - Lock-free snapshot reads
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BTree facade                          │
//! │               (root slot + root lock, grow/collapse)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    PartitionNode(s)                          │
//! │        (PartitionPage: pivots + child subtrees, Mutex)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐  sibling  ┌─────────────┐
//!   │  DataNode   │ ────────► │  DataNode   │ ──► ...
//!   │ (DataPage)  │           │ (DataPage)  │
//!   └─────────────┘           └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use atlastree::BTree;
//!
//! let tree: BTree<u32, String> = BTree::new();
//! tree.insert(7, "seven".to_string()).unwrap();
//! tree.insert(7, "sieben".to_string()).unwrap();
//!
//! assert_eq!(tree.get(&7).len(), 2);
//! assert_eq!(tree.range(0..10).len(), 2);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod scalar;

pub mod page;
pub mod node;
pub mod tree;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::TreeConfig;
pub use error::{Result, TreeError};
pub use node::{DataNode, PartitionNode, Subtree};
pub use page::{DataPage, PartitionPage, ValueSet};
pub use scalar::{ByteSize, Scalar};
pub use tree::{BTree, TreeStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasTree
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
