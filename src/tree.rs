//! Tree Module
//!
//! The `BTree` facade: owns the root slot and turns root overflow into a new
//! level and a single-child root partition back into its child.
//!
//! ## Concurrency Model
//!
//! - **Writes** (insert/remove): start by taking `root_lock`, which plays the
//!   parent role for whatever node is currently the root. The lock path is
//!   released as soon as a node on the way down is safe.
//! - **Reads** (get/range/count): never lock. Each node is read through its
//!   published snapshot; leaves chain to their right siblings.

use std::ops::RangeBounds;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::TreeConfig;
use crate::error::{Result, TreeError};
use crate::node::{
    acquire, insert_into, remove_from, DataNode, LockPath, PartitionNode, Removal, Subtree,
};
use crate::page::{is_empty_range, ValueSet};
use crate::scalar::Scalar;

/// Point-in-time shape and size of a tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    /// Levels including the leaf level
    pub height: usize,
    /// Data nodes on the sibling chain
    pub leaves: usize,
    /// Distinct keys
    pub keys: usize,
    /// `(key, value)` pairs
    pub values: usize,
    /// Key and value bytes held by all leaves
    pub bytes: usize,
}

/// Concurrent in-memory B+-tree multimap
pub struct BTree<K, V> {
    /// Current root: a single leaf or a partition level
    root: RwLock<Subtree<K, V>>,

    /// Parent lock of the root node
    root_lock: Arc<Mutex<()>>,

    /// Shared configuration, also held by every node
    config: Arc<TreeConfig>,
}

impl<K: Scalar, V: Scalar> Default for BTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Scalar, V: Scalar> BTree<K, V> {
    /// Create an empty tree with the default configuration
    pub fn new() -> Self {
        Self::from_valid_config(TreeConfig::default())
    }

    /// Create an empty tree, rejecting an invalid configuration
    pub fn with_config(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: TreeConfig) -> Self {
        let config = Arc::new(config);
        let root = Subtree::Leaf(Arc::new(DataNode::new(Arc::clone(&config))));

        Self {
            root: RwLock::new(root),
            root_lock: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Current root subtree
    pub fn root(&self) -> Subtree<K, V> {
        self.root.read().clone()
    }

    fn lock_root(&self) -> Result<LockPath> {
        let mut path = LockPath::new();
        path.push(&self.root_lock, acquire(&self.root_lock, &self.config, "root")?);
        Ok(path)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a pair; returns false if it was already present
    ///
    /// Steps:
    /// 1. Lock the root slot
    /// 2. Descend with lock coupling, releasing ancestors below a safe node
    /// 3. Absorb child splits on the way back up
    /// 4. Grow a new root if the old root split
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        let mut path = self.lock_root()?;
        let root = self.root();

        let (inserted, split) = insert_into(&mut path, &root, key, value)?;

        if let Some(split) = split {
            tracing::debug!(
                "Growing tree to height {} at pivot {:?}",
                root.height() + 1,
                split.pivot
            );
            let grown = PartitionNode::from_split(root, split, Arc::clone(&self.config));
            *self.root.write() = Subtree::Partition(Arc::new(grown));
        }

        Ok(inserted)
    }

    /// Remove every value stored under `key`
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.remove_with(Removal::Key(key))
    }

    /// Remove a single pair; the key goes away with its last value
    pub fn remove_value(&self, key: &K, value: &V) -> Result<bool> {
        self.remove_with(Removal::Value(key, value))
    }

    fn remove_with(&self, removal: Removal<'_, K, V>) -> Result<bool> {
        let mut path = self.lock_root()?;
        let root = self.root();

        let removed = remove_from(&mut path, &root, removal)?;

        if removed && path.holds(&self.root_lock) {
            self.collapse_root();
        }

        Ok(removed)
    }

    /// Replace a root partition that routes to a single child by that child.
    /// Called with the root lock held.
    fn collapse_root(&self) {
        loop {
            let root = self.root();
            let Subtree::Partition(node) = &root else {
                return;
            };

            let page = node.page();
            if page.len() != 1 {
                return;
            }

            tracing::debug!("Collapsing root partition, height {}", root.height() - 1);
            *self.root.write() = page.children()[0].clone();
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn contains_key(&self, key: &K) -> bool {
        self.root().leaf_for(key).contains_key(key)
    }

    /// Values stored under `key` (empty when absent)
    pub fn get(&self, key: &K) -> ValueSet<V> {
        self.root().leaf_for(key).read(key)
    }

    /// All pairs whose key falls in `range`, in key then value order
    pub fn range<R: RangeBounds<K>>(&self, range: R) -> Vec<(K, V)> {
        let (start, end) = (range.start_bound(), range.end_bound());
        if is_empty_range(start, end) {
            return Vec::new();
        }

        self.root().leaf_for_bound(start).read_range(start, end)
    }

    /// Every pair in the tree
    pub fn to_vec(&self) -> Vec<(K, V)> {
        self.range(..)
    }

    /// Number of distinct keys
    pub fn count(&self) -> usize {
        self.leftmost_leaf()
            .chain()
            .map(|snapshot| snapshot.page().len())
            .sum()
    }

    /// Number of `(key, value)` pairs
    pub fn value_count(&self) -> usize {
        self.leftmost_leaf()
            .chain()
            .map(|snapshot| snapshot.page().value_count())
            .sum()
    }

    /// Key and value bytes held by all leaves
    pub fn byte_size(&self) -> usize {
        self.leftmost_leaf()
            .chain()
            .map(|snapshot| snapshot.page().byte_size())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.leftmost_leaf()
            .chain()
            .all(|snapshot| snapshot.page().is_empty())
    }

    /// Levels including the leaf level
    pub fn height(&self) -> usize {
        self.root().height()
    }

    /// Data nodes on the sibling chain
    pub fn leaf_count(&self) -> usize {
        self.leftmost_leaf().chain().count()
    }

    /// Head of the sibling chain
    pub fn leftmost_leaf(&self) -> Arc<DataNode<K, V>> {
        self.root().leftmost_leaf()
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            height: self.height(),
            ..TreeStats::default()
        };

        for snapshot in self.leftmost_leaf().chain() {
            let page = snapshot.page();
            stats.leaves += 1;
            stats.keys += page.len();
            stats.values += page.value_count();
            stats.bytes += page.byte_size();
        }

        stats
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check the whole structure: page invariants, pivot bounds, uniform leaf
    /// depth, and that the sibling chain visits the leaves in tree order.
    ///
    /// Only meaningful while no writer is active.
    pub fn verify(&self) -> Result<()> {
        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        verify_subtree(&self.root(), None, None, 1, &mut leaves, &mut leaf_depth)?;

        let mut chained = self.leftmost_leaf().chain();
        for (position, leaf) in leaves.iter().enumerate() {
            let expected = leaf.snapshot();
            let Some(actual) = chained.next() else {
                return Err(TreeError::Invariant(format!(
                    "sibling chain ends after {} of {} leaves",
                    position,
                    leaves.len()
                )));
            };
            if !Arc::ptr_eq(&expected, &actual) {
                return Err(TreeError::Invariant(format!(
                    "sibling chain diverges from tree order at leaf {}",
                    position
                )));
            }
        }

        if chained.next().is_some() {
            return Err(TreeError::Invariant(
                "sibling chain continues past the last leaf".to_string(),
            ));
        }

        Ok(())
    }
}

/// Recursive structural check of one subtree against its key bounds
/// `[lower, upper)`; collects leaves in order.
fn verify_subtree<K: Scalar, V: Scalar>(
    subtree: &Subtree<K, V>,
    lower: Option<&K>,
    upper: Option<&K>,
    depth: usize,
    leaves: &mut Vec<Arc<DataNode<K, V>>>,
    leaf_depth: &mut Option<usize>,
) -> Result<()> {
    let out_of_bounds = |key: &K| {
        lower.is_some_and(|lower| key < lower) || upper.is_some_and(|upper| key >= upper)
    };

    match subtree {
        Subtree::Leaf(node) => {
            let page = node.page();
            page.check_invariants()?;

            let stray = page
                .entries()
                .iter()
                .map(|entry| entry.key())
                .find(|key| out_of_bounds(*key));
            if let Some(key) = stray {
                return Err(TreeError::Invariant(format!(
                    "leaf key {:?} outside [{:?}, {:?})",
                    key, lower, upper
                )));
            }

            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(TreeError::Invariant(format!(
                        "leaf at depth {} but earlier leaves at depth {}",
                        depth, expected
                    )));
                }
                Some(_) => {}
            }

            leaves.push(Arc::clone(node));
            Ok(())
        }
        Subtree::Partition(node) => {
            let page = node.page();
            page.check_invariants()?;

            if let Some(key) = page.keys().iter().find(|key| out_of_bounds(*key)) {
                return Err(TreeError::Invariant(format!(
                    "pivot {:?} outside [{:?}, {:?})",
                    key, lower, upper
                )));
            }

            let keys = page.keys();
            for (index, child) in page.children().iter().enumerate() {
                let child_lower = if index == 0 { lower } else { Some(&keys[index - 1]) };
                let child_upper = keys.get(index).or(upper);
                verify_subtree(child, child_lower, child_upper, depth + 1, leaves, leaf_depth)?;
            }

            Ok(())
        }
    }
}
