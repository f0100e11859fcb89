//! Node Module
//!
//! Mutable, lockable holders of immutable pages.
//!
//! ## Responsibilities
//! - Publish new page versions atomically (readers never lock)
//! - Serialize writers per node with a time-bounded lock
//! - Propagate child splits and merges into the parent partition
//!
//! ## Locking Protocol
//! Writers lock top-down and keep a [`LockPath`] of the guards they still
//! hold. A child is locked while its parent is held; once the child is known
//! to absorb the write without changing shape ("safe"), every ancestor guard
//! is released:
//!
//! ```text
//!   root lock ──► P0 (full, kept) ──► P1 (not full: release root, P0) ──► leaf
//! ```
//!
//! Nodes on the same level are only locked together while their common
//! parent is held, always left before right. Together with the top-down
//! order this keeps the protocol free of lock cycles; the lock timeout bounds
//! every wait regardless.

mod data;
mod partition;

use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::config::TreeConfig;
use crate::error::{Result, TreeError};
use crate::page::DataPage;
use crate::scalar::Scalar;

pub use data::{DataNode, DataNodeGuard, NodeSnapshot, SiblingChain};
pub use partition::PartitionNode;

// =============================================================================
// Lock Helpers
// =============================================================================

/// An owned guard on a node's write lock
pub(crate) type NodeGuard = ArcMutexGuard<RawMutex, ()>;

/// Acquire a node lock, giving up after the configured timeout
pub(crate) fn acquire(
    lock: &Arc<Mutex<()>>,
    config: &TreeConfig,
    node: &'static str,
) -> Result<NodeGuard> {
    lock.try_lock_arc_for(config.lock_timeout()).ok_or_else(|| {
        tracing::warn!(
            "Timed out after {} ms waiting for {} lock",
            config.lock_timeout_ms,
            node
        );
        TreeError::LockTimeout {
            node,
            timeout_ms: config.lock_timeout_ms,
        }
    })
}

/// Locks a writer still holds on its way down, root first
#[derive(Default)]
pub(crate) struct LockPath {
    held: Vec<(Arc<Mutex<()>>, NodeGuard)>,
}

impl LockPath {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, lock: &Arc<Mutex<()>>, guard: NodeGuard) {
        self.held.push((Arc::clone(lock), guard));
    }

    /// Release one lock if it is still held
    pub(crate) fn release(&mut self, lock: &Arc<Mutex<()>>) {
        self.held.retain(|(held, _)| !Arc::ptr_eq(held, lock));
    }

    /// Release every ancestor: the node below will not change shape
    pub(crate) fn release_all(&mut self) {
        if !self.held.is_empty() {
            tracing::trace!("Releasing {} ancestor locks early", self.held.len());
            self.held.clear();
        }
    }

    pub(crate) fn holds(&self, lock: &Arc<Mutex<()>>) -> bool {
        self.held.iter().any(|(held, _)| Arc::ptr_eq(held, lock))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

// =============================================================================
// Subtree
// =============================================================================

/// A child slot of a partition: a leaf or another partition level
pub enum Subtree<K, V> {
    Leaf(Arc<DataNode<K, V>>),
    Partition(Arc<PartitionNode<K, V>>),
}

impl<K, V> Clone for Subtree<K, V> {
    fn clone(&self) -> Self {
        match self {
            Subtree::Leaf(node) => Subtree::Leaf(Arc::clone(node)),
            Subtree::Partition(node) => Subtree::Partition(Arc::clone(node)),
        }
    }
}

impl<K: Scalar, V: Scalar> fmt::Debug for Subtree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subtree::Leaf(node) => write!(f, "Leaf({} entries)", node.len()),
            Subtree::Partition(node) => write!(f, "Partition({} children)", node.len()),
        }
    }
}

impl<K: Scalar, V: Scalar> Subtree<K, V> {
    pub fn kind(&self) -> &'static str {
        match self {
            Subtree::Leaf(_) => "leaf",
            Subtree::Partition(_) => "partition",
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Subtree::Leaf(_))
    }

    /// Entries held at this node: keys for a leaf, children for a partition
    pub fn len(&self) -> usize {
        match self {
            Subtree::Leaf(node) => node.len(),
            Subtree::Partition(node) => node.len(),
        }
    }

    /// Only a leaf can be empty; a partition always routes somewhere
    pub fn is_empty(&self) -> bool {
        match self {
            Subtree::Leaf(node) => node.is_empty(),
            Subtree::Partition(_) => false,
        }
    }

    pub fn is_overflow(&self) -> bool {
        match self {
            Subtree::Leaf(node) => node.is_overflow(),
            Subtree::Partition(node) => node.is_overflow(),
        }
    }

    pub fn is_underflow(&self) -> bool {
        match self {
            Subtree::Leaf(node) => node.is_underflow(),
            Subtree::Partition(node) => node.is_underflow(),
        }
    }

    /// How much a merge with this node has to move, in its own capacity metric
    pub fn weight(&self) -> usize {
        match self {
            Subtree::Leaf(node) => node.byte_size(),
            Subtree::Partition(node) => node.len(),
        }
    }

    /// Same node behind both handles
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Subtree::Leaf(a), Subtree::Leaf(b)) => Arc::ptr_eq(a, b),
            (Subtree::Partition(a), Subtree::Partition(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    // =========================================================================
    // Descent (lock-free)
    // =========================================================================

    /// The leaf whose key range holds `key`
    pub fn leaf_for(&self, key: &K) -> Arc<DataNode<K, V>> {
        let mut current = self.clone();
        loop {
            match current {
                Subtree::Leaf(node) => return node,
                Subtree::Partition(node) => current = node.page().subtree_for(key).clone(),
            }
        }
    }

    /// The leaf a range scan starting at `bound` begins with
    pub fn leaf_for_bound(&self, bound: Bound<&K>) -> Arc<DataNode<K, V>> {
        match bound {
            Bound::Included(key) | Bound::Excluded(key) => self.leaf_for(key),
            Bound::Unbounded => self.leftmost_leaf(),
        }
    }

    /// Head of the sibling chain below this subtree
    pub fn leftmost_leaf(&self) -> Arc<DataNode<K, V>> {
        let mut current = self.clone();
        loop {
            match current {
                Subtree::Leaf(node) => return node,
                Subtree::Partition(node) => current = node.page().children()[0].clone(),
            }
        }
    }

    /// Number of levels from this node down to the leaves, inclusive
    pub fn height(&self) -> usize {
        let mut levels = 1;
        let mut current = self.clone();
        while let Subtree::Partition(node) = current {
            levels += 1;
            current = node.page().children()[0].clone();
        }
        levels
    }

    // =========================================================================
    // Structural Changes
    // =========================================================================

    /// Whether absorbing `right` into this node keeps it within capacity
    pub fn fits_with(&self, right: &Self) -> bool {
        match (self, right) {
            (Subtree::Leaf(left), Subtree::Leaf(right)) => {
                left.byte_size() + right.byte_size() < left.max_bytes()
            }
            (Subtree::Partition(left), Subtree::Partition(right)) => {
                left.len() + right.len() <= left.max_entries()
            }
            _ => false,
        }
    }

    /// Absorb the neighbor immediately to the right of this node
    pub fn absorb(&self, separator: &K, right: &Self) -> Result<()> {
        match (self, right) {
            (Subtree::Leaf(left), Subtree::Leaf(right)) => left.merge(right),
            (Subtree::Partition(left), Subtree::Partition(right)) => {
                left.absorb_right(separator.clone(), right)
            }
            _ => Err(TreeError::TypeMismatch(format!(
                "cannot merge a {} subtree with a {} subtree",
                self.kind(),
                right.kind()
            ))),
        }
    }
}

// =============================================================================
// Write Propagation
// =============================================================================

/// Right half of a child split, to be spliced into the parent
pub(crate) struct Split<K, V> {
    pub(crate) pivot: K,
    pub(crate) right: Subtree<K, V>,
}

/// A removal request routed down the tree
pub(crate) enum Removal<'a, K, V> {
    Key(&'a K),
    Value(&'a K, &'a V),
}

impl<'a, K: Scalar, V: Scalar> Removal<'a, K, V> {
    pub(crate) fn key(&self) -> &'a K {
        match *self {
            Removal::Key(key) | Removal::Value(key, _) => key,
        }
    }

    /// The page after the removal, or `None` if nothing matched
    pub(crate) fn apply(&self, page: &DataPage<K, V>) -> Option<DataPage<K, V>> {
        match self {
            Removal::Key(key) => page.try_remove(key),
            Removal::Value(key, value) => page.try_remove_value(key, value),
        }
    }
}

/// Insert into `child` while `path` holds its parent's lock.
///
/// Returns whether the pair was new, and the split-off right half when the
/// child overflowed. A split is only ever returned with the parent still
/// locked: an overflowing child was unsafe, so nothing released the path.
pub(crate) fn insert_into<K: Scalar, V: Scalar>(
    path: &mut LockPath,
    child: &Subtree<K, V>,
    key: K,
    value: V,
) -> Result<(bool, Option<Split<K, V>>)> {
    match child {
        Subtree::Leaf(leaf) => {
            let guard = leaf.lock()?;

            if !guard.would_overflow(&key, &value) {
                path.release_all();
                return Ok((guard.insert(key, value), None));
            }

            let inserted = guard.insert(key, value);
            if !guard.is_overflow() || guard.len() < 2 {
                return Ok((inserted, None));
            }

            let (pivot, right) = guard.split()?;
            Ok((
                inserted,
                Some(Split {
                    pivot,
                    right: Subtree::Leaf(right),
                }),
            ))
        }
        Subtree::Partition(node) => {
            let guard = node.lock()?;
            if !node.is_full() {
                path.release_all();
            }
            path.push(node.lock_handle(), guard);

            let inserted = node.insert_locked(path, key, value)?;
            path.release(node.lock_handle());

            if path.is_empty() || !node.is_overflow() {
                return Ok((inserted, None));
            }

            let (pivot, right) = node.split()?;
            Ok((
                inserted,
                Some(Split {
                    pivot,
                    right: Subtree::Partition(right),
                }),
            ))
        }
    }
}

/// Remove from `child` while `path` holds its parent's lock.
///
/// If the parent's lock is still held afterwards, the child may have become
/// empty or underflowed and the caller is expected to rebalance it.
pub(crate) fn remove_from<K: Scalar, V: Scalar>(
    path: &mut LockPath,
    child: &Subtree<K, V>,
    removal: Removal<'_, K, V>,
) -> Result<bool> {
    match child {
        Subtree::Leaf(leaf) => {
            let guard = leaf.lock()?;
            let Some(next) = removal.apply(&guard.page()) else {
                return Ok(false);
            };

            if !next.is_empty() && !leaf.underflows_at(next.byte_size()) {
                path.release_all();
            }
            guard.publish_page(next);
            Ok(true)
        }
        Subtree::Partition(node) => {
            let guard = node.lock()?;
            if node.len() > node.min_entries() {
                path.release_all();
            }
            path.push(node.lock_handle(), guard);

            let removed = node.remove_locked(path, removal)?;
            path.release(node.lock_handle());
            Ok(removed)
        }
    }
}
