//! Partition Node
//!
//! An internal tree level. Routes writes to the selected child and absorbs
//! the child's structural changes into a new partition page:
//!
//! - child overflowed  → split it, splice both halves in (`insert_split_pages`)
//! - child emptied or underflowed → fold it into a neighbor (`remove_subtree`)
//!
//! Overflow of this node is handled by whoever holds its parent's lock: the
//! parent partition, or the tree when this node is the root.

use std::fmt;
use std::ops::Bound;
use std::ptr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::TreeConfig;
use crate::error::{Result, TreeError};
use crate::page::{is_empty_range, PartitionPage, ValueSet};
use crate::scalar::Scalar;

use super::{
    acquire, insert_into, remove_from, DataNode, LockPath, NodeGuard, Removal, Split, Subtree,
};

/// Internal node: a lockable, swappable partition page
pub struct PartitionNode<K, V> {
    /// Current routing page
    state: RwLock<PartitionPage<K, V>>,

    /// Serializes writers
    lock: Arc<Mutex<()>>,

    /// Shared tree configuration (fan-out, lock timeout)
    config: Arc<TreeConfig>,
}

impl<K: Scalar, V: Scalar> fmt::Debug for PartitionNode<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let page = self.page();
        f.debug_struct("PartitionNode")
            .field("keys", &page.keys())
            .field("children", &page.len())
            .finish()
    }
}

impl<K: Scalar, V: Scalar> PartitionNode<K, V> {
    pub fn new(page: PartitionPage<K, V>, config: Arc<TreeConfig>) -> Self {
        Self {
            state: RwLock::new(page),
            lock: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// A new level above `left` and the right half split off from it
    pub(crate) fn from_split(
        left: Subtree<K, V>,
        split: Split<K, V>,
        config: Arc<TreeConfig>,
    ) -> Self {
        Self::new(
            PartitionPage::from_split(left, split.pivot, split.right),
            config,
        )
    }

    // =========================================================================
    // Lock-free Reads
    // =========================================================================

    /// Current published page
    pub fn page(&self) -> PartitionPage<K, V> {
        self.state.read().clone()
    }

    /// Number of child subtrees
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// Fan-out this node splits beyond
    pub fn max_entries(&self) -> usize {
        self.config.partition_max_entries
    }

    /// Child count below which this node underflows
    pub fn min_entries(&self) -> usize {
        self.config.partition_max_entries / 2
    }

    /// One more child split would overflow this node
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_entries()
    }

    pub fn is_overflow(&self) -> bool {
        self.len() > self.max_entries()
    }

    pub fn is_underflow(&self) -> bool {
        self.len() < self.min_entries()
    }

    /// The child whose key range holds `key`
    pub fn select_subtree(&self, key: &K) -> Subtree<K, V> {
        self.page().subtree_for(key).clone()
    }

    /// The leaf whose key range holds `key`
    pub fn leaf_for(&self, key: &K) -> Arc<DataNode<K, V>> {
        self.page().leaf_for(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.leaf_for(key).contains_key(key)
    }

    pub fn read(&self, key: &K) -> ValueSet<V> {
        self.leaf_for(key).read(key)
    }

    /// All pairs within the bounds, found by descending to the first leaf
    /// and walking the sibling chain from there.
    pub fn read_range(&self, start: Bound<&K>, end: Bound<&K>) -> Vec<(K, V)> {
        if is_empty_range(start, end) {
            return Vec::new();
        }

        let page = self.page();
        let first = match start {
            Bound::Included(key) | Bound::Excluded(key) => page.leaf_for(key),
            Bound::Unbounded => page.children()[0].leftmost_leaf(),
        };
        first.read_range(start, end)
    }

    // =========================================================================
    // Locked Writes
    // =========================================================================

    /// Acquire this node's write lock
    pub(crate) fn lock(&self) -> Result<NodeGuard> {
        acquire(&self.lock, &self.config, "partition node")
    }

    pub(crate) fn lock_handle(&self) -> &Arc<Mutex<()>> {
        &self.lock
    }

    fn publish(&self, page: PartitionPage<K, V>) {
        *self.state.write() = page;
    }

    /// Insert a pair below this node.
    ///
    /// A child split is absorbed here; if that overflows this node, it stays
    /// overflowed until the caller splits it.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        let mut path = LockPath::new();
        path.push(&self.lock, self.lock()?);
        self.insert_locked(&mut path, key, value)
    }

    /// Insert with this node's lock held as the last entry of `path`
    pub(crate) fn insert_locked(&self, path: &mut LockPath, key: K, value: V) -> Result<bool> {
        let page = self.page();
        let index = page.select_subtree(&key);
        let child = page.children()[index].clone();

        let (inserted, split) = insert_into(path, &child, key, value)?;

        if let Some(split) = split {
            tracing::debug!(
                "Absorbing split of {} child {} at pivot {:?}",
                child.kind(),
                index,
                split.pivot
            );
            let next = self
                .page()
                .insert_split_pages(index, child, split.right, split.pivot)?;
            self.publish(next);
        }

        Ok(inserted)
    }

    /// Remove every value under `key` below this node
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.remove_with(Removal::Key(key))
    }

    /// Remove a single pair below this node
    pub fn remove_value(&self, key: &K, value: &V) -> Result<bool> {
        self.remove_with(Removal::Value(key, value))
    }

    fn remove_with(&self, removal: Removal<'_, K, V>) -> Result<bool> {
        let mut path = LockPath::new();
        path.push(&self.lock, self.lock()?);
        self.remove_locked(&mut path, removal)
    }

    /// Remove with this node's lock held as the last entry of `path`
    pub(crate) fn remove_locked(
        &self,
        path: &mut LockPath,
        removal: Removal<'_, K, V>,
    ) -> Result<bool> {
        let page = self.page();
        let index = page.select_subtree(removal.key());
        let child = page.children()[index].clone();

        let removed = remove_from(path, &child, removal)?;

        // The removal is already published: a merge that cannot get its
        // locks in time leaves the child underflowed for a later removal
        if removed && path.holds(&self.lock) {
            if let Err(err) = self.rebalance(index) {
                if !err.is_retryable() {
                    return Err(err);
                }
                tracing::warn!("Deferring merge of child {}: {}", index, err);
            }
        }

        Ok(removed)
    }

    /// Fold an empty or underflowing child into a neighbor.
    ///
    /// The left node of a pair always absorbs the right one, so the absorbed
    /// node's only predecessor in the sibling chain is the node taking over
    /// its link. Of the two possible pairs, the one whose neighbor weighs
    /// less is tried first; a pair is skipped when the merged node would
    /// overflow, unless the child is empty.
    fn rebalance(&self, index: usize) -> Result<()> {
        let page = self.page();
        let children = page.children();
        if children.len() < 2 {
            return Ok(());
        }

        let child = &children[index];
        let empty = child.is_empty();
        if !empty && !child.is_underflow() {
            return Ok(());
        }

        let mut pairs = Vec::with_capacity(2);
        if index > 0 {
            pairs.push((index - 1, index, children[index - 1].weight()));
        }
        if index + 1 < children.len() {
            pairs.push((index, index + 1, children[index + 1].weight()));
        }
        pairs.sort_by_key(|&(_, _, neighbor_weight)| neighbor_weight);

        let Some((left, right, _)) = pairs
            .into_iter()
            .find(|&(left, right, _)| empty || children[left].fits_with(&children[right]))
        else {
            tracing::trace!("Child {} underflows but no neighbor has room", index);
            return Ok(());
        };

        let next = page.remove_subtree(right)?;
        tracing::debug!(
            "Merging {} children {} and {} (child {} {})",
            child.kind(),
            left,
            right,
            index,
            if empty { "empty" } else { "underflowed" }
        );
        children[left].absorb(&page.keys()[left], &children[right])?;
        self.publish(next);

        Ok(())
    }

    /// Split this node in two; returns the promoted pivot and the new right node
    pub fn split(&self) -> Result<(K, Arc<PartitionNode<K, V>>)> {
        let _guard = self.lock()?;
        let (left, pivot, right) = self.page().split()?;

        tracing::debug!(
            "Split partition node at {:?} ({} + {} children)",
            pivot,
            left.len(),
            right.len()
        );

        let right = Arc::new(Self::new(right, Arc::clone(&self.config)));
        self.publish(left);

        Ok((pivot, right))
    }

    /// Merge an adjacent partition into this one, in either order; `other`
    /// is left untouched. `separator` is the parent's pivot between them.
    pub fn merge(&self, separator: K, other: &PartitionNode<K, V>) -> Result<()> {
        self.merge_with(other, |page, other_page| page.merge(separator, other_page))
    }

    /// Absorb `right`, the partition its parent routes to immediately after
    /// this one
    pub(crate) fn absorb_right(&self, separator: K, right: &PartitionNode<K, V>) -> Result<()> {
        self.merge_with(right, |page, right_page| page.merge_right(separator, right_page))
    }

    fn merge_with<F>(&self, other: &PartitionNode<K, V>, union: F) -> Result<()>
    where
        F: FnOnce(&PartitionPage<K, V>, &PartitionPage<K, V>) -> Result<PartitionPage<K, V>>,
    {
        if ptr::eq(self, other) {
            return Err(TreeError::Precondition(
                "a partition node cannot absorb itself".to_string(),
            ));
        }

        let _guard = self.lock()?;
        let _other_guard = other.lock()?;
        let next = union(&self.page(), &other.page())?;

        tracing::debug!("Merged partition nodes into {} children", next.len());
        self.publish(next);

        Ok(())
    }
}
