//! Partition Page
//!
//! Immutable routing page of an internal tree level: `N` pivot keys and
//! `N + 1` child subtrees. Pivot `i` is the smallest key child `i + 1` may
//! hold, so every key in child `i` is strictly below it.
//!
//! ```text
//!            keys:   [ 20 | 40 ]
//!   children: [ <20 ] [ 20..40 ] [ >=40 ]
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TreeError};
use crate::node::{DataNode, Subtree};
use crate::scalar::Scalar;

use super::index_of_by;

/// Position of a page's keys relative to a merge separator
enum Side {
    Below,
    Above,
    Unknown,
}

/// Immutable pivot keys and child handles of one internal node
pub struct PartitionPage<K, V> {
    /// Pivot keys, strictly increasing
    keys: Arc<[K]>,

    /// Child subtrees, always `keys.len() + 1` of them
    children: Arc<[Subtree<K, V>]>,
}

impl<K, V> Clone for PartitionPage<K, V> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
            children: Arc::clone(&self.children),
        }
    }
}

impl<K: Scalar, V: Scalar> fmt::Debug for PartitionPage<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionPage")
            .field("keys", &self.keys)
            .field("children", &self.children)
            .finish()
    }
}

impl<K: Scalar, V: Scalar> PartitionPage<K, V> {
    /// A page routing every key to a single child
    pub fn new(child: Subtree<K, V>) -> Self {
        Self {
            keys: Arc::from(Vec::new()),
            children: Arc::from(vec![child]),
        }
    }

    /// A two-child page, as created when a split grows the tree by one level
    pub fn from_split(left: Subtree<K, V>, pivot: K, right: Subtree<K, V>) -> Self {
        Self {
            keys: Arc::from(vec![pivot]),
            children: Arc::from(vec![left, right]),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of child subtrees (the partition's entry count)
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// A partition page always routes to at least one child
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn children(&self) -> &[Subtree<K, V>] {
        &self.children
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Pivot index of `key`, or the complement of its insertion point
    pub fn index_of(&self, key: &K) -> isize {
        index_of_by(&self.keys, |pivot| pivot.cmp(key))
    }

    /// Index of the child whose key range holds `key`.
    /// A key equal to a pivot belongs to the child right of that pivot.
    pub fn select_subtree(&self, key: &K) -> usize {
        match self.index_of(key) {
            found if found >= 0 => found as usize + 1,
            missing => !missing as usize,
        }
    }

    /// The child whose key range holds `key`
    pub fn subtree_for(&self, key: &K) -> &Subtree<K, V> {
        &self.children[self.select_subtree(key)]
    }

    /// Descend through this page to the leaf responsible for `key`
    pub fn leaf_for(&self, key: &K) -> Arc<DataNode<K, V>> {
        self.subtree_for(key).leaf_for(key)
    }

    // =========================================================================
    // Split / Merge
    // =========================================================================

    /// Split at the midpoint pivot. Returns `(left, promoted pivot, right)`;
    /// the promoted pivot moves up a level and is kept by neither half.
    pub fn split(&self) -> Result<(Self, K, Self)> {
        if self.children.len() < 2 {
            return Err(TreeError::Precondition(format!(
                "cannot split a partition page with {} children",
                self.children.len()
            )));
        }

        let mid = self.keys.len() >> 1;
        let pivot = self.keys[mid].clone();

        let left = Self {
            keys: self.keys[..mid].to_vec().into(),
            children: self.children[..=mid].to_vec().into(),
        };
        let right = Self {
            keys: self.keys[mid + 1..].to_vec().into(),
            children: self.children[mid + 1..].to_vec().into(),
        };

        Ok((left, pivot, right))
    }

    /// Union of this page with an adjacent page, in either order. The
    /// separator becomes the pivot between the two; which page goes left is
    /// read off their pivots, or their leftmost keys when a page has none.
    pub fn merge(&self, separator: K, other: &Self) -> Result<Self> {
        match (self.side_of(&separator)?, other.side_of(&separator)?) {
            (Side::Below, Side::Above | Side::Unknown) | (Side::Unknown, Side::Above) => {
                self.merge_right(separator, other)
            }
            (Side::Above, Side::Below | Side::Unknown) | (Side::Unknown, Side::Below) => {
                other.merge_right(separator, self)
            }
            _ => Err(TreeError::Precondition(format!(
                "separator {:?} does not divide the partitions being merged",
                separator
            ))),
        }
    }

    /// Union with the page immediately to the right of this one, where the
    /// caller already knows the order (the parent routes to both).
    pub(crate) fn merge_right(&self, separator: K, right: &Self) -> Result<Self> {
        let below_left = self.keys.last().is_some_and(|last| *last >= separator);
        let above_right = right.keys.first().is_some_and(|first| *first <= separator);
        if below_left || above_right {
            return Err(TreeError::Precondition(format!(
                "separator {:?} does not divide the partitions being merged",
                separator
            )));
        }

        let mut keys = Vec::with_capacity(self.keys.len() + right.keys.len() + 1);
        keys.extend_from_slice(&self.keys);
        keys.push(separator);
        keys.extend_from_slice(&right.keys);

        let mut children = Vec::with_capacity(self.children.len() + right.children.len());
        children.extend_from_slice(&self.children);
        children.extend_from_slice(&right.children);

        Ok(Self {
            keys: keys.into(),
            children: children.into(),
        })
    }

    /// Which side of `separator` this page's keys lie on
    fn side_of(&self, separator: &K) -> Result<Side> {
        match (self.keys.first(), self.keys.last()) {
            (Some(_), Some(last)) if last < separator => Ok(Side::Below),
            (Some(first), Some(_)) if first > separator => Ok(Side::Above),
            (Some(_), Some(_)) => Err(TreeError::Precondition(format!(
                "separator {:?} falls inside a partition being merged",
                separator
            ))),
            _ => Ok(match self.children[0].leftmost_leaf().min_key() {
                Some(min) if min < *separator => Side::Below,
                Some(_) => Side::Above,
                None => Side::Unknown,
            }),
        }
    }

    /// Replace child `index` with the two halves of its split, `pivot`
    /// being the right half's minimum key.
    pub fn insert_split_pages(
        &self,
        index: usize,
        left: Subtree<K, V>,
        right: Subtree<K, V>,
        pivot: K,
    ) -> Result<Self> {
        if index >= self.children.len() {
            return Err(TreeError::Precondition(format!(
                "split child index {} out of range for {} children",
                index,
                self.children.len()
            )));
        }

        let after_lower = index == 0 || self.keys[index - 1] <= pivot;
        let before_upper = index == self.keys.len() || pivot < self.keys[index];
        if !after_lower || !before_upper {
            return Err(TreeError::Precondition(format!(
                "pivot {:?} falls outside the range of child {}",
                pivot, index
            )));
        }

        let mut keys = self.keys.to_vec();
        keys.insert(index, pivot);

        let mut children = self.children.to_vec();
        children[index] = left;
        children.insert(index + 1, right);

        Ok(Self {
            keys: keys.into(),
            children: children.into(),
        })
    }

    /// Drop child `index` together with the pivot that bounds it
    pub fn remove_subtree(&self, index: usize) -> Result<Self> {
        if self.children.len() < 2 {
            return Err(TreeError::Precondition(
                "cannot remove the only subtree of a partition".to_string(),
            ));
        }
        if index >= self.children.len() {
            return Err(TreeError::Precondition(format!(
                "subtree index {} out of range for {} children",
                index,
                self.children.len()
            )));
        }

        let mut keys = self.keys.to_vec();
        keys.remove(index.saturating_sub(1));

        let mut children = self.children.to_vec();
        children.remove(index);

        Ok(Self {
            keys: keys.into(),
            children: children.into(),
        })
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check pivot order and key/child arity
    pub fn check_invariants(&self) -> Result<()> {
        if self.children.len() != self.keys.len() + 1 {
            return Err(TreeError::Invariant(format!(
                "partition page has {} keys but {} children",
                self.keys.len(),
                self.children.len()
            )));
        }

        for pair in self.keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(TreeError::Invariant(format!(
                    "partition pivots out of order: {:?} >= {:?}",
                    pair[0], pair[1]
                )));
            }
        }

        Ok(())
    }
}
