//! Data Node
//!
//! A leaf of the tree. Holds exactly one published (page, sibling) pair and
//! swaps it wholesale on every write.
//!
//! ## Concurrency
//! - `state`: the published snapshot. Readers clone the `Arc` under a brief
//!   read lock and never see a page paired with another generation's sibling.
//! - `lock`: serializes writers; acquisition is bounded by the configured
//!   timeout.
//!
//! ## Sibling Chain
//! ```text
//!   [1 2 3] ──► [4 5 6] ──► [7 8 9] ──► None
//! ```
//! Split splices the new right node in after this one; merge absorbs the
//! right sibling and adopts its link. Sibling handles live inside immutable
//! snapshots, so a reader holding an old snapshot keeps the nodes it may
//! still walk alive.

use std::fmt;
use std::ops::Bound;
use std::ptr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::TreeConfig;
use crate::error::{Result, TreeError};
use crate::page::{is_empty_range, DataPage, ValueSet};
use crate::scalar::Scalar;

use super::{acquire, NodeGuard};

// =============================================================================
// Snapshot
// =============================================================================

/// One published generation of a data node
pub struct NodeSnapshot<K, V> {
    page: DataPage<K, V>,
    sibling: Option<Arc<DataNode<K, V>>>,
}

impl<K: Scalar, V: Scalar> NodeSnapshot<K, V> {
    pub fn page(&self) -> &DataPage<K, V> {
        &self.page
    }

    pub fn sibling(&self) -> Option<&Arc<DataNode<K, V>>> {
        self.sibling.as_ref()
    }
}

/// Iterator over the snapshots of a node and every node to its right
pub struct SiblingChain<K, V> {
    next: Option<Arc<NodeSnapshot<K, V>>>,
}

impl<K: Scalar, V: Scalar> Iterator for SiblingChain<K, V> {
    type Item = Arc<NodeSnapshot<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.sibling.as_ref().map(|sibling| sibling.snapshot());
        Some(current)
    }
}

// =============================================================================
// Data Node
// =============================================================================

/// Leaf node: a lockable, swappable data page plus a right-sibling link
pub struct DataNode<K, V> {
    /// Current (page, sibling) pair, replaced as a unit
    state: RwLock<Arc<NodeSnapshot<K, V>>>,

    /// Serializes writers
    lock: Arc<Mutex<()>>,

    /// Shared tree configuration (byte budget, lock timeout)
    config: Arc<TreeConfig>,
}

impl<K: Scalar, V: Scalar> fmt::Debug for DataNode<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("DataNode")
            .field("entries", &snapshot.page.len())
            .field("bytes", &snapshot.page.byte_size())
            .field("has_sibling", &snapshot.sibling.is_some())
            .finish()
    }
}

impl<K: Scalar, V: Scalar> DataNode<K, V> {
    /// Create an empty node with no sibling
    pub fn new(config: Arc<TreeConfig>) -> Self {
        Self::from_parts(DataPage::new(), None, config)
    }

    /// Create a node holding a single pair
    pub fn with_entry(key: K, value: V, config: Arc<TreeConfig>) -> Self {
        Self::from_parts(DataPage::new().insert(key, value), None, config)
    }

    pub(crate) fn from_parts(
        page: DataPage<K, V>,
        sibling: Option<Arc<DataNode<K, V>>>,
        config: Arc<TreeConfig>,
    ) -> Self {
        Self {
            state: RwLock::new(Arc::new(NodeSnapshot { page, sibling })),
            lock: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// A new node sharing this node's current snapshot; copies no data
    pub fn fork(&self) -> Self {
        Self {
            state: RwLock::new(self.snapshot()),
            lock: Arc::new(Mutex::new(())),
            config: Arc::clone(&self.config),
        }
    }

    // =========================================================================
    // Lock-free Reads
    // =========================================================================

    /// Current published (page, sibling) pair
    pub fn snapshot(&self) -> Arc<NodeSnapshot<K, V>> {
        Arc::clone(&self.state.read())
    }

    pub fn page(&self) -> DataPage<K, V> {
        self.snapshot().page.clone()
    }

    pub fn sibling(&self) -> Option<Arc<DataNode<K, V>>> {
        self.snapshot().sibling.clone()
    }

    /// Walk this node and its right siblings
    pub fn chain(&self) -> SiblingChain<K, V> {
        SiblingChain {
            next: Some(self.snapshot()),
        }
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.snapshot().page.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().page.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.snapshot().page.byte_size()
    }

    pub fn value_count(&self) -> usize {
        self.snapshot().page.value_count()
    }

    pub fn min_key(&self) -> Option<K> {
        self.snapshot().page.min_key().cloned()
    }

    pub fn max_key(&self) -> Option<K> {
        self.snapshot().page.max_key().cloned()
    }

    /// Byte budget this node splits at
    pub fn max_bytes(&self) -> usize {
        self.config.data_node_max_bytes
    }

    pub fn is_overflow(&self) -> bool {
        self.byte_size() >= self.config.data_node_max_bytes
    }

    pub fn is_underflow(&self) -> bool {
        self.underflows_at(self.byte_size())
    }

    pub(crate) fn underflows_at(&self, byte_size: usize) -> bool {
        byte_size < self.config.data_node_max_bytes / 2
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.locate(key).page.contains_key(key)
    }

    /// Values stored under `key`
    pub fn read(&self, key: &K) -> ValueSet<V> {
        self.locate(key).page.read(key)
    }

    /// All pairs within the bounds, continuing along the sibling chain
    /// until a page holds a key past the upper bound.
    pub fn read_range(&self, start: Bound<&K>, end: Bound<&K>) -> Vec<(K, V)> {
        let mut pairs = Vec::new();
        if is_empty_range(start, end) {
            return pairs;
        }

        for snapshot in self.chain() {
            let page = &snapshot.page;
            let lower = page.lower_index(start);
            let upper = page.upper_index(end);
            if lower < upper {
                pairs.extend(page.read_slice(lower..upper));
            }

            // A key beyond the upper bound lives in this page: nothing further right matches
            if upper < page.len() {
                break;
            }
        }

        pairs
    }

    /// The snapshot whose key range holds `key`, moving right past a
    /// concurrent split that this node's parent has not published yet.
    fn locate(&self, key: &K) -> Arc<NodeSnapshot<K, V>> {
        let mut current = self.snapshot();
        while current.page.max_key().map_or(true, |max| key > max) {
            match Self::next_owner(&current, key) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    /// First non-empty snapshot right of `snapshot`, if its range starts at
    /// or before `key`. Empty leaves own no keys and are stepped over.
    fn next_owner(snapshot: &NodeSnapshot<K, V>, key: &K) -> Option<Arc<NodeSnapshot<K, V>>> {
        let mut candidate = snapshot.sibling.as_ref()?.snapshot();
        while candidate.page.is_empty() {
            candidate = candidate.sibling.as_ref()?.snapshot();
        }

        candidate
            .page
            .min_key()
            .is_some_and(|min| min <= key)
            .then_some(candidate)
    }

    // =========================================================================
    // Locked Writes
    // =========================================================================

    /// Acquire this node's write lock
    pub fn lock(&self) -> Result<DataNodeGuard<'_, K, V>> {
        let guard = acquire(&self.lock, &self.config, "data node")?;
        Ok(DataNodeGuard {
            node: self,
            _guard: guard,
        })
    }

    /// Insert a pair; returns false if it was already present
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        Ok(self.lock()?.insert(key, value))
    }

    /// Remove every value under `key`
    pub fn remove(&self, key: &K) -> Result<bool> {
        Ok(self.lock()?.remove(key))
    }

    /// Remove a single pair
    pub fn remove_value(&self, key: &K, value: &V) -> Result<bool> {
        Ok(self.lock()?.remove_value(key, value))
    }

    /// Split this node in two; returns the new right sibling, whose minimum
    /// key is the pivot the parent should route by.
    pub fn split(&self) -> Result<Arc<DataNode<K, V>>> {
        let (_, right) = self.lock()?.split()?;
        Ok(right)
    }

    /// Absorb `other`, which must be this node's right sibling, and adopt
    /// its sibling link. `other` is left untouched for in-flight readers.
    pub fn merge(&self, other: &DataNode<K, V>) -> Result<()> {
        if ptr::eq(self, other) {
            return Err(TreeError::Precondition(
                "a data node cannot absorb itself".to_string(),
            ));
        }

        let guard = self.lock()?;
        let current = guard.snapshot();
        let is_sibling = current
            .sibling
            .as_ref()
            .is_some_and(|sibling| ptr::eq(Arc::as_ptr(sibling), other));
        if !is_sibling {
            return Err(TreeError::Precondition(
                "a data node can only absorb its right sibling".to_string(),
            ));
        }

        let _other_guard = other.lock()?;
        let absorbed = other.snapshot();
        let page = current.page.merge(&absorbed.page)?;

        tracing::debug!(
            "Merged data nodes ({} + {} entries, {} bytes)",
            current.page.len(),
            absorbed.page.len(),
            page.byte_size()
        );
        guard.publish(page, absorbed.sibling.clone());

        Ok(())
    }
}

// =============================================================================
// Guard
// =============================================================================

/// Exclusive write access to one data node
pub struct DataNodeGuard<'a, K, V> {
    node: &'a DataNode<K, V>,
    _guard: NodeGuard,
}

impl<'a, K: Scalar, V: Scalar> DataNodeGuard<'a, K, V> {
    pub fn snapshot(&self) -> Arc<NodeSnapshot<K, V>> {
        self.node.snapshot()
    }

    pub fn page(&self) -> DataPage<K, V> {
        self.node.page()
    }

    pub fn len(&self) -> usize {
        self.node.len()
    }

    pub fn is_overflow(&self) -> bool {
        self.node.is_overflow()
    }

    /// Whether adding this pair could push the node over its byte budget
    pub fn would_overflow(&self, key: &K, value: &V) -> bool {
        self.node.byte_size() + key.byte_size() + value.byte_size()
            >= self.node.config.data_node_max_bytes
    }

    /// Replace the published pair
    pub(crate) fn publish(&self, page: DataPage<K, V>, sibling: Option<Arc<DataNode<K, V>>>) {
        *self.node.state.write() = Arc::new(NodeSnapshot { page, sibling });
    }

    /// Replace the page, keeping the current sibling
    pub(crate) fn publish_page(&self, page: DataPage<K, V>) {
        let sibling = self.snapshot().sibling.clone();
        self.publish(page, sibling);
    }

    pub fn insert(&self, key: K, value: V) -> bool {
        match self.page().try_insert(key, value) {
            Some(page) => {
                self.publish_page(page);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        match self.page().try_remove(key) {
            Some(page) => {
                self.publish_page(page);
                true
            }
            None => false,
        }
    }

    pub fn remove_value(&self, key: &K, value: &V) -> bool {
        match self.page().try_remove_value(key, value) {
            Some(page) => {
                self.publish_page(page);
                true
            }
            None => false,
        }
    }

    /// Keep the left half, splice a new node holding the right half in
    /// after this one. Returns `(pivot, right node)`.
    pub fn split(&self) -> Result<(K, Arc<DataNode<K, V>>)> {
        let current = self.snapshot();
        let (left, right) = current.page.split()?;
        let pivot = right.min_key().cloned().ok_or_else(|| {
            TreeError::Invariant("data page split produced an empty right half".to_string())
        })?;

        tracing::debug!(
            "Split data node at {:?} ({} + {} entries)",
            pivot,
            left.len(),
            right.len()
        );

        let right = Arc::new(DataNode::from_parts(
            right,
            current.sibling.clone(),
            Arc::clone(&self.node.config),
        ));
        self.publish(left, Some(Arc::clone(&right)));

        Ok((pivot, right))
    }
}
