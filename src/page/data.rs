//! Sorted Data Page
//!
//! An immutable sorted multimap: one entry per distinct key, each entry
//! owning a sorted set of unique values. Pages are cheap to clone (two
//! words plus an `Arc`) and every operation builds a new page.

use std::cmp::Ordering;
use std::ops::{Bound, Range};
use std::sync::Arc;

use crate::error::{Result, TreeError};
use crate::scalar::{ByteSize, Scalar};

use super::index_of_by;

// =============================================================================
// Value Set
// =============================================================================

/// Sorted, duplicate-free values stored under one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSet<V>(Arc<[V]>);

impl<V> Default for ValueSet<V> {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl<V: Scalar> ValueSet<V> {
    /// A set holding exactly one value
    pub fn single(value: V) -> Self {
        Self(Arc::from(vec![value]))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, value: &V) -> bool {
        self.0.binary_search(value).is_ok()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, V> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[V] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<V> {
        self.0.to_vec()
    }

    /// Summed byte size of all values
    pub fn byte_size(&self) -> usize {
        self.0.iter().map(ByteSize::byte_size).sum()
    }

    /// New set with `value` added, or `None` if it is already present
    fn with(&self, value: V) -> Option<Self> {
        let insert_at = self.0.binary_search(&value).err()?;

        let mut values = Vec::with_capacity(self.0.len() + 1);
        values.extend_from_slice(&self.0[..insert_at]);
        values.push(value);
        values.extend_from_slice(&self.0[insert_at..]);

        Some(Self(values.into()))
    }

    /// New set with `value` removed, or `None` if it is absent
    fn without(&self, value: &V) -> Option<Self> {
        let index = self.0.binary_search(value).ok()?;

        let mut values = Vec::with_capacity(self.0.len() - 1);
        values.extend_from_slice(&self.0[..index]);
        values.extend_from_slice(&self.0[index + 1..]);

        Some(Self(values.into()))
    }
}

impl<'a, V> IntoIterator for &'a ValueSet<V> {
    type Item = &'a V;
    type IntoIter = std::slice::Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// Entry
// =============================================================================

/// One key and every value stored under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    key: K,
    values: ValueSet<V>,
}

impl<K: Scalar, V: Scalar> Entry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn values(&self) -> &ValueSet<V> {
        &self.values
    }

    /// Key bytes plus the bytes of every value
    pub fn byte_size(&self) -> usize {
        self.key.byte_size() + self.values.byte_size()
    }
}

// =============================================================================
// Data Page
// =============================================================================

/// Immutable sorted page of entries, sized by byte budget
#[derive(Debug, Clone)]
pub struct DataPage<K, V> {
    /// Entries, strictly increasing by key
    entries: Arc<[Entry<K, V>]>,

    /// Sum of `Entry::byte_size` over all entries
    byte_size: usize,
}

impl<K: PartialEq, V: PartialEq> PartialEq for DataPage<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Eq, V: Eq> Eq for DataPage<K, V> {}

impl<K, V> Default for DataPage<K, V> {
    fn default() -> Self {
        Self {
            entries: Arc::from(Vec::new()),
            byte_size: 0,
        }
    }
}

impl<K: Scalar, V: Scalar> DataPage<K, V> {
    /// Create an empty page
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a page from `(key, value)` pairs in any order
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |page, (key, value)| page.insert(key, value))
    }

    fn from_entries(entries: Vec<Entry<K, V>>) -> Self {
        let byte_size = entries.iter().map(Entry::byte_size).sum();
        Self {
            entries: entries.into(),
            byte_size,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Byte size of all keys and values (0 for an empty page)
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Number of `(key, value)` pairs
    pub fn value_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.values.len()).sum()
    }

    pub fn entries(&self) -> &[Entry<K, V>] {
        &self.entries
    }

    /// Smallest key, `None` for an empty page
    pub fn min_key(&self) -> Option<&K> {
        self.entries.first().map(|entry| &entry.key)
    }

    /// Largest key, `None` for an empty page
    pub fn max_key(&self) -> Option<&K> {
        self.entries.last().map(|entry| &entry.key)
    }

    /// Iterate all `(key, value)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.entries
            .iter()
            .flat_map(|entry| entry.values.iter().map(move |value| (&entry.key, value)))
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Entry index of `key`, or the complement of its insertion point
    pub fn index_of(&self, key: &K) -> isize {
        index_of_by(&self.entries, |entry| entry.key.cmp(key))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index_of(key) >= 0
    }

    /// Values stored under `key` (empty when absent)
    pub fn read(&self, key: &K) -> ValueSet<V> {
        match self.index_of(key) {
            index if index >= 0 => self.entries[index as usize].values.clone(),
            _ => ValueSet::default(),
        }
    }

    /// All pairs of the entries whose index falls in `range`
    pub fn read_slice(&self, range: Range<usize>) -> Vec<(K, V)> {
        let end = range.end.min(self.entries.len());
        let start = range.start.min(end);

        self.entries[start..end]
            .iter()
            .flat_map(|entry| {
                entry
                    .values
                    .iter()
                    .map(move |value| (entry.key.clone(), value.clone()))
            })
            .collect()
    }

    /// First entry index that satisfies a lower bound
    pub fn lower_index(&self, bound: Bound<&K>) -> usize {
        match bound {
            Bound::Unbounded => 0,
            Bound::Included(key) => match self.index_of(key) {
                found if found >= 0 => found as usize,
                missing => !missing as usize,
            },
            Bound::Excluded(key) => match self.index_of(key) {
                found if found >= 0 => found as usize + 1,
                missing => !missing as usize,
            },
        }
    }

    /// One past the last entry index that satisfies an upper bound
    pub fn upper_index(&self, bound: Bound<&K>) -> usize {
        match bound {
            Bound::Unbounded => self.entries.len(),
            Bound::Included(key) => match self.index_of(key) {
                found if found >= 0 => found as usize + 1,
                missing => !missing as usize,
            },
            Bound::Excluded(key) => match self.index_of(key) {
                found if found >= 0 => found as usize,
                missing => !missing as usize,
            },
        }
    }

    // =========================================================================
    // Copy-on-write Mutation
    // =========================================================================

    /// Page with `value` added under `key`; unchanged content if the pair exists
    pub fn insert(&self, key: K, value: V) -> Self {
        self.try_insert(key, value).unwrap_or_else(|| self.clone())
    }

    /// Page with `value` added under `key`, or `None` if the pair exists
    pub fn try_insert(&self, key: K, value: V) -> Option<Self> {
        match self.index_of(&key) {
            found if found >= 0 => {
                let index = found as usize;
                let current = &self.entries[index];
                let added = value.byte_size();
                let values = current.values.with(value)?;

                let mut entries = self.entries.to_vec();
                entries[index].values = values;

                Some(Self {
                    entries: entries.into(),
                    byte_size: self.byte_size + added,
                })
            }
            missing => {
                let insert_at = !missing as usize;
                let entry = Entry {
                    key,
                    values: ValueSet::single(value),
                };
                let added = entry.byte_size();

                let mut entries = Vec::with_capacity(self.entries.len() + 1);
                entries.extend_from_slice(&self.entries[..insert_at]);
                entries.push(entry);
                entries.extend_from_slice(&self.entries[insert_at..]);

                Some(Self {
                    entries: entries.into(),
                    byte_size: self.byte_size + added,
                })
            }
        }
    }

    /// Page without the entry for `key`; unchanged if absent
    pub fn remove(&self, key: &K) -> Self {
        self.try_remove(key).unwrap_or_else(|| self.clone())
    }

    /// Page without the entry for `key`, or `None` if absent
    pub fn try_remove(&self, key: &K) -> Option<Self> {
        let found = self.index_of(key);
        if found < 0 {
            return None;
        }
        let index = found as usize;
        let freed = self.entries[index].byte_size();

        let mut entries = Vec::with_capacity(self.entries.len() - 1);
        entries.extend_from_slice(&self.entries[..index]);
        entries.extend_from_slice(&self.entries[index + 1..]);

        Some(Self {
            entries: entries.into(),
            byte_size: self.byte_size - freed,
        })
    }

    /// Page without the single pair `(key, value)`; unchanged if absent
    pub fn remove_value(&self, key: &K, value: &V) -> Self {
        self.try_remove_value(key, value)
            .unwrap_or_else(|| self.clone())
    }

    /// Page without the pair `(key, value)`, or `None` if absent.
    /// The entry itself goes away with its last value.
    pub fn try_remove_value(&self, key: &K, value: &V) -> Option<Self> {
        let found = self.index_of(key);
        if found < 0 {
            return None;
        }
        let index = found as usize;
        let current = &self.entries[index];
        let values = current.values.without(value)?;

        if values.is_empty() {
            return self.try_remove(key);
        }

        let replacement = Entry {
            key: current.key.clone(),
            values,
        };
        let byte_size = self.byte_size - current.byte_size() + replacement.byte_size();

        let mut entries = self.entries.to_vec();
        entries[index] = replacement;

        Some(Self {
            entries: entries.into(),
            byte_size,
        })
    }

    // =========================================================================
    // Split / Merge
    // =========================================================================

    /// Split at the midpoint index: left gets `[0, mid)`, right `[mid, len)`
    pub fn split(&self) -> Result<(Self, Self)> {
        if self.entries.len() < 2 {
            return Err(TreeError::Precondition(format!(
                "cannot split a data page with {} entries",
                self.entries.len()
            )));
        }

        let mid = self.entries.len() >> 1;
        let left = Self::from_entries(self.entries[..mid].to_vec());
        let right = Self {
            entries: self.entries[mid..].to_vec().into(),
            byte_size: self.byte_size - left.byte_size,
        };

        Ok((left, right))
    }

    /// Union of two pages whose key ranges do not overlap, in key order
    pub fn merge(&self, other: &Self) -> Result<Self> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(other.clone());
        }

        let (left, right) = match self.cmp_by_min_key(other) {
            Ordering::Greater => (other, self),
            _ => (self, other),
        };

        if let (Some(left_max), Some(right_min)) = (left.max_key(), right.min_key()) {
            if left_max >= right_min {
                return Err(TreeError::Precondition(format!(
                    "cannot merge overlapping pages: {:?} >= {:?}",
                    left_max, right_min
                )));
            }
        }

        let mut entries = Vec::with_capacity(left.entries.len() + right.entries.len());
        entries.extend_from_slice(&left.entries);
        entries.extend_from_slice(&right.entries);

        Ok(Self {
            entries: entries.into(),
            byte_size: left.byte_size + right.byte_size,
        })
    }

    /// Empty pages sort first, otherwise pages compare by minimum key
    pub fn cmp_by_min_key(&self, other: &Self) -> Ordering {
        self.min_key().cmp(&other.min_key())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check sortedness, value-set order and the cached byte size
    pub fn check_invariants(&self) -> Result<()> {
        for pair in self.entries.windows(2) {
            if pair[0].key >= pair[1].key {
                return Err(TreeError::Invariant(format!(
                    "data page keys out of order: {:?} >= {:?}",
                    pair[0].key, pair[1].key
                )));
            }
        }

        for entry in self.entries.iter() {
            if entry.values.is_empty() {
                return Err(TreeError::Invariant(format!(
                    "entry {:?} has no values",
                    entry.key
                )));
            }
            if entry.values.as_slice().windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(TreeError::Invariant(format!(
                    "values of {:?} are not sorted and unique",
                    entry.key
                )));
            }
        }

        let expected: usize = self.entries.iter().map(Entry::byte_size).sum();
        if expected != self.byte_size {
            return Err(TreeError::Invariant(format!(
                "data page byte size is {} but entries hold {}",
                self.byte_size, expected
            )));
        }

        Ok(())
    }
}
