//! Page Module
//!
//! Immutable, persistent page values. Every mutation returns a new page;
//! a page is never changed after it has been published to a reader.
//!
//! ## Responsibilities
//! - Sorted multi-value entries with byte-budget accounting (`DataPage`)
//! - Pivot keys and child subtree routing (`PartitionPage`)
//! - Pure split/merge functions used by the node layer
//!
//! ## Index Convention
//! `index_of` returns the position of a key when present, otherwise the
//! bitwise complement of its insertion point:
//! ```text
//!   keys:      [10, 20, 30]
//!   index_of(20) =  1
//!   index_of(25) = !2  (= -3)
//!   index_of(5)  = !0  (= -1)
//! ```

mod data;
mod partition;

use std::ops::Bound;

pub use data::{DataPage, Entry, ValueSet};
pub use partition::PartitionPage;

/// Binary search over a sorted slice using the complement convention
pub(crate) fn index_of_by<T, F>(items: &[T], f: F) -> isize
where
    F: FnMut(&T) -> std::cmp::Ordering,
{
    match items.binary_search_by(f) {
        Ok(index) => index as isize,
        Err(insert_at) => !(insert_at as isize),
    }
}

/// True when no key can satisfy both bounds
pub(crate) fn is_empty_range<K: Ord>(start: Bound<&K>, end: Bound<&K>) -> bool {
    match (start, end) {
        (Bound::Included(s), Bound::Included(e)) => s > e,
        (Bound::Included(s), Bound::Excluded(e))
        | (Bound::Excluded(s), Bound::Included(e))
        | (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
        _ => false,
    }
}
