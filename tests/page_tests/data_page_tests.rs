//! Tests for DataPage
//!
//! These tests verify:
//! - The index_of complement convention
//! - Multi-value entries and byte-size accounting
//! - Copy-on-write insert/remove (old pages never change)
//! - Split at the midpoint and merge of disjoint pages
//! - Bounded slice reads

use std::cmp::Ordering;
use std::ops::Bound;

use atlastree::{DataPage, TreeError};

// =============================================================================
// Helper Functions
// =============================================================================

fn page_of(keys: &[u32]) -> DataPage<u32, u64> {
    DataPage::from_pairs(keys.iter().map(|&key| (key, u64::from(key) * 10)))
}

fn keys_of(page: &DataPage<u32, u64>) -> Vec<u32> {
    page.entries().iter().map(|entry| *entry.key()).collect()
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_empty_page() {
    let page: DataPage<u32, u64> = DataPage::new();

    assert!(page.is_empty());
    assert_eq!(page.len(), 0);
    assert_eq!(page.byte_size(), 0);
    assert_eq!(page.min_key(), None);
    assert_eq!(page.max_key(), None);
    assert_eq!(page.index_of(&5), !0);
    assert!(page.read(&5).is_empty());
}

#[test]
fn test_index_of_complement_convention() {
    let page = page_of(&[10, 20, 30]);

    assert_eq!(page.index_of(&10), 0);
    assert_eq!(page.index_of(&20), 1);
    assert_eq!(page.index_of(&30), 2);

    assert_eq!(page.index_of(&5), !0);
    assert_eq!(page.index_of(&25), !2);
    assert_eq!(page.index_of(&35), !3);
    assert_eq!(!page.index_of(&25), 2);
}

#[test]
fn test_contains_key() {
    let page = page_of(&[1, 3]);

    assert!(page.contains_key(&1));
    assert!(page.contains_key(&3));
    assert!(!page.contains_key(&2));
}

#[test]
fn test_insert_keeps_keys_sorted() {
    let page = page_of(&[5, 1, 4, 2, 3]);

    assert_eq!(keys_of(&page), vec![1, 2, 3, 4, 5]);
    assert_eq!(page.min_key(), Some(&1));
    assert_eq!(page.max_key(), Some(&5));
}

// =============================================================================
// Multi-value Tests
// =============================================================================

#[test]
fn test_values_are_sorted_and_unique_per_key() {
    let page = DataPage::<u32, String>::new()
        .insert(1, "pear".to_string())
        .insert(1, "apple".to_string())
        .insert(1, "pear".to_string());

    let values = page.read(&1);
    assert_eq!(page.len(), 1);
    assert_eq!(values.to_vec(), vec!["apple".to_string(), "pear".to_string()]);
    assert_eq!(page.value_count(), 2);
}

#[test]
fn test_duplicate_pair_insert_is_a_no_op() {
    let page = page_of(&[1, 2]);

    assert!(page.try_insert(1, 10).is_none());
    assert_eq!(page.insert(1, 10), page);
    assert!(page.try_insert(1, 11).is_some());
}

#[test]
fn test_byte_size_accounting() {
    // u32 key = 4 bytes, u64 value = 8 bytes
    let page = DataPage::<u32, u64>::new().insert(1, 100);
    assert_eq!(page.byte_size(), 12);

    let page = page.insert(1, 200);
    assert_eq!(page.byte_size(), 20);

    let page = page.insert(2, 300);
    assert_eq!(page.byte_size(), 32);

    let page = page.remove_value(&1, &100);
    assert_eq!(page.byte_size(), 24);

    let page = page.remove(&1);
    assert_eq!(page.byte_size(), 12);

    page.check_invariants().unwrap();
}

#[test]
fn test_variable_width_byte_size() {
    let page = DataPage::<String, Vec<u8>>::new()
        .insert("abc".to_string(), vec![0; 10])
        .insert("de".to_string(), vec![1; 5]);

    assert_eq!(page.byte_size(), 3 + 10 + 2 + 5);
}

// =============================================================================
// Remove Tests
// =============================================================================

#[test]
fn test_remove_key_drops_all_values() {
    let page = page_of(&[1, 2, 3]).insert(2, 99);

    let page = page.remove(&2);

    assert_eq!(keys_of(&page), vec![1, 3]);
    assert!(page.read(&2).is_empty());
}

#[test]
fn test_remove_absent_key_keeps_content() {
    let page = page_of(&[1, 2, 3]);

    assert!(page.try_remove(&7).is_none());
    assert_eq!(page.remove(&7), page);
}

#[test]
fn test_remove_value_keeps_other_values() {
    let page = page_of(&[1]).insert(1, 99);

    let page = page.remove_value(&1, &10);

    assert_eq!(page.read(&1).to_vec(), vec![99]);
    assert!(page.contains_key(&1));
}

#[test]
fn test_remove_last_value_removes_entry() {
    let page = page_of(&[1, 2]);

    let page = page.remove_value(&1, &10);

    assert!(!page.contains_key(&1));
    assert_eq!(page.len(), 1);
}

#[test]
fn test_remove_absent_value_keeps_content() {
    let page = page_of(&[1, 2]);

    assert!(page.try_remove_value(&1, &11).is_none());
    assert!(page.try_remove_value(&3, &30).is_none());
}

#[test]
fn test_old_page_is_never_mutated() {
    let original = page_of(&[1, 2, 3]);
    let snapshot = original.clone();

    let _ = original.insert(4, 40);
    let _ = original.remove(&1);
    let _ = original.split().unwrap();

    assert_eq!(original, snapshot);
    assert_eq!(keys_of(&original), vec![1, 2, 3]);
}

// =============================================================================
// Range Read Tests
// =============================================================================

#[test]
fn test_read_slice() {
    let page = page_of(&[1, 2, 3, 4]).insert(2, 21);

    let pairs = page.read_slice(1..3);

    assert_eq!(pairs, vec![(2, 20), (2, 21), (3, 30)]);
}

#[test]
fn test_read_slice_clamps_out_of_range() {
    let page = page_of(&[1, 2]);

    assert_eq!(page.read_slice(1..10), vec![(2, 20)]);
    assert!(page.read_slice(5..10).is_empty());
}

#[test]
fn test_bound_indexes() {
    let page = page_of(&[10, 20, 30]);

    assert_eq!(page.lower_index(Bound::Unbounded), 0);
    assert_eq!(page.lower_index(Bound::Included(&20)), 1);
    assert_eq!(page.lower_index(Bound::Excluded(&20)), 2);
    assert_eq!(page.lower_index(Bound::Included(&15)), 1);

    assert_eq!(page.upper_index(Bound::Unbounded), 3);
    assert_eq!(page.upper_index(Bound::Included(&20)), 2);
    assert_eq!(page.upper_index(Bound::Excluded(&20)), 1);
    assert_eq!(page.upper_index(Bound::Included(&25)), 2);
    assert_eq!(page.upper_index(Bound::Included(&99)), 3);
}

// =============================================================================
// Split / Merge Tests
// =============================================================================

#[test]
fn test_split_at_midpoint() {
    let page = page_of(&[1, 2, 3, 4, 5]);

    let (left, right) = page.split().unwrap();

    assert_eq!(keys_of(&left), vec![1, 2]);
    assert_eq!(keys_of(&right), vec![3, 4, 5]);
    assert_eq!(left.byte_size() + right.byte_size(), page.byte_size());
    left.check_invariants().unwrap();
    right.check_invariants().unwrap();
}

#[test]
fn test_split_requires_two_entries() {
    let single = page_of(&[1]);
    let empty: DataPage<u32, u64> = DataPage::new();

    assert!(matches!(single.split(), Err(TreeError::Precondition(_))));
    assert!(matches!(empty.split(), Err(TreeError::Precondition(_))));
}

#[test]
fn test_split_of_two_entries() {
    let (left, right) = page_of(&[1, 2]).split().unwrap();

    assert_eq!(keys_of(&left), vec![1]);
    assert_eq!(keys_of(&right), vec![2]);
}

#[test]
fn test_merge_in_either_order() {
    let left = page_of(&[1, 2]);
    let right = page_of(&[5, 6]);

    let forward = left.merge(&right).unwrap();
    let backward = right.merge(&left).unwrap();

    assert_eq!(keys_of(&forward), vec![1, 2, 5, 6]);
    assert_eq!(forward, backward);
    assert_eq!(forward.byte_size(), left.byte_size() + right.byte_size());
}

#[test]
fn test_merge_with_empty_page() {
    let page = page_of(&[1, 2]);
    let empty = DataPage::new();

    assert_eq!(page.merge(&empty).unwrap(), page);
    assert_eq!(empty.merge(&page).unwrap(), page);
}

#[test]
fn test_merge_rejects_overlapping_ranges() {
    let left = page_of(&[1, 5]);
    let right = page_of(&[3, 8]);

    assert!(matches!(left.merge(&right), Err(TreeError::Precondition(_))));
    assert!(matches!(left.merge(&left), Err(TreeError::Precondition(_))));
}

#[test]
fn test_cmp_by_min_key() {
    let empty: DataPage<u32, u64> = DataPage::new();
    let low = page_of(&[1, 9]);
    let high = page_of(&[4]);

    assert_eq!(empty.cmp_by_min_key(&low), Ordering::Less);
    assert_eq!(low.cmp_by_min_key(&empty), Ordering::Greater);
    assert_eq!(empty.cmp_by_min_key(&DataPage::new()), Ordering::Equal);
    assert_eq!(low.cmp_by_min_key(&high), Ordering::Less);
    assert_eq!(high.cmp_by_min_key(&low), Ordering::Greater);
}
