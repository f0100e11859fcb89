//! Tests for DataNode
//!
//! These tests verify:
//! - Split splices the new right node into the sibling chain
//! - Merge absorbs only the right sibling and adopts its link
//! - Point reads move right past a split the parent has not seen
//! - Range reads walk the chain and stop at the upper bound
//! - Fork shares data but not later writes
//! - Writers serialize, and give up after the lock timeout

use std::ops::Bound;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use atlastree::{DataNode, TreeConfig, TreeError};

// =============================================================================
// Helper Functions
// =============================================================================

fn config() -> Arc<TreeConfig> {
    Arc::new(TreeConfig::default())
}

fn node_with(keys: impl IntoIterator<Item = u32>) -> DataNode<u32, u32> {
    let node = DataNode::new(config());
    for key in keys {
        node.insert(key, key * 10).unwrap();
    }
    node
}

fn keys_of(node: &DataNode<u32, u32>) -> Vec<u32> {
    node.page().entries().iter().map(|entry| *entry.key()).collect()
}

fn chain_keys(node: &DataNode<u32, u32>) -> Vec<Vec<u32>> {
    node.chain()
        .map(|snapshot| {
            snapshot
                .page()
                .entries()
                .iter()
                .map(|entry| *entry.key())
                .collect()
        })
        .collect()
}

// =============================================================================
// Basic Operation Tests
// =============================================================================

#[test]
fn test_new_node_is_empty() {
    let node: DataNode<u32, u32> = DataNode::new(config());

    assert!(node.is_empty());
    assert_eq!(node.byte_size(), 0);
    assert!(node.sibling().is_none());
    assert!(node.is_underflow());
    assert!(!node.is_overflow());
}

#[test]
fn test_with_entry() {
    let node = DataNode::with_entry(5u32, 50u32, config());

    assert_eq!(node.len(), 1);
    assert_eq!(node.read(&5).to_vec(), vec![50]);
    assert_eq!(node.min_key(), Some(5));
    assert_eq!(node.max_key(), Some(5));
}

#[test]
fn test_insert_read_remove() {
    let node = node_with([3, 1, 2]);

    assert!(node.insert(2, 21).unwrap());
    assert!(!node.insert(2, 21).unwrap());

    assert_eq!(keys_of(&node), vec![1, 2, 3]);
    assert_eq!(node.read(&2).to_vec(), vec![20, 21]);
    assert_eq!(node.value_count(), 4);

    assert!(node.remove_value(&2, &20).unwrap());
    assert_eq!(node.read(&2).to_vec(), vec![21]);

    assert!(node.remove(&2).unwrap());
    assert!(!node.remove(&2).unwrap());
    assert!(!node.contains_key(&2));
    assert_eq!(node.len(), 2);
}

#[test]
fn test_overflow_and_underflow_thresholds() {
    // u32 key + u32 value = 8 bytes per entry
    let config = Arc::new(TreeConfig::builder().data_node_max_bytes(40).build());
    let node: DataNode<u32, u32> = DataNode::new(config);

    node.insert(1, 1).unwrap();
    node.insert(2, 2).unwrap();
    assert!(node.is_underflow()); // 16 < 20

    node.insert(3, 3).unwrap();
    assert!(!node.is_underflow());
    assert!(!node.is_overflow());

    node.insert(4, 4).unwrap();
    node.insert(5, 5).unwrap();
    assert!(node.is_overflow()); // 40 >= 40
}

#[test]
fn test_guard_writes_are_published() {
    let node = node_with([1, 2]);

    {
        let guard = node.lock().unwrap();
        assert!(guard.insert(3, 30));
        assert!(guard.remove(&1));
        assert!(!guard.remove_value(&2, &99));
        assert_eq!(guard.len(), 2);
    }

    assert_eq!(keys_of(&node), vec![2, 3]);
}

// =============================================================================
// Split Tests
// =============================================================================

#[test]
fn test_split_links_new_sibling() {
    let node = node_with(1..=6);

    let right = node.split().unwrap();

    assert_eq!(keys_of(&node), vec![1, 2, 3]);
    assert_eq!(keys_of(&right), vec![4, 5, 6]);
    assert!(Arc::ptr_eq(&node.sibling().unwrap(), &right));
    assert!(right.sibling().is_none());
}

#[test]
fn test_split_splices_into_existing_chain() {
    let node = node_with(1..=8);

    let far = node.split().unwrap();
    let near = node.split().unwrap();

    assert_eq!(chain_keys(&node), vec![vec![1, 2], vec![3, 4], vec![5, 6, 7, 8]]);
    assert!(Arc::ptr_eq(&node.sibling().unwrap(), &near));
    assert!(Arc::ptr_eq(&near.sibling().unwrap(), &far));
}

#[test]
fn test_split_guard_returns_pivot() {
    let node = node_with([10, 20, 30]);

    let (pivot, right) = node.lock().unwrap().split().unwrap();

    assert_eq!(pivot, 20);
    assert_eq!(right.min_key(), Some(pivot));
}

#[test]
fn test_split_requires_two_entries() {
    let node = node_with([1]);

    assert!(matches!(node.split(), Err(TreeError::Precondition(_))));
    assert_eq!(keys_of(&node), vec![1]);
    assert!(node.sibling().is_none());
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_merge_absorbs_right_sibling() {
    let node = node_with(1..=8);
    let far = node.split().unwrap();
    let near = node.split().unwrap();

    node.merge(&near).unwrap();

    assert_eq!(keys_of(&node), vec![1, 2, 3, 4]);
    assert!(Arc::ptr_eq(&node.sibling().unwrap(), &far));
    assert_eq!(chain_keys(&node), vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);

    // The absorbed node still serves readers that reached it earlier
    assert_eq!(near.read(&3).to_vec(), vec![30]);
}

#[test]
fn test_merge_last_sibling_clears_link() {
    let node = node_with(1..=4);
    let right = node.split().unwrap();

    node.merge(&right).unwrap();

    assert_eq!(keys_of(&node), vec![1, 2, 3, 4]);
    assert!(node.sibling().is_none());
}

#[test]
fn test_merge_rejects_non_sibling() {
    let node = node_with(1..=8);
    let far = node.split().unwrap();
    let _near = node.split().unwrap();
    let stranger = node_with([100]);

    assert!(matches!(node.merge(&far), Err(TreeError::Precondition(_))));
    assert!(matches!(node.merge(&stranger), Err(TreeError::Precondition(_))));
    assert!(matches!(node.merge(&node), Err(TreeError::Precondition(_))));
    assert_eq!(keys_of(&node), vec![1, 2]);
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_read_moves_right_past_split() {
    let node = node_with(0..10);
    let _right = node.split().unwrap();

    // A reader routed to the old node by a stale parent still finds the key
    assert!(node.contains_key(&8));
    assert_eq!(node.read(&8).to_vec(), vec![80]);
    assert!(node.read(&42).is_empty());
    assert!(!node.contains_key(&42));
}

#[test]
fn test_read_moves_right_past_empty_sibling() {
    let node = node_with([1, 2, 5, 6]);
    let middle = node.split().unwrap();
    let last = middle.split().unwrap();
    assert!(middle.remove(&5).unwrap());

    assert_eq!(chain_keys(&node), vec![vec![1, 2], vec![], vec![6]]);
    assert_eq!(node.read(&6).to_vec(), vec![60]);
    assert!(node.contains_key(&6));
    assert!(middle.contains_key(&6));
    assert!(node.read(&5).is_empty());
    assert!(node.read(&7).is_empty());
    assert_eq!(last.read(&6).to_vec(), vec![60]);
}

#[test]
fn test_read_range_across_chain() {
    let node = node_with(0..20);
    let mut tail = node.split().unwrap();
    for _ in 0..3 {
        tail = tail.split().unwrap();
    }
    assert_eq!(node.chain().count(), 5);

    let all = node.read_range(Bound::Unbounded, Bound::Unbounded);
    let keys: Vec<u32> = all.iter().map(|(key, _)| *key).collect();
    assert_eq!(keys, (0..20).collect::<Vec<_>>());

    let window = node.read_range(Bound::Included(&7), Bound::Excluded(&13));
    assert_eq!(
        window.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
        (7..13).collect::<Vec<_>>()
    );

    let tail_only = node.read_range(Bound::Excluded(&17), Bound::Unbounded);
    assert_eq!(tail_only, vec![(18, 180), (19, 190)]);
}

#[test]
fn test_read_range_empty_and_inverted() {
    let node = node_with(0..5);

    assert!(node
        .read_range(Bound::Included(&4), Bound::Excluded(&2))
        .is_empty());
    assert!(node
        .read_range(Bound::Included(&3), Bound::Excluded(&3))
        .is_empty());
    assert!(node
        .read_range(Bound::Included(&10), Bound::Unbounded)
        .is_empty());
    assert_eq!(
        node.read_range(Bound::Included(&3), Bound::Included(&3)),
        vec![(3, 30)]
    );
}

// =============================================================================
// Fork Tests
// =============================================================================

#[test]
fn test_fork_shares_snapshot() {
    let node = node_with([1, 2, 3]);

    let fork = node.fork();

    assert!(Arc::ptr_eq(&node.snapshot(), &fork.snapshot()));
    assert_eq!(keys_of(&fork), vec![1, 2, 3]);
}

#[test]
fn test_fork_diverges_after_writes() {
    let node = node_with([1, 2, 3]);
    let fork = node.fork();

    node.insert(4, 40).unwrap();
    fork.remove(&1).unwrap();

    assert_eq!(keys_of(&node), vec![1, 2, 3, 4]);
    assert_eq!(keys_of(&fork), vec![2, 3]);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_inserts_distinct_keys() {
    let node = Arc::new(DataNode::<u32, u32>::new(config()));
    let threads = 8;
    let per_thread = 200;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let node = Arc::clone(&node);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let key = t * per_thread + i;
                    assert!(node.insert(key, key).unwrap());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(node.len(), (threads * per_thread) as usize);
    for key in 0..threads * per_thread {
        assert_eq!(node.read(&key).to_vec(), vec![key]);
    }
    node.page().check_invariants().unwrap();
}

#[test]
fn test_lock_timeout() {
    let config = Arc::new(TreeConfig::builder().lock_timeout_ms(50).build());
    let node = Arc::new(DataNode::<u32, u32>::new(config));

    let guard = node.lock().unwrap();

    let contender = Arc::clone(&node);
    let result = thread::spawn(move || contender.insert(1, 1))
        .join()
        .unwrap();

    let err = result.unwrap_err();
    assert!(matches!(err, TreeError::LockTimeout { timeout_ms: 50, .. }));
    assert!(err.is_retryable());

    drop(guard);
    assert!(node.insert(1, 1).unwrap());
}

#[test]
fn test_writer_waits_for_lock_within_timeout() {
    let config = Arc::new(TreeConfig::builder().lock_timeout_ms(5_000).build());
    let node = Arc::new(DataNode::<u32, u32>::new(config));

    let guard = node.lock().unwrap();
    let contender = Arc::clone(&node);
    let handle = thread::spawn(move || contender.insert(7, 7));

    thread::sleep(Duration::from_millis(50));
    drop(guard);

    assert!(handle.join().unwrap().unwrap());
    assert!(node.contains_key(&7));
}

#[test]
fn test_readers_see_complete_snapshots_during_writes() {
    let node = Arc::new(DataNode::<u32, u32>::new(config()));

    crossbeam::scope(|scope| {
        let writer = Arc::clone(&node);
        scope.spawn(move |_| {
            for key in 0..500 {
                writer.insert(key, key).unwrap();
            }
        });

        for _ in 0..4 {
            let reader = Arc::clone(&node);
            scope.spawn(move |_| {
                let mut last_len = 0;
                for _ in 0..200 {
                    let page = reader.page();
                    assert!(page.len() >= last_len);
                    assert!(page.check_invariants().is_ok());
                    let keys: Vec<u32> = page.entries().iter().map(|entry| *entry.key()).collect();
                    assert_eq!(keys, (0..page.len() as u32).collect::<Vec<_>>());
                    last_len = page.len();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(node.len(), 500);
}
