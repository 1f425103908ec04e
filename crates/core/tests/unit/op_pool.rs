//! Op Pool Tests.
//!
//! Verifies handle allocation, active-op accounting, chunked growth, and
//! double-free detection.

use fetchsim_core::op::OpPool;

// ══════════════════════════════════════════════════════════
// 1. Allocation and accounting
// ══════════════════════════════════════════════════════════

#[test]
fn alloc_free_balances_active_count() {
    let mut pool = OpPool::new();
    let a = pool.alloc(0, 0);
    let b = pool.alloc(0, 0);
    assert_eq!(pool.active_ops(), 2);
    pool.free(a);
    assert_eq!(pool.active_ops(), 1);
    pool.free(b);
    assert_eq!(pool.active_ops(), 0);
}

#[test]
fn unique_nums_are_globally_monotonic() {
    let mut pool = OpPool::new();
    let mut last = 0;
    for _ in 0..50 {
        let id = pool.alloc(0, 0);
        let unique = pool[id].unique_num;
        assert!(unique > last, "unique_num must strictly increase");
        last = unique;
    }
}

#[test]
fn recycled_records_are_reinitialized() {
    let mut pool = OpPool::new();
    let a = pool.alloc(0, 0);
    pool[a].op_num = 1234;
    pool[a].off_path = true;
    pool.free(a);

    let b = pool.alloc(1, 2);
    assert_eq!(pool[b].op_num, 0, "op_num is stamped by the DFE, not here");
    assert!(!pool[b].off_path);
    assert_eq!(pool[b].proc_id, 1);
    assert_eq!(pool[b].bp_id, 2);
}

// ══════════════════════════════════════════════════════════
// 2. Growth
// ══════════════════════════════════════════════════════════

#[test]
fn pool_grows_in_chunks() {
    let mut pool = OpPool::new();
    let ids: Vec<_> = (0..300).map(|_| pool.alloc(0, 0)).collect();
    assert_eq!(pool.active_ops(), 300);
    assert!(pool.entries() >= 300);
    assert_eq!(pool.entries() % 128, 0, "growth happens in fixed chunks");
    for id in ids {
        pool.free(id);
    }
    assert_eq!(pool.active_ops(), 0);
}

// ══════════════════════════════════════════════════════════
// 3. Invalid frees
// ══════════════════════════════════════════════════════════

#[test]
#[should_panic(expected = "double free")]
fn double_free_is_fatal() {
    let mut pool = OpPool::new();
    let a = pool.alloc(0, 0);
    pool.free(a);
    pool.free(a);
}
