//! Call-Return Stack Tests.
//!
//! Verifies push/pop LIFO ordering, underflow behaviour, pointer-restore
//! recovery, and cross-instance synchronization.

use fetchsim_core::bp::Crs;
use fetchsim_core::op::{CfType, RecoveryInfo};

use crate::common::cf_op;

fn call_at(addr: u64) -> fetchsim_core::op::Op {
    cf_op(CfType::Call, addr, 4, true, 0x5000, 0x5000)
}

fn ret_at(addr: u64) -> fetchsim_core::op::Op {
    cf_op(CfType::Ret, addr, 4, true, 0, 0)
}

fn snapshot(crs: &Crs) -> RecoveryInfo {
    let mut info = RecoveryInfo::default();
    info.crs_next = crs.next;
    info.crs_tos = crs.tos;
    info.crs_depth = crs.depth;
    info.crs_tail = crs.tail;
    info
}

// ══════════════════════════════════════════════════════════
// 1. LIFO behaviour
// ══════════════════════════════════════════════════════════

#[test]
fn push_pop_lifo_order() {
    let mut crs = Crs::new(8, 0);
    crs.push(&call_at(0x100)); // return 0x104
    crs.push(&call_at(0x200)); // return 0x204
    crs.push(&call_at(0x300)); // return 0x304
    assert_eq!(crs.pop(&ret_at(0x900)), 0x304);
    assert_eq!(crs.pop(&ret_at(0x900)), 0x204);
    assert_eq!(crs.pop(&ret_at(0x900)), 0x104);
}

#[test]
fn interleaved_push_pop() {
    let mut crs = Crs::new(8, 0);
    crs.push(&call_at(0x100));
    assert_eq!(crs.pop(&ret_at(0x900)), 0x104);
    crs.push(&call_at(0x200));
    assert_eq!(crs.pop(&ret_at(0x900)), 0x204);
}

// ══════════════════════════════════════════════════════════
// 2. Underflow
// ══════════════════════════════════════════════════════════

#[test]
fn pop_empty_returns_zero() {
    let mut crs = Crs::new(4, 0);
    assert_eq!(crs.pop(&ret_at(0x900)), 0, "underflow signals with 0");
}

#[test]
fn underflow_after_draining() {
    let mut crs = Crs::new(4, 0);
    crs.push(&call_at(0x100));
    assert_ne!(crs.pop(&ret_at(0x900)), 0);
    assert_eq!(crs.pop(&ret_at(0x900)), 0);
}

// ══════════════════════════════════════════════════════════
// 3. Recovery
// ══════════════════════════════════════════════════════════

#[test]
fn recover_restores_pointers() {
    let mut crs = Crs::new(8, 0);
    crs.push(&call_at(0x100));
    let info = snapshot(&crs);

    // Speculative path pushes two more calls and pops one.
    crs.push(&call_at(0x200));
    crs.push(&call_at(0x300));
    let _ = crs.pop(&ret_at(0x900));

    crs.recover(&info);
    assert_eq!(crs.depth, 1);
    assert_eq!(crs.pop(&ret_at(0x900)), 0x104);
}

#[test]
fn realistic_mode_replays_committed_entries() {
    let mut crs = Crs::new(8, 1);
    crs.push(&call_at(0x100)); // on-path
    let info = snapshot(&crs);

    // A wrong-path call overwrites only the speculative copy.
    let mut off_call = call_at(0x200);
    off_call.off_path = true;
    crs.push(&off_call);

    crs.recover(&info);
    assert_eq!(crs.pop(&ret_at(0x900)), 0x104);
}

// ══════════════════════════════════════════════════════════
// 4. Sync
// ══════════════════════════════════════════════════════════

#[test]
fn sync_copies_visible_state() {
    let mut src = Crs::new(8, 0);
    let mut dst = Crs::new(8, 0);
    src.push(&call_at(0x100));
    src.push(&call_at(0x200));

    dst.sync_from(&src);
    assert_eq!(dst.depth, 2);
    assert_eq!(dst.pop(&ret_at(0x900)), 0x204);
    assert_eq!(dst.pop(&ret_at(0x900)), 0x104);
}
