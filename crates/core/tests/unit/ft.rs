//! Fetch Target Tests.
//!
//! Verifies build-loop end conditions, static-info invariants, split
//! semantics, consecutivity rules, and predict-result idempotence.

use pretty_assertions::assert_eq;

use fetchsim_core::frontend::{InstDesc, VecFrontend};
use fetchsim_core::ft::{FtEndedBy, FtEvent};

use crate::common::{TestContext, alu_run};

// ══════════════════════════════════════════════════════════
// 1. End conditions
// ══════════════════════════════════════════════════════════

#[test]
fn taken_branch_ends_the_block() {
    let mut ctx = TestContext::new();
    let mut script = alu_run(1, 0x1000, 2);
    script.push(InstDesc::cbr(3, 0x1008, 4, 0x2000, true));
    script.extend(alu_run(4, 0x2000, 4));
    let mut fe = VecFrontend::new(script, 1);

    let ft = ctx.build_ft(&mut fe);
    let info = ft.get_ft_info();
    assert_eq!(info.dynamic_info.ended_by, FtEndedBy::TakenBranch);
    assert_eq!(info.static_info.start, 0x1000);
    assert_eq!(info.static_info.n_uops, 3);
    assert_eq!(info.static_info.length, 12, "last.pc + last.size - start");
    ft.destroy(&mut ctx.pool);
    assert_eq!(ctx.pool.active_ops(), 0);
}

#[test]
fn icache_line_boundary_ends_the_block() {
    let mut ctx = TestContext::new();
    // 20 straight-line 4-byte instructions: the block must stop at the
    // 64-byte line boundary after 16.
    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 20), 1);

    let ft = ctx.build_ft(&mut fe);
    let info = ft.get_ft_info();
    assert_eq!(info.dynamic_info.ended_by, FtEndedBy::IcacheLineBoundary);
    assert_eq!(info.static_info.n_uops, 16);
    assert_eq!(info.static_info.length, 64);
    ft.destroy(&mut ctx.pool);
}

#[test]
fn unaligned_start_still_ends_at_the_line_boundary() {
    let mut ctx = TestContext::new();
    // Starting mid-line: the boundary comes after 4 instructions.
    let mut fe = VecFrontend::new(alu_run(1, 0x1030, 8), 1);

    let ft = ctx.build_ft(&mut fe);
    let info = ft.get_ft_info();
    assert_eq!(info.dynamic_info.ended_by, FtEndedBy::IcacheLineBoundary);
    assert_eq!(info.static_info.n_uops, 4);
    ft.destroy(&mut ctx.pool);
}

#[test]
fn syscall_ends_the_block_as_a_fetch_barrier() {
    let mut ctx = TestContext::new();
    let mut script = alu_run(1, 0x1000, 2);
    script.push(InstDesc::sys(3, 0x1008, 4));
    script.extend(alu_run(4, 0x100C, 2));
    let mut fe = VecFrontend::new(script, 1);

    let ft = ctx.build_ft(&mut fe);
    assert_eq!(ft.get_ft_info().dynamic_info.ended_by, FtEndedBy::BarFetch);
    ft.destroy(&mut ctx.pool);
}

#[test]
fn exit_sentinel_ends_the_block() {
    let mut ctx = TestContext::new();
    let mut script = alu_run(1, 0x1000, 2);
    script.push(InstDesc::exit_marker(3, 0x1008, 4));
    let mut fe = VecFrontend::new(script, 1);

    let ft = ctx.build_ft(&mut fe);
    assert_eq!(ft.get_ft_info().dynamic_info.ended_by, FtEndedBy::AppExit);
    assert!(ft.ended_by_exit());
    ft.destroy(&mut ctx.pool);
}

// ══════════════════════════════════════════════════════════
// 2. Structural invariants
// ══════════════════════════════════════════════════════════

#[test]
fn ops_are_marked_with_their_block_start() {
    let mut ctx = TestContext::new();
    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 20), 1);

    let ft = ctx.build_ft(&mut fe);
    for &id in &ft.ops {
        assert_eq!(ctx.pool[id].ft_start, 0x1000);
        assert_eq!(ctx.pool[id].proc_id, 0);
    }
    ft.destroy(&mut ctx.pool);
}

#[test]
fn op_nums_are_strictly_monotonic() {
    let mut ctx = TestContext::new();
    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 20), 1);

    let ft = ctx.build_ft(&mut fe);
    let mut last = 0;
    for &id in &ft.ops {
        assert!(ctx.pool[id].op_num > last);
        last = ctx.pool[id].op_num;
    }
    ft.destroy(&mut ctx.pool);
}

// ══════════════════════════════════════════════════════════
// 3. Split
// ══════════════════════════════════════════════════════════

#[test]
fn split_moves_trailing_ops_into_a_valid_block() {
    let mut ctx = TestContext::new();
    let mut script = alu_run(1, 0x1000, 4);
    script.push(InstDesc::cbr(5, 0x1010, 4, 0x2000, true));
    script.extend(alu_run(6, 0x2000, 2));
    let mut fe = VecFrontend::new(script, 1);

    let mut ft = ctx.build_ft(&mut fe);
    assert_eq!(ft.ops.len(), 5);

    let (needs_rebuild, trailing) = {
        let cfg = ctx.cfg.clone();
        ft.split_ft(2, &mut ctx.pool, &cfg, &mut ctx.ft_ids)
    };
    // The front keeps ops 0..=2 and no longer satisfies an end
    // condition; the trailing block still ends at the taken branch.
    assert!(needs_rebuild);
    assert_eq!(ft.ops.len(), 3);
    assert_eq!(trailing.ops.len(), 2);
    assert_eq!(trailing.get_start_addr(), 0x100C);
    assert_eq!(
        trailing.get_ft_info().dynamic_info.ended_by,
        FtEndedBy::TakenBranch
    );

    ft.destroy(&mut ctx.pool);
    trailing.destroy(&mut ctx.pool);
    assert_eq!(ctx.pool.active_ops(), 0);
}

#[test]
fn split_at_the_last_op_yields_an_empty_trailing_block() {
    let mut ctx = TestContext::new();
    let mut script = alu_run(1, 0x1000, 2);
    script.push(InstDesc::cbr(3, 0x1008, 4, 0x2000, true));
    let mut fe = VecFrontend::new(script, 1);

    let mut ft = ctx.build_ft(&mut fe);
    let (needs_rebuild, trailing) = {
        let cfg = ctx.cfg.clone();
        ft.split_ft(2, &mut ctx.pool, &cfg, &mut ctx.ft_ids)
    };
    assert!(!needs_rebuild, "the block still ends at the taken branch");
    assert!(!trailing.has_unread_ops());
    assert_eq!(ft.ops.len(), 3);

    ft.destroy(&mut ctx.pool);
    trailing.destroy(&mut ctx.pool);
}

// ══════════════════════════════════════════════════════════
// 4. Consecutivity
// ══════════════════════════════════════════════════════════

#[test]
fn fall_through_blocks_are_consecutive() {
    let mut ctx = TestContext::new();
    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 32), 1);

    let first = ctx.build_ft(&mut fe);
    let second = ctx.build_ft(&mut fe);
    assert!(second.is_consecutive(&first, &ctx.pool));
    assert!(
        !first.is_consecutive(&second, &ctx.pool),
        "consecutivity is directional"
    );
    first.destroy(&mut ctx.pool);
    second.destroy(&mut ctx.pool);
}

#[test]
fn taken_branch_blocks_connect_through_the_target() {
    let mut ctx = TestContext::new();
    let mut script = alu_run(1, 0x1000, 2);
    script.push(InstDesc::cbr(3, 0x1008, 4, 0x2000, true));
    script.extend(alu_run(4, 0x2000, 16));
    let mut fe = VecFrontend::new(script, 1);

    let first = ctx.build_ft(&mut fe);
    let second = ctx.build_ft(&mut fe);
    assert_eq!(second.get_start_addr(), 0x2000);
    assert!(second.is_consecutive(&first, &ctx.pool));
    first.destroy(&mut ctx.pool);
    second.destroy(&mut ctx.pool);
}

// ══════════════════════════════════════════════════════════
// 5. Prediction
// ══════════════════════════════════════════════════════════

#[test]
fn predict_ft_flags_a_btb_missing_unconditional_branch() {
    let mut ctx = TestContext::new();
    let mut script = alu_run(1, 0x1000, 2);
    script.push(InstDesc::br(3, 0x1008, 4, 0x2000));
    let mut fe = VecFrontend::new(script, 1);

    let ft = ctx.build_ft(&mut fe);
    let result = ft.predict_ft(
        &mut ctx.pool,
        &mut ctx.bp,
        &ctx.cfg,
        1,
        &mut ctx.stats,
        true,
    );
    assert_eq!(result.event, FtEvent::Mispredict);
    assert_eq!(result.index, 2);
    assert_eq!(result.pred_addr, 0x100C, "forced not-taken falls through");
    ft.destroy(&mut ctx.pool);
}

#[test]
fn predict_ft_is_idempotent_without_intervening_mutation() {
    let mut ctx = TestContext::new();
    let mut script = alu_run(1, 0x1000, 2);
    script.push(InstDesc::br(3, 0x1008, 4, 0x2000));
    let mut fe = VecFrontend::new(script, 1);

    let ft = ctx.build_ft(&mut fe);
    let first = ft.predict_ft(
        &mut ctx.pool,
        &mut ctx.bp,
        &ctx.cfg,
        1,
        &mut ctx.stats,
        true,
    );
    let second = ft.predict_ft(
        &mut ctx.pool,
        &mut ctx.bp,
        &ctx.cfg,
        2,
        &mut ctx.stats,
        true,
    );
    assert_eq!(first.event, second.event);
    assert_eq!(first.index, second.index);
    assert_eq!(first.op, second.op);
    assert_eq!(first.pred_addr, second.pred_addr);
    ft.destroy(&mut ctx.pool);
}

#[test]
fn predict_ft_returns_none_on_a_clean_block() {
    let mut ctx = TestContext::new();
    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 20), 1);

    let ft = ctx.build_ft(&mut fe);
    let result = ft.predict_ft(
        &mut ctx.pool,
        &mut ctx.bp,
        &ctx.cfg,
        1,
        &mut ctx.stats,
        true,
    );
    assert_eq!(result.event, FtEvent::None);
    ft.destroy(&mut ctx.pool);
}

// ══════════════════════════════════════════════════════════
// 6. Read cursor
// ══════════════════════════════════════════════════════════

#[test]
fn destroy_frees_only_unconsumed_ops() {
    let mut ctx = TestContext::new();
    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 16), 1);

    let mut ft = ctx.build_ft(&mut fe);
    assert_eq!(ctx.pool.active_ops(), 16);

    // Hand two ops downstream; the consumer owns their lifetime now.
    let a = ft.fetch_op();
    let b = ft.fetch_op();
    ft.destroy(&mut ctx.pool);
    assert_eq!(ctx.pool.active_ops(), 2);

    ctx.pool.free(a);
    ctx.pool.free(b);
    assert_eq!(ctx.pool.active_ops(), 0);
}
