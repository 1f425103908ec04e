//! Decoupled Front-End Tests.
//!
//! Drives a DFE directly through its per-cycle update, checking FTQ
//! production quotas, iterator arithmetic, and pop adjustment.

use pretty_assertions::assert_eq;

use fetchsim_core::bp::BpRecoveryInfo;
use fetchsim_core::config::Config;
use fetchsim_core::dfe::{Dfe, DfeCtx, DfeState};
use fetchsim_core::frontend::{InstDesc, VecFrontend};
use fetchsim_core::ft::FtIdAlloc;
use fetchsim_core::op::OpPool;
use fetchsim_core::stats::CoreStats;

use crate::common::alu_run;

/// Standalone DFE harness: one primary DFE over a scripted frontend.
struct DfeHarness {
    cfg: Config,
    dfe: Dfe,
    frontend: VecFrontend,
    pool: OpPool,
    ft_ids: FtIdAlloc,
    stats: CoreStats,
    recovery: BpRecoveryInfo,
    fwd_progress: u64,
    cycle: u64,
}

impl DfeHarness {
    fn new(script: Vec<InstDesc>) -> Self {
        Self::with_config(script, Config::default())
    }

    fn with_config(script: Vec<InstDesc>, cfg: Config) -> Self {
        let dfe = Dfe::new(0, 0, &cfg);
        Self {
            cfg,
            dfe,
            frontend: VecFrontend::new(script, 1),
            pool: OpPool::new(),
            ft_ids: FtIdAlloc::default(),
            stats: CoreStats::default(),
            recovery: BpRecoveryInfo::new(0),
            fwd_progress: 0,
            cycle: 0,
        }
    }

    fn update(&mut self) {
        self.cycle += 1;
        let mut ctx = DfeCtx {
            frontend: &mut self.frontend,
            pool: &mut self.pool,
            conf: None,
            ft_ids: &mut self.ft_ids,
            stats: &mut self.stats,
            recovery: &mut self.recovery,
            cfg: &self.cfg,
            cycle: self.cycle,
            fwd_progress: &mut self.fwd_progress,
        };
        self.dfe.update(&mut ctx, &mut []);
    }
}

/// A script whose exit sentinel keeps the frontend from running dry.
fn straight_line_script(insts: u64) -> Vec<InstDesc> {
    let mut script = alu_run(1, 0x1000, insts);
    script.push(InstDesc::exit_marker(insts + 1, 0x1000 + insts * 4, 4));
    script
}

// ══════════════════════════════════════════════════════════
// 1. Production quotas
// ══════════════════════════════════════════════════════════

#[test]
fn ft_per_cycle_quota_limits_production() {
    let mut h = DfeHarness::new(straight_line_script(1024));
    h.update();
    // Straight-line code: 4 line-boundary blocks per cycle at most.
    assert_eq!(h.dfe.ftq_num_fts(), 4);
    assert_eq!(h.stats.fetch.ftq_break_max_ft, 1);
    assert_eq!(h.dfe.ftq_num_ops(), 64);
}

#[test]
fn production_fills_up_to_the_ftq_bound() {
    let mut h = DfeHarness::new(straight_line_script(16 * 64));
    for _ in 0..16 {
        h.update();
    }
    assert_eq!(h.dfe.ftq_num_fts(), h.dfe.ftq_max_size());
    assert!(h.stats.fetch.ftq_break_full_ft > 0);
}

#[test]
fn taken_cf_quota_limits_production() {
    let mut cfg = Config::default();
    cfg.bp.perfect_bp = true;
    // Chained taken branches whose targets are their own fall-throughs:
    // BTB misses are rescued, so every block stays on path.
    let mut script: Vec<InstDesc> = (0..32)
        .map(|i| InstDesc::cbr(i + 1, 0x1000 + i * 4, 4, 0x1004 + i * 4, true))
        .collect();
    script.push(InstDesc::exit_marker(100, 0x1080, 4));
    let mut h = DfeHarness::with_config(script, cfg);
    h.update();
    assert_eq!(
        h.dfe.ftq_num_fts(),
        2,
        "two taken cf ops per cycle at most"
    );
    assert_eq!(h.stats.fetch.ftq_break_max_cfs_taken, 1);
}

#[test]
fn exit_block_parks_the_dfe() {
    let mut h = DfeHarness::new(straight_line_script(4));
    h.update();
    assert_eq!(h.dfe.state(), DfeState::Inactive);
    h.update();
    assert_eq!(h.dfe.state(), DfeState::Inactive, "stays inactive at exit");
}

// ══════════════════════════════════════════════════════════
// 2. Iterators
// ══════════════════════════════════════════════════════════

#[test]
fn iterator_walks_the_flattened_queue() {
    let mut h = DfeHarness::new(straight_line_script(64));
    h.update();
    let iter = h.dfe.new_ftq_iter();

    let mut end_of_ft = false;
    let mut seen = 0;
    let mut last_op_num = 0;
    let mut ft_ends = 0;
    let mut op = h.dfe.ftq_iter_get(iter, &mut end_of_ft);
    while let Some(id) = op {
        seen += 1;
        if end_of_ft {
            ft_ends += 1;
        }
        assert!(h.pool[id].op_num > last_op_num);
        last_op_num = h.pool[id].op_num;
        op = h.dfe.ftq_iter_get_next(iter, &mut end_of_ft);
    }
    assert_eq!(seen, h.dfe.ftq_num_ops());
    assert_eq!(ft_ends, h.dfe.ftq_num_fts());
    assert_eq!(h.dfe.ftq_iter_offset(iter), seen);
}

#[test]
fn pop_adjusts_registered_iterators() {
    let mut h = DfeHarness::new(straight_line_script(64));
    h.update();
    let iter = h.dfe.new_ftq_iter();

    // Advance the iterator into the second block.
    let mut end_of_ft = false;
    for _ in 0..20 {
        let _ = h.dfe.ftq_iter_get_next(iter, &mut end_of_ft);
    }
    assert_eq!(h.dfe.ftq_iter_ft_offset(iter), 1);
    assert_eq!(h.dfe.ftq_iter_offset(iter), 20);

    let before = h.dfe.ftq_iter_get(iter, &mut end_of_ft);
    let popped = h.dfe.pop_ft().expect("queue has blocks");
    assert_eq!(
        h.dfe.ftq_iter_offset(iter),
        20 - popped.ops.len(),
        "offset shrinks by the popped block's ops"
    );
    assert_eq!(h.dfe.ftq_iter_ft_offset(iter), 0);
    let after = h.dfe.ftq_iter_get(iter, &mut end_of_ft);
    assert_eq!(before, after, "the iterator still points at the same op");
    popped.destroy(&mut h.pool);
}

#[test]
fn iterator_on_empty_queue_returns_none() {
    let mut h = DfeHarness::new(straight_line_script(64));
    let iter = h.dfe.new_ftq_iter();
    let mut end_of_ft = false;
    assert!(h.dfe.ftq_iter_get(iter, &mut end_of_ft).is_none());
}

// ══════════════════════════════════════════════════════════
// 3. Pop
// ══════════════════════════════════════════════════════════

#[test]
fn pop_returns_blocks_in_order() {
    let mut h = DfeHarness::new(straight_line_script(64));
    h.update();
    let first = h.dfe.pop_ft().unwrap();
    let second = h.dfe.pop_ft().unwrap();
    assert!(second.get_start_addr() > first.get_start_addr());
    assert_eq!(second.get_start_addr(), 0x1040);
    first.destroy(&mut h.pool);
    second.destroy(&mut h.pool);
}

#[test]
fn pop_on_empty_queue_is_none() {
    let mut h = DfeHarness::new(straight_line_script(64));
    assert!(h.dfe.pop_ft().is_none());
}
