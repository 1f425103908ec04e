//! Decoupled front-end (DFE) state machine.
//!
//! Each core runs one DFE per predictor instance. The primary DFE
//! (bp 0) drives architectural fetch; secondaries explore alternate
//! predictions for comparative studies. A DFE owns its fetch target
//! queue and its predictor state, produces FTs speculatively every
//! cycle, redirects itself onto the wrong path at predicted
//! mispredictions, and recovers when the back end resolves them.

use std::collections::VecDeque;

use crate::bp::{BpData, BpRecoveryInfo, bp_sync};
use crate::common::Addr;
use crate::config::{Config, RecoveryPolicy};
use crate::confidence::{Conf, OffPathReason};
use crate::frontend::Frontend;
use crate::ft::{Ft, FtBuildEnv, FtEndedBy, FtEvent, FtIdAlloc, FtPredictResult};
use crate::op::{CfType, OpId, OpPool};
use crate::stats::CoreStats;

/// Update cycles without primary-DFE progress before the simulation is
/// declared live-locked.
const FWD_PROGRESS_LIMIT: u64 = 1_000_000;

/// FSM states of a DFE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfeState {
    /// Idle until re-activated by a recovery (or permanently, at exit).
    Inactive,
    /// Normal production on the architectural path.
    ServingOnPath,
    /// Producing wrong-path fetch targets after a predicted mispredict.
    ServingOffPath,
    /// Consuming the saved recovery fetch target after a recovery.
    Recovering,
}

/// Registered FTQ read position.
///
/// Iterators are adjusted when the head FT is consumed and reset to zero
/// on flushes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtqIter {
    /// FT index from the FTQ head.
    pub ft_pos: usize,
    /// Op index within that FT.
    pub op_pos: usize,
    /// Op index as if the FTQ were one flat array.
    pub flattened_op_pos: usize,
}

/// Per-core resources a DFE update borrows from its core.
pub struct DfeCtx<'a> {
    /// Instruction source.
    pub frontend: &'a mut dyn Frontend,
    /// Op storage.
    pub pool: &'a mut OpPool,
    /// Confidence estimator (primary DFE only).
    pub conf: Option<&'a mut Conf>,
    /// Fetch target id generator.
    pub ft_ids: &'a mut FtIdAlloc,
    /// Per-core statistics.
    pub stats: &'a mut CoreStats,
    /// Per-core recovery latch.
    pub recovery: &'a mut BpRecoveryInfo,
    /// Simulation configuration.
    pub cfg: &'a Config,
    /// Current cycle.
    pub cycle: u64,
    /// Forward-progress guard counter.
    pub fwd_progress: &'a mut u64,
}

impl std::fmt::Debug for DfeCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DfeCtx")
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

/// One decoupled front-end instance.
#[derive(Debug)]
pub struct Dfe {
    proc_id: u32,
    bp_id: u32,
    /// Predictor state owned by this instance.
    pub bp: BpData,
    recovery_policy: RecoveryPolicy,
    ftq: VecDeque<Ft>,
    current_ft: Option<Ft>,
    saved_recovery_ft: Option<Ft>,
    iters: Vec<FtqIter>,
    conf_off_path: bool,
    stalled: bool,
    exit_on_off_path: bool,
    op_num: u64,
    off_path_op_num: u64,
    recovery_addr: Addr,
    redirect_cycle: u64,
    ftq_ft_num: usize,
    state: DfeState,
    next_state: DfeState,
}

impl Dfe {
    /// Creates a DFE. The primary instance starts producing immediately;
    /// secondaries start inactive.
    pub fn new(proc_id: u32, bp_id: u32, cfg: &Config) -> Self {
        let state = if bp_id == 0 {
            DfeState::ServingOnPath
        } else {
            DfeState::Inactive
        };
        Self {
            proc_id,
            bp_id,
            bp: BpData::new(proc_id, bp_id, &cfg.bp),
            recovery_policy: cfg.recovery_policy(bp_id as usize),
            ftq: VecDeque::new(),
            current_ft: None,
            saved_recovery_ft: None,
            iters: Vec::new(),
            conf_off_path: false,
            stalled: false,
            exit_on_off_path: false,
            op_num: 1,
            off_path_op_num: 0,
            recovery_addr: 0,
            redirect_cycle: 0,
            ftq_ft_num: cfg.fetch.ftq_block_num,
            state,
            next_state: state,
        }
    }

    /// Core this instance belongs to.
    pub fn proc_id(&self) -> u32 {
        self.proc_id
    }

    /// Predictor instance id.
    pub fn bp_id(&self) -> u32 {
        self.bp_id
    }

    /// Current FSM state.
    pub fn state(&self) -> DfeState {
        self.state
    }

    /// Configured recovery policy.
    pub fn recovery_policy(&self) -> RecoveryPolicy {
        self.recovery_policy
    }

    /// Whether this DFE is serving the wrong path.
    pub fn is_off_path(&self) -> bool {
        self.state == DfeState::ServingOffPath
    }

    /// Whether fetch is stalled behind an unresolved barrier.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// FTQ capacity in fetch targets.
    pub fn ftq_max_size(&self) -> usize {
        self.ftq_ft_num
    }

    /// Overrides the FTQ capacity.
    pub fn set_ftq_num(&mut self, ftq_ft_num: usize) {
        self.ftq_ft_num = ftq_ft_num;
    }

    /// Number of fetch targets in the FTQ.
    pub fn ftq_num_fts(&self) -> usize {
        self.ftq.len()
    }

    /// Total ops across all queued fetch targets.
    pub fn ftq_num_ops(&self) -> usize {
        self.ftq.iter().map(|ft| ft.ops.len()).sum()
    }

    /// Next on-path op number.
    pub fn next_on_path_op_num(&mut self) -> u64 {
        let n = self.op_num;
        self.op_num += 1;
        n
    }

    /// Next off-path op number.
    pub fn next_off_path_op_num(&mut self) -> u64 {
        let n = self.off_path_op_num;
        self.off_path_op_num += 1;
        n
    }

    /// Last op this DFE fetched, from the in-flight FT or the FTQ tail.
    ///
    /// Can be `None` if fetch stalled behind a barrier with nothing
    /// queued.
    pub fn last_fetch_op(&self) -> Option<OpId> {
        if let Some(ft) = &self.current_ft {
            if let Some(&id) = ft.ops.last() {
                return Some(id);
            }
        }
        self.ftq.back().map(|ft| ft.get_last_op())
    }

    /// Produces fetch targets for this cycle.
    ///
    /// `secondaries` holds the other DFE instances of the core when this
    /// is the primary (used to fan out redirects under
    /// `ContinueOnPrediction`); it is empty for secondaries.
    pub fn update(&mut self, ctx: &mut DfeCtx<'_>, secondaries: &mut [Dfe]) {
        let mut cfs_taken_this_cycle = 0u64;
        let mut ft_pushed_this_cycle = 0u64;

        if self.bp_id == 0 {
            // An inactive primary has legitimately finished; only stalled
            // production counts toward the live-lock guard.
            if self.next_state != DfeState::Inactive {
                *ctx.fwd_progress += 1;
            }
            assert!(
                *ctx.fwd_progress < FWD_PROGRESS_LIMIT,
                "no forward progress for {FWD_PROGRESS_LIMIT} cycles (core {})",
                self.proc_id
            );
            if self.is_off_path() {
                ctx.stats.fetch.ftq_cycles_offpath += 1;
            } else {
                ctx.stats.fetch.ftq_cycles_onpath += 1;
            }
            if let Some(conf) = ctx.conf.as_deref_mut() {
                conf.per_cycle_update(ctx.cycle);
            }
        }

        loop {
            self.state = self.next_state;
            assert!(self.ftq.len() <= self.ftq_max_size());
            assert!(cfs_taken_this_cycle <= ctx.cfg.fetch.taken_cfs_per_cycle);

            if self.ftq.len() == self.ftq_max_size() {
                tracing::debug!(bp_id = self.bp_id, "break due to full FTQ");
                ctx.stats.fetch.ftq_break_full_ft += 1;
                break;
            }
            if cfs_taken_this_cycle >= ctx.cfg.fetch.taken_cfs_per_cycle {
                ctx.stats.fetch.ftq_break_max_cfs_taken += 1;
                break;
            }
            if ft_pushed_this_cycle >= ctx.cfg.fetch.ft_per_cycle {
                ctx.stats.fetch.ftq_break_max_ft += 1;
                break;
            }
            if !self.bp.is_predictable() {
                ctx.stats.fetch.ftq_break_pred_br += 1;
                break;
            }
            if self.stalled {
                assert!(ctx.frontend.is_exec_driven());
                tracing::debug!("break waiting for fetch barrier to resolve");
                ctx.stats.fetch.ftq_break_bar_fetch += 1;
                break;
            }

            if self.bp_id == 0 {
                *ctx.fwd_progress = 0;
            }

            let trace_mode = !ctx.frontend.is_exec_driven();
            match self.state {
                DfeState::Inactive => return,
                DfeState::Recovering => {
                    // Serve the saved recovery fetch target.
                    self.next_state = DfeState::ServingOnPath;
                    let ft = self
                        .saved_recovery_ft
                        .take()
                        .expect("recovering without a saved fetch target");
                    let result = ft.predict_ft(
                        ctx.pool,
                        &mut self.bp,
                        ctx.cfg,
                        ctx.cycle,
                        ctx.stats,
                        trace_mode,
                    );
                    self.current_ft = Some(ft);
                    if self.current_ft.as_ref().unwrap().ended_by_exit() {
                        // The very last simulated FT must not recover.
                        self.current_ft
                            .as_ref()
                            .unwrap()
                            .clear_recovery_info(ctx.pool);
                        self.check_consecutivity_and_push_to_ftq(ctx);
                        self.next_state = DfeState::Inactive;
                        return;
                    }
                    if result.event == FtEvent::FetchBarrier && ctx.frontend.is_exec_driven() {
                        self.stall(ctx, result.op);
                    } else if result.event == FtEvent::Mispredict {
                        self.redirect_to_off_path(ctx, result, secondaries);
                    }
                }
                DfeState::ServingOnPath => {
                    let mut ft = Ft::new(self.proc_id, self.bp_id, ctx.ft_ids);
                    assert!(!ft.has_unread_ops());
                    let build_event = {
                        let mut env = FtBuildEnv {
                            frontend: &mut *ctx.frontend,
                            pool: &mut *ctx.pool,
                            bp: &mut self.bp,
                            cfg: ctx.cfg,
                            stats: &mut *ctx.stats,
                            cycle: ctx.cycle,
                        };
                        let op_num = &mut self.op_num;
                        ft.build(&mut env, false, self.conf_off_path, &mut || {
                            let n = *op_num;
                            *op_num += 1;
                            n
                        })
                    };
                    assert_ne!(build_event, FtEvent::BuildFail);
                    ft.set_prebuilt(true);
                    let result = ft.predict_ft(
                        ctx.pool,
                        &mut self.bp,
                        ctx.cfg,
                        ctx.cycle,
                        ctx.stats,
                        trace_mode,
                    );
                    self.current_ft = Some(ft);
                    if self.current_ft.as_ref().unwrap().ended_by_exit() {
                        self.current_ft
                            .as_ref()
                            .unwrap()
                            .clear_recovery_info(ctx.pool);
                        self.check_consecutivity_and_push_to_ftq(ctx);
                        self.next_state = DfeState::Inactive;
                        return;
                    }
                    if result.event == FtEvent::FetchBarrier && ctx.frontend.is_exec_driven() {
                        self.stall(ctx, result.op);
                    } else if result.event == FtEvent::Mispredict {
                        self.redirect_to_off_path(ctx, result, secondaries);
                    }
                }
                DfeState::ServingOffPath => {
                    // Wrong-path blocks are predicted while building; any
                    // taken prediction just redirects the frontend.
                    if self.exit_on_off_path {
                        return;
                    }
                    let mut ft = Ft::new(self.proc_id, self.bp_id, ctx.ft_ids);
                    assert!(!ft.has_unread_ops());
                    while ft.get_end_reason(ctx.pool, ctx.cfg) == FtEndedBy::NotEnded {
                        let build_event = {
                            let mut env = FtBuildEnv {
                                frontend: &mut *ctx.frontend,
                                pool: &mut *ctx.pool,
                                bp: &mut self.bp,
                                cfg: ctx.cfg,
                                stats: &mut *ctx.stats,
                                cycle: ctx.cycle,
                            };
                            let off_num = &mut self.off_path_op_num;
                            ft.build(&mut env, true, self.conf_off_path, &mut || {
                                let n = *off_num;
                                *off_num += 1;
                                n
                            })
                        };
                        assert_ne!(build_event, FtEvent::BuildFail);
                        if ft.ended_by_exit() {
                            ft.clear_recovery_info(ctx.pool);
                            self.current_ft = Some(ft);
                            self.check_consecutivity_and_push_to_ftq(ctx);
                            self.next_state = DfeState::Inactive;
                            self.exit_on_off_path = true;
                            return;
                        }
                        if build_event == FtEvent::Mispredict
                            || build_event == FtEvent::OffpathTakenRedirect
                        {
                            let last = ft.get_last_op();
                            let (uid, npc) = {
                                let op = &ctx.pool[last];
                                (op.inst_uid, op.bp_pred_info.pred_npc)
                            };
                            ctx.frontend.redirect(self.proc_id, self.bp_id, uid, npc);
                        } else if build_event == FtEvent::FetchBarrier
                            && ctx.frontend.is_exec_driven()
                        {
                            let last = ft.get_last_op();
                            self.stall(ctx, Some(last));
                        }
                    }
                    self.current_ft = Some(ft);
                }
            }

            if self.is_off_path() {
                ctx.stats.fetch.dfe_gen_off_path_ft += 1;
            } else {
                ctx.stats.fetch.dfe_gen_on_path_ft += 1;
            }
            self.check_consecutivity_and_push_to_ftq(ctx);
            let ended_by = self
                .ftq
                .back()
                .unwrap()
                .get_ft_info()
                .dynamic_info
                .ended_by;
            cfs_taken_this_cycle +=
                u64::from(ended_by == FtEndedBy::TakenBranch || ended_by == FtEndedBy::BarFetch);
            ft_pushed_this_cycle += 1;
        }
    }

    /// Validates consecutivity against the FTQ tail and pushes the
    /// current fetch target.
    fn check_consecutivity_and_push_to_ftq(&mut self, ctx: &mut DfeCtx<'_>) {
        let ft = self
            .current_ft
            .take()
            .expect("no fetch target ready to push");
        if let Some(tail) = self.ftq.back() {
            assert!(
                ft.is_consecutive(tail, ctx.pool),
                "proc {}: non-consecutive fetch target pushed onto FTQ",
                self.proc_id
            );
        }
        if self.bp_id == 0 {
            if let Some(conf) = ctx.conf.as_deref_mut() {
                conf.update(&ft, ctx.pool);
            }
            if self.recovery_addr != 0 {
                assert_eq!(self.recovery_addr, ft.get_start_addr());
                self.recovery_addr = 0;
            }
        }
        self.ftq.push_back(ft);
    }

    /// Splits the current fetch target at a predicted mispredict and
    /// switches to wrong-path production.
    fn redirect_to_off_path(
        &mut self,
        ctx: &mut DfeCtx<'_>,
        result: FtPredictResult,
        secondaries: &mut [Dfe],
    ) {
        assert_eq!(result.event, FtEvent::Mispredict);
        let mispred_op = result.op.expect("mispredict event carries its op");
        let mut cur = self.current_ft.take().expect("mispredict without an FT");

        let (_needs_rebuild, trailing) = cur.split_ft(result.index, ctx.pool, ctx.cfg, ctx.ft_ids);
        if trailing.has_unread_ops() {
            self.saved_recovery_ft = Some(trailing);
        } else {
            // The mispredict hit the last op of the block: prefetch one
            // fresh on-path FT as the future recovery target.
            let mut saved = Ft::new(self.proc_id, self.bp_id, ctx.ft_ids);
            let build_event = {
                let mut env = FtBuildEnv {
                    frontend: &mut *ctx.frontend,
                    pool: &mut *ctx.pool,
                    bp: &mut self.bp,
                    cfg: ctx.cfg,
                    stats: &mut *ctx.stats,
                    cycle: ctx.cycle,
                };
                let op_num = &mut self.op_num;
                saved.build(&mut env, false, self.conf_off_path, &mut || {
                    let n = *op_num;
                    *op_num += 1;
                    n
                })
            };
            assert_ne!(build_event, FtEvent::BuildFail);
            self.saved_recovery_ft = Some(saved);
        }
        self.saved_recovery_ft.as_mut().unwrap().set_prebuilt(true);
        self.redirect_cycle = ctx.cycle;
        self.next_state = DfeState::ServingOffPath;
        let uid = ctx.pool[mispred_op].inst_uid;
        ctx.frontend
            .redirect(self.proc_id, self.bp_id, uid, result.pred_addr);

        if self.bp_id == 0 {
            let reason = self.eval_off_path_reason(ctx.pool, mispred_op, ctx.cfg);
            if let Some(conf) = ctx.conf.as_deref_mut() {
                conf.set_off_path(reason);
            }
            for sec in secondaries.iter_mut() {
                if sec.recovery_policy == RecoveryPolicy::ContinueOnPrediction
                    && !sec.is_off_path()
                {
                    assert_eq!(sec.ftq_num_fts(), 0);
                    // Compute this predictor's own take on the
                    // mispredicting op and chase that path instead.
                    let mut alt_op = ctx.pool[mispred_op].clone();
                    alt_op.bp_pred_info = Default::default();
                    alt_op.btb_pred_info = Default::default();
                    let alt_addr = alt_op.addr;
                    let alt_pred = sec.bp.predict_op(
                        &mut alt_op,
                        0,
                        alt_addr,
                        &ctx.cfg.bp,
                        ctx.cycle,
                        &mut ctx.stats.bp,
                    );
                    ctx.frontend
                        .redirect(self.proc_id, sec.bp_id, alt_op.inst_uid, alt_pred);
                    sec.next_state = DfeState::ServingOffPath;
                    sec.conf_off_path = true;
                    bp_sync(&self.bp, &mut sec.bp);
                }
            }
        }

        // Off-path numbering starts right after the redirecting op.
        self.off_path_op_num = ctx.pool[cur.get_last_op()].op_num + 1;

        // Patch the remainder of the current block with wrong-path ops.
        while cur.get_end_reason(ctx.pool, ctx.cfg) == FtEndedBy::NotEnded {
            let build_event = {
                let mut env = FtBuildEnv {
                    frontend: &mut *ctx.frontend,
                    pool: &mut *ctx.pool,
                    bp: &mut self.bp,
                    cfg: ctx.cfg,
                    stats: &mut *ctx.stats,
                    cycle: ctx.cycle,
                };
                let off_num = &mut self.off_path_op_num;
                cur.build(&mut env, true, self.conf_off_path, &mut || {
                    let n = *off_num;
                    *off_num += 1;
                    n
                })
            };
            assert_ne!(build_event, FtEvent::BuildFail);
            if build_event == FtEvent::Mispredict || build_event == FtEvent::OffpathTakenRedirect {
                let last = cur.get_last_op();
                let (uid, npc) = {
                    let op = &ctx.pool[last];
                    (op.inst_uid, op.bp_pred_info.pred_npc)
                };
                ctx.frontend.redirect(self.proc_id, self.bp_id, uid, npc);
            } else if build_event == FtEvent::FetchBarrier && ctx.frontend.is_exec_driven() {
                let last = cur.get_last_op();
                self.stall(ctx, Some(last));
            }
        }
        if cur.ended_by_exit() {
            self.next_state = DfeState::Inactive;
            self.exit_on_off_path = true;
        }
        assert_ne!(cur.get_end_reason(ctx.pool, ctx.cfg), FtEndedBy::NotEnded);
        self.current_ft = Some(cur);
    }

    /// Classifies why the given flushing op drove fetch off the path.
    pub fn eval_off_path_reason(
        &self,
        pool: &OpPool,
        op_id: OpId,
        cfg: &Config,
    ) -> OffPathReason {
        let op = &pool[op_id];
        if !op.is_flushing() {
            return OffPathReason::NotIdentified;
        }
        let pred_info = &op.bp_pred_info;
        let btb_info = &op.btb_pred_info;
        if pred_info.pred_orig != op.oracle.dir && !btb_info.btb_miss {
            OffPathReason::Mispred
        } else if !btb_info.btb_miss
            && pred_info.pred_orig == op.oracle.dir
            && pred_info.pred_npc != op.oracle.npc
        {
            OffPathReason::Misfetch
        } else if cfg.bp.enable_ibp
            && op.cf_type.is_indirect()
            && btb_info.btb_miss
            && btb_info.ibp_miss
            && pred_info.pred_orig
        {
            OffPathReason::IbtbMiss
        } else if pred_info.pred_orig != op.oracle.dir && btb_info.btb_miss {
            OffPathReason::BtbMissMispred
        } else if btb_info.btb_miss {
            OffPathReason::BtbMiss
        } else {
            unreachable!(
                "proc {} op {}: off-path reason cases are exhaustive",
                op.proc_id, op.op_num
            )
        }
    }

    /// Flushes the FTQ back to the recovery point.
    fn dfe_recover_op(&mut self, ctx: &mut DfeCtx<'_>) {
        self.conf_off_path = false;
        self.recovery_addr = ctx.recovery.recovery_fetch_addr;

        // Defensive scan: look for the flushing op inside the FTQ. The
        // normal path never finds it (the op was already consumed), so
        // the whole FTQ is erased.
        let mut found_recovery_ft = false;
        let mut recovery_op_is_last = false;
        let mut erase_from = 0usize;
        'outer: for (ft_idx, ft) in self.ftq.iter().enumerate() {
            for (op_idx, &id) in ft.ops.iter().enumerate() {
                if ctx.pool[id].unique_num == ctx.recovery.recovery_unique_num {
                    found_recovery_ft = true;
                    recovery_op_is_last = op_idx == ft.ops.len() - 1;
                    erase_from = if recovery_op_is_last {
                        ft_idx + 1
                    } else {
                        ft_idx
                    };
                    break 'outer;
                }
            }
        }

        // Discard the in-flight block along with the queued ones.
        if let Some(cur) = self.current_ft.take() {
            cur.destroy(ctx.pool);
        }
        while self.ftq.len() > erase_from {
            let ft = self.ftq.pop_back().unwrap();
            ft.destroy(ctx.pool);
        }

        if found_recovery_ft && !recovery_op_is_last {
            let saved = self
                .saved_recovery_ft
                .as_mut()
                .expect("mid-FT recovery requires a saved fetch target");
            assert!(!saved.ops.is_empty());
            saved.rewind();
            saved.generate_ft_info(ctx.pool, ctx.cfg);
        }
        // Early recovery is not supported: the flush point must never be
        // found inside the FTQ.
        assert!(!found_recovery_ft);

        tracing::debug!(
            bp_id = self.bp_id,
            fetch_addr = format_args!("{:#x}", ctx.recovery.recovery_fetch_addr),
            recovery_op_num = ctx.recovery.recovery_op_num,
            "recovery signalled"
        );

        // The FTQ flushed: reset every registered iterator.
        for iter in &mut self.iters {
            *iter = FtqIter::default();
        }

        if self.bp_id == 0 {
            let op_id = ctx.recovery.recovery_op.expect("latched recovery has op");
            let op = &ctx.pool[op_id];
            if op.bp_pred_info.recover_at_decode {
                ctx.stats.fetch.ftq_recover_decode += 1;
            } else if op.bp_pred_info.recover_at_exec {
                ctx.stats.fetch.ftq_recover_exec += 1;
            }

            assert!(ctx.cycle > self.redirect_cycle);
            ctx.stats.fetch.ftq_offpath_cycles += ctx.cycle - self.redirect_cycle;

            ctx.frontend
                .recover(self.proc_id, self.bp_id, ctx.recovery.recovery_inst_uid);
            if let Some(conf) = ctx.conf.as_deref_mut() {
                conf.recover(&ctx.pool[op_id]);
            }
        }
        self.redirect_cycle = 0;
    }

    /// Handles a back-end recovery for this DFE.
    ///
    /// `primary` is the core's primary DFE when this instance is a
    /// secondary; it supplies the predictor state to sync from.
    /// `primary_resume` is the primary stream's last fetched op
    /// `(inst_uid, addr)`, captured before any FTQ flush; it can be
    /// absent when fetch stalled behind a barrier with nothing queued.
    pub fn recover(
        &mut self,
        ctx: &mut DfeCtx<'_>,
        cf_type: CfType,
        mut primary: Option<&mut Dfe>,
        primary_resume: Option<(u64, Addr)>,
    ) {
        let mut info = ctx.recovery.recovery_info;
        info.bp_id = self.bp_id;
        self.bp
            .recover_op(cf_type, &info, &ctx.cfg.bp, &mut ctx.stats.bp);
        self.dfe_recover_op(ctx);

        match self.recovery_policy {
            RecoveryPolicy::PrimaryDfe => {
                if self.stalled {
                    assert!(ctx.frontend.is_exec_driven());
                    self.stalled = false;
                }
                if self.state != DfeState::Inactive || self.exit_on_off_path {
                    let saved = self
                        .saved_recovery_ft
                        .as_ref()
                        .expect("primary recovery requires a saved fetch target");
                    assert!(saved.has_unread_ops());
                    assert_eq!(
                        ctx.recovery.recovery_fetch_addr,
                        saved.get_start_addr(),
                        "recovery addr {:#x} does not match saved ft addr {:#x}",
                        ctx.recovery.recovery_fetch_addr,
                        saved.get_start_addr()
                    );
                    self.exit_on_off_path = false;
                    self.next_state = DfeState::Recovering;
                }
            }
            RecoveryPolicy::ContinueOnRecovery => {
                // Keep serving from wherever the primary stream got to,
                // as if nothing happened; everything fetched is forced
                // off-path.
                match primary_resume {
                    Some((uid, addr)) => {
                        ctx.frontend.redirect(self.proc_id, self.bp_id, uid, addr);
                        let primary = primary.as_deref_mut().expect("secondary has a primary");
                        bp_sync(&primary.bp, &mut self.bp);
                        self.next_state = DfeState::ServingOffPath;
                        self.conf_off_path = true;
                    }
                    None => {
                        // Fetch had stalled with nothing queued: there is
                        // no address to continue from.
                        ctx.frontend.redirect(self.proc_id, self.bp_id, 0, 0);
                        self.next_state = DfeState::Inactive;
                    }
                }
            }
            RecoveryPolicy::ContinueOnPrediction => {
                // The alternate path was explored only up to the
                // redirect; a zero address stops this instance's fetch.
                ctx.frontend.redirect(self.proc_id, self.bp_id, 0, 0);
                self.next_state = DfeState::Inactive;
            }
        }
    }

    /// Pops the head fetch target for the icache stage, adjusting the
    /// registered iterators so they keep pointing at the same ops.
    pub fn pop_ft(&mut self) -> Option<Ft> {
        let ft = self.ftq.pop_front()?;
        let ft_num_ops = ft.ops.len();
        for iter in &mut self.iters {
            if iter.ft_pos > 0 {
                assert!(iter.flattened_op_pos >= ft_num_ops);
                iter.flattened_op_pos -= ft_num_ops;
                iter.ft_pos -= 1;
            } else {
                assert!(iter.flattened_op_pos < ft_num_ops);
                iter.flattened_op_pos = 0;
                iter.op_pos = 0;
            }
        }
        Some(ft)
    }

    /// Registers a new FTQ iterator and returns its index.
    pub fn new_ftq_iter(&mut self) -> usize {
        self.iters.push(FtqIter::default());
        self.iters.len() - 1
    }

    /// Op at the iterator's position, or `None` if the FTQ is empty or
    /// the iterator ran past the tail. `end_of_ft` is set when the op is
    /// the last of its fetch target.
    pub fn ftq_iter_get(&self, iter_idx: usize, end_of_ft: &mut bool) -> Option<OpId> {
        let iter = &self.iters[iter_idx];
        if self.ftq.is_empty() || iter.ft_pos == self.ftq.len() {
            if self.ftq.is_empty() {
                assert!(iter.ft_pos == 0 && iter.op_pos == 0 && iter.flattened_op_pos == 0);
            }
            return None;
        }
        assert!(iter.ft_pos < self.ftq.len());
        let ft = &self.ftq[iter.ft_pos];
        assert!(iter.op_pos < ft.ops.len());
        *end_of_ft = iter.op_pos == ft.ops.len() - 1;
        Some(ft.ops[iter.op_pos])
    }

    /// Advances the iterator and returns the op at the new position.
    pub fn ftq_iter_get_next(&mut self, iter_idx: usize, end_of_ft: &mut bool) -> Option<OpId> {
        let ftq_len = self.ftq.len();
        let cur_ft_ops = self
            .iters
            .get(iter_idx)
            .filter(|iter| iter.ft_pos < ftq_len)
            .map(|iter| self.ftq[iter.ft_pos].ops.len());
        let iter = &mut self.iters[iter_idx];
        match cur_ft_ops {
            None => {
                // The iterator already ran past the tail.
                assert_eq!(iter.op_pos, 0);
                return None;
            }
            Some(n_ops) => {
                if iter.ft_pos + 1 == ftq_len && iter.op_pos + 1 == n_ops {
                    // Last op of the last FT: step past the tail and be
                    // ready for the next push.
                    iter.ft_pos += 1;
                    iter.op_pos = 0;
                    iter.flattened_op_pos += 1;
                    return None;
                } else if iter.op_pos + 1 == n_ops {
                    iter.ft_pos += 1;
                    iter.op_pos = 0;
                    iter.flattened_op_pos += 1;
                } else {
                    iter.op_pos += 1;
                    iter.flattened_op_pos += 1;
                }
            }
        }
        self.ftq_iter_get(iter_idx, end_of_ft)
    }

    /// Flattened op offset of the iterator from the FTQ start.
    pub fn ftq_iter_offset(&self, iter_idx: usize) -> usize {
        self.iters[iter_idx].flattened_op_pos
    }

    /// FT offset of the iterator from the FTQ start.
    pub fn ftq_iter_ft_offset(&self, iter_idx: usize) -> usize {
        self.iters[iter_idx].ft_pos
    }

    /// Stalls fetch behind an unresolved fetch barrier.
    fn stall(&mut self, ctx: &mut DfeCtx<'_>, op: Option<OpId>) {
        self.stalled = true;
        if let Some(id) = op {
            let op = &ctx.pool[id];
            tracing::debug!(
                fetch_addr = format_args!("{:#x}", op.addr),
                off_path = op.off_path,
                op_num = op.op_num,
                "decoupled fetch stalled on barrier"
            );
        }
    }

    /// Observes an op's retirement: fetch barriers unstall, and the
    /// frontend is told to release the instruction.
    pub fn retire(&mut self, frontend: &mut dyn Frontend, pool: &OpPool, op_id: OpId) {
        let op = &pool[op_id];
        if op.bar_fetch || op.cf_type == CfType::Sys {
            tracing::debug!(
                bp_id = self.bp_id,
                fetch_addr = format_args!("{:#x}", op.addr),
                op_num = op.op_num,
                "decoupled fetch saw barrier retire"
            );
            self.stalled = false;
        }
        frontend.retire(op.proc_id, op.inst_uid);
    }
}
