//! Fetch Target (FT): a control-flow-bounded block of consecutive ops.
//!
//! An FT is an ordered, non-empty run of ops with contiguous pcs at
//! instruction boundaries, ending at exactly one of: a predicted-taken
//! branch, a fetch barrier, an instruction-cache line boundary, or the
//! program exit sentinel. The DFE builds FTs op by op from the frontend,
//! predicts their exit, splits them on mispredictions, and pushes them to
//! the FTQ; the icache stage later consumes their ops one at a time.

use crate::bp::BpData;
use crate::common::{Addr, round_down};
use crate::config::Config;
use crate::frontend::Frontend;
use crate::op::{CfType, OpId, OpPool};
use crate::stats::CoreStats;

/// Monotonic id generator for fetch targets.
#[derive(Debug, Default)]
pub struct FtIdAlloc(u64);

impl FtIdAlloc {
    /// Next unique fetch target id.
    pub fn next_id(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

/// Why a fetch target ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FtEndedBy {
    /// Still under construction.
    #[default]
    NotEnded,
    /// Last op is a control-flow op predicted taken.
    TakenBranch,
    /// Syscall or serializing fetch barrier.
    BarFetch,
    /// Fall-through past the end of an instruction cache line.
    IcacheLineBoundary,
    /// Program termination sentinel.
    AppExit,
}

/// Static identity of a fetch target.
///
/// Two FTs with equal static info are the same block of code; the uop
/// cache keys its lines with this identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FtInfoStatic {
    /// Address of the first instruction.
    pub start: Addr,
    /// `last.pc + last.size - start` in bytes.
    pub length: u64,
    /// Number of uops in the block.
    pub n_uops: u32,
}

/// Per-instance info of a fetch target.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtInfoDynamic {
    /// Unique fetch target id.
    pub id: u64,
    /// Exit condition the block ended with.
    pub ended_by: FtEndedBy,
    /// Whether the first op was fetched on a wrong path.
    pub first_op_off_path: bool,
}

/// Combined static and dynamic fetch target info.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtInfo {
    /// Static identity.
    pub static_info: FtInfoStatic,
    /// Per-instance state.
    pub dynamic_info: FtInfoDynamic,
}

/// Event observed while building or predicting a fetch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FtEvent {
    /// Nothing to do.
    #[default]
    None,
    /// The frontend could not yield an op.
    BuildFail,
    /// A cf op was mispredicted; the FT must be split at its index.
    Mispredict,
    /// A serializing op that stalls fetch until resolved.
    FetchBarrier,
    /// An off-path op predicted taken needs a manual frontend redirect.
    OffpathTakenRedirect,
}

/// Result of predicting a whole fetch target.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtPredictResult {
    /// Index of the op that produced the event (mispredicts only).
    pub index: usize,
    /// First non-trivial event found.
    pub event: FtEvent,
    /// The op that produced the event.
    pub op: Option<OpId>,
    /// Predicted next fetch address of that op.
    pub pred_addr: Addr,
}

/// Everything a fetch target build needs from its core.
pub struct FtBuildEnv<'a> {
    /// Instruction source.
    pub frontend: &'a mut dyn Frontend,
    /// Op storage.
    pub pool: &'a mut OpPool,
    /// Predictor state of the owning DFE.
    pub bp: &'a mut BpData,
    /// Simulation configuration.
    pub cfg: &'a Config,
    /// Per-core statistics.
    pub stats: &'a mut CoreStats,
    /// Current cycle.
    pub cycle: u64,
}

impl std::fmt::Debug for FtBuildEnv<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtBuildEnv")
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

/// A block of consecutive ops delimited by a taken branch, an icache line
/// boundary, a fetch barrier, or program exit.
///
/// The FT exclusively owns its ops from allocation until they are handed
/// to the back end (tracked by the read cursor `op_pos`) or destroyed by
/// a flush; [`Ft::destroy`] frees only the unconsumed tail.
#[derive(Debug)]
pub struct Ft {
    proc_id: u32,
    bp_id: u32,
    /// Ops of the block, oldest first.
    pub ops: Vec<OpId>,
    /// Read cursor: ops before this index were handed downstream.
    pub op_pos: usize,
    ft_info: FtInfo,
    prebuilt: bool,
    consumed: bool,
    contains_fake_nop: bool,
}

impl Ft {
    /// Creates an empty fetch target.
    pub fn new(proc_id: u32, bp_id: u32, ids: &mut FtIdAlloc) -> Self {
        let mut ft_info = FtInfo::default();
        ft_info.dynamic_info.id = ids.next_id();
        Self {
            proc_id,
            bp_id,
            ops: Vec::new(),
            op_pos: 0,
            ft_info,
            prebuilt: false,
            consumed: false,
            contains_fake_nop: false,
        }
    }

    /// Core this fetch target belongs to.
    pub fn proc_id(&self) -> u32 {
        self.proc_id
    }

    /// Whether the read cursor has not reached the end yet.
    pub fn can_fetch_op(&self) -> bool {
        self.op_pos < self.ops.len()
    }

    /// Same as [`Ft::can_fetch_op`]; DFE-facing name.
    pub fn has_unread_ops(&self) -> bool {
        self.can_fetch_op()
    }

    /// Hands out the op at the read cursor and advances it.
    pub fn fetch_op(&mut self) -> OpId {
        assert!(self.can_fetch_op());
        let id = self.ops[self.op_pos];
        self.op_pos += 1;
        id
    }

    /// Resets the read cursor to the first op.
    pub fn rewind(&mut self) {
        self.op_pos = 0;
    }

    /// Combined fetch target info.
    pub fn get_ft_info(&self) -> FtInfo {
        self.ft_info
    }

    /// Start address of the block.
    pub fn get_start_addr(&self) -> Addr {
        self.ft_info.static_info.start
    }

    /// Last op of the block.
    pub fn get_last_op(&self) -> OpId {
        *self.ops.last().expect("fetch target has ops")
    }

    /// First op of the block.
    pub fn get_first_op(&self) -> OpId {
        *self.ops.first().expect("fetch target has ops")
    }

    /// Whether the block ended with the program exit sentinel.
    pub fn ended_by_exit(&self) -> bool {
        self.ft_info.dynamic_info.ended_by == FtEndedBy::AppExit
    }

    /// Whether the first op was fetched on a wrong path.
    pub fn get_first_op_off_path(&self) -> bool {
        self.ft_info.dynamic_info.first_op_off_path
    }

    /// Whether this block carries a fake-nop placeholder line.
    pub fn get_contains_fake_nop(&self) -> bool {
        self.contains_fake_nop
    }

    /// Marks the block as built ahead of prediction.
    pub fn set_prebuilt(&mut self, prebuilt: bool) {
        self.prebuilt = prebuilt;
    }

    /// Whether the icache stage finished reading this block.
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Marks the block as fully read by the icache stage.
    pub fn set_consumed(&mut self) {
        self.consumed = true;
    }

    /// Distinct instruction addresses of the block, in order.
    pub fn get_pcs(&self, pool: &OpPool) -> Vec<Addr> {
        let mut pcs: Vec<Addr> = Vec::with_capacity(self.ops.len());
        for &id in &self.ops {
            let addr = pool[id].addr;
            if pcs.last() != Some(&addr) {
                pcs.push(addr);
            }
        }
        pcs
    }

    /// Frees every unconsumed op and resets the block to empty.
    pub fn free_ops_and_clear(&mut self, pool: &mut OpPool) {
        while self.op_pos < self.ops.len() {
            pool.free(self.ops[self.op_pos]);
            self.op_pos += 1;
        }
        self.ops.clear();
        self.op_pos = 0;
        self.ft_info.static_info = FtInfoStatic::default();
        self.ft_info.dynamic_info.ended_by = FtEndedBy::NotEnded;
        self.ft_info.dynamic_info.first_op_off_path = false;
    }

    /// Destroys the block on a flush, releasing its unconsumed ops.
    pub fn destroy(mut self, pool: &mut OpPool) {
        self.free_ops_and_clear(pool);
    }

    /// Appends an op, asserting pc contiguity at instruction boundaries.
    /// Uops of the same macro instruction share an address.
    pub fn add_op(&mut self, pool: &OpPool, id: OpId) {
        let op = &pool[id];
        if self.ops.is_empty() {
            assert!(
                op.bom && self.ft_info.static_info.start == 0,
                "proc {}: fetch target must start at a macro boundary",
                self.proc_id
            );
            self.ft_info.static_info.start = op.addr;
            self.ft_info.dynamic_info.first_op_off_path = op.off_path;
        } else {
            let last = &pool[*self.ops.last().unwrap()];
            if op.bom {
                assert_eq!(
                    last.end_addr(),
                    op.addr,
                    "proc {}: op at {:#x} does not follow {:#x}",
                    self.proc_id,
                    op.addr,
                    last.addr
                );
            } else {
                assert_eq!(last.addr, op.addr);
            }
        }
        self.ops.push(id);
    }

    /// Builds the block by pulling ops from the frontend until an end
    /// condition fires.
    ///
    /// Off-path ops are predicted as they arrive; on-path ops carry their
    /// oracle outcome as the default prediction and are predicted later by
    /// [`Ft::predict_ft`]. Returns the event of the op that ended the
    /// build, or [`FtEvent::BuildFail`] if the frontend ran dry.
    pub fn build(
        &mut self,
        env: &mut FtBuildEnv<'_>,
        off_path: bool,
        conf_off_path: bool,
        next_op_num: &mut dyn FnMut() -> u64,
    ) -> FtEvent {
        let mut event = FtEvent::None;
        loop {
            if !env.frontend.can_fetch_op(self.proc_id, self.bp_id) {
                tracing::warn!(
                    proc_id = self.proc_id,
                    bp_id = self.bp_id,
                    "could not fetch inst from frontend"
                );
                self.free_ops_and_clear(env.pool);
                return FtEvent::BuildFail;
            }
            let id = env.pool.alloc(self.proc_id, self.bp_id);
            {
                let op = &mut env.pool[id];
                env.frontend.fetch_op(self.proc_id, self.bp_id, op);
                op.off_path = off_path;
                op.op_num = next_op_num();
                op.fetch_cycle = env.cycle;
                // Prebuilt default: the prediction matches the oracle
                // until the predictor says otherwise.
                op.bp_pred_info.pred_npc = op.oracle.npc;
                op.bp_pred_info.pred = op.oracle.dir;
            }
            env.pool[id].conf_off_path = off_path || conf_off_path;
            if off_path {
                event = predict_one_cf_op(
                    env.pool,
                    env.bp,
                    env.cfg,
                    env.cycle,
                    env.stats,
                    id,
                    !env.frontend.is_exec_driven(),
                );
            }
            self.add_op(env.pool, id);
            if off_path {
                env.stats.fetch.ftq_fetched_ins_offpath += 1;
            } else {
                env.stats.fetch.ftq_fetched_ins_onpath += 1;
            }
            if self.get_end_reason(env.pool, env.cfg) != FtEndedBy::NotEnded {
                break;
            }
        }
        self.validate(env.pool);
        self.generate_ft_info(env.pool, env.cfg);
        event
    }

    /// Splits the block at `index`: ops `[0..=index]` remain here, the
    /// rest move into a freshly built trailing fetch target.
    ///
    /// Returns whether the front part still needs rebuilding (it no
    /// longer satisfies an end condition) and the trailing block.
    pub fn split_ft(
        &mut self,
        index: usize,
        pool: &mut OpPool,
        cfg: &Config,
        ids: &mut FtIdAlloc,
    ) -> (bool, Ft) {
        assert!(index < self.ops.len());

        let mut trailing = Ft::new(self.proc_id, self.bp_id, ids);
        let has_trailing_ops = index < self.ops.len() - 1;
        if has_trailing_ops {
            for i in index + 1..self.ops.len() {
                trailing.add_op(pool, self.ops[i]);
            }
            assert_ne!(trailing.get_end_reason(pool, cfg), FtEndedBy::NotEnded);
            trailing.validate(pool);
            trailing.generate_ft_info(pool, cfg);
            assert!(!trailing.ft_info.dynamic_info.first_op_off_path);
            self.ops.truncate(index + 1);
        }

        // Reset the end of the block before possible rebuilding.
        self.ft_info.static_info.length = 0;
        self.ft_info.static_info.n_uops = self.ops.len() as u32;
        self.ft_info.dynamic_info.ended_by = FtEndedBy::NotEnded;

        let needs_rebuild = if self.get_end_reason(pool, cfg) == FtEndedBy::NotEnded {
            true
        } else {
            self.validate(pool);
            self.generate_ft_info(pool, cfg);
            false
        };
        (needs_rebuild, trailing)
    }

    /// Scans the block's ops in order, predicting each, and returns the
    /// first non-trivial event.
    pub fn predict_ft(
        &self,
        pool: &mut OpPool,
        bp: &mut BpData,
        cfg: &Config,
        cycle: u64,
        stats: &mut CoreStats,
        trace_mode: bool,
    ) -> FtPredictResult {
        for (idx, &id) in self.ops.iter().enumerate() {
            let event = predict_one_cf_op(pool, bp, cfg, cycle, stats, id, trace_mode);
            if event != FtEvent::None {
                let index = if event == FtEvent::Mispredict { idx } else { 0 };
                let pred_addr = pool[id].bp_pred_info.pred_npc;
                if !self.ended_by_exit() {
                    return FtPredictResult {
                        index,
                        event,
                        op: Some(id),
                        pred_addr,
                    };
                }
            }
        }
        FtPredictResult::default()
    }

    /// Whether this block can legally follow `previous` on the FTQ.
    pub fn is_consecutive(&self, previous: &Ft, pool: &OpPool) -> bool {
        assert!(!previous.ops.is_empty());
        let last = &pool[previous.get_last_op()];
        let start_addr = self.ft_info.static_info.start;
        let pred_npc = last.bp_pred_info.pred_npc;
        let npc = last.oracle.npc;
        let end_addr = last.end_addr();
        match previous.ft_info.dynamic_info.ended_by {
            // Next FT must start at the predicted or actual npc.
            FtEndedBy::TakenBranch => pred_npc == start_addr || npc == start_addr,
            // Barrier-fetch allows either the npc or the fall-through.
            FtEndedBy::BarFetch => npc == start_addr || end_addr == start_addr,
            // Normal fall-through: next start is the end of the last inst.
            _ => end_addr == start_addr,
        }
    }

    /// Asserts structural invariants before info generation.
    pub fn validate(&self, pool: &OpPool) {
        assert!(
            pool[self.get_last_op()].eom && self.ft_info.static_info.length == 0,
            "proc {}: invalid fetch target at finalize",
            self.proc_id
        );
        assert_ne!(self.ft_info.static_info.start, 0);
        assert!(pool[self.get_first_op()].bom && pool[self.get_last_op()].eom);
    }

    /// Exit condition of the block as built so far.
    pub fn get_end_reason(&self, pool: &OpPool, cfg: &Config) -> FtEndedBy {
        let Some(&last) = self.ops.last() else {
            return FtEndedBy::NotEnded;
        };
        let op = &pool[last];
        if op.eom {
            let line = cfg.fetch.icache_line_size;
            let offset = op.end_addr() - round_down(op.addr, line);
            let end_of_icache_line = offset >= line;
            let cf_taken = op.cf_type.is_cf() && op.bp_pred_info.pred;
            let bar_fetch = op.cf_type == CfType::Sys || op.bar_fetch;

            if op.exit {
                return FtEndedBy::AppExit;
            } else if bar_fetch {
                return FtEndedBy::BarFetch;
            } else if cf_taken {
                return FtEndedBy::TakenBranch;
            } else if end_of_icache_line {
                return FtEndedBy::IcacheLineBoundary;
            }
        }
        FtEndedBy::NotEnded
    }

    /// Populates static and dynamic info once the block has ended.
    pub fn generate_ft_info(&mut self, pool: &mut OpPool, cfg: &Config) {
        self.ft_info.dynamic_info.ended_by = self.get_end_reason(pool, cfg);
        self.ft_info.static_info.n_uops = self.ops.len() as u32;
        let last = &pool[self.get_last_op()];
        self.ft_info.static_info.length = last.end_addr() - self.ft_info.static_info.start;
        let start = self.ft_info.static_info.start;
        for &id in &self.ops {
            pool[id].ft_start = start;
        }
        assert!(
            self.ft_info.static_info.start != 0
                && self.ft_info.static_info.length != 0
                && self.ft_info.static_info.n_uops != 0
        );
    }

    /// Clears recovery scheduling from every op in the block.
    ///
    /// Used on the very last simulated block so program exit does not
    /// cause a recovery.
    pub fn clear_recovery_info(&self, pool: &mut OpPool) {
        for &id in &self.ops {
            let op = &mut pool[id];
            op.bp_pred_info.recover_at_decode = false;
            op.bp_pred_info.recover_at_exec = false;
        }
    }
}

/// Predicts a single op within a fetch target.
///
/// Non-cf ops pass through unless they carry a fetch barrier. For cf ops
/// the predictor surface runs, and the outcome is folded into an
/// [`FtEvent`]: off-path ops never register recoveries, but a taken
/// off-path prediction still needs a frontend redirect in trace mode.
pub fn predict_one_cf_op(
    pool: &mut OpPool,
    bp: &mut BpData,
    cfg: &Config,
    cycle: u64,
    stats: &mut CoreStats,
    id: OpId,
    trace_mode: bool,
) -> FtEvent {
    let op = &mut pool[id];
    if op.cf_type.is_cf() {
        assert!(op.eom);
        let addr = op.addr;
        bp.predict_op(op, 1, addr, &cfg.bp, cycle, &mut stats.bp);
        let pc_plus_offset = op.end_addr();

        if op.cf_type == CfType::Sys || op.bar_fetch {
            op.bp_pred_info.recover_at_decode = false;
            op.bp_pred_info.recover_at_exec = false;
            stats.fetch.ftq_saw_bar_fetch += 1;
            return FtEvent::FetchBarrier;
        }
        if op.bp_pred_info.recover_at_decode || op.bp_pred_info.recover_at_exec {
            assert!(!(op.bp_pred_info.recover_at_decode && op.bp_pred_info.recover_at_exec));
            if op.off_path {
                op.bp_pred_info.recover_at_decode = false;
                op.bp_pred_info.recover_at_exec = false;
            }
            if op.off_path && !op.bp_pred_info.pred {
                // Off path and not taken: no redirect needed.
                return FtEvent::None;
            }
            return FtEvent::Mispredict;
        } else if trace_mode && op.off_path && op.bp_pred_info.pred {
            // Not a misprediction: the prediction is taken, so the
            // trace-driven frontend needs a manual redirect.
            if pc_plus_offset != op.oracle.target {
                assert!(op.oracle.dir);
            }
            return FtEvent::OffpathTakenRedirect;
        }
    } else if op.bar_fetch {
        assert!(!(op.bp_pred_info.recover_at_decode || op.bp_pred_info.recover_at_exec));
        stats.fetch.ftq_saw_bar_fetch += 1;
        return FtEvent::FetchBarrier;
    }

    FtEvent::None
}
