//! Branch predictor surface.
//!
//! Presents one uniform predict/update/recover interface over the
//! pluggable direction predictors, the BTB, the indirect target
//! predictor, and the call-return stack. The central entry point is
//! [`BpData::predict_op`], invoked once per control-flow op with the
//! fetch-address context; it fills the op's prediction and recovery
//! state and returns the predicted next pc.

/// Branch target buffer.
pub mod btb;
/// Call-return stack.
pub mod crs;
/// Gshare direction predictor.
pub mod gshare;
/// Hybrid global/per-address direction predictor.
pub mod hybrid;
/// Indirect target predictor.
pub mod ibtb;
/// Direction predictor capability set and static dispatch.
pub mod predictor;
/// Per-core recovery latch.
pub mod recovery;

pub use btb::Btb;
pub use crs::Crs;
pub use ibtb::Ibtb;
pub use predictor::{DirPredictor, DirPredictorKind};
pub use recovery::{BpRecoveryInfo, bp_sched_recovery};

use crate::common::Addr;
use crate::config::BpConfig;
use crate::op::{CfType, Op, RecoveryInfo};
use crate::stats::BpStats;

/// Per-core, per-predictor branch prediction state.
#[derive(Debug)]
pub struct BpData {
    /// Core this instance belongs to.
    pub proc_id: u32,
    /// Predictor instance id (0 is the architectural predictor).
    pub bp_id: u32,
    /// 32-bit global direction history shift register.
    pub global_hist: u32,
    /// Indirect target history.
    pub targ_hist: u64,
    /// Last on-path direction produced, for comparative studies.
    pub on_path_pred: bool,
    /// Call-return stack.
    pub crs: Crs,
    /// Branch target buffer.
    pub btb: Btb,
    /// Indirect target predictor.
    pub ibtb: Ibtb,
    /// Direction predictor.
    pub predictor: DirPredictorKind,
}

impl BpData {
    /// Initializes all branch prediction structures for one instance.
    pub fn new(proc_id: u32, bp_id: u32, cfg: &BpConfig) -> Self {
        Self {
            proc_id,
            bp_id,
            global_hist: 0,
            targ_hist: 0,
            on_path_pred: false,
            crs: Crs::new(cfg.crs_entries, cfg.crs_realistic),
            btb: Btb::new(cfg),
            ibtb: Ibtb::new(cfg),
            predictor: DirPredictorKind::new(cfg),
        }
    }

    /// Whether the predictor can accept another prediction this cycle.
    pub fn is_predictable(&self) -> bool {
        !self.predictor.is_full()
    }

    /// Predicts the target of a control-flow instruction.
    ///
    /// Fills the op's direction/target prediction, schedules its recovery
    /// class (`recover_at_decode` xor `recover_at_exec`), snapshots
    /// predictor state into `op.recovery_info`, applies speculative
    /// history updates, and returns the predicted next pc.
    pub fn predict_op(
        &mut self,
        op: &mut Op,
        br_num: u32,
        _fetch_addr: Addr,
        cfg: &BpConfig,
        cycle: u64,
        stats: &mut BpStats,
    ) -> Addr {
        let pc_plus_offset = op.end_addr();
        assert_eq!(self.proc_id, op.proc_id);
        assert!(op.cf_type.is_cf());
        let _ = br_num;

        op.bp_pred_info.pred_addr = op.addr;
        op.btb_pred_info.btb_miss_resolved = false;

        // Initialize recovery information. A prediction function that
        // speculatively updates global history relies on this snapshot
        // being taken before any update.
        op.recovery_info = RecoveryInfo {
            proc_id: op.proc_id,
            bp_id: op.bp_id,
            pred_global_hist: self.global_hist,
            targ_hist: self.targ_hist,
            new_dir: op.oracle.dir,
            crs_next: self.crs.next,
            crs_tos: self.crs.tos,
            crs_depth: self.crs.depth,
            crs_tail: self.crs.tail,
            tos_addr: if cfg.ibtb_hash_tos {
                self.crs.tos_addr_for_hash()
            } else {
                0
            },
            op_num: op.op_num,
            pc: op.addr,
            cf_type: op.cf_type,
            oracle_dir: op.oracle.dir,
            branch_target: op.oracle.target,
            predict_cycle: cycle,
        };

        self.predictor.timestamp(op);

        // System calls are forced taken to the oracle npc and flush later
        // ops at decode.
        if op.cf_type == CfType::Sys {
            op.bp_pred_info.pred = true;
            op.bp_pred_info.pred_orig = true;
            op.bp_pred_info.misfetch = false;
            op.bp_pred_info.mispred = false;
            op.btb_pred_info.btb_miss = false;
            op.btb_pred_info.no_target = false;
            op.bp_pred_info.recover_at_decode = true;
            op.bp_pred_info.recover_at_exec = false;
            op.bp_pred_info.pred_npc = op.oracle.npc;
            op.btb_pred_info.pred_target = op.oracle.npc;
            self.predictor.spec_update(op);
            op.bp_cycle = cycle;
            return op.oracle.npc;
        }
        assert!(!op.bar_fetch);

        // Probe the BTB for branch information and a target. On a miss
        // the branch still predicts, but a redirect penalty applies;
        // btb_miss and pred_target are set appropriately.
        op.btb_pred_info.no_target = true;
        op.bp_pred_info.misfetch = false;
        let mut btb_hit = false;
        let mut pred_target;
        match self.btb.pred(op) {
            Some(target) => {
                btb_hit = true;
                op.btb_pred_info.btb_miss = false;
                op.btb_pred_info.no_target = false;
                pred_target = target;
                if op.cf_type != CfType::Ico && op.cf_type != CfType::Ret {
                    stats.btb_correct += 1;
                }
            }
            None => {
                // On a BTB miss, execute the fall-through.
                pred_target = pc_plus_offset;
                if op.cf_type != CfType::Ico && op.cf_type != CfType::Ret {
                    stats.btb_incorrect += 1;
                }
                if pc_plus_offset == op.oracle.target {
                    // Fall-through equals the branch target: ignoring the
                    // BTB miss avoids a recovery whose recovery address
                    // would be wrong.
                    op.btb_pred_info.btb_miss = false;
                    op.btb_pred_info.no_target = false;
                    op.bp_pred_info.pred = true;
                    btb_hit = true;
                    if op.cf_type != CfType::Ico && op.cf_type != CfType::Ret {
                        stats.btb_target_rescue += 1;
                    }
                } else {
                    op.btb_pred_info.btb_miss = true;
                }
            }
        }

        // Overwrite the target with the indirect predictor's answer.
        let mut ibp_hit = false;
        if cfg.enable_ibp && op.cf_type.is_indirect() {
            match self
                .ibtb
                .pred(self.targ_hist, op.recovery_info.tos_addr, op)
            {
                Some(target) => {
                    pred_target = target;
                    op.btb_pred_info.no_target = false;
                    op.btb_pred_info.ibp_miss = false;
                    ibp_hit = true;
                    stats.ibtb_correct += 1;
                }
                None => {
                    op.btb_pred_info.ibp_miss = true;
                    stats.ibtb_incorrect += 1;
                }
            }
        }

        // Per-cf-type prediction and recovery scheduling.
        match op.cf_type {
            CfType::Br => {
                // Unconditional direct branches resolve at decode; the
                // target must still be right (no aliasing or jitted code).
                op.bp_pred_info.pred_orig = true;
                if btb_hit && pred_target == op.oracle.npc {
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred = true;
                    op.bp_pred_info.pred_npc = pred_target;
                    stats.br_correct += 1;
                } else {
                    op.bp_pred_info.recover_at_decode = true;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred = false;
                    op.bp_pred_info.pred_npc = pc_plus_offset;
                    stats.br_recover += 1;
                }
            }
            CfType::Cbr => {
                op.bp_pred_info.pred_global_hist = self.global_hist;

                if cfg.perfect_bp {
                    op.bp_pred_info.pred = op.oracle.dir;
                    op.bp_pred_info.pred_orig = op.oracle.dir;
                    op.btb_pred_info.no_target = false;
                } else {
                    assert!(!cfg.perfect_nt_btb, "perfect_nt_btb is not supported");
                    let pred = self.predictor.predict(op);
                    op.bp_pred_info.pred = pred;
                    op.bp_pred_info.pred_orig = pred;
                }
                // Update the history used by the rest of the front end.
                self.global_hist =
                    (self.global_hist >> 1) | (u32::from(op.bp_pred_info.pred) << 31);

                if cfg.perfect_cbr_btb {
                    pred_target = op.oracle.target;
                    op.btb_pred_info.btb_miss = false;
                    op.btb_pred_info.no_target = false;
                }

                // The BTB sets pred_target on a hit; a not-taken
                // prediction still executes the fall-through.
                if !op.bp_pred_info.pred {
                    pred_target = pc_plus_offset;
                }

                let pred = op.bp_pred_info.pred;
                let dir = op.oracle.dir;
                if btb_hit && dir != pred && pc_plus_offset != op.oracle.target {
                    // Regular direction mispredict, resolved at execute.
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = true;
                    op.bp_pred_info.pred_npc = pred_target;
                    if pred {
                        assert_ne!(pred_target, pc_plus_offset);
                    } else {
                        assert_eq!(pred_target, pc_plus_offset);
                    }
                    stats.cbr_mispredict += 1;
                } else if btb_hit && pred_target != op.oracle.npc {
                    // The BTB hit and the direction is right, but the
                    // stored target is stale.
                    op.bp_pred_info.recover_at_decode = true;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred_npc = pred_target;
                    stats.cbr_misfetch += 1;
                } else if btb_hit {
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred_npc = pred_target;
                    stats.cbr_correct += 1;
                } else if !btb_hit && pred && dir {
                    // BTB miss: the branch is assumed not taken at fetch
                    // and re-predicted at decode. Predicted taken and
                    // actually taken: flush at decode.
                    op.bp_pred_info.recover_at_decode = true;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred = false;
                    op.bp_pred_info.pred_npc = pc_plus_offset;
                    stats.cbr_btb_miss += 1;
                } else if !btb_hit && pred && !dir {
                    // Predicted taken, actually not taken. Decode would
                    // flush once and execute would flush again; a single
                    // flush at execute keeps every op to one flush.
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = true;
                    op.bp_pred_info.pred = false;
                    op.bp_pred_info.pred_npc = pred_target;
                    stats.cbr_btb_miss += 1;
                } else if !btb_hit && !pred && dir {
                    // Predicted not taken, actually taken: the flush
                    // triggers at execute.
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = true;
                    op.bp_pred_info.pred = false;
                    op.bp_pred_info.pred_npc = pc_plus_offset;
                    stats.cbr_btb_miss += 1;
                } else if !btb_hit && !pred && !dir {
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred = false;
                    op.bp_pred_info.pred_npc = pc_plus_offset;
                    stats.cbr_correct += 1;
                } else {
                    unreachable!("conditional prediction cases are exhaustive");
                }
            }
            CfType::Call => {
                op.bp_pred_info.pred = true;
                op.bp_pred_info.pred_orig = true;
                if cfg.enable_crs {
                    self.crs.push(op);
                }
                if btb_hit && pred_target == op.oracle.npc {
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred = true;
                    op.bp_pred_info.pred_npc = pred_target;
                    assert_eq!(op.bp_pred_info.pred, op.oracle.dir);
                    stats.call_correct += 1;
                } else {
                    op.bp_pred_info.recover_at_decode = true;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred = false;
                    op.bp_pred_info.pred_npc = pc_plus_offset;
                    stats.call_recover += 1;
                }
            }
            CfType::Ibr | CfType::Icall => {
                if cfg.perfect_bp {
                    op.bp_pred_info.pred = op.oracle.dir;
                    op.bp_pred_info.pred_orig = op.oracle.dir;
                } else {
                    op.bp_pred_info.pred = true;
                    op.bp_pred_info.pred_orig = true;
                }
                if op.cf_type == CfType::Icall && cfg.enable_crs {
                    self.crs.push(op);
                }
                if cfg.enable_ibp && ibp_hit {
                    assert_eq!(op.oracle.target, op.oracle.npc);
                    if op.oracle.target == pred_target {
                        op.bp_pred_info.recover_at_decode = false;
                        op.bp_pred_info.recover_at_exec = false;
                        op.bp_pred_info.pred_npc = pred_target;
                        stats.ibr_correct += 1;
                    } else {
                        op.bp_pred_info.recover_at_decode = false;
                        op.bp_pred_info.recover_at_exec = true;
                        op.bp_pred_info.pred_npc = pred_target;
                        if op.cf_type == CfType::Icall {
                            op.bp_pred_info.misfetch = true;
                        }
                        stats.ibr_recover += 1;
                    }
                } else if btb_hit {
                    if op.oracle.target == pred_target {
                        op.bp_pred_info.recover_at_decode = false;
                        op.bp_pred_info.recover_at_exec = false;
                        op.bp_pred_info.pred_npc = pred_target;
                        stats.ibr_correct += 1;
                    } else {
                        op.bp_pred_info.recover_at_decode = false;
                        op.bp_pred_info.recover_at_exec = true;
                        op.bp_pred_info.pred_npc = pred_target;
                        if op.cf_type == CfType::Ibr {
                            op.bp_pred_info.misfetch = true;
                        }
                        stats.ibr_recover += 1;
                    }
                } else {
                    // Both BTB and indirect predictor missed. The
                    // mispredict is detectable at decode, but no target
                    // is known until execute, so recover there.
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = true;
                    op.bp_pred_info.pred = false;
                    op.bp_pred_info.pred_npc = pc_plus_offset;
                    stats.ibr_xbtb_miss += 1;
                }
            }
            CfType::Ico => {
                op.bp_pred_info.pred = true;
                op.bp_pred_info.pred_orig = true;
                if cfg.enable_crs {
                    pred_target = self.crs.pop(op);
                    self.crs.push(op);
                }
                if pred_target != op.oracle.npc {
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = true;
                    op.bp_pred_info.pred_npc = pred_target;
                    stats.ico_recover += 1;
                } else {
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred = false;
                    op.bp_pred_info.pred_npc = pc_plus_offset;
                    stats.ico_correct += 1;
                }
            }
            CfType::Ret => {
                if cfg.perfect_bp {
                    op.bp_pred_info.pred = op.oracle.dir;
                    op.bp_pred_info.pred_orig = op.oracle.dir;
                } else {
                    op.bp_pred_info.pred = true;
                    op.bp_pred_info.pred_orig = true;
                }
                if cfg.enable_crs {
                    pred_target = self.crs.pop(op);
                }
                if pred_target == 0 {
                    // Call-return stack underflow.
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = true;
                    op.bp_pred_info.pred_npc = pc_plus_offset;
                    op.bp_pred_info.pred = false;
                    stats.ret_underflow += 1;
                } else if pred_target != op.oracle.npc {
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = true;
                    op.bp_pred_info.pred_npc = pred_target;
                    stats.ret_recover += 1;
                } else {
                    op.bp_pred_info.recover_at_decode = false;
                    op.bp_pred_info.recover_at_exec = false;
                    op.bp_pred_info.pred_npc = pred_target;
                    stats.ret_correct += 1;
                }
            }
            CfType::NotCf | CfType::Sys => {
                unreachable!("cf type {:?} handled earlier", op.cf_type)
            }
        }

        op.btb_pred_info.pred_target = pred_target;

        self.predictor.spec_update(op);
        if op.cf_type.is_indirect() {
            self.targ_hist = self.ibtb.shift_hist(self.targ_hist, op.bp_pred_info.pred_npc);
        }
        if !op.off_path {
            self.on_path_pred = op.bp_pred_info.pred;
        }

        tracing::trace!(
            proc_id = self.proc_id,
            op_num = op.op_num,
            off_path = op.off_path,
            cf_type = ?op.cf_type,
            addr = format_args!("{:#x}", op.addr),
            pred_npc = format_args!("{:#x}", op.bp_pred_info.pred_npc),
            oracle_npc = format_args!("{:#x}", op.oracle.npc),
            btb_miss = op.btb_pred_info.btb_miss,
            "predict cf op"
        );

        assert_ne!(op.bp_pred_info.pred_npc, 0);
        if op.oracle.dir != op.bp_pred_info.pred && pc_plus_offset != op.oracle.target {
            assert!(
                op.bp_pred_info.recover_at_exec ^ op.bp_pred_info.recover_at_decode,
                "proc {} op {}: mispredicting op must pick exactly one recovery point",
                op.proc_id,
                op.op_num
            );
        }

        self.predict_op_evaluate(op, op.bp_pred_info.pred_npc, cfg, cycle)
    }

    /// Evaluates a prediction against the oracle outcome.
    ///
    /// Separate from [`BpData::predict_op`] so the evaluation can also run
    /// on alternate predictions that never drive fetch. If the direction
    /// is wrong but the next address happens to be right anyway, the op is
    /// not treated as a misprediction.
    pub fn predict_op_evaluate(
        &mut self,
        op: &mut Op,
        prediction: Addr,
        cfg: &BpConfig,
        cycle: u64,
    ) -> Addr {
        op.bp_pred_info.mispred =
            op.bp_pred_info.pred != op.oracle.dir && prediction != op.oracle.npc;
        op.bp_pred_info.misfetch = !op.bp_pred_info.mispred && prediction != op.oracle.npc;
        op.bp_cycle = cycle;

        if cfg.enable_bp_conf && op.cf_type == CfType::Cbr {
            op.bp_pred_info.pred_conf = op.bp_confidence >= 2;
        }
        prediction
    }

    /// Called on cf ops when the real target becomes known, at decode or
    /// execute time.
    pub fn target_known_op(&mut self, op: &Op, cfg: &BpConfig) {
        assert_eq!(self.proc_id, op.proc_id);
        assert!(op.cf_type.is_cf());

        if op.btb_pred_info.btb_miss && op.oracle.dir {
            // A BTB miss resolves: write the target.
            self.btb.update(op);
        } else if !op.btb_pred_info.btb_miss && op.oracle.dir {
            // On a hit, rewrite the BTB if the stored target changed
            // (jitted code or an indirect with a new target).
            if let Some(stored) = self.btb.probe(op.bp_pred_info.pred_addr) {
                if stored != op.oracle.target {
                    self.btb.update(op);
                }
            }
        }

        if op.cf_type.is_indirect()
            && cfg.enable_ibp
            && (cfg.ibtb_off_path_writes || !op.off_path)
        {
            self.ibtb.update(op);
        }
    }

    /// Commit-time predictor training, called when a cf op completes in
    /// the functional units.
    pub fn resolve_op(&mut self, op: &Op, cfg: &BpConfig) {
        if !cfg.update_bp_off_path && op.off_path {
            return;
        }
        self.predictor.update(op);
    }

    /// Retires predictor state that must only commit on the right path.
    pub fn retire_op(&mut self, op: &Op) {
        self.predictor.retire(op);
    }

    /// Restores predictor state when the back end reaches the
    /// mispredicting op.
    pub fn recover_op(
        &mut self,
        cf_type: CfType,
        info: &RecoveryInfo,
        cfg: &BpConfig,
        stats: &mut BpStats,
    ) {
        // Always recover the global history. Conditional branches shift
        // the now-known direction back in.
        if cf_type == CfType::Cbr {
            self.global_hist = (info.pred_global_hist >> 1) | (u32::from(info.new_dir) << 31);
        } else {
            self.global_hist = info.pred_global_hist;
        }
        self.targ_hist = info.targ_hist;

        if cf_type.is_indirect() {
            self.targ_hist = self.ibtb.recover_hist(info);
        }
        self.predictor.recover(info);

        if cfg.enable_crs {
            self.crs.recover(info);
        }
        stats.performed_recoveries += 1;
    }
}

/// Copies the publicly visible predictor state of `src` into `dst`.
///
/// Used for comparative studies: the primary continues; the alternate's
/// own prediction history diverges until the next sync.
pub fn bp_sync(src: &BpData, dst: &mut BpData) {
    dst.global_hist = src.global_hist;
    dst.targ_hist = src.targ_hist;
    dst.on_path_pred = src.on_path_pred;
    dst.crs.sync_from(&src.crs);
    dst.predictor = src.predictor.clone();
}
