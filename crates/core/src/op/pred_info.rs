//! Branch prediction and BTB prediction info structs.

use crate::common::Addr;
use crate::op::CfType;

/// Direction prediction state of one op.
#[derive(Debug, Clone, Copy, Default)]
pub struct BpPredInfo {
    /// Address used to predict the branch.
    pub pred_addr: Addr,
    /// Predicted next pc.
    pub pred_npc: Addr,
    /// Predicted direction, possibly forced by BTB-miss handling.
    pub pred: bool,
    /// Predicted direction as produced by the predictor, never overwritten.
    pub pred_orig: bool,
    /// The target address is the only thing that was wrong.
    pub misfetch: bool,
    /// The direction was mispredicted and the branch must cause a recovery.
    pub mispred: bool,
    /// This op has latched a recovery.
    pub recovery_sch: bool,
    /// The op will schedule its recovery at decode.
    pub recover_at_decode: bool,
    /// The op will schedule its recovery at execute.
    pub recover_at_exec: bool,
    /// Global history the direction prediction was made with.
    pub pred_global_hist: u32,
    /// Hybrid predictor: global component's prediction.
    pub hybridgp_gpred: bool,
    /// Hybrid predictor: per-address component's prediction.
    pub hybridgp_ppred: bool,
    /// Confidence predictor output for this branch.
    pub pred_conf: bool,
}

/// Target prediction state of one op.
#[derive(Debug, Clone, Copy, Default)]
pub struct BtbPredInfo {
    /// The target was not known at prediction time.
    pub btb_miss: bool,
    /// The BTB miss has been resolved by the pipeline.
    pub btb_miss_resolved: bool,
    /// No target was available from any predictor.
    pub no_target: bool,
    /// The indirect predictor had no target.
    pub ibp_miss: bool,
    /// Selected target from the BTB or indirect predictor, if any.
    pub pred_target: Addr,
}

/// Immutable snapshot of predictor state at the moment an op was predicted.
///
/// Sufficient to restore that state on recovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryInfo {
    /// Core the snapshot belongs to.
    pub proc_id: u32,
    /// Predictor instance the snapshot belongs to.
    pub bp_id: u32,
    /// Global history before any speculative shift for this op.
    pub pred_global_hist: u32,
    /// Indirect target history at prediction time.
    pub targ_hist: u64,
    /// Resolved direction, known from the oracle.
    pub new_dir: bool,
    /// Call-return stack `next` pointer.
    pub crs_next: usize,
    /// Call-return stack top-of-stack pointer.
    pub crs_tos: usize,
    /// Call-return stack depth.
    pub crs_depth: usize,
    /// Call-return stack tail pointer.
    pub crs_tail: usize,
    /// Top-of-stack address captured for history hashing.
    pub tos_addr: Addr,
    /// Op number of the snapshotted op.
    pub op_num: u64,
    /// Pc of the snapshotted op.
    pub pc: Addr,
    /// Control-flow type of the snapshotted op.
    pub cf_type: CfType,
    /// Oracle direction.
    pub oracle_dir: bool,
    /// Oracle target.
    pub branch_target: Addr,
    /// Cycle the prediction was made.
    pub predict_cycle: u64,
}
