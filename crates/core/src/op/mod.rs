//! Micro-operation records and the recyclable op pool.

/// Op pool (slab allocator with a free list).
pub mod pool;
/// Branch prediction, BTB prediction, and recovery snapshot structs.
pub mod pred_info;

pub use pool::{OpId, OpPool};
pub use pred_info::{BpPredInfo, BtbPredInfo, RecoveryInfo};

use crate::common::{Addr, MAX_CTR};

/// Control-flow classification of an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CfType {
    /// Not a control-flow op.
    #[default]
    NotCf,
    /// Unconditional direct branch.
    Br,
    /// Conditional direct branch.
    Cbr,
    /// Direct call.
    Call,
    /// Indirect branch.
    Ibr,
    /// Indirect call.
    Icall,
    /// Call-out: return-synchronizing co-routine transfer (pop then push).
    Ico,
    /// Return.
    Ret,
    /// System call.
    Sys,
}

impl CfType {
    /// Whether this op is any kind of control flow.
    #[inline]
    pub fn is_cf(self) -> bool {
        self != Self::NotCf
    }

    /// Whether this op is an indirect branch or indirect call.
    #[inline]
    pub fn is_indirect(self) -> bool {
        matches!(self, Self::Ibr | Self::Icall)
    }
}

/// Oracle (trace-provided) outcome of an op.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleInfo {
    /// Architecturally correct next pc.
    pub npc: Addr,
    /// Architecturally correct direction (taken).
    pub dir: bool,
    /// Architecturally correct branch target.
    pub target: Addr,
}

/// A single micro-operation record.
///
/// Ops live in the [`OpPool`] and are addressed by [`OpId`]. A fetch target
/// exclusively owns the lifetime of its ops until they are either consumed
/// by the back end (which frees them at retirement) or flushed.
#[derive(Debug, Clone, Default)]
pub struct Op {
    pub(crate) pool_valid: bool,
    pub(crate) pool_id: u32,

    /// Core this op belongs to.
    pub proc_id: u32,
    /// Predictor instance this op was fetched for.
    pub bp_id: u32,
    /// Per-core issue-order number; assigned at fetch, never reassigned.
    pub op_num: u64,
    /// Global monotonic number, used for tie-breaks and logging.
    pub unique_num: u64,
    /// Frontend-assigned instruction id.
    pub inst_uid: u64,
    /// Fetched along a path that will be squashed.
    pub off_path: bool,
    /// Counted as speculative-off-path by the confidence estimator.
    pub conf_off_path: bool,
    /// First uop of its macro instruction.
    pub bom: bool,
    /// Last uop of its macro instruction.
    pub eom: bool,
    /// Program-termination sentinel.
    pub exit: bool,
    /// Serializing fetch barrier.
    pub bar_fetch: bool,

    /// Instruction address.
    pub addr: Addr,
    /// Instruction size in bytes.
    pub inst_size: u64,
    /// Control-flow classification.
    pub cf_type: CfType,
    /// Oracle outcome.
    pub oracle: OracleInfo,

    /// Direction prediction state.
    pub bp_pred_info: BpPredInfo,
    /// Target prediction state.
    pub btb_pred_info: BtbPredInfo,
    /// Predictor snapshot taken when this op was predicted.
    pub recovery_info: RecoveryInfo,

    /// Static info of the enclosing fetch target, copied at finalization.
    pub ft_start: Addr,
    /// Predictor confidence in this op's direction (0 low .. 3 high).
    pub bp_confidence: u8,
    /// Served from the uop cache rather than the decode path.
    pub fetched_from_uop_cache: bool,

    /// Cycle this op was fetched.
    pub fetch_cycle: u64,
    /// Cycle this op was predicted.
    pub bp_cycle: u64,
    /// Cycle this op retired.
    pub retire_cycle: u64,
}

impl Op {
    /// Reinitializes the record when it is handed out by the pool.
    pub(crate) fn setup(&mut self, proc_id: u32, bp_id: u32, unique_num: u64) {
        let pool_valid = self.pool_valid;
        let pool_id = self.pool_id;
        *self = Self::default();
        self.pool_valid = pool_valid;
        self.pool_id = pool_id;
        self.proc_id = proc_id;
        self.bp_id = bp_id;
        self.unique_num = unique_num;
        self.fetch_cycle = MAX_CTR;
        self.bp_cycle = MAX_CTR;
        self.retire_cycle = MAX_CTR;
    }

    /// End address of this instruction (`addr + size`).
    #[inline]
    pub fn end_addr(&self) -> Addr {
        crate::common::addr_plus_offset(self.addr, self.inst_size)
    }

    /// Whether this op must cause a recovery when the back end reaches it.
    #[inline]
    pub fn is_flushing(&self) -> bool {
        self.bp_pred_info.recover_at_decode || self.bp_pred_info.recover_at_exec
    }
}
