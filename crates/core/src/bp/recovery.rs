//! Per-core misprediction recovery latch.
//!
//! Only the oldest unrecovered mispredicting op wins the latch; younger
//! mispredictions are ignored until the pending recovery is performed.

use crate::common::{Addr, MAX_CTR};
use crate::config::BpConfig;
use crate::op::{CfType, OpId, OpPool, RecoveryInfo};
use crate::stats::BpStats;

/// Latched recovery state for one core.
#[derive(Debug)]
pub struct BpRecoveryInfo {
    /// Core this latch belongs to.
    pub proc_id: u32,
    /// Cycle the recovery will be performed; `MAX_CTR` when idle.
    pub recovery_cycle: u64,
    /// Address fetch resumes at after the recovery.
    pub recovery_fetch_addr: Addr,
    /// Op number of the mispredicting op.
    pub recovery_op_num: u64,
    /// Control-flow type of the mispredicting op.
    pub recovery_cf_type: CfType,
    /// Predictor snapshot captured when the op was predicted.
    pub recovery_info: RecoveryInfo,
    /// The mispredicting op.
    pub recovery_op: Option<OpId>,
    /// Global tiebreak number of the mispredicting op.
    pub recovery_unique_num: u64,
    /// Frontend instruction id of the mispredicting op.
    pub recovery_inst_uid: u64,
}

impl BpRecoveryInfo {
    /// Creates an idle latch for `proc_id`.
    pub fn new(proc_id: u32) -> Self {
        Self {
            proc_id,
            recovery_cycle: MAX_CTR,
            recovery_fetch_addr: 0,
            recovery_op_num: 0,
            recovery_cf_type: CfType::NotCf,
            recovery_info: RecoveryInfo::default(),
            recovery_op: None,
            recovery_unique_num: 0,
            recovery_inst_uid: 0,
        }
    }

    /// Whether a recovery is latched.
    #[inline]
    pub fn pending(&self) -> bool {
        self.recovery_cycle != MAX_CTR
    }

    /// Returns the latch to idle after the recovery was performed.
    pub fn clear(&mut self) {
        self.recovery_cycle = MAX_CTR;
        self.recovery_op = None;
    }
}

/// Latches a recovery for a mispredicting op.
///
/// Called when the back end first realizes the misprediction. The latch
/// keeps only the oldest op (lowest `op_num`); the recovery is performed
/// one cycle later, or after `extra_callsys_cycles` for syscalls.
pub fn bp_sched_recovery(
    latch: &mut BpRecoveryInfo,
    pool: &mut OpPool,
    op_id: OpId,
    cycle: u64,
    cfg: &BpConfig,
    stats: &mut BpStats,
) {
    let op = &mut pool[op_id];
    assert_eq!(latch.proc_id, op.proc_id);
    assert!(!op.off_path, "off-path ops never schedule recoveries");

    if op.bp_pred_info.recover_at_exec {
        stats.scheduled_exec_recoveries += 1;
    } else if op.bp_pred_info.recover_at_decode {
        stats.scheduled_decode_recoveries += 1;
    }

    if latch.recovery_cycle == MAX_CTR || op.op_num <= latch.recovery_op_num {
        assert!(!op.bp_pred_info.recovery_sch);
        op.bp_pred_info.recovery_sch = true;
        let next_fetch_addr = op.oracle.npc;
        assert_ne!(next_fetch_addr, 0);
        let latency = 1 + if op.cf_type == CfType::Sys {
            cfg.extra_callsys_cycles
        } else {
            0
        };
        tracing::debug!(
            proc_id = op.proc_id,
            op_num = op.op_num,
            addr = format_args!("{:#x}", op.addr),
            next_fetch = format_args!("{:#x}", next_fetch_addr),
            "recovery signaled"
        );
        latch.recovery_cycle = cycle + latency;
        latch.recovery_fetch_addr = next_fetch_addr;
        latch.recovery_op_num = op.op_num;
        latch.recovery_cf_type = op.cf_type;
        latch.recovery_info = op.recovery_info;
        latch.recovery_info.op_num = op.op_num;
        latch.recovery_op = Some(op_id);
        latch.recovery_unique_num = op.unique_num;
        latch.recovery_inst_uid = op.inst_uid;
    }
}
