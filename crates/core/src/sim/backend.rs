//! Modeled back end.
//!
//! The real back end (rename, schedule, execute, retire) is outside this
//! core; only its recovery and retirement signals are modeled. Ops flow
//! through fixed decode/execute/retire latencies; flagged ops latch a
//! recovery when they reach the matching point, the target predictors
//! train when targets become known, and on-path ops retire in order.

use std::collections::VecDeque;

use crate::bp::{BpData, BpRecoveryInfo, bp_sched_recovery};
use crate::config::Config;
use crate::confidence::Conf;
use crate::op::{OpId, OpPool};
use crate::stats::BpStats;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    op: OpId,
    decode_at: u64,
    exec_at: u64,
    retire_at: u64,
    decode_done: bool,
    exec_done: bool,
}

/// In-order back-end pipe with fixed stage latencies.
#[derive(Debug, Default)]
pub struct BackendModel {
    pipe: VecDeque<InFlight>,
    retired: u64,
}

impl BackendModel {
    /// Creates an empty back-end model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ops in flight.
    pub fn in_flight(&self) -> usize {
        self.pipe.len()
    }

    /// Instructions retired so far.
    pub fn retired(&self) -> u64 {
        self.retired
    }

    /// Accepts a bundle from the uop queue.
    pub fn accept(&mut self, ops: Vec<OpId>, cfg: &Config, cycle: u64) {
        for op in ops {
            self.pipe.push_back(InFlight {
                op,
                decode_at: cycle + cfg.backend.decode_cycles,
                exec_at: cycle + cfg.backend.exec_cycles,
                retire_at: cycle + cfg.backend.retire_cycles,
                decode_done: false,
                exec_done: false,
            });
        }
    }

    /// Advances the pipe one cycle.
    ///
    /// Decode-point: direct targets become known, decode-class flushes
    /// latch a recovery. Execute-point: indirect targets resolve, the
    /// predictor trains, execute-class flushes latch. Returns the ops
    /// that retired this cycle, oldest first; the caller signals the
    /// frontend and frees them.
    pub fn update(
        &mut self,
        pool: &mut OpPool,
        bp: &mut BpData,
        latch: &mut BpRecoveryInfo,
        mut conf: Option<&mut Conf>,
        cfg: &Config,
        cycle: u64,
        stats: &mut BpStats,
    ) -> Vec<OpId> {
        for i in 0..self.pipe.len() {
            let entry = self.pipe[i];

            if !entry.decode_done && cycle >= entry.decode_at {
                self.pipe[i].decode_done = true;
                let op = &pool[entry.op];
                if op.cf_type.is_cf() && !op.cf_type.is_indirect() {
                    bp.target_known_op(op, &cfg.bp);
                }
                let op = &pool[entry.op];
                if !op.off_path
                    && op.bp_pred_info.recover_at_decode
                    && !op.bp_pred_info.recovery_sch
                {
                    bp_sched_recovery(latch, pool, entry.op, cycle, &cfg.bp, stats);
                }
            }

            let entry = self.pipe[i];
            if !entry.exec_done && cycle >= entry.exec_at {
                self.pipe[i].exec_done = true;
                let op = &pool[entry.op];
                if op.cf_type.is_cf() {
                    if op.cf_type.is_indirect() {
                        bp.target_known_op(op, &cfg.bp);
                    }
                    let op = &pool[entry.op];
                    bp.resolve_op(op, &cfg.bp);
                    if let Some(conf) = conf.as_deref_mut() {
                        conf.resolve_cf(op);
                    }
                }
                let op = &pool[entry.op];
                if !op.off_path && op.bp_pred_info.recover_at_exec && !op.bp_pred_info.recovery_sch
                {
                    bp_sched_recovery(latch, pool, entry.op, cycle, &cfg.bp, stats);
                }
            }
        }

        // In-order retirement. Wrong-path ops never retire; they wait at
        // the head until the pending recovery flushes them.
        let mut retired = Vec::new();
        while let Some(front) = self.pipe.front() {
            if !front.exec_done || cycle < front.retire_at {
                break;
            }
            let op = &pool[front.op];
            if op.off_path {
                assert!(latch.pending(), "wrong-path op at retire without recovery");
                break;
            }
            let front = self.pipe.pop_front().unwrap();
            pool[front.op].retire_cycle = cycle;
            bp.retire_op(&pool[front.op]);
            self.retired += 1;
            retired.push(front.op);
        }
        retired
    }

    /// Flushes wrong-path ops younger than the recovery boundary,
    /// freeing them back to the pool.
    pub fn flush_off_path(&mut self, pool: &mut OpPool, recovery_unique_num: u64) {
        let mut kept = VecDeque::with_capacity(self.pipe.len());
        for entry in self.pipe.drain(..) {
            let op = &pool[entry.op];
            if op.off_path && op.unique_num > recovery_unique_num {
                pool.free(entry.op);
            } else {
                kept.push_back(entry);
            }
        }
        self.pipe = kept;
    }
}
