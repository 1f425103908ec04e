//! Confidence estimation for in-flight speculation.
//!
//! A running score classifies the speculative stream as high or low
//! confidence. The tag is informational: it never alters architectural
//! behavior, only which ops are counted as speculative-off-path for
//! analysis. The estimator kinds are a closed set dispatched by pattern
//! match, keeping vtables out of the per-op path.

use crate::config::{ConfMech, ConfidenceConfig};
use crate::ft::Ft;
use crate::op::{Op, OpPool};

/// Why the front end went off the architectural path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffPathReason {
    /// No recovery-triggering condition identified.
    #[default]
    NotIdentified,
    /// Indirect predictor miss on a taken indirect.
    IbtbMiss,
    /// BTB miss alone.
    BtbMiss,
    /// BTB miss where the direction was also wrong.
    BtbMissMispred,
    /// Direction misprediction.
    Mispred,
    /// Correct direction, wrong target.
    Misfetch,
}

/// Why the confidence estimator classified speculation as off-path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfOffPathReason {
    /// No classification yet.
    #[default]
    NotIdentified,
    /// Indirect predictor miss while the direction predictor said taken.
    IbtbMissBpTaken,
    /// BTB miss with a taken prediction at the given confidence level.
    BtbMissBpTaken(u8),
    /// BTB miss rate over the sampling window.
    BtbMissRate,
    /// Low-confidence accumulator crossed the threshold.
    ConfThreshold,
    /// Perfect estimator observed the mispredicting op.
    PerfectConf,
}

/// Per-core confidence estimator state.
#[derive(Debug)]
pub struct Conf {
    proc_id: u32,
    mech: ConfMech,
    cfg: ConfidenceConfig,
    low_confidence_cnt: f64,
    cf_op_distance: f64,
    btb_miss_rate: f64,
    cnt_btb_miss: u64,
    off_path: bool,
    off_path_reason: OffPathReason,
    conf_off_path_reason: ConfOffPathReason,
}

impl Conf {
    /// Creates an estimator for one core.
    pub fn new(proc_id: u32, cfg: &ConfidenceConfig) -> Self {
        Self {
            proc_id,
            mech: cfg.mech,
            cfg: cfg.clone(),
            low_confidence_cnt: 0.0,
            cf_op_distance: 0.0,
            btb_miss_rate: 0.0,
            cnt_btb_miss: 0,
            off_path: false,
            off_path_reason: OffPathReason::default(),
            conf_off_path_reason: ConfOffPathReason::default(),
        }
    }

    /// Whether speculation is currently classified as off-path.
    pub fn get_conf(&self) -> bool {
        self.off_path
    }

    /// Reason the front end went off path, as last recorded.
    pub fn get_off_path_reason(&self) -> OffPathReason {
        self.off_path_reason
    }

    /// Reason the estimator classified speculation as off-path.
    pub fn get_conf_off_path_reason(&self) -> ConfOffPathReason {
        self.conf_off_path_reason
    }

    /// Records the architectural off-path reason at a redirect.
    pub fn set_off_path(&mut self, reason: OffPathReason) {
        self.off_path_reason = reason;
    }

    /// Folds one completed fetch target into the running score.
    pub fn update(&mut self, ft: &Ft, pool: &OpPool) {
        for &id in &ft.ops {
            let op = &pool[id];
            match self.mech {
                ConfMech::Weight => {
                    if op.cf_type.is_cf() {
                        self.per_cf_op_update(op);
                    } else {
                        self.per_op_update(op);
                    }
                }
                ConfMech::Perfect => self.update_state_perfect_conf(op),
            }
        }
    }

    /// Non-cf op contribution (weight estimator).
    fn per_op_update(&mut self, op: &Op) {
        if self.cf_op_distance >= self.cfg.off_path_threshold {
            self.low_confidence_cnt +=
                self.cfg.off_path_inc + self.cfg.btb_miss_rate_weight * self.btb_miss_rate;
            self.cf_op_distance = 0.0;
        } else {
            self.cf_op_distance += 1.0 + self.cfg.btb_miss_rate_weight * self.btb_miss_rate;
        }

        if self.low_confidence_cnt >= self.cfg.off_path_threshold {
            self.mark_off_path(ConfOffPathReason::ConfThreshold);
        }
        if op.btb_pred_info.btb_miss {
            self.cnt_btb_miss += 1;
        }
    }

    /// Cf op contribution (weight estimator). 3 is the highest
    /// predictor confidence.
    fn per_cf_op_update(&mut self, op: &Op) {
        self.low_confidence_cnt += f64::from(3 - op.bp_confidence.min(3))
            + self.cfg.btb_miss_rate_weight * self.btb_miss_rate;
        self.cf_op_distance = 0.0;

        if self.low_confidence_cnt >= self.cfg.off_path_threshold {
            self.mark_off_path(ConfOffPathReason::ConfThreshold);
        }
        if op.btb_pred_info.btb_miss && op.bp_pred_info.pred {
            self.mark_off_path(ConfOffPathReason::BtbMissBpTaken(op.bp_confidence.min(3)));
        }
    }

    /// Oracle estimator: off-path exactly when a flushing op is seen.
    fn update_state_perfect_conf(&mut self, op: &Op) {
        self.cf_op_distance = 0.0;
        if op.is_flushing() && !op.off_path {
            self.mark_off_path(ConfOffPathReason::PerfectConf);
        }
    }

    fn mark_off_path(&mut self, reason: ConfOffPathReason) {
        if !self.off_path {
            self.off_path = true;
            self.conf_off_path_reason = reason;
            tracing::debug!(proc_id = self.proc_id, ?reason, "confidence off-path");
        }
    }

    /// Per-cycle window maintenance: recompute the BTB miss rate every
    /// sampling interval.
    pub fn per_cycle_update(&mut self, cycle: u64) {
        let rate = self.cfg.btb_miss_sample_rate;
        if rate != 0 && cycle % rate == 0 {
            self.btb_miss_rate = self.cnt_btb_miss as f64 / rate as f64;
            self.cnt_btb_miss = 0;
        }
    }

    /// Resets the estimator when the front end recovers.
    pub fn recover(&mut self, _op: &Op) {
        self.low_confidence_cnt = 0.0;
        self.cf_op_distance = 0.0;
        self.off_path = false;
        self.off_path_reason = OffPathReason::default();
        self.conf_off_path_reason = ConfOffPathReason::default();
    }

    /// Hook invoked when a cf op resolves in the back end.
    pub fn resolve_cf(&mut self, _op: &Op) {}
}
