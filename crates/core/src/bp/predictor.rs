//! Direction predictor capability set and static dispatch.

use crate::bp::gshare::GsharePredictor;
use crate::bp::hybrid::HybridgpPredictor;
use crate::config::{BpConfig, BpMech};
use crate::op::{Op, RecoveryInfo};

/// Capability set every direction predictor provides.
///
/// The surface (`BpData`) calls these in a fixed order per predicted op:
/// `timestamp`, `predict`, `spec_update`; `update` at resolution,
/// `retire` at retirement, `recover` on a misprediction recovery.
pub trait DirPredictor {
    /// Snapshots pre-speculation predictor state for the op, if any.
    fn timestamp(&mut self, _op: &Op) {}

    /// Predicts the direction of a conditional branch.
    fn predict(&mut self, op: &mut Op) -> bool;

    /// Applies speculative state updates after a prediction.
    fn spec_update(&mut self, _op: &Op) {}

    /// Commit-time training with the resolved op.
    fn update(&mut self, op: &Op);

    /// Retires predictor state that must only commit on the right path.
    fn retire(&mut self, _op: &Op) {}

    /// Restores predictor state to the snapshot taken at prediction time.
    fn recover(&mut self, info: &RecoveryInfo);

    /// Whether the predictor cannot accept another prediction this cycle.
    fn is_full(&self) -> bool {
        false
    }
}

/// Enum wrapper for static dispatch of direction predictors.
/// This avoids vtable lookups in the per-op prediction path.
#[derive(Debug, Clone)]
pub enum DirPredictorKind {
    /// Global-history XOR predictor.
    Gshare(GsharePredictor),
    /// Hybrid global/per-address predictor with a chooser.
    Hybridgp(HybridgpPredictor),
}

impl DirPredictorKind {
    /// Creates the configured predictor variant.
    pub fn new(cfg: &BpConfig) -> Self {
        match cfg.mech {
            BpMech::Gshare => Self::Gshare(GsharePredictor::new(cfg.pht_bits)),
            BpMech::Hybridgp => Self::Hybridgp(HybridgpPredictor::new(cfg.pht_bits)),
        }
    }
}

impl DirPredictor for DirPredictorKind {
    #[inline]
    fn timestamp(&mut self, op: &Op) {
        match self {
            Self::Gshare(bp) => bp.timestamp(op),
            Self::Hybridgp(bp) => bp.timestamp(op),
        }
    }

    #[inline]
    fn predict(&mut self, op: &mut Op) -> bool {
        match self {
            Self::Gshare(bp) => bp.predict(op),
            Self::Hybridgp(bp) => bp.predict(op),
        }
    }

    #[inline]
    fn spec_update(&mut self, op: &Op) {
        match self {
            Self::Gshare(bp) => bp.spec_update(op),
            Self::Hybridgp(bp) => bp.spec_update(op),
        }
    }

    #[inline]
    fn update(&mut self, op: &Op) {
        match self {
            Self::Gshare(bp) => bp.update(op),
            Self::Hybridgp(bp) => bp.update(op),
        }
    }

    #[inline]
    fn retire(&mut self, op: &Op) {
        match self {
            Self::Gshare(bp) => bp.retire(op),
            Self::Hybridgp(bp) => bp.retire(op),
        }
    }

    #[inline]
    fn recover(&mut self, info: &RecoveryInfo) {
        match self {
            Self::Gshare(bp) => bp.recover(info),
            Self::Hybridgp(bp) => bp.recover(info),
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        match self {
            Self::Gshare(bp) => bp.is_full(),
            Self::Hybridgp(bp) => bp.is_full(),
        }
    }
}
