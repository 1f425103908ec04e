//! Hybrid global/per-address direction predictor.
//!
//! Runs a gshare-style global component and a per-address (bimodal)
//! component side by side; a chooser table indexed by the branch pc picks
//! which component's prediction is used. Both components train on every
//! resolution; the chooser trains only when the components disagree.

use crate::bp::predictor::DirPredictor;
use crate::op::{Op, RecoveryInfo};

/// Hybrid predictor state: global PHT, per-address PHT, chooser.
#[derive(Debug, Clone)]
pub struct HybridgpPredictor {
    gpht: Vec<u8>,
    ppht: Vec<u8>,
    chooser: Vec<u8>,
    mask: u64,
}

impl HybridgpPredictor {
    /// Creates a hybrid predictor with `2^pht_bits` entries per table.
    pub fn new(pht_bits: usize) -> Self {
        let size = 1usize << pht_bits;
        Self {
            gpht: vec![1; size],
            ppht: vec![1; size],
            // Chooser starts weakly favoring the global component.
            chooser: vec![2; size],
            mask: (size as u64) - 1,
        }
    }

    #[inline]
    fn gindex(&self, pc: u64, hist: u32) -> usize {
        (((pc >> 2) ^ u64::from(hist)) & self.mask) as usize
    }

    #[inline]
    fn pindex(&self, pc: u64) -> usize {
        ((pc >> 2) & self.mask) as usize
    }
}

impl DirPredictor for HybridgpPredictor {
    fn predict(&mut self, op: &mut Op) -> bool {
        let gidx = self.gindex(op.addr, op.bp_pred_info.pred_global_hist);
        let pidx = self.pindex(op.addr);
        let gpred = self.gpht[gidx] >= 2;
        let ppred = self.ppht[pidx] >= 2;
        op.bp_pred_info.hybridgp_gpred = gpred;
        op.bp_pred_info.hybridgp_ppred = ppred;

        let use_global = self.chooser[pidx] >= 2;
        let counter = if use_global {
            self.gpht[gidx]
        } else {
            self.ppht[pidx]
        };
        op.bp_confidence = if counter == 0 || counter == 3 { 3 } else { 1 };
        if use_global { gpred } else { ppred }
    }

    fn update(&mut self, op: &Op) {
        let dir = op.oracle.dir;
        let gidx = self.gindex(op.addr, op.bp_pred_info.pred_global_hist);
        let pidx = self.pindex(op.addr);

        let bump = |counter: &mut u8, taken: bool| {
            if taken && *counter < 3 {
                *counter += 1;
            } else if !taken && *counter > 0 {
                *counter -= 1;
            }
        };
        bump(&mut self.gpht[gidx], dir);
        bump(&mut self.ppht[pidx], dir);

        let gcorrect = op.bp_pred_info.hybridgp_gpred == dir;
        let pcorrect = op.bp_pred_info.hybridgp_ppred == dir;
        if gcorrect != pcorrect {
            bump(&mut self.chooser[pidx], gcorrect);
        }
    }

    fn recover(&mut self, _info: &RecoveryInfo) {}
}
