//! Gshare direction predictor.
//!
//! Correlates the 32-bit global history with the branch pc through an XOR
//! hash into a table of 2-bit saturating counters. The global history
//! register itself is owned by the predictor surface and shifted there;
//! this table only reads the history snapshot captured on the op.

use crate::bp::predictor::DirPredictor;
use crate::op::{Op, RecoveryInfo};

/// Gshare predictor state: one pattern history table.
#[derive(Debug, Clone)]
pub struct GsharePredictor {
    pht: Vec<u8>,
    mask: u64,
}

impl GsharePredictor {
    /// Creates a predictor with a `2^pht_bits`-entry table, counters
    /// initialized to weakly-not-taken.
    pub fn new(pht_bits: usize) -> Self {
        let size = 1usize << pht_bits;
        Self {
            pht: vec![1; size],
            mask: (size as u64) - 1,
        }
    }

    #[inline]
    fn index(&self, pc: u64, hist: u32) -> usize {
        (((pc >> 2) ^ u64::from(hist)) & self.mask) as usize
    }
}

impl DirPredictor for GsharePredictor {
    fn predict(&mut self, op: &mut Op) -> bool {
        let idx = self.index(op.addr, op.bp_pred_info.pred_global_hist);
        let counter = self.pht[idx];
        op.bp_confidence = if counter == 0 || counter == 3 { 3 } else { 1 };
        counter >= 2
    }

    fn update(&mut self, op: &Op) {
        let idx = self.index(op.addr, op.bp_pred_info.pred_global_hist);
        let counter = self.pht[idx];
        if op.oracle.dir && counter < 3 {
            self.pht[idx] += 1;
        } else if !op.oracle.dir && counter > 0 {
            self.pht[idx] -= 1;
        }
    }

    fn recover(&mut self, _info: &RecoveryInfo) {
        // Counters are not rolled back; the surface restores the history.
    }
}
