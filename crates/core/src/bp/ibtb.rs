//! Indirect target predictor (target cache).
//!
//! Predicts indirect branch and indirect call targets from the branch pc
//! hashed with a global target history, optionally folding in the
//! call-return stack top so the same indirect site predicts per call
//! context. The tagged variant keeps the full hashed key; the tagless
//! variant is direct-mapped over the same index.

use crate::common::Addr;
use crate::config::{BpConfig, IbtbMech};
use crate::libs::cache::KeyedCache;
use crate::op::{Op, RecoveryInfo};

/// Index granularity of the target cache hash.
const IBTB_INDEX_GRAIN: u64 = 4;

/// History-indexed indirect target predictor.
#[derive(Debug)]
pub struct Ibtb {
    cache: KeyedCache<Addr, Addr>,
    bits_per_target: u32,
    hash_tos: bool,
}

impl Ibtb {
    /// Creates an indirect predictor from the branch prediction config.
    pub fn new(cfg: &BpConfig) -> Self {
        let assoc = match cfg.ibtb_mech {
            IbtbMech::TcTagged => cfg.ibtb_assoc,
            IbtbMech::TcTagless => 1,
        };
        Self {
            cache: KeyedCache::new(
                cfg.ibtb_entries,
                assoc,
                IBTB_INDEX_GRAIN,
                crate::config::ReplPolicy::TrueLru,
            ),
            bits_per_target: cfg.targ_hist_bits_per_target(),
            hash_tos: cfg.ibtb_hash_tos,
        }
    }

    #[inline]
    fn index(&self, pc: Addr, targ_hist: u64, tos_addr: Addr) -> Addr {
        let key = pc ^ targ_hist;
        if self.hash_tos { key ^ tos_addr } else { key }
    }

    /// Target prediction for `op` under the given target history and
    /// call-return stack top.
    pub fn pred(&mut self, targ_hist: u64, tos_addr: Addr, op: &Op) -> Option<Addr> {
        let key = self.index(op.addr, targ_hist, tos_addr);
        self.cache.access(&key, true).map(|target| *target)
    }

    /// Trains the predictor with the resolved target, indexed by the
    /// history and stack top captured when the op was predicted.
    pub fn update(&mut self, op: &Op) {
        let key = self.index(
            op.addr,
            op.recovery_info.targ_hist,
            op.recovery_info.tos_addr,
        );
        let _evicted = self.cache.update_or_insert(key, op.oracle.target);
    }

    /// Folds a predicted target into the running target history.
    pub fn shift_hist(&self, targ_hist: u64, target: Addr) -> u64 {
        let mask = (1u64 << self.bits_per_target) - 1;
        (targ_hist << self.bits_per_target) | ((target >> 2) & mask)
    }

    /// History value after the resolved direction of a recovery: the
    /// snapshot with the true target shifted in.
    pub fn recover_hist(&self, info: &RecoveryInfo) -> u64 {
        self.shift_hist(info.targ_hist, info.branch_target)
    }
}
