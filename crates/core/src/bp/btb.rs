//! Branch Target Buffer.
//!
//! Maps a branch pc to its most recently observed taken target. Backed by
//! the keyed set-associative cache library; the entry key is the full pc,
//! so aliasing only occurs through capacity, not through tag truncation.

use crate::common::Addr;
use crate::config::BpConfig;
use crate::libs::cache::KeyedCache;
use crate::op::Op;

/// Instruction granularity assumed by the BTB set-index hash.
const BTB_INDEX_GRAIN: u64 = 4;

/// Set-associative branch target buffer.
#[derive(Debug)]
pub struct Btb {
    cache: KeyedCache<Addr, Addr>,
}

impl Btb {
    /// Creates a BTB from the branch prediction configuration.
    pub fn new(cfg: &BpConfig) -> Self {
        Self {
            cache: KeyedCache::new(
                cfg.btb_entries,
                cfg.btb_assoc,
                BTB_INDEX_GRAIN,
                crate::config::ReplPolicy::TrueLru,
            ),
        }
    }

    /// Target prediction for `op`, updating replacement state on hit.
    pub fn pred(&mut self, op: &Op) -> Option<Addr> {
        self.cache.access(&op.addr, true).map(|target| *target)
    }

    /// Target currently stored for `pc`, without touching replacement.
    pub fn probe(&self, pc: Addr) -> Option<Addr> {
        self.cache.probe(&pc).copied()
    }

    /// Writes the resolved target of `op` into the BTB.
    pub fn update(&mut self, op: &Op) {
        let _evicted = self.cache.update_or_insert(op.addr, op.oracle.target);
    }
}
