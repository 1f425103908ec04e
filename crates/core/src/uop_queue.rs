//! Uop queue: buffers decoded uop bundles between the icache stage and
//! the back end.
//!
//! A bounded deque of stage buffers, each sized to the uop cache width.
//! The head buffer is handed to the back end whole; emptied buffers
//! return to a free list. On recovery, flushed ops are freed back to the
//! op pool and buffers that become empty are recycled.

use std::collections::VecDeque;

use crate::config::Config;
use crate::op::{OpId, OpPool};
use crate::stats::UopQueueStats;

/// Per-core uop queue stage.
#[derive(Debug)]
pub struct UopQueueStage {
    q: VecDeque<Vec<OpId>>,
    free: Vec<Vec<OpId>>,
    off_path: bool,
    length: usize,
}

impl UopQueueStage {
    /// Creates the uop queue for one core.
    pub fn new(cfg: &Config) -> Self {
        let length = cfg.uop_queue.length;
        let width = cfg.uop_cache.width;
        let mut free = Vec::with_capacity(length);
        for _ in 0..length {
            free.push(Vec::with_capacity(width));
        }
        Self {
            q: VecDeque::new(),
            free,
            off_path: false,
            length,
        }
    }

    /// Number of occupied stage buffers.
    pub fn len(&self) -> usize {
        self.q.len()
    }

    /// Whether the queue holds no ops.
    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Whether the queue currently holds wrong-path ops.
    pub fn is_off_path(&self) -> bool {
        self.off_path
    }

    /// Recycles the head buffer if the back end consumed it last cycle.
    pub fn begin_cycle(&mut self, stats: &mut UopQueueStats) {
        if self.q.front().is_some_and(Vec::is_empty) {
            let sd = self.q.pop_front().unwrap();
            self.free.push(sd);
            // Only one stage is consumed per cycle.
            assert!(self.q.front().is_none_or(|next| !next.is_empty()));
        }
        if self.off_path {
            stats.off_path_cycles += 1;
        }
    }

    /// Whether a new stage buffer can be accepted this cycle.
    ///
    /// Back-end stalls propagate here and force fetch to stall.
    pub fn can_accept(&mut self, stats: &mut UopQueueStats) -> bool {
        if self.q.len() >= self.length {
            if !self.off_path {
                stats.stalled += 1;
            }
            false
        } else {
            if !self.off_path {
                stats.not_stalled += 1;
            }
            true
        }
    }

    /// Moves the icache stage's output into a fresh stage buffer.
    pub fn push_ops(&mut self, ops: &mut Vec<OpId>, pool: &OpPool, stats: &mut UopQueueStats) {
        if ops.is_empty() {
            if !self.off_path {
                stats.starved += 1;
            }
            return;
        }
        if !self.off_path {
            stats.not_starved += 1;
        }
        let mut sd = self.free.pop().expect("queue admission checked");
        for id in ops.drain(..) {
            if pool[id].off_path {
                self.off_path = true;
            }
            tracing::trace!(op_num = pool[id].op_num, "uop queue accepts op");
            sd.push(id);
        }
        self.q.push_back(sd);
    }

    /// Hands the head stage buffer to the back end.
    ///
    /// The emptied buffer stays at the head and is recycled next cycle.
    pub fn take_front_ops(&mut self) -> Vec<OpId> {
        match self.q.front_mut() {
            Some(sd) => std::mem::take(sd),
            None => Vec::new(),
        }
    }

    /// Flushes wrong-path ops younger than the recovery boundary,
    /// freeing them back to the pool.
    pub fn recover(
        &mut self,
        pool: &mut OpPool,
        recovery_unique_num: u64,
        stats: &mut UopQueueStats,
    ) {
        self.off_path = false;
        let mut idx = 0;
        while idx < self.q.len() {
            let sd = &mut self.q[idx];
            let mut kept = Vec::with_capacity(sd.len());
            for id in sd.drain(..) {
                let op = &pool[id];
                if op.off_path && op.unique_num > recovery_unique_num {
                    assert!(op.off_path);
                    tracing::debug!(
                        op_num = op.op_num,
                        off_path = op.off_path,
                        "uop queue flushing op"
                    );
                    stats.flushed_ops += 1;
                    pool.free(id);
                } else {
                    kept.push(id);
                }
            }
            *sd = kept;
            if sd.is_empty() {
                let sd = self.q.remove(idx).unwrap();
                self.free.push(sd);
            } else {
                idx += 1;
            }
        }
    }
}
