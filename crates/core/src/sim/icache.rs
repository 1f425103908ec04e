//! Icache stage: drains fetch targets from the FTQ head.
//!
//! Each cycle the stage serves ops from the FT at the FTQ head. On a uop
//! cache hit the ops stream out of the cached lines and bypass decode;
//! on a miss they take the decode path, and the whole FT is inserted
//! into the uop cache once fully consumed.

use crate::config::Config;
use crate::dfe::Dfe;
use crate::ft::{Ft, FtInfo};
use crate::op::{OpId, OpPool};
use crate::stats::CoreStats;
use crate::uop_cache::UopCacheStage;
use crate::uop_queue::UopQueueStage;

/// Per-core icache stage state.
#[derive(Debug)]
pub struct IcacheStage {
    proc_id: u32,
    current_ft: Option<Ft>,
    serving_from_uop_cache: bool,
    last_served: Option<FtInfo>,
    out: Vec<OpId>,
}

impl IcacheStage {
    /// Creates the icache stage for one core.
    pub fn new(proc_id: u32) -> Self {
        Self {
            proc_id,
            current_ft: None,
            serving_from_uop_cache: false,
            last_served: None,
            out: Vec::new(),
        }
    }

    /// Whether the stage holds no partially consumed fetch target.
    pub fn is_idle(&self) -> bool {
        self.current_ft.is_none()
    }

    /// Fetch target currently being consumed, if any.
    pub fn current_ft(&self) -> Option<&Ft> {
        self.current_ft.as_ref()
    }

    /// Info of the most recent fetch target this stage began serving.
    /// Survives the block's completion, for observers polling per cycle.
    pub fn last_served(&self) -> Option<FtInfo> {
        self.last_served
    }

    /// Serves up to `issue_width` ops from the FTQ head into the uop
    /// queue.
    pub fn update(
        &mut self,
        dfe: &mut Dfe,
        uop_cache: &mut UopCacheStage,
        uopq: &mut UopQueueStage,
        pool: &mut OpPool,
        cfg: &Config,
        stats: &mut CoreStats,
    ) {
        uop_cache.begin_cycle();
        if !uopq.can_accept(&mut stats.uop_queue) {
            return;
        }

        if self.current_ft.is_none() {
            let Some(ft) = dfe.pop_ft() else {
                // Nothing queued this cycle.
                uopq.push_ops(&mut self.out, pool, &mut stats.uop_queue);
                return;
            };
            self.serving_from_uop_cache = uop_cache.can_lookup()
                && uop_cache.lookup_ft_and_fill_lookup_buffer(
                    ft.get_ft_info(),
                    ft.get_first_op_off_path(),
                    &mut stats.uop_cache,
                );
            self.last_served = Some(ft.get_ft_info());
            self.current_ft = Some(ft);
        }

        self.out.clear();
        let mut remaining = cfg.fetch.issue_width;
        let ft = self.current_ft.as_mut().unwrap();
        if self.serving_from_uop_cache {
            while remaining > 0 && ft.can_fetch_op() {
                let line = uop_cache.consume_uops_from_lookup_buffer(remaining as u32);
                for _ in 0..line.n_uops {
                    let id = ft.fetch_op();
                    pool[id].fetched_from_uop_cache = true;
                    self.out.push(id);
                }
                remaining -= line.n_uops as usize;
                if line.end_of_ft {
                    assert!(!ft.can_fetch_op());
                }
            }
        } else {
            while remaining > 0 && ft.can_fetch_op() {
                self.out.push(ft.fetch_op());
                remaining -= 1;
            }
        }

        if !ft.can_fetch_op() {
            ft.set_consumed();
            if self.serving_from_uop_cache {
                assert!(!uop_cache.lookup_buffer_has_lines());
            } else {
                // Decode path: the whole FT becomes insertable at once.
                uop_cache.insert_ft(ft, pool, &mut stats.uop_cache);
            }
            uop_cache.clear_lookup_buffer();
            let ft = self.current_ft.take().unwrap();
            assert_eq!(ft.proc_id(), self.proc_id);
            // Every op was handed downstream; destroying frees nothing.
            ft.destroy(pool);
            self.serving_from_uop_cache = false;
        }

        uopq.push_ops(&mut self.out, pool, &mut stats.uop_queue);
    }

    /// Discards the in-flight fetch target on a recovery.
    pub fn recover(&mut self, uop_cache: &mut UopCacheStage, pool: &mut OpPool) {
        if let Some(ft) = self.current_ft.take() {
            ft.destroy(pool);
        }
        uop_cache.clear_lookup_buffer();
        self.serving_from_uop_cache = false;
        self.out.clear();
    }
}
