//! Top-level simulator.
//!
//! Single-threaded cooperative discrete-event loop: one global cycle
//! counter, and within each cycle every component's update runs in a
//! fixed pipeline order (recovery latch, DFEs, icache, uop queue, back
//! end), core by core. No component ever blocks; anything that cannot
//! make progress simply does nothing for the cycle.

use std::path::Path;

use crate::bp::BpRecoveryInfo;
use crate::common::SimError;
use crate::config::Config;
use crate::confidence::Conf;
use crate::dfe::{Dfe, DfeCtx, DfeState};
use crate::frontend::{Frontend, SyntheticFrontend};
use crate::ft::{FtBuildEnv, FtIdAlloc};
use crate::lookahead::LookaheadBuffer;
use crate::op::OpPool;
use crate::sim::backend::BackendModel;
use crate::sim::icache::IcacheStage;
use crate::stats::CoreStats;
use crate::uop_cache::UopCacheStage;
use crate::uop_queue::UopQueueStage;

/// One simulated core: its DFEs, op pool, stages, and statistics.
pub struct Core {
    proc_id: u32,
    dfes: Vec<Dfe>,
    pool: OpPool,
    conf: Option<Conf>,
    ft_ids: FtIdAlloc,
    frontend: Box<dyn Frontend>,
    recovery: BpRecoveryInfo,
    stats: CoreStats,
    fwd_progress: u64,
    icache: IcacheStage,
    uop_cache: UopCacheStage,
    uopq: UopQueueStage,
    backend: BackendModel,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("proc_id", &self.proc_id)
            .field("active_ops", &self.pool.active_ops())
            .finish_non_exhaustive()
    }
}

impl Core {
    /// Core id.
    pub fn proc_id(&self) -> u32 {
        self.proc_id
    }

    /// Creates a core with the given instruction source.
    pub fn with_frontend(proc_id: u32, cfg: &Config, frontend: Box<dyn Frontend>) -> Self {
        let dfes = (0..cfg.general.num_bps)
            .map(|bp_id| Dfe::new(proc_id, bp_id as u32, cfg))
            .collect();
        let conf = cfg
            .confidence
            .enable
            .then(|| Conf::new(proc_id, &cfg.confidence));
        Self {
            proc_id,
            dfes,
            pool: OpPool::new(),
            conf,
            ft_ids: FtIdAlloc::default(),
            frontend,
            recovery: BpRecoveryInfo::new(proc_id),
            stats: CoreStats::default(),
            fwd_progress: 0,
            icache: IcacheStage::new(proc_id),
            uop_cache: UopCacheStage::new(proc_id, cfg),
            uopq: UopQueueStage::new(cfg),
            backend: BackendModel::new(),
        }
    }

    /// Creates a core driven by the configured synthetic kernel.
    pub fn new(proc_id: u32, cfg: &Config) -> Self {
        let frontend = SyntheticFrontend::new(
            cfg.general.kernel,
            cfg.general.kernel_iterations,
            cfg.general.num_bps,
        );
        Self::with_frontend(proc_id, cfg, Box::new(frontend))
    }

    /// Per-core statistics.
    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }

    /// Op pool of this core.
    pub fn pool(&self) -> &OpPool {
        &self.pool
    }

    /// Primary DFE of this core.
    pub fn primary_dfe(&self) -> &Dfe {
        &self.dfes[0]
    }

    /// Instructions retired so far.
    pub fn retired(&self) -> u64 {
        self.backend.retired()
    }

    /// Whether this core has drained completely.
    pub fn is_done(&self) -> bool {
        self.dfes[0].state() == DfeState::Inactive
            && self.dfes[0].ftq_num_fts() == 0
            && self.icache.is_idle()
            && self.uopq.is_empty()
            && self.backend.in_flight() == 0
            && !self.recovery.pending()
    }

    /// Advances the core by one cycle.
    pub fn step(&mut self, cfg: &Config, cycle: u64) {
        // Recovery latches apply before any new production.
        if self.recovery.pending() && cycle >= self.recovery.recovery_cycle {
            let cf_type = self.recovery.recovery_cf_type;
            let unique = self.recovery.recovery_unique_num;
            // Primary resume point for continue-on-recovery secondaries,
            // captured before the primary's FTQ flushes.
            let primary_resume = self.dfes[0].last_fetch_op().map(|id| {
                let op = &self.pool[id];
                (op.inst_uid, op.addr)
            });
            {
                let (prim, secs) = self.dfes.split_at_mut(1);
                let mut ctx = DfeCtx {
                    frontend: self.frontend.as_mut(),
                    pool: &mut self.pool,
                    conf: self.conf.as_mut(),
                    ft_ids: &mut self.ft_ids,
                    stats: &mut self.stats,
                    recovery: &mut self.recovery,
                    cfg,
                    cycle,
                    fwd_progress: &mut self.fwd_progress,
                };
                prim[0].recover(&mut ctx, cf_type, None, None);
                for sec in secs.iter_mut() {
                    sec.recover(&mut ctx, cf_type, Some(&mut prim[0]), primary_resume);
                }
            }
            self.icache.recover(&mut self.uop_cache, &mut self.pool);
            self.uopq
                .recover(&mut self.pool, unique, &mut self.stats.uop_queue);
            self.backend.flush_off_path(&mut self.pool, unique);
            self.recovery.clear();
        }

        // DFE production, primary first.
        {
            let (prim, secs) = self.dfes.split_at_mut(1);
            let mut ctx = DfeCtx {
                frontend: self.frontend.as_mut(),
                pool: &mut self.pool,
                conf: self.conf.as_mut(),
                ft_ids: &mut self.ft_ids,
                stats: &mut self.stats,
                recovery: &mut self.recovery,
                cfg,
                cycle,
                fwd_progress: &mut self.fwd_progress,
            };
            prim[0].update(&mut ctx, secs);
            for sec in secs.iter_mut() {
                sec.update(&mut ctx, &mut []);
            }
        }

        // Icache stage feeds the uop queue; the back end drains it.
        self.uopq.begin_cycle(&mut self.stats.uop_queue);
        self.icache.update(
            &mut self.dfes[0],
            &mut self.uop_cache,
            &mut self.uopq,
            &mut self.pool,
            cfg,
            &mut self.stats,
        );
        let bundle = self.uopq.take_front_ops();
        self.backend.accept(bundle, cfg, cycle);
        let retired = self.backend.update(
            &mut self.pool,
            &mut self.dfes[0].bp,
            &mut self.recovery,
            self.conf.as_mut(),
            cfg,
            cycle,
            &mut self.stats.bp,
        );
        for id in retired {
            self.dfes[0].retire(self.frontend.as_mut(), &self.pool, id);
            self.pool.free(id);
        }
    }
}

/// Oracle lookahead window tracking the architectural stream.
///
/// Built over a second, independent copy of the synthetic frontend; the
/// window is consulted as the icache stage serves each on-path fetch
/// target and advanced alongside it.
struct LookaheadState {
    buffer: LookaheadBuffer,
    pool: OpPool,
    frontend: Box<dyn Frontend>,
    bp: crate::bp::BpData,
    stats: CoreStats,
    last_ft_id: u64,
}

impl std::fmt::Debug for LookaheadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookaheadState")
            .field("count", &self.buffer.count())
            .finish_non_exhaustive()
    }
}

impl LookaheadState {
    fn new(cfg: &Config) -> Self {
        let mut state = Self {
            buffer: LookaheadBuffer::new(cfg.lookahead.buf_size, cfg.fetch.icache_line_size),
            pool: OpPool::new(),
            frontend: Box::new(SyntheticFrontend::new(
                cfg.general.kernel,
                cfg.general.kernel_iterations,
                1,
            )),
            bp: crate::bp::BpData::new(0, 0, &cfg.bp),
            stats: CoreStats::default(),
            last_ft_id: 0,
        };
        let mut env = FtBuildEnv {
            frontend: state.frontend.as_mut(),
            pool: &mut state.pool,
            bp: &mut state.bp,
            cfg,
            stats: &mut state.stats,
            cycle: 0,
        };
        state.buffer.init(&mut env);
        state
    }

    /// Checks whether the fetch target the icache stage is serving was
    /// visible in the oracle window, and keeps the window in step.
    fn observe(&mut self, core: &mut Core, cfg: &Config, cycle: u64) {
        let Some(info) = core.icache.last_served() else {
            return;
        };
        if info.dynamic_info.id == self.last_ft_id || info.dynamic_info.first_op_off_path {
            return;
        }
        self.last_ft_id = info.dynamic_info.id;

        let hit = !self.buffer.find_fts_by_ft_info(&info.static_info).is_empty();
        if hit {
            core.stats.fetch.lookahead_hits += 1;
        } else {
            core.stats.fetch.lookahead_misses += 1;
        }

        // Advance the window with the architectural stream. Splits at
        // predicted mispredicts fragment the stream's blocks, so the
        // window's front is popped once the served block reaches its end.
        let served = info.static_info;
        while self.buffer.count() > 0 {
            let front = self.buffer.peek().get_ft_info().static_info;
            let within =
                served.start >= front.start && served.start < front.start + front.length;
            if !within || served.start + served.length < front.start + front.length {
                break;
            }
            let mut env = FtBuildEnv {
                frontend: self.frontend.as_mut(),
                pool: &mut self.pool,
                bp: &mut self.bp,
                cfg,
                stats: &mut self.stats,
                cycle,
            };
            let popped = self.buffer.pop_ft(&mut env);
            popped.destroy(&mut self.pool);
        }
    }
}

/// Whole-simulation state: configuration, cores, and the cycle counter.
#[derive(Debug)]
pub struct Simulator {
    cfg: Config,
    cores: Vec<Core>,
    lookahead: Vec<Option<LookaheadState>>,
    cycle: u64,
}

impl Simulator {
    /// Creates a simulator running the configured synthetic kernel on
    /// every core.
    pub fn new(cfg: Config) -> Result<Self, SimError> {
        cfg.validate()?;
        let cores = (0..cfg.general.num_cores)
            .map(|proc_id| Core::new(proc_id as u32, &cfg))
            .collect();
        let lookahead = (0..cfg.general.num_cores)
            .map(|_| (cfg.lookahead.buf_size > 0).then(|| LookaheadState::new(&cfg)))
            .collect();
        Ok(Self {
            cfg,
            cores,
            lookahead,
            cycle: 0,
        })
    }

    /// Creates a single-core simulator over a caller-provided frontend.
    pub fn with_frontend(cfg: Config, frontend: Box<dyn Frontend>) -> Result<Self, SimError> {
        cfg.validate()?;
        let cores = vec![Core::with_frontend(0, &cfg, frontend)];
        Ok(Self {
            cfg,
            cores,
            lookahead: vec![None],
            cycle: 0,
        })
    }

    /// Current cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Configuration the simulator runs with.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Core by id.
    pub fn core(&self, proc_id: usize) -> &Core {
        &self.cores[proc_id]
    }

    /// Whether every core has drained.
    pub fn is_done(&self) -> bool {
        self.cores.iter().all(Core::is_done)
    }

    /// Advances the whole simulation by one cycle. Multi-core is modeled
    /// by stepping each core sequentially within the cycle.
    pub fn step(&mut self) {
        self.cycle += 1;
        for (idx, core) in self.cores.iter_mut().enumerate() {
            core.step(&self.cfg, self.cycle);
            if let Some(la) = &mut self.lookahead[idx] {
                la.observe(core, &self.cfg, self.cycle);
            }
        }
    }

    /// Runs until every core drains or the cycle budget expires.
    /// Returns the number of simulated cycles.
    pub fn run(&mut self) -> u64 {
        while !self.is_done() && self.cycle < self.cfg.general.max_cycles {
            self.step();
        }
        self.cycle
    }

    /// Writes per-group statistics files for every core.
    pub fn write_stats(&self) -> Result<(), SimError> {
        if self.cfg.general.output_dir.is_empty() {
            return Ok(());
        }
        let dir = Path::new(&self.cfg.general.output_dir);
        for (proc_id, core) in self.cores.iter().enumerate() {
            core.stats.write_all(dir, proc_id)?;
        }
        Ok(())
    }
}
