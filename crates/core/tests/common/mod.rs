//! Shared test infrastructure for front-end simulation tests.

#![allow(dead_code)]

use fetchsim_core::bp::BpData;
use fetchsim_core::common::Addr;
use fetchsim_core::config::Config;
use fetchsim_core::frontend::{Frontend, InstDesc, VecFrontend};
use fetchsim_core::ft::{Ft, FtBuildEnv, FtEvent, FtIdAlloc};
use fetchsim_core::op::{CfType, Op, OpPool};
use fetchsim_core::stats::CoreStats;

/// Everything needed to build and predict fetch targets in isolation.
pub struct TestContext {
    pub cfg: Config,
    pub pool: OpPool,
    pub bp: BpData,
    pub stats: CoreStats,
    pub ft_ids: FtIdAlloc,
    pub next_op_num: u64,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(cfg: Config) -> Self {
        let bp = BpData::new(0, 0, &cfg.bp);
        Self {
            cfg,
            pool: OpPool::new(),
            bp,
            stats: CoreStats::default(),
            ft_ids: FtIdAlloc::default(),
            next_op_num: 1,
        }
    }

    /// Builds one on-path fetch target from the frontend.
    pub fn build_ft(&mut self, frontend: &mut dyn Frontend) -> Ft {
        let mut ft = Ft::new(0, 0, &mut self.ft_ids);
        let event = {
            let mut env = FtBuildEnv {
                frontend,
                pool: &mut self.pool,
                bp: &mut self.bp,
                cfg: &self.cfg,
                stats: &mut self.stats,
                cycle: 1,
            };
            let op_num = &mut self.next_op_num;
            ft.build(&mut env, false, false, &mut || {
                let n = *op_num;
                *op_num += 1;
                n
            })
        };
        assert_ne!(event, FtEvent::BuildFail, "frontend ran dry during build");
        ft
    }
}

/// A standalone cf op for predictor-surface tests.
pub fn cf_op(cf_type: CfType, addr: Addr, size: u64, dir: bool, target: Addr, npc: Addr) -> Op {
    let mut op = Op::default();
    op.proc_id = 0;
    op.op_num = 1;
    op.bom = true;
    op.eom = true;
    op.addr = addr;
    op.inst_size = size;
    op.cf_type = cf_type;
    op.oracle.dir = dir;
    op.oracle.target = target;
    op.oracle.npc = npc;
    op
}

/// A run of `n` fall-through instructions starting at `base`.
pub fn alu_run(uid_base: u64, base: Addr, n: u64) -> Vec<InstDesc> {
    (0..n)
        .map(|i| InstDesc::alu(uid_base + i, base + i * 4, 4))
        .collect()
}

/// Signal counts observed by a [`CountingFrontend`].
///
/// Shared through an `Rc` so the test keeps a handle after the simulator
/// takes ownership of the frontend.
#[derive(Default)]
pub struct FrontendCounters {
    pub recovers: std::cell::Cell<u32>,
    pub redirects: std::cell::Cell<u32>,
    pub retires: std::cell::Cell<u32>,
}

/// Frontend wrapper counting the signals the core sends back.
pub struct CountingFrontend {
    inner: VecFrontend,
    counters: std::rc::Rc<FrontendCounters>,
}

impl CountingFrontend {
    pub fn new(
        script: Vec<InstDesc>,
        num_bps: usize,
    ) -> (Self, std::rc::Rc<FrontendCounters>) {
        let counters = std::rc::Rc::new(FrontendCounters::default());
        (
            Self {
                inner: VecFrontend::new(script, num_bps),
                counters: counters.clone(),
            },
            counters,
        )
    }
}

impl Frontend for CountingFrontend {
    fn can_fetch_op(&mut self, proc_id: u32, bp_id: u32) -> bool {
        self.inner.can_fetch_op(proc_id, bp_id)
    }

    fn fetch_op(&mut self, proc_id: u32, bp_id: u32, op: &mut Op) {
        self.inner.fetch_op(proc_id, bp_id, op);
    }

    fn redirect(&mut self, proc_id: u32, bp_id: u32, inst_uid: u64, fetch_addr: Addr) {
        self.counters.redirects.set(self.counters.redirects.get() + 1);
        self.inner.redirect(proc_id, bp_id, inst_uid, fetch_addr);
    }

    fn recover(&mut self, proc_id: u32, bp_id: u32, inst_uid: u64) {
        self.counters.recovers.set(self.counters.recovers.get() + 1);
        self.inner.recover(proc_id, bp_id, inst_uid);
    }

    fn retire(&mut self, proc_id: u32, inst_uid: u64) {
        self.counters.retires.set(self.counters.retires.get() + 1);
        self.inner.retire(proc_id, inst_uid);
    }

    fn next_fetch_addr(&mut self, proc_id: u32) -> Addr {
        self.inner.next_fetch_addr(proc_id)
    }
}
