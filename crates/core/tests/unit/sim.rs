//! End-to-End Simulator Tests.
//!
//! Runs whole simulations over synthetic kernels and scripted streams,
//! checking drain-to-completion, op-pool balance, recovery plumbing, and
//! uop cache warm-up behavior.

use fetchsim_core::config::{Config, Kernel};
use fetchsim_core::frontend::InstDesc;
use fetchsim_core::sim::Simulator;

use crate::common::{CountingFrontend, alu_run};

fn kernel_cfg(kernel: Kernel, iterations: u64) -> Config {
    let mut cfg = Config::default();
    cfg.general.kernel = kernel;
    cfg.general.kernel_iterations = iterations;
    cfg.general.max_cycles = 200_000;
    cfg
}

// ══════════════════════════════════════════════════════════
// 1. Kernel runs drain cleanly
// ══════════════════════════════════════════════════════════

#[test]
fn loop_kernel_runs_to_completion() {
    let mut sim = Simulator::new(kernel_cfg(Kernel::Loop, 200)).unwrap();
    let cycles = sim.run();
    assert!(sim.is_done(), "simulation must drain before the budget");
    assert!(cycles < 200_000);
    // 8 instructions per iteration plus the exit sentinel.
    assert_eq!(sim.core(0).retired(), 200 * 8 + 1);
    assert_eq!(
        sim.core(0).pool().active_ops(),
        0,
        "every op returned to the pool"
    );
}

#[test]
fn call_return_kernel_runs_to_completion() {
    let mut sim = Simulator::new(kernel_cfg(Kernel::CallReturn, 100)).unwrap();
    sim.run();
    assert!(sim.is_done());
    assert!(sim.core(0).retired() > 0);
    assert_eq!(sim.core(0).pool().active_ops(), 0);
}

#[test]
fn indirect_dispatch_kernel_runs_to_completion() {
    let mut sim = Simulator::new(kernel_cfg(Kernel::IndirectDispatch, 100)).unwrap();
    sim.run();
    assert!(sim.is_done());
    assert!(sim.core(0).retired() > 0);
    assert_eq!(sim.core(0).pool().active_ops(), 0);
}

#[test]
fn multi_core_runs_independently() {
    let mut cfg = kernel_cfg(Kernel::Loop, 50);
    cfg.general.num_cores = 2;
    let mut sim = Simulator::new(cfg).unwrap();
    sim.run();
    assert!(sim.is_done());
    assert_eq!(sim.core(0).retired(), sim.core(1).retired());
}

// ══════════════════════════════════════════════════════════
// 2. Prediction quality improves across iterations
// ══════════════════════════════════════════════════════════

#[test]
fn loop_branch_trains_after_warmup() {
    let mut sim = Simulator::new(kernel_cfg(Kernel::Loop, 500)).unwrap();
    sim.run();
    let stats = sim.core(0).stats();
    // The back branch mispredicts while cold, then settles: recoveries
    // must be far rarer than iterations.
    let recoveries = stats.fetch.ftq_recover_decode + stats.fetch.ftq_recover_exec;
    assert!(recoveries > 0, "cold predictor must mispredict at least once");
    assert!(
        recoveries < 50,
        "a trained loop branch should stop recovering (saw {recoveries})"
    );
}

#[test]
fn uop_cache_serves_the_loop_after_warmup() {
    let mut sim = Simulator::new(kernel_cfg(Kernel::Loop, 500)).unwrap();
    sim.run();
    let stats = sim.core(0).stats();
    assert!(stats.uop_cache.ft_inserted > 0);
    assert!(
        stats.uop_cache.ft_hits > stats.uop_cache.ft_misses,
        "a tight loop should mostly hit the uop cache"
    );
}

#[test]
fn disabled_uop_cache_never_hits() {
    let mut cfg = kernel_cfg(Kernel::Loop, 100);
    cfg.uop_cache.enable = false;
    let mut sim = Simulator::new(cfg).unwrap();
    sim.run();
    assert!(sim.is_done());
    let stats = sim.core(0).stats();
    assert_eq!(stats.uop_cache.ft_hits, 0);
    assert_eq!(stats.uop_cache.ft_inserted, 0);
}

// ══════════════════════════════════════════════════════════
// 3. Recovery plumbing (scripted mispredict)
// ══════════════════════════════════════════════════════════

/// A stream with one cold taken branch: fetch runs off the path until
/// the execute point resolves it, then recovers onto the saved block.
fn mispredict_script() -> Vec<InstDesc> {
    let mut script = alu_run(1, 0x1000, 8);
    script.push(InstDesc::cbr(9, 0x1020, 4, 0x4000, true));
    script.extend(alu_run(10, 0x4000, 16));
    script.push(InstDesc::exit_marker(26, 0x4040, 4));
    script
}

#[test]
fn scripted_mispredict_recovers_once() {
    let (frontend, counters) = CountingFrontend::new(mispredict_script(), 1);
    let mut sim = Simulator::with_frontend(Config::default(), Box::new(frontend)).unwrap();
    sim.run();
    assert!(sim.is_done());

    let stats = sim.core(0).stats();
    assert_eq!(stats.fetch.ftq_recover_exec, 1);
    assert_eq!(stats.fetch.ftq_recover_decode, 0);
    assert_eq!(
        counters.recovers.get(),
        1,
        "the frontend hears about the recovery exactly once"
    );
    assert!(counters.redirects.get() >= 1);
    assert!(stats.fetch.ftq_cycles_offpath > 0);
    assert!(stats.fetch.dfe_gen_off_path_ft > 0);
}

#[test]
fn scripted_mispredict_retires_the_architectural_stream() {
    let (frontend, counters) = CountingFrontend::new(mispredict_script(), 1);
    let mut sim = Simulator::with_frontend(Config::default(), Box::new(frontend)).unwrap();
    sim.run();
    assert!(sim.is_done());
    // 8 + branch + 16 + exit sentinel, no wrong-path op among them.
    assert_eq!(sim.core(0).retired(), 26);
    assert_eq!(counters.retires.get(), 26);
    assert_eq!(sim.core(0).pool().active_ops(), 0);
}

#[test]
fn clean_scripted_stream_never_recovers() {
    let mut script = alu_run(1, 0x1000, 64);
    script.push(InstDesc::exit_marker(65, 0x1100, 4));
    let (frontend, counters) = CountingFrontend::new(script, 1);
    let mut sim = Simulator::with_frontend(Config::default(), Box::new(frontend)).unwrap();
    sim.run();
    assert!(sim.is_done());
    assert_eq!(counters.recovers.get(), 0);
    assert_eq!(counters.redirects.get(), 0);
    assert_eq!(sim.core(0).retired(), 65);
}

// ══════════════════════════════════════════════════════════
// 4. Secondary predictor instances
// ══════════════════════════════════════════════════════════

#[test]
fn continue_on_prediction_secondary_explores_and_parks() {
    use fetchsim_core::config::RecoveryPolicy;
    use fetchsim_core::dfe::DfeState;

    let mut cfg = kernel_cfg(Kernel::Loop, 200);
    cfg.general.num_bps = 2;
    cfg.general.dfe_recovery_policies = vec![
        RecoveryPolicy::PrimaryDfe,
        RecoveryPolicy::ContinueOnPrediction,
    ];
    let mut sim = Simulator::new(cfg).unwrap();
    sim.run();
    assert!(sim.is_done());
    // The architectural stream is unaffected by the shadow instance.
    assert_eq!(sim.core(0).retired(), 200 * 8 + 1);
    // After the last recovery the secondary was parked.
    assert_eq!(sim.core(0).primary_dfe().state(), DfeState::Inactive);
}

#[test]
fn continue_on_recovery_secondary_keeps_fetching() {
    use fetchsim_core::config::RecoveryPolicy;

    let mut cfg = kernel_cfg(Kernel::Loop, 200);
    cfg.general.num_bps = 2;
    cfg.general.dfe_recovery_policies = vec![
        RecoveryPolicy::PrimaryDfe,
        RecoveryPolicy::ContinueOnRecovery,
    ];
    let mut sim = Simulator::new(cfg).unwrap();
    sim.run();
    assert!(sim.is_done());
    assert_eq!(sim.core(0).retired(), 200 * 8 + 1);
}

// ══════════════════════════════════════════════════════════
// 5. Lookahead window
// ══════════════════════════════════════════════════════════

#[test]
fn lookahead_window_covers_a_clean_stream() {
    let mut cfg = kernel_cfg(Kernel::Loop, 100);
    cfg.lookahead.buf_size = 8;
    cfg.bp.perfect_bp = true;
    let mut sim = Simulator::new(cfg).unwrap();
    sim.run();
    assert!(sim.is_done());
    let stats = sim.core(0).stats();
    assert!(stats.fetch.lookahead_hits + stats.fetch.lookahead_misses > 0);
}

// ══════════════════════════════════════════════════════════
// 6. Stats output
// ══════════════════════════════════════════════════════════

#[test]
fn stats_files_are_written_per_group_and_core() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = kernel_cfg(Kernel::Loop, 50);
    cfg.general.output_dir = dir.path().to_string_lossy().into_owned();
    let mut sim = Simulator::new(cfg).unwrap();
    sim.run();
    sim.write_stats().unwrap();

    for group in ["fetch", "bp", "uop_cache", "uop_queue"] {
        let out = dir.path().join(format!("{group}.stat.0.out"));
        let csv = dir.path().join(format!("{group}.stat.0.csv"));
        assert!(out.exists(), "{group} .out missing");
        assert!(csv.exists(), "{group} .csv missing");
    }
    let fetch = std::fs::read_to_string(dir.path().join("fetch.stat.0.out")).unwrap();
    assert!(fetch.contains("FTQ_CYCLES_ONPATH"));
}
