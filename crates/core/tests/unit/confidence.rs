//! Confidence Estimator Tests.
//!
//! Verifies the weight-based accumulator, the BTB miss-rate sampling
//! window, the perfect estimator, and recovery resets.

use fetchsim_core::config::{ConfMech, Config};
use fetchsim_core::confidence::{Conf, ConfOffPathReason};
use fetchsim_core::frontend::VecFrontend;

use crate::common::{TestContext, alu_run};

fn weight_cfg(threshold: f64) -> Config {
    let mut cfg = Config::default();
    cfg.confidence.enable = true;
    cfg.confidence.mech = ConfMech::Weight;
    cfg.confidence.off_path_threshold = threshold;
    cfg.confidence.btb_miss_rate_weight = 0.0;
    cfg
}

// ══════════════════════════════════════════════════════════
// 1. Weight estimator
// ══════════════════════════════════════════════════════════

#[test]
fn fresh_estimator_is_high_confidence() {
    let cfg = weight_cfg(1024.0);
    let conf = Conf::new(0, &cfg.confidence);
    assert!(!conf.get_conf());
    assert_eq!(
        conf.get_conf_off_path_reason(),
        ConfOffPathReason::NotIdentified
    );
}

#[test]
fn long_non_cf_runs_accumulate_low_confidence() {
    // Threshold 2: the accumulator trips after a couple of saturations
    // of the cf-op distance.
    let cfg = weight_cfg(2.0);
    let mut ctx = TestContext::with_config(cfg.clone());
    let mut conf = Conf::new(0, &cfg.confidence);

    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 64), 1);
    for _ in 0..4 {
        let ft = ctx.build_ft(&mut fe);
        conf.update(&ft, &ctx.pool);
        ft.destroy(&mut ctx.pool);
    }
    assert!(conf.get_conf());
    assert_eq!(
        conf.get_conf_off_path_reason(),
        ConfOffPathReason::ConfThreshold
    );
}

#[test]
fn high_threshold_stays_confident() {
    let cfg = weight_cfg(1_000_000.0);
    let mut ctx = TestContext::with_config(cfg.clone());
    let mut conf = Conf::new(0, &cfg.confidence);

    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 64), 1);
    for _ in 0..4 {
        let ft = ctx.build_ft(&mut fe);
        conf.update(&ft, &ctx.pool);
        ft.destroy(&mut ctx.pool);
    }
    assert!(!conf.get_conf());
}

// ══════════════════════════════════════════════════════════
// 2. Sampling window
// ══════════════════════════════════════════════════════════

#[test]
fn btb_miss_rate_resets_each_window() {
    let mut cfg = weight_cfg(1024.0);
    cfg.confidence.btb_miss_sample_rate = 4;
    let mut ctx = TestContext::with_config(cfg.clone());
    let mut conf = Conf::new(0, &cfg.confidence);

    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 16), 1);
    let ft = ctx.build_ft(&mut fe);
    // Pretend every op missed the BTB this window.
    for &id in &ft.ops {
        ctx.pool[id].btb_pred_info.btb_miss = true;
    }
    conf.update(&ft, &ctx.pool);
    // 16 misses over a 4-cycle window.
    conf.per_cycle_update(4);
    // The next window sees no misses and decays back to zero.
    conf.per_cycle_update(8);
    ft.destroy(&mut ctx.pool);
    // No observable rate accessor: the property checked here is that the
    // window arithmetic neither panics nor trips the estimator.
    assert!(!conf.get_conf());
}

// ══════════════════════════════════════════════════════════
// 3. Perfect estimator
// ══════════════════════════════════════════════════════════

#[test]
fn perfect_estimator_fires_on_the_flushing_op() {
    let mut cfg = Config::default();
    cfg.confidence.enable = true;
    cfg.confidence.mech = ConfMech::Perfect;
    let mut ctx = TestContext::with_config(cfg.clone());
    let mut conf = Conf::new(0, &cfg.confidence);

    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 16), 1);
    let ft = ctx.build_ft(&mut fe);
    ctx.pool[ft.ops[3]].bp_pred_info.recover_at_exec = true;
    conf.update(&ft, &ctx.pool);
    assert!(conf.get_conf());
    assert_eq!(
        conf.get_conf_off_path_reason(),
        ConfOffPathReason::PerfectConf
    );
    ft.destroy(&mut ctx.pool);
}

// ══════════════════════════════════════════════════════════
// 4. Recovery
// ══════════════════════════════════════════════════════════

#[test]
fn recovery_resets_the_estimator() {
    let cfg = weight_cfg(2.0);
    let mut ctx = TestContext::with_config(cfg.clone());
    let mut conf = Conf::new(0, &cfg.confidence);

    let mut fe = VecFrontend::new(alu_run(1, 0x1000, 64), 1);
    let ft = ctx.build_ft(&mut fe);
    for _ in 0..4 {
        conf.update(&ft, &ctx.pool);
    }
    assert!(conf.get_conf());

    conf.recover(&ctx.pool[ft.ops[0]]);
    assert!(!conf.get_conf());
    assert_eq!(
        conf.get_conf_off_path_reason(),
        ConfOffPathReason::NotIdentified
    );
    ft.destroy(&mut ctx.pool);
}
