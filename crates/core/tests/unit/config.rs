//! Configuration Tests.
//!
//! Verifies defaults, JSON deserialization with partial overrides, and
//! cross-field validation.

use pretty_assertions::assert_eq;

use fetchsim_core::config::{BpMech, Config, Kernel, RecoveryPolicy, ReplPolicy};

// ══════════════════════════════════════════════════════════
// 1. Defaults
// ══════════════════════════════════════════════════════════

#[test]
fn defaults_are_sane() {
    let cfg = Config::default();
    assert_eq!(cfg.general.num_cores, 1);
    assert_eq!(cfg.general.num_bps, 1);
    assert_eq!(cfg.fetch.ftq_block_num, 32);
    assert_eq!(cfg.fetch.icache_line_size, 64);
    assert_eq!(cfg.uop_cache.width, 8);
    assert!(cfg.uop_cache.enable);
    assert_eq!(cfg.bp.mech, BpMech::Gshare);
    assert_eq!(cfg.uop_cache.repl, ReplPolicy::TrueLru);
    assert!(cfg.validate().is_ok());
}

#[test]
fn primary_recovery_policy_is_fixed() {
    let mut cfg = Config::default();
    cfg.general.dfe_recovery_policies =
        vec![RecoveryPolicy::ContinueOnRecovery, RecoveryPolicy::ContinueOnRecovery];
    assert_eq!(cfg.recovery_policy(0), RecoveryPolicy::PrimaryDfe);
    assert_eq!(cfg.recovery_policy(1), RecoveryPolicy::ContinueOnRecovery);
    assert_eq!(
        cfg.recovery_policy(4),
        RecoveryPolicy::ContinueOnPrediction,
        "unconfigured secondaries default to continue-on-prediction"
    );
}

// ══════════════════════════════════════════════════════════
// 2. JSON parsing
// ══════════════════════════════════════════════════════════

#[test]
fn partial_json_overrides_defaults() {
    let json = r#"{
        "general": { "num_bps": 2, "kernel": "call_return" },
        "bp": { "mech": "hybridgp", "crs_entries": 16 },
        "uop_cache": { "assoc": 4, "repl": "srrip" }
    }"#;
    let cfg = Config::from_json(json).unwrap();
    assert_eq!(cfg.general.num_bps, 2);
    assert_eq!(cfg.general.kernel, Kernel::CallReturn);
    assert_eq!(cfg.bp.mech, BpMech::Hybridgp);
    assert_eq!(cfg.bp.crs_entries, 16);
    assert_eq!(cfg.uop_cache.assoc, 4);
    assert_eq!(cfg.uop_cache.repl, ReplPolicy::Srrip);
    // Everything else keeps its default.
    assert_eq!(cfg.fetch.ftq_block_num, 32);
    assert!(cfg.bp.enable_crs);
}

#[test]
fn empty_json_is_all_defaults() {
    let cfg = Config::from_json("{}").unwrap();
    assert_eq!(cfg.general.num_cores, 1);
    assert_eq!(cfg.uop_cache.lines, 512);
}

#[test]
fn malformed_json_is_rejected() {
    assert!(Config::from_json("{ not json").is_err());
    assert!(Config::from_json(r#"{ "bp": { "mech": "tage9000" } }"#).is_err());
}

// ══════════════════════════════════════════════════════════
// 3. Validation
// ══════════════════════════════════════════════════════════

#[test]
fn out_of_range_values_are_rejected() {
    let mut cfg = Config::default();
    cfg.general.num_bps = 9;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.general.num_cores = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.fetch.icache_line_size = 48;
    assert!(cfg.validate().is_err());
}
