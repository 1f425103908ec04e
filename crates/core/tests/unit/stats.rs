//! Statistics Tests.
//!
//! Verifies distribution binning and the per-group dump format.

use fetchsim_core::stats::{CoreStats, Distribution};

// ══════════════════════════════════════════════════════════
// 1. Distributions
// ══════════════════════════════════════════════════════════

#[test]
fn distribution_bins_and_overflow() {
    let mut dist = Distribution::new(4);
    dist.incr(0);
    dist.incr(2);
    dist.incr(2);
    dist.incr(4);
    dist.incr(9); // lands in the overflow bin
    assert_eq!(dist.bins(), &[1, 0, 2, 0, 2]);
    assert_eq!(dist.total(), 5);
}

#[test]
fn empty_distribution_totals_zero() {
    let dist = Distribution::new(8);
    assert_eq!(dist.total(), 0);
    assert_eq!(dist.bins().len(), 9, "regular bins plus overflow");
}

// ══════════════════════════════════════════════════════════
// 2. Dump format
// ══════════════════════════════════════════════════════════

#[test]
fn write_all_produces_out_and_csv_per_group() {
    let dir = tempfile::tempdir().unwrap();
    let mut stats = CoreStats::default();
    stats.fetch.ftq_cycles_onpath = 123;
    stats.bp.cbr_correct = 7;
    stats.uop_cache.ft_lines_on_path.incr(3);
    stats.write_all(dir.path(), 2).unwrap();

    let out = std::fs::read_to_string(dir.path().join("fetch.stat.2.out")).unwrap();
    assert!(out.contains("Core 2"));
    assert!(out.contains("FTQ_CYCLES_ONPATH"));
    assert!(out.contains("123"));

    let csv = std::fs::read_to_string(dir.path().join("bp.stat.2.csv")).unwrap();
    assert!(csv.contains("CBR_CORRECT, 7"));

    let uc = std::fs::read_to_string(dir.path().join("uop_cache.stat.2.out")).unwrap();
    assert!(uc.contains("UOP_CACHE_FT_LINES_ON_PATH_3"));
    assert!(uc.contains("UOP_CACHE_LINE_EVICTED_USEFUL"));
}
