//! Simulation statistics collection and reporting.
//!
//! This module tracks the front-end metrics of the simulator. It provides:
//! 1. **Fetch:** FTQ production, per-cycle break reasons, recovery counts.
//! 2. **Branch prediction:** BTB/IBTB outcomes and per-cf-type resolution.
//! 3. **Uop cache:** hit/miss, insertion outcomes, eviction usefulness.
//! 4. **Uop queue:** stall/starve accounting.
//!
//! Counters are plain `u64` fields grouped per concern. Each group is
//! dumped as one plain-text `.out` file and one `.csv` file per core into
//! a configured output directory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::common::SimError;

/// A fixed set of bins with an overflow bin at the end.
///
/// Used for size histograms such as "uop cache lines per fetch target".
#[derive(Debug, Clone)]
pub struct Distribution {
    bins: Vec<u64>,
}

impl Distribution {
    /// Creates a distribution with `n` regular bins plus one overflow bin.
    pub fn new(n: usize) -> Self {
        Self {
            bins: vec![0; n + 1],
        }
    }

    /// Increments the bin for `value`; values past the last bin land in
    /// the overflow bin.
    pub fn incr(&mut self, value: usize) {
        let idx = value.min(self.bins.len() - 1);
        self.bins[idx] += 1;
    }

    /// Bin counts, overflow bin last.
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Sum over all bins.
    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }
}

/// One reportable statistic.
enum StatRow<'a> {
    Counter(&'static str, u64),
    Dist(&'static str, &'a Distribution),
}

/// Fetch target queue and DFE statistics.
#[derive(Debug, Clone, Default)]
pub struct FetchStats {
    /// Cycles the primary DFE spent serving the correct path.
    pub ftq_cycles_onpath: u64,
    /// Cycles the primary DFE spent serving a wrong path.
    pub ftq_cycles_offpath: u64,
    /// Production breaks due to a full FTQ.
    pub ftq_break_full_ft: u64,
    /// Production breaks due to the taken-cf quota.
    pub ftq_break_max_cfs_taken: u64,
    /// Production breaks due to the FT-per-cycle quota.
    pub ftq_break_max_ft: u64,
    /// Production breaks because the predictor was not predictable.
    pub ftq_break_pred_br: u64,
    /// Production breaks behind an unresolved fetch barrier.
    pub ftq_break_bar_fetch: u64,
    /// Ops fetched into fetch targets on the correct path.
    pub ftq_fetched_ins_onpath: u64,
    /// Ops fetched into fetch targets on a wrong path.
    pub ftq_fetched_ins_offpath: u64,
    /// Fetch barriers observed during prediction.
    pub ftq_saw_bar_fetch: u64,
    /// Fetch targets produced on the correct path.
    pub dfe_gen_on_path_ft: u64,
    /// Fetch targets produced on a wrong path.
    pub dfe_gen_off_path_ft: u64,
    /// Recoveries applied for decode-resolved flushes.
    pub ftq_recover_decode: u64,
    /// Recoveries applied for execute-resolved flushes.
    pub ftq_recover_exec: u64,
    /// Total cycles between redirect and recovery.
    pub ftq_offpath_cycles: u64,
    /// On-path fetch targets found in the lookahead window.
    pub lookahead_hits: u64,
    /// On-path fetch targets absent from the lookahead window.
    pub lookahead_misses: u64,
}

impl FetchStats {
    fn rows(&self) -> Vec<StatRow<'_>> {
        vec![
            StatRow::Counter("FTQ_CYCLES_ONPATH", self.ftq_cycles_onpath),
            StatRow::Counter("FTQ_CYCLES_OFFPATH", self.ftq_cycles_offpath),
            StatRow::Counter("FTQ_BREAK_FULL_FT", self.ftq_break_full_ft),
            StatRow::Counter("FTQ_BREAK_MAX_CFS_TAKEN", self.ftq_break_max_cfs_taken),
            StatRow::Counter("FTQ_BREAK_MAX_FT", self.ftq_break_max_ft),
            StatRow::Counter("FTQ_BREAK_PRED_BR", self.ftq_break_pred_br),
            StatRow::Counter("FTQ_BREAK_BAR_FETCH", self.ftq_break_bar_fetch),
            StatRow::Counter("FTQ_FETCHED_INS_ONPATH", self.ftq_fetched_ins_onpath),
            StatRow::Counter("FTQ_FETCHED_INS_OFFPATH", self.ftq_fetched_ins_offpath),
            StatRow::Counter("FTQ_SAW_BAR_FETCH", self.ftq_saw_bar_fetch),
            StatRow::Counter("DFE_GEN_ON_PATH_FT", self.dfe_gen_on_path_ft),
            StatRow::Counter("DFE_GEN_OFF_PATH_FT", self.dfe_gen_off_path_ft),
            StatRow::Counter("FTQ_RECOVER_DECODE", self.ftq_recover_decode),
            StatRow::Counter("FTQ_RECOVER_EXEC", self.ftq_recover_exec),
            StatRow::Counter("FTQ_OFFPATH_CYCLES", self.ftq_offpath_cycles),
            StatRow::Counter("LOOKAHEAD_HITS", self.lookahead_hits),
            StatRow::Counter("LOOKAHEAD_MISSES", self.lookahead_misses),
        ]
    }
}

/// Branch prediction statistics.
#[derive(Debug, Clone, Default)]
pub struct BpStats {
    /// BTB hits on a predicted cf op.
    pub btb_correct: u64,
    /// BTB misses on a predicted cf op.
    pub btb_incorrect: u64,
    /// BTB misses rescued because the fall-through equals the target.
    pub btb_target_rescue: u64,
    /// Indirect predictor hits.
    pub ibtb_correct: u64,
    /// Indirect predictor misses.
    pub ibtb_incorrect: u64,
    /// Correctly handled unconditional branches.
    pub br_correct: u64,
    /// Unconditional branches needing a decode recovery.
    pub br_recover: u64,
    /// Correctly handled conditional branches.
    pub cbr_correct: u64,
    /// Conditional direction mispredictions (execute recovery).
    pub cbr_mispredict: u64,
    /// Conditional misfetches (decode recovery).
    pub cbr_misfetch: u64,
    /// Conditional outcomes decided under a BTB miss.
    pub cbr_btb_miss: u64,
    /// Correctly handled calls.
    pub call_correct: u64,
    /// Calls needing a decode recovery.
    pub call_recover: u64,
    /// Correctly handled call-outs.
    pub ico_correct: u64,
    /// Call-outs needing an execute recovery.
    pub ico_recover: u64,
    /// Correctly handled returns.
    pub ret_correct: u64,
    /// Returns needing an execute recovery.
    pub ret_recover: u64,
    /// Returns that underflowed the call-return stack.
    pub ret_underflow: u64,
    /// Correctly handled indirect branches and calls.
    pub ibr_correct: u64,
    /// Indirect target mismatches (execute recovery).
    pub ibr_recover: u64,
    /// Indirects missing in both BTB and indirect predictor.
    pub ibr_xbtb_miss: u64,
    /// Recoveries latched at the execute point.
    pub scheduled_exec_recoveries: u64,
    /// Recoveries latched at the decode point.
    pub scheduled_decode_recoveries: u64,
    /// Predictor-side recoveries performed.
    pub performed_recoveries: u64,
}

impl BpStats {
    fn rows(&self) -> Vec<StatRow<'_>> {
        vec![
            StatRow::Counter("BTB_CORRECT", self.btb_correct),
            StatRow::Counter("BTB_INCORRECT", self.btb_incorrect),
            StatRow::Counter("BTB_TARGET_RESCUE", self.btb_target_rescue),
            StatRow::Counter("IBTB_CORRECT", self.ibtb_correct),
            StatRow::Counter("IBTB_INCORRECT", self.ibtb_incorrect),
            StatRow::Counter("BR_CORRECT", self.br_correct),
            StatRow::Counter("BR_RECOVER", self.br_recover),
            StatRow::Counter("CBR_CORRECT", self.cbr_correct),
            StatRow::Counter("CBR_MISPREDICT", self.cbr_mispredict),
            StatRow::Counter("CBR_MISFETCH", self.cbr_misfetch),
            StatRow::Counter("CBR_BTB_MISS", self.cbr_btb_miss),
            StatRow::Counter("CALL_CORRECT", self.call_correct),
            StatRow::Counter("CALL_RECOVER", self.call_recover),
            StatRow::Counter("ICO_CORRECT", self.ico_correct),
            StatRow::Counter("ICO_RECOVER", self.ico_recover),
            StatRow::Counter("RET_CORRECT", self.ret_correct),
            StatRow::Counter("RET_RECOVER", self.ret_recover),
            StatRow::Counter("RET_UNDERFLOW", self.ret_underflow),
            StatRow::Counter("IBR_CORRECT", self.ibr_correct),
            StatRow::Counter("IBR_RECOVER", self.ibr_recover),
            StatRow::Counter("IBR_XBTB_MISS", self.ibr_xbtb_miss),
            StatRow::Counter("SCHEDULED_EXEC_RECOVERIES", self.scheduled_exec_recoveries),
            StatRow::Counter(
                "SCHEDULED_DECODE_RECOVERIES",
                self.scheduled_decode_recoveries,
            ),
            StatRow::Counter("PERFORMED_RECOVERIES", self.performed_recoveries),
        ]
    }
}

/// Uop cache statistics.
#[derive(Debug, Clone)]
pub struct UopCacheStats {
    /// FT lookups that hit across all of their lines.
    pub ft_hits: u64,
    /// FT lookups that missed.
    pub ft_misses: u64,
    /// Whole FTs inserted.
    pub ft_inserted: u64,
    /// Lines inserted.
    pub line_inserted: u64,
    /// FT insertions rejected: an instruction was wider than a line.
    pub ft_insert_failed_inst_too_big: u64,
    /// FT insertions rejected: FT spans more lines than the associativity.
    pub ft_insert_failed_ft_too_big: u64,
    /// FT insertions that found their lines already present.
    pub ft_short_reuse_conflicted: u64,
    /// Line insertions skipped because the line was already present.
    pub line_short_reuse_conflicted: u64,
    /// Evicted lines that had been used.
    pub line_evicted_useful: u64,
    /// Evicted lines that were never used.
    pub line_evicted_useless: u64,
    /// Lines per inserted on-path FT.
    pub ft_lines_on_path: Distribution,
    /// Lines per inserted off-path FT.
    pub ft_lines_off_path: Distribution,
}

impl Default for UopCacheStats {
    fn default() -> Self {
        Self {
            ft_hits: 0,
            ft_misses: 0,
            ft_inserted: 0,
            line_inserted: 0,
            ft_insert_failed_inst_too_big: 0,
            ft_insert_failed_ft_too_big: 0,
            ft_short_reuse_conflicted: 0,
            line_short_reuse_conflicted: 0,
            line_evicted_useful: 0,
            line_evicted_useless: 0,
            ft_lines_on_path: Distribution::new(8),
            ft_lines_off_path: Distribution::new(8),
        }
    }
}

impl UopCacheStats {
    fn rows(&self) -> Vec<StatRow<'_>> {
        vec![
            StatRow::Counter("UOP_CACHE_FT_HITS", self.ft_hits),
            StatRow::Counter("UOP_CACHE_FT_MISSES", self.ft_misses),
            StatRow::Counter("UOP_CACHE_FT_INSERTED", self.ft_inserted),
            StatRow::Counter("UOP_CACHE_LINE_INSERTED", self.line_inserted),
            StatRow::Counter(
                "UOP_CACHE_FT_INSERT_FAILED_INST_TOO_BIG",
                self.ft_insert_failed_inst_too_big,
            ),
            StatRow::Counter(
                "UOP_CACHE_FT_INSERT_FAILED_FT_TOO_BIG",
                self.ft_insert_failed_ft_too_big,
            ),
            StatRow::Counter(
                "UOP_CACHE_FT_SHORT_REUSE_CONFLICTED",
                self.ft_short_reuse_conflicted,
            ),
            StatRow::Counter(
                "UOP_CACHE_LINE_SHORT_REUSE_CONFLICTED",
                self.line_short_reuse_conflicted,
            ),
            StatRow::Counter("UOP_CACHE_LINE_EVICTED_USEFUL", self.line_evicted_useful),
            StatRow::Counter("UOP_CACHE_LINE_EVICTED_USELESS", self.line_evicted_useless),
            StatRow::Dist("UOP_CACHE_FT_LINES_ON_PATH", &self.ft_lines_on_path),
            StatRow::Dist("UOP_CACHE_FT_LINES_OFF_PATH", &self.ft_lines_off_path),
        ]
    }
}

/// Uop queue statistics.
#[derive(Debug, Clone, Default)]
pub struct UopQueueStats {
    /// Cycles the queue was full.
    pub stalled: u64,
    /// Cycles the queue accepted ops.
    pub not_stalled: u64,
    /// Cycles the queue received nothing from the source stage.
    pub starved: u64,
    /// Cycles the queue received at least one op.
    pub not_starved: u64,
    /// Cycles the queue held off-path ops.
    pub off_path_cycles: u64,
    /// Ops flushed out of the queue by recoveries.
    pub flushed_ops: u64,
}

impl UopQueueStats {
    fn rows(&self) -> Vec<StatRow<'_>> {
        vec![
            StatRow::Counter("UOPQ_STAGE_STALLED", self.stalled),
            StatRow::Counter("UOPQ_STAGE_NOT_STALLED", self.not_stalled),
            StatRow::Counter("UOPQ_STAGE_STARVED", self.starved),
            StatRow::Counter("UOPQ_STAGE_NOT_STARVED", self.not_starved),
            StatRow::Counter("UOPQ_STAGE_OFF_PATH", self.off_path_cycles),
            StatRow::Counter("UOPQ_FLUSHED_OPS", self.flushed_ops),
        ]
    }
}

/// All statistics for one core.
#[derive(Debug, Clone, Default)]
pub struct CoreStats {
    /// FTQ and DFE counters.
    pub fetch: FetchStats,
    /// Branch predictor counters.
    pub bp: BpStats,
    /// Uop cache counters.
    pub uop_cache: UopCacheStats,
    /// Uop queue counters.
    pub uop_queue: UopQueueStats,
}

impl CoreStats {
    /// Writes one `.out` and one `.csv` file per stat group for this core
    /// into `dir`, tagged with the core id.
    pub fn write_all(&self, dir: &Path, proc_id: usize) -> Result<(), SimError> {
        std::fs::create_dir_all(dir)?;
        write_group(dir, "fetch", proc_id, &self.fetch.rows())?;
        write_group(dir, "bp", proc_id, &self.bp.rows())?;
        write_group(dir, "uop_cache", proc_id, &self.uop_cache.rows())?;
        write_group(dir, "uop_queue", proc_id, &self.uop_queue.rows())?;
        Ok(())
    }
}

fn write_group(
    dir: &Path,
    group: &str,
    proc_id: usize,
    rows: &[StatRow<'_>],
) -> Result<(), SimError> {
    let out_path = dir.join(format!("{group}.stat.{proc_id}.out"));
    let csv_path = dir.join(format!("{group}.stat.{proc_id}.csv"));
    let mut out = BufWriter::new(File::create(out_path)?);
    let mut csv = BufWriter::new(File::create(csv_path)?);

    writeln!(out, "/* -*- Mode: c -*- */")?;
    writeln!(out, "{}", "#".repeat(100))?;
    writeln!(out, "Core {proc_id}")?;
    writeln!(out)?;
    writeln!(csv, "Core, {proc_id}")?;

    for row in rows {
        match row {
            StatRow::Counter(name, value) => {
                writeln!(out, "{name:<44} {value:>16}")?;
                writeln!(csv, "{name}, {value}")?;
            }
            StatRow::Dist(name, dist) => {
                let total = dist.total().max(1);
                for (bin, count) in dist.bins().iter().enumerate() {
                    let overflow = bin == dist.bins().len() - 1;
                    let label = if overflow {
                        format!("{name}_{bin}_AND_MORE")
                    } else {
                        format!("{name}_{bin}")
                    };
                    writeln!(
                        out,
                        "{label:<44} {count:>16} {:>11.3}%",
                        (*count as f64 / total as f64) * 100.0
                    )?;
                    writeln!(csv, "{label}, {count}")?;
                }
            }
        }
    }
    writeln!(out)?;
    Ok(())
}
