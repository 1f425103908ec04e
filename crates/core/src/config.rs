//! Configuration system for the front-end simulator.
//!
//! This module defines all configuration structures and enums used to
//! parameterize the simulator. It provides:
//! 1. **Defaults:** Baseline hardware constants (predictor tables, FTQ,
//!    uop cache, confidence).
//! 2. **Structures:** Hierarchical config for general, branch prediction,
//!    fetch, uop cache, uop queue, confidence, and lookahead settings.
//! 3. **Enums:** Predictor mechanism, replacement policy, recovery policy,
//!    confidence mechanism, and synthetic kernel types.
//!
//! Configuration is supplied via JSON (`serde_json`) or `Config::default()`.

use serde::Deserialize;

/// Default configuration constants for the simulator.
mod defaults {
    /// Number of simulated cores.
    pub const NUM_CORES: usize = 1;

    /// Number of branch predictor instances (DFEs) per core.
    pub const NUM_BPS: usize = 1;

    /// Simulated cycle budget for a run.
    pub const MAX_CYCLES: u64 = 1_000_000;

    /// Default Branch Target Buffer entry count.
    pub const BTB_ENTRIES: usize = 4096;

    /// Default Branch Target Buffer associativity.
    pub const BTB_ASSOC: usize = 4;

    /// Default indirect target predictor entry count.
    pub const IBTB_ENTRIES: usize = 4096;

    /// Default indirect target predictor associativity.
    pub const IBTB_ASSOC: usize = 4;

    /// Default gshare pattern history table size (log2).
    pub const PHT_BITS: usize = 16;

    /// Default call-return stack depth.
    pub const CRS_ENTRIES: usize = 32;

    /// Bits of each indirect target shifted into the target history.
    pub const TARG_HIST_BITS_PER_TARGET: u32 = 4;

    /// Additional recovery latency after a syscall redirect.
    pub const EXTRA_CALLSYS_CYCLES: u64 = 4;

    /// FTQ capacity in fetch targets.
    pub const FE_FTQ_BLOCK_NUM: usize = 32;

    /// Taken control-flow ops the DFE may produce per cycle.
    pub const FE_FTQ_TAKEN_CFS_PER_CYCLE: u64 = 2;

    /// Fetch targets the DFE may push per cycle.
    pub const FE_FTQ_FT_PER_CYCLE: u64 = 4;

    /// Instruction cache line size in bytes.
    pub const ICACHE_LINE_SIZE: u64 = 64;

    /// Ops the icache stage consumes from the current FT per cycle.
    pub const ISSUE_WIDTH: usize = 8;

    /// Uop cache capacity in lines.
    pub const UOP_CACHE_LINES: usize = 512;

    /// Uop cache associativity.
    pub const UOP_CACHE_ASSOC: usize = 8;

    /// Uops per uop cache line.
    pub const UOP_CACHE_WIDTH: usize = 8;

    /// Uop cache read ports (FT lookups per cycle).
    pub const UOP_CACHE_READ_PORTS: u32 = 1;

    /// Uop queue length in stage buffers.
    pub const UOP_QUEUE_LENGTH: usize = 8;

    /// Decode-point latency of the modeled back end, in cycles.
    pub const DECODE_CYCLES: u64 = 4;

    /// Execute-point latency of the modeled back end, in cycles.
    pub const EXEC_CYCLES: u64 = 12;

    /// Retire-point latency of the modeled back end, in cycles.
    pub const RETIRE_CYCLES: u64 = 16;

    /// Low-confidence accumulator threshold.
    pub const CONF_OFF_PATH_THRESHOLD: f64 = 1024.0;

    /// Accumulator increment applied when the cf-op distance saturates.
    pub const CONF_OFF_PATH_INC: f64 = 1.0;

    /// Weight of the BTB miss rate in the confidence accumulator.
    pub const CONF_BTB_MISS_RATE_WEIGHT: f64 = 8.0;

    /// BTB miss rate sampling window in cycles.
    pub const CONF_BTB_MISS_SAMPLE_RATE: u64 = 1024;

    /// Synthetic loop kernel iteration count.
    pub const KERNEL_ITERATIONS: u64 = 10_000;
}

/// Direction predictor mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BpMech {
    /// Global-history predictor with XOR indexing.
    #[default]
    Gshare,
    /// Hybrid global/per-address predictor with a chooser table.
    Hybridgp,
}

/// Branch target buffer mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BtbMech {
    /// Set-associative BTB over the generic cache library.
    #[default]
    Generic,
}

/// Indirect target predictor mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IbtbMech {
    /// Target cache indexed by pc ^ target history, tagged.
    #[default]
    TcTagged,
    /// Target cache indexed by pc ^ target history, tagless (direct-mapped).
    TcTagless,
}

/// Confidence estimator mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfMech {
    /// Weight-based accumulator over btb-miss rate and bp confidence.
    #[default]
    Weight,
    /// Oracle confidence: marks off-path exactly at the mispredicted op.
    Perfect,
}

/// Cache replacement policy for the uop cache and predictor tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplPolicy {
    /// Actual least-recently-used replacement (access-stamp based).
    #[default]
    TrueLru,
    /// Uniform random over the ways of the set.
    Random,
    /// Next way after the last eviction, skipping invalid ways.
    RoundRobin,
    /// Static re-reference interval prediction (2-bit RRPVs).
    Srrip,
    /// Bimodal RRIP; currently modeled with the SRRIP policy.
    Brrip,
    /// Dynamic RRIP; currently modeled with the SRRIP policy.
    Drrip,
    /// Signature-based hit prediction; currently modeled with SRRIP.
    Ship,
}

/// Recovery policy of a decoupled front-end instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// The architectural DFE: consumes the saved recovery FT on recovery.
    #[default]
    PrimaryDfe,
    /// Redirect to the last fetched address and keep serving (forced off-path).
    ContinueOnRecovery,
    /// Explore only up to the redirect point, then go inactive.
    ContinueOnPrediction,
}

/// Synthetic frontend kernel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    /// Straight-line body with a conditional back branch.
    #[default]
    Loop,
    /// Call/return ladder exercising the call-return stack.
    CallReturn,
    /// Indirect-branch dispatch over a small target table.
    IndirectDispatch,
}

/// Root configuration structure containing all simulator settings.
///
/// # Examples
///
/// ```
/// use fetchsim_core::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.general.num_cores, 1);
/// assert_eq!(config.fetch.ftq_block_num, 32);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// General simulation settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Branch prediction configuration
    #[serde(default)]
    pub bp: BpConfig,
    /// Fetch target and FTQ configuration
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Uop cache configuration
    #[serde(default)]
    pub uop_cache: UopCacheConfig,
    /// Uop queue configuration
    #[serde(default)]
    pub uop_queue: UopQueueConfig,
    /// Modeled back-end latencies
    #[serde(default)]
    pub backend: BackendConfig,
    /// Confidence estimator configuration
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    /// Lookahead buffer configuration
    #[serde(default)]
    pub lookahead: LookaheadConfig,
}

impl Config {
    /// Parses a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, crate::common::SimError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), crate::common::SimError> {
        use crate::common::SimError;
        if self.general.num_cores == 0 {
            return Err(SimError::ConfigValue("num_cores must be nonzero".into()));
        }
        if self.general.num_bps == 0 || self.general.num_bps > 5 {
            return Err(SimError::ConfigValue(
                "num_bps must be between 1 and 5".into(),
            ));
        }
        if !self.fetch.icache_line_size.is_power_of_two() {
            return Err(SimError::ConfigValue(
                "icache_line_size must be a power of two".into(),
            ));
        }
        if self.uop_cache.enable && self.uop_cache.assoc == 0 {
            return Err(SimError::ConfigValue(
                "uop_cache assoc must be nonzero".into(),
            ));
        }
        Ok(())
    }

    /// Recovery policy of the DFE with the given predictor id.
    ///
    /// The primary DFE always runs `PrimaryDfe`; unconfigured secondaries
    /// default to `ContinueOnPrediction`.
    pub fn recovery_policy(&self, bp_id: usize) -> RecoveryPolicy {
        if bp_id == 0 {
            return RecoveryPolicy::PrimaryDfe;
        }
        self.general
            .dfe_recovery_policies
            .get(bp_id)
            .copied()
            .unwrap_or(RecoveryPolicy::ContinueOnPrediction)
    }
}

/// General simulation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Number of simulated cores
    #[serde(default = "GeneralConfig::default_num_cores")]
    pub num_cores: usize,

    /// Number of branch predictor instances (DFEs) per core
    #[serde(default = "GeneralConfig::default_num_bps")]
    pub num_bps: usize,

    /// Simulated cycle budget
    #[serde(default = "GeneralConfig::default_max_cycles")]
    pub max_cycles: u64,

    /// Per-DFE recovery policies, indexed by predictor id
    #[serde(default)]
    pub dfe_recovery_policies: Vec<RecoveryPolicy>,

    /// Synthetic frontend kernel
    #[serde(default)]
    pub kernel: Kernel,

    /// Synthetic loop kernel iteration count
    #[serde(default = "GeneralConfig::default_kernel_iterations")]
    pub kernel_iterations: u64,

    /// Statistics output directory (empty disables file output)
    #[serde(default)]
    pub output_dir: String,
}

impl GeneralConfig {
    fn default_num_cores() -> usize {
        defaults::NUM_CORES
    }

    fn default_num_bps() -> usize {
        defaults::NUM_BPS
    }

    fn default_max_cycles() -> u64 {
        defaults::MAX_CYCLES
    }

    fn default_kernel_iterations() -> u64 {
        defaults::KERNEL_ITERATIONS
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            num_cores: defaults::NUM_CORES,
            num_bps: defaults::NUM_BPS,
            max_cycles: defaults::MAX_CYCLES,
            dfe_recovery_policies: Vec::new(),
            kernel: Kernel::default(),
            kernel_iterations: defaults::KERNEL_ITERATIONS,
            output_dir: String::new(),
        }
    }
}

/// Branch prediction configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BpConfig {
    /// Direction predictor mechanism
    #[serde(default)]
    pub mech: BpMech,

    /// BTB mechanism
    #[serde(default)]
    pub btb_mech: BtbMech,

    /// Indirect predictor mechanism
    #[serde(default)]
    pub ibtb_mech: IbtbMech,

    /// BTB entry count
    #[serde(default = "BpConfig::default_btb_entries")]
    pub btb_entries: usize,

    /// BTB associativity
    #[serde(default = "BpConfig::default_btb_assoc")]
    pub btb_assoc: usize,

    /// Indirect predictor entry count
    #[serde(default = "BpConfig::default_ibtb_entries")]
    pub ibtb_entries: usize,

    /// Indirect predictor associativity
    #[serde(default = "BpConfig::default_ibtb_assoc")]
    pub ibtb_assoc: usize,

    /// Pattern history table size (log2)
    #[serde(default = "BpConfig::default_pht_bits")]
    pub pht_bits: usize,

    /// Call-return stack depth
    #[serde(default = "BpConfig::default_crs_entries")]
    pub crs_entries: usize,

    /// Call-return stack realism mode (0 = pointer restore, 1/2 = replayed)
    #[serde(default)]
    pub crs_realistic: u8,

    /// Enable the call-return stack
    #[serde(default = "BpConfig::default_true")]
    pub enable_crs: bool,

    /// Enable the indirect target predictor
    #[serde(default = "BpConfig::default_true")]
    pub enable_ibp: bool,

    /// Fold the call-return stack top into the indirect predictor index
    #[serde(default)]
    pub ibtb_hash_tos: bool,

    /// Enable per-branch confidence prediction
    #[serde(default = "BpConfig::default_true")]
    pub enable_bp_conf: bool,

    /// Oracle direction prediction
    #[serde(default)]
    pub perfect_bp: bool,

    /// Oracle targets for conditional branches
    #[serde(default)]
    pub perfect_cbr_btb: bool,

    /// Oracle targets for not-taken branches
    #[serde(default)]
    pub perfect_nt_btb: bool,

    /// Train the direction predictor on off-path resolutions
    #[serde(default)]
    pub update_bp_off_path: bool,

    /// Allow off-path indirect-predictor writes
    #[serde(default)]
    pub ibtb_off_path_writes: bool,

    /// Extra recovery latency for syscalls
    #[serde(default = "BpConfig::default_extra_callsys_cycles")]
    pub extra_callsys_cycles: u64,
}

impl BpConfig {
    fn default_btb_entries() -> usize {
        defaults::BTB_ENTRIES
    }

    fn default_btb_assoc() -> usize {
        defaults::BTB_ASSOC
    }

    fn default_ibtb_entries() -> usize {
        defaults::IBTB_ENTRIES
    }

    fn default_ibtb_assoc() -> usize {
        defaults::IBTB_ASSOC
    }

    fn default_pht_bits() -> usize {
        defaults::PHT_BITS
    }

    fn default_crs_entries() -> usize {
        defaults::CRS_ENTRIES
    }

    fn default_extra_callsys_cycles() -> u64 {
        defaults::EXTRA_CALLSYS_CYCLES
    }

    fn default_true() -> bool {
        true
    }

    /// Bits of each target folded into the indirect target history.
    pub fn targ_hist_bits_per_target(&self) -> u32 {
        defaults::TARG_HIST_BITS_PER_TARGET
    }
}

impl Default for BpConfig {
    fn default() -> Self {
        Self {
            mech: BpMech::default(),
            btb_mech: BtbMech::default(),
            ibtb_mech: IbtbMech::default(),
            btb_entries: defaults::BTB_ENTRIES,
            btb_assoc: defaults::BTB_ASSOC,
            ibtb_entries: defaults::IBTB_ENTRIES,
            ibtb_assoc: defaults::IBTB_ASSOC,
            pht_bits: defaults::PHT_BITS,
            crs_entries: defaults::CRS_ENTRIES,
            crs_realistic: 0,
            enable_crs: true,
            enable_ibp: true,
            ibtb_hash_tos: false,
            enable_bp_conf: true,
            perfect_bp: false,
            perfect_cbr_btb: false,
            perfect_nt_btb: false,
            update_bp_off_path: false,
            ibtb_off_path_writes: false,
            extra_callsys_cycles: defaults::EXTRA_CALLSYS_CYCLES,
        }
    }
}

/// Fetch target and FTQ configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// FTQ capacity in fetch targets
    #[serde(default = "FetchConfig::default_ftq_block_num")]
    pub ftq_block_num: usize,

    /// Taken control-flow ops produced per cycle
    #[serde(default = "FetchConfig::default_taken_cfs")]
    pub taken_cfs_per_cycle: u64,

    /// Fetch targets pushed per cycle
    #[serde(default = "FetchConfig::default_ft_per_cycle")]
    pub ft_per_cycle: u64,

    /// Instruction cache line size in bytes
    #[serde(default = "FetchConfig::default_icache_line_size")]
    pub icache_line_size: u64,

    /// Ops the icache stage consumes per cycle
    #[serde(default = "FetchConfig::default_issue_width")]
    pub issue_width: usize,
}

impl FetchConfig {
    fn default_ftq_block_num() -> usize {
        defaults::FE_FTQ_BLOCK_NUM
    }

    fn default_taken_cfs() -> u64 {
        defaults::FE_FTQ_TAKEN_CFS_PER_CYCLE
    }

    fn default_ft_per_cycle() -> u64 {
        defaults::FE_FTQ_FT_PER_CYCLE
    }

    fn default_icache_line_size() -> u64 {
        defaults::ICACHE_LINE_SIZE
    }

    fn default_issue_width() -> usize {
        defaults::ISSUE_WIDTH
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            ftq_block_num: defaults::FE_FTQ_BLOCK_NUM,
            taken_cfs_per_cycle: defaults::FE_FTQ_TAKEN_CFS_PER_CYCLE,
            ft_per_cycle: defaults::FE_FTQ_FT_PER_CYCLE,
            icache_line_size: defaults::ICACHE_LINE_SIZE,
            issue_width: defaults::ISSUE_WIDTH,
        }
    }
}

/// Uop cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UopCacheConfig {
    /// Enable the uop cache
    #[serde(default = "UopCacheConfig::default_true")]
    pub enable: bool,

    /// Capacity in lines
    #[serde(default = "UopCacheConfig::default_lines")]
    pub lines: usize,

    /// Associativity
    #[serde(default = "UopCacheConfig::default_assoc")]
    pub assoc: usize,

    /// Uops per line
    #[serde(default = "UopCacheConfig::default_width")]
    pub width: usize,

    /// FT lookups per cycle
    #[serde(default = "UopCacheConfig::default_read_ports")]
    pub read_ports: u32,

    /// Replacement policy
    #[serde(default)]
    pub repl: ReplPolicy,

    /// Insert only on-path fetch targets
    #[serde(default)]
    pub insert_only_onpath: bool,
}

impl UopCacheConfig {
    fn default_true() -> bool {
        true
    }

    fn default_lines() -> usize {
        defaults::UOP_CACHE_LINES
    }

    fn default_assoc() -> usize {
        defaults::UOP_CACHE_ASSOC
    }

    fn default_width() -> usize {
        defaults::UOP_CACHE_WIDTH
    }

    fn default_read_ports() -> u32 {
        defaults::UOP_CACHE_READ_PORTS
    }
}

impl Default for UopCacheConfig {
    fn default() -> Self {
        Self {
            enable: true,
            lines: defaults::UOP_CACHE_LINES,
            assoc: defaults::UOP_CACHE_ASSOC,
            width: defaults::UOP_CACHE_WIDTH,
            read_ports: defaults::UOP_CACHE_READ_PORTS,
            repl: ReplPolicy::default(),
            insert_only_onpath: false,
        }
    }
}

/// Uop queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UopQueueConfig {
    /// Queue length in stage buffers
    #[serde(default = "UopQueueConfig::default_length")]
    pub length: usize,
}

impl UopQueueConfig {
    fn default_length() -> usize {
        defaults::UOP_QUEUE_LENGTH
    }
}

impl Default for UopQueueConfig {
    fn default() -> Self {
        Self {
            length: defaults::UOP_QUEUE_LENGTH,
        }
    }
}

/// Modeled back-end latencies.
///
/// The back end is external to this core; only its recovery and retirement
/// signals are modeled, at fixed decode/execute/retire latencies.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Cycles from uop-queue exit to the decode point
    #[serde(default = "BackendConfig::default_decode_cycles")]
    pub decode_cycles: u64,

    /// Cycles from uop-queue exit to the execute point
    #[serde(default = "BackendConfig::default_exec_cycles")]
    pub exec_cycles: u64,

    /// Cycles from uop-queue exit to retirement
    #[serde(default = "BackendConfig::default_retire_cycles")]
    pub retire_cycles: u64,
}

impl BackendConfig {
    fn default_decode_cycles() -> u64 {
        defaults::DECODE_CYCLES
    }

    fn default_exec_cycles() -> u64 {
        defaults::EXEC_CYCLES
    }

    fn default_retire_cycles() -> u64 {
        defaults::RETIRE_CYCLES
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            decode_cycles: defaults::DECODE_CYCLES,
            exec_cycles: defaults::EXEC_CYCLES,
            retire_cycles: defaults::RETIRE_CYCLES,
        }
    }
}

/// Confidence estimator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceConfig {
    /// Enable the confidence estimator
    #[serde(default)]
    pub enable: bool,

    /// Estimator mechanism
    #[serde(default)]
    pub mech: ConfMech,

    /// Low-confidence accumulator threshold
    #[serde(default = "ConfidenceConfig::default_threshold")]
    pub off_path_threshold: f64,

    /// Accumulator increment at cf-op distance saturation
    #[serde(default = "ConfidenceConfig::default_inc")]
    pub off_path_inc: f64,

    /// Weight of the BTB miss rate
    #[serde(default = "ConfidenceConfig::default_weight")]
    pub btb_miss_rate_weight: f64,

    /// BTB miss rate sampling window in cycles
    #[serde(default = "ConfidenceConfig::default_sample_rate")]
    pub btb_miss_sample_rate: u64,
}

impl ConfidenceConfig {
    fn default_threshold() -> f64 {
        defaults::CONF_OFF_PATH_THRESHOLD
    }

    fn default_inc() -> f64 {
        defaults::CONF_OFF_PATH_INC
    }

    fn default_weight() -> f64 {
        defaults::CONF_BTB_MISS_RATE_WEIGHT
    }

    fn default_sample_rate() -> u64 {
        defaults::CONF_BTB_MISS_SAMPLE_RATE
    }
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            enable: false,
            mech: ConfMech::default(),
            off_path_threshold: defaults::CONF_OFF_PATH_THRESHOLD,
            off_path_inc: defaults::CONF_OFF_PATH_INC,
            btb_miss_rate_weight: defaults::CONF_BTB_MISS_RATE_WEIGHT,
            btb_miss_sample_rate: defaults::CONF_BTB_MISS_SAMPLE_RATE,
        }
    }
}

/// Lookahead buffer configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookaheadConfig {
    /// Buffer capacity in prebuilt fetch targets (0 disables the buffer)
    #[serde(default)]
    pub buf_size: usize,
}
