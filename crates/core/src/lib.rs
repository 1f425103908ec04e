//! Decoupled front-end simulator library.
//!
//! This crate implements a cycle-accurate model of the speculative fetch
//! path of an out-of-order superscalar core:
//! 1. **Branch prediction:** direction predictors (gshare, hybrid), BTB,
//!    indirect target predictor, and call-return stack behind one
//!    predict/update/recover surface.
//! 2. **Fetch targets:** control-flow-bounded op blocks with build,
//!    predict, split, and consecutivity validation.
//! 3. **Decoupled front end:** the per-core FSM owning the fetch target
//!    queue, wrong-path redirects, and recoveries.
//! 4. **Uop cache:** FT-granular insertion and coherent FT-wide eviction
//!    feeding a uop queue that bypasses decode on hits.
//! 5. **Simulation:** `Simulator` (cores, stages, cycle loop), synthetic
//!    and replay frontends, configuration, and statistics.

/// Branch predictor surface (direction, BTB, indirect, CRS, recovery).
pub mod bp;
/// Common types and helpers (addresses, sentinels, errors).
pub mod common;
/// Simulator configuration (defaults, enums, hierarchical structures).
pub mod config;
/// Confidence estimation for in-flight speculation.
pub mod confidence;
/// Decoupled front-end state machine and fetch target queue.
pub mod dfe;
/// Instruction stream sources (synthetic kernels, scripted replay).
pub mod frontend;
/// Fetch targets: control-flow-bounded blocks of ops.
pub mod ft;
/// Generic data-structure libraries (keyed set-associative cache).
pub mod libs;
/// Lookahead buffer of prebuilt fetch targets.
pub mod lookahead;
/// Micro-operation records and the recyclable op pool.
pub mod op;
/// Simulation driver: stages and the cycle loop.
pub mod sim;
/// Statistics collection and reporting.
pub mod stats;
/// Uop cache with fetch-target-granular insertion.
pub mod uop_cache;
/// Uop queue buffering decoded uop bundles.
pub mod uop_queue;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Top-level simulator; owns the cores and drives the cycle loop.
pub use crate::sim::Simulator;
