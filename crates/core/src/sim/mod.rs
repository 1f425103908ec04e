//! Simulation driver: per-core stage plumbing and the cycle loop.

/// Modeled back end (recovery and retirement signals only).
pub mod backend;
/// Icache stage consuming the FTQ.
pub mod icache;
/// Top-level simulator.
pub mod simulator;

pub use simulator::Simulator;
