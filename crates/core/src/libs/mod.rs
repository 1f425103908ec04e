//! Generic data-structure libraries shared across the simulator.

/// Keyed set-associative cache with pluggable replacement policies.
pub mod cache;
