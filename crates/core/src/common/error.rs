//! Simulator error definitions.
//!
//! Speculation-path anomalies (mispredictions, BTB misses, fetch barriers)
//! are not errors: they are typed fields on the op and flow through the
//! front-end state machine. The error type here covers the fallible outer
//! surface only: configuration parsing and statistics output.

use std::io;

use thiserror::Error;

/// Errors from configuration loading and statistics dumping.
#[derive(Debug, Error)]
pub enum SimError {
    /// The JSON configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A configuration value is out of its supported range.
    #[error("invalid configuration value: {0}")]
    ConfigValue(String),

    /// Writing a statistics file failed.
    #[error("stats output failed: {0}")]
    StatsIo(#[from] io::Error),
}
