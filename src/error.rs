//! Crate-wide error type (§7 ERROR HANDLING DESIGN).
//!
//! Input-validation and configuration-infeasibility kinds are ordinary
//! `Result` errors callers are expected to handle. The invariant-violation
//! kinds indicate a bug in the engine or its input DAG; they still flow
//! through `Result` rather than panicking so the scheduler can attach cycle
//! and job context before unwinding.

use crate::core::{Cycle, JobIndex, UnitIndex};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed layer line {line_no}: {line:?}")]
    InvalidLayerLine { line_no: usize, line: String },

    #[error("unknown layer type {layer_type:?} at line {line_no}")]
    UnknownLayerType { line_no: usize, layer_type: String },

    #[error("layer at line {line_no} has {found} dimensions, need 1..=8")]
    UnsupportedDimensionCount { line_no: usize, found: usize },

    #[error("first phase-timeline threshold must be 0, got {found}")]
    NonZeroFirstPhase { found: Cycle },

    #[error("phase timeline must be non-empty")]
    EmptyTimeline,

    #[error("unit {unit:?} at cycle {cycle}: loop_row_tiles or loop_cols_tiles is 0 on init")]
    ZeroTileLoop { unit: UnitIndex, cycle: Cycle },

    #[error("DRAM completion for address {address:#x} ({direction}) has no registered owner")]
    UnknownCompletionAddress { address: u64, direction: &'static str },

    #[error("attempted to re-initialise job {job:?}, which is already done")]
    ReinitDoneJob { job: JobIndex },

    #[error("unit {unit:?} reached an unreachable state-machine branch in phase {phase:?} at cycle {cycle}")]
    UnreachableState {
        unit: UnitIndex,
        phase: &'static str,
        cycle: Cycle,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("unknown flag: {flag}")]
    UnknownCliFlag { flag: String },

    #[error("flag {flag} requires a value")]
    MissingFlagValue { flag: &'static str },

    #[error("flag {flag} has invalid value {value:?}")]
    InvalidFlagValue { flag: &'static str, value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
