//! Accelerator configuration: the CLI-flag-equivalent settings (§6), loadable
//! from TOML or JSON the way `evo_control_unit`/`evo_hal_core` load theirs.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dataflow policy for the systolic array: weight-stationary or
/// output-stationary (`-ws` CLI flag: `1` = WS, `0` = OS).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataflow {
    WeightStationary,
    OutputStationary,
}

/// Reference-model constants the original source hard-codes in `global.h`,
/// plus the knobs spec.md §6 exposes as CLI flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Number of cores (execution units per kind).
    pub num_cores: usize,
    /// Systolic-array edge length.
    pub systolic_array_size: u32,
    /// Vector-unit width.
    pub vector_unit_size: u32,
    /// Dataflow policy for systolic arrays.
    pub dataflow: Dataflow,
    /// Accelerator clock frequency, GHz.
    pub frequency_ghz: f64,
    /// Max reads (and, separately, max writes) an EUS may emit per cycle.
    pub dram_enq_per_cycle: u32,
    /// Bytes per DRAM beat (`bytes_per_transaction` in spec.md §3).
    pub bytes_per_transaction: u32,
    /// Data element width in bytes.
    pub data_type_width: u32,
    /// Batch size folded into every byte-count computation.
    pub batch_size: u32,
    /// Systolic FPU pipeline latency, cycles.
    pub systolic_fpu_latency: u32,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            num_cores: 1,
            systolic_array_size: 16,
            vector_unit_size: 8,
            dataflow: Dataflow::OutputStationary,
            frequency_ghz: 1.0,
            dram_enq_per_cycle: 9,
            bytes_per_transaction: 32,
            data_type_width: 2,
            batch_size: 1,
            systolic_fpu_latency: 2,
        }
    }
}

impl AcceleratorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_constants() {
        let c = AcceleratorConfig::default();
        assert_eq!(c.systolic_fpu_latency, 2);
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.dram_enq_per_cycle, 9);
        assert_eq!(c.data_type_width, 2);
    }

    #[test]
    fn round_trips_through_toml() {
        let c = AcceleratorConfig {
            num_cores: 4,
            dataflow: Dataflow::WeightStationary,
            ..AcceleratorConfig::default()
        };
        let s = toml::to_string(&c).unwrap();
        let back = AcceleratorConfig::from_toml_str(&s).unwrap();
        assert_eq!(back.num_cores, 4);
        assert_eq!(back.dataflow, Dataflow::WeightStationary);
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = AcceleratorConfig::from_toml_str("not valid = [[[").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
