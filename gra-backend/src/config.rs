//! Per-compilation allocator configuration
//!
//! Every tunable the allocator consults lives here and is passed explicitly to
//! each entry point. There is no global state.

use gra_common::{AllocResult, AllocatorError, Hotness};
use serde::{Deserialize, Serialize};

/// Retry budget per candidate, by method hotness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    pub default: u8,
    pub hot: u8,
    pub very_hot: u8,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            default: 0,
            hot: 4,
            very_hot: 8,
        }
    }
}

impl RetryBudget {
    pub fn for_hotness(&self, hotness: Hotness) -> u8 {
        if hotness >= Hotness::VeryHot {
            self.very_hot
        } else if hotness >= Hotness::Hot {
            self.hot
        } else {
            self.default
        }
    }
}

/// Registers the legacy picker keeps back per class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WithheldRegisters {
    pub gpr: usize,
    pub fpr: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraConfig {
    /// Use the pressure-simulation picker; otherwise the preference-order one
    pub pressure_simulation: bool,

    pub max_reprioritized: RetryBudget,

    /// Frequency ratio counted as "as hot as the hottest block" with profile data
    pub profiling_noise_ratio: f64,

    /// Same, for static nesting-depth estimates
    pub static_noise_ratio: f64,

    /// Candidates processed between interrupt checks
    pub interrupt_check_interval: usize,

    pub enable_long_gra: bool,
    pub enable_fp_gra: bool,
    pub enable_vector_gra: bool,

    /// Cold blocks neither contribute weight nor get simulated
    pub dont_assign_in_cold_blocks: bool,

    /// Always try to drop loop bodies a candidate never touches
    pub remove_unused_loops: bool,

    /// Allow unused-loop trimming even when GPRs are plentiful
    pub enable_range_splitting: bool,

    pub cold_frequency_cutoff: i32,
    pub cold_loop_ratio: i32,

    pub regs_withheld: WithheldRegisters,

    /// Never share 8-byte spill slots between two 4-byte values
    pub disable_half_slot_spills: bool,

    /// Minimum spill slot size is 8 bytes
    pub force_large_ra_moves: bool,

    /// Emit the expensive diagnostic dumps
    pub trace: bool,
}

impl Default for GraConfig {
    fn default() -> Self {
        Self {
            pressure_simulation: true,
            max_reprioritized: RetryBudget::default(),
            profiling_noise_ratio: 0.7,
            static_noise_ratio: 1.0,
            interrupt_check_interval: 16,
            enable_long_gra: true,
            enable_fp_gra: true,
            enable_vector_gra: true,
            dont_assign_in_cold_blocks: false,
            remove_unused_loops: false,
            enable_range_splitting: false,
            cold_frequency_cutoff: 1000,
            cold_loop_ratio: 100,
            regs_withheld: WithheldRegisters::default(),
            disable_half_slot_spills: false,
            force_large_ra_moves: false,
            trace: false,
        }
    }
}

impl GraConfig {
    /// Parse a configuration; absent fields take their defaults
    pub fn from_json(text: &str) -> AllocResult<Self> {
        let config: GraConfig =
            serde_json::from_str(text).map_err(|e| AllocatorError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AllocResult<()> {
        for (name, ratio) in [
            ("profiling_noise_ratio", self.profiling_noise_ratio),
            ("static_noise_ratio", self.static_noise_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(AllocatorError::invalid_config(format!(
                    "{} must be in (0, 1], got {}",
                    name, ratio
                )));
            }
        }
        if self.interrupt_check_interval == 0 {
            return Err(AllocatorError::invalid_config(
                "interrupt_check_interval must be positive",
            ));
        }
        if self.cold_loop_ratio <= 0 {
            return Err(AllocatorError::invalid_config("cold_loop_ratio must be positive"));
        }
        Ok(())
    }

    /// The noise ratio for this compilation's frequency source
    pub fn noise_ratio(&self, uses_profiling: bool) -> f64 {
        if uses_profiling {
            self.profiling_noise_ratio
        } else {
            self.static_noise_ratio
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = GraConfig::from_json("{}").expect("defaults are valid");
        assert_eq!(config, GraConfig::default());
        assert_eq!(config.noise_ratio(true), 0.7);
        assert_eq!(config.noise_ratio(false), 1.0);
    }

    #[test]
    fn test_retry_budget_by_hotness() {
        let budget = RetryBudget::default();
        assert_eq!(budget.for_hotness(Hotness::Warm), 0);
        assert_eq!(budget.for_hotness(Hotness::Hot), 4);
        assert_eq!(budget.for_hotness(Hotness::Scorching), 8);
    }

    #[test]
    fn test_partial_override() {
        let config = GraConfig::from_json(r#"{"pressure_simulation": false, "max_reprioritized": {"hot": 2}}"#)
            .expect("valid");
        assert!(!config.pressure_simulation);
        assert_eq!(config.max_reprioritized.hot, 2);
        assert_eq!(config.max_reprioritized.very_hot, 8);
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let err = GraConfig::from_json(r#"{"profiling_noise_ratio": 1.5}"#).unwrap_err();
        assert!(matches!(err, AllocatorError::InvalidConfig { .. }));
        let err = GraConfig::from_json(r#"{"interrupt_check_interval": 0}"#).unwrap_err();
        assert!(err.to_string().contains("interrupt_check_interval"));
    }
}
