use super::{PressureState, SpillKind, PRESSURE_LIMIT};
use crate::target::RegisterClassPolicy;
use gra_common::RegisterSet;
use log::trace;
use std::collections::BTreeSet;

/// Peak register pressure and predicted spills over a region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressureSummary {
    pub gpr_pressure: u32,
    pub fpr_pressure: u32,
    pub vrf_pressure: u32,
    pub spill_mask: BTreeSet<SpillKind>,
}

/// A summary nothing has been simulated into yet is stale: every counter
/// sits at the limit
impl Default for PressureSummary {
    fn default() -> Self {
        Self::new(PRESSURE_LIMIT, PRESSURE_LIMIT, PRESSURE_LIMIT)
    }
}

impl PressureSummary {
    pub fn new(gpr_pressure: u32, fpr_pressure: u32, vrf_pressure: u32) -> Self {
        Self {
            gpr_pressure,
            fpr_pressure,
            vrf_pressure,
            spill_mask: BTreeSet::new(),
        }
    }

    pub fn is_spilled(&self, kind: SpillKind) -> bool {
        self.spill_mask.contains(&kind)
    }

    pub fn spill(&mut self, kind: SpillKind) {
        if self.spill_mask.insert(kind) {
            trace!("    !{}", kind);
        }
    }

    /// Drop the probable kinds, keeping only spills that are certain
    pub fn keep_mandatory_only(&mut self) {
        self.spill_mask.retain(|k| k.is_mandatory());
    }

    /// Fold another summary in: peak of each counter, union of spills
    pub fn accumulate(&mut self, other: &PressureSummary) {
        self.spill_mask.extend(other.spill_mask.iter().copied());
        self.accumulate_pressure(other.gpr_pressure, other.fpr_pressure, other.vrf_pressure);
    }

    /// Fold the current simulation point in, counting `temps` extra
    /// registers per kind the node being evaluated needs briefly
    ///
    /// Pressure beyond a limit only counts as a spill while the candidate
    /// is at risk; when a candidate load is live anyway the spill happens
    /// with or without the global register.
    pub fn accumulate_state(&mut self, state: &PressureState<'_>, temps: [u32; 3]) {
        let gprs = clamp(state.gpr_pressure) + temps[0];
        let fprs = clamp(state.fpr_pressure) + temps[1];
        let vrfs = clamp(state.vrf_pressure) + temps[2];
        let at_risk = state.pressure_is_at_risk();
        if at_risk && gprs > clamp(state.gpr_limit) {
            self.spill(SpillKind::Gpr);
        }
        if at_risk && fprs > clamp(state.fpr_limit) {
            self.spill(SpillKind::Fpr);
        }
        if at_risk && vrfs > clamp(state.vrf_limit) {
            self.spill(SpillKind::Vrf);
        }
        self.accumulate_pressure(gprs, fprs, vrfs);
    }

    pub fn reset(&mut self, gpr_pressure: u32, fpr_pressure: u32, vrf_pressure: u32) {
        *self = Self::new(gpr_pressure, fpr_pressure, vrf_pressure);
    }

    /// Every register a predicted spill makes unattractive
    pub fn spilled_registers(&self, policy: &dyn RegisterClassPolicy) -> RegisterSet {
        self.spill_mask
            .iter()
            .flat_map(|&kind| policy.registers_for_spill_kind(kind))
            .collect()
    }

    fn accumulate_pressure(&mut self, gprs: u32, fprs: u32, vrfs: u32) {
        self.gpr_pressure = self.gpr_pressure.max(gprs).min(PRESSURE_LIMIT);
        self.fpr_pressure = self.fpr_pressure.max(fprs).min(PRESSURE_LIMIT);
        self.vrf_pressure = self.vrf_pressure.max(vrfs).min(PRESSURE_LIMIT);
    }
}

fn clamp(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
