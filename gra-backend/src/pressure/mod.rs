//! Register-pressure simulation
//!
//! An advisory dry run of tree evaluation over one extended block at a time.
//! Each node gets a future-use counter and live register counts in a side
//! table scoped to the run; the method itself is never touched. The run
//! tracks how many GPRs, FPRs and vector registers are live at each point and
//! records, in a `PressureSummary`, which register kinds would spill if the
//! candidate under consideration were kept in a register.
//!
//! ## Architecture
//!
//! - `state` - counters and bookkeeping for one simulation run
//! - `summary` - peak pressure and spill kinds, cached per block
//! - `node_state` - per-node side table
//! - `memref` - operands folded into a memory reference
//! - `simulator` - the tree walk and the per-block caches

use crate::target::RegisterClassPolicy;
use gra_common::DataType;
use std::fmt;

pub use self::memref::{power_of_two_scale_factor, SimulatedMemoryReference, MAX_NUM_REGISTERS, MAX_STRIDE};
pub use self::node_state::{NodeState, NodeStates};
pub use self::simulator::PressureSimulator;
pub use self::state::{PressureState, RecentValues};
pub use self::summary::PressureSummary;

mod memref;
mod node_state;
mod simulator;
mod state;
mod summary;

#[cfg(test)]
mod tests;

/// Pressure at or above this is treated as unknown; a run stops when any
/// counter reaches it
pub const PRESSURE_LIMIT: u32 = 253;

/// Register groups a simulation can predict to spill
///
/// Mandatory kinds are certain to cost a spill to memory. Probable kinds
/// (volatile and linkage registers killed by a call) may instead be
/// satisfied by another free register, so they only count in loop headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpillKind {
    Gpr,
    Fpr,
    Vrf,
    VmThread,
    Volatile,
    Linkage,
}

impl SpillKind {
    pub const ALL: [SpillKind; 6] = [
        SpillKind::Gpr,
        SpillKind::Fpr,
        SpillKind::Vrf,
        SpillKind::VmThread,
        SpillKind::Volatile,
        SpillKind::Linkage,
    ];

    pub fn is_mandatory(self) -> bool {
        matches!(self, SpillKind::Gpr | SpillKind::Fpr | SpillKind::Vrf | SpillKind::VmThread)
    }
}

impl fmt::Display for SpillKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpillKind::Gpr => "gpr",
            SpillKind::Fpr => "fpr",
            SpillKind::Vrf => "vrf",
            SpillKind::VmThread => "vmThread",
            SpillKind::Volatile => "volatile",
            SpillKind::Linkage => "linkage",
        };
        write!(f, "{}", name)
    }
}

/// GPRs a value of `data_type` occupies
pub fn gpr_count(policy: &dyn RegisterClassPolicy, data_type: DataType) -> u32 {
    if data_type.is_aggregate() {
        let size = data_type.size(policy.pointer_size());
        return if policy.is_32bit() && size > 4 && size <= 8 { 2 } else { 1 };
    }
    if data_type == DataType::Int64 && policy.is_32bit() {
        2
    } else if data_type.is_integral() || data_type.is_address() {
        1
    } else {
        0
    }
}

pub fn fpr_count(data_type: DataType) -> u32 {
    u32::from(data_type.is_floating_point())
}

pub fn vrf_count(data_type: DataType) -> u32 {
    u32::from(data_type.is_vector())
}
