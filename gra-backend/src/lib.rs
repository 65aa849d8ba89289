//! Global Register Allocator - Backend
//!
//! This crate decides which method-local values live in physical registers
//! across block boundaries, and provides the stack slots for those that do
//! not.
//!
//! ## Architecture
//!
//! - `config` - per-compilation tunables
//! - `target` - register files, linkage and per-architecture policy
//! - `candidate` - candidate discovery and the per-block register tables
//! - `live_range` - trimming live ranges and weighing them
//! - `pressure` - advisory register-pressure simulation
//! - `picker` - choosing a concrete register for a candidate
//! - `assign` - the prioritized assignment loop
//! - `spill` - spill-temp slots
//! - `safepoint` - storing live commoned references before GC points

pub mod assign;
pub mod candidate;
pub mod config;
pub mod live_range;
pub mod picker;
pub mod pressure;
pub mod safepoint;
pub mod spill;
pub mod target;

pub use assign::{assign, Assigner, AssignmentResult};
pub use candidate::{CandidateId, CandidateRegistry, RegisterCandidate, RegisterTables};
pub use config::GraConfig;
pub use live_range::{LiveRangeEngine, WeightFunction};
pub use picker::{PreferencePicker, RegisterPickStrategy, SimulationPicker};
pub use safepoint::{spill_live_references_at_safepoints, SafepointReport};
pub use spill::{SpillSlotId, SpillTempManager};
pub use target::{policy_for, GenericPolicy, PowerPolicy, RegisterClassPolicy, X86Policy};

use gra_common::AllocResult;
use gra_ir::Method;

/// Discover the candidates of `method` and assign them registers
pub fn allocate(
    method: &Method,
    policy: &dyn RegisterClassPolicy,
    config: &GraConfig,
    interrupt: &mut dyn FnMut() -> bool,
) -> AllocResult<(CandidateRegistry, AssignmentResult)> {
    let mut registry = CandidateRegistry::discover(method);
    let result = assign(method, policy, config, &mut registry, interrupt)?;
    Ok((registry, result))
}
