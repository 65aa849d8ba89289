//! Choosing a concrete global register for a candidate
//!
//! The orchestrator computes the registers a candidate could legally take;
//! a `RegisterPickStrategy` chooses among them. Two strategies exist:
//!
//! - `SimulationPicker` runs the pressure simulator over the candidate's live
//!   range and rejects registers whose use is predicted to spill, then
//!   prefers coalescing and linkage registers
//! - `PreferencePicker` chooses by a fixed preference order derived from
//!   whether the candidate lives across a call and arrives in a linkage
//!   register

use crate::candidate::{CandidateId, CandidateRegistry, RegisterCandidate};
use crate::config::GraConfig;
use crate::target::RegisterClassPolicy;
use gra_common::{BlockNumber, GlobalRegisterNumber, Hotness, RegisterSet, SymRefNumber};
use gra_ir::Method;
use log::trace;

pub use self::preference::{Preference, PreferencePicker};
pub use self::simulation::SimulationPicker;

mod preference;
mod simulation;


pub trait RegisterPickStrategy {
    fn name(&self) -> &'static str;

    /// Best register among `available` for candidate `id`, or `None` when
    /// none is worth taking. `high_half` asks for the second register of a
    /// pair whose first register is already chosen.
    fn pick(
        &mut self,
        registry: &CandidateRegistry,
        id: CandidateId,
        available: &RegisterSet,
        high_half: bool,
    ) -> Option<GlobalRegisterNumber>;

    /// Whether a simulation has run, so spill predictions can guide trimming
    fn has_pressure_info(&self) -> bool {
        false
    }

    /// Registers the latest simulation of `block` predicts would spill, when
    /// the strategy simulates at all
    fn simulated_spilled_registers(&self, _block: BlockNumber, _symref: SymRefNumber) -> Option<RegisterSet> {
        None
    }
}

/// The strategy `config` selects
pub fn strategy_for<'a>(
    method: &'a Method,
    policy: &'a dyn RegisterClassPolicy,
    config: &'a GraConfig,
) -> Box<dyn RegisterPickStrategy + 'a> {
    if config.pressure_simulation {
        Box::new(SimulationPicker::new(method, policy, config))
    } else {
        Box::new(PreferencePicker::new(method, policy, config))
    }
}

/// Cold blocks, and blocks far colder than their loop, are not worth
/// simulating or keeping values in registers for
pub fn block_is_ignorably_cold(method: &Method, config: &GraConfig, block: BlockNumber) -> bool {
    if method.cfg.block(block).is_cold {
        trace!("  block_{} is cold", block);
        return true;
    }
    block_is_much_colder_than_containing_loop(method, config, block)
}

fn block_is_much_colder_than_containing_loop(method: &Method, config: &GraConfig, block: BlockNumber) -> bool {
    let frequency = method.cfg.block(block).frequency;
    if method.hotness <= Hotness::Warm && frequency < config.cold_frequency_cutoff {
        trace!("  block_{} is not hot enough for simulation ({})", block, frequency);
        return true;
    }
    let Some(lp) = method.cfg.containing_loop(block) else {
        return false;
    };
    let loop_frequency = method.cfg.block(lp.entry).frequency;
    let colder = frequency < loop_frequency / config.cold_loop_ratio;
    if colder {
        trace!(
            "  block_{} is much colder than its loop ({} << {})",
            block,
            frequency,
            loop_frequency
        );
    }
    colder
}

/// Register a parameter arrives in, if any
pub fn linkage_register(
    method: &Method,
    policy: &dyn RegisterClassPolicy,
    candidate: &RegisterCandidate,
) -> Option<GlobalRegisterNumber> {
    let index = method.symbol(candidate.symref).linkage_register_index()?;
    policy.linkage().linkage_register(candidate.register_kind(), index)
}
