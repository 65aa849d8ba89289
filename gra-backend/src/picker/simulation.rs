use super::{block_is_ignorably_cold, linkage_register, RegisterPickStrategy};
use crate::candidate::{CandidateId, CandidateRegistry, RegisterCandidate};
use crate::config::GraConfig;
use crate::pressure::{PressureSimulator, PressureSummary, SpillKind};
use crate::target::RegisterClassPolicy;
use gra_common::{BlockNumber, BlockSet, GlobalRegisterNumber, NodeId, RegisterSet, SymRefNumber};
use gra_ir::{Method, END};
use log::{debug, trace};
use std::collections::BTreeSet;

/// Picks the first register that no simulated block predicts to spill,
/// preferring copy partners and the candidate's linkage register
pub struct SimulationPicker<'a> {
    method: &'a Method,
    policy: &'a dyn RegisterClassPolicy,
    config: &'a GraConfig,
    simulator: PressureSimulator<'a>,
}

impl<'a> SimulationPicker<'a> {
    pub fn new(method: &'a Method, policy: &'a dyn RegisterClassPolicy, config: &'a GraConfig) -> Self {
        Self {
            method,
            policy,
            config,
            simulator: PressureSimulator::new(method, policy),
        }
    }

    pub fn simulator(&self) -> &PressureSimulator<'a> {
        &self.simulator
    }

    /// Simulate each extended block of the live range, dropping registers
    /// the accumulated summary predicts to spill
    fn reject_spilling_registers(
        &mut self,
        candidate: &RegisterCandidate,
        assigned: &[&RegisterCandidate],
        remaining: &mut RegisterSet,
        high_half: bool,
    ) {
        let cfg = &self.method.cfg;
        let live = candidate.live_on_entry_or_exit();
        let mut to_visit = live.clone();
        to_visit.extend(live.iter().map(|&b| cfg.start_of_extended_block(b)));
        trace!("  extended blocks to visit {:?}", to_visit);

        // A candidate that can still be retried wants the full picture for
        // the conflict scan, so every block is simulated
        let can_exit_early = !candidate.can_be_reprioritized();
        let mut high_water_mark = PressureSummary::new(0, 0, 0);
        for &b in &to_visit {
            if can_exit_early && remaining.is_empty() {
                break;
            }
            if cfg.is_extension(b) || block_is_ignorably_cold(self.method, self.config, b) {
                continue;
            }
            let (summary, _) = self.simulator.simulate_for_candidate(b, candidate, assigned, high_half);
            high_water_mark.accumulate(&summary);
            if can_exit_early {
                self.remove_spilled(remaining, &high_water_mark);
            }
        }
        if !can_exit_early {
            self.remove_spilled(remaining, &high_water_mark);
        }
    }

    fn remove_spilled(&self, remaining: &mut RegisterSet, summary: &PressureSummary) {
        let spilled = summary.spilled_registers(self.policy);
        remaining.retain(|r| !spilled.contains(r));
        trace!(
            "  rejected {:?} for {:?}, remaining {:?}",
            spilled,
            summary.spill_mask,
            remaining
        );
    }

    /// Look for copies between this candidate and assigned ones in the
    /// hottest live blocks
    ///
    /// Returns the register of the hottest copy partner still in
    /// `remaining`, and the registers of other candidates seen nearby.
    fn scan_for_copies(
        &self,
        registry: &CandidateRegistry,
        candidate: &RegisterCandidate,
        remaining: &RegisterSet,
        high_half: bool,
    ) -> (Option<GlobalRegisterNumber>, RegisterSet) {
        let cfg = &self.method.cfg;
        let mut hottest = None;
        let mut hottest_weight = -1i64;
        let mut unpreferred = RegisterSet::new();
        let mut visited = BTreeSet::new();

        for b in candidate.live_on_entry_or_exit() {
            if b == END || block_is_ignorably_cold(self.method, self.config, b) {
                continue;
            }
            // Static nesting weight, consistent with the rest of allocation
            let weight = cfg.structure_weight(b, false);
            if weight <= hottest_weight {
                continue;
            }
            trace!("  scanning block_{} for copies", b);

            let mut current = Some(b);
            while let Some(scan) = current {
                for &tt in &cfg.block(scan).treetops {
                    match self.find_coalescence_for_register_copy(registry, tt, candidate) {
                        Some((other, false)) => {
                            let preferred = if high_half {
                                other.high_register
                            } else {
                                other.low_register
                            };
                            if let Some(reg) = preferred.filter(|r| remaining.contains(r)) {
                                trace!(
                                    "  found copy with #{}, register {}, weight {}",
                                    other.symref,
                                    self.policy.register_file().name(reg),
                                    weight
                                );
                                hottest = Some(reg);
                                hottest_weight = weight;
                            }
                        }
                        Some((other, true)) => {
                            trace!("  unprefer copy with #{} {:?}", other.symref, other.low_register);
                            unpreferred.extend(other.registers());
                        }
                        None => {
                            if let Some(other) = self.find_used_candidate(registry, tt, &mut visited) {
                                unpreferred.extend(other.registers());
                            }
                        }
                    }

                    for (index, reg, own) in self.call_argument_registers(tt, candidate) {
                        if !own {
                            trace!("  unprefer call argument {} in {}", index, self.policy.register_file().name(reg));
                            unpreferred.insert(reg);
                        } else if remaining.contains(&reg) {
                            trace!(
                                "  found call argument {}, register {}, weight {}",
                                index,
                                self.policy.register_file().name(reg),
                                weight
                            );
                            hottest = Some(reg);
                            hottest_weight = weight;
                            break;
                        }
                    }
                }
                current = cfg.next_extension(scan);
            }
        }
        (hottest, unpreferred)
    }

    /// Outgoing argument registers of a call under `root` that are fed by a
    /// direct load, flagged when the load is of `candidate`
    fn call_argument_registers(
        &self,
        root: NodeId,
        candidate: &RegisterCandidate,
    ) -> Vec<(usize, GlobalRegisterNumber, bool)> {
        let mut node = self.method.node(root);
        if node.opcode.is_treetop() {
            match node.first_child() {
                Some(child) => node = self.method.node(child),
                None => return Vec::new(),
            }
        }
        if !node.is_real_call() {
            return Vec::new();
        }

        let linkage = self.policy.linkage();
        let mut per_kind = [0u32; 3];
        let mut found = Vec::new();
        for (index, &child) in node.children.iter().enumerate() {
            let arg = self.method.node(child);
            let kind = arg.data_type.register_kind();
            let slot = &mut per_kind[kind as usize];
            let position = *slot;
            *slot += 1;
            if !arg.opcode.is_load_direct() {
                continue;
            }
            if let Some(reg) = linkage.linkage_register(kind, position) {
                found.push((index, reg, arg.symref == Some(candidate.symref)));
            }
        }
        found
    }

    /// A direct store of a direct load involving a known candidate
    ///
    /// The copy is preferred when the other side is `candidate` itself.
    fn find_coalescence_for_register_copy<'r>(
        &self,
        registry: &'r CandidateRegistry,
        root: NodeId,
        candidate: &RegisterCandidate,
    ) -> Option<(&'r RegisterCandidate, bool)> {
        let node = self.method.node(root);
        if !node.opcode.is_store_direct() {
            return None;
        }
        let value = self.method.node(node.first_child()?);
        if !value.opcode.is_load_direct() {
            return None;
        }
        let (stored, loaded) = (node.symref?, value.symref?);

        let mut found = None;
        if let Some(id) = registry.find(stored) {
            found = Some((registry.get(id), loaded != candidate.symref));
        }
        if let Some(id) = registry.find(loaded) {
            found = Some((registry.get(id), stored != candidate.symref));
        }
        found
    }

    /// First candidate directly loaded or stored anywhere under `id`
    fn find_used_candidate<'r>(
        &self,
        registry: &'r CandidateRegistry,
        id: NodeId,
        visited: &mut BTreeSet<NodeId>,
    ) -> Option<&'r RegisterCandidate> {
        if !visited.insert(id) {
            return None;
        }
        let node = self.method.node(id);
        if node.opcode.is_load_direct() || node.opcode.is_store_direct() {
            if let Some(found) = node.symref.and_then(|s| registry.find(s)) {
                return Some(registry.get(found));
            }
        }
        node.children
            .iter()
            .find_map(|&child| self.find_used_candidate(registry, child, visited))
    }

    fn bump_pressure(&mut self, blocks: &BlockSet, candidate: &RegisterCandidate) {
        self.simulator.bump_pressure(blocks, candidate.register_kind());
    }
}

impl RegisterPickStrategy for SimulationPicker<'_> {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn pick(
        &mut self,
        registry: &CandidateRegistry,
        id: CandidateId,
        available: &RegisterSet,
        high_half: bool,
    ) -> Option<GlobalRegisterNumber> {
        let candidate = registry.get(id);
        trace!(
            "  picking {}register for candidate #{} from {:?}",
            if high_half { "high " } else { "" },
            candidate.symref,
            available
        );

        let mut remaining = available.clone();
        if candidate.dont_assign_vm_thread_register {
            if let Some(thread) = self.policy.register_file().vm_thread {
                if remaining.remove(&thread) {
                    trace!("  thread register rejected");
                }
            }
        }

        // 1. Pressure
        let assigned: Vec<&RegisterCandidate> = registry
            .assigned()
            .iter()
            .filter(|&&a| a != id)
            .map(|&a| registry.get(a))
            .collect();
        self.reject_spilling_registers(candidate, &assigned, &mut remaining, high_half);

        // 2. Coalescing
        let (copy_register, mut unpreferred) = self.scan_for_copies(registry, candidate, &remaining, high_half);
        match copy_register {
            Some(reg) => {
                trace!("  using copy register {}", reg);
                remaining = RegisterSet::from([reg]);
            }
            None => {
                unpreferred.retain(|r| remaining.contains(r));
                if unpreferred != remaining {
                    remaining.retain(|r| !unpreferred.contains(r));
                }
            }
        }

        // 3. Linkage
        match linkage_register(self.method, self.policy, candidate) {
            Some(reg) => {
                if remaining.contains(&reg) {
                    trace!("  using linkage register {}", reg);
                    remaining = RegisterSet::from([reg]);
                }
            }
            None => {
                let linkage: RegisterSet = self
                    .policy
                    .registers_for_spill_kind(SpillKind::Linkage)
                    .intersection(&remaining)
                    .copied()
                    .collect();
                if linkage != remaining {
                    remaining.retain(|r| !linkage.contains(r));
                }
            }
        }

        // Registers are in preference order
        let result = remaining.iter().next().copied();
        match result {
            Some(reg) => {
                debug!(
                    "picked register {} for candidate #{}",
                    self.policy.register_file().name(reg),
                    candidate.symref
                );
                self.bump_pressure(&candidate.blocks_live_on_entry, candidate);
            }
            None => debug!(
                "no good registers for candidate #{} after pressure simulation",
                candidate.symref
            ),
        }
        result
    }

    fn has_pressure_info(&self) -> bool {
        self.simulator.has_pressure_info()
    }

    fn simulated_spilled_registers(&self, block: BlockNumber, symref: SymRefNumber) -> Option<RegisterSet> {
        if self.simulator.has_pressure_info() {
            Some(self.simulator.spilled_registers(block, symref))
        } else {
            None
        }
    }
}
