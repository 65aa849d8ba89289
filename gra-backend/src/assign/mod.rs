//! Global register assignment
//!
//! Candidates are weighed, queued by descending weight and assigned one at a
//! time. For each candidate the orchestrator:
//!
//! 1. drops it when its type, aliasing or class rules it out
//! 2. trims blocks whose outgoing edges already carry as many registers of
//!    its class as the target allows
//! 3. computes the registers with no conflicting block and asks the
//!    `RegisterPickStrategy` for one (two for pairs)
//! 4. on failure, trims the blocks that conflict with the cheapest register
//!    and requeues the candidate while its retry budget lasts
//! 5. on success, records the register in the per-block tables and, where a
//!    block's exits become saturated, requeues the waiting candidates live
//!    into its successors with those successors removed
//!
//! A failed candidate simply keeps its memory accesses. The only error is an
//! interrupt requested by the caller.

use crate::candidate::{CandidateId, CandidateRegistry, RegisterCandidate};
use crate::config::GraConfig;
use crate::live_range::{extended_successors_from, last_control_node, LiveRangeEngine, WeightFunction};
use crate::picker::{strategy_for, RegisterPickStrategy};
use crate::target::RegisterClassPolicy;
use gra_common::{
    AllocResult, AllocatorError, BlockNumber, BlockSet, DataType, GlobalRegisterNumber, RegisterKind, RegisterSet,
};
use gra_ir::Method;
use log::{debug, trace};
use std::collections::{BTreeSet, VecDeque};

pub use self::conflicts::{
    blocks_to_trim, candidates_overlap, choose_conflicting_register, compute_available_registers,
    scan_pressure_cache_for_conflicts, ConflictChoice, ConflictMatrices,
};

mod conflicts;

#[cfg(test)]
mod tests;

const KINDS: [RegisterKind; 3] = [RegisterKind::Gpr, RegisterKind::Fpr, RegisterKind::Vrf];

/// What one run of the assignment produced
///
/// The registers themselves are on the candidates and in the registry's
/// per-block tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    /// Candidates given a register, in assignment order
    pub assigned: Vec<CandidateId>,
    /// Candidates left in memory
    pub dropped: Vec<CandidateId>,
    pub lowest_register: Option<GlobalRegisterNumber>,
    pub highest_register: Option<GlobalRegisterNumber>,
    /// Some floating-point candidate received a register
    pub global_fp_assignment_done: bool,
    /// Candidates taken off the queue, retries included
    pub iterations: usize,
}

/// Assign global registers to the candidates in `registry`
///
/// `interrupt` is polled every `interrupt_check_interval` candidates; when it
/// returns true the run stops with `AllocatorError::Interrupted`.
pub fn assign(
    method: &Method,
    policy: &dyn RegisterClassPolicy,
    config: &GraConfig,
    registry: &mut CandidateRegistry,
    interrupt: &mut dyn FnMut() -> bool,
) -> AllocResult<AssignmentResult> {
    Assigner::new(method, policy, config).run(registry, interrupt)
}

/// Per-block counters for each register class
#[derive(Debug, Clone)]
struct ClassCounts([Vec<usize>; 3]);

impl ClassCounts {
    fn new(blocks: usize) -> Self {
        Self([vec![0; blocks], vec![0; blocks], vec![0; blocks]])
    }

    fn slot(kind: RegisterKind) -> usize {
        match kind {
            RegisterKind::Gpr => 0,
            RegisterKind::Fpr => 1,
            RegisterKind::Vrf => 2,
        }
    }

    fn get(&self, kind: RegisterKind, block: BlockNumber) -> usize {
        self.0[Self::slot(kind)][block]
    }

    fn add(&mut self, kind: RegisterKind, block: BlockNumber, count: usize) -> usize {
        let value = &mut self.0[Self::slot(kind)][block];
        *value += count;
        *value
    }

    fn set(&mut self, kind: RegisterKind, block: BlockNumber, count: usize) {
        self.0[Self::slot(kind)][block] = count;
    }
}

/// Facts about the CFG gathered once per run
#[derive(Debug, Clone, Default)]
struct CfgProperties {
    /// Extended blocks entered through an exception edge
    catch_blocks: BlockSet,
    /// Locals live into any catch block, when liveness is known there
    catch_live_locals: Option<BTreeSet<usize>>,
    /// Extended blocks ending in a multi-target branch
    switch_blocks: BlockSet,
}

impl CfgProperties {
    fn collect(method: &Method) -> Self {
        let cfg = &method.cfg;
        let mut properties = Self::default();
        for &b in &cfg.layout {
            let block = cfg.block(b);
            let ext = cfg.start_of_extended_block(b);
            if block.is_catch_block() {
                properties.catch_blocks.insert(ext);
                if let Some(locals) = &block.live_locals {
                    properties
                        .catch_live_locals
                        .get_or_insert_with(BTreeSet::new)
                        .extend(locals.iter().copied());
                }
            }
        }
        properties.switch_blocks = method
            .switch_blocks()
            .into_iter()
            .map(|b| cfg.start_of_extended_block(b))
            .collect();
        properties
    }
}

pub struct Assigner<'a> {
    method: &'a Method,
    policy: &'a dyn RegisterClassPolicy,
    config: &'a GraConfig,
    engine: LiveRangeEngine<'a>,
    picker: Box<dyn RegisterPickStrategy + 'a>,
    properties: CfgProperties,
    /// Registers of each class the outgoing edges of a block can carry
    max_live_on_exit: ClassCounts,
    /// Registers of each class assigned candidates hold on exit
    live_on_exit: ClassCounts,
    /// Assigned candidates live on exit, per class
    totals: ClassCounts,
    /// Assigned candidates live on entry to an extended block, per class
    totals_on_entry: ClassCounts,
    conflicts: ConflictMatrices,
    queue: VecDeque<CandidateId>,
}

impl<'a> Assigner<'a> {
    pub fn new(method: &'a Method, policy: &'a dyn RegisterClassPolicy, config: &'a GraConfig) -> Self {
        let num_blocks = method.cfg.num_blocks();
        let file = policy.register_file();
        let mut max_live_on_exit = ClassCounts::new(num_blocks);
        for b in 0..num_blocks {
            let last = if method.cfg.layout.contains(&b) {
                last_control_node(method, b)
            } else {
                None
            };
            for kind in KINDS {
                max_live_on_exit.set(kind, b, policy.max_registers_across_edge(kind, method, last));
            }
        }

        Self {
            method,
            policy,
            config,
            engine: LiveRangeEngine::new(method, policy, config),
            picker: strategy_for(method, policy, config),
            properties: CfgProperties::collect(method),
            max_live_on_exit,
            live_on_exit: ClassCounts::new(num_blocks),
            totals: ClassCounts::new(num_blocks),
            totals_on_entry: ClassCounts::new(num_blocks),
            conflicts: ConflictMatrices::new(file.total()),
            queue: VecDeque::new(),
        }
    }

    /// Replace the picker `config` selects
    pub fn with_strategy(mut self, picker: Box<dyn RegisterPickStrategy + 'a>) -> Self {
        self.picker = picker;
        self
    }

    pub fn with_weight_function(mut self, weight_function: impl WeightFunction + 'a) -> Self {
        self.engine = self.engine.with_weight_function(weight_function);
        self
    }

    pub fn run(
        mut self,
        registry: &mut CandidateRegistry,
        interrupt: &mut dyn FnMut() -> bool,
    ) -> AllocResult<AssignmentResult> {
        let mut result = AssignmentResult::default();
        if registry.is_empty() {
            return Ok(result);
        }
        debug!(
            "assigning {} candidates in {} with {} picker",
            registry.len(),
            self.method.name,
            self.picker.name()
        );

        let budget = self.config.max_reprioritized.for_hotness(self.method.hotness);
        for id in registry.ids() {
            let rc = registry.get_mut(id);
            self.engine.set_weight(rc);
            rc.reprioritized = budget;
            debug!("weight of candidate #{} is {}", rc.symref, rc.weight);
            self.prioritize(registry, id);
        }

        registry.init_usage(self.policy.register_file().total());
        self.policy
            .set_unavailable_registers_usage(self.method, &mut registry.entry_usage, &mut registry.exit_usage);

        let interval = self.config.interrupt_check_interval.max(1);
        while let Some(id) = self.queue.pop_front() {
            result.iterations += 1;
            if result.iterations % interval == 0 && interrupt() {
                debug!("interrupted after {} candidates", result.iterations);
                return Err(AllocatorError::interrupted("global register assignment"));
            }

            trace!(
                "{}: inspecting #{} (weight {})",
                result.iterations,
                registry.get(id).symref,
                registry.get(id).weight
            );
            if let Some(reason) = self.exclusion_reason(registry.get_mut(id)) {
                debug!("leaving candidate #{}: {}", registry.get(id).symref, reason);
                continue;
            }

            let rc = registry.get(id);
            let kind = rc.register_kind();
            let needs_two = rc.needs_two_registers(self.policy);
            let range = self.policy.register_file().range(kind);
            self.trim_saturated_edges(registry.get_mut(id), kind, needs_two);

            let mut available = compute_available_registers(
                self.method,
                self.policy,
                registry,
                id,
                range.clone(),
                &mut self.conflicts,
                self.config.trace,
            );
            self.policy
                .remove_unavailable_registers(self.method, registry.get(id), &mut available);
            trace!("  available registers {:?}", available);

            match self.pick(registry, id, &available, needs_two) {
                Some((low, high)) => self.commit(registry, id, low, high, &mut result),
                None => self.retry(registry, id, range, &available, needs_two),
            }
        }

        result.assigned = registry.assigned().to_vec();
        result.dropped = registry.ids().filter(|&id| !registry.get(id).is_assigned()).collect();
        debug!(
            "assigned {} candidates, {} left in memory",
            result.assigned.len(),
            result.dropped.len()
        );
        Ok(result)
    }

    /// Queue `id` before the first candidate of strictly smaller weight;
    /// a candidate of weight zero is not queued
    fn prioritize(&mut self, registry: &CandidateRegistry, id: CandidateId) -> bool {
        let weight = registry.get(id).weight;
        if weight == 0 {
            trace!("  candidate #{} has no weight", registry.get(id).symref);
            return false;
        }
        let position = self
            .queue
            .iter()
            .position(|&other| weight > registry.get(other).weight)
            .unwrap_or(self.queue.len());
        self.queue.insert(position, id);
        true
    }

    /// Why the candidate cannot be given a register at all
    ///
    /// Also flags candidates visible from catch blocks and removes catch
    /// blocks from their range.
    fn exclusion_reason(&self, rc: &mut RegisterCandidate) -> Option<&'static str> {
        let method = self.method;
        let symbol = method.symbol(rc.symref);
        let data_type = rc.data_type;

        if data_type == DataType::Int64 && !self.config.enable_long_gra {
            return Some("long allocation disabled");
        }
        if data_type.is_aggregate() {
            return Some("aggregate");
        }
        if !symbol.is_auto_or_parm() || symbol.holds_monitored_object {
            return Some("not an auto or parameter, or holds a monitored object");
        }
        if symbol.use_def_aliases.iter().any(|&alias| alias != rc.symref) {
            return Some("has use/def aliases");
        }
        if data_type.is_vector()
            && (!self.config.enable_vector_gra || self.policy.register_file().count(RegisterKind::Vrf) == 0)
        {
            return Some("vector type without global vector registers");
        }

        let visible_from_catch = match (&self.properties.catch_live_locals, symbol.is_auto()) {
            (Some(locals), true) => symbol
                .live_local_index
                .map(|index| locals.contains(&index))
                .unwrap_or(false),
            _ => !symbol.use_only_aliases.is_empty(),
        };
        if visible_from_catch {
            rc.live_across_exception_edge = true;
        }
        if rc
            .blocks_live_on_entry
            .iter()
            .any(|b| self.properties.catch_blocks.contains(b))
        {
            let cfg = &method.cfg;
            rc.blocks_live_on_entry
                .retain(|&b| cfg.block(b).exception_predecessors.is_empty());
        }

        if data_type.is_floating_point() {
            if !self.config.enable_fp_gra {
                return Some("floating-point allocation disabled");
            }
            if !self.policy.has_java_float_semantics()
                && rc
                    .live_on_entry_or_exit()
                    .iter()
                    .any(|b| self.properties.switch_blocks.contains(b))
            {
                return Some("float live in a switch block");
            }
        }
        None
    }

    /// Give up exits whose edges cannot carry one more register of `kind`
    fn trim_saturated_edges(&self, rc: &mut RegisterCandidate, kind: RegisterKind, needs_two: bool) {
        let cfg = &self.method.cfg;
        let pair = usize::from(needs_two);
        let exits: Vec<BlockNumber> = rc.blocks_live_on_exit.iter().copied().collect();
        for b in exits {
            let max = self.max_live_on_exit.get(kind, b);
            let limit = max.saturating_sub(pair);
            let total = self.totals.get(kind, b);
            if total < limit {
                continue;
            }
            trace!("  {} count exceeded at exit of block_{}: {} >= {}", kind, b, total, max);

            let multi_way = last_control_node(self.method, b)
                .map(|n| n.opcode.is_switch())
                .unwrap_or(false);
            let successors = &cfg.block(b).successors;
            for &s in successors {
                if multi_way || self.totals_on_entry.get(kind, s) >= limit {
                    trace!("  resetting live on entry block_{} and live on exit block_{}", s, b);
                    rc.blocks_live_on_entry.remove(&s);
                    rc.blocks_live_on_exit.remove(&b);
                    for other in successors {
                        rc.blocks_live_on_entry.remove(other);
                    }
                }
            }
        }
    }

    /// One register, or a low and a high one for pairs
    fn pick(
        &mut self,
        registry: &CandidateRegistry,
        id: CandidateId,
        available: &RegisterSet,
        needs_two: bool,
    ) -> Option<(GlobalRegisterNumber, Option<GlobalRegisterNumber>)> {
        let low = self.picker.pick(registry, id, available, false)?;
        if !needs_two {
            return Some((low, None));
        }
        let mut rest = available.clone();
        rest.remove(&low);
        let high = self.picker.pick(registry, id, &rest, true)?;
        Some((low, Some(high)))
    }

    /// Trim the blocks that conflict with the cheapest register and requeue
    fn retry(
        &mut self,
        registry: &mut CandidateRegistry,
        id: CandidateId,
        range: std::ops::Range<GlobalRegisterNumber>,
        available: &RegisterSet,
        needs_two: bool,
    ) {
        let rc = registry.get(id);
        if !rc.can_be_reprioritized() {
            debug!("candidate #{} not assigned, no retries left", rc.symref);
            return;
        }

        let use_pressure_info = self.picker.has_pressure_info();
        if use_pressure_info {
            scan_pressure_cache_for_conflicts(
                self.method,
                self.policy,
                self.picker.as_ref(),
                rc,
                range.clone(),
                &mut self.conflicts,
            );
        }
        let referencing = self.engine.blocks_referencing(rc.symref);
        let choice = choose_conflicting_register(
            self.method,
            self.policy,
            rc,
            &referencing,
            range,
            available,
            use_pressure_info,
            needs_two,
            self.config.noise_ratio(self.method.uses_profiling),
            &mut self.conflicts,
        );
        let Some(choice) = choice else {
            debug!("candidate #{} not assigned, nothing to trim", rc.symref);
            return;
        };

        let trim = blocks_to_trim(choice, &self.conflicts);
        debug!(
            "candidate #{}: removing {:?} from live on entry for register {}",
            rc.symref,
            trim,
            self.policy.register_file().name(choice.register)
        );
        let rc = registry.get_mut(id);
        rc.blocks_live_on_entry.retain(|b| !trim.contains(b));
        self.engine.recalculate_weight(rc);
        rc.set_reprioritized();
        self.prioritize(registry, id);
    }

    fn commit(
        &mut self,
        registry: &mut CandidateRegistry,
        id: CandidateId,
        low: GlobalRegisterNumber,
        high: Option<GlobalRegisterNumber>,
        result: &mut AssignmentResult,
    ) {
        let (method, policy) = (self.method, self.policy);
        let cfg = &method.cfg;
        let file = policy.register_file();
        let (kind, live_on_entry, live_on_exit, symref) = {
            let rc = registry.get_mut(id);
            rc.low_register = Some(low);
            rc.high_register = high;
            rc.is_8bit_global_gpr = rc.register_kind() == RegisterKind::Gpr && file.is_8bit_capable(low);
            (
                rc.register_kind(),
                rc.blocks_live_on_entry.clone(),
                rc.blocks_live_on_exit.clone(),
                rc.symref,
            )
        };
        registry.mark_assigned(id);
        match high {
            Some(high) => debug!(
                "assigned candidate #{} to low register {} and high register {}",
                symref,
                file.name(low),
                file.name(high)
            ),
            None => debug!("assigned candidate #{} to register {}", symref, file.name(low)),
        }

        let registers: Vec<GlobalRegisterNumber> = std::iter::once(low).chain(high).collect();
        let count = registers.len();
        for &b in &live_on_exit {
            self.totals.add(kind, b, count);
        }
        let entry_starts: BlockSet = live_on_entry
            .iter()
            .map(|&b| cfg.start_of_extended_block(b))
            .collect();
        for b in entry_starts {
            self.totals_on_entry.add(kind, b, count);
        }

        if kind == RegisterKind::Fpr {
            result.global_fp_assignment_done = true;
        }
        for &reg in &registers {
            result.lowest_register = Some(result.lowest_register.map_or(reg, |r| r.min(reg)));
            result.highest_register = Some(result.highest_register.map_or(reg, |r| r.max(reg)));
        }

        for &b in &live_on_entry {
            for &reg in &registers {
                trace!("  register {} in block_{} is candidate #{} on entry", reg, b, symref);
                registry.tables.set_on_entry(b, reg, id);
            }
        }

        for &b in &live_on_exit {
            for &reg in &registers {
                Self::claim_exit(registry, b, reg, id);
            }

            let max = self.max_live_on_exit.get(kind, b);
            let now = self.live_on_exit.add(kind, b, count);
            if now == max {
                self.reprioritize_after_saturation(registry, b, kind, max, false);
            } else if kind == RegisterKind::Gpr && now + 1 == max {
                self.reprioritize_after_saturation(registry, b, kind, max - 1, true);
            }
        }

        for &reg in &registers {
            registry.entry_usage[reg].extend(live_on_entry.iter().copied());
            registry.exit_usage[reg].extend(live_on_exit.iter().copied());
        }
    }

    /// Record `id` leaving `block` in `reg`
    fn claim_exit(registry: &mut CandidateRegistry, block: BlockNumber, reg: GlobalRegisterNumber, id: CandidateId) {
        let on_exit = registry.tables.on_exit(block, reg);
        if on_exit == Some(id) {
            return;
        }
        let on_entry = registry.tables.on_entry(block, reg);
        if let Some(other) = on_exit {
            assert!(
                on_exit == on_entry || on_entry == Some(id),
                "Candidate #{} instead of candidate #{} is required in register {} on exit out of block_{}",
                registry.get(other).symref,
                registry.get(id).symref,
                reg,
                block
            );
        }
        if on_entry != Some(id) || on_exit.is_none() {
            trace!("  register {} in block_{} is candidate #{} on exit", reg, block, registry.get(id).symref);
            registry.tables.set_on_exit(block, reg, id);
        }
    }

    /// The exits of `block` are full: queued candidates of the same class
    /// lose the successors whose entries are just as full
    fn reprioritize_after_saturation(
        &mut self,
        registry: &mut CandidateRegistry,
        block: BlockNumber,
        kind: RegisterKind,
        threshold: usize,
        only_pairs: bool,
    ) {
        let successors: BlockSet = extended_successors_from(self.method, block)
            .into_iter()
            .filter(|&s| self.totals_on_entry.get(kind, s) == threshold)
            .collect();
        trace!(
            "  exits of block_{} saturated for {}, reprioritizing into {:?}",
            block,
            kind,
            successors
        );
        self.reprioritize(registry, &successors, kind, only_pairs);
    }

    /// Rebuild the queue, removing `successors` from the live ranges of the
    /// candidates of class `kind` that are live into them
    fn reprioritize(
        &mut self,
        registry: &mut CandidateRegistry,
        successors: &BlockSet,
        kind: RegisterKind,
        only_pairs: bool,
    ) {
        let queue = std::mem::take(&mut self.queue);
        for id in queue {
            let rc = registry.get_mut(id);
            let is_pair = rc.data_type == DataType::Int64 && self.policy.is_32bit();
            if rc.register_kind() == kind
                && (!only_pairs || is_pair)
                && rc.blocks_live_on_entry.iter().any(|b| successors.contains(b))
            {
                trace!("  removing {:?} from candidate #{}", successors, rc.symref);
                rc.blocks_live_on_entry.retain(|b| !successors.contains(b));
                self.engine.recalculate_weight(rc);
            }
            if !self.prioritize(registry, id) {
                debug!("candidate #{} dropped after reprioritization", registry.get(id).symref);
            }
        }
    }
}
