use super::{
    fpr_count, gpr_count, power_of_two_scale_factor, vrf_count, NodeState, PressureState, PressureSummary,
    RecentValues, SpillKind, MAX_STRIDE, PRESSURE_LIMIT,
};
use crate::candidate::RegisterCandidate;
use crate::target::RegisterClassPolicy;
use gra_common::{BlockNumber, BlockSet, NodeId, RegisterKind, RegisterSet, SymRefNumber};
use gra_ir::{Method, Opcode};
use log::trace;
use std::collections::{BTreeMap, BTreeSet};

const KINDS: [RegisterKind; 3] = [RegisterKind::Gpr, RegisterKind::Fpr, RegisterKind::Vrf];

/// Call children past this index are always passed in memory
const MAX_CHILDREN_IN_REGISTERS: usize = 32;

fn kind_index(kind: RegisterKind) -> usize {
    match kind {
        RegisterKind::Gpr => 0,
        RegisterKind::Fpr => 1,
        RegisterKind::Vrf => 2,
    }
}

fn clamp(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

/// Dry-run tree evaluator with per-block result caches
///
/// The block cache holds the latest summary simulated for each block; the
/// candidate cache remembers which candidate each block was last simulated
/// for, so a conflict scan for that same candidate reads its own result.
pub struct PressureSimulator<'a> {
    method: &'a Method,
    policy: &'a dyn RegisterClassPolicy,
    block_cache: Vec<PressureSummary>,
    candidate_cache: BTreeMap<BlockNumber, (SymRefNumber, PressureSummary)>,
    has_pressure_info: bool,
}

impl<'a> PressureSimulator<'a> {
    pub fn new(method: &'a Method, policy: &'a dyn RegisterClassPolicy) -> Self {
        Self {
            method,
            policy,
            block_cache: vec![PressureSummary::default(); method.cfg.num_blocks()],
            candidate_cache: BTreeMap::new(),
            has_pressure_info: false,
        }
    }

    /// Whether any block has been simulated yet
    pub fn has_pressure_info(&self) -> bool {
        self.has_pressure_info
    }

    pub fn block_summary(&self, block: BlockNumber) -> &PressureSummary {
        &self.block_cache[block]
    }

    /// Global registers of each class
    pub fn limits(&self) -> [i32; 3] {
        let file = self.policy.register_file();
        KINDS.map(|k| file.count(k) as i32)
    }

    /// Simulate the extended block starting at `block` as if `candidate`
    /// were given a register on top of the `assigned` ones
    ///
    /// `high_half` accounts for the low half of a register pair picked
    /// already. Returns the block's summary and the candidate's most recent
    /// value and last load in the block.
    pub fn simulate_for_candidate<'c>(
        &mut self,
        block: BlockNumber,
        candidate: &'c RegisterCandidate,
        assigned: &[&'c RegisterCandidate],
        high_half: bool,
    ) -> (PressureSummary, RecentValues) {
        let mut entry = PressureState::new(block, assigned.to_vec(), self.limits());
        for c in assigned {
            if c.blocks_live_on_entry.contains(&block) {
                entry.assigned_on_entry.insert(c.symref);
                entry.update_register_pressure(self.policy, c.data_type);
            }
            if c.blocks_live_on_exit.contains(&block) {
                entry.assigned_on_exit.insert(c.symref);
            }
        }
        if high_half {
            match candidate.register_kind() {
                RegisterKind::Gpr => entry.gpr_pressure += 1,
                RegisterKind::Fpr => entry.fpr_pressure += 1,
                RegisterKind::Vrf => entry.vrf_pressure += 1,
            }
        }

        let live_on_entry = candidate.blocks_live_on_entry.contains(&block);
        let mut state = entry.with_candidate(candidate, live_on_entry);
        if live_on_entry {
            state.update_register_pressure(self.policy, candidate.data_type);
        }

        let mut summary = PressureSummary::new(
            clamp(state.gpr_pressure),
            clamp(state.fpr_pressure),
            clamp(state.vrf_pressure),
        );
        self.simulate_block_evaluation(block, &mut state, &mut summary);

        self.block_cache[block] = summary.clone();
        self.candidate_cache.insert(block, (candidate.symref, summary.clone()));
        self.has_pressure_info = true;
        trace!("  saved summary for block_{}", block);
        (summary, state.recent_values(candidate.symref))
    }

    /// Registers the latest simulation of `block` predicts would spill
    pub fn spilled_registers(&self, block: BlockNumber, symref: SymRefNumber) -> RegisterSet {
        match self.candidate_cache.get(&block) {
            Some((tag, summary)) if *tag == symref => summary.spilled_registers(self.policy),
            _ => self.block_cache[block].spilled_registers(self.policy),
        }
    }

    /// A candidate of class `kind` now occupies a register throughout
    /// `blocks`; raise the cached pressure of each extended block start
    pub fn bump_pressure(&mut self, blocks: &BlockSet, kind: RegisterKind) {
        for &b in blocks {
            if self.method.cfg.is_extension(b) {
                continue;
            }
            let cached = &mut self.block_cache[b];
            // A spilled kind tells nothing more and could overflow
            match kind {
                RegisterKind::Gpr if !cached.is_spilled(SpillKind::Gpr) => {
                    cached.gpr_pressure = (cached.gpr_pressure + 1).min(PRESSURE_LIMIT)
                }
                RegisterKind::Fpr if !cached.is_spilled(SpillKind::Fpr) => {
                    cached.fpr_pressure = (cached.fpr_pressure + 1).min(PRESSURE_LIMIT)
                }
                RegisterKind::Vrf if !cached.is_spilled(SpillKind::Vrf) => {
                    cached.vrf_pressure = (cached.vrf_pressure + 1).min(PRESSURE_LIMIT)
                }
                _ => {}
            }
        }
    }

    /// Simulate one extended block, folding its peak into `summary`
    pub fn simulate_block_evaluation(
        &mut self,
        block: BlockNumber,
        state: &mut PressureState<'_>,
        summary: &mut PressureSummary,
    ) {
        let method = self.method;
        let cfg = &method.cfg;
        assert!(
            !cfg.is_extension(block),
            "simulate_block_evaluation operates on extended blocks, block_{} is an extension",
            block
        );
        state.current_block = block;
        trace!(
            "  simulating block_{} candidate {:?} assigned on entry {:?} on exit {:?}",
            block,
            state.candidate_symref(),
            state.assigned_on_entry,
            state.assigned_on_exit
        );

        let chain = cfg.extended_block(block);
        if state.candidate.is_some() || !state.assigned.is_empty() {
            for &b in &chain {
                for &tt in &cfg.block(b).treetops {
                    self.simulation_pre_pass(tt, state);
                }
                self.keep_most_recent_values_alive(b, state);
            }
        }

        let mut per_block = summary.clone();
        let mut aborted = false;
        'chain: for &b in &chain {
            for &tt in &cfg.block(b).treetops {
                if state.must_abort() {
                    aborted = true;
                    summary.accumulate(&per_block);
                    break 'chain;
                }
                state.current_treetop = Some(tt);
                self.simulate_tree_evaluation(tt, state, &mut per_block);
                let node = method.node(tt);
                if let Some(symref) = node.symref {
                    if node.opcode.is_store_direct() {
                        if let Some(value) = node.first_child() {
                            remember_most_recent_value(symref, value, state);
                        }
                    } else if node.opcode.is_load_direct() {
                        remember_most_recent_value(symref, tt, state);
                    }
                }
            }
            self.block_cache[b] = per_block.clone();
            summary.accumulate(&per_block);
            per_block.reset(
                clamp(state.gpr_pressure),
                clamp(state.fpr_pressure),
                clamp(state.vrf_pressure),
            );
            self.kill_most_recent_values_kept_alive_until(b, state);
        }
        if aborted {
            trace!("  ABORTED");
        }

        if !cfg.is_loop_header(block) && summary.spill_mask.iter().any(|k| !k.is_mandatory()) {
            trace!("  removing non-mandatory spill kinds from {:?}", summary.spill_mask);
            summary.keep_mandatory_only();
        }
        trace!(
            "  finished block_{} g={} f={} v={} {:?}",
            block,
            summary.gpr_pressure,
            summary.fpr_pressure,
            summary.vrf_pressure,
            summary.spill_mask
        );
    }

    /// Initialize every node of the region, compute heights and find each
    /// candidate's most recent value and last load
    fn simulation_pre_pass(&self, id: NodeId, state: &mut PressureState<'_>) {
        if state.nodes.is_initialized(id) {
            return;
        }
        self.simulate_node_initialization(id, state);
        let node = self.method.node(id);
        for &child in &node.children {
            self.simulation_pre_pass(child, state);
            let child_height = u32::from(state.nodes.state(child).height);
            let ns = state.nodes.state_mut(id);
            if child_height >= u32::from(ns.height) {
                ns.set_height(child_height + 1);
            }
        }

        let Some(symref) = node.symref else {
            return;
        };
        if node.opcode.is_store_direct() {
            if let Some(value) = node.first_child() {
                remember_most_recent_value(symref, value, state);
            }
        } else if node.opcode.is_load_direct() {
            remember_most_recent_value(symref, id, state);
            if state.find_candidate(symref).is_some() {
                state.recent.entry(symref).or_default().last_load = Some(id);
            }
        }
    }

    /// A value live on entry to a successor stays in its register until the
    /// end of `block`
    fn keep_most_recent_values_alive(&self, block: BlockNumber, state: &mut PressureState<'_>) {
        let candidates: Vec<&RegisterCandidate> = state
            .candidate
            .into_iter()
            .chain(state.assigned.iter().copied())
            .collect();
        for &succ in &self.method.cfg.block(block).successors {
            for candidate in &candidates {
                if !candidate.blocks_live_on_entry.contains(&succ) {
                    continue;
                }
                if let Some(mrv) = state.most_recent_value(candidate.symref) {
                    self.simulate_node_initialization(mrv, state);
                    state.nodes.state_mut(mrv).keep_live_until = Some(block);
                    trace!("    will keep n{} live until the end of block_{}", mrv, block);
                }
            }
        }
    }

    fn kill_most_recent_values_kept_alive_until(&self, block: BlockNumber, state: &mut PressureState<'_>) {
        let symrefs: Vec<SymRefNumber> = state
            .candidate_symref()
            .into_iter()
            .chain(state.assigned.iter().map(|c| c.symref))
            .collect();
        for symref in symrefs {
            let Some(mrv) = state.most_recent_value(symref) else {
                continue;
            };
            let ns = state.nodes.state_mut(mrv);
            if ns.keep_live_until != Some(block) {
                continue;
            }
            ns.keep_live_until = None;
            trace!("    exiting(n{})", mrv);
            if ns.future_use_count == 0 {
                // Resurrect it so it dies for real this time
                ns.future_use_count = 1;
                self.simulate_dec_reference_count(mrv, state);
            }
        }
    }

    /// Evaluate `id` unless it is already in a register, then record the
    /// resulting pressure and any spill kinds it implies
    fn simulate_tree_evaluation(&self, id: NodeId, state: &mut PressureState<'_>, summary: &mut PressureSummary) {
        if state.must_abort() {
            return;
        }
        self.simulate_node_initialization(id, state);
        let node = self.method.node(id);

        // An implicit null check of a simple load evaluates nothing itself
        if self.policy.has_resumable_trap_handler() && node.opcode == Opcode::NullCheck {
            if let Some(child_id) = node.first_child() {
                let child = self.method.node(child_id);
                self.simulate_node_initialization(child_id, state);
                let is_load = child.opcode.is_load_direct() || child.opcode.is_load_indirect();
                if is_load && state.nodes.state(child_id).future_use_count == 1 && !child.unresolved {
                    self.simulate_skipped_tree_evaluation(id, state, 'N');
                    self.simulate_dec_reference_count(child_id, state);
                    return;
                }
            }
        }

        if state.nodes.state(id).has_register() {
            if state.is_candidate_load(node) && !state.nodes.state(id).live_candidate_load {
                // Where the load would have gone live without a global register
                state.nodes.state_mut(id).live_candidate_load = true;
                state.num_live_candidate_loads += 1;
                state.pressure_risk_from_start = false;
            }
            trace!("    {} n{} already live{}", node.opcode, id, annotations(state));
            return;
        }

        let is_call = node.is_real_call();
        let mut temps = [0u32; 3];
        if self.node_will_be_rematerialized(id, state) {
            // Look as if the node were recomputed for this use: one use of
            // the node, one more use of each child
            let original = state.nodes.state(id).future_use_count;
            {
                let ns = state.nodes.state_mut(id);
                ns.will_be_rematerialized = true;
                ns.future_use_count = 1;
            }
            for &child in &node.children {
                self.simulate_node_initialization(child, state);
                state.nodes.state_mut(child).future_use_count += 1;
                trace!("    ++n{}", child);
            }
            self.simulate_node_evaluation(id, state, summary);
            state.nodes.state_mut(id).future_use_count = original;
        } else {
            if is_call {
                temps = self.number_of_temporary_registers_used_by_call(id, state);
            }
            self.simulate_node_evaluation(id, state, summary);
        }

        summary.accumulate_state(state, temps);

        if state.candidate_is_live_after_gra() {
            if is_call {
                summary.spill(SpillKind::Volatile);
                let special_argument = state
                    .candidate
                    .and_then(|c| self.method.symbol(c.symref).linkage_register_index())
                    .map(|index| self.policy.linkage().is_special_non_volatile_argument(index))
                    .unwrap_or(false);
                if !special_argument {
                    summary.spill(SpillKind::Linkage);
                }
                summary.spill(SpillKind::VmThread);
            } else if matches!(
                node.opcode,
                Opcode::AsyncCheck | Opcode::MonitorEnter | Opcode::MonitorExit
            ) {
                summary.spill(SpillKind::VmThread);
            }
        }
    }

    fn simulate_skipped_tree_evaluation(&self, id: NodeId, state: &mut PressureState<'_>, tag: char) {
        self.simulate_node_initialization(id, state);
        trace!("    {} n{} skipped ({}){}", self.method.node(id).opcode, id, tag, annotations(state));
    }

    /// Evaluate the children of a node that is not yet live, release them
    /// and make the node itself live
    fn simulate_node_evaluation(&self, id: NodeId, state: &mut PressureState<'_>, summary: &mut PressureSummary) {
        assert!(
            !state.nodes.state(id).has_register(),
            "simulate_node_evaluation called on live node n{}",
            id
        );
        let node = self.method.node(id);

        // The taller child probably needs more registers, so goes first
        let second_child_first = match (node.first_child(), node.second_child()) {
            (Some(first), Some(second)) if node.num_children() == 2 && !node.opcode.is_indirect() => {
                self.simulate_node_initialization(first, state);
                self.simulate_node_initialization(second, state);
                state.nodes.state(second).height > state.nodes.state(first).height
            }
            _ => false,
        };

        let is_call = node.opcode.is_call();
        let linkage = self.policy.linkage();
        let mut argument_registers = KINDS.map(|k| linkage.arguments(k).len() as i32);
        let mut children_in_registers = BTreeSet::new();

        let own_memref = state.push_memref();
        if second_child_first {
            trace!("    (n{} second child first)", id);
            for &child in node.children.iter().rev() {
                self.simulate_tree_evaluation(child, state, summary);
            }
        } else {
            // The address child of a memory access is evaluated last
            let has_memref = node.opcode.is_indirect();
            for (index, &child) in node.children.iter().enumerate().skip(usize::from(has_memref)) {
                self.simulate_tree_evaluation(child, state, summary);
                if !is_call {
                    continue;
                }
                let slot = kind_index(self.method.node(child).data_type.register_kind());
                let in_register = index < MAX_CHILDREN_IN_REGISTERS && {
                    argument_registers[slot] -= 1;
                    argument_registers[slot] >= 0
                };
                if in_register {
                    children_in_registers.insert(index);
                } else {
                    // Passed in memory: dead once stored
                    self.simulate_dec_reference_count(child, state);
                }
            }
            if has_memref {
                if let Some(address) = node.first_child() {
                    self.simulate_memory_reference(own_memref, address, state, summary);
                }
            }
        }

        // Children are released only after all of them are evaluated, since
        // one child's result lives across the evaluation of the others
        let folded =
            self.node_got_folded_into_memref(id, state) && !state.nodes.state(id).will_be_rematerialized;
        if folded {
            // Seen again later; its children are released on the last visit
            if let Some(outer) = state.current_memref {
                state.memref_add(outer);
            }
            trace!("    n{} memFolded", id);
        } else {
            if is_call {
                for &index in children_in_registers.iter().rev() {
                    self.simulate_dec_reference_count(node.children[index], state);
                }
            } else {
                for &child in &node.children {
                    self.simulate_dec_reference_count(child, state);
                }
            }
            state.memref_release(own_memref);
            state.nodes.state_mut(id).child_refcounts_decremented = true;
        }
        state.pop_memref();

        // Registers freed by the children can hold the result
        self.simulate_node_going_live(id, state);
    }

    fn simulate_memory_reference(
        &self,
        memref: usize,
        address: NodeId,
        state: &mut PressureState<'_>,
        summary: &mut PressureSummary,
    ) {
        state.memref_nest_depth += 1;
        let outer = state.current_memref.replace(memref);
        self.simulate_tree_evaluation(address, state, summary);
        state.current_memref = outer;
        state.memref_nest_depth -= 1;
    }

    fn node_got_folded_into_memref(&self, id: NodeId, state: &PressureState<'_>) -> bool {
        let counts = self.node_result_counts(id, state);
        state.current_memref.is_some()
            && !state.is_candidate_load(self.method.node(id))
            && counts[0] == 0
            && counts[1] == 0
    }

    /// Commoned address arithmetic under a memory reference is recomputed
    /// rather than kept in a register
    ///
    /// Candidate-agnostic runs never model this, overestimating pressure.
    fn node_will_be_rematerialized(&self, id: NodeId, state: &PressureState<'_>) -> bool {
        if state.candidate.is_none() || state.current_memref.is_none() {
            return false;
        }
        if state.nodes.state(id).future_use_count <= 1 {
            return false;
        }
        let node = self.method.node(id);
        if node.opcode.is_array_ref() {
            return true;
        }
        if !(node.data_type.is_integral() || node.data_type.is_address()) {
            return false;
        }
        let by_constant = node
            .second_child()
            .map(|c| self.method.node(c).opcode.is_load_const())
            .unwrap_or(false);
        if !by_constant {
            return false;
        }
        if node.opcode.is_add() || node.opcode.is_sub() {
            self.policy.supports_constant_offset_in_addressing()
        } else if node.opcode.is_mul() || node.opcode.is_left_shift() {
            self.policy.supports_scaled_index_addressing()
        } else {
            false
        }
    }

    fn node_can_be_folded_into_memref(&self, id: NodeId, state: &PressureState<'_>) -> bool {
        let ns = state.nodes.state(id);
        if (ns.has_register() || ns.future_use_count > 1) && !self.node_will_be_rematerialized(id, state) {
            // Survives outside the reference
            return false;
        }
        let node = self.method.node(id);
        let int_or_address = node.data_type.is_integral() || node.data_type.is_address();
        let by_constant = node
            .second_child()
            .map(|c| self.method.node(c).opcode.is_load_const())
            .unwrap_or(false);
        if node.opcode.is_add() && int_or_address {
            true
        } else if node.opcode.is_sub() && by_constant && int_or_address {
            // Constant goes into the displacement
            true
        } else if power_of_two_scale_factor(self.method, node)
            .map(|scale| scale <= MAX_STRIDE)
            .unwrap_or(false)
        {
            // Constant goes into the stride
            true
        } else {
            node.opcode.is_load_addr() || (node.opcode.is_load_const() && int_or_address)
        }
    }

    fn node_result_consumes_no_registers(&self, id: NodeId, state: &PressureState<'_>) -> bool {
        self.method.node(id).opcode.is_root_only()
            || (state.current_memref.is_some() && self.node_can_be_folded_into_memref(id, state))
    }

    /// GPRs, FPRs and vector registers holding the node's result
    fn node_result_counts(&self, id: NodeId, state: &PressureState<'_>) -> [u32; 3] {
        if self.node_result_consumes_no_registers(id, state) {
            return [0; 3];
        }
        let data_type = self.method.node(id).data_type;
        [gpr_count(self.policy, data_type), fpr_count(data_type), vrf_count(data_type)]
    }

    /// Volatile registers a call kills beyond those carrying its arguments
    fn number_of_temporary_registers_used_by_call(&self, id: NodeId, state: &PressureState<'_>) -> [u32; 3] {
        let policy = self.policy;
        let file = policy.register_file();
        let mut volatile = policy.registers_for_spill_kind(SpillKind::Volatile);
        // The thread register is reloaded after a call too
        volatile.extend(policy.registers_for_spill_kind(SpillKind::VmThread));
        let linkage = policy.registers_for_spill_kind(SpillKind::Linkage);
        let node = self.method.node(id);

        let mut temps = [0u32; 3];
        for (slot, &kind) in KINDS.iter().enumerate() {
            let class_volatile: RegisterSet = volatile.intersection(&file.set_of(kind)).copied().collect();
            let class_linkage = class_volatile.intersection(&linkage).count();
            let mut arguments = 0usize;
            for &child in &node.children {
                let cs = state.nodes.state(child);
                let live = [cs.live_gprs, cs.live_fprs, cs.live_vrfs][slot] as usize;
                arguments = class_linkage.min(arguments + live);
            }
            temps[slot] = class_volatile.len().saturating_sub(arguments) as u32;
        }
        temps
    }

    fn simulate_node_initialization(&self, id: NodeId, state: &mut PressureState<'_>) {
        if state.nodes.is_initialized(id) {
            return;
        }
        let node = self.method.node(id);
        state.nodes.insert(
            id,
            NodeState {
                future_use_count: node.reference_count,
                ..NodeState::default()
            },
        );
        let already_live = (state.is_candidate_load(node) && state.candidate_is_live_on_entry)
            || state.is_load_already_assigned_on_entry(node);
        if already_live {
            // Counted in the entry pressure already
            let [gprs, fprs, vrfs] = self.node_result_counts(id, state);
            let ns = state.nodes.state_mut(id);
            ns.live_gprs = gprs;
            ns.live_fprs = fprs;
            ns.live_vrfs = vrfs;
            ns.child_refcounts_decremented = true;
        }
    }

    fn simulate_node_going_live(&self, id: NodeId, state: &mut PressureState<'_>) {
        let node = self.method.node(id);
        for &child in &node.children {
            self.simulate_node_initialization(child, state);
            let cs = state.nodes.state(child);
            if cs.will_be_rematerialized && cs.child_refcounts_decremented {
                trace!("    rematChild n{}", child);
                self.simulate_node_going_dead(child, state);
            }
            state.nodes.state_mut(child).will_be_rematerialized = false;
        }

        assert!(!state.nodes.state(id).has_register(), "node n{} is already live", id);
        let [gprs, fprs, vrfs] = self.node_result_counts(id, state);
        {
            let ns = state.nodes.state_mut(id);
            ns.live_gprs = gprs;
            ns.live_fprs = fprs;
            ns.live_vrfs = vrfs;
        }
        state.gpr_pressure += gprs as i32;
        state.fpr_pressure += fprs as i32;
        state.vrf_pressure += vrfs as i32;
        trace!(
            "    {} n{} g+{}={} f+{}={} v+{}={}{}",
            node.opcode,
            id,
            gprs,
            state.gpr_pressure,
            fprs,
            state.fpr_pressure,
            vrfs,
            state.vrf_pressure,
            annotations(state)
        );
    }

    fn simulate_node_going_dead(&self, id: NodeId, state: &mut PressureState<'_>) {
        let node = self.method.node(id);
        let ns = state.nodes.state(id);
        assert!(
            ns.child_refcounts_decremented,
            "node n{} went dead before its children were released",
            id
        );
        let candidate_load = state.is_candidate_load(node);
        let candidate_last_load = state.candidate_symref().and_then(|s| state.last_load(s));
        if candidate_load && state.candidate_is_live_on_entry && candidate_last_load != Some(id) {
            // A later candidate load is live on entry too
            state.pressure_risk_from_start = true;
            trace!("    *n{}", id);
        } else if state.is_load_already_assigned_on_entry(node)
            && node.symref.and_then(|s| state.last_load(s)) != Some(id)
        {
            trace!("    *n{}", id);
        } else {
            state.gpr_pressure -= ns.live_gprs as i32;
            state.fpr_pressure -= ns.live_fprs as i32;
            state.vrf_pressure -= ns.live_vrfs as i32;
            assert!(state.gpr_pressure >= 0, "GPR pressure must never be negative");
            assert!(state.fpr_pressure >= 0, "FPR pressure must never be negative");
            assert!(state.vrf_pressure >= 0, "VRF pressure must never be negative");
            trace!("    ~n{}", id);
        }

        if candidate_load && ns.live_candidate_load {
            state.nodes.state_mut(id).live_candidate_load = false;
            state.num_live_candidate_loads -= 1;
            assert!(
                state.num_live_candidate_loads >= 0,
                "live candidate loads must never be negative"
            );
        } else {
            let ns = state.nodes.state_mut(id);
            ns.live_gprs = 0;
            ns.live_fprs = 0;
            ns.live_vrfs = 0;
        }
    }

    fn simulate_dec_reference_count(&self, id: NodeId, state: &mut PressureState<'_>) {
        self.simulate_node_initialization(id, state);
        trace!("    --n{}", id);
        let ns = state.nodes.state_mut(id);
        assert!(
            ns.future_use_count > 0,
            "Too many simulated refcount decrements on node n{}",
            id
        );
        ns.future_use_count -= 1;
        if ns.future_use_count > 0 {
            return;
        }
        let ns = ns.clone();

        if !ns.child_refcounts_decremented {
            // Never evaluated, so its children were never needed
            trace!("    ~~n{}", id);
            for &child in &self.method.node(id).children {
                self.simulate_dec_reference_count(child, state);
            }
            return;
        }

        if ns.keep_live_until.is_some() {
            // Stays in its register until a block end
            let is_candidate_value = state.candidate_symref().and_then(|s| state.most_recent_value(s)) == Some(id);
            if is_candidate_value && !ns.is_causing_pressure_risk_until_end {
                state.pressure_risk_until_end += 1;
                state.nodes.state_mut(id).is_causing_pressure_risk_until_end = true;
                trace!("    keep:n{}", id);
            } else if !is_candidate_value {
                trace!("    keeping:n{}", id);
            }
        } else {
            if ns.is_causing_pressure_risk_until_end {
                state.pressure_risk_until_end = state.pressure_risk_until_end.saturating_sub(1);
                state.nodes.state_mut(id).is_causing_pressure_risk_until_end = false;
            }
            self.simulate_node_going_dead(id, state);
        }
    }
}

fn remember_most_recent_value(symref: SymRefNumber, value: NodeId, state: &mut PressureState<'_>) {
    if state.assigned_on_exit.contains(&symref) || state.candidate_symref() == Some(symref) {
        state.recent.entry(symref).or_default().most_recent_value = Some(value);
    }
}

/// Risk markers for trace lines: `+` from the start or until the end, `|`
/// while a candidate load is live
fn annotations(state: &PressureState<'_>) -> String {
    let mut text = String::new();
    if state.candidate.is_some() {
        let from_start = if state.pressure_risk_from_start {
            '+'
        } else if state.num_live_candidate_loads > 0 {
            '|'
        } else {
            ' '
        };
        let until_end = if state.pressure_risk_until_end > 0 { '+' } else { ' ' };
        text.push(' ');
        text.push(from_start);
        text.push(until_end);
    }
    match state.memref_nest_depth {
        0 => {}
        1 => text.push_str(" mem"),
        depth => text.push_str(&format!(" mem*{}", depth)),
    }
    text
}
