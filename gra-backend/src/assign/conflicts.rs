use crate::candidate::{CandidateId, CandidateRegistry, Coordinates, RegisterCandidate};
use crate::picker::RegisterPickStrategy;
use crate::pressure::SpillKind;
use crate::target::RegisterClassPolicy;
use gra_common::{BlockSet, GlobalRegisterNumber, LoopId, RegisterSet};
use gra_ir::Method;
use log::trace;
use std::collections::BTreeSet;
use std::ops::Range;

/// Blocks where a register is already taken, as seen by one candidate
///
/// Each vector is indexed by global register number and rebuilt for every
/// candidate by `compute_available_registers`.
#[derive(Debug, Clone, Default)]
pub struct ConflictMatrices {
    /// Live on entry in both
    pub entry: Vec<BlockSet>,
    /// Live on exit in both
    pub exit: Vec<BlockSet>,
    /// The register is taken on entry where the candidate is live on exit
    pub entry_exit: Vec<BlockSet>,
    /// The register is taken on exit where the candidate is live on entry
    pub exit_entry: Vec<BlockSet>,
}

impl ConflictMatrices {
    pub fn new(registers: usize) -> Self {
        Self {
            entry: vec![BlockSet::new(); registers],
            exit: vec![BlockSet::new(); registers],
            entry_exit: vec![BlockSet::new(); registers],
            exit_entry: vec![BlockSet::new(); registers],
        }
    }

    pub fn is_clear(&self, reg: GlobalRegisterNumber) -> bool {
        self.entry[reg].is_empty()
            && self.exit[reg].is_empty()
            && self.entry_exit[reg].is_empty()
            && self.exit_entry[reg].is_empty()
    }
}

fn intersect(a: &BlockSet, b: &BlockSet) -> BlockSet {
    a.intersection(b).copied().collect()
}

/// Whether a symbol leaving a register in an extended block is still
/// referenced after the one entering it starts
///
/// `leaving` holds the register on entry to the block and `entering` holds
/// it on exit. A symbol with no reference in the block never overlaps.
pub fn candidates_overlap(leaving: Option<Coordinates>, entering: Option<Coordinates>) -> bool {
    match (leaving, entering) {
        (Some(leaving), Some(entering)) => leaving.last >= entering.first,
        _ => false,
    }
}

/// Rebuild the conflicts of candidate `id` against every register in
/// `range` and return the registers with none
///
/// An entry/exit crossing in a block is forgiven when the two symbols'
/// references in that extended block do not overlap in evaluation order.
/// `dump` logs every register's conflict sets.
pub fn compute_available_registers(
    method: &Method,
    policy: &dyn RegisterClassPolicy,
    registry: &mut CandidateRegistry,
    id: CandidateId,
    range: Range<GlobalRegisterNumber>,
    conflicts: &mut ConflictMatrices,
    dump: bool,
) -> RegisterSet {
    let rc = registry.get(id).clone();
    for i in range.clone() {
        conflicts.entry[i] = intersect(&registry.entry_usage[i], &rc.blocks_live_on_entry);
        conflicts.exit[i] = intersect(&registry.exit_usage[i], &rc.blocks_live_on_exit);

        let mut entry_exit = intersect(&registry.entry_usage[i], &rc.blocks_live_on_exit);
        let crossings: Vec<_> = entry_exit.iter().copied().collect();
        for b in crossings {
            let Some(other) = registry.tables.on_entry(b, i) else {
                continue;
            };
            let other_symref = registry.get(other).symref;
            let theirs = registry.coordinates(method, b, other_symref);
            let ours = registry.coordinates(method, b, rc.symref);
            if !candidates_overlap(theirs, ours) {
                entry_exit.remove(&b);
            }
        }
        conflicts.entry_exit[i] = entry_exit;

        let mut exit_entry = intersect(&registry.exit_usage[i], &rc.blocks_live_on_entry);
        let crossings: Vec<_> = exit_entry.iter().copied().collect();
        for b in crossings {
            let Some(other) = registry.tables.on_exit(b, i) else {
                continue;
            };
            let other_symref = registry.get(other).symref;
            let ours = registry.coordinates(method, b, rc.symref);
            let theirs = registry.coordinates(method, b, other_symref);
            if !candidates_overlap(ours, theirs) {
                exit_entry.remove(&b);
            }
        }
        conflicts.exit_entry[i] = exit_entry;
    }

    // A parameter live into the entry block arrives in its own linkage
    // register; every other linkage register is busy there
    let symbol = method.symbol(rc.symref);
    if let (true, Some(entry_block)) = (symbol.is_parm(), method.cfg.entry_block()) {
        if rc.blocks_live_on_entry.contains(&entry_block) {
            if let Some(index) = symbol.linkage_register_index() {
                let parm_reg = policy.linkage().linkage_register(rc.register_kind(), index);
                for reg in policy.registers_for_spill_kind(SpillKind::Linkage) {
                    if Some(reg) != parm_reg && range.contains(&reg) {
                        conflicts.entry[reg].insert(entry_block);
                    }
                }
            }
        }
    }

    let vm_thread = policy.register_file().vm_thread;
    let mut available = RegisterSet::new();
    for i in range {
        if dump {
            trace!(
                "  register {}: entry {:?} exit {:?} entry/exit {:?} exit/entry {:?}",
                i,
                conflicts.entry[i],
                conflicts.exit[i],
                conflicts.entry_exit[i],
                conflicts.exit_entry[i]
            );
        }
        if conflicts.is_clear(i)
            && policy.is_global_register_available(i, rc.data_type)
            && (Some(i) != vm_thread || !rc.dont_assign_vm_thread_register)
        {
            available.insert(i);
        }
    }
    available
}

/// Turn the simulator's spill predictions into conflicts
///
/// For every live block, each register of the class predicted to spill
/// conflicts throughout the stretch of the extended block the candidate is
/// live in. Exit conflicts then become entry conflicts of the successors.
pub fn scan_pressure_cache_for_conflicts(
    method: &Method,
    policy: &dyn RegisterClassPolicy,
    picker: &dyn RegisterPickStrategy,
    rc: &RegisterCandidate,
    range: Range<GlobalRegisterNumber>,
    conflicts: &mut ConflictMatrices,
) {
    let cfg = &method.cfg;
    trace!("  scanning pressure cache for candidate #{}", rc.symref);
    for b in rc.live_on_entry_or_exit() {
        let spilled = picker.simulated_spilled_registers(b, rc.symref).unwrap_or_default();
        for &reg in spilled.iter().filter(|r| range.contains(r)) {
            // Up the extended block
            let mut starts_at_extended_entry = false;
            let mut current = b;
            while rc.blocks_live_on_entry.contains(&current) {
                conflicts.entry[reg].insert(current);
                if !cfg.is_extension(current) {
                    starts_at_extended_entry = true;
                    break;
                }
                match cfg.prev_block(current) {
                    Some(prev) if rc.blocks_live_on_exit.contains(&prev) => {
                        conflicts.exit[reg].insert(prev);
                        current = prev;
                    }
                    _ => break,
                }
            }

            // Down the extended block
            let mut current = b;
            while rc.blocks_live_on_exit.contains(&current) {
                if !starts_at_extended_entry {
                    conflicts.exit[reg].insert(current);
                }
                match cfg.next_block(current) {
                    Some(next) if cfg.is_extension(next) && rc.blocks_live_on_entry.contains(&next) => {
                        conflicts.entry[reg].insert(next);
                        current = next;
                    }
                    _ => break,
                }
            }
        }
    }

    let vm_thread = policy.register_file().vm_thread;
    for i in range {
        if Some(i) == vm_thread && rc.dont_assign_vm_thread_register {
            continue;
        }
        let from_exits: BlockSet = conflicts.exit[i]
            .iter()
            .chain(conflicts.entry_exit[i].iter())
            .flat_map(|&b| cfg.block(b).successors.iter().copied())
            .collect();
        conflicts.entry[i].extend(from_exits);
    }
}

/// The register (or pair) whose conflicting blocks are cheapest to give up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictChoice {
    pub register: GlobalRegisterNumber,
    pub second: Option<GlobalRegisterNumber>,
}

/// Pick the register to trim the live range against after a failed pick
///
/// Prefers the smallest hottest conflicting reference count, then the most
/// of the candidate's loops the register is not hot in, then the fewest
/// blocks at that count and finally the smallest conflict set. Pairs only
/// look at the blocks both halves conflict in.
#[allow(clippy::too_many_arguments)]
pub fn choose_conflicting_register(
    method: &Method,
    policy: &dyn RegisterClassPolicy,
    rc: &RegisterCandidate,
    referencing: &BlockSet,
    range: Range<GlobalRegisterNumber>,
    available: &RegisterSet,
    use_pressure_info: bool,
    needs_two_registers: bool,
    freq_ratio: f64,
    conflicts: &mut ConflictMatrices,
) -> Option<ConflictChoice> {
    let cfg = &method.cfg;
    let candidate_loops: BTreeSet<LoopId> = rc
        .blocks_live_on_entry
        .iter()
        .filter_map(|&b| cfg.block(b).loop_id)
        .collect();
    let vm_thread = policy.register_file().vm_thread;

    let mut choice: Option<ConflictChoice> = None;
    let mut number_of_conflicts = 0usize;
    let mut smallest_max_frequency = 0u32;
    let mut max_clear_structures = 0usize;

    for i in range.clone() {
        if (!use_pressure_info && available.contains(&i)) || (Some(i) == vm_thread && rc.dont_assign_vm_thread_register)
        {
            continue;
        }
        let exit_entry = conflicts.exit_entry[i].clone();
        conflicts.entry[i].extend(exit_entry);

        let mut at_max_frequency = 0usize;
        let mut max_frequency = 0u32;
        let mut register_loops: BTreeSet<Option<LoopId>> = BTreeSet::new();

        if !needs_two_registers {
            for &b in &conflicts.entry[i] {
                if !referencing.contains(&b) {
                    continue;
                }
                let weight = rc.count(b);
                let containing = cfg.block(b).loop_id;
                if weight > max_frequency {
                    max_frequency = weight;
                    at_max_frequency = 1;
                    register_loops.clear();
                    register_loops.insert(containing);
                } else if f64::from(weight) >= f64::from(max_frequency) * freq_ratio {
                    at_max_frequency += 1;
                    register_loops.insert(containing);
                }
            }
            if at_max_frequency == 0 {
                at_max_frequency = conflicts.entry[i].len();
            }
        }

        let clear_structures = candidate_loops
            .iter()
            .filter(|&&l| !register_loops.contains(&Some(l)))
            .count();
        trace!(
            "  register {}: max freq {}, {} clear loops, {} blocks at max",
            i,
            max_frequency,
            clear_structures,
            at_max_frequency
        );

        if needs_two_registers {
            for j in range.start..i {
                if available.contains(&j) {
                    continue;
                }
                let both = intersect(&conflicts.entry[i], &conflicts.entry[j]);
                for &b in &both {
                    let weight = rc.count(b);
                    if weight > max_frequency {
                        max_frequency = weight;
                        at_max_frequency = 1;
                    } else if f64::from(weight) >= f64::from(max_frequency) * freq_ratio {
                        at_max_frequency += 1;
                    }
                }
                if at_max_frequency == 0 {
                    at_max_frequency = both.len();
                }
                let current_len = choice.map(|c| {
                    let mut current = conflicts.entry[c.register].clone();
                    if let Some(second) = c.second {
                        current.retain(|b| conflicts.entry[second].contains(b));
                    }
                    current.len()
                });
                let better = match current_len {
                    None => true,
                    Some(len) => {
                        at_max_frequency < number_of_conflicts
                            || (at_max_frequency == number_of_conflicts && both.len() < len)
                    }
                };
                if better {
                    choice = Some(ConflictChoice {
                        register: i,
                        second: Some(j),
                    });
                    number_of_conflicts = at_max_frequency;
                }
            }
            continue;
        }

        let better = match choice {
            None => true,
            Some(current) => {
                max_frequency < smallest_max_frequency
                    || (max_frequency == smallest_max_frequency
                        && (clear_structures > max_clear_structures
                            || (clear_structures == max_clear_structures
                                && (at_max_frequency < number_of_conflicts
                                    || (at_max_frequency == number_of_conflicts
                                        && conflicts.entry[i].len() < conflicts.entry[current.register].len())))))
            }
        };
        if better {
            smallest_max_frequency = max_frequency;
            max_clear_structures = clear_structures;
            number_of_conflicts = at_max_frequency;
            choice = Some(ConflictChoice {
                register: i,
                second: None,
            });
        }
    }
    choice
}

/// Blocks to drop from the live range for `choice`
pub fn blocks_to_trim(choice: ConflictChoice, conflicts: &ConflictMatrices) -> BlockSet {
    let mut blocks = conflicts.entry[choice.register].clone();
    if let Some(second) = choice.second {
        blocks.retain(|b| conflicts.entry[second].contains(b));
    }
    blocks
}
