//! Live ranges and priority weights of register candidates
//!
//! A candidate's range starts as every block of its range map where the
//! symbol is live, and is then trimmed: blocks without predecessor support go
//! first, then unreferenced tails, then loop bodies the candidate never
//! touches. Live-on-exit is derived from what remains. The weight rewards
//! loads and stores saved in hot blocks and penalises long ranges.

use crate::candidate::RegisterCandidate;
use crate::config::GraConfig;
use crate::target::RegisterClassPolicy;
use gra_common::{BlockNumber, BlockSet, Hotness, SymRefNumber};
use gra_ir::{Method, Node, END, START};
use log::trace;
use std::collections::BTreeMap;

/// Largest static loads-and-stores total that still scales without overflow
const STATIC_LOADS_AND_STORES_CAP: i64 = (i32::MAX / 10000) as i64;

/// Scoring of a trimmed live range
pub trait WeightFunction {
    /// Weight of a range saving `loads_and_stores` weighted accesses over
    /// `blocks` hot blocks; `loads_and_stores` is positive
    fn weight(&self, loads_and_stores: i64, blocks: i64) -> u32;
}

/// Static nesting-depth estimates: scaled and divided by the squared span
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticWeight;

impl WeightFunction for StaticWeight {
    fn weight(&self, loads_and_stores: i64, blocks: i64) -> u32 {
        let w = loads_and_stores * 10000 / (blocks * blocks);
        w.clamp(1, i64::from(u32::MAX)) as u32
    }
}

/// Profiled frequencies are already large; no scaling
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfiledWeight;

impl WeightFunction for ProfiledWeight {
    fn weight(&self, loads_and_stores: i64, blocks: i64) -> u32 {
        let w = loads_and_stores / (blocks * blocks);
        w.clamp(1, i64::from(u32::MAX)) as u32
    }
}

pub struct LiveRangeEngine<'a> {
    method: &'a Method,
    policy: &'a dyn RegisterClassPolicy,
    config: &'a GraConfig,
    weight_function: Box<dyn WeightFunction + 'a>,
    referencing: BTreeMap<SymRefNumber, BlockSet>,
}

impl<'a> LiveRangeEngine<'a> {
    pub fn new(method: &'a Method, policy: &'a dyn RegisterClassPolicy, config: &'a GraConfig) -> Self {
        let weight_function: Box<dyn WeightFunction> = if method.uses_profiling {
            Box::new(ProfiledWeight)
        } else {
            Box::new(StaticWeight)
        };

        let mut referencing: BTreeMap<SymRefNumber, BlockSet> = BTreeMap::new();
        for &b in &method.cfg.layout {
            method.for_each_node_post_order(&method.cfg.block(b).treetops, |_, node| {
                if node.opcode.is_load_direct() || node.opcode.is_store_direct() {
                    if let Some(symref) = node.symref {
                        referencing.entry(symref).or_default().insert(b);
                    }
                }
            });
        }

        Self {
            method,
            policy,
            config,
            weight_function,
            referencing,
        }
    }

    pub fn with_weight_function(mut self, weight_function: impl WeightFunction + 'a) -> Self {
        self.weight_function = Box::new(weight_function);
        self
    }

    pub fn method(&self) -> &'a Method {
        self.method
    }

    /// Blocks with a direct load or store of `symref`
    pub fn blocks_referencing(&self, symref: SymRefNumber) -> BlockSet {
        self.referencing.get(&symref).cloned().unwrap_or_default()
    }

    fn structure_weight(&self, block: BlockNumber) -> i64 {
        self.method.cfg.structure_weight(block, self.method.uses_profiling)
    }

    fn ignorably_cold(&self, block: BlockNumber) -> bool {
        self.config.dont_assign_in_cold_blocks && self.method.cfg.block(block).is_cold
    }

    /// Whether the symbol's value is live on entry to `block`, per the
    /// block's live-locals when it has them
    pub fn symbol_is_live(&self, rc: &RegisterCandidate, block: BlockNumber) -> bool {
        let Some(live_locals) = &self.method.cfg.block(block).live_locals else {
            return true;
        };
        let symbol = self.method.symbol(rc.symref);
        if !symbol.is_auto_or_parm() {
            return true;
        }
        match symbol.live_local_index {
            Some(index) => live_locals.contains(&index),
            None => true,
        }
    }

    /// Initial live range and weight from the candidate's range map
    pub fn set_weight(&self, rc: &mut RegisterCandidate) {
        let cfg = &self.method.cfg;
        rc.blocks_live_on_entry.clear();
        rc.blocks_live_on_exit.clear();
        rc.original_live_on_entry.clear();

        let blocks: Vec<BlockNumber> = rc.block_counts.keys().copied().collect();
        for b in blocks {
            let count = rc.count(b);
            let first = cfg.is_first_block(b);
            if (first && rc.all_blocks && self.policy.supports_global_register_deps_on_first_block())
                || (!first && ((count == 0 && rc.loop_exit_blocks.contains(&b)) || self.symbol_is_live(rc, b)))
            {
                rc.blocks_live_on_entry.insert(b);
            }

            // A reference in the loop part of an extended block counts for
            // its head, but not one in a colder tail
            let ext = cfg.start_of_extended_block(b);
            if self.structure_weight(ext) <= self.structure_weight(b) && count > rc.count(ext) {
                rc.set_count(ext, count);
            }
        }

        let entry = rc.blocks_live_on_entry.clone();
        rc.original_live_on_entry.extend(entry);
        self.process_live_on_entry_blocks(rc, false);
    }

    /// Recompute after the live-on-entry set was trimmed from outside
    pub fn recalculate_weight(&self, rc: &mut RegisterCandidate) {
        rc.blocks_live_on_exit.clear();
        rc.original_live_on_entry = rc.blocks_live_on_entry.clone();
        self.process_live_on_entry_blocks(rc, false);
    }

    /// Trim the live-on-entry set, derive live-on-exit and weigh the result
    pub fn process_live_on_entry_blocks(&self, rc: &mut RegisterCandidate, call_to_remove_unused_loops: bool) {
        let cfg = &self.method.cfg;
        let profiling = self.method.uses_profiling;
        let freq_ratio = self.config.noise_ratio(profiling);
        let referencing = self.blocks_referencing(rc.symref);
        let mut remove_unused_loops =
            call_to_remove_unused_loops || self.policy.are_gprs_scarce() || self.config.remove_unused_loops;

        if !rc.all_blocks {
            self.remove_unsupported_blocks(rc, &referencing);
        }
        self.trim_unreferenced_tails(rc);

        let mut max_frequency = 1;
        for &b in &rc.blocks_live_on_entry {
            if !self.ignorably_cold(b) {
                max_frequency = max_frequency.max(self.structure_weight(b));
            }
        }
        let mut curr_max_frequency = max_frequency;

        if !rc.loops_with_holes.is_empty() {
            remove_unused_loops = true;
        }
        if max_frequency > 1 && remove_unused_loops {
            let mut frequency = if self.method.hotness <= Hotness::Warm && rc.loops_with_holes.is_empty() {
                max_frequency
            } else {
                1
            };
            loop {
                let has_unreferenced = rc
                    .blocks_live_on_entry
                    .iter()
                    .any(|&b| self.structure_weight(b) == frequency && rc.count(b) == 0);

                if has_unreferenced && (self.config.enable_range_splitting || self.policy.are_gprs_scarce()) {
                    let at_frequency: Vec<BlockNumber> = rc
                        .blocks_live_on_entry
                        .iter()
                        .copied()
                        .filter(|&b| self.structure_weight(b) == frequency)
                        .collect();
                    for b in at_frequency {
                        let in_holed_loop = cfg
                            .block(b)
                            .loop_id
                            .map(|id| rc.loops_with_holes.contains(&id))
                            .unwrap_or(false);
                        if in_holed_loop && (rc.count(b) == 0 || self.ignorably_cold(b)) {
                            trace!("  candidate #{}: dropping block_{} of an unused loop", rc.symref, b);
                            rc.blocks_live_on_entry.remove(&b);
                            rc.blocks_live_on_exit.remove(&b);
                        }
                        if rc.blocks_live_on_entry.contains(&b) {
                            curr_max_frequency = frequency;
                        }
                    }
                }
                if !has_unreferenced {
                    curr_max_frequency = frequency;
                }

                frequency *= 10;
                if frequency > max_frequency {
                    break;
                }
            }
        }
        max_frequency = curr_max_frequency;

        if call_to_remove_unused_loops {
            rc.loops_with_holes.clear();
        }

        rc.weight = 0;
        let mut loads_and_stores: i64 = 0;
        let mut number_of_blocks: i64 = 0;

        let live_on_entry: Vec<BlockNumber> = rc.blocks_live_on_entry.iter().copied().collect();
        for b in live_on_entry {
            let block_weight = self.structure_weight(b);
            let ignore = self.ignorably_cold(b);
            if !ignore && (block_weight as f64 >= max_frequency as f64 * freq_ratio || profiling) {
                number_of_blocks += 1;
            }
            if !ignore {
                loads_and_stores += i64::from(rc.count(b));
            }

            let block = cfg.block(b);
            for &pred in &block.predecessors {
                if pred == START {
                    continue;
                }
                if !self.policy.allow_global_register_across_branch(rc, self.method, pred) {
                    trace!("  candidate #{}: not across the branch out of block_{}", rc.symref, pred);
                    rc.blocks_live_on_entry.remove(&b);
                    break;
                }

                let other_successors: Vec<BlockNumber> = extended_successors_from(self.method, pred)
                    .into_iter()
                    .filter(|&s| s != b)
                    .collect();
                let live_on_exit_from_pred = other_successors.is_empty()
                    || other_successors.iter().any(|s| rc.blocks_live_on_entry.contains(s));

                if self.structure_weight(pred) > block_weight
                    && !live_on_exit_from_pred
                    && !rc.blocks_live_on_entry.contains(&pred)
                    && rc.count(cfg.start_of_extended_block(pred)) == 0
                    && rc.count(pred) == 0
                {
                    let pred_frequency = cfg.block(pred).frequency;
                    let keep = profiling && pred_frequency > 0 && 4 * block.frequency > pred_frequency;
                    if !keep {
                        trace!("  candidate #{}: block_{} entered from hotter block_{}", rc.symref, b, pred);
                        rc.blocks_live_on_entry.remove(&b);
                        break;
                    }
                }
            }

            if rc.blocks_live_on_entry.contains(&b) {
                let ext_start = cfg.start_of_extended_block(b);
                for &pred in &block.predecessors {
                    if pred == START {
                        continue;
                    }
                    if cfg.next_block(pred) == Some(b)
                        && cfg.start_of_extended_block(pred) == ext_start
                        && !self.branches_back_to(pred, ext_start)
                    {
                        continue;
                    }
                    rc.blocks_live_on_exit.insert(pred);
                    if !rc.blocks_live_on_entry.contains(&pred) && !self.ignorably_cold(pred) {
                        loads_and_stores += i64::from(rc.count(pred));
                    }
                }
            }
        }

        self.extend_live_ranges_for_live_on_exit(rc);

        for &b in &rc.blocks_live_on_exit {
            if !rc.blocks_live_on_entry.contains(&b) && rc.count(b) > 0 {
                loads_and_stores += self.structure_weight(b);
            }
        }

        let reduction = self.reduce_for_range_boundaries(rc, &mut loads_and_stores);

        rc.dont_assign_vm_thread_register = loads_and_stores - reduction <= 0;

        if number_of_blocks == 0 && loads_and_stores > 0 {
            number_of_blocks = 1;
        }
        if number_of_blocks == 0 {
            trace!("  candidate #{}: no blocks, weight 0", rc.symref);
            return;
        }

        if rc.needs_two_registers(self.policy) {
            if rc.high_word_zero {
                loads_and_stores -= 1;
            } else {
                loads_and_stores *= 2;
            }
        }
        if !profiling {
            loads_and_stores = loads_and_stores.min(STATIC_LOADS_AND_STORES_CAP);
        }

        if loads_and_stores > 0 {
            rc.weight = self.weight_function.weight(loads_and_stores, number_of_blocks);
        } else if !call_to_remove_unused_loops {
            trace!("  candidate #{}: negative weight, retrying without unused loops", rc.symref);
            rc.blocks_live_on_exit.clear();
            let original = rc.original_live_on_entry.clone();
            rc.blocks_live_on_entry.extend(original);
            self.process_live_on_entry_blocks(rc, true);
            return;
        }

        trace!(
            "  candidate #{} weight {} (loads and stores {}, blocks {})",
            rc.symref,
            rc.weight,
            loads_and_stores,
            number_of_blocks
        );
    }

    /// Drop live-on-entry blocks no predecessor can deliver the value to
    fn remove_unsupported_blocks(&self, rc: &mut RegisterCandidate, referencing: &BlockSet) {
        let cfg = &self.method.cfg;
        let mut changed = true;
        while changed {
            changed = false;
            let live_on_entry: Vec<BlockNumber> = rc.blocks_live_on_entry.iter().copied().collect();
            for b in live_on_entry {
                let supported = cfg.block(b).predecessors.iter().any(|&pred| {
                    let ext = cfg.start_of_extended_block(pred);
                    if rc.blocks_live_on_entry.contains(&ext) {
                        return true;
                    }
                    let mut current = ext;
                    loop {
                        if referencing.contains(&current) {
                            return true;
                        }
                        if current == pred {
                            return false;
                        }
                        match cfg.next_block(current) {
                            Some(next) if next != b && cfg.is_extension(next) => current = next,
                            _ => return false,
                        }
                    }
                });
                if !supported {
                    trace!("  candidate #{}: block_{} has no supporting predecessor", rc.symref, b);
                    rc.blocks_live_on_entry.remove(&b);
                    changed = true;
                }
            }
        }
    }

    /// Drop unreferenced blocks the value does not flow out of
    fn trim_unreferenced_tails(&self, rc: &mut RegisterCandidate) {
        let cfg = &self.method.cfg;
        let mut changed = true;
        while changed {
            changed = false;
            let live_on_entry: Vec<BlockNumber> = rc.blocks_live_on_entry.iter().copied().collect();
            for b in live_on_entry {
                if rc.count(b) != 0 {
                    continue;
                }
                let block = cfg.block(b);
                let mut live_on_exit = block.successors.iter().any(|s| rc.blocks_live_on_entry.contains(s));
                if !live_on_exit && block.is_cold {
                    live_on_exit = block.predecessors.iter().any(|&p| !cfg.block(p).is_cold);
                }
                if !live_on_exit {
                    trace!("  candidate #{}: block_{} not referenced and not live on exit", rc.symref, b);
                    rc.blocks_live_on_entry.remove(&b);
                    changed = true;
                }
            }
        }
    }

    /// Whether `block` ends in a branch to `target` or a multi-target jump
    fn branches_back_to(&self, block: BlockNumber, target: BlockNumber) -> bool {
        let Some(last) = last_control_node(self.method, block) else {
            return false;
        };
        if last.opcode.is_branch() {
            let cfg = &self.method.cfg;
            let fallthrough = cfg.next_block(block);
            cfg.block(block)
                .successors
                .iter()
                .any(|&s| Some(s) != fallthrough && s == target)
        } else {
            last.opcode.is_switch()
        }
    }

    /// Charge the candidate for the stores and loads needed where its range
    /// ends inside, or starts inside, a block
    fn reduce_for_range_boundaries(&self, rc: &mut RegisterCandidate, loads_and_stores: &mut i64) -> i64 {
        let cfg = &self.method.cfg;
        let mut reduction = 0;
        let mut seen = BlockSet::new();

        let live_on_entry: Vec<BlockNumber> = rc.blocks_live_on_entry.iter().copied().collect();
        for b in live_on_entry {
            let mut current = b;
            loop {
                if rc.count(current) > 0 {
                    let block = cfg.block(current);
                    let next = cfg.next_block(current);
                    let mut found_end_of_range = false;
                    for &succ in &block.successors {
                        if Some(succ) == next || succ == END || rc.blocks_live_on_entry.contains(&succ) {
                            continue;
                        }
                        if !block.is_catch_block()
                            && !block.is_cold
                            && !cfg.block(succ).is_cold
                            && !seen.contains(&current)
                            && self.symbol_is_live(rc, succ)
                        {
                            seen.insert(current);
                            let weight = self.structure_weight(current).min(self.structure_weight(succ));
                            if let Some(id) = block.loop_id {
                                rc.loops_with_holes.insert(id);
                            }
                            *loads_and_stores -= weight;
                            reduction += weight;
                            trace!(
                                "  candidate #{}: range ends at block_{} -> block_{}, reduced by {}",
                                rc.symref,
                                current,
                                succ,
                                weight
                            );
                            found_end_of_range = true;
                            break;
                        }
                    }
                    if found_end_of_range || current == END {
                        break;
                    }
                }
                match cfg.next_extension(current) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }

        seen.clear();
        let live_on_exit: Vec<BlockNumber> = rc.blocks_live_on_exit.iter().copied().collect();
        for b in live_on_exit {
            if b == START {
                continue;
            }
            let ext = cfg.start_of_extended_block(b);
            if rc.blocks_live_on_entry.contains(&ext) || rc.count(ext) != 0 || rc.count(b) != 0 {
                continue;
            }
            let block = cfg.block(b);
            let next = cfg.next_block(b);
            for &succ in &block.successors {
                if Some(succ) == next || !rc.blocks_live_on_entry.contains(&succ) {
                    continue;
                }
                if !block.is_catch_block() && !block.is_cold && !seen.contains(&ext) {
                    if let Some(id) = block.loop_id {
                        rc.loops_with_holes.insert(id);
                    }
                    seen.insert(ext);
                    let weight = self.structure_weight(b);
                    *loads_and_stores -= weight;
                    reduction += weight;
                    trace!(
                        "  candidate #{}: range starts at block_{} -> block_{}, reduced by {}",
                        rc.symref,
                        b,
                        succ,
                        weight
                    );
                    break;
                }
            }
        }
        reduction
    }

    /// Recompute live-on-exit bottom-up through the extended blocks feeding
    /// live-on-entry blocks; an extension that only passes the value through
    /// from a referencing layout predecessor becomes live on entry itself
    pub fn extend_live_ranges_for_live_on_exit(&self, rc: &mut RegisterCandidate) {
        let cfg = &self.method.cfg;
        let referencing = self.blocks_referencing(rc.symref);
        let mut visited = BlockSet::new();
        rc.blocks_live_on_exit.clear();

        let live_on_entry: Vec<BlockNumber> = rc.blocks_live_on_entry.iter().copied().collect();
        for b in live_on_entry {
            // An extension is only entered by falling through, and the value
            // has to arrive in the register from there
            if let Some(prev) = cfg.block(b).extension_of {
                rc.blocks_live_on_exit.insert(prev);
                continue;
            }
            for &pred in &cfg.block(b).predecessors {
                if pred == START || visited.contains(&pred) {
                    continue;
                }
                let chain = cfg.extended_block(pred);
                visited.extend(chain.iter().copied());

                for &current in chain.iter().rev() {
                    if cfg
                        .block(current)
                        .successors
                        .iter()
                        .any(|s| rc.blocks_live_on_entry.contains(s))
                    {
                        rc.blocks_live_on_exit.insert(current);
                    }
                    let prev_references = cfg
                        .block(current)
                        .extension_of
                        .map(|prev| referencing.contains(&prev))
                        .unwrap_or(false);
                    if !rc.blocks_live_on_entry.contains(&current)
                        && rc.blocks_live_on_exit.contains(&current)
                        && prev_references
                        && !referencing.contains(&current)
                    {
                        trace!(
                            "  candidate #{}: live on entry to block_{} from live on exit",
                            rc.symref,
                            current
                        );
                        rc.blocks_live_on_entry.insert(current);
                    }
                }
            }
        }
    }
}

/// The block's last tree, looking through a treetop anchor
pub fn last_control_node(method: &Method, block: BlockNumber) -> Option<&Node> {
    let last = method.last_real_node(block)?;
    if last.opcode.is_treetop() {
        last.first_child().map(|c| method.node(c))
    } else {
        Some(last)
    }
}

/// Successors leaving the fallthrough chain that starts at `block`
pub fn extended_successors_from(method: &Method, block: BlockNumber) -> BlockSet {
    let cfg = &method.cfg;
    let mut chain = vec![block];
    while let Some(next) = chain.last().and_then(|&b| cfg.next_extension(b)) {
        chain.push(next);
    }
    chain
        .iter()
        .flat_map(|&b| cfg.block(b).successors.iter().copied())
        .filter(|s| !chain.contains(s))
        .collect()
}
