//! Register candidates and the registry that owns them
//!
//! Candidates live in an index-stable arena and are addressed by
//! `CandidateId`. The registry also owns the per-register usage sets, the
//! per-block register tables handed to instruction selection and the lazily
//! computed overlap coordinates.

use crate::target::RegisterClassPolicy;
use gra_common::{
    BlockNumber, BlockSet, DataType, GlobalRegisterNumber, LoopId, NodeId, RegisterKind, SymRefNumber,
};
use gra_ir::{Method, END, START};
use log::trace;
use std::collections::{BTreeMap, BTreeSet};

pub type CandidateId = usize;

/// One variable considered for a global register
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterCandidate {
    pub symref: SymRefNumber,
    pub data_type: DataType,
    pub low_register: Option<GlobalRegisterNumber>,
    pub high_register: Option<GlobalRegisterNumber>,
    pub blocks_live_on_entry: BlockSet,
    pub blocks_live_on_exit: BlockSet,
    pub original_live_on_entry: BlockSet,
    /// Loads and stores per block; a block is in the candidate's range map
    /// when it has an entry here, even with a zero count
    pub block_counts: BTreeMap<BlockNumber, u32>,
    /// Blocks outside a loop the candidate is live through that the loop exits to
    pub loop_exit_blocks: BlockSet,
    pub weight: u32,
    pub extended_live_range: bool,
    pub is_8bit_global_gpr: bool,
    pub dont_assign_vm_thread_register: bool,
    /// 64-bit value whose upper word is always zero
    pub high_word_zero: bool,
    /// Live everywhere from method entry
    pub all_blocks: bool,
    pub live_across_exception_edge: bool,
    /// Retries left before the candidate is dropped
    pub reprioritized: u8,
    /// Loops the live range has a hole in
    pub loops_with_holes: BTreeSet<LoopId>,
}

impl RegisterCandidate {
    pub fn new(symref: SymRefNumber, data_type: DataType) -> Self {
        Self {
            symref,
            data_type,
            low_register: None,
            high_register: None,
            blocks_live_on_entry: BlockSet::new(),
            blocks_live_on_exit: BlockSet::new(),
            original_live_on_entry: BlockSet::new(),
            block_counts: BTreeMap::new(),
            loop_exit_blocks: BlockSet::new(),
            weight: 0,
            extended_live_range: false,
            is_8bit_global_gpr: false,
            dont_assign_vm_thread_register: false,
            high_word_zero: false,
            all_blocks: false,
            live_across_exception_edge: false,
            reprioritized: 0,
            loops_with_holes: BTreeSet::new(),
        }
    }

    /// Record `count` more loads and stores in `block`
    pub fn add_block(&mut self, block: BlockNumber, count: u32) -> &mut Self {
        *self.block_counts.entry(block).or_insert(0) += count;
        self
    }

    pub fn count(&self, block: BlockNumber) -> u32 {
        self.block_counts.get(&block).copied().unwrap_or(0)
    }

    pub fn set_count(&mut self, block: BlockNumber, count: u32) {
        self.block_counts.insert(block, count);
    }

    pub fn register_kind(&self) -> RegisterKind {
        self.data_type.register_kind()
    }

    /// A 64-bit integer on a 32-bit target, or an aggregate wider than a register
    pub fn needs_two_registers(&self, policy: &dyn RegisterClassPolicy) -> bool {
        match self.data_type {
            DataType::Aggregate { size } => (policy.is_32bit() && size > 4) || size > 8,
            DataType::Int64 => policy.is_32bit(),
            _ => false,
        }
    }

    pub fn can_be_reprioritized(&self) -> bool {
        self.reprioritized > 0
    }

    pub fn set_reprioritized(&mut self) {
        self.reprioritized = self.reprioritized.saturating_sub(1);
    }

    pub fn is_assigned(&self) -> bool {
        self.low_register.is_some()
    }

    /// Registers the candidate occupies
    pub fn registers(&self) -> impl Iterator<Item = GlobalRegisterNumber> + '_ {
        self.low_register.into_iter().chain(self.high_register)
    }

    pub fn live_on_entry_or_exit(&self) -> BlockSet {
        self.blocks_live_on_entry
            .union(&self.blocks_live_on_exit)
            .copied()
            .collect()
    }
}

/// Which candidate a register carries into and out of each block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterTables {
    on_entry: BTreeMap<(BlockNumber, GlobalRegisterNumber), CandidateId>,
    on_exit: BTreeMap<(BlockNumber, GlobalRegisterNumber), CandidateId>,
}

impl RegisterTables {
    pub fn on_entry(&self, block: BlockNumber, reg: GlobalRegisterNumber) -> Option<CandidateId> {
        self.on_entry.get(&(block, reg)).copied()
    }

    pub fn on_exit(&self, block: BlockNumber, reg: GlobalRegisterNumber) -> Option<CandidateId> {
        self.on_exit.get(&(block, reg)).copied()
    }

    pub fn set_on_entry(&mut self, block: BlockNumber, reg: GlobalRegisterNumber, id: CandidateId) {
        self.on_entry.insert((block, reg), id);
    }

    pub fn set_on_exit(&mut self, block: BlockNumber, reg: GlobalRegisterNumber, id: CandidateId) {
        self.on_exit.insert((block, reg), id);
    }

    /// Every (block, register) a candidate is live into
    pub fn entries(&self) -> impl Iterator<Item = (BlockNumber, GlobalRegisterNumber, CandidateId)> + '_ {
        self.on_entry.iter().map(|(&(b, r), &c)| (b, r, c))
    }

    pub fn exits(&self) -> impl Iterator<Item = (BlockNumber, GlobalRegisterNumber, CandidateId)> + '_ {
        self.on_exit.iter().map(|(&(b, r), &c)| (b, r, c))
    }
}

/// First and last reference position of a symbol within an extended block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinates {
    pub first: u32,
    pub last: u32,
}

/// Owner of all candidates of one compilation
#[derive(Debug, Default)]
pub struct CandidateRegistry {
    candidates: Vec<RegisterCandidate>,
    by_symref: BTreeMap<SymRefNumber, CandidateId>,
    assigned: Vec<CandidateId>,
    /// Per register: blocks where an assigned candidate holds it on entry
    pub entry_usage: Vec<BlockSet>,
    /// Per register: blocks where an assigned candidate holds it on exit
    pub exit_usage: Vec<BlockSet>,
    pub tables: RegisterTables,
    overlaps: BTreeMap<BlockNumber, BTreeMap<SymRefNumber, Coordinates>>,
}

impl CandidateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find every auto and parameter referenced more than once and
    /// populate its per-block counts
    pub fn discover(method: &Method) -> Self {
        let mut registry = Self::new();
        for (symref, symbol) in method.symbols.iter().enumerate() {
            if !symbol.is_auto_or_parm() {
                continue;
            }
            let mut counts: BTreeMap<BlockNumber, u32> = BTreeMap::new();
            for &b in &method.cfg.layout {
                let mut count = 0;
                method.for_each_node_post_order(&method.cfg.block(b).treetops, |_, node| {
                    if node.is_load_of(symref) || node.is_store_of(symref) {
                        count += 1;
                    }
                });
                if count > 0 {
                    counts.insert(b, count);
                }
            }
            if counts.values().sum::<u32>() < 2 {
                continue;
            }

            let mut candidate = RegisterCandidate::new(symref, symbol.data_type);
            let live_in = live_on_entry_blocks(method, symref);
            for &b in &live_in {
                candidate.add_block(b, 0);
            }
            for (&b, &count) in &counts {
                candidate.add_block(b, count);
            }

            for lp in &method.cfg.loops {
                if lp.blocks.iter().any(|b| counts.contains_key(b)) {
                    for exit in method.cfg.loop_exit_targets(lp.id) {
                        if exit != END && candidate.block_counts.contains_key(&exit) {
                            candidate.loop_exit_blocks.insert(exit);
                        }
                    }
                }
            }

            if symbol.is_parm() {
                if let Some(entry) = method.cfg.entry_block() {
                    if live_in.contains(&entry) {
                        candidate.all_blocks = true;
                        for &b in &method.cfg.layout {
                            candidate.add_block(b, 0);
                        }
                    }
                }
            }
            candidate.high_word_zero = is_high_word_zero(method, symref);

            trace!(
                "  candidate #{} ({}) referenced in {} blocks, live in {}",
                symref,
                symbol.name,
                counts.len(),
                candidate.block_counts.len()
            );
            registry.add(candidate);
        }
        registry
    }

    /// Add a candidate, replacing nothing; returns the existing id when the
    /// symbol already has one
    pub fn add(&mut self, candidate: RegisterCandidate) -> CandidateId {
        if let Some(&id) = self.by_symref.get(&candidate.symref) {
            return id;
        }
        let id = self.candidates.len();
        self.by_symref.insert(candidate.symref, id);
        self.candidates.push(candidate);
        id
    }

    pub fn get(&self, id: CandidateId) -> &RegisterCandidate {
        &self.candidates[id]
    }

    pub fn get_mut(&mut self, id: CandidateId) -> &mut RegisterCandidate {
        &mut self.candidates[id]
    }

    pub fn find(&self, symref: SymRefNumber) -> Option<CandidateId> {
        self.by_symref.get(&symref).copied()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn ids(&self) -> std::ops::Range<CandidateId> {
        0..self.candidates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CandidateId, &RegisterCandidate)> {
        self.candidates.iter().enumerate()
    }

    /// Candidates that received a register, in assignment order
    pub fn assigned(&self) -> &[CandidateId] {
        &self.assigned
    }

    /// Assigned candidate for a symbol, if any
    pub fn candidate_for_symref(&self, symref: SymRefNumber) -> Option<CandidateId> {
        self.find(symref).filter(|&id| self.candidates[id].is_assigned())
    }

    pub fn mark_assigned(&mut self, id: CandidateId) {
        if !self.assigned.contains(&id) {
            self.assigned.push(id);
        }
    }

    /// Size the usage sets for `registers` global registers
    pub fn init_usage(&mut self, registers: usize) {
        self.entry_usage = vec![BlockSet::new(); registers];
        self.exit_usage = vec![BlockSet::new(); registers];
    }

    /// Where `symref` is first and last referenced in the extended block
    /// starting at `block`
    pub fn coordinates(&mut self, method: &Method, block: BlockNumber, symref: SymRefNumber) -> Option<Coordinates> {
        self.overlaps
            .entry(block)
            .or_insert_with(|| compute_overlaps(method, block))
            .get(&symref)
            .copied()
    }
}

/// Number every symbol-referencing node from `block` to the end of its
/// extended block in evaluation order
fn compute_overlaps(method: &Method, block: BlockNumber) -> BTreeMap<SymRefNumber, Coordinates> {
    let mut overlaps = BTreeMap::new();
    let mut seqno = 0;
    let mut roots = Vec::new();
    let mut current = Some(block);
    while let Some(b) = current {
        roots.extend(method.cfg.block(b).treetops.iter().copied());
        current = method.cfg.next_extension(b);
    }
    method.for_each_node_post_order(&roots, |_, node| {
        if !node.opcode.has_symbol_reference() {
            return;
        }
        let Some(symref) = node.symref else {
            return;
        };
        seqno += 1;
        overlaps
            .entry(symref)
            .and_modify(|c: &mut Coordinates| c.last = seqno)
            .or_insert(Coordinates {
                first: seqno,
                last: seqno,
            });
    });
    overlaps
}

/// Blocks on entry to which `symref` holds a value that is read later
fn live_on_entry_blocks(method: &Method, symref: SymRefNumber) -> BlockSet {
    let cfg = &method.cfg;
    let mut exposed = BlockSet::new();
    let mut killed = BlockSet::new();
    for &b in &cfg.layout {
        let mut defined = false;
        let mut used_first = false;
        method.for_each_node_post_order(&cfg.block(b).treetops, |_, node| {
            if node.is_load_of(symref) && !defined {
                used_first = true;
            } else if node.is_store_of(symref) {
                defined = true;
            }
        });
        if used_first {
            exposed.insert(b);
        }
        if defined {
            killed.insert(b);
        }
    }

    let mut live_in = exposed.clone();
    let mut changed = true;
    while changed {
        changed = false;
        for &b in cfg.layout.iter().rev() {
            if live_in.contains(&b) || killed.contains(&b) {
                continue;
            }
            let live_out = cfg
                .block(b)
                .successors
                .iter()
                .any(|s| *s != START && *s != END && live_in.contains(s));
            if live_out {
                live_in.insert(b);
                changed = true;
            }
        }
    }
    live_in
}

/// A 64-bit auto whose every store writes a constant with a zero upper word
fn is_high_word_zero(method: &Method, symref: SymRefNumber) -> bool {
    let symbol = method.symbol(symref);
    if !symbol.is_auto() || symbol.data_type != DataType::Int64 {
        return false;
    }
    let mut all_zero = true;
    let roots: Vec<NodeId> = method.cfg.blocks_in_layout().flat_map(|b| b.treetops.iter().copied()).collect();
    method.for_each_node_post_order(&roots, |_, node| {
        if node.is_store_of(symref) {
            let value = node.first_child().map(|c| method.node(c));
            let zero_high = value
                .and_then(|v| if v.opcode.is_load_const() { v.constant } else { None })
                .map(|c| (c as u64) >> 32 == 0)
                .unwrap_or(false);
            all_zero &= zero_high;
        }
    });
    all_zero
}
