use super::{fpr_count, gpr_count, vrf_count, NodeStates, SimulatedMemoryReference, PRESSURE_LIMIT};
use crate::candidate::RegisterCandidate;
use crate::target::RegisterClassPolicy;
use gra_common::{BlockNumber, DataType, NodeId, SymRefNumber};
use gra_ir::Node;
use std::collections::{BTreeMap, BTreeSet};

/// Most recent value and last load of a symbol in the simulated region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecentValues {
    pub most_recent_value: Option<NodeId>,
    pub last_load: Option<NodeId>,
}

/// Counters and bookkeeping for one simulation run over an extended block
#[derive(Debug)]
pub struct PressureState<'c> {
    pub current_block: BlockNumber,
    pub current_treetop: Option<NodeId>,

    /// Candidate being considered, if any
    pub candidate: Option<&'c RegisterCandidate>,
    pub assigned: Vec<&'c RegisterCandidate>,
    pub assigned_on_entry: BTreeSet<SymRefNumber>,
    pub assigned_on_exit: BTreeSet<SymRefNumber>,

    pub gpr_pressure: i32,
    pub fpr_pressure: i32,
    pub vrf_pressure: i32,
    pub gpr_limit: i32,
    pub fpr_limit: i32,
    pub vrf_limit: i32,

    pub candidate_is_live_on_entry: bool,
    /// The candidate's register is occupied from the block entry on
    pub pressure_risk_from_start: bool,
    /// Values kept alive until a block end because of the candidate
    pub pressure_risk_until_end: u32,
    pub num_live_candidate_loads: i32,

    pub memref_nest_depth: u32,
    pub(crate) current_memref: Option<usize>,
    pub(crate) memrefs: Vec<SimulatedMemoryReference>,

    pub nodes: NodeStates,
    pub(crate) recent: BTreeMap<SymRefNumber, RecentValues>,
}

impl<'c> PressureState<'c> {
    pub fn new(block: BlockNumber, assigned: Vec<&'c RegisterCandidate>, limits: [i32; 3]) -> Self {
        Self {
            current_block: block,
            current_treetop: None,
            candidate: None,
            assigned,
            assigned_on_entry: BTreeSet::new(),
            assigned_on_exit: BTreeSet::new(),
            gpr_pressure: 0,
            fpr_pressure: 0,
            vrf_pressure: 0,
            gpr_limit: limits[0],
            fpr_limit: limits[1],
            vrf_limit: limits[2],
            candidate_is_live_on_entry: false,
            pressure_risk_from_start: false,
            pressure_risk_until_end: 0,
            num_live_candidate_loads: 0,
            memref_nest_depth: 0,
            current_memref: None,
            memrefs: Vec::new(),
            nodes: NodeStates::new(),
            recent: BTreeMap::new(),
        }
    }

    /// Consider `candidate`, whose register is busy from the start when it
    /// is live on entry
    pub fn with_candidate(mut self, candidate: &'c RegisterCandidate, live_on_entry: bool) -> Self {
        self.candidate = Some(candidate);
        self.candidate_is_live_on_entry = live_on_entry;
        self.pressure_risk_from_start = live_on_entry;
        self
    }

    pub fn must_abort(&self) -> bool {
        let limit = PRESSURE_LIMIT as i32;
        self.gpr_pressure >= limit || self.fpr_pressure >= limit || self.vrf_pressure >= limit
    }

    pub fn pressure_is_at_risk(&self) -> bool {
        self.pressure_risk_from_start || self.pressure_risk_until_end > 0
    }

    pub fn candidate_is_live_after_gra(&self) -> bool {
        self.pressure_is_at_risk() || self.num_live_candidate_loads > 0
    }

    /// Count a value of `data_type` as occupying registers
    pub fn update_register_pressure(&mut self, policy: &dyn RegisterClassPolicy, data_type: DataType) {
        self.gpr_pressure += gpr_count(policy, data_type) as i32;
        self.fpr_pressure += fpr_count(data_type) as i32;
        self.vrf_pressure += vrf_count(data_type) as i32;
    }

    pub fn candidate_symref(&self) -> Option<SymRefNumber> {
        self.candidate.map(|c| c.symref)
    }

    /// The candidate or an assigned candidate for `symref`
    pub fn find_candidate(&self, symref: SymRefNumber) -> Option<&'c RegisterCandidate> {
        if let Some(candidate) = self.candidate.filter(|c| c.symref == symref) {
            return Some(candidate);
        }
        self.assigned.iter().copied().find(|c| c.symref == symref)
    }

    pub fn is_candidate_load(&self, node: &Node) -> bool {
        match self.candidate_symref() {
            Some(symref) => node.is_load_of(symref),
            None => false,
        }
    }

    pub fn is_load_already_assigned_on_entry(&self, node: &Node) -> bool {
        node.opcode.is_load_direct()
            && node
                .symref
                .map(|s| self.assigned_on_entry.contains(&s))
                .unwrap_or(false)
    }

    pub fn most_recent_value(&self, symref: SymRefNumber) -> Option<NodeId> {
        self.recent.get(&symref).and_then(|r| r.most_recent_value)
    }

    pub fn last_load(&self, symref: SymRefNumber) -> Option<NodeId> {
        self.recent.get(&symref).and_then(|r| r.last_load)
    }

    pub fn recent_values(&self, symref: SymRefNumber) -> RecentValues {
        self.recent.get(&symref).copied().unwrap_or_default()
    }

    pub(crate) fn push_memref(&mut self) -> usize {
        self.memrefs.push(SimulatedMemoryReference::default());
        self.memrefs.len() - 1
    }

    pub(crate) fn pop_memref(&mut self) {
        self.memrefs.pop();
    }

    pub(crate) fn memref_add(&mut self, index: usize) {
        let mut gprs = self.gpr_pressure;
        if let Some(memref) = self.memrefs.get_mut(index) {
            memref.add(&mut gprs);
        }
        self.gpr_pressure = gprs;
    }

    pub(crate) fn memref_release(&mut self, index: usize) {
        let mut gprs = self.gpr_pressure;
        if let Some(memref) = self.memrefs.get_mut(index) {
            memref.release(&mut gprs);
        }
        self.gpr_pressure = gprs;
    }
}
