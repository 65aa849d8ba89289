use gra_common::{BlockNumber, NodeId};
use std::collections::BTreeMap;

/// Simulated evaluation state of one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeState {
    /// Parent references not yet consumed
    pub future_use_count: u32,
    /// Kept in its register until the end of this block
    pub keep_live_until: Option<BlockNumber>,
    pub is_causing_pressure_risk_until_end: bool,
    pub live_gprs: u32,
    pub live_fprs: u32,
    pub live_vrfs: u32,
    /// A candidate load that would be live even without the global register
    pub live_candidate_load: bool,
    pub child_refcounts_decremented: bool,
    pub will_be_rematerialized: bool,
    /// Tree height, saturating at `u8::MAX`
    pub height: u8,
}

impl NodeState {
    pub fn has_register(&self) -> bool {
        self.live_gprs + self.live_fprs + self.live_vrfs > 0
    }

    pub fn set_height(&mut self, height: u32) {
        self.height = u8::try_from(height).unwrap_or(u8::MAX);
    }
}

/// Side table of node states for one simulation run
#[derive(Debug, Clone, Default)]
pub struct NodeStates {
    states: BTreeMap<NodeId, NodeState>,
}

impl NodeStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self, node: NodeId) -> bool {
        self.states.contains_key(&node)
    }

    pub fn insert(&mut self, node: NodeId, state: NodeState) {
        self.states.insert(node, state);
    }

    pub fn get(&self, node: NodeId) -> Option<&NodeState> {
        self.states.get(&node)
    }

    /// State of an initialized node; an unknown node reads as fresh
    pub fn state(&self, node: NodeId) -> NodeState {
        self.states.get(&node).cloned().unwrap_or_default()
    }

    pub fn state_mut(&mut self, node: NodeId) -> &mut NodeState {
        self.states.entry(node).or_default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
