//! Expression nodes
//!
//! Nodes live in the method's arena and are referred to by `NodeId`. A node
//! reachable from more than one parent is "commoned"; its reference count is
//! the number of parent slots that point at it.

use crate::Opcode;
use gra_common::{DataType, NodeId, SymRefNumber};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub opcode: Opcode,
    pub data_type: DataType,
    #[serde(default)]
    pub children: Vec<NodeId>,
    /// Number of parent references; roots have zero
    #[serde(default)]
    pub reference_count: u32,
    #[serde(default)]
    pub symref: Option<SymRefNumber>,
    #[serde(default)]
    pub constant: Option<i64>,
    /// Symbol reference still needs runtime resolution
    #[serde(default)]
    pub unresolved: bool,
    /// Call nodes only: this call is implemented without a real call
    /// sequence and so does not kill volatile registers
    #[serde(default)]
    pub inlined_call: bool,
}

impl Node {
    pub fn new(opcode: Opcode, data_type: DataType) -> Self {
        Self {
            opcode,
            data_type,
            children: Vec::new(),
            reference_count: 0,
            symref: None,
            constant: None,
            unresolved: false,
            inlined_call: false,
        }
    }

    pub fn with_children(mut self, children: Vec<NodeId>) -> Self {
        self.children = children;
        self
    }

    pub fn with_symref(mut self, symref: SymRefNumber) -> Self {
        self.symref = Some(symref);
        self
    }

    pub fn with_constant(mut self, value: i64) -> Self {
        self.constant = Some(value);
        self
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.children.first().copied()
    }

    pub fn second_child(&self) -> Option<NodeId> {
        self.children.get(1).copied()
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// Direct load of a symbol
    pub fn is_load_of(&self, symref: SymRefNumber) -> bool {
        self.opcode.is_load_direct() && self.symref == Some(symref)
    }

    /// Direct store to a symbol
    pub fn is_store_of(&self, symref: SymRefNumber) -> bool {
        self.opcode.is_store_direct() && self.symref == Some(symref)
    }

    /// A value-producing call that is evaluated with a real call sequence
    pub fn is_real_call(&self) -> bool {
        self.opcode.is_call() && !self.inlined_call
    }
}
