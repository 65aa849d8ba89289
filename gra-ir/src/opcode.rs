//! Expression tree opcodes
//!
//! The opcode set is deliberately small: just enough to express the shapes the
//! allocator pattern-matches on (direct and indirect memory access, address
//! arithmetic, calls and other GC points, branches).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    /// Load of a symbol's value
    Load,
    /// Store to a symbol; child 0 is the value
    Store,
    /// Load through an address; child 0 is the address
    LoadIndirect,
    /// Store through an address; child 0 is the address, child 1 the value
    StoreIndirect,
    /// Address of a symbol
    LoadAddr,
    Const,
    Add,
    Sub,
    Mul,
    Shl,
    /// Array element address: base plus scaled index
    ArrayRef,
    Compare,
    Call,
    New,
    MonitorEnter,
    MonitorExit,
    AsyncCheck,
    NullCheck,
    ResolveCheck,
    /// Anchors a value-producing expression as a tree root
    TreeTop,
    If,
    Goto,
    Switch,
    Return,
}

impl Opcode {
    pub fn is_load_direct(&self) -> bool {
        matches!(self, Opcode::Load)
    }

    pub fn is_store_direct(&self) -> bool {
        matches!(self, Opcode::Store)
    }

    pub fn is_load_indirect(&self) -> bool {
        matches!(self, Opcode::LoadIndirect)
    }

    pub fn is_store_indirect(&self) -> bool {
        matches!(self, Opcode::StoreIndirect)
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, Opcode::LoadIndirect | Opcode::StoreIndirect)
    }

    pub fn is_load_addr(&self) -> bool {
        matches!(self, Opcode::LoadAddr)
    }

    pub fn is_load_const(&self) -> bool {
        matches!(self, Opcode::Const)
    }

    pub fn is_add(&self) -> bool {
        matches!(self, Opcode::Add)
    }

    pub fn is_sub(&self) -> bool {
        matches!(self, Opcode::Sub)
    }

    pub fn is_mul(&self) -> bool {
        matches!(self, Opcode::Mul)
    }

    pub fn is_left_shift(&self) -> bool {
        matches!(self, Opcode::Shl)
    }

    pub fn is_array_ref(&self) -> bool {
        matches!(self, Opcode::ArrayRef)
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Opcode::Call)
    }

    /// Operations the collector may observe: calls, allocation, monitors and
    /// async checks
    pub fn can_gc(&self) -> bool {
        matches!(
            self,
            Opcode::Call | Opcode::New | Opcode::MonitorEnter | Opcode::MonitorExit | Opcode::AsyncCheck
        )
    }

    /// Implicit exception checks that are also GC points
    pub fn is_check(&self) -> bool {
        matches!(self, Opcode::NullCheck | Opcode::ResolveCheck)
    }

    pub fn is_treetop(&self) -> bool {
        matches!(self, Opcode::TreeTop)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Opcode::If | Opcode::Goto)
    }

    /// Multi-target branch
    pub fn is_switch(&self) -> bool {
        matches!(self, Opcode::Switch)
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Opcode::Return)
    }

    /// Opcodes that only ever appear as tree roots and produce no value
    pub fn is_root_only(&self) -> bool {
        matches!(
            self,
            Opcode::Store
                | Opcode::StoreIndirect
                | Opcode::TreeTop
                | Opcode::NullCheck
                | Opcode::ResolveCheck
                | Opcode::If
                | Opcode::Goto
                | Opcode::Switch
                | Opcode::Return
                | Opcode::MonitorEnter
                | Opcode::MonitorExit
                | Opcode::AsyncCheck
        )
    }

    /// Whether this opcode carries a symbol reference
    pub fn has_symbol_reference(&self) -> bool {
        matches!(
            self,
            Opcode::Load
                | Opcode::Store
                | Opcode::LoadIndirect
                | Opcode::StoreIndirect
                | Opcode::LoadAddr
                | Opcode::Call
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::LoadIndirect => "loadi",
            Opcode::StoreIndirect => "storei",
            Opcode::LoadAddr => "loadaddr",
            Opcode::Const => "const",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Shl => "shl",
            Opcode::ArrayRef => "aref",
            Opcode::Compare => "cmp",
            Opcode::Call => "call",
            Opcode::New => "new",
            Opcode::MonitorEnter => "monent",
            Opcode::MonitorExit => "monexit",
            Opcode::AsyncCheck => "asynccheck",
            Opcode::NullCheck => "nullchk",
            Opcode::ResolveCheck => "resolvechk",
            Opcode::TreeTop => "treetop",
            Opcode::If => "if",
            Opcode::Goto => "goto",
            Opcode::Switch => "switch",
            Opcode::Return => "return",
        };
        write!(f, "{}", name)
    }
}
