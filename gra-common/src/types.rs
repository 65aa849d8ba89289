//! Common identifiers and data types for the allocator crates

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Block number within a method's CFG
pub type BlockNumber = usize;

/// Index of a symbol reference in the method's symbol table
pub type SymRefNumber = usize;

/// Index of an expression node in the method's node arena
pub type NodeId = usize;

/// Target-independent global register number
pub type GlobalRegisterNumber = usize;

/// Loop (structure) identifier
pub type LoopId = usize;

/// Ordered set of block numbers
pub type BlockSet = BTreeSet<BlockNumber>;

/// Ordered set of global register numbers; iteration order is the
/// platform's preference order
pub type RegisterSet = BTreeSet<GlobalRegisterNumber>;

/// Data types seen by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    NoType,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Address,
    Vector128,
    Aggregate { size: u32 },
}

impl DataType {
    /// Size in bytes of a value of this type
    pub fn size(&self, address_size: u32) -> u32 {
        match self {
            DataType::NoType => 0,
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float => 4,
            DataType::Int64 | DataType::Double => 8,
            DataType::Address => address_size,
            DataType::Vector128 => 16,
            DataType::Aggregate { size } => *size,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    pub fn is_address(&self) -> bool {
        matches!(self, DataType::Address)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, DataType::Vector128)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, DataType::Aggregate { .. })
    }

    /// The register class a value of this type lives in
    pub fn register_kind(&self) -> RegisterKind {
        match self {
            DataType::Float | DataType::Double => RegisterKind::Fpr,
            DataType::Vector128 => RegisterKind::Vrf,
            _ => RegisterKind::Gpr,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::NoType => write!(f, "notype"),
            DataType::Int8 => write!(f, "i8"),
            DataType::Int16 => write!(f, "i16"),
            DataType::Int32 => write!(f, "i32"),
            DataType::Int64 => write!(f, "i64"),
            DataType::Float => write!(f, "float"),
            DataType::Double => write!(f, "double"),
            DataType::Address => write!(f, "address"),
            DataType::Vector128 => write!(f, "v128"),
            DataType::Aggregate { size } => write!(f, "aggregate[{}]", size),
        }
    }
}

/// Physical register classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegisterKind {
    Gpr,
    Fpr,
    Vrf,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::Gpr => write!(f, "GPR"),
            RegisterKind::Fpr => write!(f, "FPR"),
            RegisterKind::Vrf => write!(f, "VRF"),
        }
    }
}

/// Optimization level of the method being compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hotness {
    NoOpt,
    Cold,
    Warm,
    Hot,
    VeryHot,
    Scorching,
}

impl Default for Hotness {
    fn default() -> Self {
        Hotness::Warm
    }
}

impl fmt::Display for Hotness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hotness::NoOpt => write!(f, "noOpt"),
            Hotness::Cold => write!(f, "cold"),
            Hotness::Warm => write!(f, "warm"),
            Hotness::Hot => write!(f, "hot"),
            Hotness::VeryHot => write!(f, "veryHot"),
            Hotness::Scorching => write!(f, "scorching"),
        }
    }
}
