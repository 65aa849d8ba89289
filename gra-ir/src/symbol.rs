//! Symbols and the method symbol table

use gra_common::{DataType, SymRefNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Method-local automatic
    Auto,
    /// Incoming parameter; `linkage_index` is its argument register position
    Parm { linkage_index: Option<u32> },
    Static,
    /// Compiler-created stack temporary
    SpillTemp,
    MethodMetaData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub data_type: DataType,
    /// Address-typed value the collector must not trace
    #[serde(default)]
    pub not_collected: bool,
    #[serde(default)]
    pub holds_monitored_object: bool,
    /// Symbols that may be read or written through this one
    #[serde(default)]
    pub use_def_aliases: BTreeSet<SymRefNumber>,
    /// Symbols that may be read through this one (e.g. from a catch block)
    #[serde(default)]
    pub use_only_aliases: BTreeSet<SymRefNumber>,
    /// Bit index in the per-block live-locals sets
    #[serde(default)]
    pub live_local_index: Option<usize>,
    /// Derived pointer into an array; the array base symbol it pins
    #[serde(default)]
    pub pinning_array: Option<SymRefNumber>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            kind,
            data_type,
            not_collected: false,
            holds_monitored_object: false,
            use_def_aliases: BTreeSet::new(),
            use_only_aliases: BTreeSet::new(),
            live_local_index: None,
            pinning_array: None,
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self.kind, SymbolKind::Auto)
    }

    pub fn is_parm(&self) -> bool {
        matches!(self.kind, SymbolKind::Parm { .. })
    }

    pub fn is_auto_or_parm(&self) -> bool {
        self.is_auto() || self.is_parm()
    }

    pub fn is_spill_temp(&self) -> bool {
        matches!(self.kind, SymbolKind::SpillTemp)
    }

    pub fn is_method_meta_data(&self) -> bool {
        matches!(self.kind, SymbolKind::MethodMetaData)
    }

    pub fn linkage_register_index(&self) -> Option<u32> {
        match self.kind {
            SymbolKind::Parm { linkage_index } => linkage_index,
            _ => None,
        }
    }

    /// An address the collector must see and may move
    pub fn is_collected_reference(&self) -> bool {
        self.data_type.is_address() && !self.not_collected
    }

    pub fn is_internal_pointer(&self) -> bool {
        self.pinning_array.is_some()
    }
}
