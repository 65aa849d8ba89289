//! Target register descriptions and per-architecture allocation policy
//!
//! Global register numbers form one flat space: GPRs first, then FPRs, then
//! vector registers. Within a class, lower numbers are more desirable; the
//! pickers rely on that ordering.
//!
//! ## Architecture
//!
//! - `RegisterFile` - register classes, names and special registers
//! - `Linkage` - argument, preserved and volatile registers of the calling
//!   convention the method's calls use
//! - `RegisterClassPolicy` - the capability interface the allocator consults;
//!   one implementation per architecture (`X86Policy`, `PowerPolicy`) plus a
//!   configurable `GenericPolicy`

use crate::candidate::RegisterCandidate;
use crate::pressure::SpillKind;
use gra_common::{BlockNumber, BlockSet, DataType, GlobalRegisterNumber, RegisterKind, RegisterSet, SymRefNumber};
use gra_ir::{Method, Node};
use std::ops::Range;

pub use self::power::PowerPolicy;
pub use self::x86::X86Policy;

mod power;
mod x86;

#[cfg(test)]
mod tests;

/// At or below this many assignable GPRs, live ranges are trimmed harder
const SCARCE_GPR_THRESHOLD: usize = 13;

/// Register classes of a target
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterFile {
    pub gprs: Range<GlobalRegisterNumber>,
    pub fprs: Range<GlobalRegisterNumber>,
    pub vrfs: Range<GlobalRegisterNumber>,
    /// Last GPR with an addressable low byte, if the target restricts them
    pub last_8bit_gpr: Option<GlobalRegisterNumber>,
    /// Register holding the runtime thread context, if it is allocatable
    pub vm_thread: Option<GlobalRegisterNumber>,
    pub names: Vec<String>,
}

impl RegisterFile {
    /// Lay out `gprs`, `fprs` and `vrfs` names consecutively
    pub fn new(gprs: &[&str], fprs: &[&str], vrfs: &[&str]) -> Self {
        let gpr_end = gprs.len();
        let fpr_end = gpr_end + fprs.len();
        let vrf_end = fpr_end + vrfs.len();
        Self {
            gprs: 0..gpr_end,
            fprs: gpr_end..fpr_end,
            vrfs: fpr_end..vrf_end,
            last_8bit_gpr: None,
            vm_thread: None,
            names: gprs
                .iter()
                .chain(fprs.iter())
                .chain(vrfs.iter())
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn range(&self, kind: RegisterKind) -> Range<GlobalRegisterNumber> {
        match kind {
            RegisterKind::Gpr => self.gprs.clone(),
            RegisterKind::Fpr => self.fprs.clone(),
            RegisterKind::Vrf => self.vrfs.clone(),
        }
    }

    pub fn count(&self, kind: RegisterKind) -> usize {
        self.range(kind).len()
    }

    pub fn kind_of(&self, reg: GlobalRegisterNumber) -> Option<RegisterKind> {
        [RegisterKind::Gpr, RegisterKind::Fpr, RegisterKind::Vrf]
            .into_iter()
            .find(|&k| self.range(k).contains(&reg))
    }

    pub fn total(&self) -> usize {
        self.names.len()
    }

    pub fn name(&self, reg: GlobalRegisterNumber) -> &str {
        self.names.get(reg).map(String::as_str).unwrap_or("?")
    }

    pub fn find(&self, name: &str) -> Option<GlobalRegisterNumber> {
        self.names.iter().position(|n| n == name)
    }

    pub fn set_of(&self, kind: RegisterKind) -> RegisterSet {
        self.range(kind).collect()
    }

    pub fn is_8bit_capable(&self, reg: GlobalRegisterNumber) -> bool {
        match self.last_8bit_gpr {
            Some(last) => reg <= last,
            None => self.gprs.contains(&reg),
        }
    }
}

/// Calling-convention registers
#[derive(Debug, Clone, PartialEq)]
pub struct Linkage {
    pub gpr_arguments: Vec<GlobalRegisterNumber>,
    pub fpr_arguments: Vec<GlobalRegisterNumber>,
    pub vrf_arguments: Vec<GlobalRegisterNumber>,
    /// Registers a callee preserves, when the convention says so
    pub preserved: Option<RegisterSet>,
    /// Registers a call destroys
    pub volatile: RegisterSet,
    /// Argument index whose register survives calls (an environment pointer)
    pub special_non_volatile_argument: Option<u32>,
}

impl Linkage {
    pub fn arguments(&self, kind: RegisterKind) -> &[GlobalRegisterNumber] {
        match kind {
            RegisterKind::Gpr => &self.gpr_arguments,
            RegisterKind::Fpr => &self.fpr_arguments,
            RegisterKind::Vrf => &self.vrf_arguments,
        }
    }

    /// Register carrying incoming argument `index` of class `kind`
    pub fn linkage_register(&self, kind: RegisterKind, index: u32) -> Option<GlobalRegisterNumber> {
        self.arguments(kind).get(index as usize).copied()
    }

    /// All argument registers of every class
    pub fn all_arguments(&self) -> RegisterSet {
        self.gpr_arguments
            .iter()
            .chain(self.fpr_arguments.iter())
            .chain(self.vrf_arguments.iter())
            .copied()
            .collect()
    }

    pub fn is_special_non_volatile_argument(&self, index: u32) -> bool {
        self.special_non_volatile_argument == Some(index)
    }
}

/// Per-architecture decisions the allocator defers to
pub trait RegisterClassPolicy {
    fn name(&self) -> &str;

    fn register_file(&self) -> &RegisterFile;

    fn linkage(&self) -> &Linkage;

    /// Target word width in bits
    fn target_bits(&self) -> u32;

    /// Size of a collected reference in a stack slot
    fn reference_size(&self) -> u32;

    fn pointer_size(&self) -> u32 {
        self.target_bits() / 8
    }

    fn is_32bit(&self) -> bool {
        self.target_bits() == 32
    }

    fn are_gprs_scarce(&self) -> bool {
        self.register_file().count(RegisterKind::Gpr) <= SCARCE_GPR_THRESHOLD
    }

    /// Registers of `kind` that may be live across the outgoing edges of a
    /// block ending in `last_node`
    fn max_registers_across_edge(&self, kind: RegisterKind, _method: &Method, _last_node: Option<&Node>) -> usize {
        self.register_file().count(kind)
    }

    /// Drop registers the target cannot give this candidate at all
    fn remove_unavailable_registers(&self, method: &Method, candidate: &RegisterCandidate, available: &mut RegisterSet) {
        remove_call_volatile_registers(self.linkage(), method, candidate, available);
    }

    /// Mark registers the target reserves in some blocks as already used there
    fn set_unavailable_registers_usage(&self, _method: &Method, _entry_usage: &mut [BlockSet], _exit_usage: &mut [BlockSet]) {}

    fn is_global_register_available(&self, _reg: GlobalRegisterNumber, _data_type: DataType) -> bool {
        true
    }

    /// Whether the candidate may stay in a register across the branch ending
    /// `block`
    fn allow_global_register_across_branch(
        &self,
        _candidate: &RegisterCandidate,
        _method: &Method,
        _block: BlockNumber,
    ) -> bool {
        true
    }

    fn supports_global_register_deps_on_first_block(&self) -> bool {
        false
    }

    fn has_java_float_semantics(&self) -> bool {
        true
    }

    /// Memory operands take a constant displacement
    fn supports_constant_offset_in_addressing(&self) -> bool {
        true
    }

    /// Memory operands take a scaled index register
    fn supports_scaled_index_addressing(&self) -> bool {
        true
    }

    /// Null checks of simple loads are done by the hardware trap
    fn has_resumable_trap_handler(&self) -> bool {
        true
    }

    /// Registers made unattractive when the simulator predicts `kind`
    fn registers_for_spill_kind(&self, kind: SpillKind) -> RegisterSet {
        let file = self.register_file();
        match kind {
            SpillKind::Gpr => file.set_of(RegisterKind::Gpr),
            SpillKind::Fpr => file.set_of(RegisterKind::Fpr),
            SpillKind::Vrf => file.set_of(RegisterKind::Vrf),
            SpillKind::VmThread => file.vm_thread.into_iter().collect(),
            SpillKind::Volatile => self.linkage().volatile.clone(),
            SpillKind::Linkage => self.linkage().all_arguments(),
        }
    }
}

/// Borrow generated register names for `RegisterFile::new`
pub(crate) fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

/// Without a preserved-register set every volatile register dies at a call,
/// so a candidate held across one keeps only its own incoming linkage
/// register among them
pub fn remove_call_volatile_registers(
    linkage: &Linkage,
    method: &Method,
    candidate: &RegisterCandidate,
    available: &mut RegisterSet,
) {
    if linkage.preserved.is_some() || !is_live_across_call(method, candidate) {
        return;
    }
    let symbol = method.symbol(candidate.symref);
    let own = if symbol.is_parm() {
        symbol
            .linkage_register_index()
            .and_then(|index| linkage.linkage_register(candidate.register_kind(), index))
    } else {
        None
    };
    available.retain(|r| !linkage.volatile.contains(r) || Some(*r) == own);
}

/// Whether the candidate's register must survive a call in one of its blocks
pub fn is_live_across_call(method: &Method, candidate: &RegisterCandidate) -> bool {
    method.call_blocks().into_iter().any(|b| {
        held_across_call(
            method,
            b,
            candidate.symref,
            candidate.blocks_live_on_entry.contains(&b),
            candidate.blocks_live_on_exit.contains(&b),
        )
    })
}

/// Walk the trees of `block`: the value is held once it is live on entry or
/// referenced, and a call while it is held counts when a later tree still
/// references it or it leaves the block in the register
fn held_across_call(method: &Method, block: BlockNumber, symref: SymRefNumber, on_entry: bool, on_exit: bool) -> bool {
    let mut held = on_entry;
    let mut crossed = false;
    for &tt in &method.cfg.block(block).treetops {
        let (mut has_call, mut references) = (false, false);
        method.for_each_node_post_order(&[tt], |_, node| {
            has_call |= node.is_real_call();
            references |= node.opcode.has_symbol_reference() && node.symref == Some(symref);
        });
        if crossed && references {
            return true;
        }
        held |= references;
        crossed |= has_call && held;
    }
    crossed && on_exit
}

/// A fully configurable target, mostly for tests and the driver
#[derive(Debug, Clone)]
pub struct GenericPolicy {
    pub register_file: RegisterFile,
    pub linkage: Linkage,
    pub bits: u32,
    pub reference_size: u32,
    pub java_float_semantics: bool,
    pub first_block_register_deps: bool,
}

impl GenericPolicy {
    /// `gprs`/`fprs`/`vrfs` registers named r0.., f0.., v0.., no argument
    /// registers, every register volatile and no preserved-register knowledge
    pub fn new(gprs: usize, fprs: usize, vrfs: usize) -> Self {
        let gpr_names: Vec<String> = (0..gprs).map(|i| format!("r{}", i)).collect();
        let fpr_names: Vec<String> = (0..fprs).map(|i| format!("f{}", i)).collect();
        let vrf_names: Vec<String> = (0..vrfs).map(|i| format!("v{}", i)).collect();
        let register_file = RegisterFile::new(&as_strs(&gpr_names), &as_strs(&fpr_names), &as_strs(&vrf_names));
        let volatile = (0..register_file.total()).collect();
        Self {
            register_file,
            linkage: Linkage {
                gpr_arguments: Vec::new(),
                fpr_arguments: Vec::new(),
                vrf_arguments: Vec::new(),
                preserved: None,
                volatile,
                special_non_volatile_argument: None,
            },
            bits: 64,
            reference_size: 8,
            java_float_semantics: true,
            first_block_register_deps: false,
        }
    }
}

impl RegisterClassPolicy for GenericPolicy {
    fn name(&self) -> &str {
        "generic"
    }

    fn register_file(&self) -> &RegisterFile {
        &self.register_file
    }

    fn linkage(&self) -> &Linkage {
        &self.linkage
    }

    fn target_bits(&self) -> u32 {
        self.bits
    }

    fn reference_size(&self) -> u32 {
        self.reference_size
    }

    fn supports_global_register_deps_on_first_block(&self) -> bool {
        self.first_block_register_deps
    }

    fn has_java_float_semantics(&self) -> bool {
        self.java_float_semantics
    }
}

/// Build a policy by name: `amd64`, `ia32` or `power`
pub fn policy_for(name: &str) -> Option<Box<dyn RegisterClassPolicy>> {
    match name {
        "amd64" => Some(Box::new(X86Policy::amd64())),
        "ia32" => Some(Box::new(X86Policy::ia32())),
        "power" => Some(Box::new(PowerPolicy::new(64))),
        "power32" => Some(Box::new(PowerPolicy::new(32))),
        _ => None,
    }
}
