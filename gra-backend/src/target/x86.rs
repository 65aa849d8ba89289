use super::{Linkage, RegisterClassPolicy, RegisterFile};
use crate::candidate::RegisterCandidate;
use gra_common::{BlockNumber, RegisterSet};
use gra_ir::Method;

/// x86 family: 64-bit with the System V convention, or 32-bit with
/// stack-passed arguments, register pairs for longs and only four
/// byte-addressable GPRs
#[derive(Debug, Clone)]
pub struct X86Policy {
    name: &'static str,
    register_file: RegisterFile,
    linkage: Linkage,
    bits: u32,
    reference_size: u32,
}

impl X86Policy {
    pub fn amd64() -> Self {
        let gprs = [
            "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
        ];
        let fprs: Vec<String> = (0..16).map(|i| format!("xmm{}", i)).collect();
        let fpr_refs: Vec<&str> = fprs.iter().map(String::as_str).collect();
        let file = RegisterFile::new(&gprs, &fpr_refs, &[]);

        let reg = |name: &str| file.find(name);
        let gpr_arguments = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"]
            .iter()
            .filter_map(|n| reg(n))
            .collect();
        let fpr_arguments = file.fprs.clone().take(8).collect();
        let mut volatile: RegisterSet = ["rax", "rcx", "rdx", "rsi", "rdi", "r8", "r9", "r10", "r11"]
            .iter()
            .filter_map(|n| reg(n))
            .collect();
        volatile.extend(file.fprs.clone());
        let preserved = ["rbx", "r12", "r13", "r14", "r15"].iter().filter_map(|n| reg(n)).collect();

        Self {
            name: "amd64",
            linkage: Linkage {
                gpr_arguments,
                fpr_arguments,
                vrf_arguments: Vec::new(),
                preserved: Some(preserved),
                volatile,
                special_non_volatile_argument: None,
            },
            register_file: file,
            bits: 64,
            reference_size: 8,
        }
    }

    pub fn ia32() -> Self {
        let gprs = ["eax", "ebx", "ecx", "edx", "esi", "edi"];
        let fprs: Vec<String> = (0..8).map(|i| format!("xmm{}", i)).collect();
        let fpr_refs: Vec<&str> = fprs.iter().map(String::as_str).collect();
        let mut file = RegisterFile::new(&gprs, &fpr_refs, &[]);
        file.last_8bit_gpr = file.find("edx");

        let reg = |name: &str| file.find(name);
        let mut volatile: RegisterSet = ["eax", "ecx", "edx"].iter().filter_map(|n| reg(n)).collect();
        volatile.extend(file.fprs.clone());
        let preserved = ["ebx", "esi", "edi"].iter().filter_map(|n| reg(n)).collect();

        Self {
            name: "ia32",
            linkage: Linkage {
                gpr_arguments: Vec::new(),
                fpr_arguments: Vec::new(),
                vrf_arguments: Vec::new(),
                preserved: Some(preserved),
                volatile,
                special_non_volatile_argument: None,
            },
            register_file: file,
            bits: 32,
            reference_size: 4,
        }
    }
}

impl RegisterClassPolicy for X86Policy {
    fn name(&self) -> &str {
        self.name
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

    /// A float kept alive across a switch must be live on entry to every case
    fn allow_global_register_across_branch(
        &self,
        candidate: &RegisterCandidate,
        method: &Method,
        block: BlockNumber,
    ) -> bool {
        let is_switch = method
            .last_real_node(block)
            .map(|n| n.opcode.is_switch())
            .unwrap_or(false);
        if !is_switch || !candidate.data_type.is_floating_point() {
            return true;
        }
        method
            .cfg
            .block(block)
            .successors
            .iter()
            .all(|s| candidate.blocks_live_on_entry.contains(s))
    }

    fn has_java_float_semantics(&self) -> bool {
        self.bits == 64
    }
}
