use super::{as_strs, Linkage, RegisterClassPolicy, RegisterFile};
use gra_common::{BlockSet, DataType, GlobalRegisterNumber, RegisterKind, RegisterSet};
use gra_ir::{Method, Node, Opcode};

/// GPRs a table switch needs for its binary search
const SWITCH_SCRATCH_GPRS: usize = 3;

/// GPRs a 64-bit compare consumes on a 32-bit target
const LONG_COMPARE_GPRS: usize = 4;

/// Power family: a large register file, r13 carrying the thread context and
/// branches that consume scratch registers on their outgoing edges
#[derive(Debug, Clone)]
pub struct PowerPolicy {
    register_file: RegisterFile,
    linkage: Linkage,
    bits: u32,
    reserved: Option<GlobalRegisterNumber>,
}

impl PowerPolicy {
    pub fn new(bits: u32) -> Self {
        let gpr_names: Vec<String> = (3..=12)
            .chain(14..=31)
            .chain(std::iter::once(13))
            .map(|i| format!("r{}", i))
            .collect();
        let fpr_names: Vec<String> = (0..32).map(|i| format!("f{}", i)).collect();
        let vrf_names: Vec<String> = (0..32).map(|i| format!("v{}", i)).collect();
        let mut file = RegisterFile::new(&as_strs(&gpr_names), &as_strs(&fpr_names), &as_strs(&vrf_names));
        file.vm_thread = file.find("r13");

        let regs = |prefix: &str, range: std::ops::RangeInclusive<u32>| -> Vec<GlobalRegisterNumber> {
            range.filter_map(|i| file.find(&format!("{}{}", prefix, i))).collect()
        };
        let gpr_arguments = regs("r", 3..=10);
        let fpr_arguments = regs("f", 1..=13);
        let vrf_arguments = regs("v", 2..=13);
        let mut volatile: RegisterSet = regs("r", 3..=12).into_iter().collect();
        volatile.extend(regs("f", 0..=13));
        volatile.extend(regs("v", 0..=19));
        let mut preserved: RegisterSet = regs("r", 14..=31).into_iter().collect();
        preserved.extend(regs("f", 14..=31));
        preserved.extend(regs("v", 20..=31));

        Self {
            linkage: Linkage {
                gpr_arguments,
                fpr_arguments,
                vrf_arguments,
                preserved: Some(preserved),
                volatile,
                special_non_volatile_argument: None,
            },
            register_file: file,
            bits,
            reserved: None,
        }
    }

    /// Keep `name` out of global allocation in every block
    pub fn with_reserved_register(mut self, name: &str) -> Self {
        self.reserved = self.register_file.find(name);
        self
    }
}

impl RegisterClassPolicy for PowerPolicy {
    fn name(&self) -> &str {
        if self.bits == 64 {
            "power"
        } else {
            "power32"
        }
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
        self.bits / 8
    }

    fn supports_scaled_index_addressing(&self) -> bool {
        false
    }

    fn max_registers_across_edge(&self, kind: RegisterKind, method: &Method, last_node: Option<&Node>) -> usize {
        let count = self.register_file.count(kind);
        if kind != RegisterKind::Gpr {
            return count;
        }
        match last_node {
            Some(node) if node.opcode.is_switch() => count.saturating_sub(SWITCH_SCRATCH_GPRS),
            Some(node) if node.opcode == Opcode::If && self.bits == 32 => {
                let long_compare = node
                    .first_child()
                    .map(|c| method.node(c).data_type == DataType::Int64)
                    .unwrap_or(false);
                if long_compare {
                    count.saturating_sub(LONG_COMPARE_GPRS)
                } else {
                    count
                }
            }
            _ => count,
        }
    }

    fn set_unavailable_registers_usage(&self, method: &Method, entry_usage: &mut [BlockSet], exit_usage: &mut [BlockSet]) {
        let Some(reserved) = self.reserved else {
            return;
        };
        let all_blocks = 0..method.cfg.num_blocks();
        if let Some(usage) = entry_usage.get_mut(reserved) {
            usage.extend(all_blocks.clone());
        }
        if let Some(usage) = exit_usage.get_mut(reserved) {
            usage.extend(all_blocks);
        }
    }
}
