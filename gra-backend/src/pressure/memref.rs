use gra_ir::{Method, Node};

/// Registers a memory operand can combine before an address must be
/// materialized separately
pub const MAX_NUM_REGISTERS: u32 = 2;

/// Largest index scale a memory operand encodes
pub const MAX_STRIDE: i64 = 8;

/// Operands folded into one memory reference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedMemoryReference {
    pub num_registers: u32,
    /// Registers holding a consolidated address computation
    pub num_consolidated_registers: u32,
}

impl SimulatedMemoryReference {
    /// Fold one more operand in. A full reference is first consolidated into
    /// a single register, as if by a load-effective-address.
    pub fn add(&mut self, gpr_pressure: &mut i32) {
        if self.num_registers >= MAX_NUM_REGISTERS {
            self.release(gpr_pressure);
            self.num_consolidated_registers = 1;
            *gpr_pressure += 1;
        }
        self.num_registers += 1;
    }

    /// The instruction using the reference has been emitted
    pub fn release(&mut self, gpr_pressure: &mut i32) {
        self.num_registers = 0;
        *gpr_pressure -= self.num_consolidated_registers as i32;
        self.num_consolidated_registers = 0;
    }
}

/// The constant multiplier of a multiply or shift by a power of two
pub fn power_of_two_scale_factor(method: &Method, node: &Node) -> Option<i64> {
    if !node.data_type.is_integral() {
        return None;
    }
    let constant = method.node(node.second_child()?);
    if !constant.opcode.is_load_const() {
        return None;
    }
    let value = constant.constant?;
    if node.opcode.is_mul() && value > 0 && value & (value - 1) == 0 {
        return Some(value);
    }
    if node.opcode.is_left_shift() && (0..=31).contains(&value) {
        return Some(1i64 << value);
    }
    None
}
