use super::*;
use crate::candidate::RegisterCandidate;
use crate::target::GenericPolicy;
use gra_common::{BlockNumber, BlockSet, RegisterKind, SymRefNumber};
use gra_ir::{Method, MethodBuilder, Opcode, END, START};
use pretty_assertions::assert_eq;

fn set(blocks: &[BlockNumber]) -> BlockSet {
    blocks.iter().copied().collect()
}

fn simulate_plain(method: &Method, policy: &GenericPolicy, block: BlockNumber) -> PressureSummary {
    let mut simulator = PressureSimulator::new(method, policy);
    let mut state = PressureState::new(block, Vec::new(), simulator.limits());
    let mut summary = PressureSummary::new(0, 0, 0);
    simulator.simulate_block_evaluation(block, &mut state, &mut summary);
    summary
}

#[test]
fn test_register_counts() {
    let mut policy = GenericPolicy::new(8, 8, 2);
    assert_eq!(gpr_count(&policy, DataType::Int64), 1);
    assert_eq!(gpr_count(&policy, DataType::Address), 1);
    assert_eq!(gpr_count(&policy, DataType::Double), 0);
    assert_eq!(gpr_count(&policy, DataType::Aggregate { size: 8 }), 1);

    policy.bits = 32;
    assert_eq!(gpr_count(&policy, DataType::Int64), 2);
    assert_eq!(gpr_count(&policy, DataType::Aggregate { size: 8 }), 2);
    assert_eq!(gpr_count(&policy, DataType::Aggregate { size: 16 }), 1);
    assert_eq!(fpr_count(DataType::Double), 1);
    assert_eq!(fpr_count(DataType::Int32), 0);
    assert_eq!(vrf_count(DataType::Vector128), 1);
}

#[test]
fn test_summary_accumulate_caps_and_unions() {
    let mut summary = PressureSummary::new(3, 0, 0);
    let mut other = PressureSummary::new(PRESSURE_LIMIT + 10, 2, 0);
    other.spill(SpillKind::Volatile);
    summary.spill(SpillKind::Gpr);
    summary.accumulate(&other);
    assert_eq!(summary.gpr_pressure, PRESSURE_LIMIT);
    assert_eq!(summary.fpr_pressure, 2);
    assert_eq!(
        summary.spill_mask.iter().copied().collect::<Vec<_>>(),
        vec![SpillKind::Gpr, SpillKind::Volatile]
    );

    summary.keep_mandatory_only();
    assert!(summary.is_spilled(SpillKind::Gpr));
    assert!(!summary.is_spilled(SpillKind::Volatile));
}

#[test]
fn test_stale_summary_is_at_the_limit() {
    let summary = PressureSummary::default();
    assert_eq!(summary.gpr_pressure, PRESSURE_LIMIT);
    assert!(summary.spill_mask.is_empty());
}

#[test]
fn test_memory_reference_consolidates_third_operand() {
    let mut gprs = 0;
    let mut memref = SimulatedMemoryReference::default();
    memref.add(&mut gprs);
    memref.add(&mut gprs);
    assert_eq!(gprs, 0);
    memref.add(&mut gprs);
    assert_eq!(gprs, 1);
    assert_eq!(memref.num_registers, 1);
    assert_eq!(memref.num_consolidated_registers, 1);
    memref.release(&mut gprs);
    assert_eq!(gprs, 0);
    assert_eq!(memref, SimulatedMemoryReference::default());
}

#[test]
fn test_power_of_two_scale_factor() {
    let mut b = MethodBuilder::new("scale");
    let i = b.auto("i", DataType::Int32);
    let b2 = b.block();
    b.edge(START, b2).edge(b2, END);
    let li = b.load(i);
    let eight = b.constant(DataType::Int32, 8);
    let mul = b.binary(Opcode::Mul, DataType::Int32, li, eight);
    let li2 = b.load(i);
    let three = b.constant(DataType::Int32, 3);
    let shl = b.binary(Opcode::Shl, DataType::Int32, li2, three);
    let li3 = b.load(i);
    let six = b.constant(DataType::Int32, 6);
    let not_scale = b.binary(Opcode::Mul, DataType::Int32, li3, six);
    for n in [mul, shl, not_scale] {
        b.anchor(b2, n);
    }
    let method = b.build().expect("valid");

    assert_eq!(power_of_two_scale_factor(&method, method.node(mul)), Some(8));
    assert_eq!(power_of_two_scale_factor(&method, method.node(shl)), Some(8));
    assert_eq!(power_of_two_scale_factor(&method, method.node(not_scale)), None);
}

#[test]
fn test_simple_expression_peak() {
    // y = x + z needs both operands at once
    let mut b = MethodBuilder::new("add");
    let x = b.auto("x", DataType::Int32);
    let y = b.auto("y", DataType::Int32);
    let z = b.auto("z", DataType::Int32);
    let b2 = b.block();
    b.edge(START, b2).edge(b2, END);
    let lx = b.load(x);
    let lz = b.load(z);
    let sum = b.binary(Opcode::Add, DataType::Int32, lx, lz);
    b.store(b2, y, sum);
    let method = b.build().expect("valid");
    let policy = GenericPolicy::new(4, 4, 0);

    let summary = simulate_plain(&method, &policy, b2);
    assert_eq!(summary.gpr_pressure, 2);
    assert_eq!(summary.fpr_pressure, 0);
    assert!(summary.spill_mask.is_empty());
}

#[test]
fn test_taller_child_is_evaluated_first_for_a_candidate() {
    // a + (b + c): evaluating the inner sum first keeps the peak at two,
    // but heights are only computed while weighing a candidate
    let mut b = MethodBuilder::new("height");
    let syms: Vec<_> = ["a", "b", "c", "r", "u"].iter().map(|n| b.auto(n, DataType::Int32)).collect();
    let b2 = b.block();
    b.edge(START, b2).edge(b2, END);
    let la = b.load(syms[0]);
    let lb = b.load(syms[1]);
    let lc = b.load(syms[2]);
    let inner = b.binary(Opcode::Add, DataType::Int32, lb, lc);
    let outer = b.binary(Opcode::Add, DataType::Int32, la, inner);
    b.store(b2, syms[3], outer);
    let method = b.build().expect("valid");
    let policy = GenericPolicy::new(4, 4, 0);

    assert_eq!(simulate_plain(&method, &policy, b2).gpr_pressure, 3);

    let unrelated = RegisterCandidate::new(syms[4], DataType::Int32);
    let mut simulator = PressureSimulator::new(&method, &policy);
    let (summary, _) = simulator.simulate_for_candidate(b2, &unrelated, &[], false);
    assert_eq!(summary.gpr_pressure, 2);
}

#[test]
fn test_address_arithmetic_folds_into_memory_reference() {
    // *(p + 4): the constant goes into the displacement
    let mut b = MethodBuilder::new("memref");
    let p = b.auto("p", DataType::Address);
    let b2 = b.block();
    b.edge(START, b2).edge(b2, END);
    let lp = b.load(p);
    let four = b.constant(DataType::Int32, 4);
    let address = b.binary(Opcode::Add, DataType::Address, lp, four);
    let value = b.load_indirect(DataType::Int32, address);
    b.anchor(b2, value);
    let method = b.build().expect("valid");
    let policy = GenericPolicy::new(4, 4, 0);

    assert_eq!(simulate_plain(&method, &policy, b2).gpr_pressure, 1);
}

#[test]
fn test_null_check_of_simple_load_is_skipped() {
    let mut b = MethodBuilder::new("nullchk");
    let p = b.auto("p", DataType::Address);
    let b2 = b.block();
    b.edge(START, b2).edge(b2, END);
    let lp = b.load(p);
    b.null_check(b2, lp);
    let method = b.build().expect("valid");
    let policy = GenericPolicy::new(4, 4, 0);

    assert_eq!(simulate_plain(&method, &policy, b2).gpr_pressure, 0);
}

/// b2 -> b3, where b3 computes `y = z + w` without touching x
fn busy_successor() -> (Method, BlockNumber, BlockNumber, SymRefNumber) {
    let mut b = MethodBuilder::new("busy");
    let x = b.auto("x", DataType::Int32);
    let y = b.auto("y", DataType::Int32);
    let z = b.auto("z", DataType::Int32);
    let w = b.auto("w", DataType::Int32);
    let b2 = b.block();
    let b3 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, END);
    let one = b.constant(DataType::Int32, 1);
    b.store(b2, x, one);
    let lz = b.load(z);
    let lw = b.load(w);
    let sum = b.binary(Opcode::Add, DataType::Int32, lz, lw);
    b.store(b3, y, sum);
    (b.build().expect("valid"), b2, b3, x)
}

#[test]
fn test_candidate_live_on_entry_spills_when_over_limit() {
    let (method, _, b3, x) = busy_successor();
    let mut rc = RegisterCandidate::new(x, DataType::Int32);
    rc.blocks_live_on_entry = set(&[b3]);

    let tight = GenericPolicy::new(2, 2, 0);
    let mut simulator = PressureSimulator::new(&method, &tight);
    assert!(!simulator.has_pressure_info());
    let (summary, _) = simulator.simulate_for_candidate(b3, &rc, &[], false);
    assert!(simulator.has_pressure_info());
    assert_eq!(summary.gpr_pressure, 3);
    assert!(summary.is_spilled(SpillKind::Gpr));
    assert_eq!(simulator.spilled_registers(b3, x), set(&[0, 1]));
    assert_eq!(simulator.block_summary(b3), &summary);

    let roomy = GenericPolicy::new(3, 2, 0);
    let mut simulator = PressureSimulator::new(&method, &roomy);
    let (summary, _) = simulator.simulate_for_candidate(b3, &rc, &[], false);
    assert_eq!(summary.gpr_pressure, 3);
    assert!(summary.spill_mask.is_empty());
}

#[test]
fn test_high_half_adds_entry_pressure() {
    let (method, _, b3, x) = busy_successor();
    let rc = RegisterCandidate::new(x, DataType::Int32);
    let policy = GenericPolicy::new(4, 4, 0);
    let mut simulator = PressureSimulator::new(&method, &policy);

    let (low, _) = simulator.simulate_for_candidate(b3, &rc, &[], false);
    let (high, _) = simulator.simulate_for_candidate(b3, &rc, &[], true);
    assert_eq!(low.gpr_pressure, 2);
    assert_eq!(high.gpr_pressure, 3);
}

#[test]
fn test_assigned_loads_on_entry_are_not_recounted() {
    // y is already in a register on entry; its loads add nothing
    let mut b = MethodBuilder::new("assigned");
    let x = b.auto("x", DataType::Int32);
    let y = b.auto("y", DataType::Int32);
    let z = b.auto("z", DataType::Int32);
    let b2 = b.block();
    b.edge(START, b2).edge(b2, END);
    let ly = b.load(y);
    let ly2 = b.load(y);
    let sum = b.binary(Opcode::Add, DataType::Int32, ly, ly2);
    b.store(b2, z, sum);
    let method = b.build().expect("valid");
    let policy = GenericPolicy::new(4, 4, 0);

    let rc = RegisterCandidate::new(x, DataType::Int32);
    let mut assigned = RegisterCandidate::new(y, DataType::Int32);
    assigned.blocks_live_on_entry = set(&[b2]);

    let mut simulator = PressureSimulator::new(&method, &policy);
    let (summary, _) = simulator.simulate_for_candidate(b2, &rc, &[&assigned], false);
    assert_eq!(summary.gpr_pressure, 1);
}

/// A loop of one block that makes a call with x live throughout
fn call_block(in_loop: bool) -> (Method, BlockNumber, SymRefNumber) {
    let mut b = MethodBuilder::new("call");
    let x = b.auto("x", DataType::Int32);
    let b2 = b.block();
    b.edge(START, b2).edge(b2, END);
    if in_loop {
        b.edge(b2, b2);
        b.add_loop(b2, &[b2], None);
    }
    let call = b.call(DataType::NoType, Vec::new());
    b.anchor(b2, call);
    (b.build().expect("valid"), b2, x)
}

#[test]
fn test_call_in_loop_header_keeps_probable_spills() {
    let policy = GenericPolicy::new(4, 4, 0);
    let (method, b2, x) = call_block(true);
    let mut rc = RegisterCandidate::new(x, DataType::Int32);
    rc.blocks_live_on_entry = set(&[b2]);
    let mut simulator = PressureSimulator::new(&method, &policy);
    let (summary, _) = simulator.simulate_for_candidate(b2, &rc, &[], false);
    assert!(summary.is_spilled(SpillKind::Gpr));
    assert!(summary.is_spilled(SpillKind::Volatile));
    assert!(summary.is_spilled(SpillKind::Linkage));

    let (method, b2, x) = call_block(false);
    let mut rc = RegisterCandidate::new(x, DataType::Int32);
    rc.blocks_live_on_entry = set(&[b2]);
    let mut simulator = PressureSimulator::new(&method, &policy);
    let (summary, _) = simulator.simulate_for_candidate(b2, &rc, &[], false);
    assert_eq!(
        summary.spill_mask.iter().copied().collect::<Vec<_>>(),
        vec![SpillKind::Gpr, SpillKind::VmThread]
    );
}

fn store_and_call(call_first: bool) -> (Method, BlockNumber, BlockNumber, SymRefNumber, usize) {
    let mut b = MethodBuilder::new("keep");
    let x = b.auto("x", DataType::Int32);
    let y = b.auto("y", DataType::Int32);
    let b2 = b.block();
    let b3 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, END);
    let call = b.call(DataType::NoType, Vec::new());
    let ly = b.load(y);
    if call_first {
        b.anchor(b2, call);
        b.store(b2, x, ly);
    } else {
        b.store(b2, x, ly);
        b.anchor(b2, call);
    }
    let lx = b.load(x);
    b.ret(b3, Some(lx));
    (b.build().expect("valid"), b2, b3, x, ly)
}

#[test]
fn test_value_live_out_is_kept_across_later_call() {
    let policy = GenericPolicy::new(4, 4, 0);
    let (method, b2, b3, x, stored) = store_and_call(false);
    let mut rc = RegisterCandidate::new(x, DataType::Int32);
    rc.blocks_live_on_entry = set(&[b3]);
    rc.blocks_live_on_exit = set(&[b2]);

    let mut simulator = PressureSimulator::new(&method, &policy);
    let (summary, recent) = simulator.simulate_for_candidate(b2, &rc, &[], false);
    assert_eq!(recent.most_recent_value, Some(stored));
    assert_eq!(
        summary.spill_mask.iter().copied().collect::<Vec<_>>(),
        vec![SpillKind::Gpr, SpillKind::VmThread]
    );

    let (method, b2, b3, x, _) = store_and_call(true);
    let mut rc = RegisterCandidate::new(x, DataType::Int32);
    rc.blocks_live_on_entry = set(&[b3]);
    rc.blocks_live_on_exit = set(&[b2]);
    let mut simulator = PressureSimulator::new(&method, &policy);
    let (summary, _) = simulator.simulate_for_candidate(b2, &rc, &[], false);
    assert!(summary.spill_mask.is_empty());
}

#[test]
fn test_bump_pressure_skips_spilled_kinds() {
    let (method, b2, b3, x) = busy_successor();
    let policy = GenericPolicy::new(2, 2, 0);
    let mut rc = RegisterCandidate::new(x, DataType::Int32);
    rc.blocks_live_on_entry = set(&[b3]);
    let mut simulator = PressureSimulator::new(&method, &policy);
    simulator.simulate_for_candidate(b3, &rc, &[], false);
    let plain = RegisterCandidate::new(x, DataType::Int32);
    simulator.simulate_for_candidate(b2, &plain, &[], false);
    let before = simulator.block_summary(b2).gpr_pressure;

    simulator.bump_pressure(&set(&[b2, b3]), RegisterKind::Gpr);
    assert_eq!(simulator.block_summary(b2).gpr_pressure, before + 1);
    assert_eq!(simulator.block_summary(b3).gpr_pressure, 3);
    simulator.bump_pressure(&set(&[b2]), RegisterKind::Fpr);
    assert_eq!(simulator.block_summary(b2).fpr_pressure, 1);
}

#[test]
fn test_spill_kind_display() {
    let names: Vec<String> = SpillKind::ALL.iter().map(|k| k.to_string()).collect();
    assert_eq!(names, vec!["gpr", "fpr", "vrf", "vmThread", "volatile", "linkage"]);
}
