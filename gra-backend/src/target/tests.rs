use super::*;
use gra_ir::{MethodBuilder, END, START};
use pretty_assertions::assert_eq;

/// b2 ends in a switch over b3 and b4; `f` is read in b3 only
fn float_switch() -> (Method, BlockNumber, BlockNumber, BlockNumber) {
    let mut b = MethodBuilder::new("switch");
    let f = b.auto("f", DataType::Double);
    let b2 = b.block();
    let b3 = b.block();
    let b4 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b2, b4).edge(b3, END).edge(b4, END);
    let zero = b.constant(DataType::Double, 0);
    b.store(b2, f, zero);
    let selector = b.constant(DataType::Int32, 1);
    b.switch(b2, selector);
    let lf = b.load(f);
    b.anchor(b3, lf);
    b.ret(b4, None);
    (b.build().expect("valid"), b2, b3, b4)
}

#[test]
fn test_register_file_layout() {
    let file = RegisterFile::new(&["a", "b"], &["f0"], &["v0", "v1"]);
    assert_eq!(file.gprs, 0..2);
    assert_eq!(file.fprs, 2..3);
    assert_eq!(file.vrfs, 3..5);
    assert_eq!(file.total(), 5);
    assert_eq!(file.kind_of(2), Some(RegisterKind::Fpr));
    assert_eq!(file.kind_of(4), Some(RegisterKind::Vrf));
    assert_eq!(file.kind_of(5), None);
    assert_eq!(file.name(1), "b");
    assert_eq!(file.name(9), "?");
    assert_eq!(file.find("v1"), Some(4));
    assert!(file.is_8bit_capable(1));
    assert!(!file.is_8bit_capable(2));
}

#[test]
fn test_ia32_byte_registers_and_scarcity() {
    let policy = X86Policy::ia32();
    let file = policy.register_file();
    let edx = file.find("edx").expect("edx");
    let esi = file.find("esi").expect("esi");
    assert!(file.is_8bit_capable(edx));
    assert!(!file.is_8bit_capable(esi));
    assert!(policy.is_32bit());
    assert!(policy.are_gprs_scarce());
    assert!(!policy.has_java_float_semantics());
    assert!(!X86Policy::amd64().are_gprs_scarce());
}

#[test]
fn test_amd64_linkage_registers() {
    let policy = X86Policy::amd64();
    let file = policy.register_file();
    let linkage = policy.linkage();
    assert_eq!(linkage.linkage_register(RegisterKind::Gpr, 0), file.find("rdi"));
    assert_eq!(linkage.linkage_register(RegisterKind::Fpr, 1), file.find("xmm1"));
    assert_eq!(linkage.linkage_register(RegisterKind::Gpr, 6), None);
    assert_eq!(policy.registers_for_spill_kind(SpillKind::Linkage), linkage.all_arguments());
    assert_eq!(
        policy.registers_for_spill_kind(SpillKind::Gpr),
        file.set_of(RegisterKind::Gpr)
    );
    assert!(policy.registers_for_spill_kind(SpillKind::VmThread).is_empty());
}

#[test]
fn test_x86_float_across_switch_needs_every_case() {
    let (method, b2, b3, b4) = float_switch();
    let policy = X86Policy::amd64();
    let mut rc = RegisterCandidate::new(0, DataType::Double);
    rc.blocks_live_on_entry.insert(b3);
    assert!(!policy.allow_global_register_across_branch(&rc, &method, b2));
    rc.blocks_live_on_entry.insert(b4);
    assert!(policy.allow_global_register_across_branch(&rc, &method, b2));

    let int = RegisterCandidate::new(0, DataType::Int32);
    assert!(policy.allow_global_register_across_branch(&int, &method, b2));
}

#[test]
fn test_power_switch_consumes_scratch_registers() {
    let (method, b2, b3, _) = float_switch();
    let policy = PowerPolicy::new(64);
    let gprs = policy.register_file().count(RegisterKind::Gpr);
    let last = method.last_real_node(b2);
    assert_eq!(policy.max_registers_across_edge(RegisterKind::Gpr, &method, last), gprs - 3);
    assert_eq!(
        policy.max_registers_across_edge(RegisterKind::Fpr, &method, last),
        policy.register_file().count(RegisterKind::Fpr)
    );
    assert_eq!(
        policy.max_registers_across_edge(RegisterKind::Gpr, &method, method.last_real_node(b3)),
        gprs
    );
}

#[test]
fn test_power_thread_register_is_last_gpr() {
    let policy = PowerPolicy::new(64);
    let file = policy.register_file();
    assert_eq!(file.vm_thread, file.find("r13"));
    assert_eq!(file.vm_thread, Some(file.gprs.end - 1));
    assert_eq!(file.name(0), "r3");
    assert_eq!(policy.reference_size(), 8);
    assert_eq!(PowerPolicy::new(32).name(), "power32");
}

#[test]
fn test_power_reserved_register_is_used_everywhere() {
    let (method, ..) = float_switch();
    let policy = PowerPolicy::new(64).with_reserved_register("r31");
    let reserved = policy.register_file().find("r31").expect("r31");
    let total = policy.register_file().total();
    let mut entry_usage = vec![BlockSet::new(); total];
    let mut exit_usage = vec![BlockSet::new(); total];
    policy.set_unavailable_registers_usage(&method, &mut entry_usage, &mut exit_usage);

    let all: BlockSet = (0..method.cfg.num_blocks()).collect();
    assert_eq!(entry_usage[reserved], all);
    assert_eq!(exit_usage[reserved], all);
    assert!(entry_usage[0].is_empty());
}

#[test]
fn test_generic_policy() {
    let policy = GenericPolicy::new(3, 2, 1);
    let file = policy.register_file();
    assert_eq!(file.name(0), "r0");
    assert_eq!(file.name(3), "f0");
    assert_eq!(file.name(5), "v0");
    assert_eq!(policy.linkage().volatile.len(), 6);
    assert!(policy.linkage().preserved.is_none());
    assert!(policy.are_gprs_scarce());
    assert_eq!(policy.pointer_size(), 8);
}

#[test]
fn test_policy_for() {
    assert_eq!(policy_for("amd64").map(|p| p.name().to_string()), Some("amd64".to_string()));
    assert_eq!(policy_for("ia32").map(|p| p.target_bits()), Some(32));
    assert_eq!(policy_for("power").map(|p| p.name().to_string()), Some("power".to_string()));
    assert!(policy_for("sparc").is_none());
}

/// `x` set in b2; b3 holds `uses_before` reads of x, a call, then
/// `uses_after` more reads
fn call_between_uses(uses_before: usize, uses_after: usize, parm: bool) -> (Method, BlockNumber, SymRefNumber) {
    let mut b = MethodBuilder::new("volatile");
    let x = if parm {
        b.parm("x", DataType::Int32, Some(0))
    } else {
        b.auto("x", DataType::Int32)
    };
    let b2 = b.block();
    let b3 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, END);
    let one = b.constant(DataType::Int32, 1);
    b.store(b2, x, one);
    for _ in 0..uses_before {
        let lx = b.load(x);
        b.anchor(b3, lx);
    }
    let call = b.call(DataType::NoType, Vec::new());
    b.anchor(b3, call);
    for _ in 0..uses_after {
        let lx = b.load(x);
        b.anchor(b3, lx);
    }
    (b.build().expect("valid"), b3, x)
}

fn live_into(symref: SymRefNumber, block: BlockNumber) -> RegisterCandidate {
    let mut rc = RegisterCandidate::new(symref, DataType::Int32);
    rc.blocks_live_on_entry.insert(block);
    rc
}

#[test]
fn test_volatile_registers_removed_across_call() {
    let (method, b3, x) = call_between_uses(0, 3, false);
    let rc = live_into(x, b3);
    assert!(is_live_across_call(&method, &rc));

    let mut policy = GenericPolicy::new(4, 0, 0);
    policy.linkage.volatile = [0, 1].into_iter().collect();
    let mut available: RegisterSet = (0..4).collect();
    policy.remove_unavailable_registers(&method, &rc, &mut available);
    assert_eq!(available, [2, 3].into_iter().collect());

    let everything_volatile = GenericPolicy::new(4, 0, 0);
    let mut available: RegisterSet = (0..4).collect();
    everything_volatile.remove_unavailable_registers(&method, &rc, &mut available);
    assert!(available.is_empty());
}

#[test]
fn test_parameter_keeps_its_linkage_register_across_call() {
    let (method, b3, p) = call_between_uses(0, 2, true);
    let mut policy = GenericPolicy::new(4, 0, 0);
    policy.linkage.gpr_arguments = vec![1];
    let mut available: RegisterSet = (0..4).collect();
    policy.remove_unavailable_registers(&method, &live_into(p, b3), &mut available);
    assert_eq!(available, [1].into_iter().collect());
}

#[test]
fn test_value_dead_before_call_keeps_volatile_registers() {
    let (method, b3, x) = call_between_uses(2, 0, false);
    let rc = live_into(x, b3);
    assert!(!is_live_across_call(&method, &rc));

    let policy = GenericPolicy::new(4, 0, 0);
    let mut available: RegisterSet = (0..4).collect();
    policy.remove_unavailable_registers(&method, &rc, &mut available);
    assert_eq!(available.len(), 4);
}

#[test]
fn test_known_preserved_set_leaves_volatile_registers_to_the_picker() {
    let (method, b3, x) = call_between_uses(0, 3, false);
    let policy = X86Policy::amd64();
    let gprs = policy.register_file().set_of(RegisterKind::Gpr);
    let mut available = gprs.clone();
    policy.remove_unavailable_registers(&method, &live_into(x, b3), &mut available);
    assert_eq!(available, gprs);
}
