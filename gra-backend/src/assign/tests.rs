use super::*;
use crate::target::{GenericPolicy, X86Policy};
use gra_common::{Hotness, SymRefNumber};
use gra_ir::{MethodBuilder, Opcode, END, START};
use pretty_assertions::assert_eq;

fn set(blocks: &[BlockNumber]) -> BlockSet {
    blocks.iter().copied().collect()
}

fn no_interrupt() -> impl FnMut() -> bool {
    || false
}

fn preference_config() -> GraConfig {
    GraConfig {
        pressure_simulation: false,
        ..GraConfig::default()
    }
}

/// Fails every pick for a candidate live into `poisoned` and reports every
/// register as spilling there
struct PoisonedBlockPicker {
    poisoned: BlockNumber,
    registers: RegisterSet,
}

impl RegisterPickStrategy for PoisonedBlockPicker {
    fn name(&self) -> &'static str {
        "poisoned"
    }

    fn pick(
        &mut self,
        registry: &CandidateRegistry,
        id: CandidateId,
        available: &RegisterSet,
        _high_half: bool,
    ) -> Option<GlobalRegisterNumber> {
        if registry.get(id).blocks_live_on_entry.contains(&self.poisoned) {
            return None;
        }
        available.iter().next().copied()
    }

    fn has_pressure_info(&self) -> bool {
        true
    }

    fn simulated_spilled_registers(&self, block: BlockNumber, _symref: SymRefNumber) -> Option<RegisterSet> {
        if block == self.poisoned {
            Some(self.registers.clone())
        } else {
            Some(RegisterSet::new())
        }
    }
}

/// x = 1; y = 2 in b2, b3 computes x = x + x, b4 computes y = y + 1 after
/// reading y, b5 returns y
struct TwoLocals {
    method: Method,
    blocks: [BlockNumber; 4],
    x: SymRefNumber,
    y: SymRefNumber,
}

fn two_locals(hotness: Hotness, with_x: bool) -> TwoLocals {
    let mut b = MethodBuilder::new("two_locals");
    b.set_hotness(hotness);
    let x = b.auto("x", DataType::Int32);
    let y = b.auto("y", DataType::Int32);
    let b2 = b.block();
    let b3 = b.block();
    let b4 = b.block();
    let b5 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, b4).edge(b4, b5).edge(b5, END);

    if with_x {
        let one = b.constant(DataType::Int32, 1);
        b.store(b2, x, one);
    }
    let two = b.constant(DataType::Int32, 2);
    b.store(b2, y, two);

    if with_x {
        let lx1 = b.load(x);
        let lx2 = b.load(x);
        let sum = b.binary(Opcode::Add, DataType::Int32, lx1, lx2);
        b.store(b3, x, sum);
    }

    let ly1 = b.load(y);
    b.anchor(b4, ly1);
    let ly2 = b.load(y);
    let one = b.constant(DataType::Int32, 1);
    let inc = b.binary(Opcode::Add, DataType::Int32, ly2, one);
    b.store(b4, y, inc);

    let ly3 = b.load(y);
    b.ret(b5, Some(ly3));

    TwoLocals {
        method: b.build().expect("valid"),
        blocks: [b2, b3, b4, b5],
        x,
        y,
    }
}

#[test]
fn test_heavier_candidate_wins_single_register() {
    let mut b = MethodBuilder::new("one_register");
    b.set_hotness(Hotness::Hot);
    let x = b.auto("x", DataType::Int32);
    let y = b.auto("y", DataType::Int32);
    let b2 = b.block();
    let b3 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, END);
    let one = b.constant(DataType::Int32, 1);
    b.store(b2, x, one);
    let two = b.constant(DataType::Int32, 2);
    b.store(b2, y, two);
    let lx1 = b.load(x);
    let lx2 = b.load(x);
    let sum = b.binary(Opcode::Add, DataType::Int32, lx1, lx2);
    b.store(b3, x, sum);
    let ly = b.load(y);
    b.anchor(b3, ly);
    let method = b.build().expect("valid");

    let policy = GenericPolicy::new(1, 0, 0);
    let config = preference_config();
    let mut registry = CandidateRegistry::discover(&method);
    let result = assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

    let xid = registry.find(x).expect("x is a candidate");
    let yid = registry.find(y).expect("y is a candidate");
    assert!(registry.get(xid).weight > registry.get(yid).weight);
    assert_eq!(registry.get(xid).low_register, Some(0));
    assert_eq!(registry.get(yid).low_register, None);
    assert_eq!(result.assigned, vec![xid]);
    assert_eq!(result.dropped, vec![yid]);
    assert_eq!(result.lowest_register, Some(0));
    assert_eq!(result.highest_register, Some(0));
    assert!(!result.global_fp_assignment_done);

    assert_eq!(registry.tables.on_entry(b3, 0), Some(xid));
    assert_eq!(registry.tables.on_exit(b2, 0), Some(xid));
    assert!(registry.entry_usage[0].contains(&b3));
    assert!(registry.exit_usage[0].contains(&b2));
}

#[test]
fn test_saturated_exit_trims_waiting_candidates() {
    let TwoLocals { method, blocks, x, y } = two_locals(Hotness::Warm, true);
    let [b2, b3, b4, b5] = blocks;
    let policy = GenericPolicy::new(1, 0, 0);
    let config = preference_config();
    let mut registry = CandidateRegistry::discover(&method);
    let result = assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

    let xid = registry.find(x).expect("x is a candidate");
    let yid = registry.find(y).expect("y is a candidate");
    assert_eq!(result.assigned, vec![xid, yid]);
    assert_eq!(registry.get(xid).blocks_live_on_entry, set(&[b3]));
    // b3 is full once x holds the only register across b2 -> b3
    assert_eq!(registry.get(yid).blocks_live_on_entry, set(&[b5]));
    assert_eq!(registry.get(yid).blocks_live_on_exit, set(&[b4]));
    assert_eq!(registry.get(yid).low_register, Some(0));
    assert_eq!(registry.tables.on_entry(b5, 0), Some(yid));
    assert_eq!(registry.tables.on_exit(b4, 0), Some(yid));
    assert_eq!(registry.tables.on_exit(b2, 0), Some(xid));
}

#[test]
fn test_failed_pick_trims_conflicts_and_retries() {
    let TwoLocals { method, blocks, y, .. } = two_locals(Hotness::Hot, false);
    let [_, b3, b4, b5] = blocks;
    let policy = GenericPolicy::new(2, 0, 0);
    let config = preference_config();
    let picker = PoisonedBlockPicker {
        poisoned: b5,
        registers: [0, 1].into_iter().collect(),
    };

    let mut registry = CandidateRegistry::discover(&method);
    let result = Assigner::new(&method, &policy, &config)
        .with_strategy(Box::new(picker))
        .run(&mut registry, &mut no_interrupt())
        .expect("not interrupted");

    let yid = registry.find(y).expect("y is a candidate");
    let rc = registry.get(yid);
    assert_eq!(rc.blocks_live_on_entry, set(&[b3, b4]));
    assert_eq!(rc.low_register, Some(0));
    assert_eq!(rc.reprioritized, config.max_reprioritized.hot - 1);
    assert_eq!(result.iterations, 2);
}

#[test]
fn test_failed_pick_without_budget_drops_candidate() {
    let TwoLocals { method, blocks, y, .. } = two_locals(Hotness::Warm, false);
    let picker = PoisonedBlockPicker {
        poisoned: blocks[3],
        registers: [0, 1].into_iter().collect(),
    };
    let policy = GenericPolicy::new(2, 0, 0);
    let config = preference_config();

    let mut registry = CandidateRegistry::discover(&method);
    let result = Assigner::new(&method, &policy, &config)
        .with_strategy(Box::new(picker))
        .run(&mut registry, &mut no_interrupt())
        .expect("not interrupted");

    let yid = registry.find(y).expect("y is a candidate");
    assert_eq!(result.dropped, vec![yid]);
    assert!(result.assigned.is_empty());
    assert_eq!(result.iterations, 1);
}

#[test]
fn test_interrupt_stops_assignment() {
    let TwoLocals { method, .. } = two_locals(Hotness::Warm, true);
    let policy = GenericPolicy::new(4, 0, 0);
    let config = GraConfig {
        interrupt_check_interval: 1,
        ..preference_config()
    };
    let mut registry = CandidateRegistry::discover(&method);
    let mut polls = 0;
    let mut interrupt = || {
        polls += 1;
        true
    };
    let err = assign(&method, &policy, &config, &mut registry, &mut interrupt).unwrap_err();
    assert!(err.is_interrupt());
    assert_eq!(polls, 1);
    assert!(registry.assigned().is_empty());
}

#[test]
fn test_empty_registry() {
    let TwoLocals { method, .. } = two_locals(Hotness::Warm, true);
    let policy = GenericPolicy::new(4, 0, 0);
    let config = GraConfig::default();
    let mut registry = CandidateRegistry::new();
    let result = assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");
    assert_eq!(result, AssignmentResult::default());
}

#[test]
fn test_excluded_candidates_stay_in_memory() {
    let mut b = MethodBuilder::new("excluded");
    b.set_hotness(Hotness::Hot);
    let long = b.auto("long", DataType::Int64);
    let monitored = b.auto("monitored", DataType::Address);
    let aliased = b.auto("aliased", DataType::Int32);
    let double = b.auto("double", DataType::Double);
    let plain = b.auto("plain", DataType::Int32);
    b.symbol_mut(monitored).holds_monitored_object = true;
    b.symbol_mut(aliased).use_def_aliases.insert(plain);

    let b2 = b.block();
    let b3 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, END);
    for (symref, data_type) in [
        (long, DataType::Int64),
        (monitored, DataType::Address),
        (aliased, DataType::Int32),
        (double, DataType::Double),
        (plain, DataType::Int32),
    ] {
        let zero = b.constant(data_type, 0);
        b.store(b2, symref, zero);
        let load = b.load(symref);
        b.anchor(b3, load);
    }
    let method = b.build().expect("valid");

    let policy = GenericPolicy::new(8, 8, 0);
    let config = GraConfig {
        enable_long_gra: false,
        enable_fp_gra: false,
        ..preference_config()
    };
    let mut registry = CandidateRegistry::discover(&method);
    let result = assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

    let assigned: Vec<SymRefNumber> = result.assigned.iter().map(|&id| registry.get(id).symref).collect();
    assert_eq!(assigned, vec![plain]);
    assert_eq!(result.dropped.len(), 4);
    assert!(!result.global_fp_assignment_done);
}

#[test]
fn test_catch_block_leaves_live_range() {
    let mut b = MethodBuilder::new("catch");
    b.set_hotness(Hotness::Hot);
    let x = b.auto("x", DataType::Int32);
    b.symbol_mut(x).live_local_index = Some(0);
    let b2 = b.block();
    let b3 = b.block();
    let b4 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, b4).edge(b4, END);
    b.exception_edge(b3, b4);
    b.live_locals(b4, &[0]);
    let one = b.constant(DataType::Int32, 1);
    b.store(b2, x, one);
    let l3 = b.load(x);
    b.anchor(b3, l3);
    let l4 = b.load(x);
    b.anchor(b4, l4);
    let method = b.build().expect("valid");

    let policy = GenericPolicy::new(4, 0, 0);
    let config = preference_config();
    let mut registry = CandidateRegistry::discover(&method);
    assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

    let rc = registry.get(registry.find(x).expect("x is a candidate"));
    assert!(rc.live_across_exception_edge);
    assert_eq!(rc.blocks_live_on_entry, set(&[b3]));
    assert!(rc.is_assigned());
}

#[test]
fn test_float_live_in_switch_block_without_java_float_semantics() {
    let mut b = MethodBuilder::new("float_switch");
    b.set_hotness(Hotness::Hot);
    let f = b.auto("f", DataType::Float);
    let b2 = b.block();
    let b3 = b.block();
    let b4 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b2, b4).edge(b3, END).edge(b4, END);
    let one = b.constant(DataType::Float, 1);
    b.store(b2, f, one);
    let selector = b.constant(DataType::Int32, 0);
    b.switch(b2, selector);
    let l3 = b.load(f);
    b.anchor(b3, l3);
    let l4 = b.load(f);
    b.anchor(b4, l4);
    let method = b.build().expect("valid");

    let policy = X86Policy::ia32();
    let config = preference_config();
    let mut registry = CandidateRegistry::discover(&method);
    let result = assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

    let id = registry.find(f).expect("f is a candidate");
    assert!(!registry.get(id).is_assigned());
    assert_eq!(result.dropped, vec![id]);
    assert!(!result.global_fp_assignment_done);
}

#[test]
fn test_long_on_32bit_target_takes_a_pair() {
    let mut b = MethodBuilder::new("pair");
    b.set_hotness(Hotness::Hot);
    let l = b.auto("l", DataType::Int64);
    let b2 = b.block();
    let b3 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, END);
    let big = b.constant(DataType::Int64, 1 << 40);
    b.store(b2, l, big);
    let l1 = b.load(l);
    let l2 = b.load(l);
    let sum = b.binary(Opcode::Add, DataType::Int64, l1, l2);
    b.store(b3, l, sum);
    let method = b.build().expect("valid");

    let policy = X86Policy::ia32();
    let config = preference_config();
    let mut registry = CandidateRegistry::discover(&method);
    let result = assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

    let rc = registry.get(registry.find(l).expect("l is a candidate"));
    let gprs = policy.register_file().range(RegisterKind::Gpr);
    let (low, high) = (rc.low_register.expect("low"), rc.high_register.expect("high"));
    assert_ne!(low, high);
    assert!(gprs.contains(&low) && gprs.contains(&high));
    assert_eq!(registry.tables.on_entry(b3, low), registry.tables.on_entry(b3, high));
    assert_eq!(result.lowest_register, Some(low.min(high)));
    assert_eq!(result.highest_register, Some(low.max(high)));
}

#[test]
fn test_simulation_gives_overlapping_candidates_distinct_registers() {
    let TwoLocals { method, x, y, .. } = two_locals(Hotness::Hot, true);
    let policy = X86Policy::amd64();
    let config = GraConfig::default();
    let mut registry = CandidateRegistry::discover(&method);
    let result = assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

    let xid = registry.find(x).expect("x is a candidate");
    let yid = registry.find(y).expect("y is a candidate");
    assert_eq!(result.assigned.len(), 2);
    assert_ne!(registry.get(xid).low_register, registry.get(yid).low_register);
}

#[test]
fn test_assigned_ranges_never_share_a_register() {
    let TwoLocals { method, .. } = two_locals(Hotness::VeryHot, true);
    for registers in 1..=3 {
        let policy = GenericPolicy::new(registers, 0, 0);
        let config = preference_config();
        let mut registry = CandidateRegistry::discover(&method);
        assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

        let assigned = registry.assigned().to_vec();
        for (i, &a) in assigned.iter().enumerate() {
            for &b in &assigned[i + 1..] {
                let (ra, rb) = (registry.get(a), registry.get(b));
                if ra.low_register != rb.low_register {
                    continue;
                }
                assert!(ra.blocks_live_on_entry.is_disjoint(&rb.blocks_live_on_entry));
                assert!(ra.blocks_live_on_exit.is_disjoint(&rb.blocks_live_on_exit));
            }
        }
    }
}

#[test]
#[should_panic(expected = "is required in register 0 on exit out of block_2")]
fn test_conflicting_exit_claim_panics() {
    let mut registry = CandidateRegistry::new();
    let a = registry.add(RegisterCandidate::new(0, DataType::Int32));
    let b = registry.add(RegisterCandidate::new(1, DataType::Int32));
    registry.tables.set_on_exit(2, 0, a);
    Assigner::claim_exit(&mut registry, 2, 0, b);
}

/// x = 1 in b2; b3 calls out and then reads x three times
fn read_after_call() -> (Method, SymRefNumber, BlockNumber) {
    let mut b = MethodBuilder::new("after_call");
    b.set_hotness(Hotness::Hot);
    let x = b.auto("x", DataType::Int32);
    let b2 = b.block();
    let b3 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, END);
    let one = b.constant(DataType::Int32, 1);
    b.store(b2, x, one);
    let call = b.call(DataType::NoType, Vec::new());
    b.anchor(b3, call);
    for _ in 0..3 {
        let lx = b.load(x);
        b.anchor(b3, lx);
    }
    (b.build().expect("valid"), x, b3)
}

#[test]
fn test_value_live_across_call_avoids_volatile_registers() {
    let (method, x, b3) = read_after_call();
    for config in [GraConfig::default(), preference_config()] {
        let mut policy = GenericPolicy::new(4, 0, 0);
        policy.linkage.volatile = [0, 1].into_iter().collect();
        let mut registry = CandidateRegistry::discover(&method);
        assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

        let rc = registry.get(registry.find(x).expect("x is a candidate"));
        assert!(rc.blocks_live_on_entry.contains(&b3));
        let reg = rc.low_register.expect("a preserved register is free");
        assert!(!policy.linkage.volatile.contains(&reg), "got volatile register {}", reg);
    }
}

#[test]
fn test_value_live_across_call_stays_in_memory_when_every_register_is_volatile() {
    let (method, x, _) = read_after_call();
    for config in [GraConfig::default(), preference_config()] {
        let policy = GenericPolicy::new(4, 0, 0);
        let mut registry = CandidateRegistry::discover(&method);
        let result = assign(&method, &policy, &config, &mut registry, &mut no_interrupt()).expect("not interrupted");

        let xid = registry.find(x).expect("x is a candidate");
        assert_eq!(registry.get(xid).low_register, None);
        assert!(result.dropped.contains(&xid));
    }
}

#[test]
fn test_saturation_reprioritizes_only_the_same_class() {
    let mut b = MethodBuilder::new("vectors");
    let v = b.auto("v", DataType::Vector128);
    let x = b.auto("x", DataType::Int32);
    let b2 = b.block();
    let b3 = b.block();
    b.edge(START, b2).edge(b2, b3).edge(b3, END);
    for symref in [v, x] {
        let zero = b.constant(DataType::Int32, 0);
        b.store(b2, symref, zero);
        let load = b.load(symref);
        b.anchor(b3, load);
    }
    let method = b.build().expect("valid");
    let policy = GenericPolicy::new(4, 0, 2);
    let config = GraConfig::default();

    let mut registry = CandidateRegistry::new();
    let mut ids = Vec::new();
    for (symref, data_type) in [(v, DataType::Vector128), (x, DataType::Int32)] {
        let mut rc = RegisterCandidate::new(symref, data_type);
        rc.add_block(b2, 1);
        rc.add_block(b3, 1);
        rc.blocks_live_on_entry = set(&[b3]);
        rc.blocks_live_on_exit = set(&[b2]);
        rc.weight = 100;
        ids.push(registry.add(rc));
    }

    let mut assigner = Assigner::new(&method, &policy, &config);
    assigner.queue.extend(ids.iter().copied());
    assigner.reprioritize(&mut registry, &set(&[b3]), RegisterKind::Vrf, false);

    assert!(!registry.get(ids[0]).blocks_live_on_entry.contains(&b3));
    assert_eq!(registry.get(ids[1]).blocks_live_on_entry, set(&[b3]));
    assert!(assigner.queue.contains(&ids[1]));
}

#[test]
fn test_candidates_overlap_follows_evaluation_order() {
    // b2 reads x for the last time and then starts y
    let mut b = MethodBuilder::new("handoff");
    let x = b.auto("x", DataType::Int32);
    let y = b.auto("y", DataType::Int32);
    let z = b.auto("z", DataType::Int32);
    let b2 = b.block();
    b.edge(START, b2).edge(b2, END);
    let lx = b.load(x);
    b.anchor(b2, lx);
    let one = b.constant(DataType::Int32, 1);
    b.store(b2, y, one);
    let method = b.build().expect("valid");

    let mut registry = CandidateRegistry::new();
    let xs = registry.coordinates(&method, b2, x);
    let ys = registry.coordinates(&method, b2, y);
    assert!(!candidates_overlap(xs, ys));
    assert!(candidates_overlap(ys, xs));
    assert!(!candidates_overlap(registry.coordinates(&method, b2, z), ys));
}
