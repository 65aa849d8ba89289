//! Protecting commoned references across GC points
//!
//! A collected reference computed once and used again after a call (or any
//! other point where the collector may move objects) cannot simply stay in
//! whatever register evaluated it. Before each such safepoint, every pending
//! commoned reference is stored to a spill temp; uses before the safepoint
//! get a private copy of the original expression, and the original node
//! becomes a reload of the temp for the uses that follow.

use crate::spill::SpillTempManager;
use gra_common::{BlockNumber, DataType, NodeId, SymRefNumber};
use gra_ir::{Method, Node, Opcode};
use log::{debug, trace};
use std::collections::BTreeSet;

/// A commoned reference seen by some parents but not yet by all of them
#[derive(Debug, Clone, PartialEq)]
pub struct LiveReference {
    pub node: NodeId,
    /// Parents seen so far, in visiting order, repeated per child slot
    pub parents: Vec<NodeId>,
    /// False only for reloads of an existing spill temp, which are
    /// reloaded again without a new store
    pub needs_spill_temp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafepointReport {
    pub safepoints: usize,
    pub stores_inserted: usize,
    pub references_rewritten: usize,
    pub temps_created: usize,
    pub temps_reused: usize,
}

/// Rewrite `method` so no commoned collected reference is held in a
/// register across a safepoint
pub fn spill_live_references_at_safepoints(method: &mut Method, spills: &mut SpillTempManager) -> SafepointReport {
    debug!("spilling live references at safepoints in {}", method.name);
    let mut spiller = SafepointSpiller {
        method,
        spills,
        visited: BTreeSet::new(),
        live_references: Vec::new(),
        available_temps: Vec::new(),
        report: SafepointReport::default(),
    };
    spiller.run();
    debug!("safepoint spilling done: {:?}", spiller.report);
    spiller.report
}

struct SafepointSpiller<'a> {
    method: &'a mut Method,
    spills: &'a mut SpillTempManager,
    visited: BTreeSet<NodeId>,
    /// Kept in insertion order: a child always precedes its parents
    live_references: Vec<LiveReference>,
    /// Spill temps whose last use has been seen, oldest first
    available_temps: Vec<SymRefNumber>,
    report: SafepointReport,
}

impl SafepointSpiller<'_> {
    fn run(&mut self) {
        let layout = self.method.cfg.layout.clone();
        for block in layout {
            let mut index = 0;
            while index < self.method.cfg.block(block).treetops.len() {
                let tt = self.method.cfg.block(block).treetops[index];
                if !self.method.is_safepoint_tree(tt) {
                    self.find_commoned_references(tt);
                    index += 1;
                    continue;
                }

                let root = self.method.node(tt);
                let safepoint = if root.opcode.is_treetop() || root.opcode.is_check() || root.opcode.is_store_direct()
                {
                    root.first_child().unwrap_or(tt)
                } else {
                    tt
                };

                if !self.visited.contains(&safepoint) {
                    self.report.safepoints += 1;
                    // Temps released by the safepoint's own operands get a
                    // new value before it, so only older ones are usable
                    let first_usable = self.available_temps.len();
                    self.find_commoned_references(safepoint);
                    if !self.live_references.is_empty() {
                        index += self.spill_live_references(block, index, first_usable);
                    }
                }

                // The safepoint's own value may be live across the next one
                if safepoint != tt {
                    self.find_commoned_references(tt);
                }
                index += 1;
            }
        }
    }

    fn find_commoned_references(&mut self, id: NodeId) {
        if !self.visited.insert(id) {
            return;
        }
        let children = self.method.node(id).children.clone();
        // Children first, so the list stays in processing order
        for &child in children.iter().rev() {
            if !self.visited.contains(&child) {
                self.find_commoned_references(child);
            }
            let node = self.method.node(child);
            if !node.data_type.is_address() || node.opcode.is_load_const() || node.opcode.is_load_addr() {
                continue;
            }
            let symref = if node.opcode.has_symbol_reference() {
                node.symref
            } else {
                None
            };
            if node.reference_count > 1 {
                if symref.map_or(true, |s| !self.method.symbol(s).not_collected) {
                    self.process_reference(child, id);
                }
            } else if let Some(temp) = symref.filter(|&s| self.method.symbol(s).is_spill_temp()) {
                // Only and last use of the temp
                self.release_temp(temp, child);
            }
        }
    }

    fn process_reference(&mut self, reference: NodeId, parent: NodeId) {
        let reference_count = self.method.node(reference).reference_count as usize;
        if let Some(pos) = self.live_references.iter().position(|lr| lr.node == reference) {
            if reference_count == self.live_references[pos].parents.len() + 1 {
                // Last parent: no later safepoint can separate the uses
                self.live_references.remove(pos);
                if let Some(temp) = self.spill_temp_of(reference) {
                    self.release_temp(temp, reference);
                }
            } else {
                self.live_references[pos].parents.push(parent);
            }
            return;
        }

        let needs_spill_temp = self.spill_temp_of(reference).is_none();
        trace!(
            "  live reference n{} under n{}{}",
            reference,
            parent,
            if needs_spill_temp { "" } else { " (spill temp reload)" }
        );
        self.live_references.push(LiveReference {
            node: reference,
            parents: vec![parent],
            needs_spill_temp,
        });
    }

    /// The temp `id` reloads, if it is a direct load of one
    fn spill_temp_of(&self, id: NodeId) -> Option<SymRefNumber> {
        let node = self.method.node(id);
        node.symref
            .filter(|_| node.opcode.is_load_direct())
            .filter(|&s| self.method.symbol(s).is_spill_temp())
    }

    fn release_temp(&mut self, temp: SymRefNumber, at: NodeId) {
        trace!("  release spill temp #{} at n{}", temp, at);
        self.available_temps.push(temp);
    }

    /// Take the newest temp below `first_usable`, or allocate one
    fn take_temp(&mut self, first_usable: &mut usize) -> SymRefNumber {
        if *first_usable > 0 {
            *first_usable -= 1;
            self.report.temps_reused += 1;
            return self.available_temps.remove(*first_usable);
        }
        let size = self.spills.reference_size();
        let allocation = self.spills.allocate_spill(self.method, size, true, false, false);
        self.report.temps_created += 1;
        self.spills.slot(allocation.slot).symref
    }

    /// Spill every pending reference before the tree at `index` of `block`;
    /// returns the number of trees inserted
    fn spill_live_references(&mut self, block: BlockNumber, index: usize, mut first_usable: usize) -> usize {
        debug!(
            "spilling {} live references at n{}",
            self.live_references.len(),
            self.method.cfg.block(block).treetops[index]
        );
        let mut inserted = 0;
        for live in std::mem::take(&mut self.live_references) {
            let original = live.node;
            let (temp, store) = match self.spill_temp_of(original) {
                Some(existing) if !live.needs_spill_temp => {
                    trace!("  reuse spill temp #{} for n{} without storing", existing, original);
                    (existing, false)
                }
                _ => {
                    let temp = self.take_temp(&mut first_usable);
                    trace!("  spill n{} to temp #{}", original, temp);
                    (temp, true)
                }
            };

            // Uses before the safepoint keep a copy of the original expression
            let mut copy = self.method.node(original).clone();
            copy.reference_count = live.parents.len() as u32 + u32::from(store);
            let copy = self.method.add_node(copy);
            for &parent in &live.parents {
                for child in self.method.node_mut(parent).children.iter_mut() {
                    if *child == original {
                        *child = copy;
                    }
                }
            }

            if store {
                let store_node = Node::new(Opcode::Store, DataType::Address)
                    .with_symref(temp)
                    .with_children(vec![copy]);
                let store_node = self.method.add_node(store_node);
                self.method
                    .cfg
                    .block_mut(block)
                    .treetops
                    .insert(index + inserted, store_node);
                inserted += 1;
                self.report.stores_inserted += 1;
            }

            let node = self.method.node_mut(original);
            node.opcode = Opcode::Load;
            node.data_type = DataType::Address;
            node.children.clear();
            node.symref = Some(temp);
            node.constant = None;
            node.unresolved = false;
            assert!(
                node.reference_count as usize > live.parents.len(),
                "Live reference n{} has no use after the safepoint",
                original
            );
            node.reference_count -= live.parents.len() as u32;
            self.report.references_rewritten += 1;

            // Seen again by the uses after the safepoint
            self.visited.remove(&original);
        }
        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraConfig;
    use gra_ir::{MethodBuilder, END, START};
    use pretty_assertions::assert_eq;

    fn spill_manager() -> SpillTempManager {
        SpillTempManager::new(&GraConfig::default(), 8)
    }

    struct Fixture {
        builder: MethodBuilder,
        block: BlockNumber,
        p: SymRefNumber,
    }

    fn fixture() -> Fixture {
        let mut builder = MethodBuilder::new("safepoints");
        let p = builder.parm("p", DataType::Address, Some(0));
        let block = builder.block();
        builder.edge(START, block).edge(block, END);
        Fixture { builder, block, p }
    }

    impl Fixture {
        /// `*p`, a collected reference with no symbol
        fn field(&mut self) -> NodeId {
            let base = self.builder.load(self.p);
            self.builder.load_indirect(DataType::Address, base)
        }

        fn store_to_new_local(&mut self, value: NodeId) -> NodeId {
            let local = self.builder.auto("t", DataType::Address);
            self.builder.store(self.block, local, value)
        }

        fn call(&mut self, args: Vec<NodeId>) -> NodeId {
            let call = self.builder.call(DataType::NoType, args);
            self.builder.anchor(self.block, call)
        }
    }

    #[test]
    fn test_reference_used_after_call_is_spilled() {
        let mut f = fixture();
        let r = f.field();
        let before = f.store_to_new_local(r);
        let call = f.call(Vec::new());
        let after1 = f.store_to_new_local(r);
        let after2 = f.store_to_new_local(r);
        let block = f.block;
        let mut method = f.builder.build().expect("valid");
        assert_eq!(method.node(r).reference_count, 3);

        let mut spills = spill_manager();
        let report = spill_live_references_at_safepoints(&mut method, &mut spills);
        assert_eq!(report.stores_inserted, 1);
        assert_eq!(report.temps_created, 1);
        assert_eq!(report.references_rewritten, 1);

        let temp = spills.slot(0).symref;
        let treetops = &method.cfg.block(block).treetops;
        assert_eq!(treetops.len(), 5);
        assert_eq!(treetops[0], before);
        assert_eq!(treetops[2], call);
        assert_eq!(&treetops[3..], &[after1, after2]);

        let spill_store = method.node(treetops[1]);
        assert!(spill_store.is_store_of(temp));
        let copy = method.node(before).children[0];
        assert_eq!(spill_store.children, vec![copy]);
        assert_eq!(method.node(copy).opcode, Opcode::LoadIndirect);
        assert_eq!(method.node(copy).reference_count, 2);

        // The original node now reloads the temp for the two later uses
        let reload = method.node(r);
        assert!(reload.is_load_of(temp));
        assert!(reload.children.is_empty());
        assert_eq!(reload.reference_count, 2);
        assert_eq!(method.node(after1).children, vec![r]);
        assert!(method.symbol(temp).is_spill_temp());
    }

    #[test]
    fn test_reference_dead_at_call_is_untouched() {
        let mut f = fixture();
        let r = f.field();
        f.store_to_new_local(r);
        f.store_to_new_local(r);
        f.call(Vec::new());
        let mut method = f.builder.build().expect("valid");
        let original = method.clone();

        let mut spills = spill_manager();
        let report = spill_live_references_at_safepoints(&mut method, &mut spills);
        assert_eq!(report.safepoints, 1);
        assert_eq!(report.stores_inserted, 0);
        assert_eq!(method, original);
        assert!(spills.all_spills().is_empty());
    }

    #[test]
    fn test_uncollected_reference_is_skipped() {
        let mut f = fixture();
        let raw = f.builder.auto("raw", DataType::Address);
        f.builder.symbol_mut(raw).not_collected = true;
        let r = f.builder.load(raw);
        f.store_to_new_local(r);
        f.call(Vec::new());
        f.store_to_new_local(r);
        let mut method = f.builder.build().expect("valid");
        let original = method.clone();

        let report = spill_live_references_at_safepoints(&mut method, &mut spill_manager());
        assert_eq!(report.stores_inserted, 0);
        assert_eq!(method, original);
    }

    #[test]
    fn test_call_argument_uses_pre_call_copy() {
        let mut f = fixture();
        let r = f.field();
        let before = f.store_to_new_local(r);
        let call = f.call(vec![r]);
        f.store_to_new_local(r);
        let mut method = f.builder.build().expect("valid");

        let report = spill_live_references_at_safepoints(&mut method, &mut spill_manager());
        assert_eq!(report.stores_inserted, 1);
        let copy = method.node(before).children[0];
        let call_node = method.node(call).children[0];
        assert_eq!(method.node(call_node).children, vec![copy]);
        // Two parents plus the spill store
        assert_eq!(method.node(copy).reference_count, 3);
        assert_eq!(method.node(r).reference_count, 1);
    }

    #[test]
    fn test_existing_temp_is_reloaded_without_store() {
        let mut f = fixture();
        let r = f.field();
        f.store_to_new_local(r);
        f.call(Vec::new());
        let middle = f.store_to_new_local(r);
        f.call(Vec::new());
        f.store_to_new_local(r);
        let mut method = f.builder.build().expect("valid");

        let mut spills = spill_manager();
        let report = spill_live_references_at_safepoints(&mut method, &mut spills);
        assert_eq!(report.safepoints, 2);
        assert_eq!(report.stores_inserted, 1);
        assert_eq!(report.references_rewritten, 2);
        assert_eq!(report.temps_created, 1);

        let temp = spills.slot(0).symref;
        let middle_value = method.node(middle).children[0];
        assert_ne!(middle_value, r);
        assert!(method.node(middle_value).is_load_of(temp));
        assert_eq!(method.node(r).reference_count, 1);
    }

    #[test]
    fn test_released_temp_reused_at_later_safepoint() {
        let mut f = fixture();
        let r1 = f.field();
        f.store_to_new_local(r1);
        f.call(Vec::new());
        f.store_to_new_local(r1);
        let r2 = f.field();
        f.store_to_new_local(r2);
        f.call(Vec::new());
        f.store_to_new_local(r2);
        let mut method = f.builder.build().expect("valid");

        let mut spills = spill_manager();
        let report = spill_live_references_at_safepoints(&mut method, &mut spills);
        assert_eq!(report.stores_inserted, 2);
        assert_eq!(report.temps_created, 1);
        assert_eq!(report.temps_reused, 1);
        assert_eq!(method.node(r1).symref, method.node(r2).symref);
    }

    #[test]
    fn test_temp_released_by_safepoint_operand_not_reused_there() {
        let mut f = fixture();
        let r1 = f.field();
        f.store_to_new_local(r1);
        f.call(Vec::new());
        let r2 = f.field();
        f.store_to_new_local(r2);
        // Last use of r1's temp is an argument of the call r2 must survive
        f.call(vec![r1]);
        f.store_to_new_local(r2);
        let mut method = f.builder.build().expect("valid");

        let mut spills = spill_manager();
        let report = spill_live_references_at_safepoints(&mut method, &mut spills);
        assert_eq!(report.temps_created, 2);
        assert_eq!(report.temps_reused, 0);
        assert_ne!(method.node(r1).symref, method.node(r2).symref);
    }
}
