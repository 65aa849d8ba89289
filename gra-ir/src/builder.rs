//! Method Builder
//!
//! Provides utilities for constructing methods programmatically. Reference
//! counts are derived from the finished trees by `build`.

use crate::{Block, Cfg, Loop, Method, Node, Opcode, Symbol, SymbolKind};
use gra_common::{AllocResult, BlockNumber, DataType, Hotness, LoopId, NodeId, SymRefNumber};
use std::collections::BTreeSet;

/// Builder for constructing methods
pub struct MethodBuilder {
    method: Method,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            method: Method {
                name: name.into(),
                cfg: Cfg::new(),
                nodes: Vec::new(),
                symbols: Vec::new(),
                hotness: Hotness::Warm,
                uses_profiling: false,
            },
        }
    }

    pub fn set_hotness(&mut self, hotness: Hotness) -> &mut Self {
        self.method.hotness = hotness;
        self
    }

    pub fn set_profiling(&mut self, uses_profiling: bool) -> &mut Self {
        self.method.uses_profiling = uses_profiling;
        self
    }

    // Symbols

    pub fn symbol(&mut self, symbol: Symbol) -> SymRefNumber {
        self.method.add_symbol(symbol)
    }

    pub fn auto(&mut self, name: &str, data_type: DataType) -> SymRefNumber {
        self.symbol(Symbol::new(name, SymbolKind::Auto, data_type))
    }

    pub fn parm(&mut self, name: &str, data_type: DataType, linkage_index: Option<u32>) -> SymRefNumber {
        self.symbol(Symbol::new(name, SymbolKind::Parm { linkage_index }, data_type))
    }

    pub fn static_symbol(&mut self, name: &str, data_type: DataType) -> SymRefNumber {
        self.symbol(Symbol::new(name, SymbolKind::Static, data_type))
    }

    pub fn symbol_mut(&mut self, symref: SymRefNumber) -> &mut Symbol {
        &mut self.method.symbols[symref]
    }

    // Blocks and edges

    /// Append a new block at the end of the layout
    pub fn block(&mut self) -> BlockNumber {
        let number = self.method.cfg.blocks.len();
        self.method.cfg.blocks.push(Block::new(number));
        self.method.cfg.layout.push(number);
        number
    }

    pub fn edge(&mut self, from: BlockNumber, to: BlockNumber) -> &mut Self {
        let cfg = &mut self.method.cfg;
        if !cfg.blocks[from].successors.contains(&to) {
            cfg.blocks[from].successors.push(to);
            cfg.blocks[to].predecessors.push(from);
        }
        self
    }

    /// Fallthrough edge making `to` an extension of `from`
    pub fn fallthrough(&mut self, from: BlockNumber, to: BlockNumber) -> &mut Self {
        self.edge(from, to);
        self.method.cfg.blocks[to].extension_of = Some(from);
        self
    }

    pub fn exception_edge(&mut self, from: BlockNumber, to: BlockNumber) -> &mut Self {
        let cfg = &mut self.method.cfg;
        cfg.blocks[from].exception_successors.push(to);
        cfg.blocks[to].exception_predecessors.push(from);
        self
    }

    pub fn frequency(&mut self, block: BlockNumber, frequency: i32) -> &mut Self {
        self.method.cfg.blocks[block].frequency = frequency;
        self
    }

    pub fn cold(&mut self, block: BlockNumber) -> &mut Self {
        self.method.cfg.blocks[block].is_cold = true;
        self
    }

    pub fn live_locals(&mut self, block: BlockNumber, indices: &[usize]) -> &mut Self {
        self.method.cfg.blocks[block].live_locals = Some(indices.iter().copied().collect());
        self
    }

    /// Add a loop; inner loops must be added after the loops containing them
    pub fn add_loop(&mut self, entry: BlockNumber, blocks: &[BlockNumber], parent: Option<LoopId>) -> LoopId {
        let cfg = &mut self.method.cfg;
        let id = cfg.loops.len();
        cfg.loops.push(Loop {
            id,
            entry,
            blocks: blocks.iter().copied().collect(),
            parent,
        });
        for &b in blocks {
            cfg.blocks[b].loop_id = Some(id);
        }
        id
    }

    // Expressions

    pub fn node(&mut self, node: Node) -> NodeId {
        self.method.add_node(node)
    }

    pub fn load(&mut self, symref: SymRefNumber) -> NodeId {
        let data_type = self.method.symbols[symref].data_type;
        self.node(Node::new(Opcode::Load, data_type).with_symref(symref))
    }

    pub fn load_indirect(&mut self, data_type: DataType, address: NodeId) -> NodeId {
        self.node(Node::new(Opcode::LoadIndirect, data_type).with_children(vec![address]))
    }

    pub fn load_addr(&mut self, symref: SymRefNumber) -> NodeId {
        self.node(Node::new(Opcode::LoadAddr, DataType::Address).with_symref(symref))
    }

    pub fn constant(&mut self, data_type: DataType, value: i64) -> NodeId {
        self.node(Node::new(Opcode::Const, data_type).with_constant(value))
    }

    pub fn binary(&mut self, opcode: Opcode, data_type: DataType, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.node(Node::new(opcode, data_type).with_children(vec![lhs, rhs]))
    }

    pub fn call(&mut self, data_type: DataType, args: Vec<NodeId>) -> NodeId {
        self.node(Node::new(Opcode::Call, data_type).with_children(args))
    }

    pub fn new_object(&mut self) -> NodeId {
        self.node(Node::new(Opcode::New, DataType::Address))
    }

    // Tree roots

    /// Append an existing node as the next tree of `block`
    pub fn append(&mut self, block: BlockNumber, root: NodeId) -> NodeId {
        self.method.cfg.blocks[block].treetops.push(root);
        root
    }

    /// Anchor a value-producing expression under a treetop
    pub fn anchor(&mut self, block: BlockNumber, value: NodeId) -> NodeId {
        let root = self.node(Node::new(Opcode::TreeTop, DataType::NoType).with_children(vec![value]));
        self.append(block, root)
    }

    pub fn store(&mut self, block: BlockNumber, symref: SymRefNumber, value: NodeId) -> NodeId {
        let data_type = self.method.symbols[symref].data_type;
        let root = self.node(
            Node::new(Opcode::Store, data_type)
                .with_symref(symref)
                .with_children(vec![value]),
        );
        self.append(block, root)
    }

    pub fn store_indirect(&mut self, block: BlockNumber, data_type: DataType, address: NodeId, value: NodeId) -> NodeId {
        let root = self.node(Node::new(Opcode::StoreIndirect, data_type).with_children(vec![address, value]));
        self.append(block, root)
    }

    pub fn null_check(&mut self, block: BlockNumber, reference: NodeId) -> NodeId {
        let root = self.node(Node::new(Opcode::NullCheck, DataType::NoType).with_children(vec![reference]));
        self.append(block, root)
    }

    pub fn branch(&mut self, block: BlockNumber, lhs: NodeId, rhs: NodeId) -> NodeId {
        let root = self.node(Node::new(Opcode::If, DataType::NoType).with_children(vec![lhs, rhs]));
        self.append(block, root)
    }

    pub fn goto(&mut self, block: BlockNumber) -> NodeId {
        let root = self.node(Node::new(Opcode::Goto, DataType::NoType));
        self.append(block, root)
    }

    pub fn switch(&mut self, block: BlockNumber, selector: NodeId) -> NodeId {
        let root = self.node(Node::new(Opcode::Switch, DataType::NoType).with_children(vec![selector]));
        self.append(block, root)
    }

    pub fn ret(&mut self, block: BlockNumber, value: Option<NodeId>) -> NodeId {
        let children = value.into_iter().collect();
        let root = self.node(Node::new(Opcode::Return, DataType::NoType).with_children(children));
        self.append(block, root)
    }

    pub fn async_check(&mut self, block: BlockNumber) -> NodeId {
        let root = self.node(Node::new(Opcode::AsyncCheck, DataType::NoType));
        self.append(block, root)
    }

    /// Derive reference counts from the trees and validate the result
    pub fn build(mut self) -> AllocResult<Method> {
        let method = &mut self.method;
        for node in &mut method.nodes {
            node.reference_count = 0;
        }

        let mut visited = BTreeSet::new();
        let mut worklist: Vec<NodeId> = method
            .cfg
            .blocks
            .iter()
            .flat_map(|b| b.treetops.iter().copied())
            .collect();
        while let Some(id) = worklist.pop() {
            if !visited.insert(id) {
                continue;
            }
            let children = method.nodes[id].children.clone();
            for child in children {
                // Out of range children are reported by validate
                if let Some(child_node) = method.nodes.get_mut(child) {
                    child_node.reference_count += 1;
                    worklist.push(child);
                }
            }
        }

        self.method.validate()?;
        Ok(self.method)
    }
}
