//! A method under compilation: CFG, node arena and symbol table

use crate::{Cfg, Node, Symbol, END, START};
use gra_common::{AllocResult, AllocatorError, BlockNumber, BlockSet, Hotness, NodeId, SymRefNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub cfg: Cfg,
    pub nodes: Vec<Node>,
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub hotness: Hotness,
    /// Block frequencies come from a profiler rather than static estimates
    #[serde(default)]
    pub uses_profiling: bool,
}

impl Method {
    /// Parse a method description and check it for consistency
    pub fn from_json(text: &str) -> AllocResult<Self> {
        let method: Method = serde_json::from_str(text)
            .map_err(|e| AllocatorError::invalid_method(e.to_string()))?;
        method.validate()?;
        Ok(method)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn symbol(&self, symref: SymRefNumber) -> &Symbol {
        &self.symbols[symref]
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn add_symbol(&mut self, symbol: Symbol) -> SymRefNumber {
        self.symbols.push(symbol);
        self.symbols.len() - 1
    }

    /// Whether the method has any automatic locals
    pub fn has_temps(&self) -> bool {
        self.symbols.iter().any(|s| s.is_auto())
    }

    /// Visit every node reachable from `roots` exactly once, children before
    /// parents
    pub fn for_each_node_post_order<F>(&self, roots: &[NodeId], mut f: F)
    where
        F: FnMut(NodeId, &Node),
    {
        let mut visited = BTreeSet::new();
        for &root in roots {
            self.post_order_from(root, &mut visited, &mut f);
        }
    }

    fn post_order_from<F>(&self, id: NodeId, visited: &mut BTreeSet<NodeId>, f: &mut F)
    where
        F: FnMut(NodeId, &Node),
    {
        if !visited.insert(id) {
            return;
        }
        let node = &self.nodes[id];
        for &child in &node.children {
            self.post_order_from(child, visited, f);
        }
        f(id, node);
    }

    /// Whether the subtree at `root` loads or stores `symref` directly
    pub fn references_symbol(&self, root: NodeId, symref: SymRefNumber) -> bool {
        let node = &self.nodes[root];
        if (node.opcode.is_load_direct() || node.opcode.is_store_direct()) && node.symref == Some(symref) {
            return true;
        }
        node.children.iter().any(|&c| self.references_symbol(c, symref))
    }

    pub fn block_references_symbol(&self, block: BlockNumber, symref: SymRefNumber) -> bool {
        self.cfg
            .block(block)
            .treetops
            .iter()
            .any(|&tt| self.references_symbol(tt, symref))
    }

    /// Blocks with at least one direct load or store of `symref`
    pub fn blocks_referencing(&self, symref: SymRefNumber) -> BlockSet {
        self.cfg
            .layout
            .iter()
            .copied()
            .filter(|&b| self.block_references_symbol(b, symref))
            .collect()
    }

    /// Blocks containing a call evaluated with a real call sequence
    pub fn call_blocks(&self) -> BlockSet {
        let mut result = BlockSet::new();
        for &b in &self.cfg.layout {
            let mut has_call = false;
            self.for_each_node_post_order(&self.cfg.block(b).treetops, |_, node| {
                has_call |= node.is_real_call();
            });
            if has_call {
                result.insert(b);
            }
        }
        result
    }

    /// Blocks ending in a multi-target branch
    pub fn switch_blocks(&self) -> BlockSet {
        self.cfg
            .layout
            .iter()
            .copied()
            .filter(|&b| {
                self.last_real_node(b)
                    .map(|n| n.opcode.is_switch())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Root of the block's last tree
    pub fn last_real_node(&self, block: BlockNumber) -> Option<&Node> {
        self.cfg.block(block).last_treetop().map(|id| &self.nodes[id])
    }

    /// A tree whose evaluation may let the collector run
    pub fn is_safepoint_tree(&self, root: NodeId) -> bool {
        let node = &self.nodes[root];
        if node.opcode.can_gc() || node.opcode.is_check() {
            return true;
        }
        if node.opcode.is_treetop() || node.opcode.is_store_direct() {
            if let Some(child) = node.first_child() {
                return self.nodes[child].opcode.can_gc();
            }
        }
        false
    }

    /// Consistency checks over edges, layout, children and symbol references
    pub fn validate(&self) -> AllocResult<()> {
        let num_blocks = self.cfg.num_blocks();
        for (index, block) in self.cfg.blocks.iter().enumerate() {
            if block.number != index {
                return Err(AllocatorError::invalid_method(format!(
                    "block at index {} is numbered {}",
                    index, block.number
                )));
            }
            for &succ in &block.successors {
                if succ >= num_blocks || !self.cfg.block(succ).predecessors.contains(&index) {
                    return Err(AllocatorError::invalid_method(format!(
                        "edge block_{} -> block_{} is not mirrored in predecessors",
                        index, succ
                    )));
                }
            }
            for &pred in &block.predecessors {
                if pred >= num_blocks || !self.cfg.block(pred).successors.contains(&index) {
                    return Err(AllocatorError::invalid_method(format!(
                        "edge block_{} -> block_{} is not mirrored in successors",
                        pred, index
                    )));
                }
            }
            if let Some(prev) = block.extension_of {
                if self.cfg.prev_block(index) != Some(prev) || !block.predecessors.contains(&prev) {
                    return Err(AllocatorError::invalid_method(format!(
                        "block_{} cannot extend block_{}",
                        index, prev
                    )));
                }
            }
            if (index == START || index == END) && !block.treetops.is_empty() {
                return Err(AllocatorError::invalid_method("start and end nodes carry no trees"));
            }
        }

        for (id, node) in self.nodes.iter().enumerate() {
            if let Some(&bad) = node.children.iter().find(|&&c| c >= self.nodes.len()) {
                return Err(AllocatorError::invalid_method(format!(
                    "node {} has out of range child {}",
                    id, bad
                )));
            }
            if node.symref.map(|s| s >= self.symbols.len()).unwrap_or(false) {
                return Err(AllocatorError::invalid_method(format!(
                    "node {} has out of range symbol reference",
                    id
                )));
            }
            if node.opcode.has_symbol_reference() && !node.opcode.is_indirect() && node.symref.is_none() && !node.opcode.is_call() {
                return Err(AllocatorError::invalid_method(format!(
                    "{} node {} needs a symbol reference",
                    node.opcode, id
                )));
            }
        }
        Ok(())
    }
}
