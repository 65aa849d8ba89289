//! Control flow graph
//!
//! Blocks are numbered densely. Block 0 is the method's start node and block 1
//! its end node; neither carries trees. The remaining blocks appear in
//! `layout` in code order, and a block whose `extension_of` names its layout
//! predecessor is a fallthrough extension of it. A maximal chain of such
//! blocks is an extended basic block.

use gra_common::{BlockNumber, BlockSet, LoopId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of the method's start node
pub const START: BlockNumber = 0;

/// Number of the method's end node
pub const END: BlockNumber = 1;

/// Static loop weights stop growing past this nesting depth
const MAX_WEIGHTED_NESTING_DEPTH: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: BlockNumber,
    #[serde(default)]
    pub predecessors: Vec<BlockNumber>,
    #[serde(default)]
    pub successors: Vec<BlockNumber>,
    #[serde(default)]
    pub exception_predecessors: Vec<BlockNumber>,
    #[serde(default)]
    pub exception_successors: Vec<BlockNumber>,
    /// Estimated or profiled execution frequency
    #[serde(default)]
    pub frequency: i32,
    #[serde(default)]
    pub is_cold: bool,
    /// Layout predecessor this block falls through from
    #[serde(default)]
    pub extension_of: Option<BlockNumber>,
    #[serde(default)]
    pub treetops: Vec<NodeId>,
    /// Innermost loop containing this block
    #[serde(default)]
    pub loop_id: Option<LoopId>,
    /// Live-local bit indices live on entry to this block, when computed
    #[serde(default)]
    pub live_locals: Option<BTreeSet<usize>>,
}

impl Block {
    pub fn new(number: BlockNumber) -> Self {
        Self {
            number,
            predecessors: Vec::new(),
            successors: Vec::new(),
            exception_predecessors: Vec::new(),
            exception_successors: Vec::new(),
            frequency: 0,
            is_cold: false,
            extension_of: None,
            treetops: Vec::new(),
            loop_id: None,
            live_locals: None,
        }
    }

    pub fn is_extension(&self) -> bool {
        self.extension_of.is_some()
    }

    /// Reached through an exception edge
    pub fn is_catch_block(&self) -> bool {
        !self.exception_predecessors.is_empty()
    }

    pub fn last_treetop(&self) -> Option<NodeId> {
        self.treetops.last().copied()
    }
}

/// A natural loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub id: LoopId,
    /// Header block
    pub entry: BlockNumber,
    /// All member blocks, nested loops included
    pub blocks: BlockSet,
    #[serde(default)]
    pub parent: Option<LoopId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cfg {
    pub blocks: Vec<Block>,
    /// Code order of the real blocks
    pub layout: Vec<BlockNumber>,
    #[serde(default)]
    pub loops: Vec<Loop>,
}

impl Cfg {
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::new(START), Block::new(END)],
            layout: Vec::new(),
            loops: Vec::new(),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, number: BlockNumber) -> &Block {
        &self.blocks[number]
    }

    pub fn block_mut(&mut self, number: BlockNumber) -> &mut Block {
        &mut self.blocks[number]
    }

    /// Real blocks in layout order
    pub fn blocks_in_layout(&self) -> impl Iterator<Item = &Block> {
        self.layout.iter().map(move |&b| &self.blocks[b])
    }

    /// Blocks entered directly from the method's start node
    pub fn first_blocks(&self) -> &[BlockNumber] {
        &self.blocks[START].successors
    }

    pub fn is_first_block(&self, number: BlockNumber) -> bool {
        self.first_blocks().contains(&number)
    }

    /// The block that receives control on method entry
    pub fn entry_block(&self) -> Option<BlockNumber> {
        self.first_blocks().first().copied()
    }

    pub fn prev_block(&self, number: BlockNumber) -> Option<BlockNumber> {
        let pos = self.layout.iter().position(|&b| b == number)?;
        if pos == 0 {
            None
        } else {
            Some(self.layout[pos - 1])
        }
    }

    pub fn next_block(&self, number: BlockNumber) -> Option<BlockNumber> {
        let pos = self.layout.iter().position(|&b| b == number)?;
        self.layout.get(pos + 1).copied()
    }

    pub fn is_extension(&self, number: BlockNumber) -> bool {
        self.blocks[number].is_extension()
    }

    /// The layout successor if it extends `number`
    pub fn next_extension(&self, number: BlockNumber) -> Option<BlockNumber> {
        self.next_block(number)
            .filter(|&next| self.blocks[next].extension_of == Some(number))
    }

    /// First block of the extended block containing `number`
    pub fn start_of_extended_block(&self, number: BlockNumber) -> BlockNumber {
        let mut current = number;
        while let Some(prev) = self.blocks[current].extension_of {
            current = prev;
        }
        current
    }

    /// All blocks of the extended block containing `number`, in layout order
    pub fn extended_block(&self, number: BlockNumber) -> Vec<BlockNumber> {
        let mut chain = vec![self.start_of_extended_block(number)];
        while let Some(next) = chain.last().and_then(|&b| self.next_extension(b)) {
            chain.push(next);
        }
        chain
    }

    /// Union of the successors of every block in the extended block
    pub fn extended_block_successors(&self, number: BlockNumber) -> BlockSet {
        self.extended_block(number)
            .into_iter()
            .flat_map(|b| self.blocks[b].successors.iter().copied())
            .collect()
    }

    pub fn containing_loop(&self, number: BlockNumber) -> Option<&Loop> {
        self.blocks[number].loop_id.map(|id| &self.loops[id])
    }

    pub fn loop_by_id(&self, id: LoopId) -> &Loop {
        &self.loops[id]
    }

    pub fn nesting_depth(&self, number: BlockNumber) -> u32 {
        let mut depth = 0;
        let mut current = self.blocks[number].loop_id;
        while let Some(id) = current {
            depth += 1;
            current = self.loops[id].parent;
        }
        depth
    }

    /// Whether `number` is the header of its innermost loop
    pub fn is_loop_header(&self, number: BlockNumber) -> bool {
        self.containing_loop(number)
            .map(|l| l.entry == number)
            .unwrap_or(false)
    }

    /// Blocks outside `id` that are entered from inside it
    pub fn loop_exit_targets(&self, id: LoopId) -> BlockSet {
        let lp = &self.loops[id];
        lp.blocks
            .iter()
            .flat_map(|&b| self.blocks[b].successors.iter().copied())
            .filter(|s| !lp.blocks.contains(s))
            .collect()
    }

    /// Relative execution weight of a block: its profiled frequency, or a
    /// power of ten per loop nesting level
    pub fn structure_weight(&self, number: BlockNumber, uses_profiling: bool) -> i64 {
        if uses_profiling {
            return i64::from(self.blocks[number].frequency.max(1));
        }
        10i64.pow(self.nesting_depth(number).min(MAX_WEIGHTED_NESTING_DEPTH))
    }

    /// Blocks entered through an exception edge
    pub fn catch_blocks(&self) -> BlockSet {
        self.blocks
            .iter()
            .filter(|b| b.is_catch_block())
            .map(|b| b.number)
            .collect()
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}
