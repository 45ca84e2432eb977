//! Per-bci block lookup used while scanning.

use rustc_hash::FxHashMap;

use crate::block::{Block, BlockGraph, BlockId, signed_bci};
use crate::error::Result;

/// Maps each bci to the block owning it.
///
/// Only instruction starts that have been reached get an entry. Branch
/// targets outside the code array get dedicated out-of-bounds blocks,
/// memoized per target.
#[derive(Clone, Debug)]
pub struct BlockTable {
    blocks: Vec<Option<BlockId>>,
    out_of_bounds: FxHashMap<i32, BlockId>,
}

impl BlockTable {
    #[must_use]
    pub fn new(code_size: usize) -> Self {
        Self {
            blocks: vec![None; code_size],
            out_of_bounds: FxHashMap::default(),
        }
    }

    #[must_use]
    pub const fn code_size(&self) -> usize {
        self.blocks.len()
    }

    /// Block owning `bci`, if any.
    #[must_use]
    pub fn get(&self, bci: usize) -> Option<BlockId> {
        self.blocks.get(bci).copied().flatten()
    }

    pub(crate) fn set(&mut self, bci: usize, id: BlockId) {
        self.blocks[bci] = Some(id);
    }

    /// Blocks created for out-of-range targets.
    pub fn out_of_bounds_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.out_of_bounds.values().copied()
    }

    /// Distinct blocks in the table, in bci order.
    #[must_use]
    pub fn distinct_blocks(&self) -> Vec<BlockId> {
        let mut result: Vec<BlockId> = Vec::new();
        for id in self.blocks.iter().flatten() {
            if result.last() != Some(id) {
                result.push(*id);
            }
        }
        result
    }

    /// Get or create the block starting at `bci`.
    ///
    /// A `bci` inside an existing block splits it: the tail becomes a new
    /// block that takes over the original's end and successors, and the
    /// original falls through to it.
    pub fn make_block(&mut self, graph: &mut BlockGraph, bci: i32) -> BlockId {
        let Ok(index) = usize::try_from(bci) else {
            return self.out_of_bounds_block(graph, bci);
        };
        if index >= self.blocks.len() {
            return self.out_of_bounds_block(graph, bci);
        }
        let Some(old) = self.blocks[index] else {
            let id = graph.push(Block::instruction(bci));
            self.blocks[index] = Some(id);
            return id;
        };
        if graph.get(old).start_bci() == bci {
            return old;
        }

        debug_assert!(graph.get(old).is_instruction_block());
        let end_bci = graph.get(old).end_bci();
        let end = usize::try_from(end_bci).unwrap_or(index);
        let mut tail = Block::instruction(bci);
        tail.set_end_bci(end_bci);
        let tail = graph.push(tail);
        let successors = graph.get(old).successors().to_vec();
        for successor in successors {
            graph.add_successor(tail, successor);
        }
        graph.get_mut(old).set_end_bci(bci - 1);
        graph.clear_successors(old);
        graph.add_successor(old, tail);
        for slot in &mut self.blocks[index..=end] {
            if slot.is_some() {
                *slot = Some(tail);
            }
        }
        tail
    }

    /// [`Self::make_block`] for an unsigned code position.
    ///
    /// # Errors
    ///
    /// Fails if `bci` does not fit in an `i32`.
    pub fn make_block_at(&mut self, graph: &mut BlockGraph, bci: usize) -> Result<BlockId> {
        Ok(self.make_block(graph, signed_bci(bci)?))
    }

    fn out_of_bounds_block(&mut self, graph: &mut BlockGraph, bci: i32) -> BlockId {
        *self
            .out_of_bounds
            .entry(bci)
            .or_insert_with(|| graph.push(Block::out_of_bounds(bci)))
    }

    /// Rewrite every entry through `remap`.
    ///
    /// An entry whose block was dropped is handed to `fallback`, which may
    /// name another kept block covering the same instructions (a jsr copy or
    /// a duplicate); otherwise the entry is cleared.
    pub(crate) fn remap(
        &mut self,
        remap: &[Option<BlockId>],
        fallback: impl Fn(BlockId) -> Option<BlockId>,
    ) {
        for slot in &mut self.blocks {
            *slot = slot.and_then(|id| remap[id.index()].or_else(|| fallback(id)));
        }
        self.out_of_bounds
            .retain(|_, id| remap[id.index()].is_some());
        for id in self.out_of_bounds.values_mut() {
            if let Some(new) = remap[id.index()] {
                *id = new;
            }
        }
    }
}
