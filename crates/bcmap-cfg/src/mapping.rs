//! Block map construction and queries.

use std::fmt;

use bcmap_bytecode::{BytecodeStream, ExceptionHandler, MethodCode};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, trace_span};

use crate::bitset::BitSet;
use crate::block::{AFTER_EXCEPTION_BCI, Block, BlockGraph, BlockId};
use crate::block_table::BlockTable;
use crate::error::{Bailout, BlockMapError, Result};
use crate::exception::ExceptionDispatch;
use crate::jsr::JsrExpander;
use crate::options::BlockMapOptions;
use crate::order::BlockOrderer;
use crate::scanner::LinearScanner;

/// Basic block structure of one method.
///
/// Blocks are stored in their final order: loop bodies follow their header
/// contiguously, ids equal positions, and the unwind dispatch block is last.
#[derive(Clone, Debug)]
pub struct BlockMap {
    blocks: Vec<Block>,
    start_block: BlockId,
    loop_headers: Vec<BlockId>,
    /// Per-bci owner, dropped by [`Self::clear_liveness_metadata`].
    table: Option<BlockTable>,
    exceptions: Option<ExceptionDispatch>,
}

impl BlockMap {
    /// Build the block map of `method`.
    ///
    /// # Errors
    ///
    /// Returns a [`BlockMapError::Bailout`] for unsupported constructs and
    /// other variants for malformed input.
    pub fn build_method(method: &MethodCode, options: &BlockMapOptions) -> Result<Self> {
        let _span = trace_span!("block_map", method = %method.name).entered();
        let mut stream = method.stream()?;
        Self::build(&mut stream, &method.exception_handlers, options)
    }

    /// Build the block map for the code behind `stream`.
    ///
    /// # Errors
    ///
    /// Returns a [`BlockMapError::Bailout`] for unsupported constructs and
    /// other variants for malformed input.
    pub fn build(
        stream: &mut impl BytecodeStream,
        handlers: &[ExceptionHandler],
        options: &BlockMapOptions,
    ) -> Result<Self> {
        let mut graph = BlockGraph::new();
        let mut table = BlockTable::new(stream.code_size());
        let mut exceptions = ExceptionDispatch::new(stream, handlers);

        let scan = {
            let _span = trace_span!("scan").entered();
            exceptions.make_exception_entries(
                &mut graph,
                &mut table,
                options.split_exception_ranges,
            )?;
            LinearScanner::new(&mut graph, &mut table, &mut exceptions).scan(stream)?
        };

        let start = table.get(0).ok_or(BlockMapError::OutOfBoundsTarget { bci: 0 })?;

        if scan.has_jsr_bytecodes {
            if !options.support_jsr_bytecodes {
                return Err(Bailout::JsrDisabled.into());
            }
            let _span = trace_span!("jsr").entered();
            JsrExpander::new(&mut graph, &table).expand(start)?;
        }

        let order = {
            let _span = trace_span!("order").entered();
            BlockOrderer::new(&mut graph, options).compute(start)?
        };

        let remap = final_ids(graph.len(), &order.blocks);
        let copies = first_copies(&graph, &order.blocks);
        table.remap(&remap, |id| {
            let block = graph.get(id);
            copies.get(&(block.start_bci(), block.end_bci())).copied()
        });
        exceptions.remap(&remap);
        let mut map = Self::compact(graph, &order.blocks, &remap)?;
        map.start_block = remap[start.index()].unwrap_or(start);
        map.loop_headers = order
            .loop_headers
            .iter()
            .filter_map(|id| remap[id.index()])
            .collect();
        map.table = Some(table);
        map.exceptions = Some(exceptions);
        debug!(
            blocks = map.blocks.len(),
            loops = map.loop_headers.len(),
            duplicates = order.duplicates,
            "block map"
        );
        debug_assert!(map.verify().is_ok());
        Ok(map)
    }

    /// Move the ordered blocks out of the arena, renumbering edges, and
    /// append the unwind block. Unreached blocks are dropped.
    fn compact(
        graph: BlockGraph,
        order: &[BlockId],
        remap: &[Option<BlockId>],
    ) -> Result<Self> {
        let count = order.len() + 1;
        let block_id = |position: usize| {
            i32::try_from(position).map_err(|_| BlockMapError::TooManyBlocks { count })
        };
        let renumber = |id: BlockId| remap[id.index()].unwrap_or(id);
        let mut slots: Vec<Option<Block>> = graph.into_blocks().into_iter().map(Some).collect();
        let mut blocks = Vec::with_capacity(count);
        for &id in order {
            let Some(mut block) = slots[id.index()].take() else {
                continue;
            };
            block.id = block_id(blocks.len())?;
            block.renumber(renumber);
            blocks.push(block);
        }

        let mut unwind = Block::unwind(AFTER_EXCEPTION_BCI);
        unwind.id = block_id(blocks.len())?;
        blocks.push(unwind);

        Ok(Self {
            blocks,
            start_block: BlockId::new(0),
            loop_headers: Vec::new(),
            table: None,
            exceptions: None,
        })
    }

    /// Blocks in final order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Block containing bci 0.
    #[must_use]
    pub const fn start_block(&self) -> BlockId {
        self.start_block
    }

    /// Method-level unwind dispatch block (always last).
    #[must_use]
    pub const fn unwind_block(&self) -> BlockId {
        BlockId::new(self.blocks.len() - 1)
    }

    /// Header block of each loop, indexed by loop id.
    #[must_use]
    pub fn loop_headers(&self) -> &[BlockId] {
        &self.loop_headers
    }

    #[must_use]
    pub fn loop_header(&self, loop_id: usize) -> Option<BlockId> {
        self.loop_headers.get(loop_id).copied()
    }

    #[must_use]
    pub const fn loop_count(&self) -> usize {
        self.loop_headers.len()
    }

    /// Block owning the instruction at `bci`.
    ///
    /// When the scanned block was not reached but a copy of it was (a jsr
    /// copy or a handler entry duplicate), the first copy in block order is
    /// returned. `None` for bcis that are not reached instruction starts,
    /// and after [`Self::clear_liveness_metadata`].
    #[must_use]
    pub fn block_at_bci(&self, bci: usize) -> Option<BlockId> {
        self.table.as_ref()?.get(bci)
    }

    /// Handler candidates for the instruction at `bci`, in priority order.
    #[must_use]
    pub fn bci_exception_handler_ids(&self, bci: usize) -> Option<&BitSet> {
        self.exceptions.as_ref()?.handler_ids(bci)
    }

    /// Entry block of handler `handler_id`.
    #[must_use]
    pub fn handler_block(&self, handler_id: usize) -> Option<BlockId> {
        self.exceptions.as_ref()?.handler_block(handler_id)
    }

    /// Drop the per-bci data once liveness analysis no longer needs it.
    pub fn clear_liveness_metadata(&mut self) {
        self.table = None;
        self.exceptions = None;
    }

    /// Check if every block maps its bci range one-to-one.
    #[must_use]
    pub fn bci_unique(&self) -> bool {
        self.blocks.iter().all(Block::bci_unique)
    }

    /// Block `id`, which must cover instructions.
    ///
    /// # Errors
    ///
    /// Fails for branch targets outside the code array.
    pub fn instruction_block(&self, id: BlockId) -> Result<&Block> {
        let block = self.block(id);
        if block.is_out_of_bounds() {
            return Err(BlockMapError::OutOfBoundsTarget {
                bci: block.start_bci(),
            });
        }
        debug_assert!(block.is_instruction_block());
        Ok(block)
    }

    /// Check structural invariants: ids match positions and a dispatch
    /// successor, if any, is last.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation.
    pub fn verify(&self) -> std::result::Result<(), String> {
        for (position, block) in self.blocks.iter().enumerate() {
            if usize::try_from(block.id()).ok() != Some(position) {
                return Err(format!("{block} is stored at position {position}"));
            }
            for (index, &successor) in block.successors().iter().enumerate() {
                if self.block(successor).is_exception_dispatch()
                    && index + 1 != block.successor_count()
                {
                    return Err(format!("{block} has a dispatch successor before the last slot"));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for BlockMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "B{}[{}..{}]", block.id(), block.start_bci(), block.end_bci())?;
            if block.is_loop_header() {
                f.write_str(" LoopHeader")?;
            }
            if block.is_exception_entry() {
                f.write_str(" ExceptionEntry")?;
            }
            if block.is_exception_dispatch() {
                f.write_str(" ExceptionDispatch")?;
            }
            if !block.successors().is_empty() {
                let successors: Vec<String> =
                    block.successors().iter().map(ToString::to_string).collect();
                write!(f, " Successors=[{}]", successors.join(", "))?;
            }
            if !block.loops().is_empty() {
                let loops: Vec<String> = block
                    .loops()
                    .iter()
                    .filter_map(|loop_id| self.loop_header(loop_id))
                    .map(|header| header.to_string())
                    .collect();
                write!(f, " Loops=[{}]", loops.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Arena index -> position in `order`, for an arena of `len` blocks.
fn final_ids(len: usize, order: &[BlockId]) -> Vec<Option<BlockId>> {
    let mut remap = vec![None; len];
    for (position, &id) in order.iter().enumerate() {
        remap[id.index()] = Some(BlockId::new(position));
    }
    remap
}

/// Final id of the first reached instruction block per `(start, end)` bci range.
fn first_copies(graph: &BlockGraph, order: &[BlockId]) -> FxHashMap<(i32, i32), BlockId> {
    let mut copies = FxHashMap::default();
    for (position, &id) in order.iter().enumerate() {
        let block = graph.get(id);
        if block.is_instruction_block() {
            copies
                .entry((block.start_bci(), block.end_bci()))
                .or_insert(BlockId::new(position));
        }
    }
    copies
}

/// Build the block maps of independent methods in parallel.
///
/// Results are returned in input order.
#[must_use]
pub fn build_all(methods: &[MethodCode], options: &BlockMapOptions) -> Vec<Result<BlockMap>> {
    methods
        .par_iter()
        .map(|method| BlockMap::build_method(method, options))
        .collect()
}
