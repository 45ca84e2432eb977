//! Exception handler candidates and dispatch chains.

use bcmap_bytecode::{BytecodeStream, ExceptionHandler};
use tracing::trace;

use crate::bitset::BitSet;
use crate::block::{Block, BlockGraph, BlockId};
use crate::block_table::BlockTable;
use crate::error::Result;

/// Handler candidates per bci and the entry block of every handler.
#[derive(Clone, Debug, Default)]
pub struct ExceptionDispatch {
    handlers: Vec<ExceptionHandler>,
    /// Candidate handler ids per instruction start; `None` elsewhere.
    bci_handler_ids: Vec<Option<BitSet>>,
    /// Entry block per handler id, `None` once dropped as unreachable.
    handler_blocks: Vec<Option<BlockId>>,
    dispatch_blocks: usize,
}

impl ExceptionDispatch {
    /// Compute handler candidates for every instruction of `stream`.
    ///
    /// Handlers are walked from last to first. A catch-all drops every
    /// candidate declared after it, since those can never be reached.
    pub fn new(stream: &mut impl BytecodeStream, handlers: &[ExceptionHandler]) -> Self {
        if handlers.is_empty() {
            return Self::default();
        }
        let code_size = stream.code_size();
        let mut bci_handler_ids: Vec<Option<BitSet>> = vec![None; code_size];
        stream.set_bci(0);
        while stream.current_bc().is_some() {
            bci_handler_ids[stream.current_bci()] = Some(BitSet::new());
            stream.advance();
        }

        for (handler_id, handler) in handlers.iter().enumerate().rev() {
            let end = handler.end_bci.min(code_size);
            for ids in bci_handler_ids[handler.start_bci.min(end)..end]
                .iter_mut()
                .flatten()
            {
                if handler.is_catch_all() {
                    ids.clear();
                }
                ids.insert(handler_id);
            }
        }

        Self {
            handlers: handlers.to_vec(),
            bci_handler_ids,
            handler_blocks: Vec::new(),
            dispatch_blocks: 0,
        }
    }

    #[must_use]
    pub const fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    #[must_use]
    pub fn handlers(&self) -> &[ExceptionHandler] {
        &self.handlers
    }

    /// Candidate handler ids for the instruction at `bci`.
    #[must_use]
    pub fn handler_ids(&self, bci: usize) -> Option<&BitSet> {
        self.bci_handler_ids.get(bci).and_then(Option::as_ref)
    }

    /// Entry block of handler `handler_id`.
    #[must_use]
    pub fn handler_block(&self, handler_id: usize) -> Option<BlockId> {
        self.handler_blocks.get(handler_id).copied().flatten()
    }

    /// Number of dispatch blocks created so far.
    #[must_use]
    pub const fn dispatch_blocks(&self) -> usize {
        self.dispatch_blocks
    }

    /// First instruction start at or after `bci`, or the code size.
    #[must_use]
    pub fn find_concrete_bci(&self, bci: usize) -> usize {
        (bci..self.bci_handler_ids.len())
            .find(|&current| self.bci_handler_ids[current].is_some())
            .unwrap_or(self.bci_handler_ids.len())
    }

    /// Start a block at every handler entry and mark it as an exception entry.
    ///
    /// With `split_ranges`, blocks also start at the first instruction of
    /// each covered range and right after it.
    ///
    /// # Errors
    ///
    /// Fails for handler bcis that do not fit in an `i32`.
    pub fn make_exception_entries(
        &mut self,
        graph: &mut BlockGraph,
        table: &mut BlockTable,
        split_ranges: bool,
    ) -> Result<()> {
        for handler in &self.handlers {
            let entry = table.make_block_at(graph, handler.handler_bci)?;
            graph.get_mut(entry).set_exception_entry();
            self.handler_blocks.push(Some(entry));

            if split_ranges {
                let start_bci = self.find_concrete_bci(handler.start_bci);
                if start_bci < self.bci_handler_ids.len() {
                    table.make_block_at(graph, start_bci)?;
                }
                let end_bci = self.find_concrete_bci(handler.end_bci);
                if end_bci < self.bci_handler_ids.len() {
                    table.make_block_at(graph, end_bci)?;
                }
            }
        }
        Ok(())
    }

    /// Build the dispatch chain for an exception thrown at `bci`.
    ///
    /// Candidates are linked from the highest id down, so the head checks
    /// the first declared handler. Each link branches to its handler entry
    /// first and to the next, lower priority link second. Returns `None`
    /// when no handler covers `bci`.
    ///
    /// # Errors
    ///
    /// Fails if a handler id or bci does not fit in an `i32`.
    pub fn handle_exceptions(
        &mut self,
        graph: &mut BlockGraph,
        bci: usize,
    ) -> Result<Option<BlockId>> {
        let Some(ids) = self.handler_ids(bci) else {
            return Ok(None);
        };
        let mut last: Option<BlockId> = None;
        let candidates: Vec<usize> = ids.iter().collect();
        for &handler_id in candidates.iter().rev() {
            let Some(entry) = self.handler_block(handler_id) else {
                continue;
            };
            let handler = self.handlers[handler_id].clone();
            let link = graph.push(Block::dispatch(handler, handler_id, bci)?);
            graph.add_successor(link, entry);
            if let Some(next) = last {
                graph.add_successor(link, next);
            }
            self.dispatch_blocks += 1;
            last = Some(link);
        }
        if let Some(head) = last {
            trace!(bci, chain = candidates.len(), head = %head, "exception dispatch");
        }
        Ok(last)
    }

    /// Rewrite handler entry blocks through `remap`.
    pub(crate) fn remap(&mut self, remap: &[Option<BlockId>]) {
        for entry in &mut self.handler_blocks {
            *entry = entry.and_then(|id| remap[id.index()]);
        }
    }
}
