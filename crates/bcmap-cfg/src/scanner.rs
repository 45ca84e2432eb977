//! Linear scan creating blocks and wiring successor edges.

use std::collections::BTreeSet;

use bcmap_bytecode::opcodes::{
    ATHROW, BREAKPOINT, GOTO, GOTO_W, JSR, JSR_W, RET, can_trap, is_conditional_branch,
    is_defined, is_invoke, is_return, is_switch,
};
use bcmap_bytecode::{BytecodeStream, BytecodeSwitch};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::block::{BlockGraph, BlockId, signed_bci};
use crate::block_table::BlockTable;
use crate::error::{Bailout, BlockMapError, Result};
use crate::exception::ExceptionDispatch;

/// Scan summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// A jsr was seen, so subroutines need expanding.
    pub has_jsr_bytecodes: bool,
    /// Handler entries duplicated for normal control flow.
    pub handler_duplicates: usize,
}

/// Single forward pass over the bytecode.
pub struct LinearScanner<'a> {
    graph: &'a mut BlockGraph,
    table: &'a mut BlockTable,
    exceptions: &'a mut ExceptionDispatch,
    has_jsr_bytecodes: bool,
    /// A handler entry was reached through normal control flow.
    unresolved_handler_reachability: bool,
}

impl<'a> LinearScanner<'a> {
    pub fn new(
        graph: &'a mut BlockGraph,
        table: &'a mut BlockTable,
        exceptions: &'a mut ExceptionDispatch,
    ) -> Self {
        Self {
            graph,
            table,
            exceptions,
            has_jsr_bytecodes: false,
            unresolved_handler_reachability: false,
        }
    }

    /// Scan `stream` and resolve shared handler entries.
    ///
    /// # Errors
    ///
    /// Fails on undefined opcodes and jsr to bci 0.
    pub fn scan(mut self, stream: &mut impl BytecodeStream) -> Result<ScanResult> {
        self.iterate_over_bytecodes(stream)?;
        let handler_duplicates = self.resolve_exception_handler_reachability()?;
        debug!(
            blocks = self.graph.len(),
            dispatch = self.exceptions.dispatch_blocks(),
            handler_duplicates,
            jsr = self.has_jsr_bytecodes,
            "linear scan"
        );
        Ok(ScanResult {
            has_jsr_bytecodes: self.has_jsr_bytecodes,
            handler_duplicates,
        })
    }

    fn iterate_over_bytecodes(&mut self, stream: &mut impl BytecodeStream) -> Result<()> {
        let mut current: Option<BlockId> = None;
        // Bci of the previous instruction, the end of `current`.
        let mut previous_bci = 0;
        stream.set_bci(0);
        while let Some(opcode) = stream.current_bc() {
            let bci = stream.current_bci();

            let open = match current {
                Some(block) if self.table.get(bci).is_none() => block,
                _ => {
                    let block = self.table.make_block_at(self.graph, bci)?;
                    if current.is_some() {
                        self.add_successor(previous_bci, block);
                    }
                    block
                }
            };
            self.table.set(bci, open);
            let block = self.instruction_block(bci)?;
            self.graph.get_mut(block).set_end_bci(signed_bci(bci)?);
            current = Some(block);
            previous_bci = bci;

            match opcode {
                _ if is_return(opcode) => current = None,
                ATHROW => {
                    current = None;
                    if let Some(handler) = self.exceptions.handle_exceptions(self.graph, bci)? {
                        self.add_successor(bci, handler);
                    }
                }
                _ if is_conditional_branch(opcode) => {
                    current = None;
                    let taken = self.table.make_block(self.graph, stream.read_branch_dest());
                    self.add_successor(bci, taken);
                    let fall_through = self.table.make_block_at(self.graph, stream.next_bci())?;
                    self.add_successor(bci, fall_through);
                }
                GOTO | GOTO_W => {
                    current = None;
                    let target = self.table.make_block(self.graph, stream.read_branch_dest());
                    self.add_successor(bci, target);
                }
                _ if is_switch(opcode) => {
                    current = None;
                    if let Some(switch) = stream.read_switch() {
                        self.add_switch_successors(bci, &switch);
                    }
                }
                JSR | JSR_W => {
                    self.has_jsr_bytecodes = true;
                    let target = stream.read_branch_dest();
                    if target == 0 {
                        return Err(Bailout::JsrTargetZero.into());
                    }
                    let entry = self.table.make_block(self.graph, target);
                    let block = self.instruction_block(bci)?;
                    let data = self.graph.get_mut(block).jsr_data_mut();
                    data.jsr_successor = Some(entry);
                    data.jsr_return_bci = Some(stream.next_bci());
                    current = None;
                    self.add_successor(bci, entry);
                }
                RET => {
                    self.graph.get_mut(block).jsr_data_mut().ends_with_ret = true;
                    current = None;
                }
                _ if is_invoke(opcode) => {
                    current = None;
                    let next = self.table.make_block_at(self.graph, stream.next_bci())?;
                    self.add_successor(bci, next);
                    if let Some(handler) = self.exceptions.handle_exceptions(self.graph, bci)? {
                        self.add_successor(bci, handler);
                    }
                }
                _ if can_trap(opcode) => {
                    if let Some(handler) = self.exceptions.handle_exceptions(self.graph, bci)? {
                        current = None;
                        let next = self.table.make_block_at(self.graph, stream.next_bci())?;
                        self.add_successor(bci, next);
                        self.add_successor(bci, handler);
                    }
                }
                _ if opcode == BREAKPOINT || !is_defined(opcode) => {
                    return Err(BlockMapError::UnhandledBytecode { opcode, bci });
                }
                _ => {}
            }
            stream.advance();
        }
        Ok(())
    }

    /// Block owning the instruction at `bci`.
    fn instruction_block(&self, bci: usize) -> Result<BlockId> {
        match self.table.get(bci) {
            Some(id) if self.graph.get(id).is_instruction_block() => Ok(id),
            _ => Err(BlockMapError::OutOfBoundsTarget {
                bci: signed_bci(bci)?,
            }),
        }
    }

    /// Add an edge from the block currently owning `bci`.
    ///
    /// The owner is looked up again because making the target block may
    /// have split the block the instruction was scanned into.
    fn add_successor(&mut self, bci: usize, successor: BlockId) {
        if self.graph.get(successor).is_exception_entry() {
            self.unresolved_handler_reachability = true;
        }
        if let Some(predecessor) = self.table.get(bci) {
            self.graph.add_successor(predecessor, successor);
        }
    }

    /// Add each distinct switch target once, in ascending bci order.
    fn add_switch_successors(&mut self, bci: usize, switch: &BytecodeSwitch) {
        let mut targets: BTreeSet<i32> = (0..switch.number_of_cases())
            .map(|index| switch.target_at(index))
            .collect();
        targets.insert(switch.default_target());
        for target in targets {
            let block = self.table.make_block(self.graph, target);
            self.add_successor(bci, block);
        }
    }

    /// Give normal control flow its own copy of every handler entry it
    /// reaches. Dispatch blocks keep the original entries.
    fn resolve_exception_handler_reachability(&mut self) -> Result<usize> {
        if !self.unresolved_handler_reachability {
            return Ok(0);
        }
        debug_assert!(self.exceptions.has_handlers());

        let mut duplicates: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        for block in self.table.distinct_blocks() {
            for index in 0..self.graph.get(block).successor_count() {
                let successor = self.graph.get(block).successor(index);
                if !self.graph.get(successor).is_exception_entry() {
                    continue;
                }
                let dup = match duplicates.get(&successor) {
                    Some(&dup) => dup,
                    None => {
                        let dup = self.graph.duplicate_as_non_exception_entry(successor)?;
                        trace!(entry = %successor, dup = %dup, "handler entry shared with normal flow");
                        duplicates.insert(successor, dup);
                        dup
                    }
                };
                self.graph.replace_successor(block, index, dup);
                if let Some(&own) = duplicates.get(&block) {
                    self.graph.replace_successor(own, index, dup);
                }
            }
        }
        Ok(duplicates.len())
    }
}

#[cfg(test)]
mod tests {
    use bcmap_bytecode::opcodes::{GOTO, IFEQ, ILOAD_0, NOP, RETURN};
    use bcmap_bytecode::{Assembler, ByteStream, ExceptionHandler};

    use super::*;

    struct Scanned {
        graph: BlockGraph,
        table: BlockTable,
        result: ScanResult,
    }

    fn scan(code: &[u8], handlers: &[ExceptionHandler]) -> Result<Scanned> {
        let mut stream = ByteStream::new(code).unwrap();
        let mut graph = BlockGraph::new();
        let mut table = BlockTable::new(code.len());
        let mut exceptions = ExceptionDispatch::new(&mut stream, handlers);
        exceptions.make_exception_entries(&mut graph, &mut table, false)?;
        let result = LinearScanner::new(&mut graph, &mut table, &mut exceptions).scan(&mut stream)?;
        Ok(Scanned {
            graph,
            table,
            result,
        })
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let scanned = scan(&[NOP, NOP, RETURN], &[]).unwrap();
        let block = scanned.table.get(0).unwrap();
        assert_eq!(scanned.graph.len(), 1);
        assert_eq!(scanned.table.get(2), Some(block));
        assert_eq!(scanned.graph.get(block).end_bci(), 2);
        assert!(scanned.graph.get(block).successors().is_empty());
    }

    #[test]
    fn test_backward_branch_splits() {
        let mut asm = Assembler::new();
        asm.op(NOP);
        let top = asm.here();
        asm.op(ILOAD_0).branch(IFEQ, top).op(RETURN);
        let code = asm.finish().unwrap();

        let scanned = scan(&code, &[]).unwrap();
        let head = scanned.table.get(0).unwrap();
        let tail = scanned.table.get(1).unwrap();
        assert_ne!(head, tail);
        assert_eq!(scanned.graph.get(head).end_bci(), 0);
        assert_eq!(scanned.graph.get(head).successors(), &[tail]);
        assert_eq!(scanned.table.get(2), Some(tail));
        let exit = scanned.table.get(5).unwrap();
        assert_eq!(scanned.graph.get(tail).successors(), &[tail, exit]);
        assert_eq!(scanned.graph.get(tail).predecessor_count(), 2);
    }

    #[test]
    fn test_undefined_opcode() {
        assert_eq!(
            scan(&[NOP, 0xfe], &[]).err(),
            Some(BlockMapError::UnhandledBytecode {
                opcode: 0xfe,
                bci: 1
            })
        );
    }

    #[test]
    fn test_jsr_to_zero_bails_out() {
        let code = [NOP, JSR, 0xff, 0xff, RETURN];
        let err = scan(&code, &[]).err().unwrap();
        assert_eq!(err.bailout(), Some(&Bailout::JsrTargetZero));
    }

    #[test]
    fn test_handler_entry_reached_by_goto_is_duplicated() {
        let mut asm = Assembler::new();
        let handler = asm.label();
        asm.op(NOP).branch(GOTO, handler);
        asm.bind(handler).op(RETURN);
        let code = asm.finish().unwrap();

        let scanned = scan(&code, &[ExceptionHandler::catch_all(0, 1, 4)]).unwrap();
        assert_eq!(scanned.result.handler_duplicates, 1);
        let entry = scanned.table.get(4).unwrap();
        let start = scanned.table.get(0).unwrap();
        let target = scanned.graph.get(start).successor(0);
        assert_ne!(target, entry);
        assert!(scanned.graph.get(target).is_duplicate());
        assert!(!scanned.graph.get(target).is_exception_entry());
        assert!(scanned.graph.get(entry).is_exception_entry());
        assert_eq!(scanned.graph.get(entry).predecessor_count(), 0);
    }
}
