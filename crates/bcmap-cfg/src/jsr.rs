//! Subroutine (jsr/ret) expansion.
//!
//! Every block reachable inside a subroutine gets one copy per calling
//! context, so that each `ret` has a single static continuation.

use std::fmt;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::block::{BlockGraph, BlockId, signed_bci};
use crate::block_table::BlockTable;
use crate::error::{Bailout, BlockMapError, Result};

/// Stack of active subroutine calls, outermost first.
///
/// Each frame is the bci a `ret` returns to and the subroutine's entry block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct JsrScope {
    frames: Vec<(usize, BlockId)>,
}

impl JsrScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub const fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Scope entered by calling `entry` with return address `return_bci`.
    #[must_use]
    pub fn push(&self, return_bci: usize, entry: BlockId) -> Self {
        let mut frames = self.frames.clone();
        frames.push((return_bci, entry));
        Self { frames }
    }

    /// Scope after returning from the innermost subroutine.
    #[must_use]
    pub fn pop(&self) -> Self {
        let mut frames = self.frames.clone();
        frames.pop();
        Self { frames }
    }

    /// Return address of the innermost subroutine.
    #[must_use]
    pub fn next_return_address(&self) -> Option<usize> {
        self.frames.last().map(|&(return_bci, _)| return_bci)
    }

    /// Entry block of the innermost subroutine.
    #[must_use]
    pub fn entry_block(&self) -> Option<BlockId> {
        self.frames.last().map(|&(_, entry)| entry)
    }

    /// Check if `entry` is being executed in this scope (recursive call).
    #[must_use]
    pub fn contains_entry(&self, entry: BlockId) -> bool {
        self.frames.iter().any(|&(_, frame_entry)| frame_entry == entry)
    }

    /// Check if `other` starts with all frames of `self`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.frames.starts_with(&self.frames)
    }
}

impl fmt::Display for JsrScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (return_bci, entry)) in self.frames.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{return_bci}@{entry}")?;
        }
        f.write_str("]")
    }
}

/// Jsr expansion over a scanned block graph.
pub struct JsrExpander<'a> {
    graph: &'a mut BlockGraph,
    table: &'a BlockTable,
    visited: FxHashSet<BlockId>,
    copies: usize,
}

impl<'a> JsrExpander<'a> {
    pub fn new(graph: &'a mut BlockGraph, table: &'a BlockTable) -> Self {
        Self {
            graph,
            table,
            visited: FxHashSet::default(),
            copies: 0,
        }
    }

    /// Expand subroutines reachable from `start`. Returns the number of copies made.
    ///
    /// # Errors
    ///
    /// Bails out on unstructured jsr/ret usage.
    pub fn expand(mut self, start: BlockId) -> Result<usize> {
        // Each frame is a block whose successors are being walked.
        let mut stack: Vec<(BlockId, usize)> = Vec::new();
        if self.enter(start)? {
            stack.push((start, 0));
        }

        while let Some(frame) = stack.last_mut() {
            let (block, index) = *frame;
            if index >= self.graph.get(block).successor_count() {
                stack.pop();
                continue;
            }
            frame.1 += 1;
            let successor = self.graph.get(block).successor(index);
            let scope = self.graph.get(block).jsr_scope();
            if !self.visited.contains(&successor)
                && self.should_follow_edge(successor, &scope)
                && self.enter(successor)?
            {
                stack.push((successor, 0));
            }
        }

        debug!(copies = self.copies, "jsr expansion");
        Ok(self.copies)
    }

    /// Wire the ret edge of `block` and redirect its successors to the
    /// copies for their scope.
    ///
    /// Returns `false` when the walk must not continue below `block`: a
    /// recursive subroutine call stops expansion there.
    fn enter(&mut self, block: BlockId) -> Result<bool> {
        self.visited.insert(block);
        let scope = self.graph.get(block).jsr_scope();

        if self.graph.get(block).ends_with_ret() {
            let ret_bci = self.graph.get(block).end_bci();
            let return_bci = scope
                .next_return_address()
                .ok_or(Bailout::RetOutsideSubroutine { bci: ret_bci })?;
            let Some(ret_successor) = self.table.get(return_bci) else {
                return Err(BlockMapError::OutOfBoundsTarget {
                    bci: signed_bci(return_bci)?,
                });
            };
            self.graph.get_mut(block).jsr_data_mut().ret_successor = Some(ret_successor);
            self.graph.add_successor(block, ret_successor);
            debug_assert_ne!(Some(ret_successor), self.graph.get(block).jsr_successor());
        }
        trace!(
            block = %self.graph.get(block),
            scope = %scope,
            jsr = ?self.graph.get(block).jsr_successor(),
            ret = ?self.graph.get(block).ret_successor(),
            "jsr alternatives"
        );

        let jsr_successor = self.graph.get(block).jsr_successor();
        if jsr_successor.is_some_and(|entry| scope.contains_entry(entry)) {
            // Recursive subroutine call. Left to whoever parses the jsr.
            trace!(block = %block, scope = %scope, "recursive jsr");
            return Ok(false);
        }
        if jsr_successor.is_none() && scope.is_empty() {
            return Ok(true);
        }

        for index in 0..self.graph.get(block).successor_count() {
            let current = self.graph.get(block);
            let successor = current.successor(index);
            let jsr_successor = current.jsr_successor();
            let ret_successor = current.ret_successor();
            let mut next_scope = scope.clone();
            if Some(successor) == jsr_successor {
                let return_bci = current
                    .jsr_data()
                    .and_then(|data| data.jsr_return_bci)
                    .unwrap_or_default();
                next_scope = scope.push(return_bci, successor);
            }
            if Some(successor) == ret_successor {
                next_scope = scope.pop();
            }
            let successor_scope = self.graph.get(successor).jsr_scope();
            if !successor_scope.is_prefix_of(&next_scope) {
                return Err(Bailout::UnstructuredJsr {
                    successor_scope: successor_scope.to_string(),
                    next_scope: next_scope.to_string(),
                }
                .into());
            }
            if next_scope.is_empty() {
                continue;
            }

            let copy = self.alternative(successor, next_scope);
            self.graph.replace_successor(block, index, copy);
            if Some(successor) == jsr_successor {
                self.graph.get_mut(block).jsr_data_mut().jsr_successor = Some(copy);
            }
            if Some(successor) == ret_successor {
                self.graph.get_mut(block).jsr_data_mut().ret_successor = Some(copy);
            }
        }
        Ok(true)
    }

    /// Copy of `block` for `scope`, created on first request.
    fn alternative(&mut self, block: BlockId, scope: JsrScope) -> BlockId {
        let origin = self
            .graph
            .get(block)
            .jsr_data()
            .and_then(|data| data.origin)
            .unwrap_or(block);
        if let Some(copy) = self
            .graph
            .get(origin)
            .jsr_data()
            .and_then(|data| data.alternatives.get(&scope))
        {
            return *copy;
        }
        let copy = self.graph.copy_block(block);
        self.copies += 1;
        trace!(block = %block, copy = %copy, scope = %scope, "jsr copy");
        let data = self.graph.get_mut(copy).jsr_data_mut();
        data.scope = scope.clone();
        data.origin = Some(origin);
        self.graph
            .get_mut(origin)
            .jsr_data_mut()
            .alternatives
            .insert(scope, copy);
        copy
    }

    /// Dispatch edges whose handler range strictly covers the entry of the
    /// current subroutine are not followed.
    fn should_follow_edge(&self, successor: BlockId, scope: &JsrScope) -> bool {
        let (Some(handler), Some(entry)) =
            (self.graph.get(successor).handler(), scope.entry_block())
        else {
            return true;
        };
        let Ok(bci) = usize::try_from(self.graph.get(entry).start_bci()) else {
            return true;
        };
        !(handler.start_bci < bci && bci < handler.end_bci)
    }
}
