//! Basic blocks and the arena that owns them.
//!
//! Blocks refer to each other by [`BlockId`], an index into the
//! [`BlockGraph`] arena. Predecessor counts are exact: they only change
//! through the graph's edge mutators, which update both ends at once.

use std::fmt;

use bcmap_bytecode::ExceptionHandler;
use rustc_hash::FxHashMap;

use crate::bitset::BitSet;
use crate::error::{BlockMapError, Result};
use crate::jsr::JsrScope;

/// Id of a block that has not been placed in the final order yet.
pub const UNASSIGNED_ID: i32 = -1;

/// Deopt bci of the method-level unwind dispatch block.
pub const AFTER_EXCEPTION_BCI: i32 = -4;

/// Index of a block in its arena.
///
/// In a finished [`BlockMap`](crate::BlockMap) the index is the block's id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position in the arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Signed form of a code position, as stored in blocks.
///
/// # Errors
///
/// Fails for positions that do not fit in an `i32`.
pub fn signed_bci(bci: usize) -> Result<i32> {
    i32::try_from(bci).map_err(|_| BlockMapError::BciOverflow { bci })
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// What a block stands for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// Contiguous range of instructions.
    Instruction,
    /// One type check in a chain of handler checks for a throwing bci.
    ExceptionDispatch {
        /// Handler checked by this link, `None` for the unwind block.
        handler: Option<ExceptionHandler>,
        /// Index of the handler in the exception table, -1 for unwind.
        handler_id: i32,
        /// Bci whose exception is being dispatched.
        deopt_bci: i32,
    },
    /// Branch target outside the code array.
    OutOfBounds,
}

/// DFS state used while ordering blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraversalState {
    #[default]
    Unvisited,
    /// On the current DFS path.
    Active,
    Visited,
}

/// Subroutine bookkeeping for blocks touched by jsr/ret.
#[derive(Clone, Debug, Default)]
pub struct JsrData {
    /// Subroutine frames this block is a copy for.
    pub scope: JsrScope,
    /// Copies of this block per scope. Only populated on the scanned block;
    /// copies point back to it through `origin`.
    pub(crate) alternatives: FxHashMap<JsrScope, BlockId>,
    /// Scanned block this one was copied from.
    pub(crate) origin: Option<BlockId>,
    /// Entry of the subroutine called by a trailing jsr.
    pub jsr_successor: Option<BlockId>,
    /// Bci following the trailing jsr.
    pub jsr_return_bci: Option<usize>,
    /// Continuation after a trailing ret.
    pub ret_successor: Option<BlockId>,
    pub ends_with_ret: bool,
}

/// Basic block.
#[derive(Clone, Debug)]
pub struct Block {
    start_bci: i32,
    /// Bci of the last instruction (inclusive).
    end_bci: i32,
    pub(crate) id: i32,
    successors: Vec<BlockId>,
    predecessor_count: usize,
    /// Last successor is an exception dispatch block.
    dispatch_last: bool,
    pub(crate) is_loop_header: bool,
    pub(crate) loop_id: usize,
    pub(crate) loops: BitSet,
    is_exception_entry: bool,
    duplicate: bool,
    kind: BlockKind,
    pub(crate) state: TraversalState,
    pub(crate) jsr: Option<Box<JsrData>>,
}

impl Block {
    fn with_kind(start_bci: i32, end_bci: i32, kind: BlockKind) -> Self {
        Self {
            start_bci,
            end_bci,
            id: UNASSIGNED_ID,
            successors: Vec::new(),
            predecessor_count: 0,
            dispatch_last: false,
            is_loop_header: false,
            loop_id: 0,
            loops: BitSet::new(),
            is_exception_entry: false,
            duplicate: false,
            kind,
            state: TraversalState::Unvisited,
            jsr: None,
        }
    }

    /// Create an instruction block starting at `start_bci`.
    #[must_use]
    pub fn instruction(start_bci: i32) -> Self {
        Self::with_kind(start_bci, start_bci, BlockKind::Instruction)
    }

    /// Create the block standing for an out-of-range branch target.
    #[must_use]
    pub fn out_of_bounds(bci: i32) -> Self {
        Self::with_kind(bci, bci, BlockKind::OutOfBounds)
    }

    /// Create a dispatch link checking handler `handler_id` for `deopt_bci`.
    ///
    /// # Errors
    ///
    /// Fails if the handler bci, id or `deopt_bci` does not fit in an `i32`.
    pub fn dispatch(
        handler: ExceptionHandler,
        handler_id: usize,
        deopt_bci: usize,
    ) -> Result<Self> {
        let bci = signed_bci(handler.handler_bci)?;
        let handler_id = i32::try_from(handler_id)
            .map_err(|_| BlockMapError::TooManyHandlers { count: handler_id })?;
        Ok(Self::with_kind(
            bci,
            bci,
            BlockKind::ExceptionDispatch {
                handler: Some(handler),
                handler_id,
                deopt_bci: signed_bci(deopt_bci)?,
            },
        ))
    }

    /// Create the unwind dispatch block (no handler).
    #[must_use]
    pub fn unwind(deopt_bci: i32) -> Self {
        Self::with_kind(
            deopt_bci,
            deopt_bci,
            BlockKind::ExceptionDispatch {
                handler: None,
                handler_id: -1,
                deopt_bci,
            },
        )
    }

    #[must_use]
    pub const fn start_bci(&self) -> i32 {
        self.start_bci
    }

    /// Bci of the last instruction in the block.
    #[must_use]
    pub const fn end_bci(&self) -> i32 {
        self.end_bci
    }

    pub(crate) fn set_end_bci(&mut self, bci: i32) {
        debug_assert!(self.is_instruction_block());
        self.end_bci = bci;
    }

    /// Position in the final order, or [`UNASSIGNED_ID`].
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    #[must_use]
    pub fn successor(&self, index: usize) -> BlockId {
        self.successors[index]
    }

    #[must_use]
    pub const fn successor_count(&self) -> usize {
        self.successors.len()
    }

    #[must_use]
    pub const fn predecessor_count(&self) -> usize {
        self.predecessor_count
    }

    /// Exception dispatch successor, always the last one.
    #[must_use]
    pub fn exception_dispatch_successor(&self) -> Option<BlockId> {
        if self.dispatch_last {
            self.successors.last().copied()
        } else {
            None
        }
    }

    /// Number of successors excluding the exception dispatch successor.
    #[must_use]
    pub const fn num_normal_successors(&self) -> usize {
        if self.dispatch_last {
            self.successors.len() - 1
        } else {
            self.successors.len()
        }
    }

    #[must_use]
    pub const fn is_loop_header(&self) -> bool {
        self.is_loop_header
    }

    /// Loop id of this header. Only meaningful if [`Self::is_loop_header`].
    #[must_use]
    pub const fn loop_id(&self) -> usize {
        self.loop_id
    }

    /// Ids of the loops containing this block (including its own if a header).
    #[must_use]
    pub const fn loops(&self) -> &BitSet {
        &self.loops
    }

    /// Check if this block is the entry of an exception handler.
    #[must_use]
    pub const fn is_exception_entry(&self) -> bool {
        self.is_exception_entry
    }

    pub(crate) fn set_exception_entry(&mut self) {
        debug_assert!(
            !self.is_exception_dispatch(),
            "dispatch block cannot be an exception entry"
        );
        self.is_exception_entry = true;
    }

    /// Check if this block was created by duplication rather than scanning.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        self.duplicate
    }

    #[must_use]
    pub const fn kind(&self) -> &BlockKind {
        &self.kind
    }

    /// Check if this block covers instructions of the code array.
    ///
    /// Neither dispatch blocks nor out-of-bounds targets do.
    #[must_use]
    pub const fn is_instruction_block(&self) -> bool {
        matches!(self.kind, BlockKind::Instruction)
    }

    #[must_use]
    pub const fn is_exception_dispatch(&self) -> bool {
        matches!(self.kind, BlockKind::ExceptionDispatch { .. })
    }

    #[must_use]
    pub const fn is_out_of_bounds(&self) -> bool {
        matches!(self.kind, BlockKind::OutOfBounds)
    }

    /// Handler checked by a dispatch block.
    #[must_use]
    pub const fn handler(&self) -> Option<&ExceptionHandler> {
        match &self.kind {
            BlockKind::ExceptionDispatch { handler, .. } => handler.as_ref(),
            _ => None,
        }
    }

    /// Exception table index checked by a dispatch block (-1 for unwind).
    #[must_use]
    pub const fn handler_id(&self) -> Option<i32> {
        match self.kind {
            BlockKind::ExceptionDispatch { handler_id, .. } => Some(handler_id),
            _ => None,
        }
    }

    /// Throwing bci a dispatch block was created for.
    #[must_use]
    pub const fn deopt_bci(&self) -> Option<i32> {
        match self.kind {
            BlockKind::ExceptionDispatch { deopt_bci, .. } => Some(deopt_bci),
            _ => None,
        }
    }

    /// Check if this block maps its bci range one-to-one (no jsr copy, no duplicate).
    #[must_use]
    pub const fn bci_unique(&self) -> bool {
        self.jsr.is_none() && !self.duplicate
    }

    #[must_use]
    pub fn jsr_data(&self) -> Option<&JsrData> {
        self.jsr.as_deref()
    }

    pub(crate) fn jsr_data_mut(&mut self) -> &mut JsrData {
        self.jsr.get_or_insert_with(Box::default)
    }

    /// Scope of the subroutine copy this block belongs to (empty if none).
    #[must_use]
    pub fn jsr_scope(&self) -> JsrScope {
        self.jsr
            .as_ref()
            .map_or_else(JsrScope::default, |data| data.scope.clone())
    }

    #[must_use]
    pub fn jsr_successor(&self) -> Option<BlockId> {
        self.jsr.as_ref().and_then(|data| data.jsr_successor)
    }

    #[must_use]
    pub fn ret_successor(&self) -> Option<BlockId> {
        self.jsr.as_ref().and_then(|data| data.ret_successor)
    }

    #[must_use]
    pub fn ends_with_ret(&self) -> bool {
        self.jsr.as_ref().is_some_and(|data| data.ends_with_ret)
    }

    /// Rewrite every block reference through `renumber`.
    ///
    /// Construction-only jsr bookkeeping (copy memo and origin) is dropped.
    pub(crate) fn renumber(&mut self, renumber: impl Fn(BlockId) -> BlockId) {
        for successor in &mut self.successors {
            *successor = renumber(*successor);
        }
        if let Some(data) = self.jsr.as_deref_mut() {
            data.jsr_successor = data.jsr_successor.map(&renumber);
            data.ret_successor = data.ret_successor.map(&renumber);
            data.alternatives.clear();
            data.origin = None;
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}[{}..{}", self.id, self.start_bci, self.end_bci)?;
        if self.is_loop_header || self.is_exception_entry || self.is_exception_dispatch() {
            f.write_str(" ")?;
            if self.is_loop_header {
                f.write_str("L")?;
            }
            if self.is_exception_entry {
                f.write_str("!")?;
            } else if self.is_exception_dispatch() {
                f.write_str("<!>")?;
            }
        }
        f.write_str("]")?;
        if self.duplicate {
            f.write_str(" (duplicate)")?;
        }
        Ok(())
    }
}

/// Arena owning every block of one method build.
#[derive(Clone, Debug, Default)]
pub struct BlockGraph {
    blocks: Vec<Block>,
}

impl BlockGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block with no edges.
    pub fn push(&mut self, block: Block) -> BlockId {
        debug_assert!(block.successors.is_empty());
        self.blocks.push(block);
        BlockId::new(self.blocks.len() - 1)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(index, block)| (BlockId::new(index), block))
    }

    /// Append `to` to the successors of `from`.
    pub fn add_successor(&mut self, from: BlockId, to: BlockId) {
        let dispatch = self.get(to).is_exception_dispatch();
        self.get_mut(to).predecessor_count += 1;
        let block = self.get_mut(from);
        block.successors.push(to);
        block.dispatch_last = dispatch;
    }

    /// Remove every successor edge of `from`.
    pub fn clear_successors(&mut self, from: BlockId) {
        let successors = std::mem::take(&mut self.get_mut(from).successors);
        for successor in successors {
            self.get_mut(successor).predecessor_count -= 1;
        }
        self.get_mut(from).dispatch_last = false;
    }

    /// Redirect successor edge `index` of `from` to `to`.
    pub fn replace_successor(&mut self, from: BlockId, index: usize, to: BlockId) {
        let old = self.get(from).successors[index];
        if old == to {
            return;
        }
        self.get_mut(old).predecessor_count -= 1;
        self.get_mut(to).predecessor_count += 1;
        let is_last = index + 1 == self.get(from).successors.len();
        let dispatch = self.get(to).is_exception_dispatch();
        let block = self.get_mut(from);
        block.successors[index] = to;
        if is_last {
            block.dispatch_last = dispatch;
        }
    }

    /// Copy `id` for a subroutine scope, keeping its jsr data and loop bits.
    ///
    /// The copy has the same successors; its scope is set by the caller.
    pub(crate) fn copy_block(&mut self, id: BlockId) -> BlockId {
        let original = self.get(id);
        let mut copy = original.clone();
        copy.successors = Vec::new();
        copy.predecessor_count = 0;
        copy.dispatch_last = false;
        if let Some(data) = copy.jsr.as_deref_mut() {
            data.origin = Some(data.origin.unwrap_or(id));
            data.alternatives = FxHashMap::default();
        }
        let successors = original.successors.clone();
        let copy = self.push(copy);
        for successor in successors {
            self.add_successor(copy, successor);
        }
        copy
    }

    /// Duplicate `id` with fresh ordering state, keeping its successors.
    ///
    /// # Errors
    ///
    /// Blocks carrying jsr data cannot be duplicated.
    pub(crate) fn duplicate_block(&mut self, id: BlockId) -> Result<BlockId> {
        let original = self.get(id);
        if original.jsr.is_some() {
            return Err(BlockMapError::DuplicateJsrBlock {
                bci: original.start_bci,
            });
        }
        let mut dup = Block::with_kind(original.start_bci, original.end_bci, original.kind.clone());
        dup.is_exception_entry = original.is_exception_entry;
        dup.duplicate = true;
        let successors = original.successors.clone();
        let dup = self.push(dup);
        for successor in successors {
            self.add_successor(dup, successor);
        }
        Ok(dup)
    }

    /// Duplicate a handler entry for use as a normal control-flow target.
    pub(crate) fn duplicate_as_non_exception_entry(&mut self, id: BlockId) -> Result<BlockId> {
        let dup = self.duplicate_block(id)?;
        self.get_mut(dup).is_exception_entry = false;
        Ok(dup)
    }

    pub(crate) fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}
