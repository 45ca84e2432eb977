//! Block ordering, loop detection and irreducible loop duplication.
//!
//! A depth-first traversal with an explicit stack assigns reverse
//! postorder. A back edge to a block on the current path makes it a loop
//! header; re-reaching a finished block pulls its loop bits into the
//! current path. Re-entering a loop other than through its header is
//! resolved by duplicating blocks along the path until control flow merges
//! with the header or leaves the loop.

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::bitset::BitSet;
use crate::block::{BlockGraph, BlockId, TraversalState};
use crate::error::{Bailout, BlockMapError, Result};
use crate::options::BlockMapOptions;

/// Hard limit on loops per method.
pub const LOOP_HEADER_MAX_CAPACITY: usize = 1 << 12;

/// One frame of the traversal.
#[derive(Clone, Copy, Debug)]
struct Step {
    pred: Option<usize>,
    block: BlockId,
    next_successor: usize,
    /// Duplication episode this step belongs to.
    episode: Option<usize>,
}

/// State shared by the steps of one duplication run.
#[derive(Clone, Debug)]
struct Episode {
    /// Header of the loop being entered irreducibly.
    loop_header: BlockId,
    /// Original block -> its duplicate in this run.
    duplicates: FxHashMap<BlockId, BlockId>,
}

/// Result of ordering.
#[derive(Clone, Debug, Default)]
pub struct BlockOrder {
    /// Reached blocks, loop bodies contiguous after their header.
    pub blocks: Vec<BlockId>,
    /// Header of each loop, indexed by loop id.
    pub loop_headers: Vec<BlockId>,
    /// Blocks created to make irreducible loops reducible.
    pub duplicates: usize,
}

pub struct BlockOrderer<'a> {
    graph: &'a mut BlockGraph,
    options: &'a BlockMapOptions,
    steps: Vec<Step>,
    episodes: Vec<Episode>,
    /// Steps that re-reached a block, per block. Loop bits reaching the
    /// block later are pushed along these paths too.
    loop_id_chains: FxHashMap<BlockId, Vec<usize>>,
    loop_headers: Vec<BlockId>,
    postorder: Vec<BlockId>,
    original_count: usize,
    duplicates: usize,
}

impl<'a> BlockOrderer<'a> {
    pub fn new(graph: &'a mut BlockGraph, options: &'a BlockMapOptions) -> Self {
        let original_count = graph
            .iter()
            .filter(|(_, block)| !block.is_out_of_bounds())
            .count();
        Self {
            graph,
            options,
            steps: Vec::new(),
            episodes: Vec::new(),
            loop_id_chains: FxHashMap::default(),
            loop_headers: Vec::new(),
            postorder: Vec::new(),
            original_count,
            duplicates: 0,
        }
    }

    /// Order the blocks reachable from `start`.
    ///
    /// # Errors
    ///
    /// Bails out on too many loops, on irreducible loops when duplication is
    /// disabled and when duplication exceeds its budget.
    pub fn compute(mut self, start: BlockId) -> Result<BlockOrder> {
        self.traverse(start)?;

        let mut start_loops = self.graph.get(start).loops.clone();
        if self.graph.get(start).is_loop_header {
            start_loops.remove(self.graph.get(start).loop_id);
        }
        if !start_loops.is_empty() {
            return Err(BlockMapError::UnresolvedLoops);
        }

        let blocks = self.contiguous_order();
        if self.duplicates > 0 {
            debug!(
                duplicates = self.duplicates,
                original = self.original_count,
                "duplicated blocks for irreducible loops"
            );
        }
        Ok(BlockOrder {
            blocks,
            loop_headers: self.loop_headers,
            duplicates: self.duplicates,
        })
    }

    fn push_step(&mut self, pred: Option<usize>, block: BlockId, episode: Option<usize>) -> usize {
        self.steps.push(Step {
            pred,
            block,
            next_successor: 0,
            episode,
        });
        self.steps.len() - 1
    }

    fn traverse(&mut self, start: BlockId) -> Result<()> {
        let root = self.push_step(None, start, None);
        let mut stack = vec![root];

        while let Some(&step) = stack.last() {
            let Step {
                block,
                next_successor: index,
                episode,
                ..
            } = self.steps[step];
            if index == 0 {
                self.graph.get_mut(block).state = TraversalState::Active;
            }
            if index >= self.graph.get(block).successor_count() {
                self.graph.get_mut(block).state = TraversalState::Visited;
                self.postorder.push(block);
                stack.pop();
                continue;
            }

            let mut successor = self.graph.get(block).successor(index);
            if let Some(episode) = episode {
                let header = self.episodes[episode].loop_header;
                let header_loop = self.graph.get(header).loop_id;
                if successor != header && self.graph.get(successor).loops.contains(header_loop) {
                    // Still inside the loop: duplicate or merge with a duplicate.
                    let existing = self.episodes[episode].duplicates.get(&successor).copied();
                    let duplicate = match existing {
                        Some(duplicate) => duplicate,
                        None => {
                            let duplicate = self.duplicate(successor)?;
                            self.episodes[episode]
                                .duplicates
                                .insert(successor, duplicate);
                            duplicate
                        }
                    };
                    self.graph.replace_successor(block, index, duplicate);
                    successor = duplicate;
                } else {
                    trace!(block = %successor, "exiting duplication");
                }
            }

            match self.graph.get(successor).state {
                TraversalState::Unvisited => {
                    let next = self.push_step(Some(step), successor, episode);
                    stack.push(next);
                }
                TraversalState::Active => {
                    // Back edge.
                    if !self.graph.get(successor).is_loop_header {
                        self.make_loop_header(successor)?;
                    }
                    let loop_bits = self.graph.get(successor).loops.clone();
                    self.merge(step, successor, &loop_bits);
                }
                TraversalState::Visited => {
                    // Re-reaching control flow through a new path.
                    let target = self.graph.get(successor);
                    let mut loop_bits = target.loops.clone();
                    if target.is_loop_header {
                        loop_bits.remove(target.loop_id);
                    }
                    match self.outermost_inactive_loop(&loop_bits)? {
                        Some(loop_id) => {
                            debug_assert!(episode.is_none());
                            let duplicate = self.duplicate(successor)?;
                            self.graph.replace_successor(block, index, duplicate);
                            let mut duplicates = FxHashMap::default();
                            duplicates.insert(successor, duplicate);
                            self.episodes.push(Episode {
                                loop_header: self.loop_headers[loop_id],
                                duplicates,
                            });
                            let next =
                                self.push_step(Some(step), duplicate, Some(self.episodes.len() - 1));
                            stack.push(next);
                            trace!(block = %successor, duplicate = %duplicate, "starting duplication");
                        }
                        None => self.merge(step, successor, &loop_bits),
                    }
                }
            }
            self.steps[step].next_successor += 1;
        }
        Ok(())
    }

    /// Outermost loop in `loop_bits` whose header is not on the current path.
    ///
    /// Such a loop is being entered without passing its header.
    fn outermost_inactive_loop(&self, loop_bits: &BitSet) -> Result<Option<usize>> {
        let mut outermost: Option<usize> = None;
        for loop_id in loop_bits.iter() {
            let header = self.graph.get(self.loop_headers[loop_id]);
            if header.state == TraversalState::Active {
                continue;
            }
            if !self.options.irreducible_loops_enabled() {
                return Err(Bailout::Irreducible.into());
            }
            if outermost.is_none_or(|outer| !header.loops.contains(outer)) {
                outermost = Some(loop_id);
            }
        }
        Ok(outermost)
    }

    /// Pull `loop_bits` into the current path and remember the path for
    /// bits that reach `successor` later.
    fn merge(&mut self, step: usize, successor: BlockId, loop_bits: &BitSet) {
        self.propagate_loop_bits(step, loop_bits);
        self.loop_id_chains.entry(successor).or_default().push(step);
        trace!(block = %successor, loops = ?self.graph.get(successor).loops, "re-reached");
    }

    fn propagate_loop_bits(&mut self, step: usize, loop_bits: &BitSet) {
        let mut work = vec![step];
        while let Some(mut current) = work.pop() {
            loop {
                let block = self.steps[current].block;
                let missing = loop_bits.difference(&self.graph.get(block).loops);
                if missing.is_empty() {
                    break;
                }
                self.graph.get_mut(block).loops.union_with(&missing);
                if let Some(chain) = self.loop_id_chains.get(&block) {
                    work.extend(chain.iter().copied());
                }
                match self.steps[current].pred {
                    Some(pred) => current = pred,
                    None => break,
                }
            }
        }
    }

    fn make_loop_header(&mut self, block: BlockId) -> Result<()> {
        let loop_id = self.loop_headers.len();
        if loop_id >= LOOP_HEADER_MAX_CAPACITY {
            return Err(Bailout::TooManyLoops.into());
        }
        let header = self.graph.get_mut(block);
        header.is_loop_header = true;
        header.loop_id = loop_id;
        header.loops.insert(loop_id);
        self.loop_headers.push(block);
        trace!(block = %block, loop_id, "loop header");
        Ok(())
    }

    fn duplicate(&mut self, block: BlockId) -> Result<BlockId> {
        let duplicate = self.graph.duplicate_block(block)?;
        self.duplicates += 1;
        let factor = self.options.max_duplication_factor;
        if count_as_f64(self.duplicates) > count_as_f64(self.original_count) * factor {
            return Err(Bailout::DuplicationBudgetExceeded { factor }.into());
        }
        Ok(duplicate)
    }

    /// Reverse postorder with every loop body moved right after its header.
    fn contiguous_order(&self) -> Vec<BlockId> {
        let mut slots: Vec<Option<BlockId>> =
            self.postorder.iter().rev().copied().map(Some).collect();
        let mut order = Vec::with_capacity(slots.len());
        for i in 0..slots.len() {
            let Some(block) = slots[i].take() else {
                continue;
            };
            order.push(block);
            if self.graph.get(block).is_loop_header {
                self.gather_loop_body(&mut slots, &mut order, i, block);
            }
        }
        order
    }

    fn gather_loop_body(
        &self,
        slots: &mut [Option<BlockId>],
        order: &mut Vec<BlockId>,
        header_index: usize,
        header: BlockId,
    ) {
        // (loop id, next slot to inspect) per open loop, innermost last.
        let mut open = vec![(self.graph.get(header).loop_id, header_index + 1)];
        while let Some(frame) = open.last_mut() {
            let (loop_id, index) = *frame;
            if index >= slots.len() {
                open.pop();
                continue;
            }
            frame.1 += 1;
            let Some(block) = slots[index] else {
                continue;
            };
            if self.graph.get(block).loops.contains(loop_id) {
                slots[index] = None;
                order.push(block);
                if self.graph.get(block).is_loop_header {
                    open.push((self.graph.get(block).loop_id, index + 1));
                }
            }
        }
    }
}

/// Block count as a float, saturating far beyond any real method.
fn count_as_f64(count: usize) -> f64 {
    u32::try_from(count).map_or(f64::from(u32::MAX), f64::from)
}
