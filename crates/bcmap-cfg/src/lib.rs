//! Bytecode to basic block mapping.
//!
//! Builds the block structure of one method: blocks in a loop-contiguous
//! order, exception dispatch chains, expanded subroutines and loop
//! membership. Irreducible loops are made reducible by duplicating blocks.

mod bitset;
mod block;
mod block_table;
mod error;
mod exception;
mod jsr;
mod mapping;
mod options;
mod order;
mod scanner;

pub use bitset::*;
pub use block::*;
pub use block_table::*;
pub use error::*;
pub use exception::*;
pub use jsr::*;
pub use mapping::*;
pub use options::*;
pub use order::*;
pub use scanner::*;
