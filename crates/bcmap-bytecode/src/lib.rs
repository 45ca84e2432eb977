//! JVM bytecode access for block mapping.
//!
//! Provides the opcode tables, the [`BytecodeStream`] cursor the block
//! builder consumes, exception handler tables, and a small [`Assembler`]
//! for producing method bodies.

mod assembler;
mod handler;
mod method;
pub mod opcodes;
mod stream;

pub use assembler::*;
pub use handler::*;
pub use method::*;
pub use stream::*;

use thiserror::Error;

/// Bytecode decoding and assembly errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BytecodeError {
    #[error("Truncated instruction at bci {bci}")]
    TruncatedInstruction { bci: usize },
    #[error("Malformed switch table at bci {bci}")]
    InvalidSwitch { bci: usize },
    #[error("Invalid wide prefix at bci {bci}")]
    InvalidWide { bci: usize },
    #[error("Branch at bci {bci} targets an unbound label")]
    UnboundLabel { bci: usize },
    #[error("Branch offset at bci {bci} does not fit its operand")]
    BranchOutOfRange { bci: usize },
    #[error("Code array of {size} bytes exceeds the 65535 byte limit")]
    CodeTooLarge { size: usize },
}

pub type Result<T> = std::result::Result<T, BytecodeError>;
