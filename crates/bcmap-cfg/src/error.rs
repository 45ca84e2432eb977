//! Block mapping errors.

use bcmap_bytecode::BytecodeError;
use thiserror::Error;

/// Unsupported constructs.
///
/// A bailout means the method cannot be compiled this way but nothing is
/// wrong with the mapper; callers are expected to fall back (for instance to
/// interpretation).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Bailout {
    #[error("jsr/ret parsing disabled")]
    JsrDisabled,
    #[error("jsr target bci 0 not allowed")]
    JsrTargetZero,
    #[error("unstructured control flow ({successor_scope} {next_scope})")]
    UnstructuredJsr {
        successor_scope: String,
        next_scope: String,
    },
    #[error("ret at bci {bci} outside of any subroutine")]
    RetOutsideSubroutine { bci: i32 },
    #[error("Too many loops in method")]
    TooManyLoops,
    #[error("Irreducible")]
    Irreducible,
    #[error(
        "Non-reducible loop requires too much duplication. Setting max-duplication-factor to a value higher than {factor} may resolve this."
    )]
    DuplicationBudgetExceeded { factor: f64 },
}

/// Block mapping errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockMapError {
    #[error("Bailout: {0}")]
    Bailout(#[from] Bailout),
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] BytecodeError),
    #[error("Unhandled bytecode {opcode:#04x} at bci {bci}")]
    UnhandledBytecode { opcode: u8, bci: usize },
    #[error("Can not duplicate block with JSR data (block at bci {bci})")]
    DuplicateJsrBlock { bci: i32 },
    #[error("Reached out of bounds branch target {bci}")]
    OutOfBoundsTarget { bci: i32 },
    #[error("Irreducible loops should already have been detected and duplicated")]
    UnresolvedLoops,
    #[error("Bci {bci} does not fit in a signed 32-bit offset")]
    BciOverflow { bci: usize },
    #[error("Exception handler index {count} does not fit in a signed 32-bit id")]
    TooManyHandlers { count: usize },
    #[error("{count} blocks do not fit in signed 32-bit block ids")]
    TooManyBlocks { count: usize },
}

impl BlockMapError {
    /// Check if this is a recoverable bailout rather than an internal error.
    #[must_use]
    pub const fn is_bailout(&self) -> bool {
        matches!(self, Self::Bailout(_))
    }

    /// The bailout, if this is one.
    #[must_use]
    pub const fn bailout(&self) -> Option<&Bailout> {
        match self {
            Self::Bailout(bailout) => Some(bailout),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BlockMapError>;
