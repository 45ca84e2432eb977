//! bcmap - JVM bytecode block mapping
//!
//! Builds the basic block structure of a method: loop-contiguous block
//! order, exception dispatch chains, expanded `jsr` subroutines and loop
//! membership.
//!
//! # Example
//!
//! ```ignore
//! use bcmap::{BlockMap, BlockMapOptions, MethodCode};
//!
//! let method = MethodCode::new("run", code);
//! let map = BlockMap::build_method(&method, &BlockMapOptions::default())?;
//! println!("{map}");
//! ```

pub use bcmap_bytecode::{
    Assembler, ByteStream, BytecodeError, BytecodeStream, BytecodeSwitch, ExceptionHandler, Label,
    MethodCode, opcodes,
};
pub use bcmap_cfg::{
    AFTER_EXCEPTION_BCI, Bailout, BitSet, Block, BlockId, BlockKind, BlockMap, BlockMapError,
    BlockMapOptions, DEFAULT_MAX_DUPLICATION_FACTOR, JsrData, JsrScope, OptionsError, build_all,
};

use thiserror::Error;

/// Top-level errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    BlockMap(#[from] BlockMapError),
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("Invalid hex code: {0}")]
    InvalidHex(String),
    #[error("Invalid handler '{0}', expected start:end:handler[:Type]")]
    InvalidHandler(String),
}

impl Error {
    /// Check if this error is a bailout rather than a malformed input or bug.
    #[must_use]
    pub const fn is_bailout(&self) -> bool {
        matches!(self, Self::BlockMap(err) if err.is_bailout())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decode a hex string into bytecode. Whitespace and an optional `0x`
/// prefix are ignored.
///
/// # Errors
///
/// Returns [`Error::InvalidHex`] for odd lengths and non-hex digits.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.split_whitespace().collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);
    if digits.len() % 2 != 0 {
        return Err(Error::InvalidHex(text.to_string()));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::InvalidHex(text.to_string()))
        })
        .collect()
}

/// Parse an exception table entry written as `start:end:handler[:Type]`.
///
/// Without a type the handler catches everything.
///
/// # Errors
///
/// Returns [`Error::InvalidHandler`] if a bci is missing or not a number.
pub fn parse_handler(text: &str) -> Result<ExceptionHandler> {
    let invalid = || Error::InvalidHandler(text.to_string());
    let mut parts = text.splitn(4, ':');
    let mut bci = || -> Result<usize> {
        parts
            .next()
            .and_then(|part| part.trim().parse().ok())
            .ok_or_else(invalid)
    };
    let start_bci = bci()?;
    let end_bci = bci()?;
    let handler_bci = bci()?;
    let catch_type = parts
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToString::to_string);
    Ok(ExceptionHandler::new(
        start_bci,
        end_bci,
        handler_bci,
        catch_type,
    ))
}
