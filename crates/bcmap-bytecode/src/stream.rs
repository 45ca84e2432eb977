//! Positionable cursor over a method's bytecode.

use crate::opcodes::{
    IINC, LOOKUPSWITCH, TABLESWITCH, WIDE, fixed_length, has_wide_offset, is_branch, is_widenable,
};
use crate::{BytecodeError, Result};

/// Largest code array a class file can carry.
pub const MAX_CODE_SIZE: usize = 65535;

/// Decoded `tableswitch` or `lookupswitch`.
///
/// Targets are absolute bcis (the instruction bci plus the encoded offset).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BytecodeSwitch {
    bci: usize,
    default_target: i32,
    keys: Vec<i32>,
    targets: Vec<i32>,
}

impl BytecodeSwitch {
    #[must_use]
    pub fn new(bci: usize, default_target: i32, keys: Vec<i32>, targets: Vec<i32>) -> Self {
        debug_assert_eq!(keys.len(), targets.len());
        Self {
            bci,
            default_target,
            keys,
            targets,
        }
    }

    /// Bci of the switch instruction.
    #[must_use]
    pub const fn bci(&self) -> usize {
        self.bci
    }

    /// Number of non-default cases.
    #[must_use]
    pub const fn number_of_cases(&self) -> usize {
        self.targets.len()
    }

    /// Match key of case `index`.
    #[must_use]
    pub fn key_at(&self, index: usize) -> i32 {
        self.keys[index]
    }

    /// Target bci of case `index`.
    #[must_use]
    pub fn target_at(&self, index: usize) -> i32 {
        self.targets[index]
    }

    /// Target bci of the default case.
    #[must_use]
    pub const fn default_target(&self) -> i32 {
        self.default_target
    }
}

/// Cursor over an instruction stream.
///
/// The block mapping only needs opcodes, instruction boundaries and decoded
/// branch targets, so that is all this interface exposes.
pub trait BytecodeStream {
    /// Size of the code array in bytes.
    fn code_size(&self) -> usize;

    /// Position the cursor at `bci`, which must be an instruction start (or the end).
    fn set_bci(&mut self, bci: usize);

    /// Bci of the current instruction.
    fn current_bci(&self) -> usize;

    /// Opcode of the current instruction, or `None` past the last instruction.
    ///
    /// A `wide` prefix is folded: the modified opcode is reported.
    fn current_bc(&self) -> Option<u8>;

    /// Bci of the instruction following the current one.
    fn next_bci(&self) -> usize;

    /// Destination bci of the current branch instruction.
    fn read_branch_dest(&self) -> i32;

    /// Decoded switch table of the current instruction, if it is a switch.
    fn read_switch(&self) -> Option<BytecodeSwitch>;

    /// Advance to the next instruction.
    fn advance(&mut self) {
        let next = self.next_bci();
        self.set_bci(next);
    }
}

/// [`BytecodeStream`] over a validated JVM code array.
#[derive(Clone, Debug)]
pub struct ByteStream<'a> {
    code: &'a [u8],
    bci: usize,
}

impl<'a> ByteStream<'a> {
    /// Create a stream, checking that every instruction fits in the code array.
    ///
    /// # Errors
    ///
    /// Returns an error for code arrays over [`MAX_CODE_SIZE`], truncated
    /// instructions, malformed switch tables and `wide` prefixes on opcodes
    /// that cannot be widened.
    pub fn new(code: &'a [u8]) -> Result<Self> {
        if code.len() > MAX_CODE_SIZE {
            return Err(BytecodeError::CodeTooLarge { size: code.len() });
        }
        let stream = Self { code, bci: 0 };
        stream.validate()?;
        Ok(stream)
    }

    fn validate(&self) -> Result<()> {
        let mut bci = 0;
        while bci < self.code.len() {
            let opcode = self.code[bci];
            if opcode == WIDE {
                let modified = self.u8_at(bci + 1);
                if bci + 1 >= self.code.len() || !is_widenable(modified) {
                    return Err(BytecodeError::InvalidWide { bci });
                }
            }
            if opcode == TABLESWITCH || opcode == LOOKUPSWITCH {
                let base = switch_base(bci);
                let header = if opcode == TABLESWITCH { 12 } else { 8 };
                if base + header > self.code.len() {
                    return Err(BytecodeError::TruncatedInstruction { bci });
                }
                let count = if opcode == TABLESWITCH {
                    i64::from(self.i32_at(base + 8)) - i64::from(self.i32_at(base + 4)) + 1
                } else {
                    i64::from(self.i32_at(base + 4))
                };
                if count < 0 {
                    return Err(BytecodeError::InvalidSwitch { bci });
                }
            }
            let len = self.length_at(bci);
            if bci + len > self.code.len() {
                return Err(BytecodeError::TruncatedInstruction { bci });
            }
            bci += len;
        }
        Ok(())
    }

    /// The underlying code array.
    #[must_use]
    pub const fn code(&self) -> &'a [u8] {
        self.code
    }

    /// Length in bytes of the instruction starting at `bci`.
    ///
    /// Undefined opcodes are treated as single-byte instructions so that the
    /// consumer sees them and can reject them.
    #[must_use]
    pub fn length_at(&self, bci: usize) -> usize {
        let opcode = self.u8_at(bci);
        match opcode {
            WIDE => {
                if self.u8_at(bci + 1) == IINC {
                    6
                } else {
                    4
                }
            }
            TABLESWITCH => {
                let base = switch_base(bci);
                let low = i64::from(self.i32_at(base + 4));
                let high = i64::from(self.i32_at(base + 8));
                let cases = usize::try_from(high - low + 1).unwrap_or(0);
                base + 12 + cases * 4 - bci
            }
            LOOKUPSWITCH => {
                let base = switch_base(bci);
                let pairs = usize::try_from(self.i32_at(base + 4)).unwrap_or(0);
                base + 8 + pairs * 8 - bci
            }
            _ => fixed_length(opcode).unwrap_or(1),
        }
    }

    fn u8_at(&self, pos: usize) -> u8 {
        self.code.get(pos).copied().unwrap_or(0)
    }

    fn i16_at(&self, pos: usize) -> i16 {
        i16::from_be_bytes([self.u8_at(pos), self.u8_at(pos + 1)])
    }

    fn i32_at(&self, pos: usize) -> i32 {
        i32::from_be_bytes([
            self.u8_at(pos),
            self.u8_at(pos + 1),
            self.u8_at(pos + 2),
            self.u8_at(pos + 3),
        ])
    }
}

/// Start of the 4-byte aligned operands of a switch at `bci`.
const fn switch_base(bci: usize) -> usize {
    (bci + 4) & !3
}

/// Signed form of a bci, for adding branch offsets.
///
/// Streams are capped at [`MAX_CODE_SIZE`], so every bci fits.
fn signed(bci: usize) -> i32 {
    i32::try_from(bci).unwrap_or(i32::MAX)
}

impl BytecodeStream for ByteStream<'_> {
    fn code_size(&self) -> usize {
        self.code.len()
    }

    fn set_bci(&mut self, bci: usize) {
        self.bci = bci;
    }

    fn current_bci(&self) -> usize {
        self.bci
    }

    fn current_bc(&self) -> Option<u8> {
        let opcode = *self.code.get(self.bci)?;
        if opcode == WIDE {
            Some(self.u8_at(self.bci + 1))
        } else {
            Some(opcode)
        }
    }

    fn next_bci(&self) -> usize {
        (self.bci + self.length_at(self.bci)).min(self.code.len())
    }

    fn read_branch_dest(&self) -> i32 {
        let opcode = self.u8_at(self.bci);
        debug_assert!(is_branch(opcode), "not a branch at bci {}", self.bci);
        let offset = if has_wide_offset(opcode) {
            self.i32_at(self.bci + 1)
        } else {
            i32::from(self.i16_at(self.bci + 1))
        };
        signed(self.bci).wrapping_add(offset)
    }

    fn read_switch(&self) -> Option<BytecodeSwitch> {
        let opcode = self.u8_at(self.bci);
        let bci = signed(self.bci);
        let base = switch_base(self.bci);
        let default_target = bci.wrapping_add(self.i32_at(base));
        match opcode {
            TABLESWITCH => {
                let low = self.i32_at(base + 4);
                let high = self.i32_at(base + 8);
                let mut keys = Vec::new();
                let mut targets = Vec::new();
                let mut pos = base + 12;
                for key in low..=high {
                    keys.push(key);
                    targets.push(bci.wrapping_add(self.i32_at(pos)));
                    pos += 4;
                }
                Some(BytecodeSwitch::new(self.bci, default_target, keys, targets))
            }
            LOOKUPSWITCH => {
                let pairs = usize::try_from(self.i32_at(base + 4)).unwrap_or(0);
                let mut keys = Vec::with_capacity(pairs);
                let mut targets = Vec::with_capacity(pairs);
                let mut pos = base + 8;
                for _ in 0..pairs {
                    keys.push(self.i32_at(pos));
                    targets.push(bci.wrapping_add(self.i32_at(pos + 4)));
                    pos += 8;
                }
                Some(BytecodeSwitch::new(self.bci, default_target, keys, targets))
            }
            _ => None,
        }
    }
}
