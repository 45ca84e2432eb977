//! Minimal bytecode assembler with forward labels.
//!
//! Emits structurally valid JVM code for building block maps in tests and
//! tools. Constant-pool operands are written as zero since nothing here
//! resolves them.

use crate::opcodes::{
    INVOKEDYNAMIC, INVOKEINTERFACE, LOOKUPSWITCH, TABLESWITCH, fixed_length, has_wide_offset,
    is_branch,
};
use crate::{BytecodeError, MAX_CODE_SIZE, Result};

/// Branch target placeholder, bound to a bci with [`Assembler::bind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Clone, Copy, Debug)]
struct Fixup {
    /// Bci of the instruction owning the offset.
    origin: usize,
    /// Position of the offset operand.
    at: usize,
    label: Label,
    wide: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Assembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current bci (where the next instruction will be emitted).
    #[must_use]
    pub const fn bci(&self) -> usize {
        self.code.len()
    }

    /// Create an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current bci.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Create a label bound to the current bci.
    pub fn here(&mut self) -> Label {
        let label = self.label();
        self.bind(label);
        label
    }

    /// Bci `label` was bound to, if any.
    #[must_use]
    pub fn bci_of(&self, label: Label) -> Option<usize> {
        self.labels[label.0]
    }

    /// Emit an instruction with zeroed operands.
    ///
    /// Invokes, field accesses, allocations and the like only need their
    /// length to be right.
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        let len = match opcode {
            INVOKEINTERFACE | INVOKEDYNAMIC => 5,
            _ => fixed_length(opcode).unwrap_or(1),
        };
        self.code.push(opcode);
        self.code.resize(self.code.len() + len - 1, 0);
        self
    }

    /// Emit an instruction with a single-byte operand (local index, `bipush` value).
    pub fn op_u8(&mut self, opcode: u8, operand: u8) -> &mut Self {
        self.code.push(opcode);
        self.code.push(operand);
        self
    }

    /// Emit raw bytes.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Emit a branch (`if*`, `goto`, `jsr`, and their `_w` forms) to `label`.
    pub fn branch(&mut self, opcode: u8, label: Label) -> &mut Self {
        debug_assert!(is_branch(opcode));
        let origin = self.code.len();
        let wide = has_wide_offset(opcode);
        self.code.push(opcode);
        self.fixups.push(Fixup {
            origin,
            at: origin + 1,
            label,
            wide,
        });
        let width = if wide { 4 } else { 2 };
        self.code.resize(self.code.len() + width, 0);
        self
    }

    /// Emit a `tableswitch` over keys `low..low + cases.len()`.
    pub fn table_switch(&mut self, low: i32, default: Label, cases: &[Label]) -> &mut Self {
        let origin = self.code.len();
        self.code.push(TABLESWITCH);
        self.pad_switch();
        self.push_offset(origin, default);
        // Oversized tables are rejected by `finish`.
        let count = i32::try_from(cases.len()).unwrap_or(i32::MAX);
        let high = low.wrapping_add(count).wrapping_sub(1);
        self.code.extend_from_slice(&low.to_be_bytes());
        self.code.extend_from_slice(&high.to_be_bytes());
        for &case in cases {
            self.push_offset(origin, case);
        }
        self
    }

    /// Emit a `lookupswitch` with the given `(key, target)` pairs.
    pub fn lookup_switch(&mut self, default: Label, pairs: &[(i32, Label)]) -> &mut Self {
        let origin = self.code.len();
        self.code.push(LOOKUPSWITCH);
        self.pad_switch();
        self.push_offset(origin, default);
        let count = i32::try_from(pairs.len()).unwrap_or(i32::MAX);
        self.code.extend_from_slice(&count.to_be_bytes());
        let mut sorted = pairs.to_vec();
        sorted.sort_by_key(|&(key, _)| key);
        for (key, target) in sorted {
            self.code.extend_from_slice(&key.to_be_bytes());
            self.push_offset(origin, target);
        }
        self
    }

    fn pad_switch(&mut self) {
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
    }

    fn push_offset(&mut self, origin: usize, label: Label) {
        self.fixups.push(Fixup {
            origin,
            at: self.code.len(),
            label,
            wide: true,
        });
        self.code.extend_from_slice(&[0; 4]);
    }

    /// Resolve labels and return the code array.
    ///
    /// # Errors
    ///
    /// Returns an error if the code outgrows [`MAX_CODE_SIZE`], a referenced
    /// label was never bound or a 16-bit branch offset does not fit.
    pub fn finish(&self) -> Result<Vec<u8>> {
        if self.code.len() > MAX_CODE_SIZE {
            return Err(BytecodeError::CodeTooLarge {
                size: self.code.len(),
            });
        }
        let mut code = self.code.clone();
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0]
                .ok_or(BytecodeError::UnboundLabel { bci: fixup.origin })?;
            let out_of_range = |_| BytecodeError::BranchOutOfRange { bci: fixup.origin };
            let offset = i32::try_from(target).map_err(out_of_range)?
                - i32::try_from(fixup.origin).map_err(out_of_range)?;
            if fixup.wide {
                code[fixup.at..fixup.at + 4].copy_from_slice(&offset.to_be_bytes());
            } else {
                let offset = i16::try_from(offset)
                    .map_err(|_| BytecodeError::BranchOutOfRange { bci: fixup.origin })?;
                code[fixup.at..fixup.at + 2].copy_from_slice(&offset.to_be_bytes());
            }
        }
        Ok(code)
    }
}
