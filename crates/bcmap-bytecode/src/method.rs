//! Method code bodies.

use crate::{ByteStream, ExceptionHandler, Result};

/// Code array and exception table of one method.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MethodCode {
    /// Method name, used in diagnostics only.
    pub name: String,
    /// Raw bytecode.
    pub code: Vec<u8>,
    /// Exception table in priority order.
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodCode {
    #[must_use]
    pub fn new(name: impl Into<String>, code: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            code,
            exception_handlers: Vec::new(),
        }
    }

    /// Attach an exception table.
    #[must_use]
    pub fn with_handlers(mut self, handlers: Vec<ExceptionHandler>) -> Self {
        self.exception_handlers = handlers;
        self
    }

    /// Size of the code array in bytes.
    #[must_use]
    pub const fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Open a validated stream over the code.
    ///
    /// # Errors
    ///
    /// Returns an error if the code array is malformed.
    pub fn stream(&self) -> Result<ByteStream<'_>> {
        ByteStream::new(&self.code)
    }
}
