//! Exception handler table entries.

/// One entry of a method's exception table.
///
/// The table order is the handler priority: the first matching entry wins.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// First bci covered by the handler.
    pub start_bci: usize,
    /// First bci no longer covered (exclusive).
    pub end_bci: usize,
    /// Bci of the handler's entry instruction.
    pub handler_bci: usize,
    /// Name of the caught class, or `None` for a catch-all (`finally`, `any`).
    pub catch_type: Option<String>,
}

impl ExceptionHandler {
    #[must_use]
    pub const fn new(
        start_bci: usize,
        end_bci: usize,
        handler_bci: usize,
        catch_type: Option<String>,
    ) -> Self {
        Self {
            start_bci,
            end_bci,
            handler_bci,
            catch_type,
        }
    }

    /// Create a handler catching `catch_type`.
    #[must_use]
    pub fn typed(
        start_bci: usize,
        end_bci: usize,
        handler_bci: usize,
        catch_type: impl Into<String>,
    ) -> Self {
        Self::new(start_bci, end_bci, handler_bci, Some(catch_type.into()))
    }

    /// Create a catch-all handler.
    #[must_use]
    pub const fn catch_all(start_bci: usize, end_bci: usize, handler_bci: usize) -> Self {
        Self {
            start_bci,
            end_bci,
            handler_bci,
            catch_type: None,
        }
    }

    /// Check if this handler catches every exception.
    #[must_use]
    pub const fn is_catch_all(&self) -> bool {
        self.catch_type.is_none()
    }

    /// Check if `bci` lies in the covered range.
    #[must_use]
    pub const fn covers(&self, bci: usize) -> bool {
        bci >= self.start_bci && bci < self.end_bci
    }
}
