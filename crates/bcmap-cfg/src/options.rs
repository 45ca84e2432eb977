//! Block mapping configuration.

use std::str::FromStr;

use thiserror::Error;

/// Default irreducible-loop duplication budget multiplier.
pub const DEFAULT_MAX_DUPLICATION_FACTOR: f64 = 2.0;

/// Errors from parsing option overrides.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    #[error("Unknown option: {0}")]
    UnknownOption(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("Expected key=value, got: {0}")]
    MissingValue(String),
}

/// Options controlling block map construction.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockMapOptions {
    /// Maximum extra effort spent on irreducible loops, as a multiple of the
    /// block count. A value <= 1 disables support for irreducible loops.
    pub max_duplication_factor: f64,
    /// Whether methods containing jsr/ret are mapped at all.
    pub support_jsr_bytecodes: bool,
    /// Start blocks at exception range boundaries (improves liveness
    /// precision when asynchronous exceptions can occur).
    pub split_exception_ranges: bool,
}

impl Default for BlockMapOptions {
    fn default() -> Self {
        Self {
            max_duplication_factor: DEFAULT_MAX_DUPLICATION_FACTOR,
            support_jsr_bytecodes: true,
            split_exception_ranges: false,
        }
    }
}

impl BlockMapOptions {
    #[must_use]
    pub const fn with_max_duplication_factor(mut self, factor: f64) -> Self {
        self.max_duplication_factor = factor;
        self
    }

    #[must_use]
    pub const fn with_jsr_support(mut self, enabled: bool) -> Self {
        self.support_jsr_bytecodes = enabled;
        self
    }

    #[must_use]
    pub const fn with_split_exception_ranges(mut self, enabled: bool) -> Self {
        self.split_exception_ranges = enabled;
        self
    }

    /// Check if irreducible loops may be resolved by duplication.
    #[must_use]
    pub const fn irreducible_loops_enabled(&self) -> bool {
        self.max_duplication_factor > 1.0
    }

    /// Apply a single `key=value` override.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown keys or unparsable values.
    pub fn apply(&mut self, entry: &str) -> Result<(), OptionsError> {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| OptionsError::MissingValue(entry.to_string()))?;
        let key = key.trim();
        let value = value.trim();
        let invalid = || OptionsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "max-duplication-factor" => {
                self.max_duplication_factor = value.parse().map_err(|_| invalid())?;
            }
            "support-jsr-bytecodes" => {
                self.support_jsr_bytecodes = parse_bool(value).ok_or_else(invalid)?;
            }
            "split-exception-ranges" => {
                self.split_exception_ranges = parse_bool(value).ok_or_else(invalid)?;
            }
            _ => return Err(OptionsError::UnknownOption(key.to_string())),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "on" | "1" => Some(true),
        "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parses comma-separated `key=value` overrides on top of the defaults.
impl FromStr for BlockMapOptions {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = Self::default();
        for entry in s.split(',').filter(|entry| !entry.trim().is_empty()) {
            options.apply(entry)?;
        }
        Ok(options)
    }
}
