//! # Core Error Types
//!
//! The pacing protocol itself never returns errors: illegal calls in the
//! wrong state are ignored. Errors exist only at the edges, where
//! configuration is loaded.

use thiserror::Error;

/// Errors raised while loading or validating pacing configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML source could not be parsed.
    #[error("invalid pacing config: {0}")]
    Parse(String),

    /// A field holds a value the pacing protocol cannot operate with.
    #[error("invalid pacing config: {field} must be non-zero")]
    ZeroField {
        /// Name of the offending field.
        field: &'static str,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, ConfigError>;
