//! Error types for data parsing in gattscope-types.

use thiserror::Error;

/// Errors that can occur when parsing user-supplied identifiers or values.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in gattscope-core).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The string is not a 16-bit, 32-bit or 128-bit Bluetooth UUID.
    #[error("Invalid UUID '{0}': expected 4, 8 or 32 hex digits")]
    InvalidUuid(String),

    /// The string is not a sequence of hex byte pairs.
    #[error("Invalid hex at position {position}: {message}")]
    InvalidHex {
        /// Character offset of the offending input.
        position: usize,
        /// What went wrong.
        message: String,
    },
}

/// Result type alias using gattscope-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
