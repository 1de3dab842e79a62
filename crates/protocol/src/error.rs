//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer too small to hold the structure being decoded
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Field value too long for its fixed-size slot on the wire
    #[error("Field {field} too long: {len} bytes (max: {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// I/O error while writing a record
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
