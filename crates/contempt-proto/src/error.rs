//! Error types for the contempt-proto crate.

use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a packet or payload.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a packet or payload.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Gateway opcode outside the recognised set.
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}
