//! Error types for the dicemesh core.

use thiserror::Error;

/// Core errors that can occur while building, encoding, or folding events.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("unknown event kind: {0}")]
    UnknownKind(u8),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("dice formula invalid: {0}")]
    FormulaInvalid(String),

    #[error("dice formula out of range: {0}")]
    FormulaOutOfRange(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
