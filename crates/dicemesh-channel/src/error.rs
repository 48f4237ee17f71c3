//! Error types for the secure channel.

use thiserror::Error;

/// Errors that can occur while establishing or using a secure channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Handshake peer id does not match the identity-key fingerprint.
    #[error("peer identity mismatch: claimed {claimed}, computed {computed}")]
    PeerIdentityMismatch { claimed: String, computed: String },

    /// Ed25519 verification of the handshake signature failed.
    #[error("handshake signature invalid")]
    HandshakeSignatureInvalid,

    /// Session id differs between hello and ack.
    #[error("session mismatch: expected {expected}, got {got}")]
    SessionMismatch { expected: String, got: String },

    /// AEAD open failed.
    #[error("cryptographic failure: {0}")]
    CryptographicFailure(String),

    /// Sequence number already seen.
    #[error("replay detected: sequence {0}")]
    ReplayDetected(u64),

    /// No ack arrived within the configured timeout.
    #[error("ack timeout for sequence {0}")]
    AckTimeout(u64),

    /// Frame code not in the enumerated set.
    #[error("unknown frame code: {0}")]
    UnknownFrame(u8),

    /// Frame structure could not be parsed.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Caller requested cancellation.
    #[error("cancelled")]
    Cancelled,

    /// Channel is closed.
    #[error("channel closed")]
    Closed,

    /// Handshake payload (de)serialization failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Underlying byte pipe failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
