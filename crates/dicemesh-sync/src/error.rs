//! Error types for the gossip exchange.

use thiserror::Error;

/// Errors that can occur during a gossip round.
#[derive(Debug, Error)]
pub enum GossipError {
    /// Wire record or message serialization failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Wire record or message deserialization failed.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The secure channel below failed.
    #[error("channel error: {0}")]
    Channel(#[from] dicemesh_channel::ChannelError),

    /// The local event log rejected an operation.
    #[error("event log error: {0}")]
    Log(String),

    /// The peer went silent mid-round.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The peer disconnected mid-round.
    #[error("peer disconnected")]
    PeerDisconnected,
}

/// Result type for gossip operations.
pub type Result<T> = std::result::Result<T, GossipError>;
