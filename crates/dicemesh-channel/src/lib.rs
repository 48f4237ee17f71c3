//! # Dicemesh Channel
//!
//! The secure peer channel: a mutually-authenticated, forward-secret,
//! AEAD-framed byte stream between two devices.
//!
//! ## Protocol
//!
//! 1. **Handshake** - initiator sends a signed hello carrying its identity
//!    key, static key-exchange key, and a fresh ephemeral key; the
//!    responder verifies and answers in kind ([`handshake`]).
//! 2. **Key schedule** - four X25519 agreements are combined under a
//!    transcript-salted HKDF into directional AES-256-GCM keys ([`keys`]).
//! 3. **Data** - frames carry a sequence number and an explicit nonce;
//!    the receive side enforces anti-replay and acks every accepted frame
//!    ([`channel`]).
//!
//! The transport below is any reliable ordered byte pipe implementing
//! `AsyncRead + AsyncWrite`; framing is added here ([`frame`]).

pub mod channel;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod keys;

pub use channel::{ChannelConfig, ChannelEvent, SecureChannel, SecurityReason};
pub use error::{ChannelError, Result};
pub use frame::{read_frame, write_frame, FrameCode, RawFrame, MAX_FRAME_PAYLOAD};
pub use handshake::{
    verify_payload, ChannelIdentity, HandshakePayload, PeerDescriptor, VerifiedPeer,
};
pub use keys::{derive_session_keys, Role, SessionKeys};
