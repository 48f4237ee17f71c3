//! # Dicemesh Core
//!
//! Pure primitives for dicemesh: events, clocks, canonical ids, and crypto.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over the session event log and its cryptographic structure.
//!
//! ## Key Types
//!
//! - [`EventRecord`] - An immutable, content-addressed session event
//! - [`EventId`] - Uppercase-hex SHA-256 over the canonical serialization
//! - [`EventKind`] / [`EventBody`] - Discriminator and per-kind payloads
//! - [`VectorClock`] - Causal context folded into every event id
//! - [`PeerId`] - Short base32 fingerprint of an identity key
//! - [`SessionState`] - The deterministic fold of a session's events
//!
//! ## Canonical form
//!
//! Event ids are derived from a pipe-joined canonical pre-image with
//! ordinal parent ordering and compact camelCase payload JSON. See
//! [`codec`].

pub mod clock;
pub mod codec;
pub mod crypto;
pub mod dice;
pub mod error;
pub mod event;
pub mod materialize;

pub use clock::VectorClock;
pub use codec::{canonical_preimage, compute_event_id, recompute_event_id};
pub use crypto::{
    AgreementPublicKey, AgreementSecret, EphemeralAgreement, IdentityKeypair, IdentityPublicKey,
    IdentitySignature, PeerId, SharedSecret,
};
pub use dice::{roll_signed, validate_formula, DiceMode, DiceRollEvidence, DieComponent};
pub use error::{CoreError, Result};
pub use event::{
    ChatMessageBody, DiceRollBody, EventBody, EventId, EventKind, EventRecord, FlagUpdateBody,
    PresenceBody,
};
pub use materialize::{
    materialize, ChatMessageState, DiceRollState, FlagState, PresenceState, SessionState,
};
