//! # Dicemesh Sync
//!
//! Gossip/anti-entropy exchange between authenticated peers.
//!
//! One round per session: announce heads and known ids, answer with the
//! peer's missing events, import what arrives. Content addressing makes
//! the round idempotent and order-independent, so replicas converge no
//! matter how rounds interleave.

pub mod error;
pub mod exchange;
pub mod wire;

pub use error::{GossipError, Result};
pub use exchange::{
    memory::memory_link_pair, run_round, ChannelLink, EventLog, ExchangeReport, GossipLink,
    GossipMessage,
};
pub use wire::{decode_batch, encode_batch, WireEvent};
