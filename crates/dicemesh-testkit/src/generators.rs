//! Proptest generators for property-based testing.

use proptest::prelude::*;

use dicemesh_core::{IdentityKeypair, PeerId, VectorClock};

/// Generate a random keypair (via its seed, so failures shrink nicely).
pub fn keypair() -> impl Strategy<Value = IdentityKeypair> {
    any::<[u8; 32]>().prop_map(|seed| IdentityKeypair::from_seed(&seed))
}

/// Generate a random peer id.
pub fn peer_id() -> impl Strategy<Value = PeerId> {
    keypair().prop_map(|kp| kp.peer_id())
}

/// Generate a vector clock over a small peer universe.
pub fn vector_clock() -> impl Strategy<Value = VectorClock> {
    prop::collection::vec((0u8..8, 1u64..100), 0..6).prop_map(|entries| {
        let mut clock = VectorClock::new();
        for (peer, ticks) in entries {
            let peer = IdentityKeypair::from_seed(&[peer; 32]).peer_id();
            for _ in 0..ticks.min(5) {
                clock = clock.increment(&peer);
            }
        }
        clock
    })
}

/// A 10-token alphabet for keys and contents in convergence runs.
const TOKENS: [&str; 10] = [
    "amber", "bolt", "cinder", "drake", "ember", "fang", "gale", "hex", "iris", "jade",
];

/// Generate one token.
pub fn token() -> impl Strategy<Value = String> {
    (0..TOKENS.len()).prop_map(|i| TOKENS[i].to_string())
}

/// One operation in a random replica history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Chat(String),
    FlagSet(String, String),
    FlagClear(String),
}

/// Generate one operation.
pub fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        token().prop_map(Op::Chat),
        (token(), token()).prop_map(|(k, v)| Op::FlagSet(k, v)),
        token().prop_map(Op::FlagClear),
    ]
}

/// Generate an operation list of up to `max` ops.
pub fn op_list(max: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op(), 0..=max)
}
