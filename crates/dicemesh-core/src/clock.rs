//! Vector clocks: per-peer monotone counters with pointwise merge.
//!
//! Clocks are pure values. `increment` and `merge` return new clocks and
//! never mutate in place, so cached clocks can be shared freely. All
//! iteration and canonical rendering is byte-ordinal over peer ids, which
//! is what makes event ids identical across peers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::crypto::PeerId;
use crate::error::CoreError;

/// A mapping from peer id to a non-negative counter.
///
/// Absent peers read as 0. Serialized as a JSON object.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<PeerId, u64>);

impl VectorClock {
    /// The empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a peer's counter (0 when absent).
    pub fn get(&self, peer: &PeerId) -> u64 {
        self.0.get(peer).copied().unwrap_or(0)
    }

    /// Return a new clock with `peer` incremented by one.
    pub fn increment(&self, peer: &PeerId) -> Self {
        let mut entries = self.0.clone();
        *entries.entry(peer.clone()).or_insert(0) += 1;
        Self(entries)
    }

    /// Return the pointwise maximum of two clocks.
    pub fn merge(&self, other: &Self) -> Self {
        let mut entries = self.0.clone();
        for (peer, &value) in &other.0 {
            let slot = entries.entry(peer.clone()).or_insert(0);
            if value > *slot {
                *slot = value;
            }
        }
        Self(entries)
    }

    /// Deterministic string form: `peer:value|peer:value`, ordinal order.
    ///
    /// This is the form hashed into event ids.
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        for (i, (peer, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            out.push_str(peer.as_str());
            out.push(':');
            out.push_str(&value.to_string());
        }
        out
    }

    /// Serialize as a JSON object.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("clock serialization cannot fail")
    }

    /// Parse from a JSON object.
    pub fn from_json(s: &str) -> Result<Self, CoreError> {
        serde_json::from_str(s).map_err(|e| CoreError::DecodingError(e.to_string()))
    }

    /// Iterate entries in ordinal peer order.
    pub fn entries(&self) -> impl Iterator<Item = (&PeerId, u64)> {
        self.0.iter().map(|(p, &v)| (p, v))
    }

    /// Number of peers with a non-default entry.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no peer has ticked yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VectorClock({})", self.canonical_string())
    }
}
