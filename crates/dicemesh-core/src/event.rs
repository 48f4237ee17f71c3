//! Events: the atomic unit of the session log.
//!
//! An event is immutable once created. Edits and deletes are represented as
//! later events; the log itself is append-only and forms a DAG through the
//! `parents` edges.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::clock::VectorClock;
use crate::crypto::PeerId;
use crate::dice::DiceRollEvidence;
use crate::error::CoreError;

/// The kind of event, with stable wire numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    /// An ordered chat message.
    ChatMessage = 0,
    /// Last-writer-wins presence update for one peer.
    Presence = 1,
    /// Last-writer-wins keyed flag write or delete.
    FlagUpdate = 2,
    /// A signed dice roll.
    DiceRoll = 3,
}

impl EventKind {
    /// Convert to the wire number.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from the wire number.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ChatMessage),
            1 => Some(Self::Presence),
            2 => Some(Self::FlagUpdate),
            3 => Some(Self::DiceRoll),
            _ => None,
        }
    }
}

/// Content-addressed event identifier: uppercase-hex SHA-256 of the
/// canonical serialization (see [`crate::codec`]).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Wrap an already-computed id.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", &self.0[..self.0.len().min(16)])
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Body of a chat message event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageBody {
    pub message_id: Uuid,
    pub peer_id: PeerId,
    pub device_name: String,
    pub content: String,
    /// Author-claimed creation time (Unix ms). Untrusted.
    pub created_at: i64,
    /// Anchor: the message is ordered immediately after this event.
    /// Absent means "append at the end".
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub after_event_id: Option<EventId>,
}

/// Body of a presence event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceBody {
    pub peer_id: PeerId,
    pub is_online: bool,
    /// Monotone per-peer version, produced by the local writer.
    pub version: u64,
    pub updated_at: i64,
    pub device_name: String,
    pub change_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
}

/// Body of a flag write. A missing `value` deletes the key; the event log
/// itself is the tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdateBody {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<String>,
    pub version: u64,
    pub updated_at: i64,
    pub change_id: Uuid,
}

/// Body of a signed dice roll: the evidence plus the roller's signature
/// over the canonical evidence bytes (base64).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiceRollBody {
    pub evidence: DiceRollEvidence,
    pub signature: String,
}

/// Kind-specific event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    ChatMessage(ChatMessageBody),
    Presence(PresenceBody),
    FlagUpdate(FlagUpdateBody),
    DiceRoll(DiceRollBody),
}

impl EventBody {
    /// The kind tag for this body.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ChatMessage(_) => EventKind::ChatMessage,
            Self::Presence(_) => EventKind::Presence,
            Self::FlagUpdate(_) => EventKind::FlagUpdate,
            Self::DiceRoll(_) => EventKind::DiceRoll,
        }
    }

    /// Canonical payload JSON: camelCase, compact, null-valued fields
    /// omitted. This is the exact text hashed into the event id.
    pub fn payload_json(&self) -> Result<String, CoreError> {
        let result = match self {
            Self::ChatMessage(b) => serde_json::to_string(b),
            Self::Presence(b) => serde_json::to_string(b),
            Self::FlagUpdate(b) => serde_json::to_string(b),
            Self::DiceRoll(b) => serde_json::to_string(b),
        };
        result.map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Parse a payload by its kind tag.
    pub fn from_payload_json(kind: EventKind, payload: &str) -> Result<Self, CoreError> {
        let body = match kind {
            EventKind::ChatMessage => Self::ChatMessage(
                serde_json::from_str(payload)
                    .map_err(|e| CoreError::DecodingError(e.to_string()))?,
            ),
            EventKind::Presence => Self::Presence(
                serde_json::from_str(payload)
                    .map_err(|e| CoreError::DecodingError(e.to_string()))?,
            ),
            EventKind::FlagUpdate => Self::FlagUpdate(
                serde_json::from_str(payload)
                    .map_err(|e| CoreError::DecodingError(e.to_string()))?,
            ),
            EventKind::DiceRoll => Self::DiceRoll(
                serde_json::from_str(payload)
                    .map_err(|e| CoreError::DecodingError(e.to_string()))?,
            ),
        };
        Ok(body)
    }
}

/// A complete event: metadata, causal context, and body.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Content-addressed id (uppercase-hex SHA-256).
    pub event_id: EventId,
    /// Which session's log this event belongs to.
    pub session_id: i64,
    /// Kind tag, redundant with the body but kept for cheap dispatch.
    pub kind: EventKind,
    /// Monotone logical clock, strictly above all known parents.
    pub lamport_clock: u64,
    /// Producer-claimed wall clock (Unix ms). Untrusted.
    pub timestamp: i64,
    /// Parent event ids (the session heads at produce time).
    pub parents: Vec<EventId>,
    /// Causal context at produce time.
    pub vector_clock: VectorClock,
    /// Kind-specific payload.
    pub body: EventBody,
    /// Whether this replica received the event from a peer.
    pub is_imported: bool,
}

impl EventRecord {
    /// Parent ids sorted ordinally ascending, as hashed and persisted.
    pub fn sorted_parents(&self) -> Vec<EventId> {
        let mut parents = self.parents.clone();
        parents.sort();
        parents
    }
}
