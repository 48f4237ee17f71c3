//! Wire representation of events and batches.
//!
//! A wire event is a flat record mirroring the stored event, with the
//! vector clock and body rendered as strings so any peer can relay events
//! it cannot fully interpret. Batches are JSON arrays; the empty batch
//! encodes as the empty string.

use serde::{Deserialize, Serialize};
use tracing::warn;

use dicemesh_core::{EventBody, EventId, EventKind, EventRecord, VectorClock};

use crate::error::{GossipError, Result};

/// Flat wire form of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub event_id: String,
    pub session_id: i64,
    pub kind: u8,
    pub lamport_clock: u64,
    pub timestamp: i64,
    pub vector_clock_json: String,
    pub parents: Vec<String>,
    /// The kind-specific body as its canonical JSON string.
    pub payload: String,
}

impl WireEvent {
    /// Render a stored event for the wire.
    pub fn from_record(record: &EventRecord) -> Result<Self> {
        Ok(Self {
            event_id: record.event_id.to_string(),
            session_id: record.session_id,
            kind: record.kind.to_u8(),
            lamport_clock: record.lamport_clock,
            timestamp: record.timestamp,
            vector_clock_json: record.vector_clock.to_json(),
            parents: record
                .sorted_parents()
                .into_iter()
                .map(|p| p.to_string())
                .collect(),
            payload: record
                .body
                .payload_json()
                .map_err(|e| GossipError::Encoding(e.to_string()))?,
        })
    }

    /// Rebuild the event for import. The record is marked as imported;
    /// the transmitted id is kept verbatim for the importer's hash check.
    pub fn into_record(self) -> Result<EventRecord> {
        let kind = EventKind::from_u8(self.kind)
            .ok_or_else(|| GossipError::Decoding(format!("unknown event kind {}", self.kind)))?;
        let body = EventBody::from_payload_json(kind, &self.payload)
            .map_err(|e| GossipError::Decoding(e.to_string()))?;
        let vector_clock = VectorClock::from_json(&self.vector_clock_json)
            .map_err(|e| GossipError::Decoding(e.to_string()))?;

        Ok(EventRecord {
            event_id: EventId::from_string(self.event_id),
            session_id: self.session_id,
            kind,
            lamport_clock: self.lamport_clock,
            timestamp: self.timestamp,
            parents: self.parents.into_iter().map(EventId::from_string).collect(),
            vector_clock,
            body,
            is_imported: true,
        })
    }
}

/// Serialize a batch of events. Empty batch encodes as the empty string.
pub fn encode_batch(events: &[EventRecord]) -> Result<String> {
    if events.is_empty() {
        return Ok(String::new());
    }
    let wire: Vec<WireEvent> = events
        .iter()
        .map(WireEvent::from_record)
        .collect::<Result<_>>()?;
    serde_json::to_string(&wire).map_err(|e| GossipError::Encoding(e.to_string()))
}

/// Parse a batch. Individual events that no longer decode are skipped
/// with a warning; a corrupt record degrades the batch, not the session.
pub fn decode_batch(batch: &str) -> Result<Vec<EventRecord>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let wire: Vec<WireEvent> =
        serde_json::from_str(batch).map_err(|e| GossipError::Decoding(e.to_string()))?;

    let mut events = Vec::with_capacity(wire.len());
    for entry in wire {
        let event_id = entry.event_id.clone();
        match entry.into_record() {
            Ok(record) => events.push(record),
            Err(e) => warn!(event_id, error = %e, "skipping undecodable wire event"),
        }
    }
    Ok(events)
}
