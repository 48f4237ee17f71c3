//! Canonical event serialization and content-address derivation.
//!
//! The canonical pre-image of an event is the pipe-joined concatenation
//!
//! ```text
//! session_id | kind | lamport | timestamp | clock_canonical | parent_1 | .. | parent_N | payload_json
//! ```
//!
//! with parents sorted ordinally ascending and the payload rendered as
//! compact camelCase JSON with null-valued fields omitted. The event id is
//! the uppercase-hex SHA-256 of that pre-image. Any peer can recompute and
//! verify ids on import, which is what makes the log content-addressed.

use sha2::{Digest, Sha256};

use crate::clock::VectorClock;
use crate::error::CoreError;
use crate::event::{EventBody, EventId, EventKind, EventRecord};

/// The field separator of the canonical pre-image (ASCII `0x7C`).
const SEPARATOR: u8 = b'|';

/// Build the canonical pre-image from event parts.
///
/// `parents` are sorted internally; callers may pass them in any order.
pub fn canonical_preimage(
    session_id: i64,
    kind: EventKind,
    lamport_clock: u64,
    timestamp: i64,
    vector_clock: &VectorClock,
    parents: &[EventId],
    payload_json: &str,
) -> Vec<u8> {
    let mut sorted: Vec<&EventId> = parents.iter().collect();
    sorted.sort();

    let mut buf = Vec::with_capacity(128 + payload_json.len());
    buf.extend_from_slice(session_id.to_string().as_bytes());
    buf.push(SEPARATOR);
    buf.extend_from_slice(kind.to_u8().to_string().as_bytes());
    buf.push(SEPARATOR);
    buf.extend_from_slice(lamport_clock.to_string().as_bytes());
    buf.push(SEPARATOR);
    buf.extend_from_slice(timestamp.to_string().as_bytes());
    buf.push(SEPARATOR);
    buf.extend_from_slice(vector_clock.canonical_string().as_bytes());
    for parent in sorted {
        buf.push(SEPARATOR);
        buf.extend_from_slice(parent.as_str().as_bytes());
    }
    buf.push(SEPARATOR);
    buf.extend_from_slice(payload_json.as_bytes());
    buf
}

/// Compute the content-addressed id for event parts.
pub fn compute_event_id(
    session_id: i64,
    lamport_clock: u64,
    timestamp: i64,
    vector_clock: &VectorClock,
    parents: &[EventId],
    body: &EventBody,
) -> Result<EventId, CoreError> {
    let payload = body.payload_json()?;
    let preimage = canonical_preimage(
        session_id,
        body.kind(),
        lamport_clock,
        timestamp,
        vector_clock,
        parents,
        &payload,
    );
    Ok(EventId::from_string(hex::encode_upper(Sha256::digest(
        &preimage,
    ))))
}

/// Recompute the id of an existing record from its own fields.
///
/// Used on import to verify the transmitted id (content-hash check) and in
/// tests to assert invariant I1.
pub fn recompute_event_id(record: &EventRecord) -> Result<EventId, CoreError> {
    compute_event_id(
        record.session_id,
        record.lamport_clock,
        record.timestamp,
        &record.vector_clock,
        &record.parents,
        &record.body,
    )
}
