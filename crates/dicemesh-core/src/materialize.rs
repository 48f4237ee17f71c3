//! CRDT materialization: a deterministic fold from an event set to state.
//!
//! Two replicas holding the same event set compute byte-equal states, no
//! matter what order the events arrived in. Determinism comes from the
//! topological ordering (keyed by lamport clock, then ordinal event id)
//! and from fold rules that only ever consult data inside the events.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::crypto::PeerId;
use crate::dice::DiceRollEvidence;
use crate::event::{EventBody, EventId, EventRecord};

/// One chat message in display order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessageState {
    pub event_id: EventId,
    pub message_id: Uuid,
    pub peer_id: PeerId,
    pub device_name: String,
    pub content: String,
    pub created_at: i64,
}

/// Latest presence for one peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceState {
    pub peer_id: PeerId,
    pub is_online: bool,
    pub version: u64,
    pub updated_at: i64,
    pub device_name: String,
    pub status: Option<String>,
    pub event_id: EventId,
}

/// Latest value for one flag key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagState {
    pub value: String,
    pub version: u64,
    pub updated_at: i64,
    pub event_id: EventId,
}

/// One dice roll in history order, with its audit result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiceRollState {
    pub event_id: EventId,
    pub evidence: DiceRollEvidence,
    pub signature_valid: bool,
}

/// Materialized session state. Read-only; rebuilt from the log on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub chat: Vec<ChatMessageState>,
    pub presence: BTreeMap<PeerId, PresenceState>,
    pub flags: BTreeMap<String, FlagState>,
    pub dice_history: Vec<DiceRollState>,
}

/// Fold a session's events into state.
pub fn materialize(events: &[EventRecord]) -> SessionState {
    let ordered = topological_order(events);

    let mut state = SessionState::default();
    let mut seen_messages: HashSet<Uuid> = HashSet::new();

    for event in ordered {
        match &event.body {
            EventBody::ChatMessage(body) => {
                if !seen_messages.insert(body.message_id) {
                    continue;
                }
                let message = ChatMessageState {
                    event_id: event.event_id.clone(),
                    message_id: body.message_id,
                    peer_id: body.peer_id.clone(),
                    device_name: body.device_name.clone(),
                    content: body.content.clone(),
                    created_at: body.created_at,
                };
                let position = body.after_event_id.as_ref().and_then(|anchor| {
                    state.chat.iter().position(|m| &m.event_id == anchor)
                });
                match position {
                    Some(i) => state.chat.insert(i + 1, message),
                    None => state.chat.push(message),
                }
            }
            EventBody::Presence(body) => {
                let candidate = PresenceState {
                    peer_id: body.peer_id.clone(),
                    is_online: body.is_online,
                    version: body.version,
                    updated_at: body.updated_at,
                    device_name: body.device_name.clone(),
                    status: body.status.clone(),
                    event_id: event.event_id.clone(),
                };
                let wins = match state.presence.get(&body.peer_id) {
                    Some(current) => lww_wins(
                        (candidate.version, candidate.updated_at, &candidate.event_id),
                        (current.version, current.updated_at, &current.event_id),
                    ),
                    None => true,
                };
                if wins {
                    state.presence.insert(body.peer_id.clone(), candidate);
                }
            }
            EventBody::FlagUpdate(body) => {
                let wins = match state.flags.get(&body.key) {
                    Some(current) => lww_wins(
                        (body.version, body.updated_at, &event.event_id),
                        (current.version, current.updated_at, &current.event_id),
                    ),
                    None => true,
                };
                if wins {
                    match &body.value {
                        Some(value) => {
                            state.flags.insert(
                                body.key.clone(),
                                FlagState {
                                    value: value.clone(),
                                    version: body.version,
                                    updated_at: body.updated_at,
                                    event_id: event.event_id.clone(),
                                },
                            );
                        }
                        // The event log is the tombstone; the map entry goes.
                        None => {
                            state.flags.remove(&body.key);
                        }
                    }
                }
            }
            EventBody::DiceRoll(body) => {
                let signature_valid = body.evidence.verify(&body.signature);
                if !signature_valid {
                    warn!(
                        event_id = %event.event_id,
                        roll_id = %body.evidence.roll_id,
                        "dice roll signature failed verification"
                    );
                }
                state.dice_history.push(DiceRollState {
                    event_id: event.event_id.clone(),
                    evidence: body.evidence.clone(),
                    signature_valid,
                });
            }
        }
    }

    state
}

/// Candidate-vs-incumbent last-writer-wins tie-break:
/// higher version, then higher updated_at, then greater event id.
fn lww_wins(candidate: (u64, i64, &EventId), current: (u64, i64, &EventId)) -> bool {
    candidate > current
}

/// Order events topologically, breaking ties by (lamport, event id).
///
/// Parents missing from the input are tolerated (unknown ancestors do not
/// block replay). Events are content-addressed so cycles cannot occur, but
/// anything left unreached is still appended at the end by the same key.
fn topological_order(events: &[EventRecord]) -> Vec<&EventRecord> {
    let index: HashMap<&EventId, usize> = events
        .iter()
        .enumerate()
        .map(|(i, e)| (&e.event_id, i))
        .collect();

    let mut indegree = vec![0usize; events.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); events.len()];
    for (i, event) in events.iter().enumerate() {
        for parent in &event.parents {
            if let Some(&pi) = index.get(parent) {
                indegree[i] += 1;
                children[pi].push(i);
            }
        }
    }

    let mut heap: BinaryHeap<Reverse<(u64, &EventId, usize)>> = events
        .iter()
        .enumerate()
        .filter(|(i, _)| indegree[*i] == 0)
        .map(|(i, e)| Reverse((e.lamport_clock, &e.event_id, i)))
        .collect();

    let mut ordered = Vec::with_capacity(events.len());
    let mut emitted = vec![false; events.len()];
    while let Some(Reverse((_, _, i))) = heap.pop() {
        if emitted[i] {
            continue;
        }
        emitted[i] = true;
        ordered.push(&events[i]);
        for &child in &children[i] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                heap.push(Reverse((
                    events[child].lamport_clock,
                    &events[child].event_id,
                    child,
                )));
            }
        }
    }

    if ordered.len() < events.len() {
        let mut rest: Vec<usize> = (0..events.len()).filter(|&i| !emitted[i]).collect();
        rest.sort_by_key(|&i| (events[i].lamport_clock, &events[i].event_id));
        ordered.extend(rest.into_iter().map(|i| &events[i]));
    }

    ordered
}
