//! The anti-entropy round that converges two replicas.
//!
//! Each side announces its heads and known event ids, answers the peer's
//! announcement with the events the peer is missing, and imports whatever
//! arrives. Import is idempotent (content-addressed dedup) and ordering is
//! recomputed at materialization, so rounds can interleave or repeat in
//! any order and replicas still converge.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dicemesh_channel::{ChannelEvent, SecureChannel};
use dicemesh_core::{EventId, EventRecord};

use crate::error::{GossipError, Result};
use crate::wire::{decode_batch, encode_batch};

/// The local event log as the exchange sees it. Implemented by the sync
/// engine facade.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Current head ids for a session.
    async fn head_ids(&self, session_id: i64) -> Result<Vec<EventId>>;

    /// Every event id this replica holds for a session.
    async fn known_ids(&self, session_id: i64) -> Result<Vec<EventId>>;

    /// Events the peer is missing, in canonical order.
    async fn missing_events(
        &self,
        session_id: i64,
        known: &BTreeSet<EventId>,
    ) -> Result<Vec<EventRecord>>;

    /// Import a batch of remote events; returns how many were new.
    async fn import(&self, events: Vec<EventRecord>) -> Result<usize>;
}

/// Gossip messages exchanged over an authenticated channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum GossipMessage {
    /// "Here is what I have": heads plus the full known-id set.
    #[serde(rename_all = "camelCase")]
    Announce {
        session_id: i64,
        heads: Vec<String>,
        known_ids: Vec<String>,
    },
    /// "Here is what you were missing": a wire batch (may be empty).
    #[serde(rename_all = "camelCase")]
    Batch { session_id: i64, batch: String },
}

/// A bidirectional, message-oriented port for gossip messages.
///
/// The production implementation rides the secure channel
/// ([`ChannelLink`]); tests use [`memory::memory_link_pair`].
#[async_trait]
pub trait GossipLink: Send {
    /// Send one message.
    async fn send(&mut self, message: &GossipMessage) -> Result<()>;

    /// Receive the next message, or `None` on timeout.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<GossipMessage>>;
}

/// Outcome of one exchange round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Events we shipped to the peer.
    pub sent: usize,
    /// Events that arrived from the peer.
    pub received: usize,
    /// How many of those were new to us.
    pub imported: usize,
}

/// Run one symmetric convergence round for a session.
///
/// Both peers call this concurrently over the same link.
pub async fn run_round<L, K>(
    log: &L,
    link: &mut K,
    session_id: i64,
    timeout: Duration,
) -> Result<ExchangeReport>
where
    L: EventLog + ?Sized,
    K: GossipLink,
{
    let heads = log.head_ids(session_id).await?;
    let known = log.known_ids(session_id).await?;
    link.send(&GossipMessage::Announce {
        session_id,
        heads: heads.iter().map(|h| h.to_string()).collect(),
        known_ids: known.iter().map(|k| k.to_string()).collect(),
    })
    .await?;

    let mut report = ExchangeReport::default();
    let mut answered_announce = false;
    let mut imported_batch = false;

    while !(answered_announce && imported_batch) {
        let message = link
            .recv(timeout)
            .await?
            .ok_or_else(|| GossipError::Timeout("waiting for gossip message".into()))?;

        match message {
            GossipMessage::Announce {
                session_id: sid,
                known_ids,
                ..
            } if sid == session_id => {
                let peer_known: BTreeSet<EventId> =
                    known_ids.into_iter().map(EventId::from_string).collect();
                let missing = log.missing_events(session_id, &peer_known).await?;
                report.sent = missing.len();
                link.send(&GossipMessage::Batch {
                    session_id,
                    batch: encode_batch(&missing)?,
                })
                .await?;
                answered_announce = true;
            }
            GossipMessage::Batch {
                session_id: sid,
                batch,
            } if sid == session_id => {
                let events = decode_batch(&batch)?;
                report.received = events.len();
                report.imported = log.import(events).await?;
                imported_batch = true;
            }
            other => {
                warn!(?other, session_id, "ignoring gossip message for other session");
            }
        }
    }

    debug!(
        session_id,
        sent = report.sent,
        received = report.received,
        imported = report.imported,
        "gossip round complete"
    );
    Ok(report)
}

/// Gossip port over an established secure channel.
pub struct ChannelLink<'a, S> {
    channel: &'a SecureChannel<S>,
    events: &'a mut mpsc::UnboundedReceiver<ChannelEvent>,
}

impl<'a, S> ChannelLink<'a, S> {
    pub fn new(
        channel: &'a SecureChannel<S>,
        events: &'a mut mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self { channel, events }
    }
}

#[async_trait]
impl<S> GossipLink for ChannelLink<'_, S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&mut self, message: &GossipMessage) -> Result<()> {
        let bytes =
            serde_json::to_vec(message).map_err(|e| GossipError::Encoding(e.to_string()))?;
        self.channel.send(&bytes).await?;
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<GossipMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(GossipError::PeerDisconnected),
                Ok(Some(event)) => event,
            };
            match event {
                ChannelEvent::Message(bytes) => {
                    let message = serde_json::from_slice(&bytes)
                        .map_err(|e| GossipError::Decoding(e.to_string()))?;
                    return Ok(Some(message));
                }
                // Security events are surfaced elsewhere; the round goes on.
                ChannelEvent::Security { .. } => continue,
                ChannelEvent::PeerDisconnected(_) => {
                    return Err(GossipError::PeerDisconnected)
                }
            }
        }
    }
}

/// In-memory link pair for tests.
pub mod memory {
    use super::*;

    /// One end of an in-memory gossip link.
    pub struct MemoryLink {
        tx: mpsc::UnboundedSender<GossipMessage>,
        rx: mpsc::UnboundedReceiver<GossipMessage>,
    }

    /// Create a connected pair of links.
    pub fn memory_link_pair() -> (MemoryLink, MemoryLink) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MemoryLink { tx: a_tx, rx: b_rx },
            MemoryLink { tx: b_tx, rx: a_rx },
        )
    }

    #[async_trait]
    impl GossipLink for MemoryLink {
        async fn send(&mut self, message: &GossipMessage) -> Result<()> {
            self.tx
                .send(message.clone())
                .map_err(|_| GossipError::PeerDisconnected)
        }

        async fn recv(&mut self, timeout: Duration) -> Result<Option<GossipMessage>> {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Err(_) => Ok(None),
                Ok(None) => Err(GossipError::PeerDisconnected),
                Ok(Some(message)) => Ok(Some(message)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::memory_link_pair;
    use super::*;
    use std::sync::Mutex;

    use dicemesh_core::{compute_event_id, EventBody, FlagUpdateBody, PeerId, VectorClock};
    use uuid::Uuid;

    /// Minimal log: a set of events behind a mutex, import = union.
    struct TestLog {
        events: Mutex<Vec<EventRecord>>,
    }

    impl TestLog {
        fn new(events: Vec<EventRecord>) -> Self {
            Self {
                events: Mutex::new(events),
            }
        }

        fn ids(&self) -> BTreeSet<EventId> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event_id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventLog for TestLog {
        async fn head_ids(&self, _session_id: i64) -> Result<Vec<EventId>> {
            Ok(self.ids().into_iter().collect())
        }

        async fn known_ids(&self, _session_id: i64) -> Result<Vec<EventId>> {
            Ok(self.ids().into_iter().collect())
        }

        async fn missing_events(
            &self,
            _session_id: i64,
            known: &BTreeSet<EventId>,
        ) -> Result<Vec<EventRecord>> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| !known.contains(&e.event_id))
                .cloned()
                .collect())
        }

        async fn import(&self, events: Vec<EventRecord>) -> Result<usize> {
            let mut stored = self.events.lock().unwrap();
            let existing: BTreeSet<EventId> =
                stored.iter().map(|e| e.event_id.clone()).collect();
            let mut imported = 0;
            for event in events {
                if !existing.contains(&event.event_id) {
                    stored.push(event);
                    imported += 1;
                }
            }
            Ok(imported)
        }
    }

    fn make_event(session_id: i64, lamport: u64, key: &str) -> EventRecord {
        let body = EventBody::FlagUpdate(FlagUpdateBody {
            key: key.into(),
            value: Some(format!("v{lamport}")),
            version: lamport,
            updated_at: lamport as i64,
            change_id: Uuid::nil(),
        });
        let clock = VectorClock::new().increment(&PeerId::from_string("AAAAAAAAAA"));
        let event_id =
            compute_event_id(session_id, lamport, lamport as i64, &clock, &[], &body).unwrap();
        EventRecord {
            event_id,
            session_id,
            kind: body.kind(),
            lamport_clock: lamport,
            timestamp: lamport as i64,
            parents: vec![],
            vector_clock: clock,
            body,
            is_imported: false,
        }
    }

    #[tokio::test]
    async fn test_round_converges_two_logs() {
        let a = TestLog::new(vec![make_event(7, 1, "alpha"), make_event(7, 2, "beta")]);
        let b = TestLog::new(vec![make_event(7, 3, "gamma")]);
        let (mut link_a, mut link_b) = memory_link_pair();

        let timeout = Duration::from_secs(2);
        let (ra, rb) = tokio::join!(
            run_round(&a, &mut link_a, 7, timeout),
            run_round(&b, &mut link_b, 7, timeout),
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.sent, 2);
        assert_eq!(ra.received, 1);
        assert_eq!(ra.imported, 1);
        assert_eq!(rb.sent, 1);
        assert_eq!(rb.imported, 2);

        assert_eq!(a.ids(), b.ids());
        assert_eq!(a.ids().len(), 3);
    }

    #[tokio::test]
    async fn test_round_is_idempotent() {
        let a = TestLog::new(vec![make_event(7, 1, "alpha")]);
        let b = TestLog::new(vec![]);
        let timeout = Duration::from_secs(2);

        for _ in 0..2 {
            let (mut link_a, mut link_b) = memory_link_pair();
            let (ra, rb) = tokio::join!(
                run_round(&a, &mut link_a, 7, timeout),
                run_round(&b, &mut link_b, 7, timeout),
            );
            ra.unwrap();
            rb.unwrap();
        }

        assert_eq!(a.ids(), b.ids());
        assert_eq!(b.ids().len(), 1);
    }

    #[tokio::test]
    async fn test_round_times_out_on_silent_peer() {
        let a = TestLog::new(vec![]);
        let (mut link_a, _link_b) = memory_link_pair();

        let result = run_round(&a, &mut link_a, 7, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(GossipError::Timeout(_))));
    }
}
