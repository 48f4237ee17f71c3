//! The sync engine: the unified facade over identity, clocks, codec,
//! store, and materialization.
//!
//! A single write gate serializes appends and imports; reads go straight
//! to the store and rely on its snapshot semantics. The cached per-session
//! vector clocks and the global lamport counter are only touched under the
//! gate, and only after the corresponding rows have committed, so a failed
//! or cancelled operation leaves no trace.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use dicemesh_core::{
    compute_event_id, materialize, recompute_event_id, roll_signed, ChatMessageBody, DiceMode,
    EventBody, EventId, EventRecord, SessionState, VectorClock,
};
use dicemesh_store::EventStore;
use dicemesh_sync::{EventLog, GossipError};

use crate::error::{EngineError, Result};
use crate::identity::{DeviceIdentity, IdentityManager};

/// Shared mutable state behind the write gate.
struct WriteState {
    initialized: bool,
    global_lamport: u64,
    session_clocks: HashMap<i64, VectorClock>,
}

/// The sync engine facade.
///
/// Lifecycle: construct, `initialize()`, then append/import/read. Every
/// operation before initialization fails with `NotInitialized`.
pub struct SyncEngine<S> {
    store: Arc<S>,
    identity: IdentityManager,
    state: Mutex<WriteState>,
    ready: AtomicBool,
    cancel: CancellationToken,
}

impl<S: EventStore> SyncEngine<S> {
    /// Create an engine over a store and an initialized identity.
    pub fn new(store: S, identity: IdentityManager, cancel: CancellationToken) -> Self {
        Self {
            store: Arc::new(store),
            identity,
            state: Mutex::new(WriteState {
                initialized: false,
                global_lamport: 0,
                session_clocks: HashMap::new(),
            }),
            ready: AtomicBool::new(false),
            cancel,
        }
    }

    /// Load the lamport high-water mark and one merged vector clock per
    /// session. Idempotent; concurrent callers serialize on the gate and
    /// every later call returns immediately.
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }

        let global_lamport = self.store.max_lamport().await?;
        let mut session_clocks = HashMap::new();
        for session_id in self.store.sessions().await? {
            session_clocks.insert(session_id, self.store.merged_clock(session_id).await?);
        }

        state.global_lamport = global_lamport;
        state.session_clocks = session_clocks;
        state.initialized = true;
        self.ready.store(true, Ordering::SeqCst);

        info!(
            peer_id = %self.identity.peer_id(),
            lamport = global_lamport,
            sessions = state.session_clocks.len(),
            "sync engine ready"
        );
        Ok(())
    }

    /// This device's public identity.
    pub fn identity(&self) -> &DeviceIdentity {
        self.identity.identity()
    }

    /// The identity manager (signing, shared secrets, channel identity).
    pub fn identity_manager(&self) -> &IdentityManager {
        &self.identity
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Append a locally-produced event.
    ///
    /// Parents are the current session heads; the vector clock is the
    /// cached session clock ticked for this peer; the lamport clock is
    /// the next global value. Returns the persisted record.
    pub async fn append_local_event(
        &self,
        session_id: i64,
        body: EventBody,
    ) -> Result<EventRecord> {
        self.ensure_ready()?;
        self.check_cancelled()?;
        let mut state = self.state.lock().await;

        let parents = self.store.heads(session_id).await?;
        let vector_clock = state
            .session_clocks
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
            .increment(self.identity.peer_id());
        let lamport_clock = state.global_lamport + 1;
        let timestamp = now_millis();

        let event_id = compute_event_id(
            session_id,
            lamport_clock,
            timestamp,
            &vector_clock,
            &parents,
            &body,
        )?;
        let record = EventRecord {
            event_id,
            session_id,
            kind: body.kind(),
            lamport_clock,
            timestamp,
            parents,
            vector_clock: vector_clock.clone(),
            body,
            is_imported: false,
        };

        // Last cancellation point before persistence; afterwards the
        // append either commits fully or the store error surfaces with
        // no cache mutation either way.
        self.check_cancelled()?;
        self.store.append(&record).await?;

        state.global_lamport = lamport_clock;
        state.session_clocks.insert(session_id, vector_clock);

        debug!(
            session_id,
            event_id = %record.event_id,
            lamport = lamport_clock,
            "appended local event"
        );
        Ok(record)
    }

    /// Import remote events.
    ///
    /// Events are ordered canonically, deduplicated against the store,
    /// and every recomputed id must match its transmitted id before a
    /// single row is written; one mismatch aborts the whole batch.
    /// Returns the number of newly stored events.
    pub async fn import(&self, events: Vec<EventRecord>) -> Result<usize> {
        self.ensure_ready()?;
        self.check_cancelled()?;

        let mut events = events;
        events.sort_by(|a, b| {
            (a.lamport_clock, &a.event_id).cmp(&(b.lamport_clock, &b.event_id))
        });

        let mut state = self.state.lock().await;

        let ids: Vec<EventId> = events.iter().map(|e| e.event_id.clone()).collect();
        let mut seen = self.store.lookup_existing_ids(&ids).await?;

        let mut fresh = Vec::with_capacity(events.len());
        for mut event in events {
            if !seen.insert(event.event_id.clone()) {
                continue;
            }
            let computed = recompute_event_id(&event)?;
            if computed != event.event_id {
                return Err(EngineError::ContentHashMismatch {
                    transmitted: event.event_id.to_string(),
                    computed: computed.to_string(),
                });
            }
            event.is_imported = true;
            fresh.push(event);
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        self.check_cancelled()?;
        let stored = self.store.append_batch(&fresh).await?;

        for event in &fresh {
            state.global_lamport = state.global_lamport.max(event.lamport_clock);
            let clock = state.session_clocks.entry(event.session_id).or_default();
            *clock = clock.merge(&event.vector_clock);
        }

        debug!(count = stored, "imported remote events");
        Ok(stored)
    }

    /// All events for a session, canonical order.
    pub async fn get_events(&self, session_id: i64) -> Result<Vec<EventRecord>> {
        self.ensure_ready()?;
        Ok(self.store.list(session_id).await?)
    }

    /// Events the peer with `known` ids is missing.
    pub async fn get_missing_events(
        &self,
        session_id: i64,
        known: &BTreeSet<EventId>,
    ) -> Result<Vec<EventRecord>> {
        self.ensure_ready()?;
        Ok(self.store.list_missing(session_id, known).await?)
    }

    /// Current heads for a session.
    pub async fn get_head_event_ids(&self, session_id: i64) -> Result<Vec<EventId>> {
        self.ensure_ready()?;
        Ok(self.store.heads(session_id).await?)
    }

    /// Materialize the session state from the full event list.
    pub async fn get_session_state(&self, session_id: i64) -> Result<SessionState> {
        self.ensure_ready()?;
        let events = self.store.list(session_id).await?;
        Ok(materialize(&events))
    }

    /// Convenience: append a chat message authored by this device.
    pub async fn append_chat_message(
        &self,
        session_id: i64,
        content: &str,
        after_event_id: Option<EventId>,
    ) -> Result<EventRecord> {
        let body = EventBody::ChatMessage(ChatMessageBody {
            message_id: Uuid::new_v4(),
            peer_id: self.identity.peer_id().clone(),
            device_name: self.identity.device_name().to_string(),
            content: content.to_string(),
            created_at: now_millis(),
            after_event_id,
        });
        self.append_local_event(session_id, body).await
    }

    /// Convenience: roll dice, sign the evidence, and append the event.
    pub async fn append_dice_roll(
        &self,
        session_id: i64,
        dice_count: u32,
        dice_sides: u32,
        modifier: i32,
        mode: DiceMode,
    ) -> Result<EventRecord> {
        let body = roll_signed(
            &mut rand::thread_rng(),
            self.identity.keypair(),
            self.identity.device_name(),
            dice_count,
            dice_sides,
            modifier,
            mode,
            now_millis(),
        )?;
        self.append_local_event(session_id, EventBody::DiceRoll(body))
            .await
    }
}

/// The exchange-facing view of the engine.
#[async_trait]
impl<S: EventStore> EventLog for SyncEngine<S> {
    async fn head_ids(&self, session_id: i64) -> std::result::Result<Vec<EventId>, GossipError> {
        self.get_head_event_ids(session_id)
            .await
            .map_err(|e| GossipError::Log(e.to_string()))
    }

    async fn known_ids(&self, session_id: i64) -> std::result::Result<Vec<EventId>, GossipError> {
        let events = self
            .get_events(session_id)
            .await
            .map_err(|e| GossipError::Log(e.to_string()))?;
        Ok(events.into_iter().map(|e| e.event_id).collect())
    }

    async fn missing_events(
        &self,
        session_id: i64,
        known: &BTreeSet<EventId>,
    ) -> std::result::Result<Vec<EventRecord>, GossipError> {
        self.get_missing_events(session_id, known)
            .await
            .map_err(|e| GossipError::Log(e.to_string()))
    }

    async fn import(
        &self,
        events: Vec<EventRecord>,
    ) -> std::result::Result<usize, GossipError> {
        SyncEngine::import(self, events)
            .await
            .map_err(|e| GossipError::Log(e.to_string()))
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
