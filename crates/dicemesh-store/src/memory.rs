//! In-memory implementation of the EventStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite but
//! keeps everything in memory with no persistence.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use dicemesh_core::{EventId, EventRecord, VectorClock};

use crate::error::{Result, StoreError};
use crate::traits::EventStore;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Events keyed by (session_id, event_id).
    events: HashMap<(i64, EventId), EventRecord>,

    /// Every id referenced as a parent, per session.
    parent_refs: HashSet<(i64, EventId)>,
}

impl MemoryStoreInner {
    fn insert(&mut self, record: &EventRecord) -> Result<()> {
        let key = (record.session_id, record.event_id.clone());
        if self.events.contains_key(&key) {
            return Err(StoreError::Duplicate {
                session_id: record.session_id,
                event_id: record.event_id.to_string(),
            });
        }
        for parent in &record.parents {
            self.parent_refs
                .insert((record.session_id, parent.clone()));
        }
        self.events.insert(key, record.clone());
        Ok(())
    }

    fn list(&self, session_id: i64) -> Vec<EventRecord> {
        let mut events: Vec<EventRecord> = self
            .events
            .values()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            (a.lamport_clock, &a.event_id).cmp(&(b.lamport_clock, &b.event_id))
        });
        events
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().expect("memory store lock poisoned")
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(&self, record: &EventRecord) -> Result<()> {
        let mut inner = self.inner.write().expect("memory store lock poisoned");
        inner.insert(record)
    }

    async fn append_batch(&self, records: &[EventRecord]) -> Result<usize> {
        let mut inner = self.inner.write().expect("memory store lock poisoned");

        // Validate against a scratch copy first so a failure mid-batch
        // leaves nothing behind.
        let mut staged = MemoryStoreInner {
            events: inner.events.clone(),
            parent_refs: inner.parent_refs.clone(),
        };
        for record in records {
            staged.insert(record)?;
        }
        *inner = staged;
        Ok(records.len())
    }

    async fn lookup_existing_ids(&self, candidates: &[EventId]) -> Result<BTreeSet<EventId>> {
        let inner = self.read();
        let all: HashSet<&EventId> = inner.events.keys().map(|(_, id)| id).collect();
        Ok(candidates
            .iter()
            .filter(|id| all.contains(id))
            .cloned()
            .collect())
    }

    async fn list(&self, session_id: i64) -> Result<Vec<EventRecord>> {
        Ok(self.read().list(session_id))
    }

    async fn list_missing(
        &self,
        session_id: i64,
        known: &BTreeSet<EventId>,
    ) -> Result<Vec<EventRecord>> {
        Ok(self
            .read()
            .list(session_id)
            .into_iter()
            .filter(|e| !known.contains(&e.event_id))
            .collect())
    }

    async fn heads(&self, session_id: i64) -> Result<Vec<EventId>> {
        let inner = self.read();
        let mut heads: Vec<EventId> = inner
            .events
            .iter()
            .filter(|((sid, id), _)| {
                *sid == session_id && !inner.parent_refs.contains(&(session_id, (*id).clone()))
            })
            .map(|((_, id), _)| id.clone())
            .collect();
        heads.sort();
        Ok(heads)
    }

    async fn sessions(&self) -> Result<Vec<i64>> {
        let inner = self.read();
        let mut sessions: Vec<i64> = inner
            .events
            .keys()
            .map(|(sid, _)| *sid)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        sessions.sort_unstable();
        Ok(sessions)
    }

    async fn max_lamport(&self) -> Result<u64> {
        Ok(self
            .read()
            .events
            .values()
            .map(|e| e.lamport_clock)
            .max()
            .unwrap_or(0))
    }

    async fn merged_clock(&self, session_id: i64) -> Result<VectorClock> {
        let inner = self.read();
        let mut clock = VectorClock::new();
        for event in inner.events.values().filter(|e| e.session_id == session_id) {
            clock = clock.merge(&event.vector_clock);
        }
        Ok(clock)
    }
}
