//! Store trait: the abstract interface for event log persistence.
//!
//! This trait keeps the sync engine storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::collections::BTreeSet;

use async_trait::async_trait;
use dicemesh_core::{EventId, EventRecord, VectorClock};

use crate::error::Result;

/// The EventStore trait: async interface for event log persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, blocking work runs in `spawn_blocking` to keep the runtime
/// responsive.
///
/// # Design Notes
///
/// - **Append-only**: events are never mutated or deleted.
/// - **Duplicates are errors**: callers deduplicate via
///   [`lookup_existing_ids`](EventStore::lookup_existing_ids) before
///   appending; a second append of the same (session, event id) fails.
/// - **Atomic batches**: [`append_batch`](EventStore::append_batch) commits
///   everything or nothing, which is what makes remote imports all-or-nothing.
/// - **Canonical ordering**: every listing is ordered by
///   `(lamport_clock ASC, event_id ordinal ASC)`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one event and its parent edges in a single transaction.
    async fn append(&self, record: &EventRecord) -> Result<()>;

    /// Persist a batch of events in one transaction.
    ///
    /// Returns the number of events written. If any row fails, nothing
    /// from the batch is committed.
    async fn append_batch(&self, records: &[EventRecord]) -> Result<usize>;

    /// Which of the candidate ids are already persisted (any session).
    ///
    /// Event ids are content-addressed and globally unique, so the check
    /// does not need a session filter.
    async fn lookup_existing_ids(&self, candidates: &[EventId]) -> Result<BTreeSet<EventId>>;

    /// All events for a session in canonical order.
    ///
    /// Rows that can no longer be decoded are skipped with a warning;
    /// corrupt storage degrades the session rather than crashing it.
    async fn list(&self, session_id: i64) -> Result<Vec<EventRecord>>;

    /// Events for a session whose ids are not in `known`, canonical order.
    async fn list_missing(
        &self,
        session_id: i64,
        known: &BTreeSet<EventId>,
    ) -> Result<Vec<EventRecord>>;

    /// Session heads: events no other event lists as a parent.
    ///
    /// Sorted ordinally ascending; empty for a fresh session. These are the
    /// only acceptable parents for a new local event.
    async fn heads(&self, session_id: i64) -> Result<Vec<EventId>>;

    /// All session ids with at least one event.
    async fn sessions(&self) -> Result<Vec<i64>>;

    /// The highest lamport clock across all sessions (0 when empty).
    async fn max_lamport(&self) -> Result<u64>;

    /// The merge of every vector clock persisted for a session.
    async fn merged_clock(&self, session_id: i64) -> Result<VectorClock>;
}
