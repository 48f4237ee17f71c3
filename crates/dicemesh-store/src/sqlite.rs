//! SQLite implementation of the EventStore trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite, wrapped
//! in async via `tokio::task::spawn_blocking`, with one connection behind
//! a mutex.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::warn;

use dicemesh_core::{EventBody, EventId, EventKind, EventRecord, VectorClock};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::EventStore;

/// SQLite-based store implementation.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn exec<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Concurrency(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Concurrency(format!("blocking task failed: {e}")))?
    }
}

/// Insert one event's entry row and edge rows. Caller provides the
/// transaction boundary.
fn insert_event(conn: &Connection, record: &EventRecord) -> Result<()> {
    let payload = record
        .body
        .payload_json()
        .map_err(|e| StoreError::InvalidData(e.to_string()))?;
    let parents_json = serde_json::to_string(&record.sorted_parents())
        .map_err(|e| StoreError::InvalidData(e.to_string()))?;

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO event_log_entries (
            session_id, event_id, event_type, payload, parents, vector_clock,
            lamport_clock, created_at, is_imported
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.session_id,
            record.event_id.as_str(),
            record.kind.to_u8().to_string(),
            payload,
            parents_json,
            record.vector_clock.to_json(),
            record.lamport_clock as i64,
            record.timestamp,
            record.is_imported as i64,
        ],
    )?;
    if inserted == 0 {
        return Err(StoreError::Duplicate {
            session_id: record.session_id,
            event_id: record.event_id.to_string(),
        });
    }

    for parent in &record.parents {
        conn.execute(
            "INSERT INTO event_log_edges (session_id, event_id, parent_id)
             VALUES (?1, ?2, ?3)",
            params![record.session_id, record.event_id.as_str(), parent.as_str()],
        )?;
    }

    Ok(())
}

/// Decode a row back into an event.
fn row_to_record(row: &rusqlite::Row<'_>) -> Result<EventRecord> {
    let session_id: i64 = row.get("session_id").map_err(StoreError::from)?;
    let event_id: String = row.get("event_id").map_err(StoreError::from)?;
    let event_type: String = row.get("event_type").map_err(StoreError::from)?;
    let payload: String = row.get("payload").map_err(StoreError::from)?;
    let parents_json: String = row.get("parents").map_err(StoreError::from)?;
    let clock_json: String = row.get("vector_clock").map_err(StoreError::from)?;
    let lamport_clock: i64 = row.get("lamport_clock").map_err(StoreError::from)?;
    let created_at: i64 = row.get("created_at").map_err(StoreError::from)?;
    let is_imported: bool = row.get("is_imported").map_err(StoreError::from)?;

    let kind_number: u8 = event_type
        .parse()
        .map_err(|_| StoreError::InvalidData(format!("bad event_type: {event_type}")))?;
    let kind = EventKind::from_u8(kind_number)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown event kind: {kind_number}")))?;
    let body = EventBody::from_payload_json(kind, &payload)
        .map_err(|e| StoreError::InvalidData(e.to_string()))?;
    let parents: Vec<EventId> = serde_json::from_str(&parents_json)
        .map_err(|e| StoreError::InvalidData(format!("bad parents: {e}")))?;
    let vector_clock = VectorClock::from_json(&clock_json)
        .map_err(|e| StoreError::InvalidData(format!("bad vector clock: {e}")))?;

    Ok(EventRecord {
        event_id: EventId::from_string(event_id),
        session_id,
        kind,
        lamport_clock: lamport_clock as u64,
        timestamp: created_at,
        parents,
        vector_clock,
        body,
        is_imported,
    })
}

/// Query all rows for a session in canonical order, skipping rows that no
/// longer decode.
fn query_session(conn: &Connection, session_id: i64) -> Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, event_id, event_type, payload, parents, vector_clock,
                lamport_clock, created_at, is_imported
         FROM event_log_entries
         WHERE session_id = ?1
         ORDER BY lamport_clock, event_id",
    )?;

    let mut events = Vec::new();
    let mut rows = stmt.query(params![session_id])?;
    while let Some(row) = rows.next()? {
        match row_to_record(row) {
            Ok(record) => events.push(record),
            Err(e) => {
                let event_id: String = row.get("event_id").unwrap_or_default();
                warn!(session_id, event_id, error = %e, "skipping undecodable event row");
            }
        }
    }
    Ok(events)
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn append(&self, record: &EventRecord) -> Result<()> {
        let record = record.clone();
        self.exec(move |conn| {
            let tx = conn.transaction()?;
            insert_event(&tx, &record)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn append_batch(&self, records: &[EventRecord]) -> Result<usize> {
        let records = records.to_vec();
        self.exec(move |conn| {
            let tx = conn.transaction()?;
            for record in &records {
                insert_event(&tx, record)?;
            }
            tx.commit()?;
            Ok(records.len())
        })
        .await
    }

    async fn lookup_existing_ids(&self, candidates: &[EventId]) -> Result<BTreeSet<EventId>> {
        let candidates = candidates.to_vec();
        self.exec(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT 1 FROM event_log_entries WHERE event_id = ?1 LIMIT 1",
            )?;
            let mut found = BTreeSet::new();
            for id in candidates {
                if stmt.exists(params![id.as_str()])? {
                    found.insert(id);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn list(&self, session_id: i64) -> Result<Vec<EventRecord>> {
        self.exec(move |conn| query_session(conn, session_id)).await
    }

    async fn list_missing(
        &self,
        session_id: i64,
        known: &BTreeSet<EventId>,
    ) -> Result<Vec<EventRecord>> {
        let known = known.clone();
        self.exec(move |conn| {
            Ok(query_session(conn, session_id)?
                .into_iter()
                .filter(|e| !known.contains(&e.event_id))
                .collect())
        })
        .await
    }

    async fn heads(&self, session_id: i64) -> Result<Vec<EventId>> {
        self.exec(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.event_id FROM event_log_entries e
                 WHERE e.session_id = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM event_log_edges g
                       WHERE g.session_id = ?1 AND g.parent_id = e.event_id
                   )
                 ORDER BY e.event_id",
            )?;
            let heads = stmt
                .query_map(params![session_id], |row| {
                    row.get::<_, String>(0).map(EventId::from_string)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(heads)
        })
        .await
    }

    async fn sessions(&self) -> Result<Vec<i64>> {
        self.exec(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT session_id FROM event_log_entries ORDER BY session_id",
            )?;
            let sessions = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sessions)
        })
        .await
    }

    async fn max_lamport(&self) -> Result<u64> {
        self.exec(|conn| {
            let max: i64 = conn.query_row(
                "SELECT COALESCE(MAX(lamport_clock), 0) FROM event_log_entries",
                [],
                |row| row.get(0),
            )?;
            Ok(max as u64)
        })
        .await
    }

    async fn merged_clock(&self, session_id: i64) -> Result<VectorClock> {
        self.exec(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT vector_clock FROM event_log_entries WHERE session_id = ?1",
            )?;
            let mut clock = VectorClock::new();
            let mut rows = stmt.query(params![session_id])?;
            while let Some(row) = rows.next()? {
                let json: String = row.get(0)?;
                match VectorClock::from_json(&json) {
                    Ok(other) => clock = clock.merge(&other),
                    Err(e) => {
                        warn!(session_id, error = %e, "skipping undecodable vector clock")
                    }
                }
            }
            Ok(clock)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicemesh_core::{compute_event_id, EventBody, FlagUpdateBody, PeerId};
    use uuid::Uuid;

    fn make_event(session_id: i64, lamport: u64, parents: Vec<EventId>) -> EventRecord {
        let body = EventBody::FlagUpdate(FlagUpdateBody {
            key: format!("key-{lamport}"),
            value: Some("v".into()),
            version: lamport,
            updated_at: lamport as i64,
            change_id: Uuid::new_v4(),
        });
        let clock = VectorClock::new().increment(&PeerId::from_string("AAAAAAAAAA"));
        let event_id =
            compute_event_id(session_id, lamport, lamport as i64, &clock, &parents, &body)
                .unwrap();
        EventRecord {
            event_id,
            session_id,
            kind: body.kind(),
            lamport_clock: lamport,
            timestamp: lamport as i64,
            parents,
            vector_clock: clock,
            body,
            is_imported: false,
        }
    }

    #[tokio::test]
    async fn test_append_and_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = make_event(1, 1, vec![]);
        store.append(&e1).await.unwrap();

        let events = store.list(1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], e1);
    }

    #[tokio::test]
    async fn test_duplicate_append_fails() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = make_event(1, 1, vec![]);
        store.append(&e1).await.unwrap();
        assert!(matches!(
            store.append(&e1).await,
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_heads_track_edges() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = make_event(1, 1, vec![]);
        store.append(&e1).await.unwrap();
        assert_eq!(store.heads(1).await.unwrap(), vec![e1.event_id.clone()]);

        let e2 = make_event(1, 2, vec![e1.event_id.clone()]);
        let e3 = make_event(1, 3, vec![e1.event_id.clone()]);
        store.append(&e2).await.unwrap();
        store.append(&e3).await.unwrap();

        // Two concurrent children: both are heads, sorted ordinally.
        let mut expected = vec![e2.event_id.clone(), e3.event_id.clone()];
        expected.sort();
        assert_eq!(store.heads(1).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = make_event(1, 1, vec![]);
        let e2 = make_event(1, 2, vec![]);
        store.append(&e1).await.unwrap();

        let result = store.append_batch(&[e2.clone(), e1.clone()]).await;
        assert!(result.is_err());
        assert!(store
            .lookup_existing_ids(&[e2.event_id.clone()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_missing() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = make_event(10, 1, vec![]);
        store.append(&e1).await.unwrap();

        let known: BTreeSet<EventId> = [EventId::from_string("not-present")].into();
        let missing = store.list_missing(10, &known).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].event_id, e1.event_id);
    }

    #[tokio::test]
    async fn test_lookup_existing_ids() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = make_event(1, 1, vec![]);
        store.append(&e1).await.unwrap();

        let found = store
            .lookup_existing_ids(&[e1.event_id.clone(), EventId::from_string("XYZ")])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains(&e1.event_id));
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        let e1 = make_event(1, 1, vec![]);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append(&e1).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let events = store.list(1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, e1.event_id);
    }

    #[tokio::test]
    async fn test_max_lamport_spans_sessions() {
        let store = SqliteStore::open_memory().unwrap();
        store.append(&make_event(1, 3, vec![])).await.unwrap();
        store.append(&make_event(2, 9, vec![])).await.unwrap();
        assert_eq!(store.max_lamport().await.unwrap(), 9);
    }
}
