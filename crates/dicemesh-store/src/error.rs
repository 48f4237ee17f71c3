//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An event with this (session, id) pair is already persisted.
    #[error("duplicate event {event_id} in session {session_id}")]
    Duplicate { session_id: i64, event_id: String },

    /// Row could not be decoded back into an event.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Lock poisoned or blocking task failed.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
