//! # Dicemesh
//!
//! Serverless, peer-to-peer collaboration substrate for a privacy-first
//! tabletop RPG application: a causally-ordered, content-addressed CRDT
//! event log with a secure replication pipeline.
//!
//! ## Guarantees
//!
//! 1. **Convergence**: replicas holding the same event set materialize
//!    byte-equal session state, under any partition or reordering.
//! 2. **Content addressing**: an event id is the SHA-256 of its canonical
//!    form; every import recomputes and verifies it.
//! 3. **Authenticated encryption**: every transferred event rides a
//!    mutually-authenticated, forward-secret AEAD channel with
//!    anti-replay (`dicemesh-channel`).
//! 4. **Auditable dice**: rolls carry Ed25519-signed evidence any peer
//!    can re-verify.
//!
//! ## Example
//!
//! ```ignore
//! use dicemesh::{IdentityManager, MemorySecretStore, SyncEngine};
//! use dicemesh_store::SqliteStore;
//! use tokio_util::sync::CancellationToken;
//!
//! let secrets = MemorySecretStore::new();
//! let identity = IdentityManager::initialize(&secrets, None).await?;
//! let store = SqliteStore::open("~/.dicemesh/events.db")?;
//! let engine = SyncEngine::new(store, identity, CancellationToken::new());
//! engine.initialize().await?;
//!
//! let record = engine.append_chat_message(1, "roll for initiative!", None).await?;
//! let state = engine.get_session_state(1).await?;
//! ```

pub mod engine;
pub mod error;
pub mod identity;
pub mod secrets;

pub use engine::SyncEngine;
pub use error::{EngineError, Result};
pub use identity::{DeviceIdentity, IdentityManager};
pub use secrets::{MemorySecretStore, SecretsError, SecureStorage};

// The building blocks, re-exported for embedders.
pub use dicemesh_core::{
    DiceMode, EventBody, EventId, EventKind, EventRecord, PeerId, SessionState, VectorClock,
};
pub use dicemesh_store::{EventStore, MemoryStore, SqliteStore};
