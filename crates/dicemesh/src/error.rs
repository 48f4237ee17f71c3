//! Error types for the engine facade.

use thiserror::Error;

use crate::secrets::SecretsError;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation attempted before `initialize` completed.
    #[error("engine not initialized")]
    NotInitialized,

    /// An imported event's transmitted id disagrees with the recomputed id.
    #[error("content hash mismatch: transmitted {transmitted}, computed {computed}")]
    ContentHashMismatch {
        transmitted: String,
        computed: String,
    },

    /// Underlying store failure.
    #[error("storage failure: {0}")]
    Storage(#[from] dicemesh_store::StoreError),

    /// Core event construction or codec failure.
    #[error(transparent)]
    Core(#[from] dicemesh_core::CoreError),

    /// Secure storage failure.
    #[error(transparent)]
    Secrets(#[from] SecretsError),

    /// Caller requested cancellation.
    #[error("cancelled")]
    Cancelled,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
