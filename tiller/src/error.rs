use thiserror::Error;
use tiller_integration::{bus::BusError, lock::LockError};

use crate::lifecycle::store::StoreError;

#[derive(Debug, Clone, Error)]
pub enum TillerError {
    /// Bad control-plane input. Never reaches a worker; surfaced as HTTP 400.
    #[error("validation: {0}")]
    Validation(String),

    /// Request violates a task state-machine guard (eg/ already running, another task holds
    /// the account). Surfaced as HTTP 409.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Entity missing. Surfaced as HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Fatal failure inside an execution: a strategy callback or the persistence pipeline.
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("tick bus: {0}")]
    Bus(#[from] BusError),

    #[error("task lock: {0}")]
    Lock(#[from] LockError),

    #[error("lifecycle store: {0}")]
    Store(#[from] StoreError),
}

impl TillerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}
