//! Error types for canmap-engine
//!
//! Every error is terminal for the operation that produced it only. Recovery
//! is a user-initiated retry; nothing here retries on its own.

use thiserror::Error;
use uuid::Uuid;

use crate::backend::BackendError;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Backend request failed (transport, non-success status, bad payload)
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Backend reported the mapping job as failed
    #[error("Mapping job failed: {0}")]
    JobFailed(String),

    /// Poll attempts exhausted without a terminal status
    #[error("{0}")]
    JobTimeout(String),

    /// A newer job was started while this one was in flight
    #[error("Mapping job {0} was superseded by a newer job")]
    Superseded(Uuid),

    /// No job has been started on this controller
    #[error("No mapping job has been started")]
    NoJob,

    /// Edit or save attempted before any mapping was loaded
    #[error("No mapping loaded")]
    NoMapping,

    /// canmap-common error
    #[error(transparent)]
    Common(#[from] canmap_common::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
