//! Persistence gateway
//!
//! The mapping backend is an external collaborator: it runs mapping jobs and
//! stores and exports mappings. The engine only consumes it through
//! [`MappingBackend`], so the job controller can be driven by the HTTP client
//! in production and by scripted backends in tests.

use async_trait::async_trait;
use canmap_common::{CanonicalMapping, JobState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;

pub use http::HttpBackend;

/// Backend client errors
#[derive(Debug, Error)]
pub enum BackendError {
    /// Request could not complete (connect, timeout, body read)
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status
    #[error("Backend error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not decode
    #[error("Parse error: {0}")]
    Parse(String),

    /// Base URL or endpoint could not be built
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Job start / job status payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<CanonicalMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusResponse {
    pub fn with_status(status: JobState) -> Self {
        Self {
            status,
            mapping: None,
            error: None,
        }
    }

    pub fn succeeded(mapping: CanonicalMapping) -> Self {
        Self {
            status: JobState::Succeeded,
            mapping: Some(mapping),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobState::Failed,
            mapping: None,
            error: Some(error.into()),
        }
    }
}

/// Export payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResponse {
    pub download_url: String,
}

/// Mapping backend operations, keyed by session id
#[async_trait]
pub trait MappingBackend: Send + Sync {
    /// Kick off a mapping job for the session
    async fn start_job(&self, session_id: &str) -> Result<JobStatusResponse, BackendError>;

    /// Current status of the session's mapping job
    async fn job_status(&self, session_id: &str) -> Result<JobStatusResponse, BackendError>;

    /// Previously saved mapping, `None` if the session has none
    async fn load_mapping(&self, session_id: &str) -> Result<Option<CanonicalMapping>, BackendError>;

    /// Persist the mapping; returns the stored (normalized) copy
    async fn save_mapping(
        &self,
        session_id: &str,
        mapping: &CanonicalMapping,
    ) -> Result<CanonicalMapping, BackendError>;

    /// Produce a downloadable export of the session's mapping
    async fn export(&self, session_id: &str) -> Result<ExportResponse, BackendError>;
}
