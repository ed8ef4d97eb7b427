//! Shared test helpers: a scripted in-memory mapping backend

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use canmap_common::config::PollConfig;
use canmap_common::{CanonicalMapping, JobState, MissingField};
use canmap_engine::backend::{BackendError, ExportResponse, JobStatusResponse, MappingBackend};
use serde_json::json;

type StatusFn = dyn Fn(usize, usize) -> Result<JobStatusResponse, BackendError> + Send + Sync;

/// Backend whose job status is computed by a closure of
/// `(job number, status call number)`, both 1-based.
///
/// The job number is the count of `start_job` calls at the moment the status
/// request was issued, so a delayed response still belongs to the job that
/// was current when it was sent.
pub struct ScriptedBackend {
    starts: AtomicUsize,
    status_calls: AtomicUsize,
    start_fails: bool,
    status_delay: Duration,
    status_fn: Box<StatusFn>,
    saved: Mutex<Option<CanonicalMapping>>,
    save_fails: AtomicBool,
    export_fails: AtomicBool,
    missing_on_save: Mutex<Vec<MissingField>>,
}

impl ScriptedBackend {
    pub fn new(
        status_fn: impl Fn(usize, usize) -> Result<JobStatusResponse, BackendError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            starts: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            start_fails: false,
            status_delay: Duration::ZERO,
            status_fn: Box::new(status_fn),
            saved: Mutex::new(None),
            save_fails: AtomicBool::new(false),
            export_fails: AtomicBool::new(false),
            missing_on_save: Mutex::new(Vec::new()),
        }
    }

    /// Backend that stays `running` forever
    pub fn never_finishes() -> Self {
        Self::new(|_, _| Ok(JobStatusResponse::with_status(JobState::Running)))
    }

    /// Simulated network latency on every status request
    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.start_fails = true;
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn set_saved(&self, mapping: CanonicalMapping) {
        *self.saved.lock().unwrap() = Some(mapping);
    }

    pub fn saved(&self) -> Option<CanonicalMapping> {
        self.saved.lock().unwrap().clone()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.save_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_exports(&self, fail: bool) {
        self.export_fails.store(fail, Ordering::SeqCst);
    }

    /// Entry the backend appends to every persisted copy's missing list
    pub fn add_missing_on_save(&self, entry: MissingField) {
        self.missing_on_save.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl MappingBackend for ScriptedBackend {
    async fn start_job(&self, _session_id: &str) -> Result<JobStatusResponse, BackendError> {
        if self.start_fails {
            return Err(BackendError::Network("connection refused".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(JobStatusResponse::with_status(JobState::Pending))
    }

    async fn job_status(&self, _session_id: &str) -> Result<JobStatusResponse, BackendError> {
        let job = self.starts.load(Ordering::SeqCst);
        let call = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        (self.status_fn)(job, call)
    }

    async fn load_mapping(&self, _session_id: &str) -> Result<Option<CanonicalMapping>, BackendError> {
        Ok(self.saved())
    }

    async fn save_mapping(
        &self,
        _session_id: &str,
        mapping: &CanonicalMapping,
    ) -> Result<CanonicalMapping, BackendError> {
        if self.save_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Api {
                status: 500,
                message: "database unavailable".to_string(),
            });
        }
        let mut persisted = mapping.clone();
        persisted.metadata.model_version = Some("persisted".to_string());
        persisted
            .missing_fields
            .extend(self.missing_on_save.lock().unwrap().iter().cloned());
        self.set_saved(persisted.clone());
        Ok(persisted)
    }

    async fn export(&self, session_id: &str) -> Result<ExportResponse, BackendError> {
        if self.export_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Network("timed out".to_string()));
        }
        Ok(ExportResponse {
            download_url: format!("https://files.example/{}.xlsx", session_id),
        })
    }
}

/// Mapping tagged with the job number that produced it
pub fn mapping_for(job: usize) -> CanonicalMapping {
    serde_json::from_value(json!({
        "mapped": {
            "borrower": {"name": "", "loan_amount": 500000, "job": job},
            "rent_roll": [{"unit": "101"}]
        },
        "missing_fields": [
            {"table": "borrower", "field": "name", "reason": "not found"},
            {"table": "rent_roll", "field": "tenant", "reason": "not found"}
        ],
        "metadata": {
            "table_labels": {"borrower": "Borrower"},
            "field_labels": {"rent_roll": {"unit": "Unit", "tenant": "Tenant"}}
        }
    }))
    .unwrap()
}

/// Job number recorded in a mapping built by [`mapping_for`]
pub fn job_of(mapping: &CanonicalMapping) -> u64 {
    mapping.mapped["borrower"].as_field_map().unwrap()["job"]
        .as_u64()
        .unwrap()
}

/// 10 s interval, 50 attempts
pub fn poll_config() -> PollConfig {
    PollConfig {
        interval_ms: 10_000,
        max_attempts: 50,
    }
}
