//! Review session
//!
//! Binds one session id to its store, job controller and backend. This is
//! the surface a front end drives: load or generate a mapping, edit it, then
//! save or export. Save and export failures never touch the in-memory
//! mapping, so the user can keep editing and retry.

use std::sync::Arc;

use canmap_common::config::PollConfig;
use canmap_common::events::{EventBus, MappingEvent};
use canmap_common::labels;
use canmap_common::{CanonicalMapping, MappingJob};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::backend::MappingBackend;
use crate::error::{EngineError, EngineResult};
use crate::job::JobController;
use crate::reconcile;
use crate::store::{CanonicalStore, EditOutcome};

/// Missing-field entry with resolved display labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelledMissing {
    pub table: String,
    pub field: String,
    pub table_label: String,
    pub field_label: String,
    pub reason: String,
}

/// One analyst session under review
pub struct ReviewSession {
    session_id: String,
    backend: Arc<dyn MappingBackend>,
    store: Arc<RwLock<CanonicalStore>>,
    controller: JobController,
    events: EventBus,
}

impl ReviewSession {
    pub fn new(
        session_id: impl Into<String>,
        backend: Arc<dyn MappingBackend>,
        poll: PollConfig,
        events: EventBus,
    ) -> Self {
        let store = Arc::new(RwLock::new(CanonicalStore::new()));
        let controller = JobController::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            events.clone(),
            poll,
        );
        Self {
            session_id: session_id.into(),
            backend,
            store,
            controller,
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Load the previously saved mapping, if the backend has one
    pub async fn load(&self) -> EngineResult<bool> {
        let saved = self.backend.load_mapping(&self.session_id).await?;
        let Some(mapping) = saved else {
            tracing::info!(session_id = %self.session_id, "No saved mapping for session");
            return Ok(false);
        };

        tracing::info!(
            session_id = %self.session_id,
            tables = mapping.mapped.len(),
            "Saved mapping loaded"
        );
        self.store.write().await.replace(mapping);
        Ok(true)
    }

    /// Start (or restart) the mapping job
    pub async fn start_mapping(&self) -> EngineResult<MappingJob> {
        self.controller.start(&self.session_id).await
    }

    /// Wait for the running job and return the delivered mapping
    pub async fn wait_for_mapping(&self) -> EngineResult<CanonicalMapping> {
        self.controller.wait().await
    }

    pub fn job_status(&self) -> MappingJob {
        self.controller.status()
    }

    pub async fn snapshot(&self) -> Option<CanonicalMapping> {
        self.store.read().await.mapping().cloned()
    }

    pub async fn apply_field_edit(&self, table: &str, field: &str, value: Value) -> EngineResult<EditOutcome> {
        self.store.write().await.apply_field_edit(table, field, value)
    }

    pub async fn apply_cell_edit(
        &self,
        table: &str,
        row: usize,
        column: &str,
        value: Value,
    ) -> EngineResult<EditOutcome> {
        self.store.write().await.apply_cell_edit(table, row, column, value)
    }

    pub async fn add_row(&self, table: &str) -> EngineResult<EditOutcome> {
        self.store.write().await.add_row(table)
    }

    /// Missing fields with labels resolved for display
    pub async fn missing_fields(&self) -> Vec<LabelledMissing> {
        let store = self.store.read().await;
        let Some(mapping) = store.mapping() else {
            return Vec::new();
        };

        mapping
            .missing_fields
            .iter()
            .map(|entry| LabelledMissing {
                table: entry.table.clone(),
                field: entry.field.clone(),
                table_label: labels::table_label(&entry.table, Some(entry), &mapping.metadata),
                field_label: labels::field_label(&entry.table, &entry.field, Some(entry), &mapping.metadata),
                reason: entry.reason.clone(),
            })
            .collect()
    }

    /// Persist the current mapping.
    ///
    /// The persisted copy replaces the local one only if no edit landed while
    /// the save was in flight; otherwise the newer local edits are kept. Its
    /// missing list is cut down to entries the local list already had.
    pub async fn save(&self) -> EngineResult<CanonicalMapping> {
        let (mapping, revision) = {
            let store = self.store.read().await;
            let mapping = store.mapping().cloned().ok_or(EngineError::NoMapping)?;
            (mapping, store.revision())
        };

        let mut persisted = match self.backend.save_mapping(&self.session_id, &mapping).await {
            Ok(persisted) => persisted,
            Err(e) => {
                self.report_failure("save", &e.to_string());
                return Err(e.into());
            }
        };

        // Saving never grows the missing list, whatever the backend regenerated.
        persisted.missing_fields =
            reconcile::carry_missing(&mapping.missing_fields, &persisted.missing_fields, &persisted.mapped);

        let mut store = self.store.write().await;
        if store.revision() == revision {
            store.replace(persisted.clone());
        } else {
            tracing::debug!(
                session_id = %self.session_id,
                "Edits landed during save; keeping local mapping"
            );
        }
        drop(store);

        tracing::info!(session_id = %self.session_id, "Mapping saved");
        self.events.emit_lossy(MappingEvent::MappingSaved {
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(persisted)
    }

    /// Export the saved mapping; returns the download URL
    pub async fn export(&self) -> EngineResult<String> {
        match self.backend.export(&self.session_id).await {
            Ok(export) => {
                tracing::info!(session_id = %self.session_id, url = %export.download_url, "Export ready");
                self.events.emit_lossy(MappingEvent::ExportReady {
                    session_id: self.session_id.clone(),
                    download_url: export.download_url.clone(),
                    timestamp: Utc::now(),
                });
                Ok(export.download_url)
            }
            Err(e) => {
                self.report_failure("export", &e.to_string());
                Err(e.into())
            }
        }
    }

    fn report_failure(&self, operation: &str, message: &str) {
        tracing::warn!(session_id = %self.session_id, operation, error = %message, "Persistence failed");
        self.events.emit_lossy(MappingEvent::PersistenceFailed {
            session_id: self.session_id.clone(),
            operation: operation.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}
