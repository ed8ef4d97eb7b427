//! Event types and broadcast bus
//!
//! The job controller and review session report lifecycle changes here so a
//! front end (or the CLI) can surface them without polling internal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::{FailureKind, JobState};

/// Canmap event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MappingEvent {
    /// New job instance created (previous one, if any, superseded)
    JobStarted {
        session_id: String,
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Non-terminal status observed by a poll
    JobStatusChanged {
        session_id: String,
        job_id: Uuid,
        status: JobState,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// Job succeeded and its mapping replaced the store contents
    MappingDelivered {
        session_id: String,
        job_id: Uuid,
        tables: usize,
        missing_fields: usize,
        timestamp: DateTime<Utc>,
    },

    /// A result arrived for a job that had already been superseded
    StaleResultDiscarded {
        session_id: String,
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Job ended in failure
    JobFailed {
        session_id: String,
        job_id: Uuid,
        kind: FailureKind,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Mapping persisted
    MappingSaved {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Export produced a download
    ExportReady {
        session_id: String,
        download_url: String,
        timestamp: DateTime<Utc>,
    },

    /// Save or export failed; in-memory edits are kept
    PersistenceFailed {
        session_id: String,
        operation: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`MappingEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MappingEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<MappingEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MappingEvent,
    ) -> Result<usize, broadcast::error::SendError<MappingEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MappingEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
