//! Mapping job state machine
//!
//! Idle → Pending → Running → {Succeeded | Failed}. Transitions only move
//! forward; a job that reached a terminal state is never reopened. Starting
//! again creates a new job instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mapping::CanonicalMapping;

/// Mapping job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// No job started yet
    Idle,
    /// Start request issued, backend has not picked the job up
    Pending,
    /// Backend is computing the mapping
    Running,
    /// Mapping delivered
    Succeeded,
    /// Backend failure, transport failure or timeout
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Idle => 0,
            JobState::Pending => 1,
            JobState::Running => 2,
            JobState::Succeeded | JobState::Failed => 3,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition
    pub fn can_transition_to(&self, next: JobState) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// Why a job ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request could not complete
    Transport,
    /// Backend reported `failed`
    Backend,
    /// Attempts exhausted without a terminal status
    Timeout,
}

/// One mapping job instance as seen by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingJob {
    pub id: Uuid,
    pub session_id: String,
    pub status: JobState,
    /// Status queries issued so far
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CanonicalMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl MappingJob {
    /// Placeholder for a controller that has not started anything
    pub fn idle(session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            session_id: session_id.into(),
            status: JobState::Idle,
            attempts: 0,
            result: None,
            error: None,
            failure: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Fresh job instance in `Pending`
    pub fn pending(session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobState::Pending,
            ..Self::idle(session_id)
        }
    }

    /// Move to `next` if it is a forward transition. Returns whether the state changed.
    pub fn transition_to(&mut self, next: JobState) -> bool {
        if self.status == next || !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        true
    }

    pub fn succeed(&mut self, mapping: CanonicalMapping) -> bool {
        if !self.transition_to(JobState::Succeeded) {
            return false;
        }
        self.result = Some(mapping);
        true
    }

    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> bool {
        if !self.transition_to(JobState::Failed) {
            return false;
        }
        self.failure = Some(kind);
        self.error = Some(message.into());
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
