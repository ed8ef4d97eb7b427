//! Mapping job controller
//!
//! Owns the asynchronous lifecycle of a mapping job: start, poll at a fixed
//! interval, deliver the result into the store, surface failures, and give up
//! after a bounded number of polls.
//!
//! Starting a job supersedes whatever the controller was doing before. The
//! previous poll loop is cancelled and a generation counter is bumped before
//! the new start request goes out. Every write a poll loop makes (status
//! snapshot or store delivery) is checked against its own generation and job
//! id, so a late response for a superseded job is dropped instead of applied.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use canmap_common::config::PollConfig;
use canmap_common::events::{EventBus, MappingEvent};
use canmap_common::{CanonicalMapping, FailureKind, JobState, MappingJob};
use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{JobStatusResponse, MappingBackend};
use crate::error::{EngineError, EngineResult};
use crate::store::CanonicalStore;

/// Reported when polls run out before the job reaches a terminal status
pub const TIMEOUT_MESSAGE: &str = "Mapping is taking longer than expected. Please try again in a moment.";

const FAILED_WITHOUT_MESSAGE: &str = "Mapping job failed";
const SUCCEEDED_WITHOUT_MAPPING: &str = "Mapping job finished without returning a mapping";

/// Poll loop currently owned by the controller
struct ActivePoll {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Session-scoped mapping job controller
pub struct JobController {
    backend: Arc<dyn MappingBackend>,
    store: Arc<RwLock<CanonicalStore>>,
    events: EventBus,
    poll: PollConfig,
    generation: Arc<AtomicU64>,
    status: Arc<watch::Sender<MappingJob>>,
    active: Mutex<Option<ActivePoll>>,
}

impl JobController {
    pub fn new(
        backend: Arc<dyn MappingBackend>,
        store: Arc<RwLock<CanonicalStore>>,
        events: EventBus,
        poll: PollConfig,
    ) -> Self {
        let (status, _) = watch::channel(MappingJob::idle(""));
        Self {
            backend,
            store,
            events,
            poll,
            generation: Arc::new(AtomicU64::new(0)),
            status: Arc::new(status),
            active: Mutex::new(None),
        }
    }

    /// Snapshot of the current job
    pub fn status(&self) -> MappingJob {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change
    pub fn subscribe(&self) -> watch::Receiver<MappingJob> {
        self.status.subscribe()
    }

    /// Whether a poll loop is currently scheduled
    pub async fn is_polling(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Start a fresh mapping job for `session_id`.
    ///
    /// Any running poll loop is cancelled first. The status snapshot moves to
    /// `Pending` before the start request is issued; on return it reflects
    /// what the backend answered.
    pub async fn start(&self, session_id: &str) -> EngineResult<MappingJob> {
        let generation = self.supersede().await;

        let job = MappingJob::pending(session_id);
        let job_id = job.id;
        self.status.send_replace(job);
        self.store.write().await.clear();

        tracing::info!(session_id = %session_id, job_id = %job_id, "Mapping job started");
        self.events.emit_lossy(MappingEvent::JobStarted {
            session_id: session_id.to_string(),
            job_id,
            timestamp: Utc::now(),
        });

        let poll_loop = PollLoop {
            session_id: session_id.to_string(),
            job_id,
            generation,
            current_generation: Arc::clone(&self.generation),
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            status: Arc::clone(&self.status),
            poll: self.poll.clone(),
            cancel: CancellationToken::new(),
        };

        let response = match self.backend.start_job(session_id).await {
            Ok(response) => response,
            Err(e) => {
                poll_loop.fail(FailureKind::Transport, e.to_string());
                return Err(e.into());
            }
        };

        if !poll_loop.is_current() {
            tracing::warn!(session_id = %session_id, job_id = %job_id, "Start response arrived after job was superseded");
            return Err(EngineError::Superseded(job_id));
        }

        if poll_loop.apply(response, 0).await.is_break() {
            return Ok(self.status());
        }

        let cancel = poll_loop.cancel.clone();
        let handle = tokio::spawn(poll_loop.run());

        let mut active = self.active.lock().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            *active = Some(ActivePoll { cancel, handle });
        } else {
            cancel.cancel();
        }
        drop(active);

        Ok(self.status())
    }

    /// Stop polling and ignore any outcome of the current job
    pub async fn shutdown(&self) {
        self.supersede().await;
    }

    /// Wait until the current job reaches a terminal state.
    ///
    /// Resolves to the delivered mapping, or the job's failure as an error.
    pub async fn wait(&self) -> EngineResult<CanonicalMapping> {
        let mut rx = self.status.subscribe();
        let job_id = rx.borrow().id;
        if rx.borrow().status == JobState::Idle {
            return Err(EngineError::NoJob);
        }

        let job = rx
            .wait_for(|job| job.id != job_id || job.is_terminal())
            .await
            .map_err(|_| EngineError::Superseded(job_id))?
            .clone();

        if job.id != job_id {
            return Err(EngineError::Superseded(job_id));
        }

        outcome(job)
    }

    /// Cancel the active loop and invalidate its generation.
    ///
    /// Returns the new generation.
    async fn supersede(&self) -> u64 {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            tracing::debug!("Previous poll loop cancelled");
        }
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

/// Terminal job → mapping or error
fn outcome(job: MappingJob) -> EngineResult<CanonicalMapping> {
    match (job.status, job.result) {
        (JobState::Succeeded, Some(mapping)) => Ok(mapping),
        _ => {
            let message = job.error.unwrap_or_else(|| FAILED_WITHOUT_MESSAGE.to_string());
            match job.failure {
                Some(FailureKind::Timeout) => Err(EngineError::JobTimeout(message)),
                _ => Err(EngineError::JobFailed(message)),
            }
        }
    }
}

/// One job's polling task. Owns clones of everything it writes to.
struct PollLoop {
    session_id: String,
    job_id: Uuid,
    generation: u64,
    current_generation: Arc<AtomicU64>,
    backend: Arc<dyn MappingBackend>,
    store: Arc<RwLock<CanonicalStore>>,
    events: EventBus,
    status: Arc<watch::Sender<MappingJob>>,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        for attempt in 1..=self.poll.max_attempts {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!(job_id = %self.job_id, attempt, "Poll loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.poll.interval()) => {}
            }

            // Dropping the in-flight request on cancel aborts it.
            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!(job_id = %self.job_id, attempt, "Poll loop cancelled mid-request");
                    return;
                }
                response = self.backend.job_status(&self.session_id) => response,
            };

            match response {
                Ok(response) => {
                    if self.apply(response, attempt).await.is_break() {
                        return;
                    }
                }
                Err(e) => {
                    self.fail(FailureKind::Transport, e.to_string());
                    return;
                }
            }
        }

        tracing::warn!(
            session_id = %self.session_id,
            job_id = %self.job_id,
            attempts = self.poll.max_attempts,
            "Mapping job timed out"
        );
        self.fail(FailureKind::Timeout, TIMEOUT_MESSAGE);
    }

    fn is_current(&self) -> bool {
        self.current_generation.load(Ordering::SeqCst) == self.generation
    }

    /// Mutate the status snapshot only if it still belongs to this job
    fn update_status(&self, f: impl FnOnce(&mut MappingJob) -> bool) -> bool {
        if !self.is_current() {
            return false;
        }
        self.status.send_if_modified(|job| job.id == self.job_id && f(job))
    }

    /// Fold one backend answer into the job. `Break` means the job is over.
    async fn apply(&self, response: JobStatusResponse, attempt: u32) -> ControlFlow<()> {
        self.update_status(|job| {
            let changed = job.attempts != attempt;
            job.attempts = attempt;
            changed
        });

        match response.status {
            JobState::Succeeded => {
                match response.mapping {
                    Some(mapping) => self.deliver(mapping).await,
                    None => self.fail(FailureKind::Backend, SUCCEEDED_WITHOUT_MAPPING),
                }
                ControlFlow::Break(())
            }
            JobState::Failed => {
                let message = response
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| FAILED_WITHOUT_MESSAGE.to_string());
                self.fail(FailureKind::Backend, message);
                ControlFlow::Break(())
            }
            state @ (JobState::Idle | JobState::Pending | JobState::Running) => {
                if self.update_status(|job| job.transition_to(state)) {
                    tracing::debug!(job_id = %self.job_id, status = ?state, attempt, "Mapping job status changed");
                    self.events.emit_lossy(MappingEvent::JobStatusChanged {
                        session_id: self.session_id.clone(),
                        job_id: self.job_id,
                        status: state,
                        attempt,
                        timestamp: Utc::now(),
                    });
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Hand a succeeded job's mapping to the store, unless superseded.
    ///
    /// The generation check happens under the store write lock, so a newer
    /// `start` either runs entirely before (and the result is dropped) or
    /// clears the store after this delivery.
    async fn deliver(&self, mapping: CanonicalMapping) {
        let mut store = self.store.write().await;
        let tables = mapping.mapped.len();
        let missing = mapping.missing_fields.len();

        if !self.update_status(|job| job.succeed(mapping.clone())) {
            drop(store);
            tracing::warn!(session_id = %self.session_id, job_id = %self.job_id, "Discarding result of superseded mapping job");
            self.events.emit_lossy(MappingEvent::StaleResultDiscarded {
                session_id: self.session_id.clone(),
                job_id: self.job_id,
                timestamp: Utc::now(),
            });
            return;
        }

        store.replace(mapping);
        drop(store);

        tracing::info!(
            session_id = %self.session_id,
            job_id = %self.job_id,
            tables,
            missing_fields = missing,
            "Mapping delivered"
        );
        self.events.emit_lossy(MappingEvent::MappingDelivered {
            session_id: self.session_id.clone(),
            job_id: self.job_id,
            tables,
            missing_fields: missing,
            timestamp: Utc::now(),
        });
    }

    fn fail(&self, kind: FailureKind, message: impl Into<String>) {
        let message = message.into();
        if !self.update_status(|job| job.fail(kind, message.clone())) {
            tracing::debug!(job_id = %self.job_id, "Ignoring failure of superseded mapping job");
            return;
        }

        tracing::warn!(
            session_id = %self.session_id,
            job_id = %self.job_id,
            kind = ?kind,
            error = %message,
            "Mapping job failed"
        );
        self.events.emit_lossy(MappingEvent::JobFailed {
            session_id: self.session_id.clone(),
            job_id: self.job_id,
            kind,
            message,
            timestamp: Utc::now(),
        });
    }
}
