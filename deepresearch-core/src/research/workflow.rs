//! The research workflow engine.
//!
//! Drives a session through its phases one at a time. After every phase the
//! delta is merged, the state is checkpointed and only then is an event
//! emitted. Each session has at most one in-flight run: a process-local lease
//! guards this workflow, and the checkpoint store's lease guards every other
//! process sharing the store.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::checkpoint::{CheckpointLease, CheckpointStore};
use super::events::{EventEmitter, ResearchCallback, ResearchEvent};
use super::files::{GeneratedFile, build_tree, project_files};
use super::phase::{Phase, PhaseContext, executor_for, next_phase};
use super::state::{ResearchState, ResearchStatus, SessionSummary, StateDelta};
use crate::brain::Brain;
use crate::capability::{CapabilityRegistry, CapabilityRequest, CapabilitySet};
use crate::config::ResearchConfig;
use crate::error::{CheckpointError, DeepResearchError, PhaseError, Result, WorkflowError};

const EVENT_BUFFER: usize = 32;

/// Held while a run owns its session. Released on drop.
struct SessionLease {
    session_id: String,
    leases: Arc<Mutex<HashSet<String>>>,
    _checkpoint: CheckpointLease,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.remove(&self.session_id);
    }
}

/// A validated, leased session ready to be driven.
struct Prepared {
    lease: SessionLease,
    state: ResearchState,
    resumed: bool,
}

/// Orchestrates research sessions over a brain, a capability registry and a
/// checkpoint store.
#[derive(Clone)]
pub struct ResearchWorkflow {
    brain: Arc<Brain>,
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn CheckpointStore>,
    config: ResearchConfig,
    capability_request: CapabilityRequest,
    leases: Arc<Mutex<HashSet<String>>>,
    callback: Option<Arc<dyn ResearchCallback>>,
}

impl ResearchWorkflow {
    pub fn new(
        brain: Arc<Brain>,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn CheckpointStore>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            brain,
            registry,
            store,
            config,
            capability_request: CapabilityRequest::default(),
            leases: Arc::new(Mutex::new(HashSet::new())),
            callback: None,
        }
    }

    /// Notify `callback` of every event, in addition to any stream consumer.
    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_capability_request(mut self, request: CapabilityRequest) -> Self {
        self.capability_request = request;
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    /// Whether a run currently holds the session's lease.
    pub fn is_running(&self, session_id: &str) -> bool {
        self.leases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(session_id)
    }

    /// Run a new session to completion (or failure).
    ///
    /// Phase failures are not errors here: the returned state carries the
    /// error status and message.
    pub async fn start(
        &self,
        question: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<ResearchState> {
        self.start_with_cancel(question, session_id, user_id, CancellationToken::new())
            .await
    }

    pub async fn start_with_cancel(
        &self,
        question: &str,
        session_id: &str,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchState> {
        let prepared = self.prepare_start(question, session_id, user_id).await?;
        let emitter = EventEmitter::new(None, self.callback.clone());
        self.execute(prepared, &emitter, cancel).await
    }

    /// Start a new session on a background task, streaming its events.
    pub async fn start_streaming(
        &self,
        question: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<ResearchRun> {
        let prepared = self.prepare_start(question, session_id, user_id).await?;
        Ok(self.spawn(prepared))
    }

    /// Continue a checkpointed session from its recorded status.
    pub async fn resume(&self, session_id: &str) -> Result<ResearchState> {
        self.resume_with_cancel(session_id, CancellationToken::new())
            .await
    }

    pub async fn resume_with_cancel(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchState> {
        let prepared = self.prepare_resume(session_id).await?;
        let emitter = EventEmitter::new(None, self.callback.clone());
        self.execute(prepared, &emitter, cancel).await
    }

    pub async fn resume_streaming(&self, session_id: &str) -> Result<ResearchRun> {
        let prepared = self.prepare_resume(session_id).await?;
        Ok(self.spawn(prepared))
    }

    /// Latest checkpoint for a session, if any.
    pub async fn get_state(&self, session_id: &str) -> Result<Option<ResearchState>> {
        Ok(self.store.load(session_id).await?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        Ok(self.store.list().await?)
    }

    /// Files projected from a session's latest checkpoint.
    pub async fn files(&self, session_id: &str) -> Result<Vec<GeneratedFile>> {
        let state = self.load_existing(session_id).await?;
        Ok(project_files(&state))
    }

    async fn acquire_lease(&self, session_id: &str) -> Result<SessionLease> {
        let busy = || WorkflowError::SessionBusy {
            session_id: session_id.to_string(),
        };
        {
            let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
            if !leases.insert(session_id.to_string()) {
                return Err(busy().into());
            }
        }
        let release = || {
            let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
            leases.remove(session_id);
        };
        match self.store.lease(session_id).await {
            Ok(checkpoint) => Ok(SessionLease {
                session_id: session_id.to_string(),
                leases: Arc::clone(&self.leases),
                _checkpoint: checkpoint,
            }),
            Err(CheckpointError::Locked { .. }) => {
                release();
                warn!(session_id, "Session is owned by another run");
                Err(busy().into())
            }
            Err(e) => {
                release();
                Err(e.into())
            }
        }
    }

    async fn load_existing(&self, session_id: &str) -> Result<ResearchState> {
        self.store.load(session_id).await?.ok_or_else(|| {
            WorkflowError::SessionNotFound {
                session_id: session_id.to_string(),
            }
            .into()
        })
    }

    async fn prepare_start(
        &self,
        question: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<Prepared> {
        let state = ResearchState::new(question, session_id, user_id);
        state.validate()?;
        let lease = self.acquire_lease(session_id).await?;
        if self.store.load(session_id).await?.is_some() {
            return Err(WorkflowError::SessionExists {
                session_id: session_id.to_string(),
            }
            .into());
        }
        info!(session_id, user_id, "Starting research session");
        Ok(Prepared {
            lease,
            state,
            resumed: false,
        })
    }

    async fn prepare_resume(&self, session_id: &str) -> Result<Prepared> {
        if session_id.trim().is_empty() {
            return Err(WorkflowError::EmptyField {
                field: "session_id",
            }
            .into());
        }
        let lease = self.acquire_lease(session_id).await?;
        let mut state = self.load_existing(session_id).await?;
        if state.status == ResearchStatus::Error {
            info!(
                session_id,
                error = state.error.as_deref().unwrap_or_default(),
                "Retrying failed session"
            );
            state.rewind_after_error();
        }
        info!(
            session_id,
            status = %state.status,
            progress = state.progress,
            "Resuming research session"
        );
        Ok(Prepared {
            lease,
            state,
            resumed: true,
        })
    }

    fn spawn(&self, prepared: Prepared) -> ResearchRun {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let session_id = prepared.state.session_id.clone();
        let this = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let emitter = EventEmitter::new(Some(tx), this.callback.clone());
            this.execute(prepared, &emitter, token).await
        });
        ResearchRun {
            session_id,
            events: ReceiverStream::new(rx),
            cancel,
            handle,
        }
    }

    async fn execute(
        &self,
        prepared: Prepared,
        emitter: &EventEmitter,
        cancel: CancellationToken,
    ) -> Result<ResearchState> {
        let Prepared {
            lease,
            mut state,
            resumed,
        } = prepared;

        if state.status == ResearchStatus::Completed {
            info!(session_id = %state.session_id, "Session already completed");
            emitter.emit(completed_event(&state)).await;
            drop(lease);
            return Ok(state);
        }

        let result = self.drive(&mut state, resumed, emitter, &cancel).await;
        drop(lease);
        result.map(|()| state)
    }

    async fn drive(
        &self,
        state: &mut ResearchState,
        resumed: bool,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let session_id = state.session_id.clone();
        let cancelled = || -> DeepResearchError {
            WorkflowError::Cancelled {
                session_id: session_id.clone(),
            }
            .into()
        };

        let usage_at_start = self.brain.total_usage();
        if !resumed {
            state.mark_started();
        }
        self.checkpoint(state, None, emitter).await?;
        let created = ResearchEvent::SessionCreated {
            session_id: session_id.clone(),
            status: state.status,
            progress: state.progress,
            resumed,
        };
        if !emitter.emit(created).await {
            return Err(cancelled());
        }

        let mut capabilities: Option<CapabilitySet> = None;
        let no_capabilities = CapabilitySet::empty();

        while let Some(phase) = next_phase(state.status) {
            if cancel.is_cancelled() {
                info!(session_id = %session_id, %phase, "Run cancelled before phase");
                return Err(cancelled());
            }
            let executor = executor_for(phase);

            if capabilities.is_none() && executor.needs_capabilities(state) {
                let set = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled()),
                    set = self.registry.resolve(&self.capability_request) => set,
                };
                if set.is_empty() {
                    warn!(
                        session_id = %session_id,
                        "No capabilities acquired, sections will use direct generation"
                    );
                } else {
                    info!(
                        session_id = %session_id,
                        tools = ?set.names(),
                        degraded = set.is_degraded(),
                        "Capabilities ready"
                    );
                }
                capabilities = Some(set);
            }

            let ctx = PhaseContext {
                brain: &self.brain,
                capabilities: capabilities.as_ref().unwrap_or(&no_capabilities),
                config: &self.config,
            };
            let timeout = self.config.phase_timeout();
            let started = Instant::now();
            debug!(session_id = %session_id, %phase, "Phase started");
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(session_id = %session_id, %phase, "Run cancelled during phase");
                    return Err(cancelled());
                }
                outcome = tokio::time::timeout(timeout, executor.run(state, &ctx)) => outcome,
            };

            let delta = match outcome {
                Ok(Ok(delta)) => {
                    info!(
                        session_id = %session_id,
                        %phase,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Phase completed"
                    );
                    delta
                }
                Ok(Err(e)) => {
                    error!(session_id = %session_id, %phase, error = %e, "Phase failed");
                    StateDelta::failure(e.describe(phase))
                }
                Err(_) => {
                    let e = PhaseError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    };
                    error!(session_id = %session_id, %phase, error = %e, "Phase timed out");
                    StateDelta::failure(e.describe(phase))
                }
            };

            let reported = delta.clone();
            state.apply(delta);
            self.checkpoint(state, Some(phase), emitter).await?;

            let event = match state.status {
                ResearchStatus::Completed => completed_event(state),
                ResearchStatus::Error => error_event(state, Some(phase), state.error.clone()),
                status => ResearchEvent::Progress {
                    session_id: session_id.clone(),
                    phase,
                    status,
                    progress: state.progress,
                    completed_sections: state.completed_sections(),
                    total_sections: state.total_sections(),
                    delta: reported,
                },
            };
            let terminal = event.is_terminal();
            if !emitter.emit(event).await && !terminal {
                info!(session_id = %session_id, "Event consumer gone, stopping run");
                return Err(cancelled());
            }
        }

        info!(
            session_id = %session_id,
            status = %state.status,
            progress = state.progress,
            tokens = self.brain.total_usage().since(&usage_at_start).total(),
            "Research run finished"
        );
        Ok(())
    }

    /// Persist the state. A failed save is reported as an error event and
    /// stops the run.
    async fn checkpoint(
        &self,
        state: &ResearchState,
        phase: Option<Phase>,
        emitter: &EventEmitter,
    ) -> Result<()> {
        if let Err(e) = self.store.save(&state.session_id, state).await {
            error!(session_id = %state.session_id, error = %e, "Checkpoint save failed");
            emitter
                .emit(error_event(state, phase, Some(e.to_string())))
                .await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn completed_event(state: &ResearchState) -> ResearchEvent {
    let files = project_files(state);
    let tree = build_tree(&files);
    ResearchEvent::Completed {
        session_id: state.session_id.clone(),
        progress: state.progress,
        final_report: state.final_report.clone().unwrap_or_default(),
        files,
        tree,
    }
}

fn error_event(
    state: &ResearchState,
    phase: Option<Phase>,
    error: Option<String>,
) -> ResearchEvent {
    ResearchEvent::Error {
        session_id: state.session_id.clone(),
        phase,
        progress: state.progress,
        error: error.unwrap_or_else(|| "unknown error".to_string()),
        state: Box::new(state.clone()),
    }
}

/// Handle to a background research run.
///
/// Yields [`ResearchEvent`]s as a [`Stream`]. Dropping the handle (or its
/// event stream) stops the run after the current checkpoint.
pub struct ResearchRun {
    session_id: String,
    events: ReceiverStream<ResearchEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<ResearchState>>,
}

impl ResearchRun {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Request cancellation. An in-flight phase is abandoned without a
    /// checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next_event(&mut self) -> Option<ResearchEvent> {
        self.events.next().await
    }

    /// Wait for the run to finish, discarding events not yet consumed.
    pub async fn join(mut self) -> Result<ResearchState> {
        while self.events.next().await.is_some() {}
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(WorkflowError::Join {
                message: e.to_string(),
            }
            .into()),
        }
    }
}

impl Stream for ResearchRun {
    type Item = ResearchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}
