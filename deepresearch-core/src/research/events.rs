//! Events streamed to consumers while a session runs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::files::{FileNode, GeneratedFile};
use super::phase::Phase;
use super::state::{ResearchState, ResearchStatus, StateDelta};

/// A progress notification for one session.
///
/// Every event is emitted only after the state it describes has been
/// checkpointed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    /// The run started (or resumed) and the initial checkpoint exists.
    SessionCreated {
        session_id: String,
        status: ResearchStatus,
        progress: f64,
        resumed: bool,
    },
    /// A phase finished and its delta was applied.
    Progress {
        session_id: String,
        phase: Phase,
        status: ResearchStatus,
        progress: f64,
        completed_sections: usize,
        total_sections: usize,
        delta: StateDelta,
    },
    /// The session reached the completed status.
    Completed {
        session_id: String,
        progress: f64,
        final_report: String,
        files: Vec<GeneratedFile>,
        tree: FileNode,
    },
    /// The session failed. `phase` is absent for failures outside a phase,
    /// such as a checkpoint write.
    Error {
        session_id: String,
        phase: Option<Phase>,
        progress: f64,
        error: String,
        state: Box<ResearchState>,
    },
}

impl ResearchEvent {
    pub fn session_id(&self) -> &str {
        match self {
            ResearchEvent::SessionCreated { session_id, .. }
            | ResearchEvent::Progress { session_id, .. }
            | ResearchEvent::Completed { session_id, .. }
            | ResearchEvent::Error { session_id, .. } => session_id,
        }
    }

    pub fn progress(&self) -> f64 {
        match self {
            ResearchEvent::SessionCreated { progress, .. }
            | ResearchEvent::Progress { progress, .. }
            | ResearchEvent::Completed { progress, .. }
            | ResearchEvent::Error { progress, .. } => *progress,
        }
    }

    pub fn status(&self) -> ResearchStatus {
        match self {
            ResearchEvent::SessionCreated { status, .. }
            | ResearchEvent::Progress { status, .. } => *status,
            ResearchEvent::Completed { .. } => ResearchStatus::Completed,
            ResearchEvent::Error { .. } => ResearchStatus::Error,
        }
    }

    /// `true` for the last event of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResearchEvent::Completed { .. } | ResearchEvent::Error { .. }
        )
    }
}

/// Observer for research events, invoked synchronously from the run task.
pub trait ResearchCallback: Send + Sync {
    fn on_event(&self, event: &ResearchEvent);
}

/// Fans events out to an optional channel and an optional callback.
pub(crate) struct EventEmitter {
    tx: Option<mpsc::Sender<ResearchEvent>>,
    callback: Option<Arc<dyn ResearchCallback>>,
}

impl EventEmitter {
    pub(crate) fn new(
        tx: Option<mpsc::Sender<ResearchEvent>>,
        callback: Option<Arc<dyn ResearchCallback>>,
    ) -> Self {
        Self { tx, callback }
    }

    /// Deliver an event. Returns `false` once a channel consumer has gone away.
    pub(crate) async fn emit(&self, event: ResearchEvent) -> bool {
        if let Some(callback) = &self.callback {
            callback.on_event(&event);
        }
        match &self.tx {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    debug!("Event receiver dropped");
                    return false;
                }
                true
            }
            None => true,
        }
    }
}
