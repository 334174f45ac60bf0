//! Deep research workflow.
//!
//! A session moves through four phases: analyze the question, plan the
//! report sections, research each section (optionally with tools), and
//! assemble the final report. [`ResearchWorkflow`] drives the phases,
//! checkpointing after each one so a session can be resumed.

pub mod checkpoint;
pub mod events;
pub mod files;
mod phase;
pub mod phases;
mod state;
mod workflow;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use events::{ResearchCallback, ResearchEvent};
pub use files::{FileKind, FileNode, GeneratedFile, NodeKind};
pub use phase::{Phase, PhaseContext, PhaseExecutor, executor_for, next_phase};
pub use state::{
    ContentSection, Priority, QuestionAnalysis, ResearchPlan, ResearchState, ResearchStatus,
    ResearchTask, SessionSummary, StateDelta,
};
pub use workflow::{ResearchRun, ResearchWorkflow};
