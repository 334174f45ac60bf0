//! Phases of the research graph and the dispatch rule between them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::phases::{
    AnalyzeQuestionPhase, GeneratePlanPhase, GenerateReportPhase, ResearchSectionPhase,
};
use super::state::{ResearchState, ResearchStatus, StateDelta};
use crate::brain::Brain;
use crate::capability::CapabilitySet;
use crate::config::ResearchConfig;
use crate::error::PhaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AnalyzeQuestion,
    GeneratePlan,
    ResearchSection,
    GenerateReport,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::AnalyzeQuestion => "AnalyzeQuestion",
            Phase::GeneratePlan => "GeneratePlan",
            Phase::ResearchSection => "ResearchSection",
            Phase::GenerateReport => "GenerateReport",
        };
        f.write_str(s)
    }
}

/// The phase to run for a given status, or `None` once terminal.
///
/// Fresh runs and resumed runs both go through this function.
pub fn next_phase(status: ResearchStatus) -> Option<Phase> {
    match status {
        ResearchStatus::Idle | ResearchStatus::Starting | ResearchStatus::Analyzing => {
            Some(Phase::AnalyzeQuestion)
        }
        ResearchStatus::Planning => Some(Phase::GeneratePlan),
        ResearchStatus::Executing => Some(Phase::ResearchSection),
        ResearchStatus::Generating => Some(Phase::GenerateReport),
        ResearchStatus::Completed | ResearchStatus::Error => None,
    }
}

/// Everything a phase may consult besides the state itself.
pub struct PhaseContext<'a> {
    pub brain: &'a Brain,
    pub capabilities: &'a CapabilitySet,
    pub config: &'a ResearchConfig,
}

/// A single step of the workflow: read the state, return a delta.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    fn phase(&self) -> Phase;

    /// Whether this phase will use capabilities given the current state.
    fn needs_capabilities(&self, _state: &ResearchState) -> bool {
        false
    }

    async fn run(
        &self,
        state: &ResearchState,
        ctx: &PhaseContext<'_>,
    ) -> Result<StateDelta, PhaseError>;
}

pub fn executor_for(phase: Phase) -> &'static dyn PhaseExecutor {
    match phase {
        Phase::AnalyzeQuestion => &AnalyzeQuestionPhase,
        Phase::GeneratePlan => &GeneratePlanPhase,
        Phase::ResearchSection => &ResearchSectionPhase,
        Phase::GenerateReport => &GenerateReportPhase,
    }
}
