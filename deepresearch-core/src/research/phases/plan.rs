use async_trait::async_trait;
use tracing::{info, warn};

use super::parse_json_reply;
use crate::error::PhaseError;
use crate::research::phase::{Phase, PhaseContext, PhaseExecutor};
use crate::research::state::{ResearchPlan, ResearchState, ResearchStatus, StateDelta};
use crate::types::Message;

const SYSTEM_PROMPT: &str = "You are a research planner. Given a research question and its \
analysis, design the outline of a report. Reply with a single JSON object: \
{\"title\": string, \"sections\": [{\"title\": string, \"description\": string, \
\"priority\": \"high\" | \"medium\" | \"low\"}]}. Order sections as they should appear in \
the report. Reply with the JSON object only.";

/// Derives the ordered section plan from the analysis.
pub struct GeneratePlanPhase;

#[async_trait]
impl PhaseExecutor for GeneratePlanPhase {
    fn phase(&self) -> Phase {
        Phase::GeneratePlan
    }

    async fn run(
        &self,
        state: &ResearchState,
        ctx: &PhaseContext<'_>,
    ) -> Result<StateDelta, PhaseError> {
        let analysis = state.analysis.as_ref().ok_or(PhaseError::MissingInput {
            what: "question analysis",
        })?;
        let analysis_json = serde_json::to_string_pretty(analysis).map_err(|e| {
            PhaseError::MalformedOutput {
                message: e.to_string(),
            }
        })?;
        let prompt = format!(
            "Research question:\n{}\n\nAnalysis:\n{}\n\nPlan at most {} sections.",
            state.question, analysis_json, ctx.config.max_sections
        );

        let reply = ctx.brain.ask(SYSTEM_PROMPT, &prompt).await?;
        let mut plan: ResearchPlan = parse_json_reply(&reply)?;
        plan.sections.retain(|s| !s.title.trim().is_empty());
        if plan.sections.is_empty() {
            return Err(PhaseError::EmptyPlan);
        }
        if plan.sections.len() > ctx.config.max_sections.max(1) {
            warn!(
                planned = plan.sections.len(),
                kept = ctx.config.max_sections,
                "Truncating research plan"
            );
            plan.sections.truncate(ctx.config.max_sections.max(1));
        }
        info!(
            session_id = %state.session_id,
            sections = plan.sections.len(),
            "Research plan generated"
        );

        Ok(StateDelta {
            status: Some(ResearchStatus::Executing),
            progress: Some(ctx.config.progress.planned),
            plan: Some(plan),
            messages: vec![Message::user(prompt), Message::assistant(reply)],
            ..Default::default()
        })
    }
}
