use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::PhaseError;
use crate::research::phase::{Phase, PhaseContext, PhaseExecutor};
use crate::research::state::{
    ContentSection, ResearchState, ResearchStatus, ResearchTask, StateDelta,
};
use crate::types::Message;

const AGENT_PROMPT: &str = "You are a research specialist writing one section of a larger \
report. Use the available tools to gather current, accurate information, then write the \
finished section in Markdown with clear headings, concrete facts and figures, and a coherent \
argument. When you are done researching, reply with the section text only.";

const WRITER_PROMPT: &str = "You are a research specialist writing one section of a larger \
report from your own knowledge. Write the finished section in Markdown with clear headings, \
accurate information and professional structure. Reply with the section text only.";

const FINALIZE_PROMPT: &str = "Stop using tools now. Using what you have gathered so far, \
write the complete section in Markdown.";

/// Researches the lowest-index unfinished section of the plan.
///
/// With capabilities available this runs a bounded tool-use loop; without
/// them it falls back to a single direct generation call.
pub struct ResearchSectionPhase;

#[async_trait]
impl PhaseExecutor for ResearchSectionPhase {
    fn phase(&self) -> Phase {
        Phase::ResearchSection
    }

    fn needs_capabilities(&self, state: &ResearchState) -> bool {
        state.next_section_index().is_some()
    }

    async fn run(
        &self,
        state: &ResearchState,
        ctx: &PhaseContext<'_>,
    ) -> Result<StateDelta, PhaseError> {
        let plan = state.plan.as_ref().ok_or(PhaseError::MissingInput {
            what: "research plan",
        })?;
        let total = plan.sections.len();

        let Some(index) = state.next_section_index() else {
            info!(session_id = %state.session_id, "All sections researched");
            return Ok(StateDelta {
                status: Some(ResearchStatus::Generating),
                progress: Some(ctx.config.progress.sections_done),
                ..Default::default()
            });
        };
        let task = &plan.sections[index];
        info!(
            session_id = %state.session_id,
            section = index,
            title = %task.title,
            tools = ctx.capabilities.len(),
            "Researching section"
        );

        let (content, messages) = if ctx.capabilities.is_empty() {
            info!(section = index, "No tools available, using direct generation");
            write_directly(ctx, task).await?
        } else {
            run_agent(ctx, task).await?
        };
        if content.trim().is_empty() {
            return Err(PhaseError::MalformedOutput {
                message: format!("section '{}' came back empty", task.title),
            });
        }

        let completed = state.completed_sections() + 1;
        Ok(StateDelta {
            status: Some(ResearchStatus::Executing),
            progress: Some(ctx.config.progress.for_sections(completed, total)),
            content: vec![ContentSection::new(index, task.title.clone(), content)],
            messages,
            ..Default::default()
        })
    }
}

fn section_brief(task: &ResearchTask) -> String {
    format!(
        "Write a complete research section on the following topic.\n\n\
         **Section title**: {}\n**Section description**: {}\n**Priority**: {}\n\n\
         Search for relevant, up-to-date information first, then produce structured \
         Markdown content of roughly 500-1500 words.",
        task.title, task.description, task.priority
    )
}

async fn write_directly(
    ctx: &PhaseContext<'_>,
    task: &ResearchTask,
) -> Result<(String, Vec<Message>), PhaseError> {
    let prompt = format!(
        "Write a research section on the following topic.\n\n\
         Section title: {}\nSection description: {}",
        task.title, task.description
    );
    let text = ctx.brain.ask(WRITER_PROMPT, &prompt).await?;
    Ok((
        text.clone(),
        vec![Message::user(prompt), Message::assistant(text)],
    ))
}

/// Bounded tool-use loop. Tool failures are reported back to the model as
/// error results instead of failing the phase.
async fn run_agent(
    ctx: &PhaseContext<'_>,
    task: &ResearchTask,
) -> Result<(String, Vec<Message>), PhaseError> {
    let tools = ctx.capabilities.definitions();
    let max_steps = ctx.config.max_agent_steps;
    let mut transcript = vec![Message::system(AGENT_PROMPT), Message::user(section_brief(task))];

    for step in 0..max_steps {
        let response = ctx
            .brain
            .think(transcript.clone(), Some(tools.clone()))
            .await?;
        let calls: Vec<(String, String, serde_json::Value)> = response
            .message
            .content
            .tool_calls()
            .into_iter()
            .map(|c| (c.id.to_string(), c.name.to_string(), c.arguments.clone()))
            .collect();
        let text = response.message.content.joined_text();
        transcript.push(response.message);

        if calls.is_empty() {
            debug!(step, "Agent produced final answer");
            return Ok((text, transcript.split_off(1)));
        }

        for (id, name, arguments) in calls {
            debug!(step, tool = %name, "Agent tool call");
            let (output, is_error) = match ctx.capabilities.invoke(&name, arguments).await {
                Ok(output) => (output, false),
                Err(e) => {
                    warn!(tool = %name, error = %e, "Tool call failed");
                    (e.to_string(), true)
                }
            };
            transcript.push(Message::tool_result(id, output, is_error));
        }
    }

    warn!(
        steps = max_steps,
        "Agent step ceiling reached; requesting final answer without tools"
    );
    transcript.push(Message::user(FINALIZE_PROMPT));
    let response = ctx.brain.think(transcript.clone(), None).await?;
    let text = response.message.content.joined_text();
    if text.trim().is_empty() {
        return Err(PhaseError::ToolLoopExhausted { steps: max_steps });
    }
    transcript.push(response.message);
    Ok((text, transcript.split_off(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{Brain, BrainSettings, MockLlmProvider};
    use crate::capability::CapabilitySet;
    use crate::capability::mock::MockCapability;
    use crate::config::ResearchConfig;
    use crate::research::state::{Priority, QuestionAnalysis, ResearchPlan};
    use crate::types::Content;
    use std::sync::Arc;

    fn executing_state(titles: &[&str]) -> ResearchState {
        let mut state = ResearchState::new("What is photosynthesis?", "s1", "u1");
        state.analysis = Some(QuestionAnalysis {
            topic: "Photosynthesis".into(),
            scope: "biology".into(),
            sub_questions: vec![],
            key_concepts: vec![],
        });
        state.plan = Some(ResearchPlan {
            title: None,
            sections: titles
                .iter()
                .map(|t| ResearchTask {
                    title: t.to_string(),
                    description: format!("About {t}"),
                    priority: Priority::High,
                })
                .collect(),
        });
        state.status = ResearchStatus::Executing;
        state.progress = 40.0;
        state
    }

    struct Harness {
        provider: Arc<MockLlmProvider>,
        brain: Brain,
        caps: CapabilitySet,
        config: ResearchConfig,
    }

    impl Harness {
        fn new(caps: CapabilitySet) -> Self {
            let provider = Arc::new(MockLlmProvider::new());
            let brain = Brain::new(provider.clone(), BrainSettings::default());
            Self {
                provider,
                brain,
                caps,
                config: ResearchConfig::default(),
            }
        }

        async fn run(&self, state: &ResearchState) -> Result<StateDelta, PhaseError> {
            let ctx = PhaseContext {
                brain: &self.brain,
                capabilities: &self.caps,
                config: &self.config,
            };
            ResearchSectionPhase.run(state, &ctx).await
        }
    }

    fn search_caps(search: Arc<MockCapability>) -> CapabilitySet {
        let mut caps = CapabilitySet::empty();
        caps.insert(search);
        caps
    }

    #[tokio::test]
    async fn test_degraded_mode_single_call() {
        let h = Harness::new(CapabilitySet::empty());
        h.provider.queue_text("## Overview\nPlants convert light.");
        let delta = h.run(&executing_state(&["Overview", "Mechanism"])).await.unwrap();

        assert_eq!(h.provider.call_count(), 1);
        assert!(h.provider.requests()[0].tools.is_none());
        let section = &delta.content[0];
        assert_eq!(section.section_index, 0);
        assert_eq!(section.task_id, "section-0");
        assert!(!section.content.is_empty());
        assert_eq!(delta.progress, Some(60.0));
        assert_eq!(delta.status, Some(ResearchStatus::Executing));
    }

    #[tokio::test]
    async fn test_agent_uses_tools_then_answers() {
        let search = Arc::new(MockCapability::new("web_search", "Chlorophyll absorbs light."));
        let h = Harness::new(search_caps(search.clone()));
        h.provider.queue_response(MockLlmProvider::tool_call_response(
            "web_search",
            serde_json::json!({"query": "photosynthesis overview"}),
        ));
        h.provider.queue_text("## Overview\nChlorophyll absorbs light.");

        let delta = h.run(&executing_state(&["Overview"])).await.unwrap();
        assert_eq!(search.call_count(), 1);
        assert_eq!(h.provider.call_count(), 2);
        assert_eq!(h.provider.requests()[0].tools.as_ref().unwrap().len(), 1);
        assert!(delta.content[0].content.contains("Chlorophyll"));
        // user brief, tool call, tool result, final answer
        assert_eq!(delta.messages.len(), 4);
        assert!(matches!(
            delta.messages[2].content,
            Content::ToolResult {
                is_error: false,
                ..
            }
        ));
        assert_eq!(delta.progress, Some(80.0));
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back_to_model() {
        let search = Arc::new(MockCapability::new("web_search", "").failing("quota exceeded"));
        let h = Harness::new(search_caps(search));
        h.provider.queue_response(MockLlmProvider::tool_call_response(
            "web_search",
            serde_json::json!({"query": "x"}),
        ));
        h.provider.queue_text("Written from memory.");

        let delta = h.run(&executing_state(&["Overview"])).await.unwrap();
        assert_eq!(delta.content[0].content, "Written from memory.");
        assert!(matches!(
            delta.messages[2].content,
            Content::ToolResult { is_error: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_step_ceiling_falls_back_to_final_answer() {
        let search = Arc::new(MockCapability::new("web_search", "more results"));
        let mut h = Harness::new(search_caps(search.clone()));
        h.config.max_agent_steps = 3;
        for _ in 0..3 {
            h.provider.queue_response(MockLlmProvider::tool_call_response(
                "web_search",
                serde_json::json!({"query": "again"}),
            ));
        }
        h.provider.queue_text("Final section after ceiling.");

        let delta = h.run(&executing_state(&["Overview"])).await.unwrap();
        assert_eq!(search.call_count(), 3);
        assert_eq!(h.provider.call_count(), 4);
        assert!(h.provider.requests()[3].tools.is_none());
        assert_eq!(delta.content[0].content, "Final section after ceiling.");
    }

    #[tokio::test]
    async fn test_step_ceiling_with_empty_fallback_fails() {
        let search = Arc::new(MockCapability::new("web_search", "r"));
        let mut h = Harness::new(search_caps(search));
        h.config.max_agent_steps = 1;
        h.provider.queue_response(MockLlmProvider::tool_call_response(
            "web_search",
            serde_json::json!({}),
        ));
        h.provider.queue_text("   ");

        let err = h.run(&executing_state(&["Overview"])).await.unwrap_err();
        assert!(matches!(err, PhaseError::ToolLoopExhausted { steps: 1 }));
    }

    #[tokio::test]
    async fn test_all_sections_done_signals_generating() {
        let h = Harness::new(CapabilitySet::empty());
        let mut state = executing_state(&["Overview"]);
        state
            .generated_content
            .push(ContentSection::new(0, "Overview", "done"));
        let delta = h.run(&state).await.unwrap();
        assert_eq!(delta.status, Some(ResearchStatus::Generating));
        assert_eq!(delta.progress, Some(80.0));
        assert!(delta.content.is_empty());
        assert_eq!(h.provider.call_count(), 0);
        assert!(!ResearchSectionPhase.needs_capabilities(&state));
    }

    #[tokio::test]
    async fn test_picks_lowest_missing_section() {
        let h = Harness::new(CapabilitySet::empty());
        h.provider.queue_text("Body of section zero");
        let mut state = executing_state(&["A", "B", "C"]);
        state.generated_content.push(ContentSection::new(1, "B", "done"));
        let delta = h.run(&state).await.unwrap();
        assert_eq!(delta.content[0].section_index, 0);
        assert_eq!(delta.content[0].title, "A");
    }

    #[tokio::test]
    async fn test_empty_section_content_is_an_error() {
        let h = Harness::new(CapabilitySet::empty());
        h.provider.queue_text("");
        let err = h.run(&executing_state(&["A"])).await.unwrap_err();
        assert!(matches!(err, PhaseError::MalformedOutput { .. }));
    }
}
