use async_trait::async_trait;
use tracing::info;

use super::parse_json_reply;
use crate::error::PhaseError;
use crate::research::phase::{Phase, PhaseContext, PhaseExecutor};
use crate::research::state::{QuestionAnalysis, ResearchState, ResearchStatus, StateDelta};
use crate::types::Message;

const SYSTEM_PROMPT: &str = "You are a research analyst. Read the user's research question \
and describe it as a single JSON object with the keys \"topic\" (string), \"scope\" (string), \
\"sub_questions\" (array of strings) and \"key_concepts\" (array of strings). \
Reply with the JSON object only.";

/// Turns the raw question into a [`QuestionAnalysis`].
pub struct AnalyzeQuestionPhase;

#[async_trait]
impl PhaseExecutor for AnalyzeQuestionPhase {
    fn phase(&self) -> Phase {
        Phase::AnalyzeQuestion
    }

    async fn run(
        &self,
        state: &ResearchState,
        ctx: &PhaseContext<'_>,
    ) -> Result<StateDelta, PhaseError> {
        let prompt = format!("Research question:\n{}", state.question);
        let reply = ctx.brain.ask(SYSTEM_PROMPT, &prompt).await?;
        let analysis: QuestionAnalysis = parse_json_reply(&reply)?;
        if analysis.topic.trim().is_empty() {
            return Err(PhaseError::MalformedOutput {
                message: "analysis has an empty topic".to_string(),
            });
        }
        info!(
            session_id = %state.session_id,
            topic = %analysis.topic,
            sub_questions = analysis.sub_questions.len(),
            "Question analyzed"
        );

        Ok(StateDelta {
            status: Some(ResearchStatus::Planning),
            progress: Some(ctx.config.progress.analyzed),
            analysis: Some(analysis),
            messages: vec![Message::user(prompt), Message::assistant(reply)],
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{Brain, BrainSettings, MockLlmProvider};
    use crate::capability::CapabilitySet;
    use crate::config::ResearchConfig;
    use crate::error::LlmError;
    use std::sync::Arc;

    async fn run_with(provider: Arc<MockLlmProvider>) -> Result<StateDelta, PhaseError> {
        let brain = Brain::new(provider, BrainSettings::default());
        let caps = CapabilitySet::empty();
        let config = ResearchConfig::default();
        let ctx = PhaseContext {
            brain: &brain,
            capabilities: &caps,
            config: &config,
        };
        let state = ResearchState::new("What is photosynthesis?", "s1", "u1");
        AnalyzeQuestionPhase.run(&state, &ctx).await
    }

    #[tokio::test]
    async fn test_analysis_parsed_and_status_advanced() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text(
            r#"{"topic": "Photosynthesis", "scope": "biology", "sub_questions": ["How?"], "key_concepts": ["chlorophyll"]}"#,
        );
        let delta = run_with(provider.clone()).await.unwrap();
        assert_eq!(delta.status, Some(ResearchStatus::Planning));
        assert_eq!(delta.progress, Some(20.0));
        assert_eq!(delta.analysis.unwrap().topic, "Photosynthesis");
        assert_eq!(delta.messages.len(), 2);
        let request = &provider.requests()[0];
        assert!(
            request.messages[1]
                .content
                .as_text()
                .unwrap()
                .contains("What is photosynthesis?")
        );
    }

    #[tokio::test]
    async fn test_malformed_analysis_is_an_error() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("I cannot answer that.");
        let err = run_with(provider).await.unwrap_err();
        assert!(matches!(err, PhaseError::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn test_llm_failure_propagates() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::AuthFailed {
            provider: "openai".into(),
        });
        let err = run_with(provider).await.unwrap_err();
        assert!(matches!(err, PhaseError::Llm(LlmError::AuthFailed { .. })));
    }
}
