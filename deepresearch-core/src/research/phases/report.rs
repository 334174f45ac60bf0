use async_trait::async_trait;
use std::fmt::Write as _;
use tracing::{info, warn};

use crate::error::PhaseError;
use crate::research::phase::{Phase, PhaseContext, PhaseExecutor};
use crate::research::state::{ContentSection, ResearchState, ResearchStatus, StateDelta};
use crate::types::Message;

const SUMMARY_PROMPT: &str = "You are an editor. Given the research question and the \
opening of each report section, write a concise executive summary of three to five \
sentences in plain prose. Reply with the summary only.";

/// Characters of each section fed into the summary prompt.
const DIGEST_CHARS: usize = 600;

/// Assembles the final Markdown report from the researched sections.
pub struct GenerateReportPhase;

#[async_trait]
impl PhaseExecutor for GenerateReportPhase {
    fn phase(&self) -> Phase {
        Phase::GenerateReport
    }

    async fn run(
        &self,
        state: &ResearchState,
        ctx: &PhaseContext<'_>,
    ) -> Result<StateDelta, PhaseError> {
        let plan = state.plan.as_ref().ok_or(PhaseError::MissingInput {
            what: "research plan",
        })?;
        let sections = state.ordered_content();
        if sections.is_empty() {
            return Err(PhaseError::MissingInput {
                what: "researched sections",
            });
        }
        if sections.len() < plan.sections.len() {
            warn!(
                session_id = %state.session_id,
                researched = sections.len(),
                planned = plan.sections.len(),
                "Generating report with missing sections"
            );
        }

        let mut messages = Vec::new();
        let summary = if ctx.config.report_summary {
            let prompt = summary_prompt(&state.question, &sections);
            let text = ctx.brain.ask(SUMMARY_PROMPT, &prompt).await?;
            let text = text.trim().to_string();
            messages.push(Message::user(prompt));
            messages.push(Message::assistant(text.clone()));
            (!text.is_empty()).then_some(text)
        } else {
            None
        };

        let title = plan
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| state.analysis.as_ref().map(|a| a.topic.as_str()))
            .unwrap_or(state.question.as_str());
        let report = assemble_report(title, &state.question, summary.as_deref(), &sections);
        info!(
            session_id = %state.session_id,
            sections = sections.len(),
            bytes = report.len(),
            "Final report assembled"
        );

        Ok(StateDelta {
            status: Some(ResearchStatus::Completed),
            progress: Some(100.0),
            final_report: Some(report),
            messages,
            ..Default::default()
        })
    }
}

fn summary_prompt(question: &str, sections: &[&ContentSection]) -> String {
    let mut prompt = format!("Research question: {question}\n\nSections:\n");
    for section in sections {
        let digest: String = section.content.chars().take(DIGEST_CHARS).collect();
        let _ = write!(prompt, "\n### {}\n{}\n", section.title, digest.trim());
    }
    prompt
}

/// Anchor used by GitHub-style Markdown renderers for a heading.
fn anchor(heading: &str) -> String {
    heading
        .chars()
        .filter_map(|c| match c {
            c if c.is_alphanumeric() => Some(c.to_ascii_lowercase()),
            ' ' | '-' => Some('-'),
            '_' => Some('_'),
            _ => None,
        })
        .collect()
}

/// Render the report: title, question, optional summary, a contents list and
/// every section in plan order.
pub fn assemble_report(
    title: &str,
    question: &str,
    summary: Option<&str>,
    sections: &[&ContentSection],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", title.trim());
    let _ = writeln!(out, "> Research question: {}\n", question.trim());

    if let Some(summary) = summary {
        let _ = writeln!(out, "## Executive Summary\n\n{}\n", summary.trim());
    }

    out.push_str("## Contents\n\n");
    for (n, section) in sections.iter().enumerate() {
        let heading = format!("{}. {}", n + 1, section.title.trim());
        let _ = writeln!(out, "- [{}](#{})", heading, anchor(&heading));
    }

    for (n, section) in sections.iter().enumerate() {
        let _ = write!(
            out,
            "\n---\n\n## {}. {}\n\n{}\n",
            n + 1,
            section.title.trim(),
            section.content.trim()
        );
    }
    out
}
