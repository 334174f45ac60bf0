//! Research state: the single aggregate threaded through every phase.
//!
//! Phases never mutate the state directly. They return a [`StateDelta`] which
//! [`ResearchState::apply`] merges while enforcing the write-once and
//! append-only rules on each field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WorkflowError;
use crate::types::Message;

/// Lifecycle status of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Idle,
    Starting,
    Analyzing,
    Planning,
    Executing,
    Generating,
    Completed,
    Error,
}

impl ResearchStatus {
    /// No phase runs once a session reaches a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, ResearchStatus::Completed | ResearchStatus::Error)
    }
}

impl std::fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResearchStatus::Idle => "idle",
            ResearchStatus::Starting => "starting",
            ResearchStatus::Analyzing => "analyzing",
            ResearchStatus::Planning => "planning",
            ResearchStatus::Executing => "executing",
            ResearchStatus::Generating => "generating",
            ResearchStatus::Completed => "completed",
            ResearchStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Structured reading of the research question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnalysis {
    pub topic: String,
    pub scope: String,
    #[serde(default)]
    pub sub_questions: Vec<String>,
    #[serde(default)]
    pub key_concepts: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// One planned report section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
}

/// Ordered section plan. Sections are addressed by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    #[serde(default)]
    pub title: Option<String>,
    pub sections: Vec<ResearchTask>,
}

/// Researched content for one plan section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSection {
    pub task_id: String,
    pub section_index: usize,
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ContentSection {
    pub fn new(section_index: usize, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            task_id: format!("section-{section_index}"),
            section_index,
            title: title.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Changes produced by one phase execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResearchStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<QuestionAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ResearchPlan>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentSection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateDelta {
    /// A transition to the error status. Progress is left untouched.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: Some(ResearchStatus::Error),
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// The mutable aggregate owned by one in-flight execution per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub session_id: String,
    pub user_id: String,
    pub question: String,
    pub status: ResearchStatus,
    /// 0–100, non-decreasing within a run.
    pub progress: f64,
    pub analysis: Option<QuestionAnalysis>,
    pub plan: Option<ResearchPlan>,
    #[serde(default)]
    pub generated_content: Vec<ContentSection>,
    pub final_report: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchState {
    pub fn new(
        question: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            question: question.into(),
            status: ResearchStatus::Idle,
            progress: 0.0,
            analysis: None,
            plan: None,
            generated_content: Vec::new(),
            final_report: None,
            messages: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the inputs of a fresh state before anything external is called.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for (field, value) in [
            ("question", &self.question),
            ("session_id", &self.session_id),
            ("user_id", &self.user_id),
        ] {
            if value.trim().is_empty() {
                return Err(WorkflowError::EmptyField { field });
            }
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move a validated fresh state into the analyzing status.
    pub fn mark_started(&mut self) {
        if matches!(self.status, ResearchStatus::Idle | ResearchStatus::Starting) {
            self.status = ResearchStatus::Analyzing;
            self.updated_at = Utc::now();
        }
    }

    pub fn total_sections(&self) -> usize {
        self.plan.as_ref().map_or(0, |p| p.sections.len())
    }

    pub fn completed_sections(&self) -> usize {
        self.generated_content.len()
    }

    pub fn has_section(&self, index: usize) -> bool {
        self.generated_content
            .iter()
            .any(|c| c.section_index == index)
    }

    /// Lowest plan index that has not been researched yet.
    pub fn next_section_index(&self) -> Option<usize> {
        (0..self.total_sections()).find(|i| !self.has_section(*i))
    }

    /// Sections in plan order.
    pub fn ordered_content(&self) -> Vec<&ContentSection> {
        let mut sections: Vec<&ContentSection> = self.generated_content.iter().collect();
        sections.sort_by_key(|c| c.section_index);
        sections
    }

    /// Merge a phase delta into the state.
    ///
    /// Returns `false` (and changes nothing) when the state is already
    /// terminal. Write-once fields keep their first value, section indices
    /// stay unique and progress never decreases.
    pub fn apply(&mut self, delta: StateDelta) -> bool {
        if self.is_terminal() {
            warn!(
                session_id = %self.session_id,
                status = %self.status,
                "Ignoring delta for terminal session"
            );
            return false;
        }

        if let Some(analysis) = delta.analysis {
            if self.analysis.is_none() {
                self.analysis = Some(analysis);
            } else {
                warn!(session_id = %self.session_id, "Analysis already set; keeping original");
            }
        }
        if let Some(plan) = delta.plan {
            if self.plan.is_none() {
                self.plan = Some(plan);
            } else {
                warn!(session_id = %self.session_id, "Plan already set; keeping original");
            }
        }
        for section in delta.content {
            let index = section.section_index;
            if index >= self.total_sections() || self.has_section(index) {
                warn!(session_id = %self.session_id, index, "Dropping duplicate or out-of-plan section");
                continue;
            }
            self.generated_content.push(section);
        }
        self.messages.extend(delta.messages);
        if let Some(report) = delta.final_report
            && self.final_report.is_none()
        {
            self.final_report = Some(report);
        }
        if let Some(error) = delta.error {
            self.error = Some(error);
        }
        if let Some(status) = delta.status {
            self.status = status;
        }
        if let Some(progress) = delta.progress {
            self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        }
        if self.status == ResearchStatus::Completed {
            self.progress = 100.0;
        } else if self.progress >= 100.0 {
            self.progress = 99.0;
        }
        self.updated_at = Utc::now();
        true
    }

    /// Clear a recorded failure and rewind to the first phase whose output
    /// is missing. Used by an explicit resume of an errored session.
    pub fn rewind_after_error(&mut self) {
        if self.status != ResearchStatus::Error {
            return;
        }
        self.error = None;
        self.status = if self.analysis.is_none() {
            ResearchStatus::Analyzing
        } else if self.plan.is_none() {
            ResearchStatus::Planning
        } else if self.next_section_index().is_some() {
            ResearchStatus::Executing
        } else {
            ResearchStatus::Generating
        };
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            question: self.question.clone(),
            status: self.status,
            progress: self.progress,
            completed_sections: self.completed_sections(),
            total_sections: self.total_sections(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Summary of a research session for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub question: String,
    pub status: ResearchStatus,
    pub progress: f64,
    pub completed_sections: usize,
    pub total_sections: usize,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
