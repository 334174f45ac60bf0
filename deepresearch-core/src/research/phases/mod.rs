//! The four phase executors.

mod analyze;
mod plan;
mod report;
mod section;

pub use analyze::AnalyzeQuestionPhase;
pub use plan::GeneratePlanPhase;
pub use report::{GenerateReportPhase, assemble_report};
pub use section::ResearchSectionPhase;

use serde::de::DeserializeOwned;

use crate::error::PhaseError;

/// Parse the first JSON object in a model reply, tolerating code fences and
/// surrounding prose.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T, PhaseError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &reply[s..=e],
        _ => {
            return Err(PhaseError::MalformedOutput {
                message: "no JSON object in reply".to_string(),
            });
        }
    };
    serde_json::from_str(body).map_err(|e| PhaseError::MalformedOutput {
        message: e.to_string(),
    })
}
