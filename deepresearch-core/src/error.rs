//! Error types for the DeepResearch core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering LLM calls, capability invocation, configuration, checkpointing,
//! workflow control and individual research phases.

use std::path::PathBuf;

use crate::research::Phase;

/// Top-level error type for the DeepResearch core library.
#[derive(Debug, thiserror::Error)]
pub enum DeepResearchError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from capability acquisition and invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Tool '{name}' execution failed: {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("Tool '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },

    #[error("Provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Unsupported LLM provider: {provider}")]
    UnsupportedProvider { provider: String },
}

/// Errors from the checkpoint store.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint for session '{session_id}' is corrupt: {message}")]
    Corrupt { session_id: String, message: String },

    #[error("Invalid session id '{session_id}'")]
    InvalidSessionId { session_id: String },

    #[error("Session '{session_id}' is locked by another run")]
    Locked { session_id: String },
}

/// Errors from workflow control: validation, session ownership and cancellation.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid input: {field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("Session '{session_id}' is already running")]
    SessionBusy { session_id: String },

    #[error("Session '{session_id}' not found")]
    SessionNotFound { session_id: String },

    #[error("Session '{session_id}' already exists; resume it instead")]
    SessionExists { session_id: String },

    #[error("Session '{session_id}' was cancelled")]
    Cancelled { session_id: String },

    #[error("Workflow task failed: {message}")]
    Join { message: String },
}

/// A failure inside a single research phase.
///
/// These never escape the workflow as `Err`: the engine records them on the
/// state as `"<Phase> failed: <cause>"` and transitions to the error status.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("model returned malformed output: {message}")]
    MalformedOutput { message: String },

    #[error("model returned an empty research plan")]
    EmptyPlan,

    #[error("required input missing: {what}")]
    MissingInput { what: &'static str },

    #[error("agent produced no answer within {steps} steps")]
    ToolLoopExhausted { steps: usize },

    #[error("phase timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl PhaseError {
    /// Render the terminal error message recorded on the state.
    pub fn describe(&self, phase: Phase) -> String {
        format!("{phase} failed: {self}")
    }
}

/// A type alias for results using the top-level `DeepResearchError`.
pub type Result<T> = std::result::Result<T, DeepResearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = DeepResearchError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_workflow() {
        let err = DeepResearchError::Workflow(WorkflowError::SessionBusy {
            session_id: "s-1".into(),
        });
        assert_eq!(
            err.to_string(),
            "Workflow error: Session 's-1' is already running"
        );
    }

    #[test]
    fn test_phase_error_describe_combines_phase_and_cause() {
        let err = PhaseError::Llm(LlmError::Timeout { timeout_secs: 30 });
        assert_eq!(
            err.describe(Phase::ResearchSection),
            "ResearchSection failed: Request timed out after 30s"
        );
        assert_eq!(
            PhaseError::EmptyPlan.describe(Phase::GeneratePlan),
            "GeneratePlan failed: model returned an empty research plan"
        );
    }

    #[test]
    fn test_validation_message() {
        let err = WorkflowError::EmptyField { field: "question" };
        assert_eq!(err.to_string(), "Invalid input: question must not be empty");
    }

    #[test]
    fn test_error_from_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DeepResearchError = io_err.into();
        assert!(matches!(err, DeepResearchError::Io(_)));

        let tool_err = ToolError::NotFound {
            name: "web_search".into(),
        };
        let phase_err: PhaseError = tool_err.into();
        assert_eq!(phase_err.to_string(), "Tool not found: web_search");
    }
}
