//! MCP client error types.

use deepresearch_core::error::ToolError;

/// Errors that can occur while talking to an MCP server.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("JSON-RPC parse error: {message}")]
    ParseError { message: String },

    #[error("Server error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("Unexpected response: {message}")]
    Protocol { message: String },

    #[error("Tool '{name}' reported an error: {message}")]
    ToolError { name: String, message: String },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    #[error("Server not initialized")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Map onto the capability error surfaced to the research agent.
    pub fn into_tool_error(self, tool: &str) -> ToolError {
        match self {
            McpError::ToolError { name, message } => ToolError::ExecutionFailed { name, message },
            McpError::ServerError { code: -32602, message } => ToolError::InvalidArguments {
                name: tool.to_string(),
                reason: message,
            },
            other => ToolError::ExecutionFailed {
                name: tool.to_string(),
                message: other.to_string(),
            },
        }
    }
}
