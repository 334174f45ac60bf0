//! Brain module: LLM provider abstraction and interaction.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions, the
//! [`Brain`] wrapper that applies request defaults and deadlines, and a
//! scriptable [`MockLlmProvider`] used throughout the test suite.

use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, Content, Message, Role, TokenUsage, ToolDefinition,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Return whether this provider supports tool/function calling.
    fn supports_tools(&self) -> bool {
        true
    }
}

/// Request defaults applied by [`Brain`] to every call.
#[derive(Debug, Clone)]
pub struct BrainSettings {
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub timeout: Duration,
}

impl Default for BrainSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: Some(4096),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Thin façade over an [`LlmProvider`] that enforces a per-call deadline and
/// accumulates token usage across the calls of a run.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    settings: BrainSettings,
    total_usage: Mutex<TokenUsage>,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: BrainSettings) -> Self {
        Self {
            provider,
            settings,
            total_usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Send a conversation to the model, optionally advertising tools.
    pub async fn think(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<CompletionResponse, LlmError> {
        let tools = tools.filter(|t| !t.is_empty() && self.provider.supports_tools());
        let request = CompletionRequest {
            messages,
            tools,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            model: None,
        };
        debug!(
            model = self.provider.model_name(),
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Sending completion request"
        );

        let timeout_secs = self.settings.timeout.as_secs();
        let response = tokio::time::timeout(self.settings.timeout, self.provider.complete(request))
            .await
            .map_err(|_| LlmError::Timeout { timeout_secs })??;

        if let Ok(mut usage) = self.total_usage.lock() {
            usage.accumulate(&response.usage);
        }
        Ok(response)
    }

    /// Single-turn convenience call returning the assistant text.
    pub async fn ask(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let response = self
            .think(vec![Message::system(system), Message::user(prompt)], None)
            .await?;
        Ok(response.message.content.joined_text())
    }

    /// Token usage accumulated across all calls made through this brain.
    pub fn total_usage(&self) -> TokenUsage {
        self.total_usage.lock().map(|u| *u).unwrap_or_default()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}

/// A scripted LLM provider for tests.
///
/// Responses (or errors) are returned in the order they were queued. When the
/// queue is empty a fixed text answer is returned.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        for _ in 0..20 {
            provider.queue_response(Self::text_response(text));
        }
        provider
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push(Ok(response));
    }

    /// Queue a plain text answer.
    pub fn queue_text(&self, text: &str) {
        self.queue_response(Self::text_response(text));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push(Err(error));
    }

    /// Number of `complete` calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Snapshot of every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Create a tool call response for testing.
    pub fn tool_call_response(tool_name: &str, arguments: serde_json::Value) -> CompletionResponse {
        let call_id = format!("call_{}", uuid::Uuid::new_v4());
        CompletionResponse {
            message: Message::new(
                Role::Assistant,
                Content::tool_call(&call_id, tool_name, arguments),
            ),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 30,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("tool_calls".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            ))
        } else {
            responses.remove(0)
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
