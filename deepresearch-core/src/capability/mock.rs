//! Scriptable capabilities and providers for tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Capability, CapabilityProvider, ProviderKind};
use crate::error::ToolError;

/// A capability that returns a fixed output.
pub struct MockCapability {
    name: String,
    output: String,
    delay: Option<Duration>,
    timeout: Duration,
    healthy: bool,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl MockCapability {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            output: output.to_string(),
            delay: None,
            timeout: Duration::from_secs(30),
            healthy: true,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fail the acquisition healthcheck.
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Fail every invocation with the given message.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for MockCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock capability"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } }
        })
    }

    async fn invoke(&self, _input: serde_json::Value) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(ToolError::ExecutionFailed {
                name: self.name.clone(),
                message: message.clone(),
            }),
            None => Ok(self.output.clone()),
        }
    }

    async fn healthcheck(&self) -> Result<(), ToolError> {
        if self.healthy {
            Ok(())
        } else {
            Err(ToolError::ExecutionFailed {
                name: self.name.clone(),
                message: "healthcheck failed".into(),
            })
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// A provider that hands out pre-built capabilities, optionally slowly or not at all.
pub struct MockProvider {
    name: String,
    kind: ProviderKind,
    capabilities: Vec<Arc<dyn Capability>>,
    delay: Option<Duration>,
    failure: Option<String>,
    acquisitions: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &str, kind: ProviderKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            capabilities: Vec::new(),
            delay: None,
            failure: None,
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// A search provider exposing a single `web_search` capability.
    pub fn search(output: &str) -> Self {
        Self::new("search", ProviderKind::Search)
            .with_capability(Arc::new(MockCapability::new("web_search", output)))
    }

    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn acquire(&self) -> Result<Vec<Arc<dyn Capability>>, ToolError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(ToolError::ProviderUnavailable {
                provider: self.name.clone(),
                message: message.clone(),
            }),
            None => Ok(self.capabilities.clone()),
        }
    }
}
