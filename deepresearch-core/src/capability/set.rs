use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Capability;
use crate::error::ToolError;
use crate::types::ToolDefinition;

/// A provider (or one of its capabilities) that could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

/// The ordered set of capabilities available to one run.
///
/// Capabilities are looked up by name and invoked under their own timeout.
/// A resolved set is `degraded` when a provider or capability failed to come
/// up (the set may still be non-empty) or when nothing was acquired at all.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    tools: Vec<Arc<dyn Capability>>,
    index: HashMap<String, usize>,
    degraded: bool,
    failures: Vec<ProviderFailure>,
}

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        tools: Vec<Arc<dyn Capability>>,
        failures: Vec<ProviderFailure>,
    ) -> Self {
        let mut set = Self {
            degraded: !failures.is_empty() || tools.is_empty(),
            failures,
            ..Default::default()
        };
        for tool in tools {
            set.insert(tool);
        }
        set
    }

    /// Add a capability. Returns `false` if the name is already taken.
    pub fn insert(&mut self, tool: Arc<dyn Capability>) -> bool {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            debug!(tool = %name, "Skipping duplicate capability");
            return false;
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        true
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn failures(&self) -> &[ProviderFailure] {
        &self.failures
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    /// Tool definitions for the model, in acquisition order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Invoke a capability by name, applying its timeout.
    pub async fn invoke(&self, name: &str, input: serde_json::Value) -> Result<String, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        let timeout = tool.timeout();
        debug!(tool = %name, timeout_secs = timeout.as_secs(), "Invoking capability");
        match tokio::time::timeout(timeout, tool.invoke(input)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                name: name.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

impl std::fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySet")
            .field("tools", &self.names())
            .field("degraded", &self.degraded)
            .field("failures", &self.failures)
            .finish()
    }
}
