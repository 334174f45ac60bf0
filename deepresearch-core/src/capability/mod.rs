//! Capabilities: the callable tools handed to the section research agent.
//!
//! A [`CapabilityProvider`] produces one or more [`Capability`] values (a
//! search backend, an MCP server's tools, ...). The [`CapabilityRegistry`]
//! acquires all providers in parallel under a deadline and returns whatever
//! succeeded as a [`CapabilitySet`].

pub mod mock;
mod registry;
mod set;

pub use registry::{CapabilityRegistry, CapabilityRequest};
pub use set::{CapabilitySet, ProviderFailure};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ToolError;
use crate::types::ToolDefinition;

/// A single callable tool: JSON input in, text out.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique name advertised to the model.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the input object.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn invoke(&self, input: serde_json::Value) -> Result<String, ToolError>;

    /// Cheap liveness probe run during acquisition.
    async fn healthcheck(&self) -> Result<(), ToolError> {
        Ok(())
    }

    /// Maximum duration of a single invocation.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Whether a provider backs the mandatory search capability or an optional aid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Search,
    Auxiliary,
}

/// A named source of capabilities.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Bring the provider up and return its capabilities.
    async fn acquire(&self) -> Result<Vec<Arc<dyn Capability>>, ToolError>;
}
