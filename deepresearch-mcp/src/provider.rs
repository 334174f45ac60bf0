//! MCP servers as auxiliary capability providers.
//!
//! Each configured server becomes one [`McpServerProvider`]. Acquiring it
//! spawns the server (once), runs the handshake and wraps every advertised
//! tool in an [`McpToolCapability`] sharing the connection.

use std::sync::Arc;

use async_trait::async_trait;
use deepresearch_core::capability::{Capability, CapabilityProvider, ProviderKind};
use deepresearch_core::config::{McpConfig, McpServerConfig};
use deepresearch_core::error::ToolError;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::McpClient;
use crate::error::McpError;
use crate::protocol::McpTool;
use crate::transport::{ProcessTransport, Transport};

type SharedClient = Arc<Mutex<McpClient>>;

enum Launch {
    Command(McpServerConfig),
    /// A pre-built transport, consumed by the first acquisition.
    Transport(Option<Box<dyn Transport>>),
}

struct Connection {
    client: SharedClient,
    tools: Vec<McpTool>,
}

/// An auxiliary provider backed by one MCP server.
pub struct McpServerProvider {
    name: String,
    state: Mutex<(Launch, Option<Connection>)>,
}

impl McpServerProvider {
    /// A provider that spawns `config.command` on first acquisition.
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new((Launch::Command(config), None)),
        }
    }

    /// A provider over an already connected transport.
    pub fn with_transport(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new((Launch::Transport(Some(transport)), None)),
        }
    }

    /// One provider per effective server in `config`.
    pub fn from_config(config: &McpConfig) -> Vec<Arc<dyn CapabilityProvider>> {
        config
            .effective_servers()
            .into_iter()
            .map(|(name, server)| {
                Arc::new(McpServerProvider::new(name, server)) as Arc<dyn CapabilityProvider>
            })
            .collect()
    }

    fn unavailable(&self, error: impl std::fmt::Display) -> ToolError {
        ToolError::ProviderUnavailable {
            provider: self.name.clone(),
            message: error.to_string(),
        }
    }

    async fn connect(&self, launch: &mut Launch) -> Result<Connection, McpError> {
        let transport: Box<dyn Transport> = match launch {
            Launch::Command(config) => {
                debug!(server = %self.name, command = %config.command, "Spawning MCP server");
                Box::new(ProcessTransport::spawn(
                    &config.command,
                    &config.args,
                    &config.env,
                )?)
            }
            Launch::Transport(slot) => slot.take().ok_or_else(|| McpError::TransportError {
                message: "transport already consumed".into(),
            })?,
        };
        let mut client = McpClient::connect(transport).await?;
        let tools = client.list_tools().await?;
        Ok(Connection {
            client: Arc::new(Mutex::new(client)),
            tools,
        })
    }
}

#[async_trait]
impl CapabilityProvider for McpServerProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Auxiliary
    }

    async fn acquire(&self) -> Result<Vec<Arc<dyn Capability>>, ToolError> {
        let mut guard = self.state.lock().await;
        let (launch, connection) = &mut *guard;
        if connection.is_none() {
            let connected = self.connect(launch).await.map_err(|e| self.unavailable(e))?;
            info!(
                server = %self.name,
                tools = connected.tools.len(),
                "MCP server connected"
            );
            *connection = Some(connected);
        }
        let Some(connection) = connection.as_ref() else {
            return Err(self.unavailable("not connected"));
        };

        Ok(connection
            .tools
            .iter()
            .map(|tool| {
                Arc::new(McpToolCapability::new(
                    &self.name,
                    tool.clone(),
                    Arc::clone(&connection.client),
                )) as Arc<dyn Capability>
            })
            .collect())
    }
}

/// One remote tool exposed as a capability.
pub struct McpToolCapability {
    server: String,
    tool: McpTool,
    description: String,
    client: SharedClient,
}

impl McpToolCapability {
    fn new(server: &str, tool: McpTool, client: SharedClient) -> Self {
        let description = tool
            .description
            .clone()
            .unwrap_or_else(|| format!("Tool '{}' provided by the {server} MCP server", tool.name));
        Self {
            server: server.to_string(),
            tool,
            description,
            client,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl Capability for McpToolCapability {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.tool.input_schema.clone()
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<String, ToolError> {
        debug!(server = %self.server, tool = %self.tool.name, "Calling MCP tool");
        let mut client = self.client.lock().await;
        let result = client
            .call_tool(&self.tool.name, input)
            .await
            .map_err(|e| e.into_tool_error(&self.tool.name))?;
        Ok(result.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_unknown_command_is_unavailable() {
        let provider = McpServerProvider::new(
            "ghost",
            McpServerConfig {
                command: "nonexistent_mcp_server_binary".into(),
                args: vec![],
                env: BTreeMap::new(),
            },
        );
        assert_eq!(provider.kind(), ProviderKind::Auxiliary);
        let err = provider.acquire().await.err().unwrap();
        match err {
            ToolError::ProviderUnavailable { provider, message } => {
                assert_eq!(provider, "ghost");
                assert!(message.contains("Failed to spawn"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_config_follows_effective_servers() {
        let config = McpConfig {
            enable_sequential_thinking: true,
            enable_filesystem: false,
            ..Default::default()
        };
        let providers = McpServerProvider::from_config(&config);
        let names: Vec<_> = providers.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["sequential-thinking"]);
    }
}
