//! MCP client: connects to an external MCP server over a [`Transport`],
//! performs the initialization handshake, discovers tools and calls them.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool, RequestId,
    ServerInfo, ServerMessage,
};
use crate::transport::Transport;

/// A connection to one MCP server.
pub struct McpClient {
    transport: Box<dyn Transport>,
    server_info: Option<ServerInfo>,
    next_id: i64,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_info", &self.server_info)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl McpClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            server_info: None,
            next_id: 1,
        }
    }

    /// Wrap `transport` and run the handshake.
    pub async fn connect(transport: Box<dyn Transport>) -> Result<Self, McpError> {
        let mut client = Self::new(transport);
        client.initialize().await?;
        Ok(client)
    }

    pub fn is_initialized(&self) -> bool {
        self.server_info.is_some()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Send `initialize`, then the `notifications/initialized` notification.
    pub async fn initialize(&mut self) -> Result<ServerInfo, McpError> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let result = self.request("initialize", Some(params)).await?;
        let result: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol {
                message: format!("invalid initialize result: {e}"),
            })?;

        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "MCP client initialized"
        );

        self.notify("notifications/initialized").await?;
        self.server_info = Some(result.server_info.clone());
        Ok(result.server_info)
    }

    /// List every tool the server offers, following pagination cursors.
    pub async fn list_tools(&mut self) -> Result<Vec<McpTool>, McpError> {
        self.ensure_initialized()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let result = self.request("tools/list", Some(params)).await?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::Protocol {
                    message: format!("invalid tools/list result: {e}"),
                })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if cursor.as_ref() != Some(&next) => cursor = Some(next),
                _ => break,
            }
        }
        debug!(count = tools.len(), "Discovered tools from MCP server");
        Ok(tools)
    }

    /// Call `name` with `arguments`. A result flagged `isError` becomes
    /// [`McpError::ToolError`].
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        self.ensure_initialized()?;
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        })?;
        let result = self.request("tools/call", Some(params)).await?;
        let result: CallToolResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol {
                message: format!("invalid tools/call result: {e}"),
            })?;
        if result.is_error() {
            return Err(McpError::ToolError {
                name: name.to_string(),
                message: result.text(),
            });
        }
        Ok(result)
    }

    pub async fn close(&mut self) -> Result<(), McpError> {
        self.server_info = None;
        self.transport.close().await
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }

    async fn notify(&mut self, method: &str) -> Result<(), McpError> {
        let message = serde_json::to_string(&JsonRpcNotification::new(method))?;
        self.transport.write_message(&message).await
    }

    /// Send a request and wait for the response with the matching id.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;
        let message = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;
        debug!(method, "Sending MCP request");
        self.transport.write_message(&message).await?;

        loop {
            let raw = self
                .transport
                .read_message()
                .await?
                .ok_or_else(|| McpError::TransportError {
                    message: format!("Transport closed while waiting for {method} response"),
                })?;
            let incoming: ServerMessage =
                serde_json::from_str(&raw).map_err(|e| McpError::ParseError {
                    message: format!("Invalid JSON-RPC message: {e}"),
                })?;

            if !incoming.is_response() {
                self.reject_server_request(incoming).await?;
                continue;
            }
            if incoming.id.as_ref() != Some(&id) {
                warn!(expected = ?id, got = ?incoming.id, "Ignoring stale MCP response");
                continue;
            }
            if let Some(error) = incoming.error {
                warn!(code = error.code, message = %error.message, "MCP server returned error");
                return Err(McpError::ServerError {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(incoming.result.unwrap_or(Value::Null));
        }
    }

    /// Notifications are dropped; server-initiated requests get method-not-found.
    async fn reject_server_request(&mut self, incoming: ServerMessage) -> Result<(), McpError> {
        let method = incoming.method.unwrap_or_default();
        let Some(id) = incoming.id else {
            debug!(%method, "Ignoring MCP notification");
            return Ok(());
        };
        debug!(%method, "Rejecting server-initiated MCP request");
        let response = JsonRpcResponse::error(
            id,
            JsonRpcError {
                code: -32601,
                message: format!("Method not found: {method}"),
                data: None,
            },
        );
        self.transport
            .write_message(&serde_json::to_string(&response)?)
            .await
    }
}
