//! # DeepResearch MCP
//!
//! Model Context Protocol client for DeepResearch.
//!
//! Configured MCP servers (sequential thinking, a sandboxed filesystem, or
//! custom commands) are spawned as child processes and spoken to over
//! JSON-RPC 2.0 with NDJSON framing. Their tools are exposed to the research
//! agent as auxiliary capabilities.
//!
//! ## Architecture
//!
//! ```text
//! CapabilityRegistry <-> McpServerProvider <-> McpClient <-> Transport (process/channel) <-> server
//!                               |
//!                               +-- McpToolCapability (one per remote tool)
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod transport;

pub use client::McpClient;
pub use error::McpError;
pub use provider::{McpServerProvider, McpToolCapability};
pub use transport::{ChannelTransport, ProcessTransport, Transport};
