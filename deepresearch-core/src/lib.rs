//! # DeepResearch Core
//!
//! Core library for the DeepResearch engine.
//! Provides the research workflow, LLM interface (brain), capability
//! registry, checkpointing, configuration, and fundamental types.

pub mod brain;
pub mod capability;
pub mod config;
pub mod error;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, BrainSettings, LlmProvider, MockLlmProvider};
pub use capability::{
    Capability, CapabilityProvider, CapabilityRegistry, CapabilityRequest, CapabilitySet,
    ProviderKind,
};
pub use config::{DeepResearchConfig, ResearchConfig, load_config};
pub use error::{DeepResearchError, Result};
pub use research::{
    FileCheckpointStore, InMemoryCheckpointStore, ResearchEvent, ResearchRun, ResearchState,
    ResearchStatus, ResearchWorkflow,
};
pub use types::{
    CompletionRequest, CompletionResponse, Content, Message, Role, TokenUsage, ToolDefinition,
};
