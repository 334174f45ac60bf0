//! The web provider: the search-kind source of capabilities.

use async_trait::async_trait;
use deepresearch_core::capability::{Capability, CapabilityProvider, ProviderKind};
use deepresearch_core::config::SearchConfig;
use deepresearch_core::error::ToolError;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::web::{WebFetchCapability, WebSearchCapability};

/// Provides `web_search` and, when enabled, `web_fetch`.
pub struct WebProvider {
    config: SearchConfig,
    endpoint: Option<String>,
}

impl WebProvider {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            endpoint: None,
        }
    }

    /// Override the search endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn build_client(&self) -> Result<Client, ToolError> {
        Client::builder()
            .user_agent(concat!("DeepResearch/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ToolError::ProviderUnavailable {
                provider: self.name().to_string(),
                message: format!("Failed to create HTTP client: {e}"),
            })
    }
}

#[async_trait]
impl CapabilityProvider for WebProvider {
    fn name(&self) -> &str {
        "web"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Search
    }

    async fn acquire(&self) -> Result<Vec<Arc<dyn Capability>>, ToolError> {
        if !self.config.enabled {
            return Err(ToolError::ProviderUnavailable {
                provider: self.name().to_string(),
                message: "web search is disabled in configuration".into(),
            });
        }
        let client = self.build_client()?;
        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));

        let mut search =
            WebSearchCapability::new(client.clone(), self.config.max_results, timeout);
        if let Some(endpoint) = &self.endpoint {
            search = search.with_endpoint(endpoint.clone());
        }
        let mut capabilities: Vec<Arc<dyn Capability>> = vec![Arc::new(search)];
        if self.config.fetch_pages {
            capabilities.push(Arc::new(WebFetchCapability::new(
                client,
                self.config.fetch_max_chars,
                timeout,
            )));
        }
        info!(
            tools = capabilities.len(),
            max_results = self.config.max_results,
            "Web provider ready"
        );
        Ok(capabilities)
    }
}
