//! Web capabilities: search and page fetch.
//!
//! - `web_search`: DuckDuckGo instant answers. No API key, queries go directly
//!   to DuckDuckGo.
//! - `web_fetch`: fetch a URL and return its readable text.

use async_trait::async_trait;
use deepresearch_core::capability::Capability;
use deepresearch_core::error::ToolError;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::html;

const DUCKDUCKGO_ENDPOINT: &str = "https://api.duckduckgo.com/";

// ---------------------------------------------------------------------------
// WebSearchCapability
// ---------------------------------------------------------------------------

/// Search the web through the DuckDuckGo instant answer API.
pub struct WebSearchCapability {
    client: Client,
    endpoint: String,
    max_results: usize,
    timeout: Duration,
}

impl WebSearchCapability {
    pub fn new(client: Client, max_results: usize, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: DUCKDUCKGO_ENDPOINT.to_string(),
            max_results: max_results.clamp(1, 10),
            timeout,
        }
    }

    /// Point the capability at a different instant-answer compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Capability for WebSearchCapability {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information on a topic. Returns titles, snippets and URLs. \
         Use focused queries; call several times to cover different aspects."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (max: 10)",
                    "default": self.max_results
                }
            },
            "required": ["query"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout + Duration::from_secs(5)
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<String, ToolError> {
        let query = input
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments {
                name: "web_search".into(),
                reason: "Missing required parameter: query".into(),
            })?;
        let max_results = input
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map_or(self.max_results, |n| n as usize)
            .clamp(1, 10);

        debug!(query, max_results, "Web search");
        let url = format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            self.endpoint,
            urlencoding::encode(query)
        );
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "web_search".into(),
                message: format!("Search request failed: {e}"),
            })?;

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    name: "web_search".into(),
                    message: format!("Failed to parse search response: {e}"),
                })?;

        Ok(format_results(query, &body, max_results))
    }
}

/// Render an instant-answer response as plain text for the model.
pub fn format_results(query: &str, body: &serde_json::Value, max_results: usize) -> String {
    let mut results = Vec::new();

    if let Some(abstract_text) = body
        .get("AbstractText")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
    {
        let source = body
            .get("AbstractSource")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown");
        let url = body
            .get("AbstractURL")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        results.push(format!("[{source}] {abstract_text}\n  URL: {url}"));
    }

    for key in ["Results", "RelatedTopics"] {
        let Some(items) = body.get(key).and_then(|v| v.as_array()) else {
            continue;
        };
        for item in items {
            if results.len() >= max_results {
                break;
            }
            // Grouped topics nest their entries one level down.
            let entries = match item.get("Topics").and_then(|v| v.as_array()) {
                Some(nested) => nested.iter().collect::<Vec<_>>(),
                None => vec![item],
            };
            for entry in entries {
                if results.len() >= max_results {
                    break;
                }
                if let Some(text) = entry.get("Text").and_then(|v| v.as_str()) {
                    let url = entry.get("FirstURL").and_then(|v| v.as_str()).unwrap_or("");
                    results.push(format!("- {text}\n  URL: {url}"));
                }
            }
        }
    }

    if results.is_empty() {
        format!(
            "No instant answers found for \"{query}\". Try a shorter or more specific query."
        )
    } else {
        format!(
            "Search results for \"{query}\":\n\n{}",
            results.join("\n\n")
        )
    }
}

// ---------------------------------------------------------------------------
// WebFetchCapability
// ---------------------------------------------------------------------------

/// Fetch a page and return its text content.
pub struct WebFetchCapability {
    client: Client,
    max_chars: usize,
    timeout: Duration,
}

impl WebFetchCapability {
    pub fn new(client: Client, max_chars: usize, timeout: Duration) -> Self {
        Self {
            client,
            max_chars,
            timeout,
        }
    }
}

#[async_trait]
impl Capability for WebFetchCapability {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page URL and extract its text content. Use this to read a source \
         found through web_search in more detail."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                }
            },
            "required": ["url"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout + Duration::from_secs(5)
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<String, ToolError> {
        let url = input.get("url").and_then(|v| v.as_str()).ok_or_else(|| {
            ToolError::InvalidArguments {
                name: "web_fetch".into(),
                reason: "Missing required parameter: url".into(),
            }
        })?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments {
                name: "web_fetch".into(),
                reason: "URL must start with http:// or https://".into(),
            });
        }

        debug!(url, "Fetching page");
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "web_fetch".into(),
                message: format!("Fetch failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Ok(format!("HTTP {status} for URL: {url}"));
        }
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html") || ct.contains("application/xhtml"));
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "web_fetch".into(),
                message: format!("Failed to read response body: {e}"),
            })?;

        let text = if is_html {
            html::extract_text(&body)
        } else {
            body
        };
        Ok(format!(
            "Content from {url}:\n\n{}",
            html::truncate_chars(&text, self.max_chars)
        ))
    }
}
