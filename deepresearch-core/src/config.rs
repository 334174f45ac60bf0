//! Configuration system for DeepResearch.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/deepresearch/config.toml` and/or
//! `.deepresearch/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::brain::BrainSettings;

/// Top-level configuration for a DeepResearch installation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepResearchConfig {
    pub llm: LlmConfig,
    pub research: ResearchConfig,
    pub tools: ToolsConfig,
    pub storage: StorageConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name. Only OpenAI-compatible endpoints are built in.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o", "llama3.1").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Explicit API key; never written back to disk.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Deadline for a single completion call, in seconds.
    pub timeout_secs: u64,
    /// Retry policy for transient provider errors.
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
            timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Request defaults handed to [`crate::Brain`].
    pub fn brain_settings(&self) -> BrainSettings {
        BrainSettings {
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Exponential backoff settings for LLM calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Workflow behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Step ceiling for the tool-augmented section agent.
    pub max_agent_steps: usize,
    /// Deadline for any single phase, in seconds.
    pub phase_timeout_secs: u64,
    /// Upper bound on the number of plan sections kept.
    pub max_sections: usize,
    /// Ask the model for an executive summary when assembling the report.
    pub report_summary: bool,
    pub progress: ProgressModel,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_agent_steps: 20,
            phase_timeout_secs: 600,
            max_sections: 8,
            report_summary: true,
            progress: ProgressModel::default(),
        }
    }
}

impl ResearchConfig {
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }
}

/// Progress values reported when each phase completes.
///
/// Sections interpolate linearly between `planned` and `sections_done`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressModel {
    pub analyzed: f64,
    pub planned: f64,
    pub sections_done: f64,
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self {
            analyzed: 20.0,
            planned: 40.0,
            sections_done: 80.0,
        }
    }
}

impl ProgressModel {
    /// Progress after `completed` of `total` sections are researched.
    pub fn for_sections(&self, completed: usize, total: usize) -> f64 {
        if total == 0 {
            return self.sections_done;
        }
        let span = self.sections_done - self.planned;
        self.planned + span * (completed.min(total) as f64 / total as f64)
    }
}

/// Capability acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Deadline for acquiring all capability providers, in seconds.
    pub acquisition_timeout_secs: u64,
    pub search: SearchConfig,
    pub mcp: McpConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            acquisition_timeout_secs: 15,
            search: SearchConfig::default(),
            mcp: McpConfig::default(),
        }
    }
}

impl ToolsConfig {
    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_secs(self.acquisition_timeout_secs)
    }
}

/// Web search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub max_results: usize,
    /// Per-request deadline, in seconds.
    pub timeout_secs: u64,
    /// Also offer `web_fetch` for reading result pages.
    pub fetch_pages: bool,
    /// Characters of page text returned by `web_fetch`.
    pub fetch_max_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: 5,
            timeout_secs: 10,
            fetch_pages: true,
            fetch_max_chars: 5000,
        }
    }
}

/// Auxiliary MCP servers launched for each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enable_sequential_thinking: bool,
    pub enable_filesystem: bool,
    /// Directories exposed to the filesystem server. Empty means the current directory.
    pub allowed_directories: Vec<PathBuf>,
    /// Additional servers keyed by name.
    pub servers: BTreeMap<String, McpServerConfig>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enable_sequential_thinking: true,
            enable_filesystem: false,
            allowed_directories: Vec::new(),
            servers: BTreeMap::new(),
        }
    }
}

/// How to launch one stdio MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl McpConfig {
    /// All servers to launch, built-ins first, then custom servers by name.
    pub fn effective_servers(&self) -> Vec<(String, McpServerConfig)> {
        let mut servers = Vec::new();
        if self.enable_sequential_thinking {
            servers.push((
                "sequential-thinking".to_string(),
                McpServerConfig {
                    command: "npx".to_string(),
                    args: vec![
                        "-y".to_string(),
                        "@modelcontextprotocol/server-sequential-thinking".to_string(),
                    ],
                    env: BTreeMap::new(),
                },
            ));
        }
        if self.enable_filesystem {
            let mut args = vec![
                "-y".to_string(),
                "@modelcontextprotocol/server-filesystem".to_string(),
            ];
            if self.allowed_directories.is_empty() {
                args.push(".".to_string());
            } else {
                args.extend(
                    self.allowed_directories
                        .iter()
                        .map(|d| d.display().to_string()),
                );
            }
            servers.push((
                "filesystem".to_string(),
                McpServerConfig {
                    command: "npx".to_string(),
                    args,
                    env: BTreeMap::new(),
                },
            ));
        }
        servers.extend(
            self.servers
                .iter()
                .map(|(name, cfg)| (name.clone(), cfg.clone())),
        );
        servers
    }
}

/// Where checkpoints and logs live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Override for the data directory. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the data directory, falling back to `./.deepresearch` when the
    /// platform offers no data dir.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".deepresearch"))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.resolve_data_dir().join("sessions")
    }
}

pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "deepresearch", "deepresearch")
}

/// Load configuration with layered sources.
///
/// Order (later wins): defaults, user config, workspace config,
/// `DEEPRESEARCH_*` environment variables, explicit overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DeepResearchConfig>,
) -> Result<DeepResearchConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DeepResearchConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".deepresearch").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DEEPRESEARCH_LLM__MODEL, DEEPRESEARCH_RESEARCH__MAX_AGENT_STEPS, ...
    figment = figment.merge(Env::prefixed("DEEPRESEARCH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeepResearchConfig::default();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.research.max_agent_steps, 20);
        assert_eq!(config.tools.acquisition_timeout_secs, 15);
        assert_eq!(config.tools.search.max_results, 5);
        assert!(config.tools.mcp.enable_sequential_thinking);
    }

    #[test]
    fn test_progress_model_interpolates_sections() {
        let model = ProgressModel::default();
        assert_eq!(model.for_sections(0, 2), 40.0);
        assert_eq!(model.for_sections(1, 2), 60.0);
        assert_eq!(model.for_sections(2, 2), 80.0);
        assert_eq!(model.for_sections(5, 2), 80.0);
        assert_eq!(model.for_sections(0, 0), 80.0);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = DeepResearchConfig::default();
        config.llm.api_key = Some("secret".into());
        let toml_str = toml::to_string(&config).unwrap();
        assert!(!toml_str.contains("secret"));
        let deserialized: DeepResearchConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.llm.model, config.llm.model);
        assert_eq!(deserialized.research.max_sections, 8);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = DeepResearchConfig::default();
        overrides.llm.model = "llama3.1".to_string();
        overrides.research.max_agent_steps = 5;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "llama3.1");
        assert_eq!(config.research.max_agent_steps, 5);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".deepresearch");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            r#"
[llm]
model = "qwen2.5"
base_url = "http://localhost:11434/v1"

[research]
max_sections = 3

[tools.mcp]
enable_sequential_thinking = false

[tools.mcp.servers.notes]
command = "notes-mcp"
args = ["--stdio"]
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.research.max_sections, 3);
        assert_eq!(config.research.max_agent_steps, 20);
        let servers = config.tools.mcp.effective_servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].0, "notes");
        assert_eq!(servers[0].1.args, vec!["--stdio".to_string()]);
    }

    #[test]
    fn test_effective_servers_filesystem_uses_allowed_dirs() {
        let config = McpConfig {
            enable_sequential_thinking: true,
            enable_filesystem: true,
            allowed_directories: vec![PathBuf::from("/data/papers")],
            servers: BTreeMap::new(),
        };
        let servers = config.effective_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].0, "sequential-thinking");
        assert_eq!(servers[1].0, "filesystem");
        assert_eq!(servers[1].1.args.last().unwrap(), "/data/papers");
    }

    #[test]
    fn test_storage_data_dir_override() {
        let storage = StorageConfig {
            data_dir: Some(PathBuf::from("/tmp/dr")),
        };
        assert_eq!(storage.sessions_dir(), PathBuf::from("/tmp/dr/sessions"));
    }
}
