//! CLI subcommand handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use deepresearch_core::research::checkpoint::CheckpointStore;
use deepresearch_core::research::files::{build_tree, find_file, project_files, write_files};
use deepresearch_core::{
    Brain, CapabilityRegistry, DeepResearchConfig, FileCheckpointStore, ResearchRun,
    ResearchStatus, ResearchWorkflow,
};
use deepresearch_mcp::McpServerProvider;
use deepresearch_tools::WebProvider;
use futures::StreamExt;
use tracing::{info, warn};

use crate::render;
use crate::{Commands, ConfigAction, GlobalOptions};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, options: &GlobalOptions) -> anyhow::Result<()> {
    match command {
        Commands::Start {
            question,
            session,
            user,
        } => {
            let config = load(options)?;
            let workflow = build_workflow(&config, options)?;
            let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let user_id = user.unwrap_or_else(default_user);
            let run = workflow
                .start_streaming(&question, &session_id, &user_id)
                .await?;
            drive(run, options.quiet).await
        }
        Commands::Resume { session } => {
            let config = load(options)?;
            let workflow = build_workflow(&config, options)?;
            let run = workflow.resume_streaming(&session).await?;
            drive(run, options.quiet).await
        }
        Commands::Status { session } => {
            let store = open_store(&load(options)?);
            let state = store
                .load(&session)
                .await?
                .with_context(|| format!("Session '{session}' not found"))?;
            print!("{}", render::session_status(&state));
            Ok(())
        }
        Commands::List => {
            let store = open_store(&load(options)?);
            let sessions = store.list().await?;
            if sessions.is_empty() {
                println!("No sessions in {}", store.dir().display());
            } else {
                for summary in &sessions {
                    println!("{}", render::session_row(summary));
                }
            }
            Ok(())
        }
        Commands::Files {
            session,
            path,
            write,
        } => handle_files(options, &session, path.as_deref(), write.as_deref()).await,
        Commands::Config { action } => handle_config(action, options),
    }
}

fn load(options: &GlobalOptions) -> anyhow::Result<DeepResearchConfig> {
    let mut config = deepresearch_core::config::load_config(Some(&options.workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = &options.model {
        config.llm.model = model.clone();
    }
    Ok(config)
}

fn open_store(config: &DeepResearchConfig) -> FileCheckpointStore {
    FileCheckpointStore::new(config.storage.sessions_dir())
}

fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "cli".to_string())
}

/// Capability registry for this invocation. `--offline` registers nothing,
/// which sends every section down the degraded path.
fn build_registry(config: &DeepResearchConfig, offline: bool) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new(config.tools.acquisition_timeout());
    if offline {
        info!("Offline mode: no capability providers registered");
        return registry;
    }
    registry.register(Arc::new(WebProvider::new(config.tools.search.clone())));
    for provider in McpServerProvider::from_config(&config.tools.mcp) {
        registry.register(provider);
    }
    registry
}

fn build_workflow(
    config: &DeepResearchConfig,
    options: &GlobalOptions,
) -> anyhow::Result<ResearchWorkflow> {
    let provider = deepresearch_core::providers::create_provider(&config.llm)
        .context("Failed to create LLM provider")?;
    let brain = Arc::new(Brain::new(provider, config.llm.brain_settings()));
    let registry = Arc::new(build_registry(config, options.offline));
    info!(
        model = %config.llm.model,
        providers = ?registry.provider_names(),
        "Workflow configured"
    );
    Ok(ResearchWorkflow::new(
        brain,
        registry,
        Arc::new(open_store(config)),
        config.research.clone(),
    ))
}

/// Print events until the run finishes. Ctrl-C cancels the run.
async fn drive(mut run: ResearchRun, quiet: bool) -> anyhow::Result<()> {
    let cancel = run.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling research run");
            cancel.cancel();
        }
    });

    let session_id = run.session_id().to_string();
    let mut report = None;
    while let Some(event) = run.next().await {
        if !quiet && let Some(line) = render::event_line(&event) {
            eprintln!("{line}");
        }
        if let deepresearch_core::ResearchEvent::Completed { final_report, .. } = &event {
            report = Some(final_report.clone());
        }
    }
    let cancelled = run.cancellation_token().is_cancelled();
    let result = run.join().await;
    ctrl_c.abort();
    let state = match result {
        Ok(state) => state,
        Err(e) if cancelled => {
            eprintln!("Run cancelled. Resume with: deepresearch resume {session_id}");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    match state.status {
        ResearchStatus::Completed => {
            if let Some(report) = report.or(state.final_report) {
                println!("{report}");
            }
            Ok(())
        }
        ResearchStatus::Error => anyhow::bail!(
            "{}\nResume with: deepresearch resume {session_id}",
            state.error.as_deref().unwrap_or("research failed")
        ),
        other => anyhow::bail!("Run stopped in status '{other}'"),
    }
}

async fn handle_files(
    options: &GlobalOptions,
    session: &str,
    path: Option<&str>,
    write: Option<&Path>,
) -> anyhow::Result<()> {
    let store = open_store(&load(options)?);
    let state = store
        .load(session)
        .await?
        .with_context(|| format!("Session '{session}' not found"))?;
    let files = project_files(&state);

    if let Some(path) = path {
        let file = find_file(&files, path)
            .with_context(|| format!("No file '{path}' in session '{session}'"))?;
        print!("{}", file.content);
        return Ok(());
    }

    if let Some(dir) = write {
        let written = write_files(dir, &files)
            .with_context(|| format!("Failed to write files to {}", dir.display()))?;
        for path in &written {
            println!("{}", path.display());
        }
        return Ok(());
    }

    if files.is_empty() {
        println!("Session '{session}' has no generated files yet.");
    } else {
        print!("{}", render::tree(&build_tree(&files)));
    }
    Ok(())
}

fn handle_config(action: ConfigAction, options: &GlobalOptions) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = options.workspace.join(".deepresearch");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&DeepResearchConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(options)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_registry_is_empty() {
        let registry = build_registry(&DeepResearchConfig::default(), true);
        assert!(registry.provider_names().is_empty());
    }

    #[test]
    fn test_online_registry_has_web_first() {
        let mut config = DeepResearchConfig::default();
        config.tools.mcp.enable_sequential_thinking = false;
        config.tools.mcp.enable_filesystem = false;
        let registry = build_registry(&config, false);
        assert_eq!(registry.provider_names(), vec!["web"]);
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let toml_str = toml::to_string_pretty(&DeepResearchConfig::default()).unwrap();
        assert!(toml_str.contains("[llm]"));
        assert!(toml_str.contains("[research]"));
    }
}
