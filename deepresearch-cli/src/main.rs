//! DeepResearch CLI: run, resume and inspect research sessions.

mod commands;
mod render;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// DeepResearch: multi-phase research reports from a single question
#[derive(Parser, Debug)]
#[command(name = "deepresearch", version, about, long_about = None)]
struct Cli {
    /// LLM model to use
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Skip all capability providers and research sections from model knowledge
    #[arg(long, global = true)]
    offline: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a new research session
    Start {
        /// The research question
        question: String,
        /// Session identifier (generated if omitted)
        #[arg(short, long)]
        session: Option<String>,
        /// User the session belongs to
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Resume a checkpointed session
    Resume {
        /// Session identifier
        session: String,
    },
    /// Show the status of a session
    Status {
        /// Session identifier
        session: String,
    },
    /// List checkpointed sessions, most recent first
    List,
    /// Show the files generated by a session
    Files {
        /// Session identifier
        session: String,
        /// Print the content of one file instead of the tree
        #[arg(short, long)]
        path: Option<String>,
        /// Write all files under this directory
        #[arg(long)]
        write: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default workspace configuration file
    Init,
    /// Show the effective configuration
    Show,
}

/// Flags shared by every subcommand.
#[derive(Debug, Clone)]
pub(crate) struct GlobalOptions {
    pub workspace: PathBuf,
    pub model: Option<String>,
    pub offline: bool,
    pub quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = deepresearch_core::config::project_dirs()
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from(".deepresearch/logs"));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deepresearch.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = GlobalOptions {
        workspace,
        model: cli.model,
        offline: cli.offline,
        quiet: cli.quiet,
    };
    commands::handle_command(cli.command, &options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_start_with_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "deepresearch",
            "start",
            "How do heat pumps work?",
            "--session",
            "heat-pumps",
            "--offline",
            "-vv",
        ])
        .unwrap();
        assert!(cli.offline);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Start {
                question,
                session,
                user,
            } => {
                assert_eq!(question, "How do heat pumps work?");
                assert_eq!(session.as_deref(), Some("heat-pumps"));
                assert!(user.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_files_write() {
        let cli = Cli::try_parse_from(["deepresearch", "files", "s1", "--write", "out"]).unwrap();
        match cli.command {
            Commands::Files { session, path, write } => {
                assert_eq!(session, "s1");
                assert!(path.is_none());
                assert_eq!(write, Some(PathBuf::from("out")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_start_requires_question() {
        assert!(Cli::try_parse_from(["deepresearch", "start"]).is_err());
    }
}
