//! CLI command definitions and handlers.

use crate::cancellation::CancellationToken;
use crate::collaborators::AnythingLlmClient;
use crate::config::{ChatMode, ModelOverrides, WorkflowConfig};
use crate::core::Language;
use crate::events::LoggingEventSink;
use crate::orchestrator::{default_plan, WorkflowOrchestrator};
use crate::ports::PortRange;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Exit code for configuration and startup errors.
const EXIT_STARTUP: u8 = 2;

/// Generates, serves, tests and publishes a web service in one run.
#[derive(Parser, Debug)]
#[command(name = "forgeflow")]
#[command(about = "Generate, test and publish a small web service")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run every stage for a language target.
    Run(Box<RunArgs>),

    /// Print the stage plan for a language target.
    Plan(PlanArgs),
}

/// Arguments for `forgeflow run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Target language.
    #[arg(long, value_enum)]
    pub language: Language,

    /// Generation service base URL.
    #[arg(long, default_value = "http://localhost:3001", env = "ANYTHINGLLM_API_BASE")]
    pub api_base: String,

    /// Generation workspace slug.
    #[arg(long, default_value = "development")]
    pub workspace: String,

    /// Chat mode.
    #[arg(long, value_enum, default_value = "chat")]
    pub mode: ChatMode,

    /// Model for service code.
    #[arg(long)]
    pub code_model: Option<String>,

    /// Model for tests and the README.
    #[arg(long)]
    pub doc_model: Option<String>,

    /// Default model in chat mode.
    #[arg(long)]
    pub chat_model: Option<String>,

    /// Default model in agent mode.
    #[arg(long)]
    pub agent_model: Option<String>,

    /// Remote to push the generated artifacts to.
    #[arg(long)]
    pub remote_url: Option<String>,

    /// Preferred service port.
    #[arg(long)]
    pub http_port: Option<u16>,

    /// GitHub repository to fork and clone, as owner/repo.
    #[arg(long)]
    pub fork_repo: Option<String>,

    /// Working directory for the generated artifacts.
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Port scan range, as LO-HI.
    #[arg(long, default_value = "8081-8180")]
    pub port_range: PortRange,
}

impl RunArgs {
    /// Builds the run configuration, reading secrets from the environment.
    #[must_use]
    pub fn to_config(&self) -> WorkflowConfig {
        let mut config = WorkflowConfig::new(self.language, &self.workdir)
            .with_env_secrets()
            .with_api(&self.api_base, &self.workspace)
            .with_mode(self.mode)
            .with_models(ModelOverrides {
                code: self.code_model.clone(),
                doc: self.doc_model.clone(),
                chat: self.chat_model.clone(),
                agent: self.agent_model.clone(),
            })
            .with_port_range(self.port_range);
        if let Some(port) = self.http_port {
            config = config.with_http_port(port);
        }
        if let Some(url) = &self.remote_url {
            config = config.with_remote_url(url);
        }
        if let Some(repo) = &self.fork_repo {
            config = config.with_fork_repo(repo);
        }
        config
    }
}

/// Arguments for `forgeflow plan`.
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Target language.
    #[arg(long, value_enum)]
    pub language: Language,
}

/// Parses the command line.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed command and returns the process exit code.
///
/// `cancellation` is triggered by the caller on interrupt.
pub async fn run_with_cli(cli: Cli, cancellation: Arc<CancellationToken>) -> ExitCode {
    match cli.command {
        Commands::Run(args) => run_command(&args, cancellation).await,
        Commands::Plan(args) => {
            print!("{}", render_plan(&WorkflowConfig::new(args.language, ".")));
            ExitCode::SUCCESS
        }
    }
}

async fn run_command(args: &RunArgs, cancellation: Arc<CancellationToken>) -> ExitCode {
    let orchestrator = match prepare_run(args, cancellation).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Cannot start run");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let report = orchestrator.run().await;
    info!(run_id = %report.run_id, outcome = %report.outcome(), "Done");
    print!("{}", report.render_log());
    ExitCode::from(report.exit_code())
}

/// Everything that can fail before the first stage runs.
async fn prepare_run(
    args: &RunArgs,
    cancellation: Arc<CancellationToken>,
) -> anyhow::Result<WorkflowOrchestrator> {
    let config = args.to_config();
    config.validate().context("invalid configuration")?;

    let generator = AnythingLlmClient::connect(&config)
        .await
        .with_context(|| format!("generation service at {} is unavailable", config.api_base))?;

    let orchestrator = WorkflowOrchestrator::builder(config)
        .with_generator(Arc::new(generator))
        .with_events(Arc::new(LoggingEventSink::debug()))
        .with_cancellation(cancellation)
        .build()?;
    Ok(orchestrator)
}

fn render_plan(config: &WorkflowConfig) -> String {
    default_plan(config.language, &config.timeouts)
        .iter()
        .map(|spec| {
            format!(
                "{:<9} {:<11} {}s\n",
                spec.stage.as_str(),
                spec.policy.to_string(),
                spec.timeout.as_secs()
            )
        })
        .collect()
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
    fn test_run_args_build_config() {
        let cli = Cli::try_parse_from([
            "forgeflow",
            "run",
            "--language",
            "python",
            "--mode",
            "agent",
            "--code-model",
            "coder",
            "--http-port",
            "8090",
            "--fork-repo",
            "octo/site",
            "--port-range",
            "9000-9010",
            "--workdir",
            "/tmp/site",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let config = args.to_config();

        assert_eq!(config.language, Language::Python);
        assert_eq!(config.mode, ChatMode::Agent);
        assert_eq!(config.models.code.as_deref(), Some("coder"));
        assert_eq!(config.http_port, Some(8090));
        assert_eq!(config.fork_repo.as_deref(), Some("octo/site"));
        assert_eq!(config.port_range, PortRange::new(9000, 9010).unwrap());
        assert_eq!(config.working_dir, PathBuf::from("/tmp/site"));
        assert_eq!(config.workspace, "development");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_port_range_rejected() {
        let err = Cli::try_parse_from([
            "forgeflow",
            "run",
            "--language",
            "html",
            "--port-range",
            "9010-9000",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("empty port range"));
    }

    #[test]
    fn test_global_log_flags() {
        let cli = Cli::try_parse_from([
            "forgeflow",
            "plan",
            "--language",
            "julia",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_plan_lists_setup_only_where_needed() {
        let python = render_plan(&WorkflowConfig::new(Language::Python, "."));
        let julia = render_plan(&WorkflowConfig::new(Language::Julia, "."));

        assert!(!python.contains("setup"));
        assert!(julia.lines().nth(2).unwrap().starts_with("setup"));
        assert!(julia.contains("best-effort"));
        assert_eq!(julia.lines().count(), 9);
    }
}
