//! `foreman`: command-line entry point.
//!
//! `foreman serve` is the Daemon Bootstrap (C8, spec.md §4.8): it parses
//! flags, wires C1-C7 into a running process, and blocks until shutdown.
//! `foreman prompt` / `foreman health` are thin HTTP clients against an
//! already-running daemon, matching the teacher's `ralph-cli` layout of a
//! headless-loop subcommand alongside small utility subcommands.

mod client;
mod daemon;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use foreman_core::ForemanConfig;

#[derive(Parser)]
#[command(name = "foreman", version, about = "Worker/boss agent orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: Job/Run Service + Run Orchestrator (C1-C8).
    Serve(ServeArgs),
    /// Submit a prompt to a running daemon.
    Prompt(PromptArgs),
    /// Check a running daemon's health endpoint.
    Health(HealthArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Optional YAML config file, applied before env/flag overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for persisted jobs/runs/pidfiles.
    #[arg(long)]
    prefix: Option<String>,

    /// HTTP port for the Job/Run Service.
    #[arg(long)]
    port: Option<u16>,

    /// Optional secondary port the service also listens on.
    #[arg(long)]
    secondary_port: Option<u16>,

    /// Path to the git repository this orchestrator owns.
    #[arg(long)]
    workspace: Option<String>,

    /// `providerID/modelID` for the worker phase.
    #[arg(long)]
    worker_model: Option<String>,

    /// `providerID/modelID` for the boss phase.
    #[arg(long)]
    boss_model: Option<String>,

    /// Maximum worker/boss iterations per run.
    #[arg(long)]
    max_iterations: Option<u32>,
}

#[derive(Parser)]
struct PromptArgs {
    /// The task prompt to submit.
    prompt: String,

    /// Base URL of a running daemon.
    #[arg(long, default_value = "http://127.0.0.1:4178")]
    url: String,

    /// Associate the run with an existing job id.
    #[arg(long)]
    job_id: Option<String>,
}

#[derive(Parser)]
struct HealthArgs {
    #[arg(long, default_value = "http://127.0.0.1:4178")]
    url: String,
}

fn install_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("FOREMAN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Builds a [`ForemanConfig`] from the layered sources named in spec.md
/// §4.8: an optional YAML file, then environment overrides, then CLI flags
/// (applied last, so they win).
fn build_config(args: &ServeArgs) -> Result<ForemanConfig> {
    let mut config = match &args.config {
        Some(path) => ForemanConfig::from_file(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => ForemanConfig::default(),
    };
    config.apply_env_overrides();

    if let Some(prefix) = &args.prefix {
        config.prefix = prefix.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.secondary_port.is_some() {
        config.secondary_port = args.secondary_port;
    }
    if let Some(workspace) = &args.workspace {
        config.workspace = workspace.clone();
    }
    if let Some(model) = &args.worker_model {
        config.worker_model = model.clone();
    }
    if let Some(model) = &args.boss_model {
        config.boss_model = model.clone();
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }

    config.validate().context("validating configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    install_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let config = build_config(&args)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            runtime.block_on(daemon::run(config))
        }
        Command::Prompt(args) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            runtime.block_on(client::submit_prompt(&args.url, &args.prompt, args.job_id))
        }
        Command::Health(args) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            runtime.block_on(client::check_health(&args.url))
        }
    }
}
