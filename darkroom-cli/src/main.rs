//! darkroom CLI tool

#![allow(clippy::multiple_crate_versions)]

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{ListCommand, ProcessCommand, ServeCommand, StatusCommand, SweepCommand};
use darkroom::config::DarkroomConfig;
use darkroom::observability::{self, LogFormat, ObservabilityConfig};
use darkroom::state::DarkroomState;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "darkroom")]
#[command(version)]
#[command(about = "Submit, inspect and sweep asynchronous image jobs", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the standard search path)
    #[arg(short, long, global = true, env = "DARKROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Submit images, wait for them and report the outcome
    Process(ProcessCommand),
    /// Print one job record as JSON
    Status(StatusCommand),
    /// List an owner's jobs
    List(ListCommand),
    /// Run one retention sweep
    Sweep(SweepCommand),
    /// Run workers, watchdog and sweeper until interrupted
    Serve(ServeCommand),
}

impl Commands {
    const fn default_log_filter(&self) -> &'static str {
        match self {
            Self::Serve(_) => "info",
            _ => "warn",
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<DarkroomConfig> {
    let config = match path {
        Some(path) => DarkroomConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => DarkroomConfig::load().context("Failed to load configuration")?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    observability::init_with(
        &ObservabilityConfig::default()
            .with_default_filter(cli.command.default_log_filter())
            .with_format(format),
    )?;

    let config = load_config(cli.config.as_ref())?;
    let state = DarkroomState::from_config(config)
        .await
        .context("Failed to open job and blob stores")?;

    match cli.command {
        Commands::Process(cmd) => cmd.execute(&state).await?,
        Commands::Status(cmd) => cmd.execute(&state).await?,
        Commands::List(cmd) => cmd.execute(&state).await?,
        Commands::Sweep(cmd) => cmd.execute(&state).await?,
        Commands::Serve(cmd) => cmd.execute(&state).await?,
    }

    Ok(())
}
