//! lifelined — the lifeline daemon.
//!
//! Runs on every instance of an autoscaling group:
//! - acquires the instance's queue and subscribes it to the lifecycle topic
//! - runs the startup playbook once per instance lifetime
//! - waits for the instance's termination notice, runs the shutdown
//!   playbook and settles the lifecycle hook
//! - releases the queue on exit, including on SIGINT/SIGTERM
//!
//! # Usage
//!
//! ```text
//! lifelined --config /etc/lifeline/lifeline.toml agent
//! lifelined --config /etc/lifeline/cleanup.toml cleanup
//! ```

mod agent;
mod cleanup;
mod config;
mod signal;
mod wiring;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

const DEFAULT_LOG_FILTER: &str = "info,lifelined=debug,lifeline=debug";

#[derive(Parser)]
#[command(name = "lifelined", about = "Fleet lifecycle agent", version)]
struct Cli {
    /// Config file. Defaults to $LIFELINE_CONFIG_FILE, then /etc/lifeline/lifeline.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Fail at once if the config file is missing instead of waiting for it.
    #[arg(long, global = true)]
    no_wait: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Lifecycle-hook aware agent (default).
    Agent,
    /// Run the configured commands for every trigger until stopped.
    Cleanup,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let command = cli.command.unwrap_or(Command::Agent);
    info!(?command, version = env!("CARGO_PKG_VERSION"), "lifelined starting");

    let cfg = config::load(cli.config.as_deref(), !cli.no_wait).await?;

    match command {
        Command::Agent => agent::run(cfg).await,
        Command::Cleanup => cleanup::run(cfg).await,
    }
}
