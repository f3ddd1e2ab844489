//! Hoist CLI
//!
//! Command-line interface for building tags, listing builds, deploying and
//! rolling back the services described in `hoist.yml`.

mod commands;
mod config;
mod console;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "hoist")]
#[command(about = "Multi-service deployment tool", long_about = None)]
struct Cli {
    /// Fleet configuration file
    #[arg(short, long, global = true, env = "HOIST_CONFIG", default_value = "hoist.yml")]
    config: PathBuf,

    /// Registry user for listing builds
    #[arg(long, global = true, env = "HOIST_REGISTRY_USER")]
    registry_user: Option<String>,

    /// Registry password for listing builds
    #[arg(long, global = true, env = "HOIST_REGISTRY_PASSWORD", hide_env_values = true)]
    registry_password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the deploy narration
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hoist=warn,hoist_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        config_path: cli.config,
        registry_user: cli.registry_user,
        registry_password: cli.registry_password,
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remote commands");
            interrupt.cancel();
        }
    });

    handle_command(cli.command, &config, &cancel).await
}
