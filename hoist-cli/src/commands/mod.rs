//! Commands module
//!
//! Defines all CLI commands, their handlers, and the target selection they
//! share.

mod builds;
mod deploy;
mod rollback;
mod tag;

use anyhow::{Result, bail};
use clap::Subcommand;
use hoist_core::config::FleetConfig;
use hoist_core::domain::rollout::RollbackScope;
use hoist_engine::{EngineConfig, Orchestrator, ProgressSink};
use hoist_remote::{SshDialer, StaticStore};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Print a build tag for the current commit
    Tag {
        /// Retry attempt of the build
        #[arg(long, default_value_t = 0)]
        attempt: u32,
    },
    /// List recent builds of the configured services
    Builds {
        /// Number of builds to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Deploy a build to an environment
    Deploy(deploy::DeployArgs),
    /// Redeploy the previous build of each service
    Rollback(rollback::RollbackArgs),
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config, cancel: &CancellationToken) -> Result<()> {
    match command {
        Commands::Tag { attempt } => tag::print_tag(attempt),
        Commands::Builds { limit } => builds::list_builds(config, limit).await,
        Commands::Deploy(args) => deploy::deploy(args, config, cancel).await,
        Commands::Rollback(args) => rollback::rollback(args, config, cancel).await,
    }
}

/// Picks the target environment
///
/// Without an explicit choice, a fleet with a single environment uses it.
fn select_env(fleet: &FleetConfig, env: Option<String>) -> Result<String> {
    let environments = fleet.environments();
    match env {
        Some(env) if environments.contains(&env) => Ok(env),
        Some(env) => bail!("unknown environment {:?} (available: {})", env, environments.join(", ")),
        None if environments.len() == 1 => Ok(environments[0].clone()),
        None => bail!("--env is required (available: {})", environments.join(", ")),
    }
}

/// Picks the services to act on, defaulting to every service of `env`
fn select_services(fleet: &FleetConfig, env: &str, services: Vec<String>) -> Result<Vec<String>> {
    let available = fleet.services_with_env(env);
    if services.is_empty() {
        if available.is_empty() {
            bail!("no services configured for environment {:?}", env);
        }
        return Ok(available);
    }

    let mut selected: Vec<String> = Vec::new();
    for service in services {
        let service = service.trim().to_string();
        if service.is_empty() || selected.contains(&service) {
            continue;
        }
        if !fleet.services.contains_key(&service) {
            bail!("unknown service {:?}", service);
        }
        if !available.contains(&service) {
            bail!("service {:?} has no environment {:?}", service, env);
        }
        selected.push(service);
    }
    Ok(selected)
}

/// Orchestrator over the system `ssh` client and `store`
fn standard_orchestrator(
    fleet: Arc<FleetConfig>,
    store: Arc<dyn StaticStore>,
    engine: &EngineConfig,
    progress: Arc<dyn ProgressSink>,
) -> Orchestrator {
    let dialer = Arc::new(SshDialer::new(engine.ssh_connect_timeout));
    Orchestrator::standard(fleet, dialer, store, engine, progress).with_user(current_user())
}

/// Reads one answer line; `None` on end of input
fn read_line(input: &mut impl BufRead) -> Option<String> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

/// Interprets a rollback answer, leaving everything in place on end of input
fn read_rollback_answer(input: &mut impl BufRead) -> RollbackScope {
    read_line(input)
        .map(|answer| RollbackScope::from_answer(&answer))
        .unwrap_or(RollbackScope::None)
}

/// Asks a yes/no question on stdin; anything but `y` declines
fn confirm(question: &str) -> bool {
    print!("{} [y/N] ", question);
    let _ = io::stdout().flush();
    read_line(&mut io::stdin().lock())
        .map(|answer| matches!(answer.trim(), "y" | "Y" | "yes"))
        .unwrap_or(false)
}

/// Name recorded as the deployer in webhook events
fn current_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}
