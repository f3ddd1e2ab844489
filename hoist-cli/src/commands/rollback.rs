//! Rollback command handler
//!
//! Redeploys the build each service ran before its current one.

use anyhow::{Result, bail};
use clap::Args;
use colored::*;
use hoist_engine::EngineConfig;
use hoist_remote::AwsCliStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{confirm, select_services, standard_orchestrator};
use crate::config::Config;
use crate::console::ConsoleProgress;

#[derive(Args)]
pub struct RollbackArgs {
    /// Environment to roll back
    env: String,

    /// Services to roll back (comma-separated); defaults to all in the environment
    #[arg(short, long, value_delimiter = ',')]
    services: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
}

/// Roll services back to their previous build
pub async fn rollback(args: RollbackArgs, config: &Config, cancel: &CancellationToken) -> Result<()> {
    let fleet = Arc::new(config.load_fleet()?);
    if !fleet.environments().contains(&args.env) {
        bail!("unknown environment {:?}", args.env);
    }
    let services = select_services(&fleet, &args.env, args.services)?;
    let engine = EngineConfig::from_env()?;

    let console = Arc::new(ConsoleProgress::new(&services));
    let orchestrator = standard_orchestrator(fleet, Arc::new(AwsCliStore::new()), &engine, console);

    let plan = orchestrator.resolve_rollback_targets(&services, &args.env, cancel).await?;
    for service in &plan.skipped {
        println!("{} {}", service.bold(), "has no previous deploy; skipped".yellow());
    }
    if plan.targets.services.is_empty() {
        println!("{}", "Nothing to roll back.".yellow());
        return Ok(());
    }

    println!("{}", format!("Rolling back in {}:", args.env).bold());
    for service in &plan.targets.services {
        let from = plan.targets.previous.get(service).map(String::as_str).unwrap_or("");
        let to = plan.targets.tags.get(service).map(String::as_str).unwrap_or("");
        println!("  {:<20} {} -> {}", service, from.dimmed(), to);
    }
    println!();
    if !args.yes && !confirm("Continue?") {
        println!("{}", "Aborted.".yellow());
        return Ok(());
    }

    let result = orchestrator.run_rollback(&plan.targets, cancel).await;
    orchestrator.wait_for_hooks().await;

    if !result.succeeded() {
        for service in &result.failed {
            if let Some(err) = result.errors.get(service) {
                println!("{}: {}", service.bold(), err.to_string().red());
            }
        }
        bail!("rollback failed for: {}", result.failed.join(", "));
    }

    println!("{}", "Rollback complete.".green().bold());
    Ok(())
}
