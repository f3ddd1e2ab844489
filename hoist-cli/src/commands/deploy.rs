//! Deploy command handler
//!
//! Resolves the build, records what each service runs now, rolls the build
//! out to every selected service and, when something fails, decides what to
//! revert.

use anyhow::{Result, bail};
use clap::Args;
use colored::*;
use hoist_core::domain::rollout::RollbackScope;
use hoist_core::tag;
use hoist_engine::{
    EngineConfig, OrchestratorError, RolloutPlan, RolloutResult, RunReport, bucket_catalogs, catalog_for_services,
    catalogs_for_fleet, resolve_build,
};
use hoist_remote::{AwsCliStore, StaticStore};
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{confirm, read_rollback_answer, select_env, select_services, standard_orchestrator};
use crate::config::Config;
use crate::console::ConsoleProgress;

#[derive(Args)]
pub struct DeployArgs {
    /// Target environment; optional when only one is configured
    #[arg(short, long)]
    env: Option<String>,

    /// Services to deploy (comma-separated); defaults to all in the environment
    #[arg(short, long, value_delimiter = ',')]
    services: Vec<String>,

    /// Build tag, or a branch whose newest build is deployed
    #[arg(short, long)]
    build: String,

    /// What to revert when a service fails, instead of asking
    #[arg(long)]
    rollback: Option<RollbackScope>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
}

/// Deploy a build
pub async fn deploy(args: DeployArgs, config: &Config, cancel: &CancellationToken) -> Result<()> {
    let fleet = Arc::new(config.load_fleet()?);
    let env = select_env(&fleet, args.env)?;
    let services = select_services(&fleet, &env, args.services)?;
    let engine = EngineConfig::from_env()?;

    let client = reqwest::Client::new();
    let store: Arc<dyn StaticStore> = Arc::new(AwsCliStore::new());
    let mut catalogs = catalogs_for_fleet(&fleet, &client, config.credentials())?;
    catalogs.extend(bucket_catalogs(&fleet, &env, Arc::clone(&store)));
    let tag = match catalog_for_services(&catalogs, &services, engine.builds_fetch_limit) {
        Some(catalog) => resolve_build(catalog.as_ref(), &args.build).await?,
        None if tag::is_valid(&args.build) => args.build.clone(),
        None => bail!("{:?} is not a build tag and no selected service lists builds", args.build),
    };

    let console = Arc::new(ConsoleProgress::new(&services));
    let orchestrator = standard_orchestrator(Arc::clone(&fleet), store, &engine, console);

    let previous = orchestrator.gather_previous_tags(&services, &env, cancel).await?;

    println!("{}", format!("Deploying {} to {}:", tag, env).bold());
    for service in &services {
        let current = previous.get(service).filter(|t| !t.is_empty());
        println!("  {:<20} {}", service, current.map(String::as_str).unwrap_or("(none)").dimmed());
    }
    println!();
    if !args.yes && !confirm("Continue?") {
        println!("{}", "Aborted.".yellow());
        return Ok(());
    }

    let plan = RolloutPlan::uniform(&env, services, &tag, previous);
    let preset = args.rollback;
    let outcome = orchestrator
        .deploy_with_rollback(
            &plan,
            |result| {
                print_failures(result);
                preset.unwrap_or_else(prompt_rollback)
            },
            cancel,
        )
        .await;
    orchestrator.wait_for_hooks().await;

    match outcome {
        Ok(report) => finish(&report),
        Err(OrchestratorError::RollbackFailed { services, report }) => {
            print_report(&report);
            bail!("rollback failed for: {}", services.join(", "))
        }
        Err(err) => Err(err.into()),
    }
}

/// Asks whether to revert, blocking this worker thread on stdin
fn prompt_rollback() -> RollbackScope {
    tokio::task::block_in_place(|| {
        print!("Rollback? [Y/n/s] (Y=all, n=leave, s=failed only) ");
        let _ = io::Write::flush(&mut io::stdout());
        read_rollback_answer(&mut io::stdin().lock())
    })
}

fn print_failures(result: &RolloutResult) {
    println!();
    println!("{}", format!("{} service(s) failed:", result.failed.len()).red().bold());
    for service in &result.failed {
        match result.errors.get(service) {
            Some(err) => println!("  {}: {}", service.bold(), err),
            None => println!("  {}", service.bold()),
        }
    }
}

fn print_report(report: &RunReport) {
    for service in &report.skipped {
        println!("{} {}", service.bold(), "was not running before; left in place".yellow());
    }
    if let Some(rollback) = &report.rollback {
        for outcome in &rollback.outcomes {
            if outcome.succeeded {
                println!("{} {}", outcome.service.bold(), "rolled back".green());
            } else {
                println!(
                    "{} {}: {}",
                    outcome.service.bold(),
                    "rollback failed".red(),
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
}

fn finish(report: &RunReport) -> Result<()> {
    print_report(report);
    if report.result.succeeded() {
        println!("{}", "Deploy complete.".green().bold());
        return Ok(());
    }
    bail!("deploy failed for: {}", report.result.failed.join(", "))
}
