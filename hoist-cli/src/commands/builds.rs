//! Builds command handler
//!
//! Lists the builds available to every configured service, newest first.

use anyhow::Result;
use colored::*;
use hoist_core::domain::build::Build;
use hoist_engine::{EngineConfig, catalog_for_services, catalogs_for_fleet};

use crate::config::Config;

/// List recent builds
pub async fn list_builds(config: &Config, limit: usize) -> Result<()> {
    let fleet = config.load_fleet()?;
    let engine = EngineConfig::from_env()?;
    let client = reqwest::Client::new();

    let catalogs = catalogs_for_fleet(&fleet, &client, config.credentials())?;
    let services: Vec<String> = fleet.services.keys().cloned().collect();
    let Some(catalog) = catalog_for_services(&catalogs, &services, engine.builds_fetch_limit) else {
        println!("{}", "No service publishes builds.".yellow());
        return Ok(());
    };

    let builds = catalog.list_builds(limit, 0).await?;
    if builds.is_empty() {
        println!("{}", "No builds found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} build(s):", builds.len()).bold());
    println!();
    for build in &builds {
        print_build(build);
    }

    Ok(())
}

fn print_build(build: &Build) {
    println!(
        "  {}  {}  {}  {}",
        build.tag.bold(),
        build.branch.cyan(),
        build.sha.dimmed(),
        build.time.format("%Y-%m-%d %H:%M UTC")
    );
    if !build.message.is_empty() {
        println!("      {}", build.message);
    }
}
