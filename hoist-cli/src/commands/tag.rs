//! Tag command handler
//!
//! Prints the build tag for the commit being built. CI provides the branch
//! and commit through `GITHUB_REF_NAME`/`GITHUB_SHA`; locally they come
//! from git.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use hoist_core::tag;
use std::process::Command;

/// Print the tag of the current commit
pub fn print_tag(attempt: u32) -> Result<()> {
    let (branch, sha) = commit_source(|key| std::env::var(key).ok(), git)?;
    println!("{}", tag::encode(&branch, &sha, Utc::now(), attempt));
    Ok(())
}

/// Branch and commit of the build, preferring the CI environment
fn commit_source(
    lookup: impl Fn(&str) -> Option<String>,
    git: impl Fn(&[&str]) -> Result<String>,
) -> Result<(String, String)> {
    let from_env = |key: &str| lookup(key).filter(|value| !value.is_empty());

    let branch = match from_env("GITHUB_REF_NAME") {
        Some(branch) => branch,
        None => git(&["rev-parse", "--abbrev-ref", "HEAD"])?,
    };
    let sha = match from_env("GITHUB_SHA") {
        Some(sha) => sha,
        None => git(&["rev-parse", "HEAD"])?,
    };
    Ok((branch, sha))
}

fn git(args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .output()
        .context("running git")?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
