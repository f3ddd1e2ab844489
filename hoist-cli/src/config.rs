//! Configuration module
//!
//! Handles CLI configuration: where the fleet file lives and how to reach
//! the image registry.

use anyhow::{Context, Result};
use hoist_core::config::FleetConfig;
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the fleet configuration file
    pub config_path: PathBuf,
    pub registry_user: Option<String>,
    pub registry_password: Option<String>,
}

impl Config {
    /// Registry credentials, when both halves are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.registry_user, &self.registry_password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// Loads and validates the fleet configuration
    pub fn load_fleet(&self) -> Result<FleetConfig> {
        FleetConfig::load(&self.config_path)
            .with_context(|| format!("loading {}", self.config_path.display()))
    }
}
