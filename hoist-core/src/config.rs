//! Fleet configuration
//!
//! Loads and validates `hoist.yml`: the nodes deploys run on and the
//! services bound to them, per environment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::domain::service::BackendKind;

/// Errors raised while loading or querying the fleet configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("unknown service: {0:?}")]
    UnknownService(String),

    #[error("service {service:?} has no environment {env:?}")]
    UnknownEnvironment { service: String, env: String },
}

/// Top-level fleet configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Project name, used in log groups and webhook events
    #[serde(default)]
    pub project: String,

    /// Node name -> SSH address (`user@host[:port]`)
    #[serde(default)]
    pub nodes: BTreeMap<String, String>,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    #[serde(default)]
    pub hooks: HooksConfig,
}

/// Outbound notification hooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HooksConfig {
    /// URL that receives a JSON event after every deploy or rollback
    #[serde(default)]
    pub post_deploy: Option<String>,
}

/// One deployable service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "type")]
    pub kind: BackendKind,

    /// Image repository, without tag
    #[serde(default)]
    pub image: String,

    /// Container port (server)
    #[serde(default)]
    pub port: u16,

    /// Health check path (server)
    #[serde(default)]
    pub healthcheck: String,

    /// Cron schedule expression (cronjob)
    #[serde(default)]
    pub schedule: String,

    /// Optional container command
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub env: BTreeMap<String, EnvConfig>,
}

/// Per-environment binding of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    // server + cronjob
    #[serde(default)]
    pub node: String,
    #[serde(default, rename = "envfile")]
    pub env_file: String,

    // server
    #[serde(default)]
    pub host: String,

    // cronjob
    #[serde(default)]
    pub cronfile: String,

    // static
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub cloudfront: String,
}

/// A service resolved against one environment
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    pub service: &'a str,
    pub env: &'a str,
    pub config: &'a ServiceConfig,
    pub target: &'a EnvConfig,
    /// SSH address of the node, if the binding names one
    pub address: Option<&'a str>,
}

impl FleetConfig {
    /// Reads, parses and validates a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_yaml(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a config document without validating it
    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Checks that every service carries the fields its backend needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(invalid("no services defined".to_string()));
        }

        for (name, svc) in &self.services {
            match svc.kind {
                BackendKind::Server => {
                    require(!svc.image.is_empty(), || format!("service {name:?}: missing image"))?;
                    require(svc.port != 0, || format!("service {name:?}: missing port"))?;
                    require(!svc.healthcheck.is_empty(), || {
                        format!("service {name:?}: missing healthcheck")
                    })?;
                }
                BackendKind::Cronjob => {
                    require(!svc.image.is_empty(), || format!("service {name:?}: missing image"))?;
                    require(!svc.schedule.is_empty(), || {
                        format!("service {name:?}: missing schedule")
                    })?;
                }
                BackendKind::Static => {}
            }

            if svc.env.is_empty() {
                return Err(invalid(format!("service {name:?}: no environments defined")));
            }

            for (env_name, env) in &svc.env {
                let field = |what: &str| format!("service {name:?} env {env_name:?}: missing {what}");

                match svc.kind {
                    BackendKind::Server | BackendKind::Cronjob => {
                        require(!env.node.is_empty(), || field("node"))?;
                        require(self.nodes.contains_key(&env.node), || {
                            format!(
                                "service {name:?} env {env_name:?}: node {:?} not defined in nodes",
                                env.node
                            )
                        })?;
                        require(!env.env_file.is_empty(), || field("envfile"))?;
                        if svc.kind == BackendKind::Server {
                            require(!env.host.is_empty(), || field("host"))?;
                        } else {
                            require(!env.cronfile.is_empty(), || field("cronfile"))?;
                        }
                    }
                    BackendKind::Static => {
                        require(!env.bucket.is_empty(), || field("bucket"))?;
                        require(!env.cloudfront.is_empty(), || field("cloudfront"))?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Resolves a service in an environment
    pub fn binding<'a>(&'a self, service: &'a str, env: &'a str) -> Result<Binding<'a>, ConfigError> {
        let config = self
            .services
            .get(service)
            .ok_or_else(|| ConfigError::UnknownService(service.to_string()))?;
        let target = config.env.get(env).ok_or_else(|| ConfigError::UnknownEnvironment {
            service: service.to_string(),
            env: env.to_string(),
        })?;

        Ok(Binding {
            service,
            env,
            config,
            target,
            address: self.nodes.get(&target.node).map(String::as_str),
        })
    }

    /// Sorted names of the services deployable to `env`
    pub fn services_with_env(&self, env: &str) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, svc)| svc.env.contains_key(env))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Sorted, deduplicated names of every environment in the config
    pub fn environments(&self) -> Vec<String> {
        let mut envs: Vec<String> = self
            .services
            .values()
            .flat_map(|svc| svc.env.keys().cloned())
            .collect();
        envs.sort();
        envs.dedup();
        envs
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}

fn require(ok: bool, message: impl FnOnce() -> String) -> Result<(), ConfigError> {
    if ok { Ok(()) } else { Err(invalid(message())) }
}
