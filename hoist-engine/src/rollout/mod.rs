//! Backend rollout protocols
//!
//! Each deployable backend implements [`Rollout`]: the deploy protocol
//! itself plus the two history queries the orchestrator needs for rollback.
//! The orchestrator picks the implementation by the service's backend kind.

mod cronjob;
mod server;
mod static_site;

pub use cronjob::CronjobRollout;
pub use server::ServerRollout;
pub use static_site::{CURRENT_MARKER, PREVIOUS_MARKER, StaticRollout};

use async_trait::async_trait;
use hoist_core::config::{Binding, ConfigError};
use hoist_core::crontab::BlockError;
use hoist_core::domain::deploy::DeployRecord;
use hoist_core::domain::service::BackendKind;
use hoist_remote::{Dialer, RemoteChannel, RemoteError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::health::HealthError;
use crate::progress::ProgressSink;

/// Errors that fail a service's rollout
///
/// Every remote failure names the stage and the target it hit.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("connecting to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: RemoteError,
    },

    #[error("pulling image {image}: {source}")]
    Pull {
        image: String,
        #[source]
        source: RemoteError,
    },

    #[error("renaming container {from} to {to}: {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: RemoteError,
    },

    #[error("starting container {container}: {source}")]
    Start {
        container: String,
        #[source]
        source: RemoteError,
    },

    #[error("healthcheck failed: {0}")]
    Health(#[from] HealthError),

    #[error("reading cronfile {path}: {source}")]
    ReadSchedule {
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("writing cronfile {path}: {source}")]
    WriteSchedule {
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("cronfile {path} changed while deploying; re-run the deploy")]
    ConcurrentModification { path: String },

    #[error("{action}: {source}")]
    Store {
        action: String,
        #[source]
        source: RemoteError,
    },

    #[error("build not found: {0}")]
    BuildNotFound(String),

    #[error("querying {what} on {address}: {source}")]
    History {
        what: &'static str,
        address: String,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no rollout available for {0} services")]
    UnsupportedBackend(BackendKind),

    #[error("cancelled")]
    Cancelled,

    #[error("deploy task failed: {0}")]
    Task(String),
}

/// One service's transition from `previous` to `tag`
///
/// An empty `previous` means nothing is deployed yet. A rollback is the same
/// request with the two tags swapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub service: String,
    pub env: String,
    pub tag: String,
    pub previous: String,
}

impl DeployRequest {
    pub fn new(service: &str, env: &str, tag: &str, previous: &str) -> Self {
        Self {
            service: service.to_string(),
            env: env.to_string(),
            tag: tag.to_string(),
            previous: previous.to_string(),
        }
    }

    /// The request that undoes this one
    pub fn reversed(&self) -> Self {
        Self {
            service: self.service.clone(),
            env: self.env.clone(),
            tag: self.previous.clone(),
            previous: self.tag.clone(),
        }
    }

    pub fn is_first_deploy(&self) -> bool {
        self.previous.is_empty()
    }
}

/// A backend's deploy protocol and history queries
#[async_trait]
pub trait Rollout: Send + Sync {
    /// Deploys `request.tag`, reporting progress to `progress`
    async fn deploy(
        &self,
        request: &DeployRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError>;

    /// What is currently deployed; an empty record if nothing is
    async fn current(&self, service: &str, env: &str, cancel: &CancellationToken) -> Result<DeployRecord, DeployError>;

    /// What the current deploy replaced; an empty record if nothing
    async fn previous(&self, service: &str, env: &str, cancel: &CancellationToken) -> Result<DeployRecord, DeployError>;
}

/// SSH address of a binding's node
fn node_address<'a>(binding: &Binding<'a>) -> Result<&'a str, DeployError> {
    binding.address.ok_or_else(|| {
        ConfigError::Invalid(format!(
            "service {:?} env {:?}: node {:?} not defined in nodes",
            binding.service, binding.env, binding.target.node
        ))
        .into()
    })
}

async fn connect(
    dialer: &dyn Dialer,
    address: &str,
    cancel: &CancellationToken,
) -> Result<Box<dyn RemoteChannel>, DeployError> {
    dialer.dial(address, cancel.clone()).await.map_err(|source| {
        stage_failure(source, |source| DeployError::Connect {
            address: address.to_string(),
            source,
        })
    })
}

/// Wraps a stage failure, surfacing cancellation as [`DeployError::Cancelled`]
fn stage_failure(source: RemoteError, wrap: impl FnOnce(RemoteError) -> DeployError) -> DeployError {
    if source.is_cancelled() {
        DeployError::Cancelled
    } else {
        wrap(source)
    }
}

fn history_failure(what: &'static str, address: &str, source: RemoteError) -> DeployError {
    stage_failure(source, |source| DeployError::History {
        what,
        address: address.to_string(),
        source,
    })
}

/// Closes a channel, logging failures
async fn disconnect(channel: Box<dyn RemoteChannel>) {
    if let Err(e) = channel.close().await {
        warn!(host = %channel.address(), "Failed to close connection: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;
    use std::time::Duration;

    #[test]
    fn test_request_reversed() {
        let request = DeployRequest::new("api", "prod", "new", "old");
        let back = request.reversed();
        assert_eq!(back.tag, "old");
        assert_eq!(back.previous, "new");
        assert!(!request.is_first_deploy());
        assert!(DeployRequest::new("api", "prod", "new", "").is_first_deploy());
    }

    #[test]
    fn test_error_messages_carry_stage_and_target() {
        let cause = || RemoteError::CommandFailed {
            command: String::new(),
            status: Some(1),
            stderr: "boom".to_string(),
        };

        let err = DeployError::Pull {
            image: "registry.example.com/api:t".to_string(),
            source: cause(),
        };
        assert_eq!(
            err.to_string(),
            "pulling image registry.example.com/api:t: command failed (exit 1): boom"
        );

        let err = DeployError::Start {
            container: "api-t".to_string(),
            source: cause(),
        };
        assert!(err.to_string().starts_with("starting container api-t: "));

        let err = DeployError::from(HealthError::TimedOut(Duration::from_secs(120)));
        assert_eq!(err.to_string(), "healthcheck failed: timed out after 120s");
    }

    #[tokio::test]
    async fn test_cancelled_dial_is_not_a_connect_failure() {
        let host = MockHost::new(|_| Ok(String::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = connect(&host, "deploy@10.0.0.1", &cancel).await.err().unwrap();
        assert!(matches!(err, DeployError::Cancelled));

        let refused = MockHost::unreachable("Connection refused");
        let err = connect(&refused, "deploy@10.0.0.1", &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DeployError::Connect { .. }));
    }
}
