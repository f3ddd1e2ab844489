//! Deploy records

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a backend reports as active (or previously active) for a service
///
/// Produced on demand from the remote host and never cached. An empty `tag`
/// means the service has never been deployed to the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub service: String,
    pub env: String,
    pub tag: String,

    /// Server: time the container has been up. Cronjob: time since the last
    /// run finished.
    pub running_for: Duration,

    /// Exit code of the last run (cronjob only)
    pub last_exit_code: Option<i32>,
}

impl DeployRecord {
    /// A record for a service with nothing deployed
    pub fn empty(service: &str, env: &str) -> Self {
        Self {
            service: service.to_string(),
            env: env.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tag.is_empty()
    }
}
