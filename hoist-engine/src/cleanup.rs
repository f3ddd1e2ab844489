//! Best-effort cleanup
//!
//! Stopping or removing containers after a failure (or after a successful
//! swap) must never mask the outcome that triggered it. A [`Cleanup`] is the
//! record of such an attempt: it can be reported, but it does not convert
//! into a deploy error and cannot be propagated with `?`.

use hoist_remote::RemoteChannel;
use std::time::Duration;
use tracing::{debug, warn};

use crate::progress::{ServiceProgress, Stage};

/// Upper bound for one cleanup command
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of a best-effort remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleanup {
    /// What was attempted, e.g. `docker stop api-main-abc1234-20260213110000`
    pub action: String,
    /// Failure cause, if the attempt failed
    pub failure: Option<String>,
}

impl Cleanup {
    /// Runs `command`, ignoring cancellation and capturing any failure
    pub async fn attempt(channel: &dyn RemoteChannel, action: impl Into<String>, command: &str) -> Self {
        let action = action.into();
        let failure = match tokio::time::timeout(CLEANUP_TIMEOUT, channel.run_uncancelled(command)).await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {}s", CLEANUP_TIMEOUT.as_secs())),
        };

        Self { action, failure }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Logs the outcome and forwards failures to the progress sink
    pub fn report(&self, progress: &ServiceProgress<'_>) -> bool {
        match &self.failure {
            None => {
                debug!(action = %self.action, "Cleanup succeeded");
                true
            }
            Some(cause) => {
                warn!(action = %self.action, "Cleanup failed: {}", cause);
                progress.emit(
                    Stage::Cleanup,
                    format!("warning: {} failed: {}", self.action, cause),
                );
                false
            }
        }
    }
}
