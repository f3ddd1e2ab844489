//! Rollout outcomes and rollback decisions

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Result of one service's rollout within an orchestrator run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutOutcome {
    pub service: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl RolloutOutcome {
    pub fn success(service: &str) -> Self {
        Self {
            service: service.to_string(),
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(service: &str, error: impl Into<String>) -> Self {
        Self {
            service: service.to_string(),
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

/// Which services to revert after a partially failed deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackScope {
    /// Every service that was deployed
    All,
    /// Only the services whose rollout failed
    Failed,
    /// Leave the fleet as it is
    None,
}

impl RollbackScope {
    /// Interprets an answer to the `Rollback? [Y/n/s]` prompt
    ///
    /// Empty or `y` means all, `s` means failed only; anything else leaves
    /// the fleet alone.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim() {
            "" | "Y" | "y" => RollbackScope::All,
            "s" | "S" => RollbackScope::Failed,
            _ => RollbackScope::None,
        }
    }
}

impl FromStr for RollbackScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(RollbackScope::All),
            "failed" => Ok(RollbackScope::Failed),
            "none" => Ok(RollbackScope::None),
            other => Err(format!(
                "invalid rollback scope {:?} (expected all, failed or none)",
                other
            )),
        }
    }
}

impl std::fmt::Display for RollbackScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackScope::All => write!(f, "all"),
            RollbackScope::Failed => write!(f, "failed"),
            RollbackScope::None => write!(f, "none"),
        }
    }
}
