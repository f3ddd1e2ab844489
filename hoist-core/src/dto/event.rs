//! Post-deploy notification payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::rollout::RolloutOutcome;

/// Outcome of a run, or of one service within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
}

/// JSON body posted to the `post_deploy` hook after a deploy or rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployEvent {
    pub project: String,
    pub env: String,
    pub user: String,
    pub services: Vec<ServiceEvent>,
    pub result: EventStatus,
    pub is_rollback: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Per-service entry of a [`DeployEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub name: String,
    pub old_tag: String,
    pub new_tag: String,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Identifies the run an event describes
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub project: String,
    pub env: String,
    pub user: String,
}

impl DeployEvent {
    /// Builds an event from the outcomes of one orchestrator run
    ///
    /// `tags` and `previous` are the tag pair each service was invoked with;
    /// for a rollback pass that is already the swapped pair.
    pub fn from_outcomes(
        ctx: &EventContext,
        outcomes: &[RolloutOutcome],
        tags: &HashMap<String, String>,
        previous: &HashMap<String, String>,
        duration: Duration,
        is_rollback: bool,
    ) -> Self {
        let services: Vec<ServiceEvent> = outcomes
            .iter()
            .map(|outcome| ServiceEvent {
                name: outcome.service.clone(),
                old_tag: previous.get(&outcome.service).cloned().unwrap_or_default(),
                new_tag: tags.get(&outcome.service).cloned().unwrap_or_default(),
                status: if outcome.succeeded {
                    EventStatus::Success
                } else {
                    EventStatus::Failure
                },
                error: outcome.error.clone(),
            })
            .collect();

        let result = if services.iter().all(|s| s.status == EventStatus::Success) {
            EventStatus::Success
        } else {
            EventStatus::Failure
        };

        Self {
            project: ctx.project.clone(),
            env: ctx.env.clone(),
            user: ctx.user.clone(),
            services,
            result,
            is_rollback,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }
}
