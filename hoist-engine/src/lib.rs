//! Hoist Engine
//!
//! The deployment engine behind the `hoist` CLI.
//!
//! This crate provides:
//! - Blue-green rollout of server containers with health polling
//! - Scheduled-job rollout through shared crontab documents
//! - Static site rollout through bucket markers and CDN invalidation
//! - Build catalog merging and tag resolution
//! - The multi-service orchestrator with rollback planning

pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod docker;
pub mod health;
pub mod orchestrator;
pub mod progress;
pub mod rollout;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use catalog::{
    FixedCatalog, MergedCatalog, ResolveError, bucket_catalogs, catalog_for_services, catalogs_for_fleet, resolve_build,
};
pub use config::EngineConfig;
pub use health::{HealthError, HealthPoller};
pub use orchestrator::{
    Orchestrator, OrchestratorError, RollbackPlan, RolloutPlan, RolloutResult, RunReport, plan_rollback,
};
pub use progress::{InMemoryProgress, ProgressEvent, ProgressSink, Stage, TracingProgress};
pub use rollout::{CronjobRollout, DeployError, DeployRequest, Rollout, ServerRollout, StaticRollout};
