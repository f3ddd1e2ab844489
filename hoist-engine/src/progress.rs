//! Rollout progress notifications
//!
//! Progress is the human-readable narration of a rollout ("image pulled",
//! "healthcheck passed"). It is separate from tracing logs: the CLI prints it
//! to stdout while logs go to stderr.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Rollout stage a notification belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connect,
    Pull,
    Rename,
    Start,
    HealthCheck,
    Decommission,
    ReadSchedule,
    WriteSchedule,
    /// Static site markers and object copies
    Publish,
    Invalidate,
    Cleanup,
    /// Start and end of a service's rollout
    Rollout,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::Pull => "pull",
            Stage::Rename => "rename",
            Stage::Start => "start",
            Stage::HealthCheck => "healthcheck",
            Stage::Decommission => "decommission",
            Stage::ReadSchedule => "read-schedule",
            Stage::WriteSchedule => "write-schedule",
            Stage::Publish => "publish",
            Stage::Invalidate => "invalidate",
            Stage::Cleanup => "cleanup",
            Stage::Rollout => "rollout",
        };
        f.write_str(name)
    }
}

/// A single progress notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub service: String,
    pub stage: Stage,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Receives progress notifications from concurrent rollouts
pub trait ProgressSink: Send + Sync {
    fn notify(&self, event: ProgressEvent);
}

/// Progress handle bound to one service
#[derive(Clone, Copy)]
pub struct ServiceProgress<'a> {
    sink: &'a dyn ProgressSink,
    service: &'a str,
}

impl<'a> ServiceProgress<'a> {
    pub fn new(sink: &'a dyn ProgressSink, service: &'a str) -> Self {
        Self { sink, service }
    }

    pub fn emit(&self, stage: Stage, message: impl Into<String>) {
        self.sink.notify(ProgressEvent {
            service: self.service.to_string(),
            stage,
            message: message.into(),
            at: Utc::now(),
        });
    }
}

/// Collects notifications in memory
#[derive(Clone, Default)]
pub struct InMemoryProgress {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl InMemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Messages recorded for one service, in order
    pub fn messages(&self, service: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.service == service)
            .map(|e| e.message.clone())
            .collect()
    }
}

impl ProgressSink for InMemoryProgress {
    fn notify(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Forwards notifications to `tracing` at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn notify(&self, event: ProgressEvent) {
        info!(service = %event.service, stage = %event.stage, "{}", event.message);
    }
}
