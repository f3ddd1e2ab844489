//! Health poller
//!
//! Probes a freshly started container until it answers, the timeout elapses,
//! or the caller cancels. The first probe is issued immediately; later ones
//! follow a fixed-interval ticker.
//!
//! Probes address the container directly (its bridge-network IP), never the
//! public host name: during a blue-green swap the router may still send
//! traffic to the outgoing instance.

use hoist_remote::{RemoteChannel, RemoteError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EngineConfig;
use crate::docker;

/// Why a container never became healthy
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("getting container IP for {container}: {source}")]
    Target {
        container: String,
        #[source]
        source: RemoteError,
    },
}

/// Shortest gap between probes; tokio's ticker rejects a zero period
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed-interval health poller
#[derive(Debug, Clone, Copy)]
pub struct HealthPoller {
    interval: Duration,
    timeout: Duration,
}

impl HealthPoller {
    /// Intervals below 100ms are raised to 100ms
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.health_interval, config.health_timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves the container's private address once, then polls its
    /// health endpoint
    ///
    /// Returns the number of probes issued.
    pub async fn wait_healthy(
        &self,
        channel: &dyn RemoteChannel,
        container: &str,
        port: u16,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<u32, HealthError> {
        let ip = channel
            .run(&docker::inspect_ip(container))
            .await
            .map_err(|source| match source {
                RemoteError::Cancelled => HealthError::Cancelled,
                source => HealthError::Target {
                    container: container.to_string(),
                    source,
                },
            })?;

        self.poll(channel, &docker::health_probe(ip.trim(), port, path), cancel)
            .await
    }

    /// Runs `probe` until it succeeds
    ///
    /// Probe failures are swallowed and retried. Returns the number of
    /// probes issued.
    pub async fn poll(
        &self,
        channel: &dyn RemoteChannel,
        probe: &str,
        cancel: &CancellationToken,
    ) -> Result<u32, HealthError> {
        let deadline = time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts = 0;
        loop {
            attempts += 1;

            let healthy = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HealthError::Cancelled),
                _ = &mut deadline => return Err(HealthError::TimedOut(self.timeout)),
                result = channel.run(probe) => match result {
                    Ok(_) => true,
                    Err(RemoteError::Cancelled) => return Err(HealthError::Cancelled),
                    Err(e) => {
                        debug!(attempt = attempts, "Health probe failed: {}", e);
                        false
                    }
                },
            };

            if healthy {
                return Ok(attempts);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HealthError::Cancelled),
                _ = &mut deadline => return Err(HealthError::TimedOut(self.timeout)),
                _ = ticker.tick() => {}
            }
        }
    }
}
