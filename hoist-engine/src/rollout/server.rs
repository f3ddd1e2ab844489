//! Blue-green rollout of long-running server containers
//!
//! The new container starts next to the old one and is probed on its private
//! address. Only once it answers are the older containers of the service
//! stopped and removed. A failure before that point removes the new
//! container and leaves the old one serving.

use async_trait::async_trait;
use hoist_core::config::{Binding, FleetConfig};
use hoist_core::domain::deploy::DeployRecord;
use hoist_remote::{Dialer, RemoteChannel, RemoteError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    DeployError, DeployRequest, Rollout, connect, disconnect, history_failure, node_address,
    stage_failure,
};
use crate::cleanup::Cleanup;
use crate::docker::{self, ServerLaunch};
use crate::health::{HealthError, HealthPoller};
use crate::progress::{ProgressSink, ServiceProgress, Stage};

pub struct ServerRollout {
    fleet: Arc<FleetConfig>,
    dialer: Arc<dyn Dialer>,
    poller: HealthPoller,
}

impl ServerRollout {
    pub fn new(fleet: Arc<FleetConfig>, dialer: Arc<dyn Dialer>, poller: HealthPoller) -> Self {
        Self {
            fleet,
            dialer,
            poller,
        }
    }

    async fn swap(
        &self,
        channel: &dyn RemoteChannel,
        binding: &Binding<'_>,
        request: &DeployRequest,
        progress: &ServiceProgress<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let service = binding.service;
        let config = binding.config;
        let tag = request.tag.as_str();

        let pull = docker::pull(&config.image, tag);
        progress.emit(Stage::Pull, format!("$ {}", pull));
        channel.run(&pull).await.map_err(|source| {
            stage_failure(source, |source| DeployError::Pull {
                image: format!("{}:{}", config.image, tag),
                source,
            })
        })?;
        progress.emit(Stage::Pull, "image pulled");

        let name = docker::container_name(service, tag);
        let parked = self.park(channel, request, &name, progress).await?;

        let launch = ServerLaunch {
            project: &self.fleet.project,
            service,
            env: binding.env,
            image: &config.image,
            tag,
            previous: &request.previous,
            env_file: &binding.target.env_file,
            host: &binding.target.host,
            port: config.port,
            command: &config.command,
        };
        progress.emit(Stage::Start, format!("$ docker run --name {} ...", name));
        if let Err(source) = channel.run(&docker::run_server(&launch)).await {
            // a container that failed to start may still hold the name
            Cleanup::attempt(channel, format!("docker rm -f {}", name), &docker::force_remove(&name))
                .await
                .report(progress);
            restore(channel, parked.as_deref(), &name, progress).await;
            return Err(stage_failure(source, |source| DeployError::Start {
                container: name.clone(),
                source,
            }));
        }
        progress.emit(Stage::Start, "container started");
        info!(service = %service, container = %name, "Container started");

        progress.emit(
            Stage::HealthCheck,
            format!(
                "waiting for healthcheck (:{}{}, timeout {}s)",
                config.port,
                config.healthcheck,
                self.poller.timeout().as_secs()
            ),
        );
        let health = self
            .poller
            .wait_healthy(channel, &name, config.port, &config.healthcheck, cancel)
            .await;
        if let Err(e) = health {
            progress.emit(Stage::HealthCheck, "healthcheck failed, cleaning up new container");
            let stopped = Cleanup::attempt(channel, format!("docker stop {}", name), &docker::stop(&name)).await;
            if stopped.report(progress) {
                Cleanup::attempt(channel, format!("docker rm {}", name), &docker::remove(&name))
                    .await
                    .report(progress);
            }
            restore(channel, parked.as_deref(), &name, progress).await;
            return Err(match e {
                HealthError::Cancelled => DeployError::Cancelled,
                e => DeployError::Health(e),
            });
        }
        progress.emit(Stage::HealthCheck, "healthcheck passed");

        self.decommission(channel, service, &name, progress).await;
        Ok(())
    }

    /// Moves a container holding the target name aside
    ///
    /// Needed when redeploying the running tag, and when reverting a failed
    /// deploy whose old container is still serving.
    async fn park(
        &self,
        channel: &dyn RemoteChannel,
        request: &DeployRequest,
        name: &str,
        progress: &ServiceProgress<'_>,
    ) -> Result<Option<String>, DeployError> {
        let redeploy = !request.previous.is_empty() && request.tag == request.previous;
        let taken = redeploy
            || list_containers(channel, &request.service)
                .await
                .map_err(|e| history_failure("containers", channel.address(), e))?
                .iter()
                .any(|existing| existing == name);

        if !taken {
            return Ok(None);
        }

        let parked = docker::parked_name(&request.service, &request.tag);
        let rename = docker::rename(name, &parked);
        progress.emit(Stage::Rename, format!("$ {}", rename));
        channel.run(&rename).await.map_err(|source| {
            stage_failure(source, |source| DeployError::Rename {
                from: name.to_string(),
                to: parked.clone(),
                source,
            })
        })?;

        Ok(Some(parked))
    }

    /// Stops and removes every container of the service except `keep`
    ///
    /// Failures are reported as warnings; the new container is already
    /// healthy at this point.
    async fn decommission(
        &self,
        channel: &dyn RemoteChannel,
        service: &str,
        keep: &str,
        progress: &ServiceProgress<'_>,
    ) {
        let names = match list_containers(channel, service).await {
            Ok(names) => names,
            Err(e) => {
                warn!(service = %service, "Failed to list old containers: {}", e);
                progress.emit(
                    Stage::Decommission,
                    format!("warning: failed to list old containers: {}", e),
                );
                return;
            }
        };

        let mut removed = 0;
        for name in names.iter().filter(|name| name.as_str() != keep) {
            progress.emit(Stage::Decommission, format!("$ docker stop {}", name));
            let stopped = Cleanup::attempt(channel, format!("docker stop {}", name), &docker::stop(name)).await;
            if !stopped.report(progress) {
                continue;
            }

            progress.emit(Stage::Decommission, format!("$ docker rm {}", name));
            let rm = Cleanup::attempt(channel, format!("docker rm {}", name), &docker::remove(name)).await;
            if rm.report(progress) {
                removed += 1;
            }
        }

        if removed > 0 {
            progress.emit(Stage::Decommission, format!("removed {} old container(s)", removed));
        }
    }
}

/// Gives a parked container its name back after a failed start
async fn restore(channel: &dyn RemoteChannel, parked: Option<&str>, name: &str, progress: &ServiceProgress<'_>) {
    if let Some(parked) = parked {
        Cleanup::attempt(
            channel,
            format!("docker rename {} {}", parked, name),
            &docker::rename(parked, name),
        )
        .await
        .report(progress);
    }
}

/// Names of this service's containers, in any state
async fn list_containers(channel: &dyn RemoteChannel, service: &str) -> Result<Vec<String>, RemoteError> {
    let output = channel.run(&docker::list_containers(service)).await?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|name| docker::container_tag(service, name).is_some())
        .map(str::to_string)
        .collect())
}

/// The running, non-parked container of a service: name, tag and uptime
async fn running_container(
    channel: &dyn RemoteChannel,
    service: &str,
) -> Result<Option<(String, String, Duration)>, RemoteError> {
    let output = channel.run(&docker::list_running(service)).await?;

    Ok(output.lines().find_map(|line| {
        let (name, status) = line.split_once('\t').unwrap_or((line, ""));
        let name = name.trim();
        if name.ends_with(docker::PARKED_SUFFIX) {
            return None;
        }
        let tag = docker::container_tag(service, name)?;
        Some((name.to_string(), tag, docker::parse_uptime(status)))
    }))
}

#[async_trait]
impl Rollout for ServerRollout {
    async fn deploy(
        &self,
        request: &DeployRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let progress = ServiceProgress::new(progress, &request.service);
        let binding = self.fleet.binding(&request.service, &request.env)?;
        let address = node_address(&binding)?;

        progress.emit(
            Stage::Connect,
            format!("connecting to {} ({})", binding.target.node, address),
        );
        let channel = connect(self.dialer.as_ref(), address, cancel).await?;

        let result = self
            .swap(channel.as_ref(), &binding, request, &progress, cancel)
            .await;
        disconnect(channel).await;
        result
    }

    async fn current(&self, service: &str, env: &str, cancel: &CancellationToken) -> Result<DeployRecord, DeployError> {
        let binding = self.fleet.binding(service, env)?;
        let address = node_address(&binding)?;
        let channel = connect(self.dialer.as_ref(), address, cancel).await?;

        let running = running_container(channel.as_ref(), service).await;
        disconnect(channel).await;

        let mut record = DeployRecord::empty(service, env);
        if let Some((_, tag, uptime)) = running.map_err(|e| history_failure("running containers", address, e))? {
            record.tag = tag;
            record.running_for = uptime;
        }
        Ok(record)
    }

    async fn previous(&self, service: &str, env: &str, cancel: &CancellationToken) -> Result<DeployRecord, DeployError> {
        let binding = self.fleet.binding(service, env)?;
        let address = node_address(&binding)?;
        let channel = connect(self.dialer.as_ref(), address, cancel).await?;

        let label = async {
            let Some((name, _, _)) = running_container(channel.as_ref(), service).await? else {
                return Ok(String::new());
            };
            let value = channel
                .run(&docker::inspect_label(&name, docker::PREVIOUS_LABEL))
                .await?;
            Ok::<_, RemoteError>(value)
        }
        .await;
        disconnect(channel).await;

        let label = label.map_err(|e| history_failure("previous tag label", address, e))?;
        let mut record = DeployRecord::empty(service, env);
        let label = label.trim();
        // `index` renders a missing key as "<no value>"
        if !label.is_empty() && label != "<no value>" {
            record.tag = label.to_string();
        }
        Ok(record)
    }
}
