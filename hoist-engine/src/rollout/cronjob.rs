//! Scheduled-job rollout
//!
//! A job is one block in a scheduler document shared with other services.
//! Deploying rewrites that block and writes the whole document back. The
//! write is a compare-and-swap against the document as it was read, so two
//! concurrent deploys to the same document cannot silently drop each other's
//! blocks.

use async_trait::async_trait;
use chrono::Utc;
use hoist_core::config::{Binding, FleetConfig};
use hoist_core::crontab::{self, CronBlock};
use hoist_core::domain::deploy::DeployRecord;
use hoist_remote::{Dialer, RemoteChannel, RemoteError, shell_quote};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{DeployError, DeployRequest, Rollout, connect, disconnect, node_address, stage_failure};
use crate::docker::{self, CronLaunch};
use crate::progress::{ProgressSink, ServiceProgress, Stage};

/// Exit status of the write command when the document changed underneath it
const EX_TEMPFAIL: i32 = 75;

pub struct CronjobRollout {
    fleet: Arc<FleetConfig>,
    dialer: Arc<dyn Dialer>,
}

impl CronjobRollout {
    pub fn new(fleet: Arc<FleetConfig>, dialer: Arc<dyn Dialer>) -> Self {
        Self { fleet, dialer }
    }

    async fn install(
        &self,
        channel: &dyn RemoteChannel,
        binding: &Binding<'_>,
        request: &DeployRequest,
        progress: &ServiceProgress<'_>,
    ) -> Result<(), DeployError> {
        let config = binding.config;
        let path = binding.target.cronfile.as_str();
        let id = crontab::block_id(binding.service, binding.env);

        let pull = docker::pull(&config.image, &request.tag);
        progress.emit(Stage::Pull, format!("$ {}", pull));
        channel.run(&pull).await.map_err(|source| {
            stage_failure(source, |source| DeployError::Pull {
                image: format!("{}:{}", config.image, request.tag),
                source,
            })
        })?;
        progress.emit(Stage::Pull, "image pulled");

        progress.emit(Stage::ReadSchedule, format!("reading {}", path));
        let document = read_document(channel, path).await?;

        let previous = if request.previous.is_empty() {
            match crontab::extract_block(&document, &id) {
                Some(interior) => CronBlock::parse(&id, interior)?.tag,
                None => String::new(),
            }
        } else {
            request.previous.clone()
        };

        let block = CronBlock {
            id: id.clone(),
            tag: request.tag.clone(),
            previous,
            entry: docker::cron_entry(&CronLaunch {
                project: &self.fleet.project,
                service: binding.service,
                env: binding.env,
                image: &config.image,
                tag: &request.tag,
                schedule: &config.schedule,
                env_file: &binding.target.env_file,
                command: &config.command,
            }),
        };

        let mut updated = crontab::replace_block(&document, &id, &block.render());
        if !updated.ends_with('\n') {
            updated.push('\n');
        }

        progress.emit(Stage::WriteSchedule, format!("writing {} (block {})", path, id));
        let write = swap_command(path, &document, &updated);
        channel.run(&write).await.map_err(|source| {
            if source.exit_code() == Some(EX_TEMPFAIL) {
                DeployError::ConcurrentModification {
                    path: path.to_string(),
                }
            } else {
                stage_failure(source, |source| DeployError::WriteSchedule {
                    path: path.to_string(),
                    source,
                })
            }
        })?;

        progress.emit(Stage::WriteSchedule, "cronfile updated");
        info!(service = %binding.service, path = %path, tag = %request.tag, "Schedule installed");
        Ok(())
    }

    /// The service's block in its scheduler document, if any
    async fn block(
        &self,
        service: &str,
        env: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<(CronBlock, Box<dyn RemoteChannel>)>, DeployError> {
        let binding = self.fleet.binding(service, env)?;
        let address = node_address(&binding)?;
        let channel = connect(self.dialer.as_ref(), address, cancel).await?;

        let document = match read_document(channel.as_ref(), &binding.target.cronfile).await {
            Ok(document) => document,
            Err(e) => {
                disconnect(channel).await;
                return Err(e);
            }
        };

        let id = crontab::block_id(service, env);
        let parsed = crontab::extract_block(&document, &id)
            .map(|interior| CronBlock::parse(&id, interior))
            .transpose();

        match parsed {
            Ok(Some(block)) => Ok(Some((block, channel))),
            Ok(None) => {
                disconnect(channel).await;
                Ok(None)
            }
            Err(e) => {
                disconnect(channel).await;
                Err(e.into())
            }
        }
    }
}

/// Reads the scheduler document
///
/// A missing document reads as empty: the first deploy creates it. Any
/// other failure (permissions, a dropped connection) is an error.
async fn read_document(channel: &dyn RemoteChannel, path: &str) -> Result<String, DeployError> {
    channel.run(&read_command(path)).await.map_err(|source| {
        stage_failure(source, |source| DeployError::ReadSchedule {
            path: path.to_string(),
            source,
        })
    })
}

fn read_command(path: &str) -> String {
    let file = shell_quote(path);
    format!("if [ -e {file} ]; then cat {file}; fi", file = file)
}

/// Hex SHA-256 of a document as the remote shell sees it
///
/// Both sides drop trailing newlines: the channel trims command output and
/// the remote hash runs over a command substitution.
fn document_hash(document: &str) -> String {
    hex::encode(Sha256::digest(document.trim_end_matches('\n').as_bytes()))
}

/// Replaces `path` with `content` unless it no longer matches `expected`
///
/// The content goes to a temporary file next to the document and is renamed
/// over it. A changed document exits with [`EX_TEMPFAIL`].
fn swap_command(path: &str, expected: &str, content: &str) -> String {
    let file = shell_quote(path);
    let tmp = shell_quote(&format!("{}.hoist-{}", path, Uuid::new_v4().simple()));

    format!(
        "expected={hash}; \
         current=$(printf '%s' \"$(cat {file} 2>/dev/null)\" | sha256sum | cut -d' ' -f1); \
         if [ \"$current\" != \"$expected\" ]; then exit {code}; fi; \
         tmp={tmp}; \
         printf '%s' {content} > \"$tmp\" && chmod 644 \"$tmp\" && mv \"$tmp\" {file}",
        hash = document_hash(expected),
        file = file,
        code = EX_TEMPFAIL,
        tmp = tmp,
        content = shell_quote(content),
    )
}

#[async_trait]
impl Rollout for CronjobRollout {
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

        let result = self.install(channel.as_ref(), &binding, request, &progress).await;
        disconnect(channel).await;
        result
    }

    async fn current(&self, service: &str, env: &str, cancel: &CancellationToken) -> Result<DeployRecord, DeployError> {
        let mut record = DeployRecord::empty(service, env);
        let Some((block, channel)) = self.block(service, env, cancel).await? else {
            return Ok(record);
        };
        record.tag = block.tag;

        let container = docker::job_container_name(service, env);
        let finish = channel.run(&docker::inspect_finish(&container)).await;
        disconnect(channel).await;

        match finish {
            Ok(output) => {
                if let Some((since, code)) = docker::parse_finish_info(&output, Utc::now()) {
                    record.running_for = since;
                    record.last_exit_code = Some(code);
                }
            }
            Err(RemoteError::Cancelled) => return Err(DeployError::Cancelled),
            // the job has not run yet
            Err(e) => debug!(container = %container, "No finished run: {}", e),
        }

        Ok(record)
    }

    async fn previous(&self, service: &str, env: &str, cancel: &CancellationToken) -> Result<DeployRecord, DeployError> {
        let mut record = DeployRecord::empty(service, env);
        if let Some((block, channel)) = self.block(service, env, cancel).await? {
            disconnect(channel).await;
            record.tag = block.previous;
        }
        Ok(record)
    }
}
