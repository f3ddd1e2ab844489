//! Static site rollout
//!
//! Builds are uploaded ahead of time to `builds/<tag>/` in the service's
//! bucket. Deploying copies one of them over `current/`, records the live
//! and replaced tags in marker objects, and invalidates the CDN. The markers
//! are the only history, so rollback needs nothing beyond them.

use async_trait::async_trait;
use hoist_core::config::{Binding, FleetConfig};
use hoist_core::domain::deploy::DeployRecord;
use hoist_remote::bucket::{BUILDS_PREFIX, s3_url};
use hoist_remote::{RemoteError, StaticStore};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{DeployError, DeployRequest, Rollout, stage_failure};
use crate::progress::{ProgressSink, ServiceProgress, Stage};

/// Marker naming the live build
pub const CURRENT_MARKER: &str = "current-tag";
/// Marker naming the build the live one replaced
pub const PREVIOUS_MARKER: &str = "previous-tag";

const CURRENT_PREFIX: &str = "current/";
const INVALIDATE_ALL: &str = "/*";

/// Concurrent object copies per deploy
const COPY_WORKERS: usize = 20;

pub struct StaticRollout {
    fleet: Arc<FleetConfig>,
    store: Arc<dyn StaticStore>,
}

impl StaticRollout {
    pub fn new(fleet: Arc<FleetConfig>, store: Arc<dyn StaticStore>) -> Self {
        Self { fleet, store }
    }

    async fn publish(
        &self,
        binding: &Binding<'_>,
        request: &DeployRequest,
        progress: &ServiceProgress<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let bucket = binding.target.bucket.as_str();
        let distribution = binding.target.cloudfront.as_str();

        if !request.previous.is_empty() {
            progress.emit(
                Stage::Publish,
                format!(
                    "writing previous-tag marker ({}) to {}",
                    request.previous,
                    s3_url(bucket, PREVIOUS_MARKER)
                ),
            );
            guarded(
                cancel,
                "writing previous-tag marker",
                self.store.put_marker(bucket, PREVIOUS_MARKER, &request.previous),
            )
            .await?;
        }

        let build_prefix = format!("{}{}/", BUILDS_PREFIX, request.tag);
        let build_url = s3_url(bucket, &build_prefix);
        progress.emit(Stage::Publish, format!("listing build objects in {}", build_url));
        let keys = guarded(
            cancel,
            &format!("listing build objects in {}", build_url),
            self.store.list_objects(bucket, &build_prefix),
        )
        .await?;
        if keys.is_empty() {
            return Err(DeployError::BuildNotFound(build_url));
        }

        progress.emit(
            Stage::Publish,
            format!("copying {} objects from {} to {}", keys.len(), build_prefix, CURRENT_PREFIX),
        );
        cancel
            .run_until_cancelled(self.copy_build(bucket, &build_prefix, keys))
            .await
            .unwrap_or(Err(DeployError::Cancelled))?;
        progress.emit(Stage::Publish, "objects copied");

        progress.emit(
            Stage::Publish,
            format!(
                "writing current-tag marker ({}) to {}",
                request.tag,
                s3_url(bucket, CURRENT_MARKER)
            ),
        );
        guarded(
            cancel,
            "writing current-tag marker",
            self.store.put_marker(bucket, CURRENT_MARKER, &request.tag),
        )
        .await?;

        progress.emit(Stage::Invalidate, format!("invalidating distribution {}", distribution));
        guarded(
            cancel,
            &format!("invalidating distribution {}", distribution),
            self.store.invalidate(distribution, &[INVALIDATE_ALL]),
        )
        .await?;
        progress.emit(Stage::Invalidate, "invalidation created");

        info!(service = %binding.service, bucket = %bucket, tag = %request.tag, "Static site published");
        Ok(())
    }

    /// Copies every key under `source_prefix` to the same relative path under
    /// `current/`; the first failure is returned once all copies settle
    async fn copy_build(&self, bucket: &str, source_prefix: &str, keys: Vec<String>) -> Result<(), DeployError> {
        let permits = Arc::new(Semaphore::new(COPY_WORKERS));
        let mut tasks = JoinSet::new();

        for key in keys {
            let target = format!(
                "{}{}",
                CURRENT_PREFIX,
                key.strip_prefix(source_prefix).unwrap_or(&key)
            );
            let store = Arc::clone(&self.store);
            let permits = Arc::clone(&permits);
            let bucket = bucket.to_string();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                match store.copy_object(&bucket, &key, &target).await {
                    Ok(()) => Ok(()),
                    Err(source) => Err(stage_failure(source, |source| DeployError::Store {
                        action: format!("copying {} to {}", s3_url(&bucket, &key), s3_url(&bucket, &target)),
                        source,
                    })),
                }
            });
        }

        let mut first = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => DeployError::Task(e.to_string()),
            };
            first.get_or_insert(failure);
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn marker(
        &self,
        service: &str,
        env: &str,
        key: &'static str,
        cancel: &CancellationToken,
    ) -> Result<DeployRecord, DeployError> {
        let binding = self.fleet.binding(service, env)?;
        let bucket = binding.target.bucket.as_str();

        let value = guarded(
            cancel,
            &format!("reading {}", s3_url(bucket, key)),
            self.store.get_marker(bucket, key),
        )
        .await?;

        let mut record = DeployRecord::empty(service, env);
        record.tag = value.unwrap_or_default();
        Ok(record)
    }
}

/// Awaits one store call, naming `action` on failure
///
/// The call is never polled once `cancel` has fired.
async fn guarded<T>(
    cancel: &CancellationToken,
    action: &str,
    call: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, DeployError> {
    match cancel.run_until_cancelled(call).await {
        Some(Ok(value)) => Ok(value),
        Some(Err(source)) => Err(stage_failure(source, |source| DeployError::Store {
            action: action.to_string(),
            source,
        })),
        None => Err(DeployError::Cancelled),
    }
}

#[async_trait]
impl Rollout for StaticRollout {
    async fn deploy(
        &self,
        request: &DeployRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let progress = ServiceProgress::new(progress, &request.service);
        let binding = self.fleet.binding(&request.service, &request.env)?;
        self.publish(&binding, request, &progress, cancel).await
    }

    async fn current(&self, service: &str, env: &str, cancel: &CancellationToken) -> Result<DeployRecord, DeployError> {
        self.marker(service, env, CURRENT_MARKER, cancel).await
    }

    async fn previous(&self, service: &str, env: &str, cancel: &CancellationToken) -> Result<DeployRecord, DeployError> {
        self.marker(service, env, PREVIOUS_MARKER, cancel).await
    }
}
