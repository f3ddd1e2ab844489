//! Multi-service orchestrator
//!
//! Runs one rollout per service concurrently and aggregates the outcomes.
//! Services never affect each other: a failure is recorded and the others
//! run to completion. Whether failures are rolled back is the caller's
//! decision, taken through [`Orchestrator::deploy_with_rollback`].

use hoist_core::config::{ConfigError, FleetConfig};
use hoist_core::domain::deploy::DeployRecord;
use hoist_core::domain::rollout::{RollbackScope, RolloutOutcome};
use hoist_core::domain::service::BackendKind;
use hoist_core::dto::event::{DeployEvent, EventContext};
use hoist_remote::{Dialer, StaticStore, WebhookNotifier};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::health::HealthPoller;
use crate::progress::{ProgressSink, ServiceProgress, Stage};
use crate::rollout::{CronjobRollout, DeployError, DeployRequest, Rollout, ServerRollout, StaticRollout};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("getting current deploy for {service}: {source}")]
    Current {
        service: String,
        #[source]
        source: DeployError,
    },

    #[error("getting previous deploy for {service}: {source}")]
    Previous {
        service: String,
        #[source]
        source: DeployError,
    },

    #[error("rollback failed for: {}", .services.join(", "))]
    RollbackFailed {
        services: Vec<String>,
        report: Box<RunReport>,
    },
}

/// Services to deploy and the tag pair of each
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutPlan {
    pub env: String,
    pub services: Vec<String>,
    /// Tag each service is deployed to
    pub tags: HashMap<String, String>,
    /// Tag each service currently runs; missing or empty on first deploy
    pub previous: HashMap<String, String>,
}

impl RolloutPlan {
    /// A plan deploying the same build to every service
    pub fn uniform(env: &str, services: Vec<String>, tag: &str, previous: HashMap<String, String>) -> Self {
        let tags = services
            .iter()
            .map(|service| (service.clone(), tag.to_string()))
            .collect();
        Self {
            env: env.to_string(),
            services,
            tags,
            previous,
        }
    }

    pub fn request(&self, service: &str) -> DeployRequest {
        let lookup = |map: &HashMap<String, String>| map.get(service).cloned().unwrap_or_default();
        DeployRequest {
            service: service.to_string(),
            env: self.env.clone(),
            tag: lookup(&self.tags),
            previous: lookup(&self.previous),
        }
    }
}

/// Aggregated outcome of one run
#[derive(Debug, Default)]
pub struct RolloutResult {
    /// One outcome per service, in plan order
    pub outcomes: Vec<RolloutOutcome>,
    /// Failed services, in plan order
    pub failed: Vec<String>,
    pub errors: HashMap<String, DeployError>,
}

impl RolloutResult {
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Services selected for a rollback pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackPlan {
    /// Swapped tag pairs of the services that can be reverted
    pub targets: RolloutPlan,
    /// Selected services with nothing to revert to
    pub skipped: Vec<String>,
}

/// Everything a deploy (and its rollback, if any) did
#[derive(Debug, Default)]
pub struct RunReport {
    pub result: RolloutResult,
    pub rollback: Option<RolloutResult>,
    pub skipped: Vec<String>,
}

/// Selects and swaps the services a rollback pass reverts
///
/// Services without a previous tag are skipped: nothing was running before.
pub fn plan_rollback(plan: &RolloutPlan, result: &RolloutResult, scope: RollbackScope) -> RollbackPlan {
    let selected: &[String] = match scope {
        RollbackScope::All => &plan.services,
        RollbackScope::Failed => &result.failed,
        RollbackScope::None => &[],
    };

    let mut rollback = RollbackPlan {
        targets: RolloutPlan {
            env: plan.env.clone(),
            ..RolloutPlan::default()
        },
        skipped: Vec::new(),
    };

    for service in selected {
        let request = plan.request(service);
        if request.is_first_deploy() {
            rollback.skipped.push(service.clone());
            continue;
        }

        let reverted = request.reversed();
        rollback.targets.services.push(service.clone());
        rollback.targets.tags.insert(service.clone(), reverted.tag);
        rollback.targets.previous.insert(service.clone(), reverted.previous);
    }

    rollback
}

/// Runs rollouts across services
pub struct Orchestrator {
    fleet: Arc<FleetConfig>,
    rollouts: HashMap<BackendKind, Arc<dyn Rollout>>,
    progress: Arc<dyn ProgressSink>,
    notifier: Option<WebhookNotifier>,
    user: String,
    hooks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Creates an orchestrator with no backends registered
    pub fn new(fleet: Arc<FleetConfig>, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            fleet,
            rollouts: HashMap::new(),
            progress,
            notifier: None,
            user: String::new(),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Server and cronjob backends over `dialer`, the static backend over
    /// `store`, plus the post-deploy hook when the fleet configures one
    pub fn standard(
        fleet: Arc<FleetConfig>,
        dialer: Arc<dyn Dialer>,
        store: Arc<dyn StaticStore>,
        config: &EngineConfig,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let server = ServerRollout::new(
            Arc::clone(&fleet),
            Arc::clone(&dialer),
            HealthPoller::from_config(config),
        );
        let cronjob = CronjobRollout::new(Arc::clone(&fleet), dialer);
        let site = StaticRollout::new(Arc::clone(&fleet), store);
        let hook = fleet.hooks.post_deploy.clone();

        let mut orchestrator = Self::new(fleet, progress)
            .with_rollout(BackendKind::Server, Arc::new(server))
            .with_rollout(BackendKind::Static, Arc::new(site))
            .with_rollout(BackendKind::Cronjob, Arc::new(cronjob));
        if let Some(url) = hook.filter(|url| !url.is_empty()) {
            orchestrator = orchestrator.with_notifier(WebhookNotifier::new(url, config.hook_timeout));
        }
        orchestrator
    }

    pub fn with_rollout(mut self, kind: BackendKind, rollout: Arc<dyn Rollout>) -> Self {
        self.rollouts.insert(kind, rollout);
        self
    }

    pub fn with_notifier(mut self, notifier: WebhookNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Name reported as the deploying user in webhook events
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    fn rollout_for(&self, service: &str) -> Result<Arc<dyn Rollout>, DeployError> {
        let config = self
            .fleet
            .services
            .get(service)
            .ok_or_else(|| ConfigError::UnknownService(service.to_string()))?;

        self.rollouts
            .get(&config.kind)
            .cloned()
            .ok_or(DeployError::UnsupportedBackend(config.kind))
    }

    /// Deploys every service of the plan concurrently and waits for all
    pub async fn run_all(&self, plan: &RolloutPlan, cancel: &CancellationToken) -> RolloutResult {
        let run_id = Uuid::new_v4();
        let span = info_span!("rollout", run_id = %run_id, env = %plan.env);
        info!(parent: &span, services = plan.services.len(), "Starting rollout");

        let mut handles = Vec::with_capacity(plan.services.len());
        for service in &plan.services {
            let request = plan.request(service);
            let rollout = self.rollout_for(service);
            let progress = Arc::clone(&self.progress);
            let cancel = cancel.clone();
            let service_span = info_span!(parent: &span, "service", service = %service);

            let handle = tokio::spawn(
                async move {
                    let notes = ServiceProgress::new(progress.as_ref(), &request.service);
                    let from = if request.previous.is_empty() {
                        "(none)"
                    } else {
                        request.previous.as_str()
                    };
                    notes.emit(
                        Stage::Rollout,
                        format!("deploying {} -> {} (env={})", from, request.tag, request.env),
                    );

                    let result = match rollout {
                        Ok(rollout) => rollout.deploy(&request, progress.as_ref(), &cancel).await,
                        Err(e) => Err(e),
                    };

                    match &result {
                        Ok(()) => {
                            info!("Rollout succeeded");
                            notes.emit(Stage::Rollout, "done");
                        }
                        Err(e) => {
                            error!("Rollout failed: {}", e);
                            notes.emit(Stage::Rollout, format!("FAILED: {}", e));
                        }
                    }
                    result
                }
                .instrument(service_span),
            );
            handles.push((service.clone(), handle));
        }

        let mut result = RolloutResult::default();
        for (service, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(DeployError::Task(e.to_string())));

            match outcome {
                Ok(()) => result.outcomes.push(RolloutOutcome::success(&service)),
                Err(e) => {
                    result.outcomes.push(RolloutOutcome::failure(&service, e.to_string()));
                    result.failed.push(service.clone());
                    result.errors.insert(service, e);
                }
            }
        }

        info!(parent: &span, failed = result.failed.len(), "Rollout finished");
        result
    }

    /// Tags currently deployed, per service; empty for first deploys
    pub async fn gather_previous_tags(
        &self,
        services: &[String],
        env: &str,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>, OrchestratorError> {
        let current = self.query(services, env, History::Current, cancel).await?;
        Ok(current
            .into_iter()
            .map(|(service, record)| (service, record.tag))
            .collect())
    }

    /// Plans a standalone rollback to each service's previous deploy
    pub async fn resolve_rollback_targets(
        &self,
        services: &[String],
        env: &str,
        cancel: &CancellationToken,
    ) -> Result<RollbackPlan, OrchestratorError> {
        let mut previous = self.query(services, env, History::Previous, cancel).await?;
        let mut current = self.query(services, env, History::Current, cancel).await?;

        let mut plan = RollbackPlan {
            targets: RolloutPlan {
                env: env.to_string(),
                ..RolloutPlan::default()
            },
            skipped: Vec::new(),
        };

        for service in services {
            let target = previous.remove(service).unwrap_or_default();
            if target.is_empty() {
                plan.skipped.push(service.clone());
                continue;
            }

            let running = current.remove(service).unwrap_or_default();
            plan.targets.services.push(service.clone());
            plan.targets.tags.insert(service.clone(), target.tag);
            plan.targets.previous.insert(service.clone(), running.tag);
        }

        Ok(plan)
    }

    /// Queries one history record per service concurrently
    async fn query(
        &self,
        services: &[String],
        env: &str,
        which: History,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, DeployRecord>, OrchestratorError> {
        let mut tasks = JoinSet::new();
        for service in services {
            let rollout = self.rollout_for(service);
            let service = service.clone();
            let env = env.to_string();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let record = match rollout {
                    Ok(rollout) => match which {
                        History::Current => rollout.current(&service, &env, &cancel).await,
                        History::Previous => rollout.previous(&service, &env, &cancel).await,
                    },
                    Err(e) => Err(e),
                };
                (service, record)
            });
        }

        let mut records = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (service, record) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    return Err(which.error("(unknown)".to_string(), DeployError::Task(e.to_string())));
                }
            };
            match record {
                Ok(record) => {
                    records.insert(service, record);
                }
                Err(DeployError::UnsupportedBackend(kind)) => {
                    // nothing to ask: treated as never deployed
                    warn!(service = %service, "No history available for {} services", kind);
                }
                Err(e) => return Err(which.error(service, e)),
            }
        }

        Ok(records)
    }

    /// Deploys the plan and, if anything failed, rolls back what `decide`
    /// selects
    ///
    /// `decide` is only consulted when a service failed and the run was not
    /// cancelled. A failing rollback pass is an error.
    pub async fn deploy_with_rollback(
        &self,
        plan: &RolloutPlan,
        decide: impl FnOnce(&RolloutResult) -> RollbackScope,
        cancel: &CancellationToken,
    ) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        let result = self.run_all(plan, cancel).await;
        self.notify(plan, &result, started.elapsed(), false);

        if result.succeeded() || cancel.is_cancelled() {
            return Ok(RunReport {
                result,
                ..RunReport::default()
            });
        }

        let scope = decide(&result);
        let rollback = plan_rollback(plan, &result, scope);
        let mut report = RunReport {
            result,
            rollback: None,
            skipped: rollback.skipped,
        };
        if rollback.targets.services.is_empty() {
            return Ok(report);
        }

        info!(scope = ?scope, services = rollback.targets.services.len(), "Rolling back");
        let reverted = self.run_rollback(&rollback.targets, cancel).await;
        let failed = reverted.failed.clone();
        report.rollback = Some(reverted);

        if failed.is_empty() {
            Ok(report)
        } else {
            Err(OrchestratorError::RollbackFailed {
                services: failed,
                report: Box::new(report),
            })
        }
    }

    /// Runs a rollback pass and reports it to the webhook
    pub async fn run_rollback(&self, targets: &RolloutPlan, cancel: &CancellationToken) -> RolloutResult {
        let started = Instant::now();
        let result = self.run_all(targets, cancel).await;
        self.notify(targets, &result, started.elapsed(), true);
        result
    }

    fn notify(&self, plan: &RolloutPlan, result: &RolloutResult, elapsed: Duration, is_rollback: bool) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let ctx = EventContext {
            project: self.fleet.project.clone(),
            env: plan.env.clone(),
            user: self.user.clone(),
        };
        let event = DeployEvent::from_outcomes(&ctx, &result.outcomes, &plan.tags, &plan.previous, elapsed, is_rollback);
        let handle = notifier.fire(event);
        self.hooks.lock().unwrap().push(handle);
    }

    /// Waits for in-flight webhook deliveries
    pub async fn wait_for_hooks(&self) {
        let handles: Vec<JoinHandle<()>> = self.hooks.lock().unwrap().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Webhook task panicked: {}", e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum History {
    Current,
    Previous,
}

impl History {
    fn error(self, service: String, source: DeployError) -> OrchestratorError {
        match self {
            History::Current => OrchestratorError::Current { service, source },
            History::Previous => OrchestratorError::Previous { service, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::InMemoryProgress;
    use crate::testing::{MockHost, MockStore, fail};
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Rollout double: fails for chosen services, records every request
    #[derive(Default)]
    struct FakeRollout {
        failing: HashSet<String>,
        current: HashMap<String, String>,
        previous: HashMap<String, String>,
        requests: Mutex<Vec<DeployRequest>>,
    }

    impl FakeRollout {
        fn failing(services: &[&str]) -> Self {
            Self {
                failing: services.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        fn requests(&self) -> Vec<DeployRequest> {
            let mut requests = self.requests.lock().unwrap().clone();
            requests.sort_by(|a, b| a.service.cmp(&b.service));
            requests
        }
    }

    #[async_trait]
    impl Rollout for FakeRollout {
        async fn deploy(
            &self,
            request: &DeployRequest,
            progress: &dyn ProgressSink,
            _cancel: &CancellationToken,
        ) -> Result<(), DeployError> {
            self.requests.lock().unwrap().push(request.clone());
            ServiceProgress::new(progress, &request.service).emit(Stage::Pull, "image pulled");

            if self.failing.contains(&request.service) {
                Err(DeployError::Task(format!("{} exploded", request.service)))
            } else {
                Ok(())
            }
        }

        async fn current(&self, service: &str, env: &str, _: &CancellationToken) -> Result<DeployRecord, DeployError> {
            let mut record = DeployRecord::empty(service, env);
            record.tag = self.current.get(service).cloned().unwrap_or_default();
            Ok(record)
        }

        async fn previous(&self, service: &str, env: &str, _: &CancellationToken) -> Result<DeployRecord, DeployError> {
            let mut record = DeployRecord::empty(service, env);
            record.tag = self.previous.get(service).cloned().unwrap_or_default();
            Ok(record)
        }
    }

    fn fleet() -> Arc<FleetConfig> {
        let yaml = r#"
project: myapp
nodes: { web1: 10.0.0.1 }
services:
  api:
    type: server
    image: r/api
    port: 8080
    healthcheck: /health
    env: { prod: { node: web1, host: a, envfile: e } }
  web:
    type: server
    image: r/web
    port: 80
    healthcheck: /
    env: { prod: { node: web1, host: w, envfile: e } }
  worker:
    type: server
    image: r/worker
    port: 9000
    healthcheck: /ready
    env: { prod: { node: web1, host: k, envfile: e } }
  site:
    type: static
    env: { prod: { bucket: b, cloudfront: c } }
"#;
        Arc::new(FleetConfig::from_yaml(yaml).unwrap())
    }

    fn services(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn with_fake(rollout: Arc<FakeRollout>, progress: Arc<InMemoryProgress>) -> Orchestrator {
        Orchestrator::new(fleet(), progress).with_rollout(BackendKind::Server, rollout)
    }

    fn plan(previous: &[(&str, &str)]) -> RolloutPlan {
        RolloutPlan::uniform(
            "prod",
            services(&["api", "web", "worker"]),
            "main-abc1234-20260213110000",
            previous
                .iter()
                .map(|(s, t)| (s.to_string(), t.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_run_all_aggregates_partial_failure() {
        let rollout = Arc::new(FakeRollout::failing(&["web"]));
        let progress = Arc::new(InMemoryProgress::new());
        let orchestrator = with_fake(rollout.clone(), progress.clone());

        let result = orchestrator.run_all(&plan(&[]), &CancellationToken::new()).await;

        assert_eq!(result.failed, vec!["web"]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors["web"].to_string(), "deploy task failed: web exploded");
        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(result.outcomes[0], RolloutOutcome::success("api"));
        assert!(!result.outcomes[1].succeeded);
        assert_eq!(rollout.requests().len(), 3);

        let web = progress.messages("web");
        assert_eq!(web[0], "deploying (none) -> main-abc1234-20260213110000 (env=prod)");
        assert_eq!(web.last().unwrap(), "FAILED: deploy task failed: web exploded");
        assert_eq!(progress.messages("api").last().unwrap(), "done");
    }

    #[tokio::test]
    async fn test_standard_orchestrator_deploys_static_sites() {
        const NEW: &str = "main-abc1234-20260213110000";
        const OLD: &str = "main-0ff1ce0-20260212090000";

        let store = MockStore::new()
            .with_object("b", &format!("builds/{}/index.html", NEW), "<html/>")
            .with_object("b", "current-tag", OLD);
        let host = MockHost::new(|_| Err(fail("no ssh expected")));
        let orchestrator = Orchestrator::standard(
            fleet(),
            Arc::new(host.clone()),
            Arc::new(store.clone()),
            &EngineConfig::default(),
            Arc::new(InMemoryProgress::new()),
        );
        let cancel = CancellationToken::new();

        let previous = orchestrator
            .gather_previous_tags(&services(&["site"]), "prod", &cancel)
            .await
            .unwrap();
        assert_eq!(previous["site"], OLD);

        let plan = RolloutPlan::uniform("prod", services(&["site"]), NEW, previous);
        let result = orchestrator.run_all(&plan, &cancel).await;

        assert!(result.failed.is_empty(), "{:?}", result.errors);
        assert_eq!(store.object("b", "current-tag").as_deref(), Some(NEW));
        assert_eq!(store.object("b", "previous-tag").as_deref(), Some(OLD));
        assert!(store.calls().contains(&"invalidate c /*".to_string()));
        assert!(host.dials().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_backend_fails_its_service_only() {
        let rollout = Arc::new(FakeRollout::default());
        let orchestrator = with_fake(rollout.clone(), Arc::new(InMemoryProgress::new()));
        let plan = RolloutPlan::uniform("prod", services(&["api", "site"]), "main-abc1234-20260213110000", HashMap::new());

        let result = orchestrator.run_all(&plan, &CancellationToken::new()).await;

        assert_eq!(result.failed, vec!["site"]);
        assert!(matches!(
            result.errors["site"],
            DeployError::UnsupportedBackend(BackendKind::Static)
        ));
        assert_eq!(rollout.requests().len(), 1);
    }

    #[test]
    fn test_plan_rollback_scopes_and_skips() {
        let plan = plan(&[("api", "old-api"), ("web", "old-web")]);
        let result = RolloutResult {
            outcomes: Vec::new(),
            failed: services(&["web", "worker"]),
            errors: HashMap::new(),
        };

        let all = plan_rollback(&plan, &result, RollbackScope::All);
        assert_eq!(all.targets.services, vec!["api", "web"]);
        assert_eq!(all.skipped, vec!["worker"]);
        assert_eq!(all.targets.tags["api"], "old-api");
        assert_eq!(all.targets.previous["api"], "main-abc1234-20260213110000");

        let failed = plan_rollback(&plan, &result, RollbackScope::Failed);
        assert_eq!(failed.targets.services, vec!["web"]);
        assert_eq!(failed.skipped, vec!["worker"]);

        let none = plan_rollback(&plan, &result, RollbackScope::None);
        assert!(none.targets.services.is_empty());
        assert!(none.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_deploy_with_rollback_swaps_tags() {
        let rollout = Arc::new(FakeRollout::failing(&["web"]));
        let orchestrator = with_fake(rollout.clone(), Arc::new(InMemoryProgress::new()));
        let plan = plan(&[("api", "old-api"), ("web", "old-web"), ("worker", "old-worker")]);

        // declining leaves the fleet as it is
        let report = orchestrator
            .deploy_with_rollback(
                &plan,
                |result| {
                    assert_eq!(result.failed, vec!["web"]);
                    RollbackScope::None
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(report.rollback.is_none());
        assert_eq!(rollout.requests().len(), 3);

        let rollout = Arc::new(FakeRollout::failing(&["worker"]));
        let orchestrator = with_fake(rollout.clone(), Arc::new(InMemoryProgress::new()));
        let report = orchestrator
            .deploy_with_rollback(&plan, |_| RollbackScope::Failed, &CancellationToken::new())
            .await;

        // the failing fake fails the rollback of worker too
        let Err(OrchestratorError::RollbackFailed { services, report }) = report else {
            panic!("expected rollback failure");
        };
        assert_eq!(services, vec!["worker"]);
        assert_eq!(report.result.failed, vec!["worker"]);

        let reverted: Vec<DeployRequest> = rollout
            .requests()
            .into_iter()
            .filter(|r| r.tag == "old-worker")
            .collect();
        assert_eq!(reverted.len(), 1);
        assert_eq!(reverted[0].previous, "main-abc1234-20260213110000");
    }

    #[tokio::test]
    async fn test_successful_rollback_reports_skipped() {
        // api fails its deploy; rolling back all reverts api and web, skips worker
        let rollout = Arc::new(FakeRollout::default());
        let failing = Arc::new(FakeRollout::failing(&["api"]));
        let orchestrator = Orchestrator::new(fleet(), Arc::new(InMemoryProgress::new()))
            .with_rollout(BackendKind::Server, failing.clone());
        let plan = plan(&[("api", "old-api"), ("web", "old-web")]);

        let result = orchestrator.run_all(&plan, &CancellationToken::new()).await;
        let rollback = plan_rollback(&plan, &result, RollbackScope::All);
        assert_eq!(rollback.skipped, vec!["worker"]);

        let reverter = Orchestrator::new(fleet(), Arc::new(InMemoryProgress::new()))
            .with_rollout(BackendKind::Server, rollout.clone());
        let reverted = reverter.run_rollback(&rollback.targets, &CancellationToken::new()).await;
        assert!(reverted.succeeded());

        let tags: Vec<(String, String)> = rollout
            .requests()
            .into_iter()
            .map(|r| (r.service, r.tag))
            .collect();
        assert_eq!(
            tags,
            vec![
                ("api".to_string(), "old-api".to_string()),
                ("web".to_string(), "old-web".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_is_not_rolled_back() {
        let rollout = Arc::new(FakeRollout::failing(&["api"]));
        let orchestrator = with_fake(rollout, Arc::new(InMemoryProgress::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orchestrator
            .deploy_with_rollback(&plan(&[("api", "old")]), |_| panic!("must not ask"), &cancel)
            .await
            .unwrap();
        assert_eq!(report.result.failed, vec!["api"]);
        assert!(report.rollback.is_none());
    }

    #[tokio::test]
    async fn test_gather_and_resolve_history() {
        let rollout = Arc::new(FakeRollout {
            current: HashMap::from([
                ("api".to_string(), "cur-api".to_string()),
                ("web".to_string(), "cur-web".to_string()),
            ]),
            previous: HashMap::from([("api".to_string(), "prev-api".to_string())]),
            ..FakeRollout::default()
        });
        let orchestrator = with_fake(rollout, Arc::new(InMemoryProgress::new()));
        let cancel = CancellationToken::new();
        let names = services(&["api", "web", "site"]);

        let previous = orchestrator.gather_previous_tags(&names, "prod", &cancel).await.unwrap();
        assert_eq!(previous["api"], "cur-api");
        assert_eq!(previous["web"], "cur-web");
        assert!(!previous.contains_key("site"));

        let plan = orchestrator.resolve_rollback_targets(&names, "prod", &cancel).await.unwrap();
        assert_eq!(plan.targets.services, vec!["api"]);
        assert_eq!(plan.targets.tags["api"], "prev-api");
        assert_eq!(plan.targets.previous["api"], "cur-api");
        assert_eq!(plan.skipped, vec!["web", "site"]);
    }

    #[tokio::test]
    async fn test_unknown_service_history_is_an_error() {
        let orchestrator = with_fake(Arc::new(FakeRollout::default()), Arc::new(InMemoryProgress::new()));

        let err = orchestrator
            .gather_previous_tags(&services(&["ghost"]), "prod", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "getting current deploy for ghost: unknown service: \"ghost\"");
    }
}
