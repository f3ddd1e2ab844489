//! Build catalog selection and merging
//!
//! Services of one deploy may list builds from different sources. The tag
//! picked for a deploy must exist in every one of them, so several catalogs
//! are merged by intersecting their tags.

use async_trait::async_trait;
use hoist_core::config::FleetConfig;
use hoist_core::domain::build::Build;
use hoist_core::domain::service::BackendKind;
use hoist_core::tag;
use hoist_remote::{BucketCatalog, BuildsProvider, CatalogError, RegistryCatalog, StaticStore};
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::debug;

/// How many builds are searched when resolving a branch name
const RESOLVE_WINDOW: usize = 100;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("listing builds: {0}")]
    Catalog(#[from] CatalogError),

    #[error("no builds found for branch {0:?}")]
    NoBuilds(String),
}

/// In-memory catalog over a fixed list of builds
pub struct FixedCatalog {
    id: String,
    builds: Vec<Build>,
}

impl FixedCatalog {
    /// Builds are served newest first regardless of input order
    pub fn new(id: impl Into<String>, mut builds: Vec<Build>) -> Self {
        sort_newest_first(&mut builds);
        Self { id: id.into(), builds }
    }
}

#[async_trait]
impl BuildsProvider for FixedCatalog {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn list_builds(&self, limit: usize, offset: usize) -> Result<Vec<Build>, CatalogError> {
        Ok(page(&self.builds, limit, offset))
    }
}

/// Intersection of several catalogs
///
/// Each source is asked for one page of `fetch_limit` builds; only tags
/// present in every page are served.
pub struct MergedCatalog {
    providers: Vec<Arc<dyn BuildsProvider>>,
    fetch_limit: usize,
}

impl MergedCatalog {
    pub fn new(providers: Vec<Arc<dyn BuildsProvider>>, fetch_limit: usize) -> Self {
        Self { providers, fetch_limit }
    }

    async fn fetch_all(&self) -> Result<Vec<Vec<Build>>, CatalogError> {
        let mut tasks = JoinSet::new();
        for (index, provider) in self.providers.iter().enumerate() {
            let provider = Arc::clone(provider);
            let limit = self.fetch_limit;
            tasks.spawn(async move { (index, provider.list_builds(limit, 0).await) });
        }

        let mut pages = vec![Vec::new(); self.providers.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, builds) = joined.map_err(|e| CatalogError::Other(format!("catalog task failed: {}", e)))?;
            pages[index] = builds?;
        }
        Ok(pages)
    }
}

#[async_trait]
impl BuildsProvider for MergedCatalog {
    fn id(&self) -> String {
        let ids: Vec<String> = self.providers.iter().map(|p| p.id()).collect();
        format!("merged({})", ids.join(","))
    }

    async fn list_builds(&self, limit: usize, offset: usize) -> Result<Vec<Build>, CatalogError> {
        let pages = self.fetch_all().await?;
        let Some((first, rest)) = pages.split_first() else {
            return Ok(Vec::new());
        };

        let others: Vec<HashSet<&str>> = rest
            .iter()
            .map(|builds| builds.iter().map(|b| b.tag.as_str()).collect())
            .collect();

        let mut seen = HashSet::new();
        let mut common: Vec<Build> = first
            .iter()
            .filter(|b| seen.insert(b.tag.as_str()))
            .filter(|b| others.iter().all(|tags| tags.contains(b.tag.as_str())))
            .cloned()
            .collect();
        sort_newest_first(&mut common);

        debug!(sources = self.providers.len(), common = common.len(), "Merged build catalogs");
        Ok(page(&common, limit, offset))
    }
}

/// Single catalog covering `services`
///
/// Services sharing a source are asked once. Returns `None` when no service
/// has a catalog.
pub fn catalog_for_services(
    catalogs: &HashMap<String, Arc<dyn BuildsProvider>>,
    services: &[String],
    fetch_limit: usize,
) -> Option<Arc<dyn BuildsProvider>> {
    let mut ids = HashSet::new();
    let mut unique: Vec<Arc<dyn BuildsProvider>> = services
        .iter()
        .filter_map(|service| catalogs.get(service))
        .filter(|provider| ids.insert(provider.id()))
        .cloned()
        .collect();

    match unique.len() {
        0 => None,
        1 => unique.pop(),
        _ => Some(Arc::new(MergedCatalog::new(unique, fetch_limit))),
    }
}

/// Registry catalogs for every container-based service, keyed by service
///
/// Services built from the same image share one catalog.
pub fn catalogs_for_fleet(
    fleet: &FleetConfig,
    client: &Client,
    credentials: Option<(&str, &str)>,
) -> Result<HashMap<String, Arc<dyn BuildsProvider>>, CatalogError> {
    let mut by_image: HashMap<&str, Arc<dyn BuildsProvider>> = HashMap::new();
    let mut catalogs = HashMap::new();

    for (name, service) in &fleet.services {
        if !matches!(service.kind, BackendKind::Server | BackendKind::Cronjob) {
            continue;
        }

        let provider = match by_image.get(service.image.as_str()) {
            Some(provider) => Arc::clone(provider),
            None => {
                let mut catalog = RegistryCatalog::from_image(&service.image, client.clone())?;
                if let Some((user, password)) = credentials {
                    catalog = catalog.with_credentials(user, password);
                }
                let provider: Arc<dyn BuildsProvider> = Arc::new(catalog);
                by_image.insert(service.image.as_str(), Arc::clone(&provider));
                provider
            }
        };
        catalogs.insert(name.clone(), provider);
    }

    Ok(catalogs)
}

/// Bucket catalogs for the static services deployable to `env`, keyed by
/// service
///
/// Static builds live in each environment's own bucket, so unlike registry
/// catalogs these depend on the environment.
pub fn bucket_catalogs(
    fleet: &FleetConfig,
    env: &str,
    store: Arc<dyn StaticStore>,
) -> HashMap<String, Arc<dyn BuildsProvider>> {
    fleet
        .services
        .iter()
        .filter(|(_, service)| service.kind == BackendKind::Static)
        .filter_map(|(name, service)| {
            let target = service.env.get(env)?;
            let provider: Arc<dyn BuildsProvider> = Arc::new(BucketCatalog::new(Arc::clone(&store), &target.bucket));
            Some((name.clone(), provider))
        })
        .collect()
}

/// Resolves a tag or branch name to a build tag
///
/// A value that decodes as a tag is returned as is. Anything else is taken
/// as a branch name and resolved to the newest build of that branch.
pub async fn resolve_build(catalog: &dyn BuildsProvider, value: &str) -> Result<String, ResolveError> {
    if tag::is_valid(value) {
        return Ok(value.to_string());
    }

    let sanitized = tag::sanitize_branch(value);
    catalog
        .list_builds(RESOLVE_WINDOW, 0)
        .await?
        .into_iter()
        .find(|b| b.branch == sanitized || b.branch == value)
        .map(|b| b.tag)
        .ok_or_else(|| ResolveError::NoBuilds(value.to_string()))
}

fn sort_newest_first(builds: &mut [Build]) {
    builds.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| b.tag.cmp(&a.tag)));
}

fn page(builds: &[Build], limit: usize, offset: usize) -> Vec<Build> {
    builds.iter().skip(offset).take(limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build(value: &str) -> Build {
        Build::from(tag::decode(value).unwrap())
    }

    // x newest, w oldest
    const X: &str = "main-aaaaaaa-20260213120000";
    const Y: &str = "main-bbbbbbb-20260213110000";
    const Z: &str = "feature-login-ccccccc-20260213100000";
    const W: &str = "main-ddddddd-20260213090000";

    fn fixed(id: &str, tags: &[&str]) -> Arc<dyn BuildsProvider> {
        Arc::new(FixedCatalog::new(id, tags.iter().map(|t| build(t)).collect()))
    }

    fn tags(builds: &[Build]) -> Vec<&str> {
        builds.iter().map(|b| b.tag.as_str()).collect()
    }

    struct Failing;

    #[async_trait]
    impl BuildsProvider for Failing {
        fn id(&self) -> String {
            "failing".to_string()
        }

        async fn list_builds(&self, _: usize, _: usize) -> Result<Vec<Build>, CatalogError> {
            Err(CatalogError::Registry {
                status: 401,
                message: "unauthorized".to_string(),
            })
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl BuildsProvider for Counting {
        fn id(&self) -> String {
            "counting".to_string()
        }

        async fn list_builds(&self, limit: usize, _: usize) -> Result<Vec<Build>, CatalogError> {
            self.0.store(limit, Ordering::SeqCst);
            Ok(vec![build(Y)])
        }
    }

    #[tokio::test]
    async fn test_fixed_catalog_pages_newest_first() {
        let catalog = FixedCatalog::new("fixed", vec![build(W), build(X), build(Y)]);

        assert_eq!(tags(&catalog.list_builds(10, 0).await.unwrap()), vec![X, Y, W]);
        assert_eq!(tags(&catalog.list_builds(1, 1).await.unwrap()), vec![Y]);
        assert!(catalog.list_builds(10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_intersects_tags() {
        let merged = MergedCatalog::new(vec![fixed("a", &[X, Y, Z]), fixed("b", &[Y, Z, W])], 100);

        assert_eq!(tags(&merged.list_builds(10, 0).await.unwrap()), vec![Y, Z]);
        assert_eq!(tags(&merged.list_builds(10, 1).await.unwrap()), vec![Z]);
        assert_eq!(tags(&merged.list_builds(1, 0).await.unwrap()), vec![Y]);
        assert!(merged.list_builds(10, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_fails_when_any_source_fails() {
        let merged = MergedCatalog::new(vec![fixed("a", &[X]), Arc::new(Failing) as Arc<dyn BuildsProvider>], 100);

        let err = merged.list_builds(10, 0).await.unwrap_err();
        assert!(err.to_string().contains("unauthorized"));
    }

    #[tokio::test]
    async fn test_merge_fetches_bounded_page() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let merged = MergedCatalog::new(vec![fixed("a", &[Y]), counting.clone() as Arc<dyn BuildsProvider>], 25);

        assert_eq!(tags(&merged.list_builds(10, 0).await.unwrap()), vec![Y]);
        assert_eq!(counting.0.load(Ordering::SeqCst), 25);
    }

    #[test]
    fn test_catalog_for_services_dedupes_shared_sources() {
        let shared = fixed("registry/app", &[X]);
        let catalogs = HashMap::from([
            ("api".to_string(), Arc::clone(&shared)),
            ("worker".to_string(), shared),
            ("report".to_string(), fixed("registry/report", &[X])),
        ]);
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let single = catalog_for_services(&catalogs, &names(&["api", "worker"]), 100).unwrap();
        assert_eq!(single.id(), "registry/app");

        let merged = catalog_for_services(&catalogs, &names(&["api", "report", "site"]), 100).unwrap();
        assert_eq!(merged.id(), "merged(registry/app,registry/report)");

        assert!(catalog_for_services(&catalogs, &names(&["site"]), 100).is_none());
    }

    #[test]
    fn test_catalogs_for_fleet_share_images() {
        let yaml = r#"
services:
  api:
    type: server
    image: registry.example.com/myapp/app
  worker:
    type: cronjob
    image: registry.example.com/myapp/app
  report:
    type: cronjob
    image: registry.example.com/myapp/report
  site:
    type: static
"#;
        let fleet = FleetConfig::from_yaml(yaml).unwrap();
        let catalogs = catalogs_for_fleet(&fleet, &Client::new(), None).unwrap();

        assert_eq!(catalogs.len(), 3);
        assert!(Arc::ptr_eq(&catalogs["api"], &catalogs["worker"]));
        assert!(!catalogs.contains_key("site"));
    }

    #[tokio::test]
    async fn test_bucket_catalogs_follow_the_environment() {
        let yaml = r#"
services:
  site:
    type: static
    env:
      prod: { bucket: site-prod, cloudfront: EPROD }
      staging: { bucket: site-staging, cloudfront: ESTG }
  docs:
    type: static
    env:
      prod: { bucket: docs-prod, cloudfront: EDOCS }
  api:
    type: server
    image: registry.example.com/myapp/app
"#;
        let fleet = FleetConfig::from_yaml(yaml).unwrap();
        let store = MockStore::new()
            .with_object("site-staging", &format!("builds/{}/index.html", Y), "<html/>")
            .with_object("site-staging", &format!("builds/{}/index.html", X), "<html/>");

        let staging = bucket_catalogs(&fleet, "staging", Arc::new(store.clone()));
        assert_eq!(staging.len(), 1);
        assert_eq!(staging["site"].id(), "bucket:site-staging");
        assert_eq!(tags(&staging["site"].list_builds(10, 0).await.unwrap()), vec![X, Y]);

        let prod = bucket_catalogs(&fleet, "prod", Arc::new(store));
        assert_eq!(prod.len(), 2);
        assert_eq!(prod["docs"].id(), "bucket:docs-prod");
    }

    #[tokio::test]
    async fn test_resolve_build() {
        let catalog = FixedCatalog::new("fixed", vec![build(X), build(Y), build(Z)]);

        // a valid tag is used verbatim, even if the catalog lacks it
        assert_eq!(resolve_build(&catalog, W).await.unwrap(), W);
        // newest build of the branch
        assert_eq!(resolve_build(&catalog, "main").await.unwrap(), X);
        // branch names are sanitized like at encode time
        assert_eq!(resolve_build(&catalog, "feature/login").await.unwrap(), Z);

        let err = resolve_build(&catalog, "nope").await.unwrap_err();
        assert_eq!(err.to_string(), "no builds found for branch \"nope\"");
    }
}
