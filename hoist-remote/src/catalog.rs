//! Build catalogs
//!
//! A catalog lists the builds a backend can deploy, newest first.

use async_trait::async_trait;
use hoist_core::domain::build::Build;
use hoist_core::tag;
use reqwest::Client;
use reqwest::header::LINK;
use serde::Deserialize;
use tracing::debug;

use crate::error::CatalogError;

/// Source of deployable builds for one backend
#[async_trait]
pub trait BuildsProvider: Send + Sync {
    /// Identity of the underlying source; services whose providers share an
    /// id see the same builds
    fn id(&self) -> String;

    /// Lists up to `limit` builds after skipping `offset`, newest first
    async fn list_builds(&self, limit: usize, offset: usize) -> Result<Vec<Build>, CatalogError>;
}

/// Docker Registry HTTP API v2 catalog for one image repository
#[derive(Debug, Clone)]
pub struct RegistryCatalog {
    /// Registry base URL (e.g., "https://registry.example.com")
    base_url: String,
    /// Repository path within the registry (e.g., "myapp/api")
    repository: String,
    credentials: Option<(String, String)>,
    client: Client,
}

/// Tags requested per `tags/list` page
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl RegistryCatalog {
    /// Creates a catalog for an image reference such as
    /// `registry.example.com/myapp/api`
    ///
    /// References without a registry host resolve to Docker Hub.
    pub fn from_image(image: &str, client: Client) -> Result<Self, CatalogError> {
        let (base_url, repository) = split_image(image)?;
        Ok(Self {
            base_url,
            repository,
            credentials: None,
            client,
        })
    }

    /// Authenticates requests with HTTP basic auth
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Collects every tag in the repository, following the registry's
    /// `Link` pagination until no next page is advertised
    async fn fetch_tags(&self) -> Result<Vec<String>, CatalogError> {
        let mut url = format!(
            "{}/v2/{}/tags/list?n={}",
            self.base_url, self.repository, PAGE_SIZE
        );
        let mut tags = Vec::new();

        loop {
            debug!(url = %url, "Listing registry tags");

            let mut request = self.client.get(&url);
            if let Some((user, password)) = &self.credentials {
                request = request.basic_auth(user, Some(password));
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(CatalogError::Registry {
                    status: status.as_u16(),
                    message: message.trim().to_string(),
                });
            }

            let next = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| next_link(value, &self.base_url));

            let page = response.json::<TagList>().await?.tags.unwrap_or_default();
            let exhausted = page.is_empty();
            tags.extend(page);

            match next {
                Some(next) if !exhausted && next != url => url = next,
                _ => break,
            }
        }

        Ok(tags)
    }
}

/// Extracts the `rel="next"` target from a `Link` header
///
/// Registries usually answer with a path (`</v2/app/tags/list?n=100&last=x>`),
/// which is resolved against `base_url`.
fn next_link(header: &str, base_url: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let (target, params) = entry.trim().split_once(';')?;
        let is_next = params.split(';').any(|param| {
            param
                .trim()
                .strip_prefix("rel=")
                .is_some_and(|rel| rel.trim_matches('"') == "next")
        });
        if !is_next {
            return None;
        }

        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        if target.starts_with("http://") || target.starts_with("https://") {
            Some(target.to_string())
        } else if target.starts_with('/') {
            Some(format!("{}{}", base_url, target))
        } else {
            None
        }
    })
}

#[async_trait]
impl BuildsProvider for RegistryCatalog {
    fn id(&self) -> String {
        format!("registry:{}/{}", self.base_url, self.repository)
    }

    async fn list_builds(&self, limit: usize, offset: usize) -> Result<Vec<Build>, CatalogError> {
        let builds = builds_from_tags(self.fetch_tags().await?);
        Ok(builds.into_iter().skip(offset).take(limit).collect())
    }
}

/// Decodes tag names into builds sorted newest first, skipping names that
/// are not build tags (e.g. `latest`)
pub fn builds_from_tags(tags: Vec<String>) -> Vec<Build> {
    let mut builds: Vec<Build> = tags
        .into_iter()
        .filter_map(|name| match tag::decode(&name) {
            // Keep the registry's spelling; re-encoding would rename
            // tags such as `-02` or `-1`
            Ok(decoded) => Some(Build {
                tag: name,
                ..Build::from(decoded)
            }),
            Err(e) => {
                debug!(tag = %name, "Skipping non-build tag: {}", e);
                None
            }
        })
        .collect();

    builds.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| b.tag.cmp(&a.tag)));
    builds
}

fn split_image(image: &str) -> Result<(String, String), CatalogError> {
    let image = image.trim().trim_end_matches('/');
    if image.is_empty() || image.contains(char::is_whitespace) {
        return Err(CatalogError::InvalidImage(image.to_string()));
    }

    let (first, rest) = match image.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (image, None),
    };

    let is_host = first.contains('.') || first.contains(':') || first == "localhost";
    match (is_host, rest) {
        (true, Some(repository)) if !repository.is_empty() => {
            let scheme = if first.starts_with("localhost") { "http" } else { "https" };
            Ok((format!("{}://{}", scheme, first), repository.to_string()))
        }
        (true, _) => Err(CatalogError::InvalidImage(image.to_string())),
        (false, Some(_)) => Ok(("https://registry-1.docker.io".to_string(), image.to_string())),
        (false, None) => Ok((
            "https://registry-1.docker.io".to_string(),
            format!("library/{}", image),
        )),
    }
}
