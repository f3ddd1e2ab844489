//! Object storage for static sites
//!
//! A static service's bucket holds every uploaded build under
//! `builds/<tag>/`, the live copy under `current/`, and two small marker
//! objects naming the live build and the one it replaced. [`StaticStore`]
//! is the slice of the storage and CDN APIs the rollout needs.
//! [`AwsCliStore`] implements it by running the `aws` command line tool.

use async_trait::async_trait;
use hoist_core::domain::build::Build;
use serde::de::DeserializeOwned;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::catalog::{BuildsProvider, builds_from_tags};
use crate::error::{CatalogError, RemoteError, Result};

/// Prefix under which builds are uploaded
pub const BUILDS_PREFIX: &str = "builds/";

/// Storage and CDN operations behind a static rollout
#[async_trait]
pub trait StaticStore: Send + Sync {
    /// Body of a marker object; `None` when it does not exist
    async fn get_marker(&self, bucket: &str, key: &str) -> Result<Option<String>>;

    async fn put_marker(&self, bucket: &str, key: &str, value: &str) -> Result<()>;

    /// Every object key under `prefix`
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Immediate sub-prefixes of `prefix`, each ending in `/`
    async fn list_prefixes(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    async fn copy_object(&self, bucket: &str, from: &str, to: &str) -> Result<()>;

    /// Drops cached copies of `paths` from the CDN distribution
    async fn invalidate(&self, distribution: &str, paths: &[&str]) -> Result<()>;
}

/// [`StaticStore`] over the `aws` CLI
///
/// Credentials and region come from the CLI's own configuration. Dropping a
/// pending call kills the child process.
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    program: String,
}

impl Default for AwsCliStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsCliStore {
    pub fn new() -> Self {
        Self {
            program: "aws".to_string(),
        }
    }

    /// Runs another binary in place of `aws`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn aws(&self, args: &[&str], input: Option<&str>) -> Result<String> {
        let command_line = format!("{} {}", self.program, args.join(" "));
        debug!(command = %command_line, "Running aws");

        let spawn_failed = |source| RemoteError::Tool {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_failed)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await.map_err(spawn_failed)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_failed)?;
        if !output.status.success() {
            return Err(RemoteError::CommandFailed {
                command: command_line,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn query<T: DeserializeOwned>(&self, bucket: &str, prefix: &str, extra: &[&str]) -> Result<T> {
        let mut args = vec![
            "s3api",
            "list-objects-v2",
            "--bucket",
            bucket,
            "--prefix",
            prefix,
            "--output",
            "json",
        ];
        args.extend_from_slice(extra);

        let output = self.aws(&args, None).await?;
        serde_json::from_str(output.trim())
            .map_err(|e| RemoteError::Output(format!("listing {}: {}", s3_url(bucket, prefix), e)))
    }
}

#[async_trait]
impl StaticStore for AwsCliStore {
    async fn get_marker(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        let url = s3_url(bucket, key);
        match self.aws(&["s3", "cp", "--only-show-errors", &url, "-"], None).await {
            Ok(body) => Ok(Some(body.trim().to_string())),
            Err(RemoteError::CommandFailed { ref stderr, .. }) if is_missing_object(stderr) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_marker(&self, bucket: &str, key: &str, value: &str) -> Result<()> {
        let url = s3_url(bucket, key);
        self.aws(&["s3", "cp", "--only-show-errors", "-", &url], Some(value))
            .await
            .map(drop)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let keys: Option<Vec<String>> = self.query(bucket, prefix, &["--query", "Contents[].Key"]).await?;
        Ok(keys.unwrap_or_default())
    }

    async fn list_prefixes(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let prefixes: Option<Vec<String>> = self
            .query(bucket, prefix, &["--delimiter", "/", "--query", "CommonPrefixes[].Prefix"])
            .await?;
        Ok(prefixes.unwrap_or_default())
    }

    async fn copy_object(&self, bucket: &str, from: &str, to: &str) -> Result<()> {
        let (from, to) = (s3_url(bucket, from), s3_url(bucket, to));
        self.aws(&["s3", "cp", "--only-show-errors", &from, &to], None)
            .await
            .map(drop)
    }

    async fn invalidate(&self, distribution: &str, paths: &[&str]) -> Result<()> {
        let mut args = vec![
            "cloudfront",
            "create-invalidation",
            "--distribution-id",
            distribution,
            "--paths",
        ];
        args.extend_from_slice(paths);
        self.aws(&args, None).await.map(drop)
    }
}

pub fn s3_url(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

/// Whether `aws s3 cp` failed because the source object does not exist
fn is_missing_object(stderr: &str) -> bool {
    stderr.contains("(404)") || stderr.contains("NoSuchKey") || stderr.contains("Not Found")
}

/// Builds uploaded to a static site bucket
pub struct BucketCatalog {
    store: Arc<dyn StaticStore>,
    bucket: String,
}

impl BucketCatalog {
    pub fn new(store: Arc<dyn StaticStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BuildsProvider for BucketCatalog {
    fn id(&self) -> String {
        format!("bucket:{}", self.bucket)
    }

    async fn list_builds(&self, limit: usize, offset: usize) -> std::result::Result<Vec<Build>, CatalogError> {
        let prefixes = self.store.list_prefixes(&self.bucket, BUILDS_PREFIX).await?;
        let tags = prefixes
            .iter()
            .filter_map(|prefix| prefix.strip_prefix(BUILDS_PREFIX))
            .map(|tag| tag.trim_end_matches('/'))
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();

        Ok(builds_from_tags(tags).into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bucket listing fixed at construction
    struct Listing(Vec<&'static str>);

    #[async_trait]
    impl StaticStore for Listing {
        async fn get_marker(&self, _: &str, _: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn put_marker(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn list_objects(&self, _: &str, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn list_prefixes(&self, _: &str, prefix: &str) -> Result<Vec<String>> {
            assert_eq!(prefix, BUILDS_PREFIX);
            Ok(self.0.iter().map(|p| p.to_string()).collect())
        }

        async fn copy_object(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn invalidate(&self, _: &str, _: &[&str]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_object_detection() {
        assert!(is_missing_object(
            "fatal error: An error occurred (404) when calling the HeadObject operation: Key \"current-tag\" does not exist"
        ));
        assert!(is_missing_object("An error occurred (NoSuchKey) when calling the GetObject operation"));
        assert!(!is_missing_object(
            "An error occurred (AccessDenied) when calling the GetObject operation: Access Denied"
        ));
    }

    #[tokio::test]
    async fn test_bucket_catalog_lists_build_prefixes() {
        let store = Arc::new(Listing(vec![
            "builds/main-abc1234-20260101000000/",
            "builds/main-def5678-20260301000000/",
            "builds/not-a-build/",
            "builds/feature-x-0123456-20260201000000-02/",
        ]));
        let catalog = BucketCatalog::new(store, "site-prod");

        let builds = catalog.list_builds(10, 0).await.unwrap();
        let tags: Vec<&str> = builds.iter().map(|b| b.tag.as_str()).collect();
        assert_eq!(
            tags,
            vec![
                "main-def5678-20260301000000",
                "feature-x-0123456-20260201000000-02",
                "main-abc1234-20260101000000",
            ]
        );
        assert_eq!(catalog.id(), "bucket:site-prod");

        let second = catalog.list_builds(1, 1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].tag, "feature-x-0123456-20260201000000-02");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_tool_error() {
        let store = AwsCliStore::new().with_program("/nonexistent/hoist-aws");

        let err = store.get_marker("site-prod", "current-tag").await.unwrap_err();

        assert!(matches!(err, RemoteError::Tool { .. }));
        assert!(err.to_string().starts_with("running /nonexistent/hoist-aws: "));
    }
}
