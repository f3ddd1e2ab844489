//! Hoist Remote
//!
//! I/O clients used by the deployment engine.
//!
//! This crate provides:
//! - The remote command channel traits and an OpenSSH implementation
//! - POSIX shell quoting for commands sent over the channel
//! - The build catalog trait and a Docker Registry v2 catalog
//! - Static site object storage over the `aws` CLI
//! - The post-deploy webhook notifier
//!
//! # Example
//!
//! ```no_run
//! use hoist_remote::{Dialer, SshDialer};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> hoist_remote::Result<()> {
//! let dialer = SshDialer::new(Duration::from_secs(10));
//! let channel = dialer.dial("ubuntu@10.0.0.1", CancellationToken::new()).await?;
//! let running = channel.run("docker ps --format '{{.Names}}'").await?;
//! println!("{}", running);
//! channel.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod catalog;
pub mod channel;
pub mod error;
pub mod hook;
pub mod shell;
pub mod ssh;

// Re-export commonly used types
pub use bucket::{AwsCliStore, BucketCatalog, StaticStore};
pub use catalog::{BuildsProvider, RegistryCatalog};
pub use channel::{Dialer, RemoteChannel};
pub use error::{CatalogError, RemoteError, Result};
pub use hook::WebhookNotifier;
pub use shell::{shell_join, shell_quote};
pub use ssh::{SshChannel, SshDialer, parse_ssh_addr};
