//! Remote command channel
//!
//! The engine talks to managed hosts only through these traits, so the
//! transport can be swapped (OpenSSH in production, a scripted double in
//! tests).

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// An open connection to one host
///
/// A channel is owned by a single rollout for its lifetime. Commands run
/// sequentially and honour the cancellation token the channel was dialed
/// with: a cancelled command terminates the remote process and resolves to
/// [`RemoteError::Cancelled`](crate::RemoteError::Cancelled).
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Address this channel is connected to
    fn address(&self) -> &str;

    /// Runs a shell command and returns its stdout with trailing newlines
    /// removed
    async fn run(&self, command: &str) -> Result<String>;

    /// Like [`run`](Self::run) but ignores cancellation
    ///
    /// Used for cleanup that has to happen even after the caller cancelled.
    async fn run_uncancelled(&self, command: &str) -> Result<String>;

    /// Runs a shell command, forwarding stdout and stderr to `sink`
    async fn stream(&self, command: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()>;

    /// Closes the connection
    async fn close(&self) -> Result<()>;
}

/// Opens channels to hosts named by address strings (`user@host[:port]`)
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &str, cancel: CancellationToken) -> Result<Box<dyn RemoteChannel>>;
}
