//! OpenSSH channel
//!
//! Each dial starts a control master (`ssh -M`) on a private socket; every
//! command afterwards is multiplexed over it, so a rollout pays for one
//! handshake no matter how many commands it runs.
//!
//! Remote commands are wrapped so the remote shell records their pid in a
//! per-invocation file. Cancelling a command kills the local `ssh` client and
//! then signals the recorded pid, terminating the remote process rather than
//! just abandoning the wait.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{Dialer, RemoteChannel};
use crate::error::{RemoteError, Result};
use crate::shell::shell_quote;

const DEFAULT_USER: &str = "root";
const DEFAULT_PORT: u16 = 22;

/// Time allowed for the follow-up kill of a cancelled remote command
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed `user@host[:port]` address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshAddr {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for SshAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Parses `user@host[:port]`; user defaults to `root`, port to 22
pub fn parse_ssh_addr(addr: &str) -> Result<SshAddr> {
    let invalid = || RemoteError::InvalidAddress(addr.to_string());

    let (user, rest) = match addr.split_once('@') {
        Some((user, rest)) if !user.is_empty() => (user, rest),
        Some(_) => return Err(invalid()),
        None => (DEFAULT_USER, addr),
    };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() || port == 0 {
        return Err(invalid());
    }

    Ok(SshAddr {
        user: user.to_string(),
        host: host.to_string(),
        port,
    })
}

/// Dials hosts with the system `ssh` binary
#[derive(Debug, Clone)]
pub struct SshDialer {
    connect_timeout: Duration,
    socket_dir: PathBuf,
}

impl SshDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            socket_dir: std::env::temp_dir(),
        }
    }

    /// Directory for control sockets (defaults to the system temp dir)
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self, address: &str, cancel: CancellationToken) -> Result<Box<dyn RemoteChannel>> {
        let addr = parse_ssh_addr(address)?;
        let socket = self
            .socket_dir
            .join(format!("hoist-{}.sock", Uuid::new_v4().simple()));

        debug!(host = %addr, socket = %socket.display(), "Starting ssh control master");

        let mut command = Command::new("ssh");
        command
            .arg("-M")
            .arg("-S")
            .arg(&socket)
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-p")
            .arg(addr.port.to_string())
            .arg(format!("{}@{}", addr.user, addr.host))
            .arg("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            out = command.output() => out.map_err(RemoteError::Spawn)?,
            _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RemoteError::Connect {
                address: address.to_string(),
                message: if stderr.is_empty() {
                    format!("ssh exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        info!(host = %addr, "Connected");

        Ok(Box::new(SshChannel {
            address: address.to_string(),
            addr,
            socket,
            cancel,
        }))
    }
}

/// A connection multiplexed over an ssh control master
pub struct SshChannel {
    address: String,
    addr: SshAddr,
    socket: PathBuf,
    cancel: CancellationToken,
}

/// Captured result of one remote invocation
struct Finished {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl Finished {
    /// Stdout with trailing newlines removed, or the failure
    fn into_output(self, command: &str) -> Result<String> {
        if !self.status.success() {
            return Err(RemoteError::CommandFailed {
                command: command.to_string(),
                status: self.status.code(),
                stderr: self.stderr.trim().to_string(),
            });
        }

        Ok(self.stdout.trim_end_matches('\n').to_string())
    }
}

impl SshChannel {
    /// `ssh` invocation that reuses the control master
    fn ssh(&self) -> Command {
        let mut command = Command::new("ssh");
        command
            .arg("-S")
            .arg(&self.socket)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-p")
            .arg(self.addr.port.to_string())
            .arg(format!("{}@{}", self.addr.user, self.addr.host));
        command
    }

    /// Runs `command` remotely under a pid-recording wrapper
    ///
    /// With `merge_stderr` set, stderr is redirected into stdout on the
    /// remote side.
    async fn execute(
        &self,
        command: &str,
        cancel: &CancellationToken,
        merge_stderr: bool,
        sink: Option<&mut (dyn AsyncWrite + Send + Unpin)>,
    ) -> Result<Finished> {
        let pid_file = format!("/tmp/hoist-{}.pid", Uuid::new_v4().simple());
        let redirect = if merge_stderr { " 2>&1" } else { "" };
        let wrapped = format!(
            "sh -c {cmd}{redirect} & pid=$!; echo $pid > {pf}; wait $pid; rc=$?; rm -f {pf}; exit $rc",
            cmd = shell_quote(command),
            pf = pid_file,
        );

        debug!(host = %self.addr, command = %command, "Running remote command");

        let mut child = self
            .ssh()
            .arg(wrapped)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RemoteError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let io = async {
            match (sink, stdout) {
                (Some(sink), Some(mut stdout)) => {
                    if let Err(e) = tokio::io::copy(&mut stdout, sink).await {
                        warn!(host = %self.addr, "Failed to forward remote output: {}", e);
                    }
                    String::new()
                }
                (None, stdout) => read_pipe(stdout).await,
                (Some(_), None) => String::new(),
            }
        };

        let completed = tokio::select! {
            (stdout, status) = async { tokio::join!(io, child.wait()) } => Some((stdout, status)),
            _ = cancel.cancelled() => None,
        };

        let Some((stdout, status)) = completed else {
            debug!(host = %self.addr, command = %command, "Cancellation requested; killing remote command");
            if let Err(e) = child.kill().await {
                debug!("Failed to kill ssh client: {}", e);
            }
            stderr.abort();
            self.terminate_remote(&pid_file).await;
            return Err(RemoteError::Cancelled);
        };

        let status = status.map_err(RemoteError::Spawn)?;
        let stderr = stderr.await.unwrap_or_default();
        Ok(Finished {
            status,
            stdout,
            stderr,
        })
    }

    /// Signals the process recorded in `pid_file`, then removes the file
    async fn terminate_remote(&self, pid_file: &str) {
        let kill = format!(
            "pid=$(cat {pf} 2>/dev/null) && {{ pkill -TERM -P $pid 2>/dev/null; kill -TERM $pid 2>/dev/null; }}; rm -f {pf}",
            pf = pid_file
        );

        let mut command = self.ssh();
        command
            .arg(kill)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(TERMINATE_TIMEOUT, command.status()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(host = %self.addr, "Remote command terminated");
            }
            Ok(Ok(status)) => {
                warn!(host = %self.addr, "Terminating remote command exited with {}", status);
            }
            Ok(Err(e)) => warn!(host = %self.addr, "Failed to terminate remote command: {}", e),
            Err(_) => warn!(host = %self.addr, "Timed out terminating remote command"),
        }
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn run(&self, command: &str) -> Result<String> {
        let finished = self.execute(command, &self.cancel, false, None).await?;
        finished.into_output(command)
    }

    async fn run_uncancelled(&self, command: &str) -> Result<String> {
        let finished = self.execute(command, &CancellationToken::new(), false, None).await?;
        finished.into_output(command)
    }

    async fn stream(&self, command: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        let finished = self.execute(command, &self.cancel, true, Some(sink)).await?;

        if !finished.status.success() {
            return Err(RemoteError::CommandFailed {
                command: command.to_string(),
                status: finished.status.code(),
                stderr: finished.stderr.trim().to_string(),
            });
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let output = self
            .ssh()
            .arg("-O")
            .arg("exit")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(RemoteError::Spawn)?;

        if let Err(e) = tokio::fs::remove_file(&self.socket).await {
            debug!(socket = %self.socket.display(), "Control socket already gone: {}", e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RemoteError::CommandFailed {
                command: "ssh -O exit".to_string(),
                status: output.status.code(),
                stderr,
            });
        }

        debug!(host = %self.addr, "Disconnected");
        Ok(())
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };

    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!("Failed to read remote output: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ssh_addr_defaults() {
        let addr = parse_ssh_addr("10.0.0.1").unwrap();
        assert_eq!(addr.user, "root");
        assert_eq!(addr.host, "10.0.0.1");
        assert_eq!(addr.port, 22);
    }

    #[test]
    fn test_parse_ssh_addr_full() {
        let addr = parse_ssh_addr("ubuntu@web1.example.com:2222").unwrap();
        assert_eq!(
            addr,
            SshAddr {
                user: "ubuntu".to_string(),
                host: "web1.example.com".to_string(),
                port: 2222,
            }
        );
        assert_eq!(addr.to_string(), "ubuntu@web1.example.com:2222");

        let addr = parse_ssh_addr("deploy@10.0.0.2").unwrap();
        assert_eq!(addr.user, "deploy");
        assert_eq!(addr.port, 22);
    }

    #[test]
    fn test_parse_ssh_addr_invalid() {
        for addr in ["", "@host", "user@", "host:notaport", "host:0", "host:70000", ":22"] {
            assert!(
                matches!(parse_ssh_addr(addr), Err(RemoteError::InvalidAddress(_))),
                "{addr:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_dial_invalid_address_fails_before_spawning() {
        let dialer = SshDialer::new(Duration::from_secs(1));
        let err = dialer
            .dial("user@", CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RemoteError::InvalidAddress(_)));
    }
}
