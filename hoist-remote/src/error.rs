//! Error types for remote I/O

use thiserror::Error;

/// Result type alias for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors raised by a remote command channel or an outbound HTTP call
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Address string could not be parsed
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// Connection to the host could not be established
    #[error("{message}")]
    Connect { address: String, message: String },

    /// The local transport process could not be started
    #[error("spawning ssh: {0}")]
    Spawn(#[source] std::io::Error),

    /// A local helper program could not be run
    #[error("running {program}: {source}")]
    Tool {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A command succeeded but printed something unparseable
    #[error("unexpected output: {0}")]
    Output(String),

    /// The remote command exited unsuccessfully
    #[error("command failed (exit {}): {}", .status.map_or("signal".to_string(), |c| c.to_string()), .stderr)]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The caller's cancellation signal fired first
    #[error("cancelled")]
    Cancelled,

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an error status
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
}

impl RemoteError {
    /// Exit code of a failed remote command
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors raised while listing builds
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry error (status {status}): {message}")]
    Registry { status: u16, message: String },

    #[error("listing bucket: {0}")]
    Store(#[from] RemoteError),

    #[error("invalid image reference {0:?}")]
    InvalidImage(String),

    #[error("{0}")]
    Other(String),
}
