//! Service backend kinds

use serde::{Deserialize, Serialize};

/// Deployment backend a service is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Long-running container behind a router, rolled out blue-green
    Server,

    /// Static asset bucket
    Static,

    /// Scheduled container job driven by a crontab entry
    Cronjob,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Server => "server",
            BackendKind::Static => "static",
            BackendKind::Cronjob => "cronjob",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
