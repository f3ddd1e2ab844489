//! Build artifacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tag::BuildTag;

/// A build artifact offered by a build catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    /// Encoded build tag
    pub tag: String,
    pub branch: String,
    pub sha: String,
    pub time: DateTime<Utc>,

    /// Commit message, when the catalog knows it
    #[serde(default)]
    pub message: String,

    /// Commit author, when the catalog knows it
    #[serde(default)]
    pub author: String,
}

impl From<BuildTag> for Build {
    fn from(tag: BuildTag) -> Self {
        Self {
            tag: tag.encode(),
            branch: tag.branch,
            sha: tag.sha,
            time: tag.time,
            message: String::new(),
            author: String::new(),
        }
    }
}
