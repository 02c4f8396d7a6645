//! Version-control data returned by the VCS collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VcsBranch {
    pub display_id: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub latest_commit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VcsAuthor {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VcsCommit {
    pub hash: String,
    pub author: VcsAuthor,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VcsRemote {
    pub ssh_clone_url: String,
    pub http_clone_url: String,
}
