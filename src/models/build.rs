//! The pipeline build aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entity::{PipelineKind, User};
use crate::models::parameter::{self, Parameter};
use crate::models::stage::Stage;
use crate::models::status::Status;
use crate::models::vcs::VcsCommit;

/// Application summary carried on every loaded build; the engine needs the
/// names for canonical parameters and the project key for cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildApplication {
    pub id: i64,
    pub name: String,
    pub project_id: i64,
    pub project_key: String,
    pub repo_fullname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPipeline {
    pub id: i64,
    pub name: String,
    pub kind: PipelineKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironment {
    pub id: i64,
    pub name: String,
}

/// The cause of a build. Exactly one of `manual`, `scheduled` or
/// parent-derived (`parent_build_id`) holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub manual: bool,
    pub scheduled: bool,
    pub triggered_by: Option<User>,
    pub parent_build_id: Option<i64>,
    #[serde(default)]
    pub vcs_branch: String,
    #[serde(default)]
    pub vcs_hash: String,
    #[serde(default)]
    pub vcs_author: String,
}

impl Trigger {
    pub fn manual(user: User) -> Trigger {
        Trigger {
            manual: true,
            triggered_by: Some(user),
            ..Trigger::default()
        }
    }

    pub fn scheduled() -> Trigger {
        Trigger {
            scheduled: true,
            ..Trigger::default()
        }
    }

    pub fn from_parent(parent_build_id: i64) -> Trigger {
        Trigger {
            parent_build_id: Some(parent_build_id),
            ..Trigger::default()
        }
    }
}

/// A concrete execution of a pipeline against an application/environment
/// pair, identified by a monotonic build number within that triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineBuild {
    pub id: i64,
    pub application: BuildApplication,
    pub pipeline: BuildPipeline,
    pub environment: BuildEnvironment,
    pub build_number: i64,
    /// Equals `build_number` unless inherited from a same-application
    /// parent on a non-build pipeline.
    pub version: i64,
    pub status: Status,
    pub start: DateTime<Utc>,
    pub done: Option<DateTime<Utc>>,
    pub trigger: Trigger,
    pub parameters: Vec<Parameter>,
    pub stages: Vec<Stage>,
    pub commits: Vec<VcsCommit>,
}

impl PipelineBuild {
    /// The branch this build ran on: the trigger's branch when recorded,
    /// otherwise the `git.branch` build parameter (legacy spelling
    /// included).
    pub fn branch(&self) -> &str {
        if !self.trigger.vcs_branch.is_empty() {
            return &self.trigger.vcs_branch;
        }
        parameter::branch_of(&self.parameters).unwrap_or("")
    }
}

/// Build fixture shared by unit tests across the crate.
#[cfg(test)]
pub(crate) fn test_build() -> PipelineBuild {
    PipelineBuild {
        id: 1,
        application: BuildApplication {
            id: 42,
            name: "shop".into(),
            project_id: 1,
            project_key: "ACME".into(),
            repo_fullname: Some("acme/shop".into()),
        },
        pipeline: BuildPipeline {
            id: 7,
            name: "build-shop".into(),
            kind: PipelineKind::Build,
        },
        environment: BuildEnvironment {
            id: 3,
            name: "production".into(),
        },
        build_number: 1,
        version: 1,
        status: Status::Building,
        start: Utc::now(),
        done: None,
        trigger: Trigger::scheduled(),
        parameters: Vec::new(),
        stages: Vec::new(),
        commits: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_falls_back_to_parameters() {
        let mut pb = test_build();
        pb.trigger.vcs_branch = "hotfix".into();
        assert_eq!(pb.branch(), "hotfix");

        pb.trigger.vcs_branch = String::new();
        pb.parameters = vec![Parameter::string(".git.branch", "main")];
        assert_eq!(pb.branch(), "main");

        pb.parameters.clear();
        assert_eq!(pb.branch(), "");
    }
}
