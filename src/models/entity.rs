//! Projects, applications, environments, pipelines and users.
//!
//! These are loaded by the coordinator when a trigger arrives; their
//! mutation endpoints live in the external router, not here.

use serde::{Deserialize, Serialize};

use crate::models::parameter::Parameter;
use crate::models::stage::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub project_id: i64,
    pub project_key: String,
    pub name: String,
    /// Repository bound through the VCS collaborator, e.g. "acme/shop".
    pub repo_fullname: Option<String>,
    pub vcs_server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: i64,
    pub project_id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Build,
    Deployment,
    Testing,
}

impl PipelineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineKind::Build => "build",
            PipelineKind::Deployment => "deployment",
            PipelineKind::Testing => "testing",
        }
    }

    pub fn parse(s: &str) -> Option<PipelineKind> {
        match s {
            "build" => Some(PipelineKind::Build),
            "deployment" => Some(PipelineKind::Deployment),
            "testing" => Some(PipelineKind::Testing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub kind: PipelineKind,
    /// Stage template snapshotted into each new build.
    pub stages: Vec<Stage>,
    /// Pipeline-level default parameters, lowest merge precedence.
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub fullname: String,
    pub email: String,
}
