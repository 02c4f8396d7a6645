//! Stage and job snapshots.
//!
//! Stages are snapshotted into the build at creation time and stored as an
//! opaque serialized blob, so later edits to the pipeline definition never
//! affect in-flight builds.

use serde::{Deserialize, Serialize};

use crate::models::parameter::Parameter;
use crate::models::status::Status;

/// A job inside a stage. Executed by an external worker; logs and
/// artifacts are referenced by job id but stored elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub status: Status,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Action tree the worker interprets; the engine never looks inside.
    #[serde(default)]
    pub action: serde_json::Value,
    #[serde(default)]
    pub worker_model: String,
}

impl Job {
    pub fn new(id: i64, name: impl Into<String>) -> Job {
        Job {
            id,
            name: name.into(),
            status: Status::Waiting,
            parameters: Vec::new(),
            action: serde_json::Value::Null,
            worker_model: String::new(),
        }
    }
}

/// An ordered group of jobs. Stages run sequentially; jobs within a stage
/// may run in parallel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub name: String,
    #[serde(rename = "build_order")]
    pub order: i32,
    pub enabled: bool,
    /// An optional stage's job failures do not fail the build.
    #[serde(default)]
    pub optional: bool,
    pub status: Status,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl Stage {
    pub fn new(id: i64, name: impl Into<String>, order: i32) -> Stage {
        Stage {
            id,
            name: name.into(),
            order,
            enabled: true,
            optional: false,
            status: Status::Waiting,
            jobs: Vec::new(),
        }
    }

    pub fn with_jobs(mut self, jobs: Vec<Job>) -> Stage {
        self.jobs = jobs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_preserving_order() {
        let stages = vec![
            Stage::new(1, "compile", 0).with_jobs(vec![Job::new(10, "build"), Job::new(11, "lint")]),
            Stage::new(2, "package", 1),
        ];
        let blob = serde_json::to_string(&stages).unwrap();
        let decoded: Vec<Stage> = serde_json::from_str(&blob).unwrap();
        assert_eq!(decoded, stages);
        assert_eq!(decoded[0].jobs[1].name, "lint");
    }

    #[test]
    fn legacy_snapshot_without_optional_flag_decodes() {
        let blob = r#"[{"id":1,"name":"deploy","build_order":0,"enabled":true,
                        "status":"Waiting","jobs":[]}]"#;
        let decoded: Vec<Stage> = serde_json::from_str(blob).unwrap();
        assert!(!decoded[0].optional);
        assert!(decoded[0].jobs.is_empty());
    }
}
