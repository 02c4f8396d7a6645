//! Build history queries: filtered listings, previous-on-branch lookup,
//! per-branch and per-deployment latest builds.

use diesel_async::AsyncPgConnection;

use crate::error::Result;
use crate::models::{PipelineBuild, Status};
use crate::store;

/// Filter for [`load_builds`].
#[derive(Debug, Clone, Default)]
pub struct BuildFilter {
    pub status: Option<Status>,
    pub branch: Option<String>,
    pub limit: i64,
}

impl BuildFilter {
    pub fn latest(limit: i64) -> BuildFilter {
        BuildFilter {
            limit,
            ..BuildFilter::default()
        }
    }

    pub fn on_branch(branch: impl Into<String>, limit: i64) -> BuildFilter {
        BuildFilter {
            branch: Some(branch.into()),
            limit,
            ..BuildFilter::default()
        }
    }
}

/// Most recent builds of a triple matching the filter, ordered
/// `(version DESC, id DESC)`.
pub async fn load_builds(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    pipeline_id: i64,
    environment_id: i64,
    filter: &BuildFilter,
) -> Result<Vec<PipelineBuild>> {
    store::build::load_filtered(
        conn,
        application_id,
        pipeline_id,
        environment_id,
        filter.status,
        filter.branch.as_deref(),
        filter.limit.max(1),
    )
    .await
}

/// The most recent build sharing this build's (app, pipeline, env, branch)
/// with a lower build number, or `None` for the first build of a branch.
pub async fn previous_on_branch(
    conn: &mut AsyncPgConnection,
    pb: &PipelineBuild,
) -> Result<Option<PipelineBuild>> {
    let branch = pb.branch();
    if branch.is_empty() {
        return Ok(None);
    }
    store::build::previous_on_branch(
        conn,
        pb.application.id,
        pb.pipeline.id,
        pb.environment.id,
        branch,
        pb.build_number,
    )
    .await
}

/// Latest build of type `build` per distinct branch, paginated.
pub async fn branch_history(
    conn: &mut AsyncPgConnection,
    project_key: &str,
    application_name: &str,
    page: i64,
    per_page: i64,
) -> Result<Vec<PipelineBuild>> {
    store::build::branch_history(conn, project_key, application_name, page, per_page).await
}

/// Latest build of type `deployment` per (pipeline, environment).
pub async fn deployment_history(
    conn: &mut AsyncPgConnection,
    project_key: &str,
    application_name: &str,
) -> Result<Vec<PipelineBuild>> {
    store::build::deployment_history(conn, project_key, application_name).await
}

/// Distinct versions built for an application branch, newest first.
pub async fn versions(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    branch: &str,
) -> Result<Vec<i64>> {
    store::build::versions(conn, application_id, branch).await
}

/// Branches known from past builds of the application.
pub async fn branches(conn: &mut AsyncPgConnection, application_id: i64) -> Result<Vec<String>> {
    store::build::branches(conn, application_id).await
}
