//! Build records — CRUD, history queries and transactional locks.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::Table;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{EngineError, Result};
use crate::models::build::{BuildApplication, BuildEnvironment, BuildPipeline, Trigger};
use crate::models::entity::{PipelineKind, User};
use crate::models::parameter::Parameter;
use crate::models::stage::Stage;
use crate::models::status::Status;
use crate::models::vcs::VcsCommit;
use crate::models::PipelineBuild;
use crate::schema::{
    application, environment, group_user, pipeline, pipeline_build, pipeline_group, project, user,
};

/// Raw `pipeline_build` row; field order matches the table definition.
#[derive(Debug, Clone, Queryable)]
pub struct BuildRecord {
    pub id: i64,
    pub pipeline_id: i64,
    pub application_id: i64,
    pub environment_id: i64,
    pub build_number: i64,
    pub version: i64,
    pub status: String,
    pub args: String,
    pub stages: String,
    pub commits: String,
    pub start: DateTime<Utc>,
    pub done: Option<DateTime<Utc>>,
    pub manual_trigger: bool,
    pub scheduled_trigger: bool,
    pub triggered_by: Option<i64>,
    pub parent_pipeline_build_id: Option<i64>,
    pub vcs_changes_branch: Option<String>,
    pub vcs_changes_hash: Option<String>,
    pub vcs_changes_author: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = pipeline_build)]
pub struct NewBuildRecord {
    pub pipeline_id: i64,
    pub application_id: i64,
    pub environment_id: i64,
    pub build_number: i64,
    pub version: i64,
    pub status: String,
    pub args: String,
    pub stages: String,
    pub commits: String,
    pub start: DateTime<Utc>,
    pub done: Option<DateTime<Utc>>,
    pub manual_trigger: bool,
    pub scheduled_trigger: bool,
    pub triggered_by: Option<i64>,
    pub parent_pipeline_build_id: Option<i64>,
    pub vcs_changes_branch: Option<String>,
    pub vcs_changes_hash: Option<String>,
    pub vcs_changes_author: Option<String>,
}

type BuildJoinRow = (
    BuildRecord,
    String,         // application.name
    Option<String>, // application.repo_fullname
    i64,            // project.id
    String,         // project.projectkey
    String,         // pipeline.name
    String,         // pipeline.type
    String,         // environment.name
    Option<String>, // user.username
    Option<String>, // user.fullname
    Option<String>, // user.email
);

type BuildSelection = (
    <pipeline_build::table as Table>::AllColumns,
    application::name,
    application::repo_fullname,
    project::id,
    project::projectkey,
    pipeline::name,
    pipeline::kind,
    environment::name,
    diesel::dsl::Nullable<user::username>,
    diesel::dsl::Nullable<user::fullname>,
    diesel::dsl::Nullable<user::email>,
);

fn selection() -> BuildSelection {
    (
        pipeline_build::all_columns,
        application::name,
        application::repo_fullname,
        project::id,
        project::projectkey,
        pipeline::name,
        pipeline::kind,
        environment::name,
        user::username.nullable(),
        user::fullname.nullable(),
        user::email.nullable(),
    )
}

/// Decode a joined row into the domain aggregate.
pub(crate) fn scan_build(row: BuildJoinRow) -> Result<PipelineBuild> {
    let (r, app_name, repo_fullname, project_id, project_key, pip_name, pip_kind, env_name, username, fullname, email) =
        row;

    let status = Status::parse(&r.status).ok_or_else(|| {
        EngineError::InvariantViolation(format!("unknown status {:?} on build {}", r.status, r.id))
    })?;
    let kind = PipelineKind::parse(&pip_kind).ok_or_else(|| {
        EngineError::InvariantViolation(format!(
            "unknown pipeline type {:?} on build {}",
            pip_kind, r.id
        ))
    })?;

    let parameters: Vec<Parameter> = serde_json::from_str(&r.args)
        .map_err(|e| EngineError::serialization(format!("parameters of build {}", r.id), e))?;
    let stages: Vec<Stage> = serde_json::from_str(&r.stages)
        .map_err(|e| EngineError::serialization(format!("stages of build {}", r.id), e))?;
    let commits: Vec<VcsCommit> = if r.commits.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&r.commits)
            .map_err(|e| EngineError::serialization(format!("commits of build {}", r.id), e))?
    };

    let triggered_by = match (r.triggered_by, username) {
        (Some(id), Some(username)) => Some(User {
            id,
            username,
            fullname: fullname.unwrap_or_default(),
            email: email.unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(PipelineBuild {
        id: r.id,
        application: BuildApplication {
            id: r.application_id,
            name: app_name,
            project_id,
            project_key,
            repo_fullname,
        },
        pipeline: BuildPipeline {
            id: r.pipeline_id,
            name: pip_name,
            kind,
        },
        environment: BuildEnvironment {
            id: r.environment_id,
            name: env_name,
        },
        build_number: r.build_number,
        version: r.version,
        status,
        start: r.start,
        done: r.done,
        trigger: Trigger {
            manual: r.manual_trigger,
            scheduled: r.scheduled_trigger,
            triggered_by,
            parent_build_id: r.parent_pipeline_build_id,
            vcs_branch: r.vcs_changes_branch.unwrap_or_default(),
            vcs_hash: r.vcs_changes_hash.unwrap_or_default(),
            vcs_author: r.vcs_changes_author.unwrap_or_default(),
        },
        parameters,
        stages,
        commits,
    })
}

fn scan_builds(rows: Vec<BuildJoinRow>) -> Result<Vec<PipelineBuild>> {
    rows.into_iter().map(scan_build).collect()
}

/// Insert a build row, returning its id.
pub async fn insert(conn: &mut AsyncPgConnection, record: &NewBuildRecord) -> Result<i64> {
    diesel::insert_into(pipeline_build::table)
        .values(record)
        .returning(pipeline_build::id)
        .get_result(conn)
        .await
        .map_err(|e| {
            EngineError::database(
                format!(
                    "insert_build app={} pip={} env={} number={}",
                    record.application_id,
                    record.pipeline_id,
                    record.environment_id,
                    record.build_number
                ),
                e,
            )
        })
}

pub async fn by_id(conn: &mut AsyncPgConnection, id: i64) -> Result<PipelineBuild> {
    let row: BuildJoinRow = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::id.eq(id))
        .select(selection())
        .first(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_build id={id}"), e))?;
    scan_build(row)
}

pub async fn by_build_number(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    pipeline_id: i64,
    environment_id: i64,
    build_number: i64,
) -> Result<PipelineBuild> {
    let row: BuildJoinRow = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::application_id.eq(application_id))
        .filter(pipeline_build::pipeline_id.eq(pipeline_id))
        .filter(pipeline_build::environment_id.eq(environment_id))
        .filter(pipeline_build::build_number.eq(build_number))
        .select(selection())
        .first(conn)
        .await
        .map_err(|e| {
            EngineError::database(
                format!("load_build app={application_id} pip={pipeline_id} env={environment_id} number={build_number}"),
                e,
            )
        })?;
    scan_build(row)
}

pub async fn by_version(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    pipeline_id: i64,
    environment_id: i64,
    version: i64,
    limit: i64,
) -> Result<Vec<PipelineBuild>> {
    let rows: Vec<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::application_id.eq(application_id))
        .filter(pipeline_build::pipeline_id.eq(pipeline_id))
        .filter(pipeline_build::environment_id.eq(environment_id))
        .filter(pipeline_build::version.eq(version))
        .order(pipeline_build::id.desc())
        .limit(limit)
        .select(selection())
        .load(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_builds version={version}"), e))?;
    scan_builds(rows)
}

/// Builds triggered by the given parent.
pub async fn children_of(conn: &mut AsyncPgConnection, parent_id: i64) -> Result<Vec<PipelineBuild>> {
    let rows: Vec<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::parent_pipeline_build_id.eq(parent_id))
        .order(pipeline_build::id.asc())
        .select(selection())
        .load(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_children parent={parent_id}"), e))?;
    scan_builds(rows)
}

/// Builds triggered by a change with the given commit hash.
pub async fn by_hash(conn: &mut AsyncPgConnection, hash: &str) -> Result<Vec<PipelineBuild>> {
    let rows: Vec<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::vcs_changes_hash.eq(hash))
        .order(pipeline_build::id.asc())
        .select(selection())
        .load(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_builds hash={hash}"), e))?;
    scan_builds(rows)
}

pub async fn by_app_and_branch(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    branch: &str,
) -> Result<Vec<PipelineBuild>> {
    let rows: Vec<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::application_id.eq(application_id))
        .filter(pipeline_build::vcs_changes_branch.eq(branch))
        .order(pipeline_build::id.asc())
        .select(selection())
        .load(conn)
        .await
        .map_err(|e| {
            EngineError::database(format!("load_builds app={application_id} branch={branch}"), e)
        })?;
    scan_builds(rows)
}

/// Most recent builds for a triple, optionally narrowed by status and
/// branch, ordered `(version DESC, id DESC)`.
pub async fn load_filtered(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    pipeline_id: i64,
    environment_id: i64,
    status: Option<Status>,
    branch: Option<&str>,
    limit: i64,
) -> Result<Vec<PipelineBuild>> {
    let mut query = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::application_id.eq(application_id))
        .filter(pipeline_build::pipeline_id.eq(pipeline_id))
        .filter(pipeline_build::environment_id.eq(environment_id))
        .select(selection())
        .into_boxed();

    if let Some(status) = status {
        query = query.filter(pipeline_build::status.eq(status.as_str()));
    }
    if let Some(branch) = branch {
        query = query.filter(pipeline_build::vcs_changes_branch.eq(branch));
    }

    let rows: Vec<BuildJoinRow> = query
        .order((pipeline_build::version.desc(), pipeline_build::id.desc()))
        .limit(limit)
        .load(conn)
        .await
        .map_err(|e| {
            EngineError::database(
                format!("load_builds app={application_id} pip={pipeline_id} env={environment_id}"),
                e,
            )
        })?;
    scan_builds(rows)
}

/// The most recent build on the same branch with a lower build number.
pub async fn previous_on_branch(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    pipeline_id: i64,
    environment_id: i64,
    branch: &str,
    before_build_number: i64,
) -> Result<Option<PipelineBuild>> {
    let row: Option<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::application_id.eq(application_id))
        .filter(pipeline_build::pipeline_id.eq(pipeline_id))
        .filter(pipeline_build::environment_id.eq(environment_id))
        .filter(pipeline_build::vcs_changes_branch.eq(branch))
        .filter(pipeline_build::build_number.lt(before_build_number))
        .order(pipeline_build::build_number.desc())
        .limit(1)
        .select(selection())
        .first(conn)
        .await
        .optional()
        .map_err(|e| {
            EngineError::database(
                format!("load_previous_build branch={branch} before={before_build_number}"),
                e,
            )
        })?;
    row.map(scan_build).transpose()
}

/// Persist status, stage snapshot and done timestamp.
pub async fn update_status_and_stages(
    conn: &mut AsyncPgConnection,
    pb: &PipelineBuild,
) -> Result<()> {
    let stages = serde_json::to_string(&pb.stages)
        .map_err(|e| EngineError::serialization(format!("stages of build {}", pb.id), e))?;
    diesel::update(pipeline_build::table.find(pb.id))
        .set((
            pipeline_build::status.eq(pb.status.as_str()),
            pipeline_build::stages.eq(stages),
            pipeline_build::done.eq(pb.done),
        ))
        .execute(conn)
        .await
        .map_err(|e| EngineError::database(format!("update_build_status id={}", pb.id), e))?;
    Ok(())
}

pub async fn update_args(
    conn: &mut AsyncPgConnection,
    id: i64,
    parameters: &[Parameter],
) -> Result<()> {
    let args = serde_json::to_string(parameters)
        .map_err(|e| EngineError::serialization(format!("parameters of build {id}"), e))?;
    diesel::update(pipeline_build::table.find(id))
        .set(pipeline_build::args.eq(args))
        .execute(conn)
        .await
        .map_err(|e| EngineError::database(format!("update_build_args id={id}"), e))?;
    Ok(())
}

pub async fn update_commits(
    conn: &mut AsyncPgConnection,
    id: i64,
    commits: &[VcsCommit],
) -> Result<()> {
    let blob = serde_json::to_string(commits)
        .map_err(|e| EngineError::serialization(format!("commits of build {id}"), e))?;
    diesel::update(pipeline_build::table.find(id))
        .set(pipeline_build::commits.eq(blob))
        .execute(conn)
        .await
        .map_err(|e| EngineError::database(format!("update_build_commits id={id}"), e))?;
    Ok(())
}

/// Lock a Building build for job-result processing. Non-blocking: a held
/// lock fails fast with [`EngineError::Conflict`] so the caller can retry.
pub async fn lock_for_update(conn: &mut AsyncPgConnection, id: i64) -> Result<()> {
    pipeline_build::table
        .select(pipeline_build::id)
        .filter(pipeline_build::id.eq(id))
        .filter(pipeline_build::status.eq(Status::Building.as_str()))
        .for_update()
        .no_wait()
        .first::<i64>(conn)
        .await
        .map_err(|e| EngineError::database(format!("lock_build id={id}"), e))?;
    Ok(())
}

/// Highest allocated build number for a triple, locking the row until the
/// surrounding transaction ends. `None` when the triple has no builds.
pub async fn last_build_number_for_update(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
    application_id: i64,
    environment_id: i64,
) -> Result<Option<i64>> {
    pipeline_build::table
        .select(pipeline_build::build_number)
        .filter(pipeline_build::pipeline_id.eq(pipeline_id))
        .filter(pipeline_build::application_id.eq(application_id))
        .filter(pipeline_build::environment_id.eq(environment_id))
        .order(pipeline_build::build_number.desc())
        .limit(1)
        .for_update()
        .no_wait()
        .first::<i64>(conn)
        .await
        .optional()
        .map_err(|e| {
            EngineError::database(
                format!("last_build_number app={application_id} pip={pipeline_id} env={environment_id}"),
                e,
            )
        })
}

/// Build parameters blob, locked until the transaction ends.
pub async fn args_for_update(conn: &mut AsyncPgConnection, id: i64) -> Result<String> {
    pipeline_build::table
        .select(pipeline_build::args)
        .filter(pipeline_build::id.eq(id))
        .for_update()
        .first::<String>(conn)
        .await
        .map_err(|e| EngineError::database(format!("lock_build_args id={id}"), e))
}

pub async fn building_ids(conn: &mut AsyncPgConnection) -> Result<Vec<i64>> {
    pipeline_build::table
        .select(pipeline_build::id)
        .filter(pipeline_build::status.eq(Status::Building.as_str()))
        .order(pipeline_build::id.asc())
        .load(conn)
        .await
        .map_err(|e| EngineError::database("load_building_ids", e))
}

pub async fn count_building_for_app(
    conn: &mut AsyncPgConnection,
    application_id: i64,
) -> Result<i64> {
    pipeline_build::table
        .filter(pipeline_build::application_id.eq(application_id))
        .filter(pipeline_build::status.eq(Status::Building.as_str()))
        .count()
        .get_result(conn)
        .await
        .map_err(|e| EngineError::database(format!("count_building app={application_id}"), e))
}

/// Builds running now or finished within the last minute.
pub async fn recent(conn: &mut AsyncPgConnection) -> Result<Vec<PipelineBuild>> {
    let cutoff = Utc::now() - chrono::Duration::minutes(1);
    let rows: Vec<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(
            pipeline_build::status
                .eq(Status::Building.as_str())
                .nullable()
                .or(pipeline_build::done.gt(cutoff).nullable()),
        )
        .order(pipeline_build::id.asc())
        .select(selection())
        .load(conn)
        .await
        .map_err(|e| EngineError::database("load_recent_builds", e))?;
    scan_builds(rows)
}

/// Recent builds restricted to pipelines the user's groups can see.
pub async fn user_recent(conn: &mut AsyncPgConnection, user_id: i64) -> Result<Vec<PipelineBuild>> {
    let visible: Vec<i64> = pipeline_group::table
        .inner_join(group_user::table.on(group_user::group_id.eq(pipeline_group::group_id)))
        .filter(group_user::user_id.eq(user_id))
        .select(pipeline_group::pipeline_id)
        .load(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_visible_pipelines user={user_id}"), e))?;

    let cutoff = Utc::now() - chrono::Duration::minutes(1);
    let rows: Vec<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::pipeline_id.eq_any(visible))
        .filter(
            pipeline_build::status
                .eq(Status::Building.as_str())
                .nullable()
                .or(pipeline_build::done.gt(cutoff).nullable()),
        )
        .order(pipeline_build::id.asc())
        .select(selection())
        .load(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_recent_builds user={user_id}"), e))?;
    scan_builds(rows)
}

/// Distinct versions built for an application branch, newest first.
pub async fn versions(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    branch: &str,
) -> Result<Vec<i64>> {
    pipeline_build::table
        .select(pipeline_build::version)
        .filter(pipeline_build::application_id.eq(application_id))
        .filter(pipeline_build::vcs_changes_branch.eq(branch))
        .distinct()
        .order(pipeline_build::version.desc())
        .limit(15)
        .load(conn)
        .await
        .map_err(|e| {
            EngineError::database(format!("load_versions app={application_id} branch={branch}"), e)
        })
}

/// Distinct branches that ever built for an application.
pub async fn branches(conn: &mut AsyncPgConnection, application_id: i64) -> Result<Vec<String>> {
    let rows: Vec<Option<String>> = pipeline_build::table
        .select(pipeline_build::vcs_changes_branch)
        .filter(pipeline_build::application_id.eq(application_id))
        .distinct()
        .order(pipeline_build::vcs_changes_branch.desc())
        .load(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_branches app={application_id}"), e))?;
    Ok(rows.into_iter().flatten().filter(|b| !b.is_empty()).collect())
}

/// Whether a build for this trigger's change already exists.
pub async fn exists_for_trigger(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    pipeline_id: i64,
    environment_id: i64,
    hash: &str,
    branch: &str,
) -> Result<bool> {
    let count: i64 = pipeline_build::table
        .filter(pipeline_build::application_id.eq(application_id))
        .filter(pipeline_build::pipeline_id.eq(pipeline_id))
        .filter(pipeline_build::environment_id.eq(environment_id))
        .filter(pipeline_build::vcs_changes_hash.eq(hash))
        .filter(pipeline_build::vcs_changes_branch.eq(branch))
        .count()
        .get_result(conn)
        .await
        .map_err(|e| EngineError::database("count_builds_for_trigger", e))?;
    Ok(count > 0)
}

/// Latest build per (pipeline, environment) for an application, optionally
/// narrowed to a branch and version.
pub async fn last_by_application(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    branch: Option<&str>,
    version: Option<i64>,
) -> Result<Vec<PipelineBuild>> {
    let mut latest = pipeline_build::table
        .filter(pipeline_build::application_id.eq(application_id))
        .group_by((pipeline_build::pipeline_id, pipeline_build::environment_id))
        .select(diesel::dsl::max(pipeline_build::id))
        .into_boxed();
    if let Some(branch) = branch {
        latest = latest.filter(pipeline_build::vcs_changes_branch.eq(branch));
    }
    if let Some(version) = version {
        latest = latest.filter(pipeline_build::version.eq(version));
    }
    let ids: Vec<i64> = latest
        .load::<Option<i64>>(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_last_ids app={application_id}"), e))?
        .into_iter()
        .flatten()
        .collect();

    let rows: Vec<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(pipeline_build::id.eq_any(ids))
        .order(pipeline_build::id.desc())
        .select(selection())
        .load(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_last_builds app={application_id}"), e))?;
    scan_builds(rows)
}

/// Latest build of type `build` per distinct branch, paginated.
pub async fn branch_history(
    conn: &mut AsyncPgConnection,
    project_key: &str,
    application_name: &str,
    page: i64,
    per_page: i64,
) -> Result<Vec<PipelineBuild>> {
    let page = page.max(1);
    let offset = per_page * (page - 1);

    let rows: Vec<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(project::projectkey.eq(project_key))
        .filter(application::name.eq(application_name))
        .filter(pipeline::kind.eq(PipelineKind::Build.as_str()))
        .filter(pipeline_build::vcs_changes_branch.is_not_null())
        .filter(pipeline_build::vcs_changes_branch.ne(""))
        .distinct_on(pipeline_build::vcs_changes_branch)
        .order((
            pipeline_build::vcs_changes_branch.asc(),
            pipeline_build::start.desc(),
        ))
        .offset(offset)
        .limit(per_page)
        .select(selection())
        .load(conn)
        .await
        .map_err(|e| {
            EngineError::database(
                format!("load_branch_history project={project_key} app={application_name}"),
                e,
            )
        })?;
    scan_builds(rows)
}

/// Latest build of type `deployment` per (pipeline, environment).
pub async fn deployment_history(
    conn: &mut AsyncPgConnection,
    project_key: &str,
    application_name: &str,
) -> Result<Vec<PipelineBuild>> {
    let rows: Vec<BuildJoinRow> = pipeline_build::table
        .inner_join(application::table.inner_join(project::table))
        .inner_join(pipeline::table)
        .inner_join(environment::table)
        .left_join(user::table)
        .filter(project::projectkey.eq(project_key))
        .filter(application::name.eq(application_name))
        .filter(pipeline::kind.eq(PipelineKind::Deployment.as_str()))
        .distinct_on((pipeline_build::pipeline_id, pipeline_build::environment_id))
        .order((
            pipeline_build::pipeline_id.asc(),
            pipeline_build::environment_id.asc(),
            pipeline_build::start.desc(),
        ))
        .select(selection())
        .load(conn)
        .await
        .map_err(|e| {
            EngineError::database(
                format!("load_deployment_history project={project_key} app={application_name}"),
                e,
            )
        })?;
    scan_builds(rows)
}

/// Cascade-delete a build: logs, then test results, then jobs, then the
/// build row. Run inside one transaction.
pub async fn delete_cascade(conn: &mut AsyncPgConnection, id: i64) -> Result<()> {
    crate::store::log::delete_for_build(conn, id).await?;
    crate::store::test_result::delete_for_build(conn, id).await?;
    crate::store::job::delete_for_build(conn, id).await?;
    diesel::delete(pipeline_build::table.find(id))
        .execute(conn)
        .await
        .map_err(|e| EngineError::database(format!("delete_build id={id}"), e))?;
    Ok(())
}
