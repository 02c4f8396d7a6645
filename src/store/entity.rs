//! Loading projects, applications, environments, pipelines and users.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{EngineError, Result};
use crate::models::entity::{Application, Environment, Pipeline, PipelineKind, Project, User};
use crate::schema::{application, environment, pipeline, project, user};

pub async fn project_by_id(conn: &mut AsyncPgConnection, id: i64) -> Result<Project> {
    let (id, key, name): (i64, String, String) = project::table
        .find(id)
        .select((project::id, project::projectkey, project::name))
        .first(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_project id={id}"), e))?;
    Ok(Project { id, key, name })
}

pub async fn application_by_id(conn: &mut AsyncPgConnection, id: i64) -> Result<Application> {
    let row: (i64, i64, String, Option<String>, Option<String>, String) = application::table
        .inner_join(project::table)
        .filter(application::id.eq(id))
        .select((
            application::id,
            application::project_id,
            application::name,
            application::repo_fullname,
            application::vcs_server,
            project::projectkey,
        ))
        .first(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_application id={id}"), e))?;
    let (id, project_id, name, repo_fullname, vcs_server, project_key) = row;
    Ok(Application {
        id,
        project_id,
        project_key,
        name,
        repo_fullname,
        vcs_server,
    })
}

pub async fn environment_by_id(conn: &mut AsyncPgConnection, id: i64) -> Result<Environment> {
    let (id, project_id, name): (i64, Option<i64>, String) = environment::table
        .find(id)
        .select((environment::id, environment::project_id, environment::name))
        .first(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_environment id={id}"), e))?;
    Ok(Environment {
        id,
        project_id,
        name,
    })
}

pub async fn pipeline_by_id(conn: &mut AsyncPgConnection, id: i64) -> Result<Pipeline> {
    let row: (i64, i64, String, String, String, String) = pipeline::table
        .find(id)
        .select((
            pipeline::id,
            pipeline::project_id,
            pipeline::name,
            pipeline::kind,
            pipeline::stages,
            pipeline::args,
        ))
        .first(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_pipeline id={id}"), e))?;
    let (id, project_id, name, kind, stages, args) = row;

    let kind = PipelineKind::parse(&kind).ok_or_else(|| {
        EngineError::InvariantViolation(format!("unknown pipeline type {kind:?} on pipeline {id}"))
    })?;
    let stages = serde_json::from_str(&stages)
        .map_err(|e| EngineError::serialization(format!("stage template of pipeline {id}"), e))?;
    let parameters = serde_json::from_str(&args)
        .map_err(|e| EngineError::serialization(format!("defaults of pipeline {id}"), e))?;

    Ok(Pipeline {
        id,
        project_id,
        name,
        kind,
        stages,
        parameters,
    })
}

pub async fn user_by_id(conn: &mut AsyncPgConnection, id: i64) -> Result<User> {
    let (id, username, fullname, email): (i64, String, String, String) = user::table
        .find(id)
        .select((user::id, user::username, user::fullname, user::email))
        .first(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_user id={id}"), e))?;
    Ok(User {
        id,
        username,
        fullname,
        email,
    })
}
