//! Scheduled job rows handed to the worker fleet.
//!
//! The job's action tree travels as an opaque blob; workers interpret it.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{EngineError, Result};
use crate::models::parameter::Parameter;
use crate::models::stage::Job;
use crate::models::status::Status;
use crate::schema::pipeline_build_job;

#[derive(Debug, Clone, Queryable)]
pub struct JobRecord {
    pub id: i64,
    pub pipeline_build_id: i64,
    pub job: String,
    pub parameters: String,
    pub status: String,
    pub queued: DateTime<Utc>,
    pub start: Option<DateTime<Utc>>,
    pub done: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = pipeline_build_job)]
pub struct NewJobRecord {
    pub pipeline_build_id: i64,
    pub job: String,
    pub parameters: String,
    pub status: String,
    pub queued: DateTime<Utc>,
}

impl JobRecord {
    pub fn decode_parameters(&self) -> Result<Vec<Parameter>> {
        serde_json::from_str(&self.parameters)
            .map_err(|e| EngineError::serialization(format!("parameters of job {}", self.id), e))
    }
}

/// Queue a job for execution.
pub async fn insert(
    conn: &mut AsyncPgConnection,
    pipeline_build_id: i64,
    job: &Job,
    parameters: &[Parameter],
) -> Result<i64> {
    let record = NewJobRecord {
        pipeline_build_id,
        job: serde_json::to_string(job)
            .map_err(|e| EngineError::serialization(format!("job {}", job.id), e))?,
        parameters: serde_json::to_string(parameters)
            .map_err(|e| EngineError::serialization(format!("parameters of job {}", job.id), e))?,
        status: Status::Waiting.as_str().to_string(),
        queued: Utc::now(),
    };
    diesel::insert_into(pipeline_build_job::table)
        .values(&record)
        .returning(pipeline_build_job::id)
        .get_result(conn)
        .await
        .map_err(|e| EngineError::database(format!("insert_job build={pipeline_build_id}"), e))
}

pub async fn load_for_build(
    conn: &mut AsyncPgConnection,
    pipeline_build_id: i64,
) -> Result<Vec<JobRecord>> {
    pipeline_build_job::table
        .filter(pipeline_build_job::pipeline_build_id.eq(pipeline_build_id))
        .order(pipeline_build_job::id.asc())
        .load(conn)
        .await
        .map_err(|e| EngineError::database(format!("load_jobs build={pipeline_build_id}"), e))
}

pub async fn update_parameters(
    conn: &mut AsyncPgConnection,
    id: i64,
    parameters: &[Parameter],
) -> Result<()> {
    let blob = serde_json::to_string(parameters)
        .map_err(|e| EngineError::serialization(format!("parameters of job {id}"), e))?;
    diesel::update(pipeline_build_job::table.find(id))
        .set(pipeline_build_job::parameters.eq(blob))
        .execute(conn)
        .await
        .map_err(|e| EngineError::database(format!("update_job_parameters id={id}"), e))?;
    Ok(())
}

pub async fn update_status(conn: &mut AsyncPgConnection, id: i64, status: Status) -> Result<()> {
    let done = status.is_terminal().then(Utc::now);
    diesel::update(pipeline_build_job::table.find(id))
        .set((
            pipeline_build_job::status.eq(status.as_str()),
            pipeline_build_job::done.eq(done),
        ))
        .execute(conn)
        .await
        .map_err(|e| EngineError::database(format!("update_job_status id={id}"), e))?;
    Ok(())
}

/// Mark every unfinished job of the build Stopped.
pub async fn stop_unfinished(conn: &mut AsyncPgConnection, pipeline_build_id: i64) -> Result<usize> {
    diesel::update(
        pipeline_build_job::table
            .filter(pipeline_build_job::pipeline_build_id.eq(pipeline_build_id))
            .filter(pipeline_build_job::status.eq_any(vec![
                Status::Waiting.as_str(),
                Status::Building.as_str(),
            ])),
    )
    .set((
        pipeline_build_job::status.eq(Status::Stopped.as_str()),
        pipeline_build_job::done.eq(Some(Utc::now())),
    ))
    .execute(conn)
    .await
    .map_err(|e| EngineError::database(format!("stop_jobs build={pipeline_build_id}"), e))
}

pub async fn delete_for_build(conn: &mut AsyncPgConnection, pipeline_build_id: i64) -> Result<()> {
    diesel::delete(
        pipeline_build_job::table.filter(pipeline_build_job::pipeline_build_id.eq(pipeline_build_id)),
    )
    .execute(conn)
    .await
    .map_err(|e| EngineError::database(format!("delete_jobs build={pipeline_build_id}"), e))?;
    Ok(())
}

pub async fn delete_many(conn: &mut AsyncPgConnection, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    diesel::delete(pipeline_build_job::table.filter(pipeline_build_job::id.eq_any(ids.to_vec())))
        .execute(conn)
        .await
        .map_err(|e| EngineError::database("delete_jobs", e))?;
    Ok(())
}
