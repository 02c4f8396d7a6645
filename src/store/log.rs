//! Build log rows. Payload storage belongs to the log collaborator; the
//! engine only ever deletes here (restart and cascade delete).

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{EngineError, Result};
use crate::schema::build_log;

pub async fn delete_for_build(conn: &mut AsyncPgConnection, pipeline_build_id: i64) -> Result<()> {
    diesel::delete(build_log::table.filter(build_log::pipeline_build_id.eq(pipeline_build_id)))
        .execute(conn)
        .await
        .map_err(|e| EngineError::database(format!("delete_logs build={pipeline_build_id}"), e))?;
    Ok(())
}

pub async fn delete_for_jobs(conn: &mut AsyncPgConnection, job_ids: &[i64]) -> Result<()> {
    if job_ids.is_empty() {
        return Ok(());
    }
    diesel::delete(build_log::table.filter(build_log::pipeline_build_job_id.eq_any(job_ids.to_vec())))
        .execute(conn)
        .await
        .map_err(|e| EngineError::database("delete_logs_for_jobs", e))?;
    Ok(())
}
