//! Per-build test result blobs.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{EngineError, Result};
use crate::schema::pipeline_test_result;

pub async fn delete_for_build(conn: &mut AsyncPgConnection, pipeline_build_id: i64) -> Result<()> {
    diesel::delete(
        pipeline_test_result::table
            .filter(pipeline_test_result::pipeline_build_id.eq(pipeline_build_id)),
    )
    .execute(conn)
    .await
    .map_err(|e| {
        EngineError::database(format!("delete_test_results build={pipeline_build_id}"), e)
    })?;
    Ok(())
}
