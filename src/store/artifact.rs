//! Artifact references. Blobs live in the artifact store collaborator;
//! only the references are deleted on restart.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{EngineError, Result};
use crate::schema::artifact;

/// Delete artifact references for one build of a triple.
pub async fn delete_for_build(
    conn: &mut AsyncPgConnection,
    application_id: i64,
    pipeline_id: i64,
    environment_id: i64,
    build_number: i64,
) -> Result<usize> {
    diesel::delete(
        artifact::table
            .filter(artifact::application_id.eq(application_id))
            .filter(artifact::pipeline_id.eq(pipeline_id))
            .filter(artifact::environment_id.eq(environment_id))
            .filter(artifact::build_number.eq(build_number)),
    )
    .execute(conn)
    .await
    .map_err(|e| {
        EngineError::database(
            format!("delete_artifacts app={application_id} pip={pipeline_id} number={build_number}"),
            e,
        )
    })
}
