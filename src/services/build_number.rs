//! Monotonic build-number allocation.
//!
//! The highest-numbered prior build of the triple is row-locked for the
//! remainder of the surrounding transaction, so two concurrent triggers
//! can never be handed the same number. The lock is non-blocking: the
//! loser of a race gets [`crate::EngineError::Conflict`] immediately and
//! must retry, which the coordinator does with a short backoff.

use diesel_async::AsyncPgConnection;

use crate::error::Result;
use crate::store;

/// Allocate the next build number for `(pipeline, application, environment)`.
///
/// Must run inside the transaction that inserts the build; the allocation
/// is only durable once that transaction commits.
pub async fn allocate(
    conn: &mut AsyncPgConnection,
    pipeline_id: i64,
    application_id: i64,
    environment_id: i64,
) -> Result<i64> {
    let last = store::build::last_build_number_for_update(
        conn,
        pipeline_id,
        application_id,
        environment_id,
    )
    .await
    .inspect_err(|e| {
        if e.is_retriable() {
            crate::metrics::allocation_conflict();
        }
    })?;
    Ok(last.unwrap_or(0) + 1)
}
