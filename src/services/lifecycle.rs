//! Lifecycle operations: stop, restart, delete and branch purge.

use chrono::Utc;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection};

use crate::error::{EngineError, Result};
use crate::event::{self, BuildEventKind};
use crate::models::stage::Stage;
use crate::models::status::Status;
use crate::models::PipelineBuild;
use crate::services::{state, EngineContext};
use crate::store;

/// Mark every non-terminal job and stage Stopped.
pub fn stop_snapshot(stages: &mut [Stage]) {
    for stage in stages.iter_mut() {
        for job in &mut stage.jobs {
            if !job.status.is_terminal() {
                job.status = Status::Stopped;
            }
        }
        if !stage.status.is_terminal() {
            stage.status = Status::Stopped;
        }
    }
}

/// Stop a running build. Cooperative: persistent state is marked and the
/// workers notice on their next poll. Idempotent: stopping a terminal
/// build is a no-op and publishes nothing.
pub async fn stop(
    conn: &mut AsyncPgConnection,
    ctx: &EngineContext,
    pb: &mut PipelineBuild,
) -> Result<()> {
    if pb.status.is_terminal() {
        tracing::debug!(build_id = pb.id, status = pb.status.as_str(), "already stopped");
        return Ok(());
    }

    stop_snapshot(&mut pb.stages);
    state::apply_done(pb, Status::Stopped);

    let pb_ref: &PipelineBuild = pb;
    conn.transaction::<(), EngineError, _>(|conn| {
        async move {
            store::build::update_status_and_stages(conn, pb_ref).await?;
            store::job::stop_unfinished(conn, pb_ref.id).await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    ctx.cache.invalidate_application(&pb.application.project_key);
    crate::metrics::build_status_changed(Status::Stopped.as_str());

    let previous = state::previous_for_event(conn, pb).await;
    event::emit(
        ctx.events.as_ref(),
        BuildEventKind::BuildStopped,
        pb,
        previous.as_ref(),
    )
    .await;
    tracing::info!(build_id = pb.id, "build stopped");
    Ok(())
}

/// What a restart must delete besides the snapshot rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPlan {
    /// Successful builds restart from scratch: all jobs, logs, artifacts
    /// and test results go. Failed builds only clear their failed stages.
    pub full_reset: bool,
    pub cleared_job_ids: Vec<i64>,
}

/// Rewrite the snapshot for a restart and report what to delete.
///
/// Success restarts everything; Fail resets only the failed stages and
/// keeps successful ones. Any other status refuses.
pub fn plan_restart(pb: &mut PipelineBuild) -> Result<RestartPlan> {
    match pb.status {
        Status::Success => {
            let mut cleared = Vec::new();
            let mut first = true;
            for stage in pb.stages.iter_mut() {
                cleared.extend(stage.jobs.iter().map(|j| j.id));
                stage.jobs.clear();
                if first && stage.enabled {
                    stage.status = Status::Waiting;
                    first = false;
                }
            }
            pb.start = Utc::now();
            state::apply_done(pb, Status::Building);
            Ok(RestartPlan {
                full_reset: true,
                cleared_job_ids: cleared,
            })
        }
        Status::Fail => {
            let mut cleared = Vec::new();
            for stage in pb.stages.iter_mut() {
                if stage.status != Status::Fail {
                    continue;
                }
                cleared.extend(stage.jobs.iter().map(|j| j.id));
                stage.jobs.clear();
                stage.status = Status::Waiting;
            }
            state::apply_done(pb, Status::Building);
            Ok(RestartPlan {
                full_reset: false,
                cleared_job_ids: cleared,
            })
        }
        other => Err(EngineError::Conflict(format!(
            "cannot restart build {} in status {other}",
            pb.id
        ))),
    }
}

/// Restart a terminal build and publish `build_restarted`.
///
/// The event is published unconditionally: a restart is an observable
/// transition even though the stored status is Building either way.
pub async fn restart(
    conn: &mut AsyncPgConnection,
    ctx: &EngineContext,
    pb: &mut PipelineBuild,
) -> Result<()> {
    let plan = plan_restart(pb)?;

    let pb_ref: &PipelineBuild = pb;
    let plan_ref = &plan;
    conn.transaction::<(), EngineError, _>(|conn| {
        async move {
            if plan_ref.full_reset {
                store::log::delete_for_build(conn, pb_ref.id).await?;
                store::artifact::delete_for_build(
                    conn,
                    pb_ref.application.id,
                    pb_ref.pipeline.id,
                    pb_ref.environment.id,
                    pb_ref.build_number,
                )
                .await?;
                store::test_result::delete_for_build(conn, pb_ref.id).await?;
                store::job::delete_for_build(conn, pb_ref.id).await?;
            } else {
                store::log::delete_for_jobs(conn, &plan_ref.cleared_job_ids).await?;
                store::job::delete_many(conn, &plan_ref.cleared_job_ids).await?;
            }
            store::build::update_status_and_stages(conn, pb_ref).await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    ctx.cache.invalidate_application(&pb.application.project_key);
    crate::metrics::build_status_changed(Status::Building.as_str());

    let previous = state::previous_for_event(conn, pb).await;
    event::emit(
        ctx.events.as_ref(),
        BuildEventKind::BuildRestarted,
        pb,
        previous.as_ref(),
    )
    .await;
    tracing::info!(
        build_id = pb.id,
        full_reset = plan.full_reset,
        "build restarted"
    );
    Ok(())
}

/// Cascade-delete a build in one transaction: logs, then test results,
/// then jobs, then the build row.
pub async fn delete_build(conn: &mut AsyncPgConnection, build_id: i64) -> Result<()> {
    conn.transaction::<(), EngineError, _>(|conn| {
        async move { store::build::delete_cascade(conn, build_id).await }.scope_boxed()
    })
    .await?;
    tracing::info!(build_id, "build deleted");
    Ok(())
}

/// Delete every build of an application branch, stopping the running ones
/// first. A build that refuses to stop or delete is logged and skipped.
pub async fn purge_branch(
    conn: &mut AsyncPgConnection,
    ctx: &EngineContext,
    application_id: i64,
    branch: &str,
) -> Result<usize> {
    let builds = store::build::by_app_and_branch(conn, application_id, branch).await?;

    let mut purged = 0;
    for mut pb in builds {
        if pb.status == Status::Building {
            if let Err(e) = stop(conn, ctx, &mut pb).await {
                tracing::error!(build_id = pb.id, "cannot stop build for purge: {e}");
                continue;
            }
        }
        if let Err(e) = delete_build(conn, pb.id).await {
            tracing::error!(build_id = pb.id, "cannot delete build: {e}");
            continue;
        }
        purged += 1;
    }
    tracing::info!(application_id, branch, purged, "branch purged");
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build::test_build;
    use crate::models::stage::Job;

    fn job(id: i64, status: Status) -> Job {
        Job {
            status,
            ..Job::new(id, format!("job-{id}"))
        }
    }

    fn staged_build(specs: &[(Status, Vec<Job>)]) -> PipelineBuild {
        let mut pb = test_build();
        pb.stages = specs
            .iter()
            .enumerate()
            .map(|(i, (status, jobs))| {
                let mut s = Stage::new(i as i64 + 1, format!("stage-{i}"), i as i32)
                    .with_jobs(jobs.clone());
                s.status = *status;
                s
            })
            .collect();
        pb
    }

    #[test]
    fn stop_snapshot_spares_finished_work() {
        let mut pb = staged_build(&[
            (Status::Success, vec![job(1, Status::Success)]),
            (Status::Building, vec![job(2, Status::Success), job(3, Status::Building)]),
            (Status::Waiting, vec![job(4, Status::Waiting)]),
        ]);
        stop_snapshot(&mut pb.stages);

        assert_eq!(pb.stages[0].status, Status::Success);
        assert_eq!(pb.stages[0].jobs[0].status, Status::Success);
        assert_eq!(pb.stages[1].status, Status::Stopped);
        assert_eq!(pb.stages[1].jobs[0].status, Status::Success);
        assert_eq!(pb.stages[1].jobs[1].status, Status::Stopped);
        assert_eq!(pb.stages[2].status, Status::Stopped);
        assert_eq!(pb.stages[2].jobs[0].status, Status::Stopped);
    }

    #[test]
    fn stop_snapshot_is_idempotent() {
        let mut pb = staged_build(&[(Status::Building, vec![job(1, Status::Building)])]);
        stop_snapshot(&mut pb.stages);
        let first = pb.stages.clone();
        stop_snapshot(&mut pb.stages);
        assert_eq!(pb.stages, first);
    }

    #[test]
    fn restart_after_failure_resets_failed_stages_only() {
        let mut pb = staged_build(&[
            (Status::Success, vec![job(1, Status::Success)]),
            (Status::Fail, vec![job(2, Status::Fail)]),
            (Status::Waiting, vec![job(3, Status::Waiting)]),
        ]);
        pb.status = Status::Fail;
        pb.done = Some(Utc::now());

        let plan = plan_restart(&mut pb).unwrap();

        assert!(!plan.full_reset);
        assert_eq!(plan.cleared_job_ids, vec![2]);
        assert_eq!(pb.stages[0].status, Status::Success);
        assert_eq!(pb.stages[0].jobs.len(), 1);
        assert_eq!(pb.stages[1].status, Status::Waiting);
        assert!(pb.stages[1].jobs.is_empty());
        assert_eq!(pb.stages[2].status, Status::Waiting);
        assert_eq!(pb.stages[2].jobs.len(), 1);
        assert_eq!(pb.status, Status::Building);
        assert!(pb.done.is_none());
    }

    #[test]
    fn restart_after_success_clears_everything() {
        let mut pb = staged_build(&[
            (Status::Success, vec![job(1, Status::Success)]),
            (Status::Success, vec![job(2, Status::Success)]),
        ]);
        pb.status = Status::Success;
        pb.done = Some(Utc::now());

        let plan = plan_restart(&mut pb).unwrap();

        assert!(plan.full_reset);
        assert_eq!(plan.cleared_job_ids, vec![1, 2]);
        assert_eq!(pb.stages[0].status, Status::Waiting);
        assert!(pb.stages.iter().all(|s| s.jobs.is_empty()));
        assert_eq!(pb.status, Status::Building);
        assert!(pb.done.is_none());
    }

    #[test]
    fn restart_twice_preserves_stage_set_and_first_stage_waiting() {
        let mut pb = staged_build(&[
            (Status::Success, vec![job(1, Status::Success)]),
            (Status::Fail, vec![job(2, Status::Fail)]),
        ]);
        pb.status = Status::Fail;
        plan_restart(&mut pb).unwrap();
        let names: Vec<_> = pb.stages.iter().map(|s| s.name.clone()).collect();

        // Simulate the second run failing the same way, then restart again.
        pb.status = Status::Fail;
        pb.stages[1].status = Status::Fail;
        plan_restart(&mut pb).unwrap();

        assert_eq!(
            pb.stages.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            names
        );
        assert_eq!(pb.stages[1].status, Status::Waiting);
        assert_eq!(pb.status, Status::Building);
    }

    #[test]
    fn restart_refuses_non_terminal_builds() {
        let mut pb = staged_build(&[(Status::Building, vec![job(1, Status::Building)])]);
        pb.status = Status::Building;
        let err = plan_restart(&mut pb).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}
