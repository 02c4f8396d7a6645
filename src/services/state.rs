//! Build state machine.
//!
//! Stage status aggregates from its jobs, build status from its stages in
//! stage order. Job-result processing is serialized per build by a
//! non-blocking row lock; a concurrent reporter loses with a retriable
//! conflict. Events publish only after the transaction that made the
//! transition visible has committed.

use chrono::Utc;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection};

use crate::error::{EngineError, Result};
use crate::event::{self, BuildEventKind};
use crate::models::parameter::Parameter;
use crate::models::stage::Stage;
use crate::models::status::Status;
use crate::models::PipelineBuild;
use crate::services::{history, EngineContext};
use crate::store;

/// Aggregate a stage's status from its jobs.
///
/// A failed job fails the stage unless the stage is optional, in which
/// case it counts as done. An empty stage is trivially successful.
pub fn stage_status(stage: &Stage) -> Status {
    let any_fail = stage.jobs.iter().any(|j| j.status == Status::Fail);
    if any_fail && !stage.optional {
        return Status::Fail;
    }
    if stage
        .jobs
        .iter()
        .all(|j| matches!(j.status, Status::Success | Status::Fail))
    {
        return Status::Success;
    }
    if stage.jobs.iter().any(|j| j.status == Status::Building) {
        return Status::Building;
    }
    Status::Waiting
}

/// Re-aggregate every stage and derive the build status, promoting the
/// next Waiting stage to Building once all prior stages succeeded. A
/// failed stage fails the build and leaves the remaining stages untouched.
pub fn advance(stages: &mut [Stage]) -> Status {
    stages.sort_by_key(|s| s.order);

    let mut overall = Status::Success;
    for stage in stages.iter_mut() {
        if !stage.enabled {
            continue;
        }
        let mut status = stage_status(stage);
        if status == Status::Waiting && overall == Status::Success {
            // Every prior stage succeeded: this one starts.
            status = Status::Building;
        }
        stage.status = status;
        match status {
            Status::Fail => return Status::Fail,
            Status::Success => {}
            _ => overall = Status::Building,
        }
    }
    overall
}

/// Enforce the done-timestamp rule: set on terminal entry, cleared on
/// reentry into Building.
pub fn apply_done(pb: &mut PipelineBuild, new_status: Status) {
    if new_status.is_terminal() {
        if pb.done.is_none() {
            pb.done = Some(Utc::now());
        }
    } else {
        pb.done = None;
    }
    pb.status = new_status;
}

/// A worker's report for one job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub build_id: i64,
    pub job_id: i64,
    pub status: Status,
}

/// Persist a status/stage change and finish the transition: invalidate
/// derived queries, resolve the previous build on the same branch and
/// publish when the status actually changed.
pub async fn update_status_and_stages(
    conn: &mut AsyncPgConnection,
    ctx: &EngineContext,
    pb: &mut PipelineBuild,
    new_status: Status,
) -> Result<()> {
    let old_status = pb.status;
    apply_done(pb, new_status);
    store::build::update_status_and_stages(conn, pb).await?;
    finish_transition(conn, ctx, pb, old_status).await;
    Ok(())
}

/// Apply one job result under the build's row lock.
///
/// Returns the reloaded build with its new aggregate status. Fails fast
/// with [`EngineError::Conflict`] when another reporter holds the lock.
pub async fn process_job_result(
    conn: &mut AsyncPgConnection,
    ctx: &EngineContext,
    result: JobResult,
) -> Result<PipelineBuild> {
    let (pb, old_status) = conn
        .transaction::<(PipelineBuild, Status), EngineError, _>(|conn| {
            async move {
                store::build::lock_for_update(conn, result.build_id).await?;
                let mut pb = store::build::by_id(conn, result.build_id).await?;
                let old_status = pb.status;

                let job = pb
                    .stages
                    .iter_mut()
                    .flat_map(|s| s.jobs.iter_mut())
                    .find(|j| j.id == result.job_id)
                    .ok_or_else(|| {
                        EngineError::not_found(format!(
                            "job {} of build {}",
                            result.job_id, result.build_id
                        ))
                    })?;
                job.status = result.status;

                let new_status = advance(&mut pb.stages);
                apply_done(&mut pb, new_status);
                store::build::update_status_and_stages(conn, &pb).await?;
                Ok((pb, old_status))
            }
            .scope_boxed()
        })
        .await?;

    finish_transition(conn, ctx, &pb, old_status).await;
    Ok(pb)
}

/// Post-commit half of a transition: cache invalidation, previous-build
/// resolution and event publication. Never fails; the transition is
/// already durable.
pub(crate) async fn finish_transition(
    conn: &mut AsyncPgConnection,
    ctx: &EngineContext,
    pb: &PipelineBuild,
    old_status: Status,
) {
    ctx.cache.invalidate_application(&pb.application.project_key);

    if pb.status == old_status {
        return;
    }
    crate::metrics::build_status_changed(pb.status.as_str());
    if pb.status.is_terminal() {
        let duration = (Utc::now() - pb.start).num_milliseconds().max(0);
        crate::metrics::build_duration(duration as u64);
    }

    let previous = previous_for_event(conn, pb).await;
    event::emit(
        ctx.events.as_ref(),
        BuildEventKind::BuildStatusChanged,
        pb,
        previous.as_ref(),
    )
    .await;
    tracing::info!(
        build_id = pb.id,
        from = old_status.as_str(),
        to = pb.status.as_str(),
        "build transition"
    );
}

/// Previous build on the same branch, for event subscribers. Best-effort.
pub(crate) async fn previous_for_event(
    conn: &mut AsyncPgConnection,
    pb: &PipelineBuild,
) -> Option<PipelineBuild> {
    match history::previous_on_branch(conn, pb).await {
        Ok(previous) => previous,
        Err(e) => {
            tracing::warn!(build_id = pb.id, "cannot load previous build: {e}");
            None
        }
    }
}

/// Append a worker-exported variable as `cds.build.<name>` to the build's
/// parameters and to every running job's parameters, under the build's
/// row lock.
pub async fn insert_build_variable(
    conn: &mut AsyncPgConnection,
    build_id: i64,
    name: &str,
    value: &str,
) -> Result<()> {
    let qualified = format!("cds.build.{name}");
    conn.transaction::<(), EngineError, _>(|conn| {
        async move {
            let args = store::build::args_for_update(conn, build_id).await?;
            let mut params: Vec<Parameter> = serde_json::from_str(&args).map_err(|e| {
                EngineError::serialization(format!("parameters of build {build_id}"), e)
            })?;
            params.push(Parameter::string(&qualified, value));
            store::build::update_args(conn, build_id, &params).await?;

            for record in store::job::load_for_build(conn, build_id).await? {
                if Status::parse(&record.status) != Some(Status::Building) {
                    continue;
                }
                let mut job_params = record.decode_parameters()?;
                job_params.push(Parameter::string(&qualified, value));
                store::job::update_parameters(conn, record.id, &job_params).await?;
            }
            Ok(())
        }
        .scope_boxed()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stage::{Job, Stage};

    fn job(id: i64, status: Status) -> Job {
        Job {
            status,
            ..Job::new(id, format!("job-{id}"))
        }
    }

    fn stage(order: i32, jobs: Vec<Job>) -> Stage {
        Stage::new(order as i64 + 1, format!("stage-{order}"), order).with_jobs(jobs)
    }

    #[test]
    fn stage_fails_on_any_failed_job() {
        let s = stage(0, vec![job(1, Status::Success), job(2, Status::Fail)]);
        assert_eq!(stage_status(&s), Status::Fail);
    }

    #[test]
    fn optional_stage_absorbs_failures() {
        let mut s = stage(0, vec![job(1, Status::Success), job(2, Status::Fail)]);
        s.optional = true;
        assert_eq!(stage_status(&s), Status::Success);
    }

    #[test]
    fn stage_builds_while_any_job_runs() {
        let s = stage(0, vec![job(1, Status::Success), job(2, Status::Building)]);
        assert_eq!(stage_status(&s), Status::Building);
    }

    #[test]
    fn stage_waits_before_any_job_starts() {
        let s = stage(0, vec![job(1, Status::Waiting), job(2, Status::Waiting)]);
        assert_eq!(stage_status(&s), Status::Waiting);
    }

    #[test]
    fn empty_stage_is_trivially_successful() {
        assert_eq!(stage_status(&stage(0, vec![])), Status::Success);
    }

    #[test]
    fn build_succeeds_when_all_stages_succeed() {
        let mut stages = vec![
            stage(0, vec![job(1, Status::Success)]),
            stage(1, vec![job(2, Status::Success)]),
        ];
        assert_eq!(advance(&mut stages), Status::Success);
        assert_eq!(stages[0].status, Status::Success);
        assert_eq!(stages[1].status, Status::Success);
    }

    #[test]
    fn failed_stage_fails_build_and_skips_remaining() {
        let mut stages = vec![
            stage(0, vec![job(1, Status::Success)]),
            stage(1, vec![job(2, Status::Fail)]),
            stage(2, vec![job(3, Status::Waiting)]),
        ];
        stages[2].status = Status::Waiting;
        assert_eq!(advance(&mut stages), Status::Fail);
        assert_eq!(stages[1].status, Status::Fail);
        // The stage after the failure is left untouched.
        assert_eq!(stages[2].status, Status::Waiting);
    }

    #[test]
    fn next_waiting_stage_promoted_after_success() {
        let mut stages = vec![
            stage(0, vec![job(1, Status::Success)]),
            stage(1, vec![job(2, Status::Waiting)]),
        ];
        assert_eq!(advance(&mut stages), Status::Building);
        assert_eq!(stages[1].status, Status::Building);
    }

    #[test]
    fn waiting_stage_behind_running_stage_stays_waiting() {
        let mut stages = vec![
            stage(0, vec![job(1, Status::Building)]),
            stage(1, vec![job(2, Status::Waiting)]),
        ];
        assert_eq!(advance(&mut stages), Status::Building);
        assert_eq!(stages[0].status, Status::Building);
        assert_eq!(stages[1].status, Status::Waiting);
    }

    #[test]
    fn disabled_stage_is_skipped() {
        let mut stages = vec![
            stage(0, vec![job(1, Status::Success)]),
            stage(1, vec![job(2, Status::Waiting)]),
            stage(2, vec![job(3, Status::Waiting)]),
        ];
        stages[1].enabled = false;
        assert_eq!(advance(&mut stages), Status::Building);
        // Disabled stage untouched; the one after it starts.
        assert_eq!(stages[2].status, Status::Building);
    }

    #[test]
    fn advance_respects_declared_order() {
        let mut stages = vec![
            stage(1, vec![job(2, Status::Waiting)]),
            stage(0, vec![job(1, Status::Success)]),
        ];
        assert_eq!(advance(&mut stages), Status::Building);
        assert_eq!(stages[0].order, 0);
        assert_eq!(stages[1].status, Status::Building);
    }

    #[test]
    fn done_set_on_terminal_cleared_on_building() {
        let mut pb = crate::models::build::test_build();
        apply_done(&mut pb, Status::Success);
        assert!(pb.done.is_some());
        assert_eq!(pb.status, Status::Success);

        apply_done(&mut pb, Status::Building);
        assert!(pb.done.is_none());

        apply_done(&mut pb, Status::Stopped);
        assert!(pb.done.is_some());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_status() -> impl Strategy<Value = Status> {
            prop_oneof![
                Just(Status::Waiting),
                Just(Status::Building),
                Just(Status::Success),
                Just(Status::Fail),
            ]
        }

        fn arb_stages() -> impl Strategy<Value = Vec<Stage>> {
            proptest::collection::vec(
                (proptest::collection::vec(arb_status(), 0..4), any::<bool>()),
                1..5,
            )
            .prop_map(|specs| {
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (jobs, optional))| {
                        let mut s = stage(
                            i as i32,
                            jobs.into_iter()
                                .enumerate()
                                .map(|(j, st)| job((i * 10 + j) as i64, st))
                                .collect(),
                        );
                        s.optional = optional;
                        s
                    })
                    .collect()
            })
        }

        proptest! {
            // Invariant: the derived build status always matches a fresh
            // aggregation of the stages advance() just wrote.
            #[test]
            fn advance_is_stable(mut stages in arb_stages()) {
                let first = advance(&mut stages);
                let second = advance(&mut stages);
                prop_assert_eq!(first, second);
            }

            #[test]
            fn done_iff_terminal(status in arb_status()) {
                let mut pb = crate::models::build::test_build();
                apply_done(&mut pb, status);
                prop_assert_eq!(pb.done.is_some(), status.is_terminal());
            }
        }
    }
}
