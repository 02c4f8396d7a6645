//! Build coordinator: orchestrates creation, previous-hash injection and
//! child-build fan-out.
//!
//! `create_build` runs its allocation + insert inside a single
//! transaction; the VCS lookups happen before it so no network I/O runs
//! while the allocator's row lock is held. A lost allocation race is
//! retried with a short backoff.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection};

use crate::error::{EngineError, Result};
use crate::event::{self, BuildEventKind};
use crate::models::build::{BuildApplication, BuildEnvironment, BuildPipeline};
use crate::models::entity::{Application, Environment, Pipeline, PipelineKind};
use crate::models::parameter::{self, Parameter};
use crate::models::stage::Stage;
use crate::models::status::Status;
use crate::models::{PipelineBuild, Trigger};
use crate::services::params::{self, CanonicalKeys, VcsValues};
use crate::services::{build_number, state, EngineContext};
use crate::store;
use crate::store::build::NewBuildRecord;

/// A request to create one build.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub trigger: Trigger,
    /// Caller-supplied parameters (trigger payload, hook values).
    pub params: Vec<Parameter>,
    /// Application-level overrides of the pipeline defaults.
    pub app_pipeline_args: Vec<Parameter>,
}

/// A downstream build to start when a parent finishes.
#[derive(Debug, Clone)]
pub struct ChildBuildSpec {
    pub pipeline_id: i64,
    pub application_id: i64,
    pub environment_id: i64,
    pub params: Vec<Parameter>,
    pub app_pipeline_args: Vec<Parameter>,
}

/// Create a new pipeline build.
///
/// Loads the pipeline/application/environment, captures VCS context,
/// allocates the build number and inserts the build in one transaction,
/// then best-effort injects `git.previousHash` and publishes
/// `build_created` carrying the previous build on the same branch.
pub async fn create_build(
    conn: &mut AsyncPgConnection,
    ctx: &EngineContext,
    pipeline_id: i64,
    application_id: i64,
    environment_id: i64,
    mut req: BuildRequest,
) -> Result<PipelineBuild> {
    validate_trigger(&req.trigger)?;

    let application = store::entity::application_by_id(conn, application_id).await?;
    let pipeline = store::entity::pipeline_by_id(conn, pipeline_id).await?;
    let environment = store::entity::environment_by_id(conn, environment_id).await?;

    let parent = match req.trigger.parent_build_id {
        Some(id) => Some(store::build::by_id(conn, id).await?),
        None => None,
    };

    let vcs = gather_vcs_context(ctx, &application, &mut req.trigger, &req.params).await;

    let mut attempt = 0;
    let mut pb = loop {
        attempt += 1;
        match insert_build(conn, &application, &pipeline, &environment, &req, parent.as_ref(), &vcs)
            .await
        {
            Ok(pb) => break pb,
            Err(e) if e.is_retriable() && attempt < ctx.config.allocation_retries => {
                tracing::warn!(
                    application_id,
                    pipeline_id,
                    attempt,
                    "build-number allocation conflict, retrying: {e}"
                );
                tokio::time::sleep(Duration::from_millis(
                    ctx.config.allocation_backoff_ms * u64::from(attempt),
                ))
                .await;
            }
            Err(e) => return Err(e),
        }
    };

    crate::metrics::build_created(pipeline.kind.as_str());
    ctx.cache.invalidate_application(&application.project_key);

    // Second phase, after commit: previous-hash injection is best-effort.
    let previous = inject_previous_hash(conn, &mut pb).await;

    event::emit(
        ctx.events.as_ref(),
        BuildEventKind::BuildCreated,
        &pb,
        previous.as_ref(),
    )
    .await;
    tracing::info!(
        build_id = pb.id,
        application = %application.name,
        pipeline = %pipeline.name,
        build_number = pb.build_number,
        branch = %pb.trigger.vcs_branch,
        "build created"
    );
    Ok(pb)
}

/// One allocation + insert attempt, in its own transaction. A rollback
/// leaves no trace.
async fn insert_build(
    conn: &mut AsyncPgConnection,
    application: &Application,
    pipeline: &Pipeline,
    environment: &Environment,
    req: &BuildRequest,
    parent: Option<&PipelineBuild>,
    vcs: &VcsValues,
) -> Result<PipelineBuild> {
    conn.transaction::<PipelineBuild, EngineError, _>(|conn| {
        async move {
            let build_number =
                build_number::allocate(conn, pipeline.id, application.id, environment.id).await?;
            let version = resolve_version(parent, application.id, pipeline.kind, build_number);

            let canonical = CanonicalKeys {
                project_key: &application.project_key,
                pipeline_name: &pipeline.name,
                application_name: &application.name,
                environment_name: &environment.name,
                build_number,
                version,
                triggered_by: req.trigger.triggered_by.as_ref(),
            };
            let parameters = params::resolve(
                &pipeline.parameters,
                &req.app_pipeline_args,
                &req.params,
                vcs,
                &canonical,
            );
            let stages = snapshot_stages(&pipeline.stages);
            let start = Utc::now();

            let record = NewBuildRecord {
                pipeline_id: pipeline.id,
                application_id: application.id,
                environment_id: environment.id,
                build_number,
                version,
                status: Status::Building.as_str().to_string(),
                args: serde_json::to_string(&parameters)
                    .map_err(|e| EngineError::serialization("build parameters", e))?,
                stages: serde_json::to_string(&stages)
                    .map_err(|e| EngineError::serialization("stage snapshot", e))?,
                commits: "[]".to_string(),
                start,
                done: None,
                manual_trigger: req.trigger.manual,
                scheduled_trigger: req.trigger.scheduled,
                triggered_by: req.trigger.triggered_by.as_ref().map(|u| u.id),
                parent_pipeline_build_id: req.trigger.parent_build_id,
                vcs_changes_branch: some_nonempty(&req.trigger.vcs_branch),
                vcs_changes_hash: some_nonempty(&req.trigger.vcs_hash),
                vcs_changes_author: some_nonempty(&req.trigger.vcs_author),
            };
            let id = store::build::insert(conn, &record).await?;

            Ok(PipelineBuild {
                id,
                application: BuildApplication {
                    id: application.id,
                    name: application.name.clone(),
                    project_id: application.project_id,
                    project_key: application.project_key.clone(),
                    repo_fullname: application.repo_fullname.clone(),
                },
                pipeline: BuildPipeline {
                    id: pipeline.id,
                    name: pipeline.name.clone(),
                    kind: pipeline.kind,
                },
                environment: BuildEnvironment {
                    id: environment.id,
                    name: environment.name.clone(),
                },
                build_number,
                version,
                status: Status::Building,
                start,
                done: None,
                trigger: req.trigger.clone(),
                parameters,
                stages,
                commits: Vec::new(),
            })
        }
        .scope_boxed()
    })
    .await
}

fn some_nonempty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Exactly one of manual, scheduled or parent-derived must hold.
fn validate_trigger(trigger: &Trigger) -> Result<()> {
    let causes =
        u8::from(trigger.manual) + u8::from(trigger.scheduled) + u8::from(trigger.parent_build_id.is_some());
    if causes != 1 {
        return Err(EngineError::InvariantViolation(format!(
            "trigger must have exactly one cause, got {causes}"
        )));
    }
    Ok(())
}

/// A child on a non-build pipeline inherits its same-application parent's
/// version; every other build is versioned by its own build number.
fn resolve_version(
    parent: Option<&PipelineBuild>,
    application_id: i64,
    kind: PipelineKind,
    build_number: i64,
) -> i64 {
    match parent {
        Some(parent)
            if parent.application.id == application_id
                && kind != PipelineKind::Build
                && parent.version > 0 =>
        {
            parent.version
        }
        _ => build_number,
    }
}

/// Deep-copy the pipeline's stage template, waking the first enabled stage.
fn snapshot_stages(template: &[Stage]) -> Vec<Stage> {
    let mut stages = template.to_vec();
    stages.sort_by_key(|s| s.order);
    if let Some(first) = stages.iter_mut().find(|s| s.enabled) {
        first.status = Status::Waiting;
    }
    stages
}

/// Capture branch, hash, commit metadata and clone URLs before the insert
/// transaction. Every VCS failure degrades to the canonical keys only.
async fn gather_vcs_context(
    ctx: &EngineContext,
    application: &Application,
    trigger: &mut Trigger,
    caller_params: &[Parameter],
) -> VcsValues {
    let client = match (&ctx.vcs, &application.repo_fullname) {
        (Some(client), Some(repo)) => Some((client.as_ref(), repo.as_str())),
        _ => None,
    };

    let mut vals = VcsValues::default();

    if let Some((client, repo)) = client {
        match client.repo(repo).await {
            Ok(remote) => {
                vals.ssh_url = Some(remote.ssh_clone_url);
                vals.http_url = Some(remote.http_clone_url);
            }
            Err(e) => {
                crate::metrics::vcs_degraded("repo");
                tracing::warn!(repo = %repo, "cannot get repository: {e}");
            }
        }
    }

    if !trigger.vcs_branch.is_empty() {
        vals.branch = trigger.vcs_branch.clone();
        vals.hash = trigger.vcs_hash.clone();
        if vals.hash.is_empty() {
            // Hash absent: use the named branch's latest commit.
            if let Some((client, repo)) = client {
                match client.branch(repo, &vals.branch).await {
                    Ok(b) => vals.hash = b.latest_commit,
                    Err(e) => {
                        crate::metrics::vcs_degraded("branch");
                        tracing::warn!(repo = %repo, branch = %vals.branch, "cannot get branch: {e}");
                    }
                }
            }
            trigger.vcs_hash = vals.hash.clone();
        }
    } else {
        // The branch may come from the caller's parameters; otherwise the
        // repository default, falling back to the configured name.
        let mut default_branch = ctx.config.default_branch.clone();
        let mut latest: HashMap<String, String> = HashMap::new();
        if let Some((client, repo)) = client {
            match client.branches(repo).await {
                Ok(branches) => {
                    for b in branches {
                        if b.default {
                            default_branch = b.display_id.clone();
                        }
                        latest.insert(b.display_id, b.latest_commit);
                    }
                }
                Err(e) => {
                    crate::metrics::vcs_degraded("branches");
                    tracing::warn!(repo = %repo, "cannot list branches: {e}");
                }
            }
        }

        let param_branch = parameter::value_of(caller_params, "git.branch")
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let param_hash = parameter::value_of(caller_params, "git.hash")
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        vals.branch = param_branch.unwrap_or(default_branch);
        vals.hash = param_hash
            .or_else(|| latest.get(&vals.branch).cloned())
            .unwrap_or_default();

        trigger.vcs_branch = vals.branch.clone();
        trigger.vcs_hash = vals.hash.clone();
    }

    if let Some((client, repo)) = client {
        if !vals.hash.is_empty() {
            match client.commit(repo, &vals.hash).await {
                Ok(commit) => {
                    trigger.vcs_author = commit.author.name.clone();
                    vals.author = Some(commit.author.name);
                    vals.message = Some(commit.message);
                }
                Err(e) => {
                    crate::metrics::vcs_degraded("commit");
                    tracing::warn!(repo = %repo, hash = %vals.hash, "cannot get commit: {e}");
                }
            }
        }
    }

    vals
}

/// Load the previous build on the same branch and, when it carries a
/// `git.hash`, append `git.previousHash` to the new build's parameters.
/// Returns the previous build for the creation event. Best-effort.
async fn inject_previous_hash(
    conn: &mut AsyncPgConnection,
    pb: &mut PipelineBuild,
) -> Option<PipelineBuild> {
    let previous = state::previous_for_event(conn, pb).await?;

    if let Some(hash) = parameter::value_of(&previous.parameters, "git.hash")
        .filter(|h| !h.is_empty())
        .map(str::to_string)
    {
        pb.parameters.push(Parameter::string("git.previousHash", hash));
        if let Err(e) = store::build::update_args(conn, pb.id, &pb.parameters).await {
            tracing::warn!(build_id = pb.id, "cannot persist git.previousHash: {e}");
        }
    }
    Some(previous)
}

/// Fan out child builds of a successful parent. A failing child is logged
/// and skipped so one broken downstream pipeline cannot block the rest.
pub async fn trigger_children(
    conn: &mut AsyncPgConnection,
    ctx: &EngineContext,
    parent: &PipelineBuild,
    specs: &[ChildBuildSpec],
) -> Result<Vec<PipelineBuild>> {
    if parent.status != Status::Success {
        return Err(EngineError::InvariantViolation(format!(
            "cannot trigger children of build {} in status {}",
            parent.id, parent.status
        )));
    }

    let mut children = Vec::with_capacity(specs.len());
    for spec in specs {
        let req = BuildRequest {
            trigger: Trigger {
                parent_build_id: Some(parent.id),
                vcs_branch: parent.trigger.vcs_branch.clone(),
                vcs_hash: parent.trigger.vcs_hash.clone(),
                vcs_author: parent.trigger.vcs_author.clone(),
                ..Trigger::default()
            },
            params: spec.params.clone(),
            app_pipeline_args: spec.app_pipeline_args.clone(),
        };
        match create_build(
            conn,
            ctx,
            spec.pipeline_id,
            spec.application_id,
            spec.environment_id,
            req,
        )
        .await
        {
            Ok(child) => children.push(child),
            Err(e) => {
                tracing::error!(
                    parent_id = parent.id,
                    pipeline_id = spec.pipeline_id,
                    "cannot trigger child build: {e}"
                );
            }
        }
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::event::MemoryPublisher;
    use crate::models::build::test_build;
    use crate::models::entity::User;
    use crate::models::stage::Job;
    use crate::vcs::stub::StubVcs;
    use crate::vcs::VcsClient;

    fn test_application() -> Application {
        Application {
            id: 42,
            project_id: 1,
            project_key: "ACME".into(),
            name: "shop".into(),
            repo_fullname: Some("acme/shop".into()),
            vcs_server: Some("corp-vcs".into()),
        }
    }

    fn ctx_with(vcs: Option<Arc<dyn VcsClient>>) -> EngineContext {
        EngineContext::new(EngineConfig::default(), vcs, Arc::new(MemoryPublisher::new()))
    }

    #[test]
    fn trigger_must_have_exactly_one_cause() {
        assert!(validate_trigger(&Trigger::scheduled()).is_ok());
        assert!(validate_trigger(&Trigger::from_parent(5)).is_ok());

        let none = Trigger::default();
        assert!(validate_trigger(&none).is_err());

        let both = Trigger {
            manual: true,
            scheduled: true,
            ..Trigger::default()
        };
        assert!(validate_trigger(&both).is_err());
    }

    #[test]
    fn version_inherited_from_same_app_parent_on_deployment() {
        let mut parent = test_build();
        parent.version = 5;

        // Same application, deployment pipeline: inherit.
        assert_eq!(
            resolve_version(Some(&parent), 42, PipelineKind::Deployment, 8),
            5
        );
        // Build pipelines always reversion.
        assert_eq!(resolve_version(Some(&parent), 42, PipelineKind::Build, 8), 8);
        // Foreign-application parents never propagate their version.
        assert_eq!(
            resolve_version(Some(&parent), 99, PipelineKind::Deployment, 8),
            8
        );
        // No parent at all.
        assert_eq!(resolve_version(None, 42, PipelineKind::Testing, 8), 8);
    }

    #[test]
    fn snapshot_wakes_first_enabled_stage_only() {
        let mut template = vec![
            Stage::new(1, "compile", 0).with_jobs(vec![Job::new(1, "build")]),
            Stage::new(2, "deploy", 1),
        ];
        template[0].status = Status::Disabled;
        template[0].enabled = false;
        template[1].status = Status::Skipped;

        let stages = snapshot_stages(&template);
        assert_eq!(stages[0].status, Status::Disabled);
        assert_eq!(stages[1].status, Status::Waiting);
        // Deep copy: the template is untouched.
        assert_eq!(template[1].status, Status::Skipped);
        assert_eq!(stages[0].jobs.len(), 1);
    }

    #[tokio::test]
    async fn vcs_context_resolves_default_branch_and_latest_commit() {
        let stub = Arc::new(
            StubVcs::with_branch("main", true, "abc123").add_commit("abc123", "ada", "fix checkout"),
        );
        let ctx = ctx_with(Some(stub.clone()));

        let mut trigger = Trigger::scheduled();
        let vals = gather_vcs_context(&ctx, &test_application(), &mut trigger, &[]).await;

        assert_eq!(vals.branch, "main");
        assert_eq!(vals.hash, "abc123");
        assert_eq!(vals.author.as_deref(), Some("ada"));
        assert_eq!(vals.message.as_deref(), Some("fix checkout"));
        assert_eq!(trigger.vcs_branch, "main");
        assert_eq!(trigger.vcs_hash, "abc123");
        assert_eq!(trigger.vcs_author, "ada");
    }

    #[tokio::test]
    async fn vcs_down_degrades_to_configured_default_branch() {
        let stub = Arc::new(StubVcs {
            down: true,
            ..StubVcs::default()
        });
        let ctx = ctx_with(Some(stub));

        let mut trigger = Trigger::scheduled();
        let vals = gather_vcs_context(&ctx, &test_application(), &mut trigger, &[]).await;

        assert_eq!(vals.branch, "master");
        assert!(vals.hash.is_empty());
        assert!(vals.author.is_none());
        assert!(vals.ssh_url.is_none());
    }

    #[tokio::test]
    async fn trigger_branch_wins_over_vcs_default() {
        let stub = Arc::new(StubVcs::with_branch("main", true, "abc123").add_commit(
            "fff000",
            "bob",
            "hotfix",
        ));
        let ctx = ctx_with(Some(stub));

        let mut trigger = Trigger {
            scheduled: true,
            vcs_branch: "hotfix/1".into(),
            vcs_hash: "fff000".into(),
            ..Trigger::default()
        };
        let vals = gather_vcs_context(&ctx, &test_application(), &mut trigger, &[]).await;

        assert_eq!(vals.branch, "hotfix/1");
        assert_eq!(vals.hash, "fff000");
        assert_eq!(vals.author.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn trigger_branch_without_hash_backfills_latest_commit() {
        let stub = Arc::new(
            StubVcs::with_branch("main", true, "abc123").add_commit("abc123", "ada", "fix checkout"),
        );
        let ctx = ctx_with(Some(stub.clone()));

        let mut trigger = Trigger {
            manual: true,
            vcs_branch: "main".into(),
            vcs_hash: String::new(),
            ..Trigger::default()
        };
        let vals = gather_vcs_context(&ctx, &test_application(), &mut trigger, &[]).await;

        assert_eq!(vals.branch, "main");
        assert_eq!(vals.hash, "abc123");
        assert_eq!(vals.author.as_deref(), Some("ada"));
        assert_eq!(vals.message.as_deref(), Some("fix checkout"));
        assert_eq!(trigger.vcs_hash, "abc123");
        assert_eq!(trigger.vcs_author, "ada");
    }

    #[tokio::test]
    async fn caller_params_name_the_branch_when_trigger_is_silent() {
        let stub = Arc::new(StubVcs::with_branch("develop", false, "ddd111"));
        let ctx = ctx_with(Some(stub));

        let mut trigger = Trigger::manual(User {
            id: 9,
            username: "ada".into(),
            fullname: String::new(),
            email: String::new(),
        });
        let params = vec![Parameter::string("git.branch", "develop")];
        let vals = gather_vcs_context(&ctx, &test_application(), &mut trigger, &params).await;

        assert_eq!(vals.branch, "develop");
        // Latest commit of the named branch backfills the hash.
        assert_eq!(vals.hash, "ddd111");
    }

    #[tokio::test]
    async fn no_repository_means_no_vcs_calls() {
        let stub = Arc::new(StubVcs::with_branch("main", true, "abc123"));
        let ctx = ctx_with(Some(stub.clone()));
        let mut app = test_application();
        app.repo_fullname = None;

        let mut trigger = Trigger::scheduled();
        let vals = gather_vcs_context(&ctx, &app, &mut trigger, &[]).await;

        assert_eq!(vals.branch, "master");
        assert!(stub.calls.lock().unwrap().is_empty());
    }
}
