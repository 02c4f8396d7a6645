//! Commit diff against the previous build on the same branch.

use diesel_async::AsyncPgConnection;

use crate::error::Result;
use crate::models::vcs::VcsCommit;
use crate::models::PipelineBuild;
use crate::services::{history, EngineContext};
use crate::store;
use crate::vcs::VcsClient;

/// How to obtain the commit list for a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffPlan {
    /// Current and previous hashes are equal.
    Empty,
    /// Both hashes known: the range `(previous, current]`.
    Range { since: String, until: String },
    /// No usable previous hash: everything up to the current hash.
    UpTo { until: String },
    /// Only the branch is known: its single latest commit.
    LatestOfBranch,
}

/// Decide the diff policy from the current hash and the previous build.
pub fn diff_plan(current_hash: &str, previous_hash: Option<&str>) -> DiffPlan {
    match previous_hash {
        Some(prev) if prev == current_hash => DiffPlan::Empty,
        Some(prev) if !prev.is_empty() && !current_hash.is_empty() => DiffPlan::Range {
            since: prev.to_string(),
            until: current_hash.to_string(),
        },
        _ if !current_hash.is_empty() => DiffPlan::UpTo {
            until: current_hash.to_string(),
        },
        _ => DiffPlan::LatestOfBranch,
    }
}

/// Execute a diff plan against the VCS collaborator.
pub async fn fetch_commits(
    client: &dyn VcsClient,
    repo: &str,
    branch: &str,
    plan: &DiffPlan,
) -> anyhow::Result<Vec<VcsCommit>> {
    match plan {
        DiffPlan::Empty => Ok(Vec::new()),
        DiffPlan::Range { since, until } => client.commits(repo, branch, since, until).await,
        DiffPlan::UpTo { until } => client.commits(repo, branch, "", until).await,
        DiffPlan::LatestOfBranch => {
            let b = client.branch(repo, branch).await?;
            if b.latest_commit.is_empty() {
                anyhow::bail!("branch {branch} has no latest commit");
            }
            Ok(vec![client.commit(repo, &b.latest_commit).await?])
        }
    }
}

/// Compute the commit diff against the previous build on the same branch
/// and persist it into the build's `commits` field.
///
/// Degrades to an empty diff when no VCS is bound, the application has no
/// repository, or the collaborator fails; persistence failures are logged
/// and swallowed.
pub async fn update_build_commits(
    conn: &mut AsyncPgConnection,
    ctx: &EngineContext,
    pb: &PipelineBuild,
) -> Result<Vec<VcsCommit>> {
    let (Some(client), Some(repo)) = (&ctx.vcs, &pb.application.repo_fullname) else {
        return Ok(Vec::new());
    };

    let previous = history::previous_on_branch(conn, pb).await?;
    let previous_hash = previous.as_ref().map(|p| p.trigger.vcs_hash.as_str());
    let plan = diff_plan(&pb.trigger.vcs_hash, previous_hash);

    let commits = match fetch_commits(client.as_ref(), repo, pb.branch(), &plan).await {
        Ok(commits) => commits,
        Err(e) => {
            crate::metrics::vcs_degraded("commits");
            tracing::warn!(build_id = pb.id, repo = %repo, "cannot get commits: {e}");
            return Ok(Vec::new());
        }
    };

    if let Err(e) = store::build::update_commits(conn, pb.id, &commits).await {
        tracing::warn!(build_id = pb.id, "cannot persist build commits: {e}");
    }
    Ok(commits)
}
