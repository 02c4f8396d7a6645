//! Version-control collaborator interface.
//!
//! Every call may fail; the engine degrades gracefully (enrichment is
//! skipped with a warning) and never aborts a build over a VCS outage.

pub mod http;

use async_trait::async_trait;

use crate::models::vcs::{VcsBranch, VcsCommit, VcsRemote};

#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Repository metadata (clone URLs).
    async fn repo(&self, fullname: &str) -> anyhow::Result<VcsRemote>;

    /// All branches with their latest commit; at most one has `default`.
    async fn branches(&self, fullname: &str) -> anyhow::Result<Vec<VcsBranch>>;

    /// A single branch with its latest commit.
    async fn branch(&self, fullname: &str, name: &str) -> anyhow::Result<VcsBranch>;

    /// Metadata of one commit.
    async fn commit(&self, fullname: &str, hash: &str) -> anyhow::Result<VcsCommit>;

    /// Commits on `branch` in the half-open range `(since, until]`. An
    /// empty `since` means from the beginning of history.
    async fn commits(
        &self,
        fullname: &str,
        branch: &str,
        since: &str,
        until: &str,
    ) -> anyhow::Result<Vec<VcsCommit>>;
}

#[cfg(test)]
pub(crate) mod stub {
    //! In-memory VCS used by unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::models::vcs::VcsAuthor;

    #[derive(Default)]
    pub struct StubVcs {
        pub branches: Vec<VcsBranch>,
        pub commits: HashMap<String, VcsCommit>,
        pub range: Vec<VcsCommit>,
        pub remote: Option<VcsRemote>,
        pub down: bool,
        pub calls: Mutex<Vec<String>>,
    }

    impl StubVcs {
        pub fn with_branch(name: &str, default: bool, latest: &str) -> StubVcs {
            StubVcs {
                branches: vec![VcsBranch {
                    display_id: name.to_string(),
                    default,
                    latest_commit: latest.to_string(),
                }],
                ..StubVcs::default()
            }
        }

        pub fn add_commit(mut self, hash: &str, author: &str, message: &str) -> StubVcs {
            self.commits.insert(
                hash.to_string(),
                VcsCommit {
                    hash: hash.to_string(),
                    author: VcsAuthor {
                        name: author.to_string(),
                        email: String::new(),
                    },
                    message: message.to_string(),
                    timestamp: None,
                },
            );
            self
        }

        fn record(&self, call: impl Into<String>) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(call.into());
            if self.down {
                anyhow::bail!("vcs collaborator unreachable");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl VcsClient for StubVcs {
        async fn repo(&self, fullname: &str) -> anyhow::Result<VcsRemote> {
            self.record(format!("repo:{fullname}"))?;
            self.remote
                .clone()
                .ok_or_else(|| anyhow::anyhow!("unknown repository {fullname}"))
        }

        async fn branches(&self, fullname: &str) -> anyhow::Result<Vec<VcsBranch>> {
            self.record(format!("branches:{fullname}"))?;
            Ok(self.branches.clone())
        }

        async fn branch(&self, fullname: &str, name: &str) -> anyhow::Result<VcsBranch> {
            self.record(format!("branch:{fullname}:{name}"))?;
            self.branches
                .iter()
                .find(|b| b.display_id == name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown branch {name}"))
        }

        async fn commit(&self, fullname: &str, hash: &str) -> anyhow::Result<VcsCommit> {
            self.record(format!("commit:{fullname}:{hash}"))?;
            self.commits
                .get(hash)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown commit {hash}"))
        }

        async fn commits(
            &self,
            fullname: &str,
            branch: &str,
            since: &str,
            until: &str,
        ) -> anyhow::Result<Vec<VcsCommit>> {
            self.record(format!("commits:{fullname}:{branch}:{since}:{until}"))?;
            Ok(self.range.clone())
        }
    }
}
