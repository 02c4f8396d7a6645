//! HTTP adapter for the VCS collaborator API.

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::vcs::{VcsBranch, VcsCommit, VcsRemote};

use super::VcsClient;

pub struct HttpVcs {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpVcs {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> HttpVcs {
        HttpVcs {
            base_url: base_url.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("User-Agent", "gantry-engine");
        if !self.token.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.token));
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("vcs api {url} returned {status}: {text}");
        }
        Ok(resp.json::<T>().await?)
    }
}

#[derive(Deserialize)]
struct RepoDto {
    ssh_clone_url: String,
    http_clone_url: String,
}

#[derive(Deserialize)]
struct BranchDto {
    display_id: String,
    #[serde(default)]
    default: bool,
    #[serde(default)]
    latest_commit: String,
}

#[derive(Deserialize)]
struct AuthorDto {
    name: String,
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
struct CommitDto {
    hash: String,
    author: AuthorDto,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<BranchDto> for VcsBranch {
    fn from(b: BranchDto) -> VcsBranch {
        VcsBranch {
            display_id: b.display_id,
            default: b.default,
            latest_commit: b.latest_commit,
        }
    }
}

impl From<CommitDto> for VcsCommit {
    fn from(c: CommitDto) -> VcsCommit {
        VcsCommit {
            hash: c.hash,
            author: crate::models::vcs::VcsAuthor {
                name: c.author.name,
                email: c.author.email,
            },
            message: c.message,
            timestamp: c.timestamp,
        }
    }
}

#[async_trait]
impl VcsClient for HttpVcs {
    async fn repo(&self, fullname: &str) -> anyhow::Result<VcsRemote> {
        let dto: RepoDto = self.get(&format!("/repos/{fullname}")).await?;
        Ok(VcsRemote {
            ssh_clone_url: dto.ssh_clone_url,
            http_clone_url: dto.http_clone_url,
        })
    }

    async fn branches(&self, fullname: &str) -> anyhow::Result<Vec<VcsBranch>> {
        let dtos: Vec<BranchDto> = self.get(&format!("/repos/{fullname}/branches")).await?;
        Ok(dtos.into_iter().map(VcsBranch::from).collect())
    }

    async fn branch(&self, fullname: &str, name: &str) -> anyhow::Result<VcsBranch> {
        let dto: BranchDto = self
            .get(&format!("/repos/{fullname}/branches/{name}"))
            .await?;
        Ok(dto.into())
    }

    async fn commit(&self, fullname: &str, hash: &str) -> anyhow::Result<VcsCommit> {
        let dto: CommitDto = self.get(&format!("/repos/{fullname}/commits/{hash}")).await?;
        Ok(dto.into())
    }

    async fn commits(
        &self,
        fullname: &str,
        branch: &str,
        since: &str,
        until: &str,
    ) -> anyhow::Result<Vec<VcsCommit>> {
        let dtos: Vec<CommitDto> = self
            .get(&format!(
                "/repos/{fullname}/commits?branch={branch}&since={since}&until={until}"
            ))
            .await?;
        Ok(dtos.into_iter().map(VcsCommit::from).collect())
    }
}
