//! GitHub REST client for branch, pull request and team lookups

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use branchscan_core::config::VcsConfig;
use branchscan_core::{ScanSyncError, ServiceError};

use crate::domain::{Branch, CommitRange, PullRequest, VersionControlHost};

const USER_AGENT: &str = concat!("branchscan/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
/// Hard stop for paginated listings
const MAX_PAGES: u32 = 100;

#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub per_page: u32,
}

impl GitHubClientConfig {
    pub fn from_config(config: &VcsConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            timeout: config.timeout(),
            per_page: config.per_page.clamp(1, 100),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryDto {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct CommitRefDto {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BranchDto {
    name: String,
    commit: CommitRefDto,
}

#[derive(Debug, Deserialize)]
struct CompareDto {
    #[serde(default)]
    commits: Vec<CommitRefDto>,
}

#[derive(Debug, Deserialize)]
struct PullRefDto {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestDto {
    number: u64,
    #[serde(default)]
    title: String,
    head: PullRefDto,
    base: PullRefDto,
}

#[derive(Debug, Deserialize)]
struct MemberDto {
    login: String,
}

/// Client for the GitHub REST API
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubClientConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self
            .client
            .get(format!("{}{}", self.config.base_url, path))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);

        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = request.send().await.map_err(|e| self.map_transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limited = status == StatusCode::FORBIDDEN
            && response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                == Some("0");
        let body = response.text().await.unwrap_or_default();

        if rate_limited {
            warn!("GitHub API rate limit exhausted");
            return Err(ServiceError::RateLimited);
        }
        Err(ServiceError::from_status(status.as_u16(), error_message(&body, status)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        let response = self.send(self.get(path).query(query)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::InvalidResponse(format!("{}: {}", path, e)))
    }

    /// Follow `page` until a short page comes back
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ServiceError> {
        let per_page = self.config.per_page;
        let mut items = Vec::new();

        for page in 1..=MAX_PAGES {
            let mut params = query.to_vec();
            params.push(("per_page", per_page.to_string()));
            params.push(("page", page.to_string()));

            let batch: Vec<T> = self.get_json(path, &params).await?;
            let done = (batch.len() as u32) < per_page;
            items.extend(batch);
            if done {
                return Ok(items);
            }
        }

        warn!(path, pages = MAX_PAGES, "Pagination limit reached, listing truncated");
        Ok(items)
    }

    fn map_transport_error(&self, error: reqwest::Error) -> ServiceError {
        if error.is_timeout() {
            ServiceError::Timeout {
                seconds: self.config.timeout.as_secs(),
            }
        } else {
            ServiceError::Network(error.to_string())
        }
    }

    async fn fetch_default_branch(&self, owner: &str, repository: &str) -> Result<String, ServiceError> {
        let repo: RepositoryDto = self
            .get_json(&format!("/repos/{}/{}", owner, repository), &[])
            .await?;
        Ok(repo.default_branch)
    }

    async fn branch_head(&self, owner: &str, repository: &str, branch: &str) -> Result<String, ServiceError> {
        let dto: BranchDto = self
            .get_json(&format!("/repos/{}/{}/branches/{}", owner, repository, branch), &[])
            .await?;
        Ok(dto.commit.sha)
    }

    async fn compare(
        &self,
        owner: &str,
        repository: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let path = format!("/repos/{}/{}/compare/{}...{}", owner, repository, base, head);
        let per_page = self.config.per_page;
        let mut commits = Vec::new();

        for page in 1..=MAX_PAGES {
            let params = [("per_page", per_page.to_string()), ("page", page.to_string())];
            let dto: CompareDto = self.get_json(&path, &params).await?;
            let done = (dto.commits.len() as u32) < per_page;
            commits.extend(dto.commits.into_iter().map(|c| c.sha));
            if done {
                break;
            }
        }

        Ok(commits)
    }
}

/// GitHub error bodies are `{"message": ...}`; fall back to the raw text
fn error_message(body: &str, status: StatusCode) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl VersionControlHost for GitHubClient {
    async fn default_branch(&self, owner: &str, repository: &str) -> Result<String, ScanSyncError> {
        self.fetch_default_branch(owner, repository)
            .await
            .map_err(ScanSyncError::version_control)
    }

    /// The default branch itself, or a branch with nothing ahead of it,
    /// yields its head commit at both ends
    #[instrument(skip(self))]
    async fn branch_commit_range(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> Result<CommitRange, ScanSyncError> {
        let result: Result<CommitRange, ServiceError> = async {
            let default = self.fetch_default_branch(owner, repository).await?;
            let head = self.branch_head(owner, repository, branch).await?;
            if branch == default {
                return Ok(CommitRange::new(head.clone(), head));
            }

            let commits = self.compare(owner, repository, &default, branch).await?;
            let range = match (commits.first(), commits.last()) {
                (Some(first), Some(last)) => CommitRange::new(first.as_str(), last.as_str()),
                _ => CommitRange::new(head.clone(), head),
            };
            debug!(ahead = commits.len(), first = %range.first, last = %range.last, "Resolved branch range");
            Ok(range)
        }
        .await;

        result.map_err(ScanSyncError::version_control)
    }

    async fn commits_between(
        &self,
        owner: &str,
        repository: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, ScanSyncError> {
        self.compare(owner, repository, base, head)
            .await
            .map_err(ScanSyncError::version_control)
    }

    async fn list_pull_requests(
        &self,
        owner: &str,
        repository: &str,
    ) -> Result<Vec<PullRequest>, ScanSyncError> {
        let pulls: Vec<PullRequestDto> = self
            .get_paginated(
                &format!("/repos/{}/{}/pulls", owner, repository),
                &[("state", "open".to_string())],
            )
            .await
            .map_err(ScanSyncError::version_control)?;

        Ok(pulls
            .into_iter()
            .map(|pr| PullRequest {
                number: pr.number,
                title: pr.title,
                head_ref: pr.head.name,
                head_sha: pr.head.sha,
                base_ref: pr.base.name,
            })
            .collect())
    }

    async fn list_branches(&self, owner: &str, repository: &str) -> Result<Vec<Branch>, ScanSyncError> {
        let branches: Vec<BranchDto> = self
            .get_paginated(&format!("/repos/{}/{}/branches", owner, repository), &[])
            .await
            .map_err(ScanSyncError::version_control)?;

        Ok(branches
            .into_iter()
            .map(|b| Branch {
                name: b.name,
                sha: b.commit.sha,
            })
            .collect())
    }

    async fn list_team_members(&self, org: &str, team: &str) -> Result<Vec<String>, ScanSyncError> {
        let members: Vec<MemberDto> = self
            .get_paginated(&format!("/orgs/{}/teams/{}/members", org, team), &[])
            .await
            .map_err(ScanSyncError::version_control)?;

        Ok(members.into_iter().map(|m| m.login).collect())
    }
}
