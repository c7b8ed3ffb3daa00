use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::client::GithubClient;
use crate::error::GithubError;
use crate::review::{derive_check_status, derive_review_status};
use crate::types::{CheckRun, Comment, MergeResult, OverallCheckStatus, PrInfo, Reaction, ReviewStatus};

const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// A [`GithubClient`] backed by `reqwest` calls against the GitHub REST
/// API, the same HTTP-driver-behind-a-trait shape the teacher's LLM
/// provider crates use.
pub struct GithubRestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl GithubRestClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
        }
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "choo")
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GithubError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        Err(GithubError::Api { status, message })
    }
}

#[derive(Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
}

#[derive(Deserialize)]
struct IssueCommentResponse {
    id: u64,
    body: String,
    user: UserResponse,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Deserialize)]
struct ReactionResponse {
    content: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct MergeResponse {
    merged: bool,
    sha: Option<String>,
    message: String,
}

#[derive(Deserialize)]
struct CheckRunsResponse {
    check_runs: Vec<CheckRunResponse>,
}

#[derive(Deserialize)]
struct CheckRunResponse {
    name: String,
    status: String,
    conclusion: Option<String>,
}

#[async_trait]
impl GithubClient for GithubRestClient {
    async fn open_pr(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        target_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PrInfo, GithubError> {
        let url = format!("{}/repos/{owner}/{repo}/pulls", self.base_url);
        let resp = self
            .authed(self.http.post(&url))
            .json(&json!({
                "title": title,
                "body": body,
                "head": branch,
                "base": target_branch,
            }))
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let pr: PullResponse = resp.json().await?;

        Ok(PrInfo {
            number: pr.number,
            html_url: pr.html_url,
            branch: branch.to_string(),
            target_branch: target_branch.to_string(),
        })
    }

    async fn get_comments(&self, owner: &str, repo: &str, pr_number: u64) -> Result<Vec<Comment>, GithubError> {
        let url = format!("{}/repos/{owner}/{repo}/issues/{pr_number}/comments", self.base_url);
        let resp = self.authed(self.http.get(&url)).send().await?;
        let resp = Self::check_status(resp).await?;
        let comments: Vec<IssueCommentResponse> = resp.json().await?;

        Ok(comments
            .into_iter()
            .map(|c| Comment {
                id: c.id,
                author: c.user.login,
                body: c.body,
                created_at: c.created_at,
            })
            .collect())
    }

    async fn get_review_status(&self, owner: &str, repo: &str, pr_number: u64) -> Result<ReviewStatus, GithubError> {
        let comments = self.get_comments(owner, repo, pr_number).await?;

        let url = format!("{}/repos/{owner}/{repo}/issues/{pr_number}/reactions", self.base_url);
        let resp = self.authed(self.http.get(&url)).send().await?;
        let resp = Self::check_status(resp).await?;
        let reactions: Vec<ReactionResponse> = resp.json().await?;
        let reactions: Vec<Reaction> = reactions
            .into_iter()
            .map(|r| Reaction {
                kind: r.content,
                created_at: r.created_at,
            })
            .collect();

        Ok(derive_review_status(&reactions, &comments))
    }

    async fn merge(&self, owner: &str, repo: &str, pr_number: u64) -> Result<MergeResult, GithubError> {
        let url = format!("{}/repos/{owner}/{repo}/pulls/{pr_number}/merge", self.base_url);
        let resp = self.authed(self.http.put(&url)).send().await?;
        let resp = Self::check_status(resp).await?;
        let merge: MergeResponse = resp.json().await?;

        Ok(MergeResult {
            merged: merge.merged,
            sha: merge.sha,
            message: merge.message,
        })
    }

    async fn get_check_status(&self, owner: &str, repo: &str, git_ref: &str) -> Result<OverallCheckStatus, GithubError> {
        let url = format!("{}/repos/{owner}/{repo}/commits/{git_ref}/check-runs", self.base_url);
        let resp = self.authed(self.http.get(&url)).send().await?;
        let resp = Self::check_status(resp).await?;
        let parsed: CheckRunsResponse = resp.json().await?;

        let checks: Vec<CheckRun> = parsed
            .check_runs
            .into_iter()
            .map(|c| CheckRun {
                name: c.name,
                completed: c.status == "completed",
                conclusion_failure: matches!(c.conclusion.as_deref(), Some("failure") | Some("timed_out") | Some("cancelled")),
            })
            .collect();

        Ok(derive_check_status(&checks))
    }
}
