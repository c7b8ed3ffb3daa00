use std::time::Duration;

use async_trait::async_trait;

use crate::error::GithubError;
use crate::types::{Comment, MergeResult, OverallCheckStatus, PrInfo, ReviewStatus};

/// A GitHub pull request client. One instance per (owner, repo) pair in
/// practice, though operations take the repo coordinates explicitly so a
/// single client can be shared across units targeting different repos.
#[async_trait]
pub trait GithubClient: Send + Sync {
    async fn open_pr(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        target_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PrInfo, GithubError>;

    async fn get_comments(&self, owner: &str, repo: &str, pr_number: u64) -> Result<Vec<Comment>, GithubError>;

    async fn get_review_status(&self, owner: &str, repo: &str, pr_number: u64) -> Result<ReviewStatus, GithubError>;

    async fn merge(&self, owner: &str, repo: &str, pr_number: u64) -> Result<MergeResult, GithubError>;

    async fn get_check_status(&self, owner: &str, repo: &str, git_ref: &str) -> Result<OverallCheckStatus, GithubError>;

    /// Poll `get_check_status` every `interval` until it resolves to
    /// something other than `Pending`. The caller is responsible for
    /// bounding overall wait time via cancellation.
    async fn wait_for_checks(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        interval: Duration,
    ) -> Result<OverallCheckStatus, GithubError> {
        loop {
            let status = self.get_check_status(owner, repo, git_ref).await?;
            if status != OverallCheckStatus::Pending {
                return Ok(status);
            }
            tokio::time::sleep(interval).await;
        }
    }
}
