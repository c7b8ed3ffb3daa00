//! An in-memory [`GithubClient`] double for worker tests: no network,
//! state is pushed in explicitly (comments, reactions, check runs) so a
//! test can script a review cycle deterministically.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::GithubClient;
use crate::error::GithubError;
use crate::review::{derive_check_status, derive_review_status};
use crate::types::{CheckRun, Comment, MergeResult, OverallCheckStatus, PrInfo, Reaction, ReviewStatus};

struct FakeState {
    next_pr_number: u64,
    comments: HashMap<u64, Vec<Comment>>,
    reactions: HashMap<u64, Vec<Reaction>>,
    checks: HashMap<String, Vec<CheckRun>>,
    merged: Vec<u64>,
}

pub struct FakeGithubClient {
    state: Mutex<FakeState>,
}

impl Default for FakeGithubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGithubClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_pr_number: 1,
                comments: HashMap::new(),
                reactions: HashMap::new(),
                checks: HashMap::new(),
                merged: Vec::new(),
            }),
        }
    }

    pub fn add_comment(&self, pr_number: u64, comment: Comment) {
        self.state.lock().unwrap().comments.entry(pr_number).or_default().push(comment);
    }

    pub fn add_reaction(&self, pr_number: u64, reaction: Reaction) {
        self.state.lock().unwrap().reactions.entry(pr_number).or_default().push(reaction);
    }

    pub fn set_checks(&self, git_ref: impl Into<String>, checks: Vec<CheckRun>) {
        self.state.lock().unwrap().checks.insert(git_ref.into(), checks);
    }

    pub fn was_merged(&self, pr_number: u64) -> bool {
        self.state.lock().unwrap().merged.contains(&pr_number)
    }
}

#[async_trait]
impl GithubClient for FakeGithubClient {
    async fn open_pr(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
        target_branch: &str,
        _title: &str,
        _body: &str,
    ) -> Result<PrInfo, GithubError> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_pr_number;
        state.next_pr_number += 1;
        Ok(PrInfo {
            number,
            html_url: format!("https://github.com/fake/fake/pull/{number}"),
            branch: branch.to_string(),
            target_branch: target_branch.to_string(),
        })
    }

    async fn get_comments(&self, _owner: &str, _repo: &str, pr_number: u64) -> Result<Vec<Comment>, GithubError> {
        Ok(self.state.lock().unwrap().comments.get(&pr_number).cloned().unwrap_or_default())
    }

    async fn get_review_status(&self, _owner: &str, _repo: &str, pr_number: u64) -> Result<ReviewStatus, GithubError> {
        let state = self.state.lock().unwrap();
        let comments = state.comments.get(&pr_number).cloned().unwrap_or_default();
        let reactions = state.reactions.get(&pr_number).cloned().unwrap_or_default();
        Ok(derive_review_status(&reactions, &comments))
    }

    async fn merge(&self, _owner: &str, _repo: &str, pr_number: u64) -> Result<MergeResult, GithubError> {
        self.state.lock().unwrap().merged.push(pr_number);
        Ok(MergeResult {
            merged: true,
            sha: Some(format!("fakesha-{pr_number}")),
            message: "merged".to_string(),
        })
    }

    async fn get_check_status(&self, _owner: &str, _repo: &str, git_ref: &str) -> Result<OverallCheckStatus, GithubError> {
        let state = self.state.lock().unwrap();
        let checks = state.checks.get(git_ref).cloned().unwrap_or_default();
        Ok(derive_check_status(&checks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn review_cycle_progresses_with_reactions() {
        let client = FakeGithubClient::new();
        let pr = client.open_pr("o", "r", "feature/a", "main", "t", "b").await.unwrap();

        let status = client.get_review_status("o", "r", pr.number).await.unwrap();
        assert_eq!(status.state, crate::ReviewState::Pending);

        client.add_comment(
            pr.number,
            Comment {
                id: 1,
                author: "reviewer".into(),
                body: "fix this".into(),
                created_at: chrono::Utc::now(),
            },
        );
        let status = client.get_review_status("o", "r", pr.number).await.unwrap();
        assert_eq!(status.state, crate::ReviewState::ChangesRequested);

        client.add_reaction(pr.number, Reaction { kind: "+1".into(), created_at: chrono::Utc::now() });
        let status = client.get_review_status("o", "r", pr.number).await.unwrap();
        assert_eq!(status.state, crate::ReviewState::Approved);

        let merge = client.merge("o", "r", pr.number).await.unwrap();
        assert!(merge.merged);
        assert!(client.was_merged(pr.number));
    }
}
