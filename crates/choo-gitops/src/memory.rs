//! An in-memory [`GitOperations`] double for tests: honors the same
//! destructive-op and branch-guard safety semantics as [`crate::GitRepo`]
//! without shelling out, and records every call for assertions.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::GitOpsError;
use crate::ops::{GitOperations, PushForce};
use crate::safety::{guard_operation, AuditLogger, GuardChecks, SafetyConfig, TracingAuditLogger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub op: String,
    pub args: Vec<String>,
}

struct MemState {
    current_branch: String,
    branches: HashSet<String>,
    commits: Vec<String>,
    pushed: Vec<(String, String)>,
    merged: Vec<String>,
    calls: Vec<RecordedCall>,
}

pub struct InMemoryGitOps {
    repo_path: PathBuf,
    config: SafetyConfig,
    audit: Arc<dyn AuditLogger>,
    state: Mutex<MemState>,
}

impl InMemoryGitOps {
    pub fn new(repo_path: impl Into<PathBuf>, config: SafetyConfig, initial_branch: impl Into<String>) -> Self {
        let initial_branch = initial_branch.into();
        Self {
            repo_path: repo_path.into(),
            config,
            audit: Arc::new(TracingAuditLogger),
            state: Mutex::new(MemState {
                branches: HashSet::from([initial_branch.clone()]),
                current_branch: initial_branch,
                commits: Vec::new(),
                pushed: Vec::new(),
                merged: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn with_audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn nth_call(&self, n: usize) -> Option<RecordedCall> {
        self.state.lock().unwrap().calls.get(n).cloned()
    }

    pub fn commits(&self) -> Vec<String> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn was_pushed(&self, remote: &str, branch: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .pushed
            .iter()
            .any(|(r, b)| r == remote && b == branch)
    }

    fn record(&self, op: &str, args: Vec<String>) {
        self.state.lock().unwrap().calls.push(RecordedCall {
            op: op.to_string(),
            args,
        });
    }

    fn guard(&self, op: &str, checks: GuardChecks) -> Result<(), GitOpsError> {
        let current_branch = if checks.expected_branch || checks.protected_branch {
            Some(self.state.lock().unwrap().current_branch.clone())
        } else {
            None
        };
        guard_operation(
            self.audit.as_ref(),
            &self.repo_path,
            op,
            checks,
            &self.config,
            current_branch.as_deref(),
        )
    }
}

const DESTRUCTIVE: GuardChecks = GuardChecks {
    destructive: true,
    expected_branch: true,
    protected_branch: false,
};
const PROTECTED: GuardChecks = GuardChecks {
    destructive: false,
    expected_branch: true,
    protected_branch: true,
};
const EXPECTED_ONLY: GuardChecks = GuardChecks {
    destructive: false,
    expected_branch: true,
    protected_branch: false,
};
const FORCE_PUSH: GuardChecks = GuardChecks {
    destructive: true,
    expected_branch: true,
    protected_branch: true,
};

#[async_trait]
impl GitOperations for InMemoryGitOps {
    async fn status(&self) -> Result<String, GitOpsError> {
        self.record("status", vec![]);
        Ok(String::new())
    }

    async fn rev_parse(&self, rev: &str) -> Result<String, GitOpsError> {
        self.record("rev_parse", vec![rev.to_string()]);
        Ok(format!("deadbeef-{rev}"))
    }

    async fn log(&self, range: Option<&str>, _max_count: Option<u32>) -> Result<Vec<String>, GitOpsError> {
        self.record("log", range.map(|r| vec![r.to_string()]).unwrap_or_default());
        Ok(self.state.lock().unwrap().commits.clone())
    }

    async fn diff(&self, range: Option<&str>) -> Result<String, GitOpsError> {
        self.record("diff", range.map(|r| vec![r.to_string()]).unwrap_or_default());
        Ok(String::new())
    }

    async fn current_branch(&self) -> Result<String, GitOpsError> {
        self.record("current_branch", vec![]);
        Ok(self.state.lock().unwrap().current_branch.clone())
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, GitOpsError> {
        self.record("branch_exists", vec![branch.to_string()]);
        Ok(self.state.lock().unwrap().branches.contains(branch))
    }

    async fn checkout_branch(&self, branch: &str, create: bool, base: Option<&str>) -> Result<(), GitOpsError> {
        self.record(
            "checkout_branch",
            vec![branch.to_string(), create.to_string(), base.unwrap_or("HEAD").to_string()],
        );
        let mut state = self.state.lock().unwrap();
        if create {
            state.branches.insert(branch.to_string());
        }
        state.current_branch = branch.to_string();
        Ok(())
    }

    async fn add(&self, paths: &[String]) -> Result<(), GitOpsError> {
        self.guard("add", EXPECTED_ONLY)?;
        self.record("add", paths.to_vec());
        Ok(())
    }

    async fn add_all(&self) -> Result<(), GitOpsError> {
        self.guard("add_all", EXPECTED_ONLY)?;
        self.record("add_all", vec![]);
        Ok(())
    }

    async fn reset(&self, rev: &str) -> Result<(), GitOpsError> {
        self.guard("reset", EXPECTED_ONLY)?;
        self.record("reset", vec![rev.to_string()]);
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String, GitOpsError> {
        self.guard("commit", PROTECTED)?;
        self.record("commit", vec![message.to_string()]);
        let mut state = self.state.lock().unwrap();
        state.commits.push(message.to_string());
        Ok(format!("deadbeef-{}", state.commits.len()))
    }

    async fn checkout_files(&self, paths: &[String]) -> Result<(), GitOpsError> {
        self.guard("checkout_files", DESTRUCTIVE)?;
        self.record("checkout_files", paths.to_vec());
        Ok(())
    }

    async fn clean(&self) -> Result<(), GitOpsError> {
        self.guard("clean", DESTRUCTIVE)?;
        self.record("clean", vec![]);
        Ok(())
    }

    async fn reset_hard(&self, rev: &str) -> Result<(), GitOpsError> {
        let mut checks = DESTRUCTIVE;
        checks.protected_branch = true;
        self.guard("reset_hard", checks)?;
        self.record("reset_hard", vec![rev.to_string()]);
        Ok(())
    }

    async fn fetch(&self, remote: &str) -> Result<(), GitOpsError> {
        self.record("fetch", vec![remote.to_string()]);
        Ok(())
    }

    async fn push(&self, remote: &str, branch: &str, force: PushForce) -> Result<(), GitOpsError> {
        let checks = match force {
            PushForce::None => PROTECTED,
            PushForce::Force | PushForce::ForceWithLease => FORCE_PUSH,
        };
        self.guard("push", checks)?;
        self.record("push", vec![remote.to_string(), branch.to_string(), format!("{force:?}")]);
        self.state.lock().unwrap().pushed.push((remote.to_string(), branch.to_string()));
        Ok(())
    }

    async fn merge(&self, branch: &str) -> Result<(), GitOpsError> {
        self.guard("merge", EXPECTED_ONLY)?;
        self.record("merge", vec![branch.to_string()]);
        self.state.lock().unwrap().merged.push(branch.to_string());
        Ok(())
    }

    async fn merge_abort(&self) -> Result<(), GitOpsError> {
        self.record("merge_abort", vec![]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let repo = InMemoryGitOps::new("/tmp/repo", SafetyConfig::default(), "choo/job/unit-a");
        repo.add_all().await.unwrap();
        repo.commit("feat: first task").await.unwrap();

        assert_eq!(repo.call_count("add_all"), 1);
        assert_eq!(repo.nth_call(0).unwrap().op, "add_all");
        assert_eq!(repo.nth_call(1).unwrap().op, "commit");
        assert_eq!(repo.commits(), vec!["feat: first task".to_string()]);
    }

    #[tokio::test]
    async fn reset_hard_blocked_without_allow_destructive() {
        let repo = InMemoryGitOps::new("/tmp/repo", SafetyConfig::default(), "choo/job/unit-a");
        let err = repo.reset_hard("HEAD~1").await.unwrap_err();
        assert!(matches!(err, GitOpsError::DestructiveNotAllowed { .. }));
    }

    #[tokio::test]
    async fn commit_on_protected_branch_is_refused() {
        use crate::safety::BranchGuard;
        let config = SafetyConfig::default().with_branch_guard(BranchGuard::with_protected_defaults());
        let repo = InMemoryGitOps::new("/tmp/repo", config, "main");
        let err = repo.commit("feat: oops").await.unwrap_err();
        assert!(matches!(err, GitOpsError::ProtectedBranch { .. }));
    }

    #[tokio::test]
    async fn commit_on_feature_branch_with_protected_guard_succeeds() {
        use crate::safety::BranchGuard;
        let config = SafetyConfig::default().with_branch_guard(BranchGuard::with_protected_defaults());
        let repo = InMemoryGitOps::new("/tmp/repo", config, "choo/job/unit-a");
        repo.commit("feat: ok").await.unwrap();
        assert_eq!(repo.commits().len(), 1);
    }
}
