use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::GitOpsError;
use crate::ops::{GitOperations, PushForce};
use crate::safety::{guard_operation, AuditLogger, GuardChecks, SafetyConfig, TracingAuditLogger};

/// A git façade bound to one repository path, enforcing `config`'s
/// destructive-operation and protected-branch guards before any mutating
/// command runs, and recording every operation (allowed or blocked) via
/// `audit`.
pub struct GitRepo {
    repo_path: PathBuf,
    config: SafetyConfig,
    audit: Arc<dyn AuditLogger>,
}

impl GitRepo {
    pub fn new(repo_path: impl Into<PathBuf>, config: SafetyConfig) -> Self {
        Self {
            repo_path: repo_path.into(),
            config,
            audit: Arc::new(TracingAuditLogger),
        }
    }

    pub fn with_audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    async fn run(&self, op: &str, args: &[&str]) -> Result<String, GitOpsError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .await
            .map_err(|source| GitOpsError::Spawn {
                op: op.to_string(),
                path: self.repo_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GitOpsError::CommandFailed {
                op: op.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout)
            .map(|s| s.trim().to_string())
            .map_err(|_| GitOpsError::NonUtf8Output { op: op.to_string() })
    }

    async fn current_branch_raw(&self) -> Result<String, GitOpsError> {
        self.run("current_branch", &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn guard(&self, op: &str, checks: GuardChecks) -> Result<(), GitOpsError> {
        let current_branch = if checks.expected_branch || checks.protected_branch {
            Some(self.current_branch_raw().await?)
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
impl GitOperations for GitRepo {
    async fn status(&self) -> Result<String, GitOpsError> {
        self.run("status", &["status", "--porcelain"]).await
    }

    async fn rev_parse(&self, rev: &str) -> Result<String, GitOpsError> {
        self.run("rev_parse", &["rev-parse", rev]).await
    }

    async fn log(&self, range: Option<&str>, max_count: Option<u32>) -> Result<Vec<String>, GitOpsError> {
        let mut args = vec!["log".to_string(), "--oneline".to_string()];
        if let Some(n) = max_count {
            args.push(format!("-n{n}"));
        }
        if let Some(range) = range {
            args.push(range.to_string());
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.run("log", &args).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    async fn diff(&self, range: Option<&str>) -> Result<String, GitOpsError> {
        match range {
            Some(range) => self.run("diff", &["diff", range]).await,
            None => self.run("diff", &["diff"]).await,
        }
    }

    async fn current_branch(&self) -> Result<String, GitOpsError> {
        self.current_branch_raw().await
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, GitOpsError> {
        let refname = format!("refs/heads/{branch}");
        match self.run("branch_exists", &["show-ref", "--verify", "--quiet", &refname]).await {
            Ok(_) => Ok(true),
            Err(GitOpsError::CommandFailed { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    async fn checkout_branch(&self, branch: &str, create: bool, base: Option<&str>) -> Result<(), GitOpsError> {
        if create {
            let base = base.unwrap_or("HEAD");
            self.run("checkout_branch", &["checkout", "-b", branch, base]).await?;
        } else {
            self.run("checkout_branch", &["checkout", branch]).await?;
        }
        Ok(())
    }

    async fn add(&self, paths: &[String]) -> Result<(), GitOpsError> {
        self.guard("add", EXPECTED_ONLY).await?;
        let mut args = vec!["add".to_string()];
        args.extend(paths.iter().cloned());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run("add", &args).await?;
        Ok(())
    }

    async fn add_all(&self) -> Result<(), GitOpsError> {
        self.guard("add_all", EXPECTED_ONLY).await?;
        self.run("add_all", &["add", "-A"]).await?;
        Ok(())
    }

    async fn reset(&self, rev: &str) -> Result<(), GitOpsError> {
        self.guard("reset", EXPECTED_ONLY).await?;
        self.run("reset", &["reset", rev]).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String, GitOpsError> {
        self.guard("commit", PROTECTED).await?;
        self.run("commit", &["commit", "-m", message]).await?;
        self.current_branch_raw().await?;
        self.rev_parse("HEAD").await
    }

    async fn checkout_files(&self, paths: &[String]) -> Result<(), GitOpsError> {
        self.guard("checkout_files", DESTRUCTIVE).await?;
        let mut args = vec!["checkout".to_string(), "--".to_string()];
        args.extend(paths.iter().cloned());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run("checkout_files", &args).await?;
        Ok(())
    }

    async fn clean(&self) -> Result<(), GitOpsError> {
        self.guard("clean", DESTRUCTIVE).await?;
        self.run("clean", &["clean", "-fd"]).await?;
        Ok(())
    }

    async fn reset_hard(&self, rev: &str) -> Result<(), GitOpsError> {
        let mut checks = DESTRUCTIVE;
        checks.protected_branch = true;
        self.guard("reset_hard", checks).await?;
        self.run("reset_hard", &["reset", "--hard", rev]).await?;
        Ok(())
    }

    async fn fetch(&self, remote: &str) -> Result<(), GitOpsError> {
        self.run("fetch", &["fetch", remote]).await?;
        Ok(())
    }

    async fn push(&self, remote: &str, branch: &str, force: PushForce) -> Result<(), GitOpsError> {
        let checks = match force {
            PushForce::None => PROTECTED,
            PushForce::Force | PushForce::ForceWithLease => FORCE_PUSH,
        };
        self.guard("push", checks).await?;

        let force_flag = match force {
            PushForce::None => None,
            PushForce::Force => Some("--force"),
            PushForce::ForceWithLease => Some("--force-with-lease"),
        };
        let mut args = vec!["push", remote, branch];
        if let Some(flag) = force_flag {
            args.push(flag);
        }
        self.run("push", &args).await?;
        Ok(())
    }

    async fn merge(&self, branch: &str) -> Result<(), GitOpsError> {
        self.guard("merge", EXPECTED_ONLY).await?;
        self.run("merge", &["merge", "--no-edit", branch]).await?;
        Ok(())
    }

    async fn merge_abort(&self) -> Result<(), GitOpsError> {
        self.run("merge_abort", &["merge", "--abort"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let status = StdCommand::new("git")
                .arg("-C")
                .arg(dir)
                .args(args)
                .status()
                .expect("git must be on PATH for this test");
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "initial"]);
    }

    #[tokio::test]
    async fn checkout_add_commit_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let repo = GitRepo::new(dir.path(), SafetyConfig::default().allow_destructive(false));
        repo.checkout_branch("feature/a", true, Some("main")).await.unwrap();
        std::fs::write(dir.path().join("new.txt"), "content\n").unwrap();
        repo.add_all().await.unwrap();
        repo.commit("feat: add new file").await.unwrap();

        assert_eq!(repo.current_branch().await.unwrap(), "feature/a");
        let log = repo.log(None, Some(1)).await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("feat: add new file"));
    }

    #[tokio::test]
    async fn commit_on_protected_branch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let config = SafetyConfig::default().with_branch_guard(crate::safety::BranchGuard::with_protected_defaults());
        let repo = GitRepo::new(dir.path(), config);
        std::fs::write(dir.path().join("new.txt"), "content\n").unwrap();
        repo.add_all().await.unwrap();
        let err = repo.commit("feat: oops").await.unwrap_err();
        assert!(matches!(err, GitOpsError::ProtectedBranch { .. }));
    }

    #[tokio::test]
    async fn reset_hard_requires_allow_destructive() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let repo = GitRepo::new(dir.path(), SafetyConfig::default());
        let err = repo.reset_hard("HEAD").await.unwrap_err();
        assert!(matches!(err, GitOpsError::DestructiveNotAllowed { .. }));
    }
}
