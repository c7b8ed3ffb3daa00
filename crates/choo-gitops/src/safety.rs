//! Safety configuration shared by the real git façade and its in-memory
//! test double, so both enforce identical guard semantics.

use chrono::{DateTime, Utc};

use crate::GitOpsError;

/// Guards against operating on the wrong branch.
#[derive(Debug, Clone, Default)]
pub struct BranchGuard {
    /// If set, every guarded operation must run with exactly this branch
    /// checked out.
    pub expected_branch: Option<String>,
    /// If non-empty, the current branch must start with one of these
    /// prefixes (checked only when `expected_branch` is `None`).
    pub allowed_branch_prefixes: Vec<String>,
    /// Branches on which `commit`/`reset_hard`/`push` are always refused.
    pub protected_branches: Vec<String>,
}

impl BranchGuard {
    pub fn with_protected_defaults() -> Self {
        Self {
            protected_branches: vec!["main".to_string(), "master".to_string()],
            ..Default::default()
        }
    }

    fn check_expected(&self, op: &str, current: &str) -> Result<(), GitOpsError> {
        if let Some(expected) = &self.expected_branch {
            if current != expected {
                return Err(GitOpsError::UnexpectedBranch {
                    op: op.to_string(),
                    actual: current.to_string(),
                    expected: expected.clone(),
                });
            }
            return Ok(());
        }

        if !self.allowed_branch_prefixes.is_empty()
            && !self
                .allowed_branch_prefixes
                .iter()
                .any(|prefix| current.starts_with(prefix.as_str()))
        {
            return Err(GitOpsError::UnexpectedBranch {
                op: op.to_string(),
                actual: current.to_string(),
                expected: self.allowed_branch_prefixes.join("|"),
            });
        }

        Ok(())
    }

    fn check_protected(&self, op: &str, current: &str) -> Result<(), GitOpsError> {
        if self.protected_branches.iter().any(|b| b == current) {
            return Err(GitOpsError::ProtectedBranch {
                op: op.to_string(),
                branch: current.to_string(),
            });
        }
        Ok(())
    }
}

/// Per-instance safety policy.
#[derive(Debug, Clone, Default)]
pub struct SafetyConfig {
    pub allow_destructive: bool,
    pub branch_guard: Option<BranchGuard>,
}

impl SafetyConfig {
    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }

    pub fn with_branch_guard(mut self, guard: BranchGuard) -> Self {
        self.branch_guard = Some(guard);
        self
    }
}

/// One audited operation. Destructive ops blocked by `allow_destructive` or
/// branch-guard violations are still recorded, marked as blocked.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub op: String,
    pub path: std::path::PathBuf,
    pub branch: Option<String>,
    pub checks: Vec<String>,
    pub passed: bool,
    pub failure_reason: Option<String>,
}

pub trait AuditLogger: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Default logger: emits each record through `tracing`, matching the
/// ambient logging posture of every other crate in this workspace.
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn record(&self, record: AuditRecord) {
        if record.passed {
            tracing::debug!(
                op = %record.op,
                path = %record.path.display(),
                branch = record.branch.as_deref().unwrap_or("?"),
                "git operation"
            );
        } else {
            tracing::warn!(
                op = %record.op,
                path = %record.path.display(),
                branch = record.branch.as_deref().unwrap_or("?"),
                reason = record.failure_reason.as_deref().unwrap_or(""),
                "git operation blocked"
            );
        }
    }
}

/// Which checks a given operation is subject to.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardChecks {
    /// Refuse if `allow_destructive` is false.
    pub destructive: bool,
    /// Refuse if the current branch doesn't match `expected_branch` /
    /// `allowed_branch_prefixes`.
    pub expected_branch: bool,
    /// Refuse if the current branch is in `protected_branches`.
    pub protected_branch: bool,
}

/// Evaluates the checks requested by `checks` for one operation, emitting
/// an [`AuditRecord`] to `audit` regardless of outcome. Shared by the real
/// façade and the in-memory double so both enforce identical semantics.
pub fn guard_operation(
    audit: &dyn AuditLogger,
    path: &std::path::Path,
    op: &str,
    checks: GuardChecks,
    config: &SafetyConfig,
    current_branch: Option<&str>,
) -> Result<(), GitOpsError> {
    let mut ran = Vec::new();
    let mut result = Ok(());

    if checks.destructive {
        ran.push("allow_destructive".to_string());
        if !config.allow_destructive {
            result = Err(GitOpsError::DestructiveNotAllowed {
                op: op.to_string(),
                path: path.to_path_buf(),
            });
        }
    }

    if result.is_ok() {
        if let (Some(guard), Some(branch)) = (&config.branch_guard, current_branch) {
            if checks.protected_branch {
                ran.push("protected_branches".to_string());
                result = guard.check_protected(op, branch);
            }
            if result.is_ok() && checks.expected_branch {
                ran.push("expected_branch".to_string());
                result = guard.check_expected(op, branch);
            }
        }
    }

    audit.record(AuditRecord {
        timestamp: Utc::now(),
        op: op.to_string(),
        path: path.to_path_buf(),
        branch: current_branch.map(str::to_string),
        checks: ran,
        passed: result.is_ok(),
        failure_reason: result.as_ref().err().map(|e| e.to_string()),
    });

    result
}
